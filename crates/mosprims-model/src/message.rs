use std::fmt;
use std::str::FromStr;

use mosprims_frame::XmlElement;
use serde::{Deserialize, Serialize};

use crate::machine_info::MachineInfo;
use crate::types::{MosTime, MosType};

/// NACK reason a standby server sends while the main server is active.
pub const BUDDY_DEFERRAL: &str = "Buddy server cannot respond because main server is available";

/// A message identifier in `1..=MessageId::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(u32);

impl MessageId {
    /// 2^31 - 2.
    pub const MAX: u32 = (1 << 31) - 2;
    pub const FIRST: MessageId = MessageId(1);

    pub fn new(value: u32) -> Option<Self> {
        (1..=Self::MAX).contains(&value).then_some(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The following id, wrapping from `MAX` back to 1.
    pub fn next(self) -> Self {
        if self.0 >= Self::MAX {
            Self::FIRST
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| format!("invalid message id: {s:?}"))
    }
}

/// The channel a message category travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Lower,
    Upper,
    Query,
}

impl PortType {
    pub const ALL: [PortType; 3] = [PortType::Lower, PortType::Upper, PortType::Query];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Query => "query",
        }
    }

    /// Channels that emit heartbeats.
    pub fn carries_heartbeat(self) -> bool {
        matches!(self, Self::Lower | Self::Upper)
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lower" => Ok(Self::Lower),
            "upper" => Ok(Self::Upper),
            "query" => Ok(Self::Query),
            other => Err(format!("unknown port type: {other}")),
        }
    }
}

/// Addressing carried by every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub ncs_id: String,
    pub mos_id: String,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckStatus {
    Ack,
    Nack,
}

impl AckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::Nack => "NACK",
        }
    }
}

/// `<mosAck>` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MosAck {
    pub obj_id: Option<String>,
    pub obj_rev: Option<u32>,
    pub status: AckStatus,
    pub description: Option<String>,
}

impl MosAck {
    pub fn ack() -> Self {
        Self {
            obj_id: None,
            obj_rev: None,
            status: AckStatus::Ack,
            description: None,
        }
    }

    pub fn nack(description: impl Into<String>) -> Self {
        Self {
            obj_id: None,
            obj_rev: None,
            status: AckStatus::Nack,
            description: Some(description.into()),
        }
    }

    pub fn is_nack(&self) -> bool {
        self.status == AckStatus::Nack
    }

    pub fn is_buddy_deferral(&self) -> bool {
        self.is_nack() && self.description.as_deref() == Some(BUDDY_DEFERRAL)
    }

    /// Read a `<mosAck>` element. Anything other than `NACK` counts as ACK.
    pub fn from_xml(element: &XmlElement) -> Self {
        let status = match element.child_text("status").as_deref().map(str::trim) {
            Some("NACK") => AckStatus::Nack,
            _ => AckStatus::Ack,
        };
        Self {
            obj_id: element.child_text("objID"),
            obj_rev: element
                .child_text("objRev")
                .and_then(|rev| rev.trim().parse().ok()),
            status,
            description: element.child_text("statusDescription"),
        }
    }

    pub fn to_xml(&self) -> XmlElement {
        let mut element = XmlElement::new("mosAck");
        if let Some(obj_id) = &self.obj_id {
            element.push(XmlElement::text_element("objID", obj_id.as_str()));
        }
        if let Some(obj_rev) = self.obj_rev {
            element.push(XmlElement::text_element("objRev", obj_rev.to_string()));
        }
        element.push(XmlElement::text_element("status", self.status.as_str()));
        if let Some(description) = &self.description {
            element.push(XmlElement::text_element("statusDescription", description.as_str()));
        }
        element
    }
}

/// Outgoing message variants.
///
/// Profile business messages beyond profile 0 travel as [`MosMessage::Custom`]
/// with a caller-built payload element.
#[derive(Debug, Clone, PartialEq)]
pub enum MosMessage {
    Heartbeat { port: PortType, time: MosTime },
    ReqMachInfo,
    ListMachInfo(MachineInfo),
    Ack { port: PortType, ack: MosAck },
    Custom { port: PortType, payload: XmlElement },
}

impl MosMessage {
    pub fn heartbeat(port: PortType) -> Self {
        Self::Heartbeat {
            port,
            time: MosTime::now(),
        }
    }

    /// Channel this message is sent on.
    pub fn port(&self) -> PortType {
        match self {
            Self::Heartbeat { port, .. } | Self::Ack { port, .. } | Self::Custom { port, .. } => *port,
            Self::ReqMachInfo | Self::ListMachInfo(_) => PortType::Lower,
        }
    }

    /// Payload element name.
    pub fn kind(&self) -> &str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::ReqMachInfo => "reqMachInfo",
            Self::ListMachInfo(_) => "listMachInfo",
            Self::Ack { .. } => "mosAck",
            Self::Custom { payload, .. } => &payload.name,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat { .. })
    }

    pub fn payload(&self) -> XmlElement {
        match self {
            Self::Heartbeat { time, .. } => XmlElement::new("heartbeat")
                .with_child(XmlElement::text_element("time", time.stringify())),
            Self::ReqMachInfo => XmlElement::new("reqMachInfo"),
            Self::ListMachInfo(info) => info.to_xml(),
            Self::Ack { ack, .. } => ack.to_xml(),
            Self::Custom { payload, .. } => payload.clone(),
        }
    }

    /// Wire-ready document. Serializing again yields the same text.
    pub fn to_xml(&self, envelope: &Envelope) -> String {
        XmlElement::new("mos")
            .with_child(XmlElement::text_element("ncsID", envelope.ncs_id.as_str()))
            .with_child(XmlElement::text_element("mosID", envelope.mos_id.as_str()))
            .with_child(XmlElement::text_element(
                "messageID",
                envelope.message_id.to_string(),
            ))
            .with_child(self.payload())
            .to_xml()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strictness;

    fn envelope(id: u32) -> Envelope {
        Envelope {
            ncs_id: "ncs.example".into(),
            mos_id: "mos.example".into(),
            message_id: MessageId::new(id).unwrap(),
        }
    }

    #[test]
    fn test_message_id_bounds() {
        assert!(MessageId::new(0).is_none());
        assert!(MessageId::new(MessageId::MAX).is_some());
        assert!(MessageId::new(MessageId::MAX + 1).is_none());
        assert_eq!(MessageId::new(MessageId::MAX).unwrap().next(), MessageId::FIRST);
        assert_eq!("42".parse::<MessageId>().unwrap().get(), 42);
        assert!("abc".parse::<MessageId>().is_err());
    }

    #[test]
    fn test_envelope_order_and_payload() {
        let time = MosTime::create("2009-04-11T14:22:07Z", Strictness::Strict).unwrap();
        let message = MosMessage::Heartbeat {
            port: PortType::Upper,
            time,
        };
        assert_eq!(
            message.to_xml(&envelope(7)),
            "<mos><ncsID>ncs.example</ncsID><mosID>mos.example</mosID><messageID>7</messageID>\
             <heartbeat><time>2009-04-11T14:22:07,000Z</time></heartbeat></mos>"
        );
    }

    #[test]
    fn test_routing_by_category() {
        assert_eq!(MosMessage::ReqMachInfo.port(), PortType::Lower);
        assert_eq!(MosMessage::heartbeat(PortType::Upper).port(), PortType::Upper);
        let custom = MosMessage::Custom {
            port: PortType::Query,
            payload: XmlElement::new("mosReqObj"),
        };
        assert_eq!(custom.port(), PortType::Query);
        assert_eq!(custom.kind(), "mosReqObj");
    }

    #[test]
    fn test_ack_xml() {
        let nack = MosAck::nack(BUDDY_DEFERRAL);
        let element = nack.to_xml();
        assert_eq!(
            element.to_xml(),
            format!("<mosAck><status>NACK</status><statusDescription>{BUDDY_DEFERRAL}</statusDescription></mosAck>")
        );
        let parsed = MosAck::from_xml(&element);
        assert!(parsed.is_buddy_deferral());
        assert!(!MosAck::nack("Unknown object").is_buddy_deferral());
    }
}
