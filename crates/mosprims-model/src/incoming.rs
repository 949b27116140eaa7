use mosprims_frame::{Document, XmlElement};

use crate::error::{ModelError, Result};
use crate::field::Parsed;
use crate::machine_info::MachineInfo;
use crate::message::{MessageId, MosAck};
use crate::types::Strictness;

const ENVELOPE_FIELDS: [&str; 3] = ["ncsID", "mosID", "messageID"];

/// A received `<mos>` document split into envelope and payload.
///
/// The session layer only looks at the message id and a few structural
/// markers (heartbeat, ack status); the payload is passed on untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub ncs_id: Option<String>,
    pub mos_id: Option<String>,
    /// `None` when absent or not a valid id.
    pub message_id: Option<MessageId>,
    pub payload: Option<XmlElement>,
    pub raw: String,
}

impl IncomingMessage {
    pub fn decode(document: Document) -> Result<Self> {
        let Document { root, raw } = document;
        if root.name != "mos" {
            return Err(ModelError::NotMosDocument { found: root.name });
        }

        let message_id = root
            .child_text("messageID")
            .and_then(|text| text.parse::<MessageId>().ok());
        let payload = root
            .elements()
            .find(|e| !ENVELOPE_FIELDS.contains(&e.name.as_str()))
            .cloned();

        Ok(Self {
            ncs_id: root.child_text("ncsID").map(|id| id.trim().to_string()),
            mos_id: root.child_text("mosID").map(|id| id.trim().to_string()),
            message_id,
            payload,
            raw,
        })
    }

    /// Payload element name.
    pub fn kind(&self) -> Option<&str> {
        self.payload.as_ref().map(|p| p.name.as_str())
    }

    pub fn is_heartbeat(&self) -> bool {
        self.kind() == Some("heartbeat")
    }

    pub fn ack(&self) -> Option<MosAck> {
        self.payload
            .as_ref()
            .filter(|p| p.name == "mosAck")
            .map(MosAck::from_xml)
    }

    pub fn is_nack(&self) -> bool {
        self.ack().is_some_and(|ack| ack.is_nack())
    }

    pub fn is_buddy_deferral(&self) -> bool {
        self.ack().is_some_and(|ack| ack.is_buddy_deferral())
    }

    /// The payload, which must be named `name`.
    pub fn expect_payload(&self, name: &str) -> Result<&XmlElement> {
        let payload = self.payload.as_ref().ok_or(ModelError::MissingPayload)?;
        if payload.name != name {
            return Err(ModelError::UnexpectedPayload {
                expected: name.to_string(),
                found: payload.name.clone(),
            });
        }
        Ok(payload)
    }

    /// Decode a `listMachInfo` payload.
    pub fn machine_info(&self, strictness: Strictness) -> Result<Parsed<MachineInfo>> {
        let payload = self.expect_payload("listMachInfo")?;
        Ok(MachineInfo::from_xml(payload, strictness)?)
    }
}
