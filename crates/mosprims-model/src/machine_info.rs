use mosprims_frame::XmlElement;
use serde::Serialize;

use crate::error::ParseError;
use crate::field::{ParseContext, Parsed};
use crate::types::{MosString128, MosTime, MosType, Strictness};

/// Profiles a device declares in `listMachInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportedProfiles {
    /// `NCS`, `MOS` or `NCS\MOS`.
    pub device_type: String,
    /// `profiles[n]` is profile n.
    pub profiles: [bool; 8],
}

impl Default for SupportedProfiles {
    fn default() -> Self {
        Self {
            device_type: "MOS".to_string(),
            profiles: [true, false, false, false, false, false, false, false],
        }
    }
}

impl SupportedProfiles {
    pub fn supports(&self, profile: usize) -> bool {
        self.profiles.get(profile).copied().unwrap_or(false)
    }

    fn from_xml(element: &XmlElement) -> Self {
        let mut profiles = [false; 8];
        for profile in element.children_named("mosProfile") {
            let number = profile
                .attribute("number")
                .and_then(|n| n.trim().parse::<usize>().ok());
            if let Some(slot) = number.and_then(|n| profiles.get_mut(n)) {
                *slot = profile.text().trim().eq_ignore_ascii_case("YES");
            }
        }
        Self {
            device_type: element.attribute("deviceType").unwrap_or_default().to_string(),
            profiles,
        }
    }

    fn to_xml(&self) -> XmlElement {
        let mut element =
            XmlElement::new("supportedProfiles").with_attribute("deviceType", self.device_type.as_str());
        for (number, supported) in self.profiles.iter().enumerate() {
            element.push(
                XmlElement::text_element("mosProfile", if *supported { "YES" } else { "NO" })
                    .with_attribute("number", number.to_string()),
            );
        }
        element
    }
}

/// Profile 0 machine description (`listMachInfo`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInfo {
    pub manufacturer: MosString128,
    pub model: MosString128,
    pub hw_rev: MosString128,
    pub sw_rev: MosString128,
    /// Date of manufacture.
    pub dom: MosString128,
    /// Serial number.
    pub sn: MosString128,
    pub id: MosString128,
    pub time: MosTime,
    pub op_time: Option<MosTime>,
    pub mos_rev: MosString128,
    pub supported_profiles: SupportedProfiles,
}

impl MachineInfo {
    /// Parse a `listMachInfo` element.
    pub fn from_xml(element: &XmlElement, strictness: Strictness) -> Result<Parsed<Self>, ParseError> {
        let mut ctx = ParseContext::new(strictness, &element.name);
        let info = Self {
            manufacturer: ctx.required(element, "manufacturer"),
            model: ctx.required(element, "model"),
            hw_rev: ctx.optional(element, "hwRev").unwrap_or_default(),
            sw_rev: ctx.optional(element, "swRev").unwrap_or_default(),
            dom: ctx.optional(element, "DOM").unwrap_or_default(),
            sn: ctx.optional(element, "SN").unwrap_or_default(),
            id: ctx.required(element, "ID"),
            time: ctx.required(element, "time"),
            op_time: ctx.optional(element, "opTime"),
            mos_rev: ctx.optional(element, "mosRev").unwrap_or_default(),
            supported_profiles: element
                .child("supportedProfiles")
                .map(SupportedProfiles::from_xml)
                .unwrap_or_default(),
        };
        ctx.finish(info)
    }

    pub fn to_xml(&self) -> XmlElement {
        let text = |name: &str, value: &MosString128| XmlElement::text_element(name, value.stringify());
        let mut element = XmlElement::new("listMachInfo")
            .with_child(text("manufacturer", &self.manufacturer))
            .with_child(text("model", &self.model))
            .with_child(text("hwRev", &self.hw_rev))
            .with_child(text("swRev", &self.sw_rev))
            .with_child(text("DOM", &self.dom))
            .with_child(text("SN", &self.sn))
            .with_child(text("ID", &self.id))
            .with_child(XmlElement::text_element("time", self.time.stringify()));
        if let Some(op_time) = &self.op_time {
            element.push(XmlElement::text_element("opTime", op_time.stringify()));
        }
        element
            .with_child(text("mosRev", &self.mos_rev))
            .with_child(self.supported_profiles.to_xml())
    }
}
