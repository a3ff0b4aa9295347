//! Section identifiers for the member-detail view.

use serde::{Deserialize, Serialize};

/// One of the four groupings of profile fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    PersonalInfo,
    Contacts,
    Medical,
    Progression,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::PersonalInfo,
        Section::Contacts,
        Section::Medical,
        Section::Progression,
    ];

    /// Key under `sectionData` in the member record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::PersonalInfo => "personalInfo",
            Section::Contacts => "contacts",
            Section::Medical => "medical",
            Section::Progression => "progression",
        }
    }

    /// Accepts both the record key and the template name used by the
    /// front-end navigation (`anagrafici`, `contatti`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "personalInfo" | "anagrafici" => Some(Section::PersonalInfo),
            "contacts" | "contatti" => Some(Section::Contacts),
            "medical" | "sanitarie" => Some(Section::Medical),
            "progression" | "progressione" => Some(Section::Progression),
            _ => None,
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
