//! Member record model matching the remote `utenti` documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Section;

/// A single profile field: either a plain string or a one-level group of
/// strings (e.g. `genitore1 -> {nome, email, numero}`). Anything else the
/// store holds (`null`, numbers, deeper objects) is kept verbatim and reads
/// as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Group(BTreeMap<String, Option<String>>),
    Other(serde_json::Value),
}

/// Field name to value mapping for one section.
pub type SectionFields = BTreeMap<String, FieldValue>;

/// The four sectioned groupings of profile data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_info: Option<SectionFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<SectionFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical: Option<SectionFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progression: Option<SectionFields>,
}

impl SectionData {
    /// Fields of a section; absent sections read as empty.
    pub fn section(&self, section: Section) -> Option<&SectionFields> {
        match section {
            Section::PersonalInfo => self.personal_info.as_ref(),
            Section::Contacts => self.contacts.as_ref(),
            Section::Medical => self.medical.as_ref(),
            Section::Progression => self.progression.as_ref(),
        }
    }

    /// Mutable fields of a section, creating it when absent.
    pub fn section_mut(&mut self, section: Section) -> &mut SectionFields {
        let slot = match section {
            Section::PersonalInfo => &mut self.personal_info,
            Section::Contacts => &mut self.contacts,
            Section::Medical => &mut self.medical,
            Section::Progression => &mut self.progression,
        };
        slot.get_or_insert_with(BTreeMap::new)
    }
}

/// Location of a field inside a section: a top-level key, optionally with a
/// nested key inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKey {
    pub key: &'static str,
    pub nested: Option<&'static str>,
}

impl FieldKey {
    pub const fn flat(key: &'static str) -> Self {
        Self { key, nested: None }
    }

    pub const fn nested(key: &'static str, nested: &'static str) -> Self {
        Self {
            key,
            nested: Some(nested),
        }
    }

    /// Dotted path relative to the section, e.g. `genitore1.nome`.
    pub fn relative_path(&self) -> String {
        match self.nested {
            Some(nested) => format!("{}.{}", self.key, nested),
            None => self.key.to_string(),
        }
    }
}

/// A member of the troop ("esploratore") as stored in the remote record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "nome", default)]
    pub name: String,
    #[serde(rename = "cognome", default)]
    pub surname: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "staff", default)]
    pub is_staff: bool,
    #[serde(rename = "approvato", default)]
    pub is_approved: bool,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(rename = "lastUpdate", default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    #[serde(rename = "sectionData", default)]
    pub section_data: SectionData,
    /// Any other top-level keys (including superseded flat fields), kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl MemberRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname).trim().to_string()
    }

    /// Staff members that were approved may see and edit everything.
    pub fn is_privileged(&self) -> bool {
        self.is_staff && self.is_approved
    }

    /// Read a field value; `None` when the section, field or nested key is absent.
    pub fn field(&self, section: Section, key: FieldKey) -> Option<&str> {
        let value = self.section_data.section(section)?.get(key.key)?;
        match (value, key.nested) {
            (FieldValue::Text(text), None) => Some(text.as_str()),
            (FieldValue::Group(group), Some(nested)) => group.get(nested)?.as_deref(),
            _ => None,
        }
    }

    /// Set a field value, creating the section or group as needed and
    /// leaving sibling data untouched.
    pub fn set_field(&mut self, section: Section, key: FieldKey, value: String) {
        let fields = self.section_data.section_mut(section);
        match key.nested {
            None => {
                fields.insert(key.key.to_string(), FieldValue::Text(value));
            }
            Some(nested) => {
                let entry = fields
                    .entry(key.key.to_string())
                    .or_insert_with(|| FieldValue::Group(BTreeMap::new()));
                if !matches!(entry, FieldValue::Group(_)) {
                    *entry = FieldValue::Group(BTreeMap::new());
                }
                if let FieldValue::Group(group) = entry {
                    group.insert(nested.to_string(), Some(value));
                }
            }
        }
    }
}

/// Directory entry for the dashboard listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub staff: bool,
    pub approvato: bool,
    pub status: String,
}

impl From<&MemberRecord> for MemberSummary {
    fn from(record: &MemberRecord) -> Self {
        Self {
            id: record.id.clone(),
            full_name: record.full_name(),
            email: record.email.clone(),
            staff: record.is_staff,
            approvato: record.is_approved,
            status: if record.is_approved {
                "Approvato".to_string()
            } else {
                "In attesa".to_string()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mario() -> MemberRecord {
        serde_json::from_value(json!({
            "id": "m1",
            "nome": "Mario",
            "cognome": "Rossi",
            "sectionData": { "medical": { "allergie": "none" } }
        }))
        .unwrap()
    }

    #[test]
    fn test_absent_sections_and_flags_default() {
        let record = mario();
        assert!(record.section_data.personal_info.is_none());
        assert!(!record.is_staff);
        assert!(!record.is_privileged());
        assert_eq!(record.field(Section::Contacts, FieldKey::flat("x")), None);
        assert_eq!(
            record.field(Section::Medical, FieldKey::flat("allergie")),
            Some("none")
        );
    }

    #[test]
    fn test_set_nested_field_keeps_siblings() {
        let mut record = mario();
        record.set_field(
            Section::Contacts,
            FieldKey::nested("genitore1", "nome"),
            "Anna".to_string(),
        );
        record.set_field(
            Section::Contacts,
            FieldKey::nested("genitore1", "email"),
            "anna@example.com".to_string(),
        );

        assert_eq!(
            record.field(Section::Contacts, FieldKey::nested("genitore1", "nome")),
            Some("Anna")
        );
        assert_eq!(
            record.field(Section::Medical, FieldKey::flat("allergie")),
            Some("none")
        );
        assert_eq!(record.name, "Mario");
    }

    #[test]
    fn test_null_and_numeric_fields_read_as_absent() {
        let mut record: MemberRecord = serde_json::from_value(json!({
            "id": "m3",
            "nome": "Sara",
            "sectionData": {
                "medical": { "allergie": null, "peso": 42 },
                "contacts": { "genitore1": { "nome": "Anna", "numero": null } }
            }
        }))
        .unwrap();

        assert_eq!(record.field(Section::Medical, FieldKey::flat("allergie")), None);
        assert_eq!(record.field(Section::Medical, FieldKey::flat("peso")), None);
        assert_eq!(
            record.field(Section::Contacts, FieldKey::nested("genitore1", "nome")),
            Some("Anna")
        );
        assert_eq!(
            record.field(Section::Contacts, FieldKey::nested("genitore1", "numero")),
            None
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["sectionData"]["medical"]["peso"], 42);
        assert!(value["sectionData"]["medical"]["allergie"].is_null());

        record.set_field(Section::Medical, FieldKey::flat("allergie"), "polline".to_string());
        assert_eq!(
            record.field(Section::Medical, FieldKey::flat("allergie")),
            Some("polline")
        );
    }

    #[test]
    fn test_unknown_top_level_keys_survive_round_trip() {
        let record: MemberRecord = serde_json::from_value(json!({
            "id": "m2",
            "nome": "Luca",
            "cognome": "Bianchi",
            "telefono": "333"
        }))
        .unwrap();

        assert_eq!(record.extra.get("telefono"), Some(&json!("333")));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["telefono"], "333");
        assert_eq!(value["nome"], "Luca");
    }

    #[test]
    fn test_summary_status_label() {
        let mut record = mario();
        assert_eq!(MemberSummary::from(&record).status, "In attesa");
        record.is_approved = true;
        let summary = MemberSummary::from(&record);
        assert_eq!(summary.status, "Approvato");
        assert_eq!(summary.full_name, "Mario Rossi");
    }
}
