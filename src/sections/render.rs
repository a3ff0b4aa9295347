//! Turning a member record into what a section view displays.

use chrono::NaiveDate;
use serde::Serialize;

use super::SectionSpec;
use crate::models::{MemberRecord, Section};

/// Shown for any field without a value.
pub const PLACEHOLDER: &str = "-";

/// One populated field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub id: String,
    pub label: String,
    /// Human readable value (placeholder when absent)
    pub display: String,
    /// Raw value for the edit control (empty when absent)
    pub value: String,
}

/// A fully populated section, ready for the view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionView {
    pub section: Section,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Whether edit controls are exposed to this viewer
    pub editable: bool,
    pub fields: Vec<FieldView>,
}

/// Populate every field of the section from `record`.
pub fn populate_section(
    spec: &SectionSpec,
    record: &MemberRecord,
    template: Option<String>,
    editable: bool,
) -> SectionView {
    let fields = spec
        .fields
        .iter()
        .map(|field| {
            let value = record
                .field(spec.section, field.key)
                .unwrap_or_default()
                .to_string();
            FieldView {
                id: field.id.to_string(),
                label: field.label.to_string(),
                display: display_value(field.id, &value),
                value,
            }
        })
        .collect();

    SectionView {
        section: spec.section,
        template,
        editable,
        fields,
    }
}

fn display_value(field_id: &str, value: &str) -> String {
    if value.trim().is_empty() {
        return PLACEHOLDER.to_string();
    }
    if field_id == "dataNascita" {
        if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return date.format("%d/%m/%Y").to_string();
        }
    }
    value.to_string()
}
