//! Section registry for the member-detail view.
//!
//! Each section maps to its template, its editable fields and their
//! validators. A field id resolves to an explicit location in the record;
//! nothing is inferred from the identifier's spelling.

mod render;
mod templates;
mod validation;

pub use render::*;
pub use templates::*;
pub use validation::*;

use crate::errors::AppError;
use crate::models::{FieldKey, Section};

/// An editable field of a section.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Identifier used by the views (`genitore1Email`)
    pub id: &'static str,
    pub label: &'static str,
    pub key: FieldKey,
    pub rules: Vec<Rule>,
}

impl FieldSpec {
    fn new(id: &'static str, label: &'static str, key: FieldKey) -> Self {
        Self {
            id,
            label,
            key,
            rules: Vec::new(),
        }
    }

    fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Full dotted path in the remote document, e.g. `sectionData.medical.allergie`.
    pub fn remote_path(&self, section: Section) -> String {
        format!("sectionData.{}.{}", section.as_str(), self.key.relative_path())
    }

    pub fn validate(&self, value: &str) -> Result<(), AppError> {
        validate(self.id, &self.rules, value)
    }
}

/// Template name and fields of one section.
#[derive(Debug, Clone)]
pub struct SectionSpec {
    pub section: Section,
    /// Base name of the markup file (`anagrafici` -> `anagrafici.html`)
    pub template: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl SectionSpec {
    pub fn field(&self, id: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.id == id)
    }
}

/// Lookup table from section to its fields and template.
#[derive(Debug, Clone)]
pub struct SectionRegistry {
    sections: Vec<SectionSpec>,
}

impl SectionRegistry {
    pub fn new(sections: Vec<SectionSpec>) -> Self {
        Self { sections }
    }

    /// The four sections of the esploratori profile.
    pub fn standard() -> Self {
        Self::new(vec![
            personal_info_section(),
            contacts_section(),
            medical_section(),
            progression_section(),
        ])
    }

    pub fn get(&self, section: Section) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.section == section)
    }

    /// Resolve a field of a section, or fail with not-found.
    pub fn field(&self, section: Section, field_id: &str) -> Result<&FieldSpec, AppError> {
        self.get(section)
            .and_then(|spec| spec.field(field_id))
            .ok_or_else(|| {
                AppError::NotFound(format!("Field {} not found in section {}", field_id, section))
            })
    }
}

fn personal_info_section() -> SectionSpec {
    SectionSpec {
        section: Section::PersonalInfo,
        template: "anagrafici",
        fields: vec![
            FieldSpec::new("dataNascita", "Data di nascita", FieldKey::flat("dataNascita"))
                .rule(Rule::pattern(r"^\d{4}-\d{2}-\d{2}$", "Data non valida (AAAA-MM-GG)")),
            FieldSpec::new("codiceFiscale", "Codice fiscale", FieldKey::flat("codiceFiscale"))
                .rule(Rule::pattern(r"^[A-Za-z0-9]{16}$", "Codice fiscale non valido")),
            FieldSpec::new("indirizzo", "Indirizzo", FieldKey::flat("indirizzo"))
                .rule(Rule::MinLength(5)),
            FieldSpec::new("telefono", "Telefono", FieldKey::flat("telefono"))
                .rule(Rule::pattern(PHONE_PATTERN, "Numero di telefono non valido")),
        ],
    }
}

fn parent_fields(
    ids: [&'static str; 3],
    group: &'static str,
    label: &'static str,
    required: bool,
) -> Vec<FieldSpec> {
    let [nome, email, numero] = ids;
    let mut name = FieldSpec::new(nome, label, FieldKey::nested(group, "nome"));
    if required {
        name = name.rule(Rule::Required);
    }
    vec![
        name.rule(Rule::MinLength(2)),
        FieldSpec::new(email, "Email", FieldKey::nested(group, "email"))
            .rule(Rule::pattern(EMAIL_PATTERN, "Email non valida")),
        FieldSpec::new(numero, "Numero", FieldKey::nested(group, "numero"))
            .rule(Rule::pattern(PHONE_PATTERN, "Numero di telefono non valido")),
    ]
}

fn contacts_section() -> SectionSpec {
    let mut fields = parent_fields(
        ["genitore1Nome", "genitore1Email", "genitore1Numero"],
        "genitore1",
        "Genitore 1",
        true,
    );
    fields.extend(parent_fields(
        ["genitore2Nome", "genitore2Email", "genitore2Numero"],
        "genitore2",
        "Genitore 2",
        false,
    ));
    SectionSpec {
        section: Section::Contacts,
        template: "contatti",
        fields,
    }
}

fn medical_section() -> SectionSpec {
    SectionSpec {
        section: Section::Medical,
        template: "sanitarie",
        fields: vec![
            FieldSpec::new("gruppoSanguigno", "Gruppo sanguigno", FieldKey::flat("gruppoSanguigno"))
                .rule(Rule::pattern(r"^(0|A|B|AB)[+-]$", "Gruppo sanguigno non valido")),
            FieldSpec::new("intolleranze", "Intolleranze", FieldKey::flat("intolleranze")),
            FieldSpec::new("allergie", "Allergie", FieldKey::flat("allergie")),
            FieldSpec::new("farmaci", "Farmaci", FieldKey::flat("farmaci")),
        ],
    }
}

fn progression_section() -> SectionSpec {
    SectionSpec {
        section: Section::Progression,
        template: "progressione",
        fields: vec![
            FieldSpec::new("promessa", "Promessa", FieldKey::flat("promessa")),
            FieldSpec::new("brevetto", "Brevetto", FieldKey::flat("brevetto")),
            FieldSpec::new("specialita", "Specialità", FieldKey::flat("specialita")),
            FieldSpec::new("corda", "Corda", FieldKey::flat("corda")),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_section_is_registered() {
        let registry = SectionRegistry::standard();
        for section in Section::ALL {
            assert!(registry.get(section).is_some(), "missing {}", section);
        }
    }

    #[test]
    fn test_field_paths_are_declared_not_inferred() {
        let registry = SectionRegistry::standard();

        let allergie = registry.field(Section::Medical, "allergie").unwrap();
        assert_eq!(allergie.remote_path(Section::Medical), "sectionData.medical.allergie");

        let email = registry.field(Section::Contacts, "genitore2Email").unwrap();
        assert_eq!(
            email.remote_path(Section::Contacts),
            "sectionData.contacts.genitore2.email"
        );

        let cf = registry.field(Section::PersonalInfo, "codiceFiscale").unwrap();
        assert_eq!(
            cf.remote_path(Section::PersonalInfo),
            "sectionData.personalInfo.codiceFiscale"
        );
    }

    #[test]
    fn test_unknown_field_is_not_found() {
        let registry = SectionRegistry::standard();
        assert!(matches!(
            registry.field(Section::Medical, "genitore1Nome"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_blood_group_rule() {
        let registry = SectionRegistry::standard();
        let field = registry.field(Section::Medical, "gruppoSanguigno").unwrap();
        assert!(field.validate("AB+").is_ok());
        assert!(field.validate("C+").is_err());
    }
}
