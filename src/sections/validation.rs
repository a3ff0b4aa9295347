//! Per-field validation rules.

use regex::Regex;

use crate::errors::AppError;

/// A single declared constraint on a field value.
#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    MinLength(usize),
    Pattern { regex: Regex, message: &'static str },
}

impl Rule {
    /// Compile a pattern rule from a literal expression.
    pub fn pattern(expr: &'static str, message: &'static str) -> Self {
        let regex = Regex::new(expr)
            .unwrap_or_else(|error| panic!("field pattern {expr:?} failed to compile: {error}"));
        Rule::Pattern { regex, message }
    }
}

/// Check `value` against every rule. Empty values only fail `Required`;
/// an optional field can always be cleared.
pub fn validate(field: &str, rules: &[Rule], value: &str) -> Result<(), AppError> {
    let trimmed = value.trim();
    let fail = |message: String| AppError::Validation {
        field: field.to_string(),
        message,
    };

    if trimmed.is_empty() {
        if rules.iter().any(|r| matches!(r, Rule::Required)) {
            return Err(fail("Campo obbligatorio".to_string()));
        }
        return Ok(());
    }

    for rule in rules {
        match rule {
            Rule::Required => {}
            Rule::MinLength(min) => {
                if trimmed.chars().count() < *min {
                    return Err(fail(format!("Minimo {} caratteri", min)));
                }
            }
            Rule::Pattern { regex, message } => {
                if !regex.is_match(trimmed) {
                    return Err(fail((*message).to_string()));
                }
            }
        }
    }

    Ok(())
}

pub const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";
pub const PHONE_PATTERN: &str = r"^\+?[0-9 ]{6,15}$";
