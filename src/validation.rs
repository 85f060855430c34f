//! Pluggable validation for the pipeline's Validate stage
//!
//! The default run uses [`NoopValidator`]; `ok` on the run result is simply
//! "zero validation errors", so plugging a stricter validator turns the
//! stage into a real gate without touching the orchestrator.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::rows::{field_str, Row};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

/// Validates transformed rows; each returned string is one error
pub trait RowValidator {
    fn name(&self) -> &'static str;
    fn validate(&self, rows: &[Row]) -> Vec<String>;
}

/// Default validator: accepts everything
#[derive(Default)]
pub struct NoopValidator;

impl RowValidator for NoopValidator {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn validate(&self, _rows: &[Row]) -> Vec<String> {
        Vec::new()
    }
}

/// Flags rows whose email column is present but not a plausible address
pub struct EmailFormatValidator {
    column: String,
}

impl EmailFormatValidator {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl RowValidator for EmailFormatValidator {
    fn name(&self) -> &'static str {
        "email-format"
    }

    fn validate(&self, rows: &[Row]) -> Vec<String> {
        let mut errors = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let Some(email) = field_str(row, &self.column).map(str::trim) else {
                continue;
            };
            if email.is_empty() {
                continue;
            }
            if !EMAIL_RE.is_match(email) {
                errors.push(format!(
                    "row {}: '{}' is not a valid email address",
                    index + 1,
                    email
                ));
            }
        }
        errors
    }
}
