//! All-or-nothing coverage gate
//!
//! Before any output is written, every requested subject must carry at least
//! one usable email signal. The policy is fail-closed: under-verification is
//! worse than a delayed run, so partial output is never produced. A failed
//! gate yields a plain-text diagnostic the caller renders verbatim.

use serde::Serialize;
use std::collections::HashMap;

use crate::resolver::SubjectMetadata;

/// Produced only when the gate fails
#[derive(Debug, Clone, Serialize)]
pub struct CoverageDiagnostic {
    pub total_ids: usize,
    pub resolved: usize,
    pub missing: usize,
    pub missing_ids: Vec<String>,
}

impl CoverageDiagnostic {
    /// Diagnostic artifact body: counts, a blank line, one missing id per line
    pub fn render(&self) -> String {
        let mut text = String::new();
        text.push_str(&format!("Total subjects: {}\n", self.total_ids));
        text.push_str(&format!("Resolved: {}\n", self.resolved));
        text.push_str(&format!("Missing: {}\n\n", self.missing));
        for id in &self.missing_ids {
            text.push_str(id);
            text.push('\n');
        }
        text
    }
}

pub struct CoverageGate;

impl CoverageGate {
    /// Check that every id resolved to a non-empty canonical email or a
    /// non-empty alternate set. Missing ids keep their request order.
    pub fn check(
        subject_ids: &[String],
        metadata: &HashMap<String, SubjectMetadata>,
    ) -> Result<(), CoverageDiagnostic> {
        let missing_ids: Vec<String> = subject_ids
            .iter()
            .filter(|id| {
                metadata
                    .get(*id)
                    .map(|m| !m.has_email_signal())
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if missing_ids.is_empty() {
            return Ok(());
        }

        let missing = missing_ids.len();
        tracing::warn!(
            total = subject_ids.len(),
            missing,
            "coverage gate failed, withholding output"
        );
        Err(CoverageDiagnostic {
            total_ids: subject_ids.len(),
            resolved: subject_ids.len() - missing,
            missing,
            missing_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_with(email: &str) -> SubjectMetadata {
        let mut m = SubjectMetadata::empty("x");
        m.canonical_email = email.to_string();
        m
    }

    #[test]
    fn test_gate_passes_with_full_coverage() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let mut map = HashMap::new();
        map.insert("a".to_string(), metadata_with("a@x.com"));
        let mut alt_only = SubjectMetadata::empty("b");
        alt_only.alternate_emails.push("b@alt.com".to_string());
        map.insert("b".to_string(), alt_only);

        assert!(CoverageGate::check(&ids, &map).is_ok());
    }

    #[test]
    fn test_gate_fails_on_empty_sentinel() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut map = HashMap::new();
        map.insert("a".to_string(), metadata_with("a@x.com"));
        map.insert("b".to_string(), SubjectMetadata::empty("b"));
        // "c" absent from the map entirely

        let diagnostic = CoverageGate::check(&ids, &map).unwrap_err();
        assert_eq!(diagnostic.total_ids, 3);
        assert_eq!(diagnostic.resolved, 1);
        assert_eq!(diagnostic.missing, 2);
        assert_eq!(diagnostic.missing_ids, vec!["b", "c"]);
    }

    #[test]
    fn test_render_lists_counts_then_ids() {
        let diagnostic = CoverageDiagnostic {
            total_ids: 3,
            resolved: 1,
            missing: 2,
            missing_ids: vec!["b".to_string(), "c".to_string()],
        };
        assert_eq!(
            diagnostic.render(),
            "Total subjects: 3\nResolved: 1\nMissing: 2\n\nb\nc\n"
        );
    }
}
