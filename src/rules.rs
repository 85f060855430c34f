//! Ordered verification rules
//!
//! Exactly one rule (or the default) fires per row: rules run in fixed
//! priority order and evaluation short-circuits on the first non-null
//! reason. Rules 1 and 2 need resolved metadata for the row's subject;
//! rules 3 and 4 work from the row and settings alone.

use serde::{Deserialize, Serialize};

use crate::resolver::SubjectMetadata;
use crate::rows::{field_str, Row};

/// Reason attached when no rule fires
pub const DEFAULT_REASON: &str = "No verification rule matched";

/// Verification outcome, serialized as the output column value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "Y")]
    Verified,
    #[serde(rename = "N")]
    Unverified,
}

impl Decision {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Verified => "Y",
            Self::Unverified => "N",
        }
    }
}

/// Everything a rule may consult besides the row itself
pub struct RuleContext<'a> {
    /// Resolved metadata for the row's subject, when available
    pub metadata: Option<&'a SubjectMetadata>,
    pub domain_keywords: &'a [String],
    pub company_name: &'a str,
    pub email_column: &'a str,
    pub category_column: &'a str,
}

/// A stateless rule; returns the reason when it fires
pub struct DecisionRule {
    pub priority: u8,
    pub name: &'static str,
    pub eval: fn(&Row, &RuleContext) -> Option<String>,
}

/// The fixed rule set, highest priority first
pub const RULES: &[DecisionRule] = &[
    DecisionRule {
        priority: 1,
        name: "exact-email-match",
        eval: exact_email_match,
    },
    DecisionRule {
        priority: 2,
        name: "name-derived-match",
        eval: name_derived_match,
    },
    DecisionRule {
        priority: 3,
        name: "corporate-domain-match",
        eval: corporate_domain_match,
    },
    DecisionRule {
        priority: 4,
        name: "category-fallback",
        eval: category_fallback,
    },
];

/// Classify one row. First matching rule wins; later rules are never
/// evaluated once one fires.
pub fn evaluate(row: &Row, ctx: &RuleContext) -> (Decision, String) {
    for rule in RULES {
        if let Some(reason) = (rule.eval)(row, ctx) {
            tracing::trace!(rule = rule.name, priority = rule.priority, "rule fired");
            return (Decision::Verified, reason);
        }
    }
    (Decision::Unverified, DEFAULT_REASON.to_string())
}

/// Trimmed + lower-cased, `None` when blank
fn normalized(raw: &str) -> Option<String> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn row_email(row: &Row, ctx: &RuleContext) -> Option<String> {
    normalized(field_str(row, ctx.email_column)?)
}

/// Rule 1: the row email equals the canonical email, or is a member of the
/// alternate set when alternates exist.
fn exact_email_match(row: &Row, ctx: &RuleContext) -> Option<String> {
    let metadata = ctx.metadata?;
    let email = row_email(row, ctx)?;

    let matched = if !metadata.alternate_emails.is_empty() {
        metadata
            .alternate_emails
            .iter()
            .any(|alt| alt.trim().to_lowercase() == email)
    } else {
        normalized(&metadata.canonical_email)
            .map(|canonical| canonical == email)
            .unwrap_or(false)
    };

    if matched {
        Some("Email matches user metadata".to_string())
    } else {
        None
    }
}

/// Tokens of an email local part, lower-cased. Each separator is applied
/// independently to the whole local part, never compounded: splitting
/// `a-b_c` by `_` contributes `a-b` and `c`, not `a`, `b`, `c`.
fn email_name_tokens(local: &str) -> Vec<String> {
    let local = local.to_lowercase();
    let mut tokens: Vec<String> = Vec::new();
    for separator in ['.', '_', '-', '+'] {
        for piece in local.split(separator) {
            if !piece.is_empty() && !tokens.iter().any(|t| t == piece) {
                tokens.push(piece.to_string());
            }
        }
    }
    tokens
}

fn token_hit(name: &str, tokens: &[String]) -> bool {
    tokens.iter().any(|token| token.contains(name))
}

/// A name matches when it equals a token, is a substring of a token, or -
/// for names containing whitespace - any individual word of it does.
fn name_matches(raw_name: &str, tokens: &[String]) -> bool {
    let Some(name) = normalized(raw_name) else {
        return false;
    };
    if token_hit(&name, tokens) {
        return true;
    }
    if name.contains(char::is_whitespace) {
        return name.split_whitespace().any(|word| token_hit(word, tokens));
    }
    false
}

/// Rule 2: the email local part carries the subject's first or last name.
fn name_derived_match(row: &Row, ctx: &RuleContext) -> Option<String> {
    let metadata = ctx.metadata?;
    let email = row_email(row, ctx)?;
    let local = email.split('@').next().unwrap_or("");
    let tokens = email_name_tokens(local);
    if tokens.is_empty() {
        return None;
    }

    let first = metadata.first_name.as_deref().unwrap_or("");
    let last = metadata.last_name.as_deref().unwrap_or("");
    if name_matches(first, &tokens) || name_matches(last, &tokens) {
        let display = format!("{} {}", first.trim(), last.trim());
        Some(format!("Email contains user name ({})", display.trim()))
    } else {
        None
    }
}

/// Rule 3: a configured keyword appears in the email's domain part.
fn corporate_domain_match(row: &Row, ctx: &RuleContext) -> Option<String> {
    let email = row_email(row, ctx)?;
    let (_, domain) = email.split_once('@')?;
    if domain.is_empty() {
        return None;
    }

    let hit = ctx.domain_keywords.iter().any(|keyword| {
        let keyword = keyword.trim().to_lowercase();
        !keyword.is_empty() && domain.contains(&keyword)
    });
    if hit {
        let company = match ctx.company_name.trim() {
            "" => "company",
            name => name,
        };
        Some(format!("Email is under {} domain", company))
    } else {
        None
    }
}

/// Rule 4: the row's category field is exactly "social good".
fn category_fallback(row: &Row, ctx: &RuleContext) -> Option<String> {
    let category = field_str(row, ctx.category_column)?;
    if category.trim().to_lowercase() == "social good" {
        Some("Product type is Social Good".to_string())
    } else {
        None
    }
}
