//! Run settings: company identity, domain keywords, and column mapping
//!
//! Settings live in a YAML file validated at parse time. Column names
//! default to the export format the verification task was built around.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Settings for one verification run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Display name used in the corporate-domain reason; empty falls back
    /// to the generic word "company"
    #[serde(default)]
    pub company_name: String,
    /// Case-insensitive substrings matched against email domains
    #[serde(default)]
    pub email_domain_keywords: Vec<String>,
    /// Column holding the purchasing email
    #[serde(default = "default_email_column")]
    pub email_column: String,
    /// Column holding the subject identifier
    #[serde(default = "default_subject_column")]
    pub subject_column: String,
    /// Column holding the product category
    #[serde(default = "default_category_column")]
    pub category_column: String,
    /// Base URL of the directory service
    #[serde(default)]
    pub service_url: Option<String>,
    /// Connection id looked up in the credential source; absent means
    /// ambient authentication
    #[serde(default)]
    pub connection_id: Option<String>,
}

fn default_email_column() -> String {
    "Email Address".to_string()
}

fn default_subject_column() -> String {
    "User Name".to_string()
}

fn default_category_column() -> String {
    "Product Type".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            company_name: String::new(),
            email_domain_keywords: Vec::new(),
            email_column: default_email_column(),
            subject_column: default_subject_column(),
            category_column: default_category_column(),
            service_url: None,
            connection_id: None,
        }
    }
}

impl Settings {
    /// Parse a YAML settings file from a path
    pub fn from_path(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a YAML settings document from a string
    pub fn parse(yaml: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("email_column", &self.email_column),
            ("subject_column", &self.subject_column),
            ("category_column", &self.category_column),
        ] {
            if value.trim().is_empty() {
                return Err(SettingsError::Validation(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        if let Some(url) = &self.service_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SettingsError::Validation(format!(
                    "service_url must start with http:// or https://, got '{}'",
                    url
                )));
            }
        }

        Ok(())
    }
}

/// Provides settings to the pipeline caller
pub trait SettingsProvider {
    fn get(&self) -> Result<Settings, SettingsError>;
}

/// Settings provider backed by a YAML file, re-read on each call
pub struct FileSettingsProvider {
    path: std::path::PathBuf,
}

impl FileSettingsProvider {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsProvider for FileSettingsProvider {
    fn get(&self) -> Result<Settings, SettingsError> {
        Settings::from_path(&self.path)
    }
}
