//! Credential lookup for directory service connections
//!
//! A connection resolves to an optional `(realm, principal, secret)` triple.
//! `None` means the run relies on ambient/implicit authentication from the
//! calling environment. Secrets are zeroed on drop and never logged in
//! cleartext; debug output reports the secret length only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Keyring error: {0}")]
    Keyring(String),
    #[error("Stored credential is malformed: {0}")]
    Malformed(String),
}

/// String wrapper that zeroes its contents on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureString {
    value: String,
}

impl SecureString {
    pub fn new(value: String) -> Self {
        Self { value }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString({} bytes)", self.value.len())
    }
}

/// Authentication triple for one directory service connection
#[derive(Debug, Clone)]
pub struct Credential {
    pub realm: String,
    pub principal: String,
    secret: SecureString,
}

impl Credential {
    pub fn new(
        realm: impl Into<String>,
        principal: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            realm: realm.into(),
            principal: principal.into(),
            secret: SecureString::new(secret.into()),
        }
    }

    pub fn secret(&self) -> &str {
        self.secret.as_str()
    }

    /// Login name sent during the challenge handshake: `realm\principal`,
    /// or just the principal when the realm is empty.
    pub fn login_name(&self) -> String {
        if self.realm.is_empty() {
            self.principal.clone()
        } else {
            format!("{}\\{}", self.realm, self.principal)
        }
    }
}

/// Serialized form stored in the keyring entry secret
#[derive(Serialize, Deserialize)]
struct CredentialRecord {
    realm: String,
    principal: String,
    secret: String,
}

/// Resolves a connection identifier to an optional credential
pub trait CredentialSource {
    /// Returns `None` when the connection should use ambient authentication.
    fn get(&self, connection_id: &str) -> Result<Option<Credential>, CredentialError>;
}

/// Credential source backed by the OS keychain
///
/// Each connection id maps to one keyring entry whose secret holds the
/// credential triple as a JSON document.
pub struct KeyringCredentialSource {
    service: String,
}

impl KeyringCredentialSource {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, connection_id: &str) -> Result<keyring::Entry, CredentialError> {
        keyring::Entry::new(&self.service, connection_id)
            .map_err(|e| CredentialError::Keyring(e.to_string()))
    }

    /// Store a credential for a connection id, replacing any existing entry
    pub fn store(&self, connection_id: &str, credential: &Credential) -> Result<(), CredentialError> {
        let record = CredentialRecord {
            realm: credential.realm.clone(),
            principal: credential.principal.clone(),
            secret: credential.secret().to_string(),
        };
        let mut payload = serde_json::to_string(&record)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        let result = self
            .entry(connection_id)?
            .set_password(&payload)
            .map_err(|e| CredentialError::Keyring(e.to_string()));
        payload.zeroize();
        result
    }

    /// Remove the stored credential for a connection id
    pub fn delete(&self, connection_id: &str) -> Result<(), CredentialError> {
        match self.entry(connection_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Keyring(e.to_string())),
        }
    }
}

impl CredentialSource for KeyringCredentialSource {
    fn get(&self, connection_id: &str) -> Result<Option<Credential>, CredentialError> {
        let mut payload = match self.entry(connection_id)?.get_password() {
            Ok(p) => p,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(CredentialError::Keyring(e.to_string())),
        };
        let record: CredentialRecord = serde_json::from_str(&payload)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        payload.zeroize();
        tracing::debug!(
            connection_id,
            secret_len = record.secret.len(),
            "credential loaded from keyring"
        );
        Ok(Some(Credential::new(
            record.realm,
            record.principal,
            record.secret,
        )))
    }
}

/// In-memory credential source for tests and fixed configurations
#[derive(Default)]
pub struct StaticCredentialSource {
    entries: HashMap<String, Credential>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, connection_id: impl Into<String>, credential: Credential) -> Self {
        self.entries.insert(connection_id.into(), credential);
        self
    }
}

impl CredentialSource for StaticCredentialSource {
    fn get(&self, connection_id: &str) -> Result<Option<Credential>, CredentialError> {
        Ok(self.entries.get(connection_id).cloned())
    }
}
