//! Authenticated HTTP execution against one directory service origin
//!
//! Handles the challenge/response handshake explicitly: when the server
//! answers 401/403 and a credential is registered for the request's origin,
//! the request is retried exactly once with a `realm\principal` Basic
//! authorization header. A second challenge is propagated unchanged, which
//! guards against infinite challenge loops. The attempt state is scoped per
//! request, not per origin.
//!
//! Non-2xx statuses are normal responses here; only transport-level failures
//! (DNS, connect, timeout) surface as errors.

use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use zeroize::Zeroize;

use crate::credentials::Credential;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Client setup error: {0}")]
    Client(String),
}

/// Scheme + host + port of a URL, the unit credentials are scoped to
pub fn origin_of(raw: &str) -> Result<String, HttpError> {
    let parsed = Url::parse(raw).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| HttpError::InvalidUrl(format!("URL has no host: {}", raw)))?;
    match parsed.port_or_known_default() {
        Some(port) => Ok(format!("{}://{}:{}", parsed.scheme(), host, port)),
        None => Ok(format!("{}://{}", parsed.scheme(), host)),
    }
}

/// Per-request authentication attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAttempt {
    NotAttempted,
    CredentialsSupplied,
    Exhausted,
}

/// What to do after inspecting a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    /// Retry the request once with credentials attached
    SupplyCredentials,
    /// Return the response to the caller as-is
    Propagate,
}

/// Synchronous decision function for the challenge handshake.
///
/// Transitions: `NotAttempted -> CredentialsSupplied` on the first challenge
/// when a credential exists, `CredentialsSupplied -> Exhausted` on a repeated
/// challenge. Every other response propagates.
pub fn next_auth_action(
    state: AuthAttempt,
    has_credential: bool,
    challenged: bool,
) -> (AuthAttempt, AuthAction) {
    if !challenged {
        return (state, AuthAction::Propagate);
    }
    match state {
        AuthAttempt::NotAttempted if has_credential => {
            (AuthAttempt::CredentialsSupplied, AuthAction::SupplyCredentials)
        }
        AuthAttempt::CredentialsSupplied => (AuthAttempt::Exhausted, AuthAction::Propagate),
        _ => (state, AuthAction::Propagate),
    }
}

/// Origin-keyed credential map shared across one resolver invocation
///
/// Replaces the process-wide pending-auth registry of the original tool with
/// an explicit context object, so parallel runs cannot observe each other's
/// credentials.
#[derive(Default)]
pub struct SessionContext {
    credentials: Mutex<HashMap<String, Credential>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, origin: impl Into<String>, credential: Credential) {
        self.credentials.lock().insert(origin.into(), credential);
    }

    pub fn credential_for(&self, origin: &str) -> Option<Credential> {
        self.credentials.lock().get(origin).cloned()
    }
}

/// Request description accepted by [`AuthHttpClient::execute`]
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response with lower-cased header names; duplicates are preserved so
/// multi-valued headers like `set-cookie` stay intact.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body_text: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header, by lower-cased name
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, by lower-cased name
    pub fn header_values<'a>(&'a self, name: &str) -> Vec<&'a str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// HTTP client participating in the origin-scoped challenge handshake
pub struct AuthHttpClient {
    client: Client,
    session: Arc<SessionContext>,
    /// When no credential is registered the request proceeds anyway and the
    /// transport collaborator is responsible for platform identity.
    use_ambient_auth: bool,
}

impl AuthHttpClient {
    /// Create a client with a fresh session context.
    ///
    /// `timeout` is deliberately optional: the observed service enforces
    /// none, so callers that want parity pass `None` and a hung request
    /// blocks its batch.
    pub fn new(timeout: Option<Duration>) -> Result<Self, HttpError> {
        Self::with_session(Arc::new(SessionContext::new()), timeout)
    }

    pub fn with_session(
        session: Arc<SessionContext>,
        timeout: Option<Duration>,
    ) -> Result<Self, HttpError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| HttpError::Client(e.to_string()))?;
        Ok(Self {
            client,
            session,
            use_ambient_auth: true,
        })
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Disable the ambient-identity fallback. Requests without a registered
    /// credential then go out with no authentication at all.
    pub fn without_ambient_auth(mut self) -> Self {
        self.use_ambient_auth = false;
        self
    }

    /// Execute one request, handling at most one credential retry.
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
        let origin = origin_of(&request.url)?;
        let credential = self.session.credential_for(&origin);
        if credential.is_none() && !self.use_ambient_auth {
            tracing::debug!(origin = %origin, "no credential registered and ambient auth disabled");
        }

        let mut state = AuthAttempt::NotAttempted;
        loop {
            let mut builder = self.client.request(method.clone(), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }
            if state == AuthAttempt::CredentialsSupplied {
                if let Some(cred) = &credential {
                    builder = builder.header(reqwest::header::AUTHORIZATION, basic_auth_header(cred));
                }
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let challenged = matches!(status, 401 | 403);
            let (next, action) = next_auth_action(state, credential.is_some(), challenged);
            state = next;

            match action {
                AuthAction::SupplyCredentials => {
                    tracing::debug!(origin = %origin, status, "challenge received, retrying with credentials");
                    continue;
                }
                AuthAction::Propagate => {
                    let status_text = response
                        .status()
                        .canonical_reason()
                        .unwrap_or("")
                        .to_string();
                    let headers = lowercase_headers(response.headers());
                    let body_text = response.text().await?;
                    tracing::debug!(
                        origin = %origin,
                        status,
                        bytes = body_text.len(),
                        "response received"
                    );
                    return Ok(HttpResponse {
                        status,
                        status_text,
                        headers,
                        body_text,
                    });
                }
            }
        }
    }
}

fn lowercase_headers(map: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(map.len());
    for (name, value) in map.iter() {
        if let Ok(value) = value.to_str() {
            headers.push((name.as_str().to_ascii_lowercase(), value.to_string()));
        }
    }
    headers
}

/// Basic authorization header from the credential triple.
/// The intermediate `login:secret` string is zeroed after encoding.
fn basic_auth_header(credential: &Credential) -> String {
    let mut raw = format!("{}:{}", credential.login_name(), credential.secret());
    let header = format!("Basic {}", general_purpose::STANDARD.encode(&raw));
    raw.zeroize();
    header
}
