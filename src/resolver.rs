//! Directory metadata resolution for a batch of subjects
//!
//! One warm-up GET captures the session cookie, then subjects are fetched in
//! strictly sequential batches of ten with concurrent fan-out inside each
//! batch. A subject whose fetch fails in any way (transport error, non-2xx,
//! wrong content type, unusable body) gets an empty metadata sentinel rather
//! than an error; completeness is enforced later by the coverage gate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::credentials::Credential;
use crate::http::{origin_of, AuthHttpClient, HttpError, HttpRequest, HttpResponse};

/// Subjects fetched concurrently per batch. Batches run in sequence, so this
/// is also the ceiling on in-flight requests against the service.
const BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Invalid service URL: {0}")]
    InvalidBaseUrl(#[from] HttpError),
}

/// Directory metadata for one subject, valid for a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMetadata {
    pub subject_id: String,
    pub canonical_email: String,
    /// De-duplicated, first-seen order
    pub alternate_emails: Vec<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl SubjectMetadata {
    /// Sentinel for a subject the service could not resolve
    pub fn empty(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            canonical_email: String::new(),
            alternate_emails: Vec::new(),
            first_name: None,
            last_name: None,
        }
    }

    /// Whether this entry carries at least one usable email signal
    pub fn has_email_signal(&self) -> bool {
        !self.canonical_email.is_empty() || !self.alternate_emails.is_empty()
    }
}

/// Resolves metadata for subject identifiers against one service base URL
pub struct MetadataResolver {
    http: AuthHttpClient,
}

impl MetadataResolver {
    pub fn new(http: AuthHttpClient) -> Self {
        Self { http }
    }

    /// Resolve metadata for every id in `subject_ids`.
    ///
    /// The returned map contains an entry for every requested id; ids the
    /// service could not resolve map to [`SubjectMetadata::empty`]. The
    /// progress callback fires after each batch with cumulative
    /// `(completed, total)` counts.
    pub async fn resolve<F>(
        &self,
        subject_ids: &[String],
        base_url: &str,
        credential: Option<Credential>,
        mut on_progress: F,
    ) -> Result<HashMap<String, SubjectMetadata>, ResolveError>
    where
        F: FnMut(usize, usize),
    {
        let base_url = base_url.trim_end_matches('/').to_string();
        let origin = origin_of(&base_url)?;
        if let Some(credential) = credential {
            self.http.session().register(origin, credential);
        }

        let cookie = self.warm_up(&base_url).await;

        let total = subject_ids.len();
        let mut resolved = HashMap::with_capacity(total);
        let mut completed = 0;

        for batch in subject_ids.chunks(BATCH_SIZE) {
            let fetches = batch
                .iter()
                .map(|id| self.fetch_subject(&base_url, id, cookie.as_deref()));
            for metadata in futures::future::join_all(fetches).await {
                resolved.insert(metadata.subject_id.clone(), metadata);
            }
            completed += batch.len();
            tracing::debug!(completed, total, "metadata batch finished");
            on_progress(completed, total);
        }

        Ok(resolved)
    }

    /// Warm-up GET against the base URL; failure is absorbed (no cookie).
    async fn warm_up(&self, base_url: &str) -> Option<String> {
        match self.http.execute(&HttpRequest::get(base_url)).await {
            Ok(response) => {
                let cookie = cookie_header(&response);
                tracing::debug!(
                    status = response.status,
                    got_cookie = cookie.is_some(),
                    "session warm-up complete"
                );
                cookie
            }
            Err(e) => {
                tracing::warn!("session warm-up failed, continuing without cookie: {}", e);
                None
            }
        }
    }

    async fn fetch_subject(
        &self,
        base_url: &str,
        subject_id: &str,
        cookie: Option<&str>,
    ) -> SubjectMetadata {
        let encoded: String = url::form_urlencoded::byte_serialize(subject_id.as_bytes()).collect();
        let mut request = HttpRequest::post(
            format!("{}/SiteUser/GetUser/", base_url),
            format!("idGuid={}", encoded),
        )
        .header(
            "Content-Type",
            "application/x-www-form-urlencoded; charset=UTF-8",
        )
        .header("Accept", "application/json, */*");
        if let Some(cookie) = cookie {
            request = request.header("Cookie", cookie).header("Referer", base_url);
        }

        match self.http.execute(&request).await {
            Ok(response) => parse_metadata(subject_id, &response),
            Err(e) => {
                tracing::debug!(subject_id, "metadata fetch failed: {}", e);
                SubjectMetadata::empty(subject_id)
            }
        }
    }
}

/// Build a `Cookie` header from the warm-up response: the `name=value` pair
/// before the first `;` of each `set-cookie` directive, joined with `; `.
pub(crate) fn cookie_header(response: &HttpResponse) -> Option<String> {
    let pairs: Vec<&str> = response
        .header_values("set-cookie")
        .into_iter()
        .map(|directive| directive.split(';').next().unwrap_or(directive).trim())
        .filter(|pair| !pair.is_empty())
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

/// Parse one directory response into metadata. Any shortcoming collapses to
/// the empty sentinel keyed by the caller-supplied id, never the server's.
pub(crate) fn parse_metadata(subject_id: &str, response: &HttpResponse) -> SubjectMetadata {
    if !response.is_success() {
        return SubjectMetadata::empty(subject_id);
    }
    let json_content = response
        .header("content-type")
        .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
        .unwrap_or(false);
    if !json_content {
        return SubjectMetadata::empty(subject_id);
    }
    let body: serde_json::Value = match serde_json::from_str(&response.body_text) {
        Ok(body) => body,
        Err(_) => return SubjectMetadata::empty(subject_id),
    };
    if !is_truthy(body.get("UserId")) {
        return SubjectMetadata::empty(subject_id);
    }

    let canonical_email = body
        .get("Email")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or("")
        .to_string();

    let mut alternate_emails = Vec::new();
    if !canonical_email.is_empty() {
        alternate_emails.push(canonical_email.clone());
    }
    if let Some(fields) = body.as_object() {
        for (name, value) in fields {
            if !name.to_ascii_lowercase().contains("email") {
                continue;
            }
            let Some(candidate) = value.as_str().map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            if !alternate_emails.iter().any(|e| e == candidate) {
                alternate_emails.push(candidate.to_string());
            }
        }
    }

    SubjectMetadata {
        subject_id: subject_id.to_string(),
        canonical_email,
        alternate_emails,
        first_name: name_field(&body, "FirstName"),
        last_name: name_field(&body, "LastName"),
    }
}

fn name_field(body: &serde_json::Value, field: &str) -> Option<String> {
    body.get(field)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn is_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Null) | None => false,
        Some(_) => true,
    }
}
