//! Common test utilities for veriflow integration tests
//!
//! Provides a tempdir-backed test context plus a minimal in-process HTTP
//! directory service for exercising warm-up cookies, batching, and the
//! authentication challenge handshake without external network access.

use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use veriflow::rows::Row;
use veriflow::settings::Settings;

/// Test context holding temporary resources
#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn artifact_dir(&self, name: &str) -> std::path::PathBuf {
        self.temp_dir.path().join(name)
    }
}

/// Settings matching the default export format with MyCo as the company
#[allow(dead_code)]
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.company_name = "MyCo".to_string();
    settings.email_domain_keywords = vec!["mycompany".to_string()];
    settings
}

/// Build a row in the default column layout
#[allow(dead_code)]
pub fn order_row(email: &str, subject: &str, category: &str) -> Row {
    let mut row = Row::new();
    row.insert("Email Address".to_string(), json!(email));
    row.insert("User Name".to_string(), json!(subject));
    row.insert("Product Type".to_string(), json!(category));
    row
}

/// Directory response body for a known user
#[allow(dead_code)]
pub fn directory_user(email: &str, first: &str, last: &str) -> serde_json::Value {
    json!({
        "UserId": format!("srv-{}", first.to_lowercase()),
        "Email": email,
        "FirstName": first,
        "LastName": last,
    })
}

/// One request observed by the mock server
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct RequestRecord {
    pub method: String,
    pub path: String,
    pub cookie: Option<String>,
    pub authorization: Option<String>,
    pub referer: Option<String>,
    pub body: String,
}

#[allow(dead_code)]
pub struct ServerState {
    users: Mutex<HashMap<String, serde_json::Value>>,
    require_auth: bool,
    always_challenge: bool,
    drop_get: bool,
    log: Mutex<Vec<RequestRecord>>,
}

/// Minimal HTTP/1.1 directory service bound to an ephemeral local port.
/// `GET /` answers with session cookies; `POST /SiteUser/GetUser/` answers
/// with the configured user document or `{"UserId": null}` for unknown ids.
#[allow(dead_code)]
pub struct MockDirectoryServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
}

#[allow(dead_code)]
impl MockDirectoryServer {
    pub async fn start(users: HashMap<String, serde_json::Value>) -> Self {
        Self::start_inner(users, false, false, false).await
    }

    /// `require_auth`: challenge any request lacking an Authorization header.
    /// `always_challenge`: challenge every request, even authenticated ones.
    pub async fn start_with_auth(
        users: HashMap<String, serde_json::Value>,
        require_auth: bool,
        always_challenge: bool,
    ) -> Self {
        Self::start_inner(users, require_auth, always_challenge, false).await
    }

    /// Close `GET` connections without answering, simulating a broken
    /// warm-up endpoint while the fetch endpoint keeps working.
    pub async fn start_dropping_get(users: HashMap<String, serde_json::Value>) -> Self {
        Self::start_inner(users, false, false, true).await
    }

    async fn start_inner(
        users: HashMap<String, serde_json::Value>,
        require_auth: bool,
        always_challenge: bool,
        drop_get: bool,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(ServerState {
            users: Mutex::new(users),
            require_auth,
            always_challenge,
            drop_get,
            log: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                tokio::spawn(handle_connection(stream, state));
            }
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn fetch_requests(&self) -> Vec<RequestRecord> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == "/SiteUser/GetUser/")
            .collect()
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut content_length = 0usize;
    let mut cookie = None;
    let mut authorization = None;
    let mut referer = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.parse().unwrap_or(0),
            "cookie" => cookie = Some(value),
            "authorization" => authorization = Some(value),
            "referer" => referer = Some(value),
            _ => {}
        }
    }

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let body_end = (body_start + content_length).min(buf.len());
    let body = String::from_utf8_lossy(&buf[body_start..body_end]).to_string();

    state.log.lock().unwrap().push(RequestRecord {
        method: method.clone(),
        path: path.clone(),
        cookie,
        authorization: authorization.clone(),
        referer,
        body: body.clone(),
    });

    if state.drop_get && method == "GET" {
        let _ = stream.shutdown().await;
        return;
    }

    let response = route(&state, &method, &path, authorization.as_deref(), &body);
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn route(
    state: &ServerState,
    method: &str,
    path: &str,
    authorization: Option<&str>,
    body: &str,
) -> String {
    let challenged = state.always_challenge || (state.require_auth && authorization.is_none());
    if challenged {
        return http_response(
            401,
            "Unauthorized",
            &[("WWW-Authenticate", "Basic realm=\"corp\"")],
            "text/plain",
            "denied",
        );
    }

    if method == "GET" {
        return http_response(
            200,
            "OK",
            &[
                ("Set-Cookie", "ASP.NET_SessionId=abc123; path=/; HttpOnly"),
                ("Set-Cookie", "srvid=node7"),
            ],
            "text/html",
            "<html>ok</html>",
        );
    }

    if method == "POST" && path == "/SiteUser/GetUser/" {
        let id = url::form_urlencoded::parse(body.as_bytes())
            .find(|(name, _)| name == "idGuid")
            .map(|(_, value)| value.to_string())
            .unwrap_or_default();
        let payload = state
            .users
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| json!({ "UserId": null }));
        return http_response(
            200,
            "OK",
            &[],
            "application/json; charset=utf-8",
            &payload.to_string(),
        );
    }

    http_response(404, "Not Found", &[], "text/plain", "not found")
}

fn http_response(
    status: u16,
    status_text: &str,
    extra_headers: &[(&str, &str)],
    content_type: &str,
    body: &str,
) -> String {
    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        status_text,
        content_type,
        body.len()
    );
    for (name, value) in extra_headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");
    response.push_str(body);
    response
}
