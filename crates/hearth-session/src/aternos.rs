//! [`AccountClient`] for aternos.org.
//!
//! The panel is a cookie-authenticated web app: AJAX calls carry a page token
//! plus a random `SEC` pair mirrored in a cookie, and the selected server is a
//! cookie too. Anything that bounces us back to the login page means the
//! session is gone.

use std::sync::{Arc, LazyLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use hearth_types::{CookieSet, ServerStatus};
use md5::{Digest, Md5};
use rand::Rng;
use rand::distributions::Alphanumeric;
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use url::Url;

use crate::account::{AccountClient, AccountError, RemoteServer};

pub const DEFAULT_BASE_URL: &str = "https://aternos.org";

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static AJAX_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"AJAX_TOKEN["']?\]?\s*=\s*["']([A-Za-z0-9]+)["']"#)
        .expect("AJAX_TOKEN_RE should compile")
});
static SERVER_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-id="([A-Za-z0-9]+)""#).expect("SERVER_ID_RE should compile")
});
static SERVER_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="server-name"[^>]*>\s*([^<]*?)\s*<"#)
        .expect("SERVER_NAME_RE should compile")
});
static LAST_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lastStatus\s*=\s*").expect("LAST_STATUS_RE should compile"));

fn random_sec_part() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(char::from)
        .collect::<String>()
        .to_ascii_lowercase()
}

pub(crate) fn hash_password(password: &str) -> String {
    hex::encode(Md5::digest(password.as_bytes()))
}

pub(crate) fn parse_ajax_token(html: &str) -> Option<String> {
    AJAX_TOKEN_RE
        .captures(html)
        .map(|c| c[1].to_string())
}

/// `(id, name)` pairs in page order. Names fall back to the id.
pub(crate) fn parse_server_list(html: &str) -> Vec<(String, String)> {
    let mut ids: Vec<String> = Vec::new();
    for cap in SERVER_ID_RE.captures_iter(html) {
        let id = cap[1].to_string();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    let names: Vec<String> = SERVER_NAME_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect();

    ids.into_iter()
        .enumerate()
        .map(|(i, id)| {
            let name = names
                .get(i)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| id.clone());
            (id, name)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatusFields {
    pub name: Option<String>,
    pub status: ServerStatus,
    pub players: Option<u32>,
}

pub(crate) fn parse_last_status(html: &str) -> Result<StatusFields, AccountError> {
    let start = LAST_STATUS_RE
        .find(html)
        .map(|m| m.end())
        .ok_or_else(|| AccountError::Protocol("server page has no status block".to_string()))?;
    // The object is followed by arbitrary script, so read exactly one value.
    let doc = serde_json::Deserializer::from_str(&html[start..])
        .into_iter::<Value>()
        .next()
        .ok_or_else(|| AccountError::Protocol("empty status block".to_string()))?
        .map_err(|e| AccountError::Protocol(format!("invalid status json: {e}")))?;
    if !doc.is_object() {
        return Err(AccountError::Protocol("status block is not an object".to_string()));
    }

    let status = doc
        .get("lang")
        .and_then(Value::as_str)
        .map(ServerStatus::from_label)
        .unwrap_or(ServerStatus::Unknown);
    let players = doc
        .get("players")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok());
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    Ok(StatusFields {
        name,
        status,
        players,
    })
}

#[derive(Debug, serde::Deserialize)]
struct AjaxResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AjaxResponse {
    fn into_result(self) -> Result<(), AccountError> {
        if self.success {
            return Ok(());
        }
        let reason = self
            .error
            .or(self.message)
            .unwrap_or_else(|| "unknown error".to_string());
        Err(AccountError::Rejected(reason))
    }
}

/// One cookie jar plus the HTTP client bound to it. Replaced on every cookie
/// injection so stale cookies never leak into a new session.
#[derive(Debug)]
struct Connection {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base: Url,
    sec: (String, String),
    token: std::sync::Mutex<Option<String>>,
}

impl Connection {
    fn new(base: Url, cookies: &CookieSet) -> Result<Self, AccountError> {
        let jar = Arc::new(Jar::default());
        for (name, value) in cookies.iter() {
            jar.add_cookie_str(&format!("{name}={value}; Path=/"), &base);
        }

        let sec = (random_sec_part(), random_sec_part());
        jar.add_cookie_str(&format!("ATERNOS_SEC_{}={}; Path=/", sec.0, sec.1), &base);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .cookie_provider(jar.clone())
            .build()?;

        Ok(Self {
            http,
            jar,
            base,
            sec,
            token: std::sync::Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> Result<Url, AccountError> {
        self.base
            .join(path)
            .map_err(|e| AccountError::Protocol(format!("bad url {path}: {e}")))
    }

    fn ajax_query(&self) -> Result<[(&'static str, String); 2], AccountError> {
        let token = self
            .token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(AccountError::SessionExpired)?;
        Ok([
            ("SEC", format!("{}:{}", self.sec.0, self.sec.1)),
            ("TOKEN", token),
        ])
    }

    fn select_server(&self, id: &str) {
        self.jar
            .add_cookie_str(&format!("ATERNOS_SERVER={id}; Path=/"), &self.base);
    }

    async fn refresh_token(&self) -> Result<(), AccountError> {
        let html = self
            .http
            .get(self.url("/go/")?)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let token = parse_ajax_token(&html)
            .ok_or_else(|| AccountError::Protocol("ajax token not found".to_string()))?;
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token);
        Ok(())
    }
}

/// Maps auth failures and login-page redirects to `SessionExpired`.
fn check_session(resp: Response) -> Result<Response, AccountError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AccountError::SessionExpired);
    }
    let path = resp.url().path();
    if path.starts_with("/go") || path.starts_with("/login") {
        return Err(AccountError::SessionExpired);
    }
    Ok(resp.error_for_status()?)
}

#[derive(Debug)]
pub struct AternosClient {
    base: Url,
    conn: RwLock<Arc<Connection>>,
}

impl AternosClient {
    pub fn new(base: Url) -> Result<Self, AccountError> {
        let conn = Connection::new(base.clone(), &CookieSet::new())?;
        Ok(Self {
            base,
            conn: RwLock::new(Arc::new(conn)),
        })
    }

    fn conn(&self) -> Arc<Connection> {
        self.conn.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AccountClient for AternosClient {
    type Server = AternosServer;

    fn inject_cookies(&self, cookies: &CookieSet) -> Result<(), AccountError> {
        let conn = Connection::new(self.base.clone(), cookies)?;
        *self.conn.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(conn);
        tracing::debug!(count = cookies.len(), "injected cookies into account client");
        Ok(())
    }

    async fn login(&self, user: &str, password: &str) -> Result<(), AccountError> {
        let conn = self.conn();
        conn.refresh_token().await?;

        let resp = conn
            .http
            .post(conn.url("/ajax/account/login")?)
            .query(&conn.ajax_query()?)
            .form(&[("user", user.to_string()), ("password", hash_password(password))])
            .send()
            .await?
            .error_for_status()?;

        resp.json::<AjaxResponse>().await?.into_result()
    }

    async fn list_servers(&self) -> Result<Vec<AternosServer>, AccountError> {
        let conn = self.conn();
        let resp = conn.http.get(conn.url("/servers/")?).send().await?;
        let html = check_session(resp)?.text().await?;

        Ok(parse_server_list(&html)
            .into_iter()
            .map(|(id, name)| AternosServer {
                conn: conn.clone(),
                id,
                name,
                status: ServerStatus::Unknown,
                players: None,
            })
            .collect())
    }
}

#[derive(Debug)]
pub struct AternosServer {
    conn: Arc<Connection>,
    id: String,
    name: String,
    status: ServerStatus,
    players: Option<u32>,
}

impl AternosServer {
    pub fn id(&self) -> &str {
        &self.id
    }

    async fn command(&self, path: &str) -> Result<(), AccountError> {
        let conn = &self.conn;
        conn.select_server(&self.id);

        let mut query = conn.ajax_query()?.to_vec();
        if path.ends_with("/start") {
            query.push(("headstart", "0".to_string()));
            query.push(("access-credits", "0".to_string()));
        }

        let resp = conn.http.get(conn.url(path)?).query(&query).send().await?;
        check_session(resp)?
            .json::<AjaxResponse>()
            .await?
            .into_result()
    }
}

#[async_trait]
impl RemoteServer for AternosServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> ServerStatus {
        self.status
    }

    fn players(&self) -> Option<u32> {
        self.players
    }

    async fn fetch(&mut self) -> Result<(), AccountError> {
        self.conn.select_server(&self.id);
        let resp = self.conn.http.get(self.conn.url("/server/")?).send().await?;
        let html = check_session(resp)?.text().await?;

        let fields = parse_last_status(&html)?;
        self.status = fields.status;
        self.players = fields.players;
        if let Some(name) = fields.name {
            self.name = name;
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), AccountError> {
        self.command("/ajax/server/start").await
    }

    async fn stop(&self) -> Result<(), AccountError> {
        self.command("/ajax/server/stop").await
    }
}
