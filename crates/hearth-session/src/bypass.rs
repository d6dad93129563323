//! Cookie acquisition through a browser-rendering bypass service.
//!
//! The service loads the hosting provider's login page in a real browser and
//! hands back whatever cookies that produced. Its response schema has moved
//! between versions, so extraction tries several known shapes in order.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use hearth_types::CookieSet;
use reqwest::header::SET_COOKIE;
use serde_json::Value;
use url::Url;

use crate::retry::retry;

pub const DEFAULT_ENDPOINT: &str = "https://api.zenrows.com/v1/";

/// Wrapper keys that have been seen around a nested `cookies` list, in the
/// order they are tried.
const WRAPPER_KEYS: [&str; 4] = ["solution", "response", "result", "data"];

#[derive(Clone)]
pub struct BypassConfig {
    pub endpoint: Url,
    pub api_key: String,
    /// Page the service should render, normally the provider's login page.
    pub target_url: String,
}

impl fmt::Debug for BypassConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BypassConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .field("target_url", &self.target_url)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquirePolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        // The service quota is small; keep retries cheap.
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(3),
            timeout: Duration::from_secs(60),
        }
    }
}

impl AcquirePolicy {
    fn normalized(self) -> Self {
        Self {
            max_attempts: self.max_attempts.max(1),
            delay: self.delay,
            timeout: if self.timeout.is_zero() {
                Duration::from_secs(1)
            } else {
                self.timeout
            },
        }
    }
}

/// Where in a response a cookie collection was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieSource {
    TopLevel,
    Nested(&'static str),
    SetCookieHeader,
}

impl fmt::Display for CookieSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopLevel => f.write_str("cookies"),
            Self::Nested(key) => write!(f, "{key}.cookies"),
            Self::SetCookieHeader => f.write_str("Set-Cookie header"),
        }
    }
}

type Extractor = fn(&Value) -> Option<(CookieSource, CookieSet)>;

/// Tried in order against the parsed body; first non-empty result wins.
const EXTRACTORS: [Extractor; 2] = [top_level_cookies, nested_cookies];

fn cookie_list(list: &Value) -> Option<CookieSet> {
    let entries = list.as_array()?;
    let mut set = CookieSet::new();
    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let value = match entry.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
            _ => continue,
        };
        set.insert(name, value);
    }
    set.non_empty()
}

fn top_level_cookies(doc: &Value) -> Option<(CookieSource, CookieSet)> {
    let set = cookie_list(doc.get("cookies")?)?;
    Some((CookieSource::TopLevel, set))
}

fn nested_cookies(doc: &Value) -> Option<(CookieSource, CookieSet)> {
    WRAPPER_KEYS.iter().find_map(|key| {
        let inner = doc.get(*key)?;
        if !inner.is_object() {
            return None;
        }
        let set = cookie_list(inner.get("cookies")?)?;
        Some((CookieSource::Nested(key), set))
    })
}

/// First `name=value` pair of a `Set-Cookie` header value.
fn set_cookie_pair(header: &str) -> Option<CookieSet> {
    let first = header.split(';').next()?;
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut set = CookieSet::new();
    set.insert(name, value.trim());
    Some(set)
}

/// Pulls a cookie collection out of a bypass response.
///
/// Body extractors run first; the `Set-Cookie` header is the fallback and is
/// also consulted when the body is not JSON at all.
pub fn extract_cookies(body: &str, set_cookie: Option<&str>) -> Option<(CookieSource, CookieSet)> {
    match serde_json::from_str::<Value>(body) {
        Ok(doc) => {
            if let Some(hit) = EXTRACTORS.iter().find_map(|extract| extract(&doc)) {
                return Some(hit);
            }
        }
        Err(_) => {
            tracing::warn!(len = body.len(), "bypass service returned a non-JSON body");
        }
    }

    let set = set_cookie_pair(set_cookie?)?;
    Some((CookieSource::SetCookieHeader, set))
}

/// Anything that can hand the session layer a fresh [`CookieSet`].
#[async_trait]
pub trait CookieProvider: Send + Sync {
    async fn acquire(&self, policy: &AcquirePolicy) -> Option<CookieSet>;
}

#[derive(Debug)]
enum AttemptError {
    Transport(reqwest::Error),
    NoCookies,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::NoCookies => f.write_str("no cookies in response"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CookieAcquirer {
    http: reqwest::Client,
    config: BypassConfig,
}

impl CookieAcquirer {
    pub fn new(config: BypassConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hearth/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(http, config)
    }

    pub fn with_client(http: reqwest::Client, config: BypassConfig) -> Self {
        Self { http, config }
    }

    /// Returns `None` once every attempt has failed; failures never escape.
    pub async fn acquire(&self, policy: &AcquirePolicy) -> Option<CookieSet> {
        let policy = policy.normalized();
        let res = retry(policy.max_attempts, policy.delay, |attempt| {
            self.attempt(attempt, policy.max_attempts, policy.timeout)
        })
        .await;

        match res {
            Ok(cookies) => Some(cookies),
            Err(e) => {
                tracing::error!(
                    attempts = policy.max_attempts,
                    error = %e,
                    "failed to obtain cookies from bypass service"
                );
                None
            }
        }
    }

    async fn attempt(
        &self,
        attempt: u32,
        attempts: u32,
        timeout: Duration,
    ) -> Result<CookieSet, AttemptError> {
        tracing::info!(attempt, attempts, "requesting cookies from bypass service");

        let resp = self
            .http
            .get(self.config.endpoint.clone())
            .query(&[
                ("apikey", self.config.api_key.as_str()),
                ("url", self.config.target_url.as_str()),
                ("js_render", "true"),
                ("premium_proxy", "true"),
            ])
            .timeout(timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            // The request URL carries the API key.
            .map_err(|e| AttemptError::Transport(e.without_url()));

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "bypass request failed");
                return Err(e);
            }
        };

        let set_cookie = resp
            .headers()
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                let e = AttemptError::Transport(e.without_url());
                tracing::warn!(attempt, error = %e, "failed to read bypass response body");
                return Err(e);
            }
        };

        match extract_cookies(&body, set_cookie.as_deref()) {
            Some((source, cookies)) => {
                tracing::info!(attempt, %source, count = cookies.len(), "obtained cookies");
                Ok(cookies)
            }
            None => {
                tracing::warn!(attempt, "no cookies found in bypass response");
                Err(AttemptError::NoCookies)
            }
        }
    }
}

#[async_trait]
impl CookieProvider for CookieAcquirer {
    async fn acquire(&self, policy: &AcquirePolicy) -> Option<CookieSet> {
        CookieAcquirer::acquire(self, policy).await
    }
}
