use async_trait::async_trait;
use hearth_types::{CookieSet, ServerInfo, ServerStatus};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("rejected by hosting provider: {0}")]
    Rejected(String),
    #[error("session expired")]
    SessionExpired,
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl AccountError {
    /// Whether the cached session is no longer usable and must be dropped.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }
}

/// Client for the hosting provider's account and server-control flows.
#[async_trait]
pub trait AccountClient: Send + Sync {
    type Server: RemoteServer;

    /// Replaces any previous session state with `cookies`.
    fn inject_cookies(&self, cookies: &CookieSet) -> Result<(), AccountError>;

    async fn login(&self, user: &str, password: &str) -> Result<(), AccountError>;

    async fn list_servers(&self) -> Result<Vec<Self::Server>, AccountError>;
}

#[async_trait]
pub trait RemoteServer: Send + Sync {
    fn name(&self) -> &str;
    fn status(&self) -> ServerStatus;
    fn players(&self) -> Option<u32>;

    /// Reloads `status`, `players` and `name` from the provider.
    async fn fetch(&mut self) -> Result<(), AccountError>;
    async fn start(&self) -> Result<(), AccountError>;
    async fn stop(&self) -> Result<(), AccountError>;

    fn snapshot(&self) -> ServerInfo {
        ServerInfo {
            name: self.name().to_string(),
            status: self.status(),
            players: self.players(),
        }
    }
}
