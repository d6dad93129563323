use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use hearth_types::{CookieSet, ServerInfo};
use tokio::sync::Mutex;

use crate::account::{AccountClient, AccountError, RemoteServer};
use crate::bypass::{AcquirePolicy, CookieProvider};

#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Fetch,
    Start,
    Stop,
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("no account session available")]
    Unavailable,
    #[error(transparent)]
    Failed(#[from] AccountError),
}

struct ActiveSession<S> {
    server: S,
    established_at: Instant,
}

type SessionSlot<S> = Option<ActiveSession<S>>;

/// Owns the account session and the cached server handle.
///
/// All reads and writes of the pair go through one async mutex, held across
/// the login flow. Concurrent callers wait for a single cookie acquisition.
pub struct SessionManager<C: AccountClient, P> {
    client: C,
    cookies: P,
    credentials: Credentials,
    policy: AcquirePolicy,
    state: Mutex<SessionSlot<C::Server>>,
    active: AtomicBool,
}

impl<C, P> SessionManager<C, P>
where
    C: AccountClient,
    P: CookieProvider,
{
    pub fn new(client: C, cookies: P, credentials: Credentials) -> Self {
        Self {
            client,
            cookies,
            credentials,
            policy: AcquirePolicy::default(),
            state: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: AcquirePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Lock-free view of whether a session is cached right now.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub async fn ensure_session(&self) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_locked(&mut state).await
    }

    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        self.clear(&mut state);
    }

    /// Drops any cached session and runs the full login flow again.
    ///
    /// Returns the cached server's name on success.
    pub async fn force_refresh(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        self.clear(&mut state);
        if !self.ensure_locked(&mut state).await {
            return None;
        }
        state.as_ref().map(|s| s.server.name().to_string())
    }

    /// Runs `action` against the cached server, logging in first if needed.
    pub async fn perform(&self, action: ServerAction) -> Result<ServerInfo, ActionError> {
        let mut state = self.state.lock().await;
        if !self.ensure_locked(&mut state).await {
            return Err(ActionError::Unavailable);
        }
        let Some(active) = state.as_mut() else {
            return Err(ActionError::Unavailable);
        };

        let res = match action {
            ServerAction::Fetch => active.server.fetch().await,
            ServerAction::Start => active.server.start().await,
            ServerAction::Stop => active.server.stop().await,
        };

        match res {
            Ok(()) => Ok(active.server.snapshot()),
            Err(e) => {
                tracing::warn!(?action, error = %e, "server operation failed");
                if e.is_session_expired() {
                    self.clear(&mut state);
                }
                Err(ActionError::Failed(e))
            }
        }
    }

    /// Fetches fresh status only when a session is already cached. Never
    /// starts a cookie acquisition.
    pub async fn refresh_if_active(&self) -> Option<Result<ServerInfo, AccountError>> {
        let mut state = self.state.lock().await;
        let active = state.as_mut()?;

        match active.server.fetch().await {
            Ok(()) => Some(Ok(active.server.snapshot())),
            Err(e) => {
                if e.is_session_expired() {
                    let age_secs = active.established_at.elapsed().as_secs();
                    tracing::warn!(age_secs, "cached session expired; dropping it");
                    self.clear(&mut state);
                }
                Some(Err(e))
            }
        }
    }

    fn clear(&self, state: &mut SessionSlot<C::Server>) {
        if state.take().is_some() {
            tracing::info!("cleared cached account session");
        }
        self.active.store(false, Ordering::Release);
    }

    async fn ensure_locked(&self, state: &mut SessionSlot<C::Server>) -> bool {
        if state.is_some() {
            return true;
        }

        tracing::info!("no cached account session; obtaining cookies");
        let Some(cookies) = self.cookies.acquire(&self.policy).await else {
            tracing::warn!("could not obtain cookies from bypass service");
            return false;
        };

        match self.login(&cookies).await {
            Ok(Some(server)) => {
                tracing::info!(server = server.name(), "account login successful; server cached");
                *state = Some(ActiveSession {
                    server,
                    established_at: Instant::now(),
                });
                self.active.store(true, Ordering::Release);
                true
            }
            Ok(None) => {
                tracing::warn!("account login succeeded but no servers found");
                self.clear(state);
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "account login failed");
                self.clear(state);
                false
            }
        }
    }

    async fn login(&self, cookies: &CookieSet) -> Result<Option<C::Server>, AccountError> {
        self.client.inject_cookies(cookies)?;
        self.client
            .login(&self.credentials.user, &self.credentials.password)
            .await?;
        let servers = self.client.list_servers().await?;
        Ok(servers.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hearth_types::ServerStatus;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Script {
        acquisitions: AtomicUsize,
        no_cookies: AtomicBool,
        logins: AtomicUsize,
        fail_login: AtomicBool,
        no_servers: AtomicBool,
        expire_next_call: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        injected: std::sync::Mutex<Vec<CookieSet>>,
    }

    struct FakeCookies(Arc<Script>);

    #[async_trait]
    impl CookieProvider for FakeCookies {
        async fn acquire(&self, _policy: &AcquirePolicy) -> Option<CookieSet> {
            self.0.acquisitions.fetch_add(1, Ordering::SeqCst);
            if self.0.no_cookies.load(Ordering::SeqCst) {
                return None;
            }
            Some([("SESSION", "abc")].into_iter().collect())
        }
    }

    struct FakeClient(Arc<Script>);

    #[async_trait]
    impl AccountClient for FakeClient {
        type Server = FakeServer;

        fn inject_cookies(&self, cookies: &CookieSet) -> Result<(), AccountError> {
            self.0.injected.lock().unwrap().push(cookies.clone());
            Ok(())
        }

        async fn login(&self, user: &str, _password: &str) -> Result<(), AccountError> {
            self.0.logins.fetch_add(1, Ordering::SeqCst);
            assert_eq!(user, "steve");
            if self.0.fail_login.load(Ordering::SeqCst) {
                return Err(AccountError::Rejected("bad password".to_string()));
            }
            Ok(())
        }

        async fn list_servers(&self) -> Result<Vec<FakeServer>, AccountError> {
            if self.0.no_servers.load(Ordering::SeqCst) {
                return Ok(Vec::new());
            }
            Ok(vec![
                FakeServer::new(self.0.clone(), "first"),
                FakeServer::new(self.0.clone(), "second"),
            ])
        }
    }

    struct FakeServer {
        script: Arc<Script>,
        name: String,
        status: ServerStatus,
        players: Option<u32>,
    }

    impl FakeServer {
        fn new(script: Arc<Script>, name: &str) -> Self {
            Self {
                script,
                name: name.to_string(),
                status: ServerStatus::Unknown,
                players: None,
            }
        }

        fn check(&self) -> Result<(), AccountError> {
            if self.script.expire_next_call.swap(false, Ordering::SeqCst) {
                return Err(AccountError::SessionExpired);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteServer for FakeServer {
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
            self.check()?;
            self.status = ServerStatus::Online;
            self.players = Some(2);
            Ok(())
        }
        async fn start(&self) -> Result<(), AccountError> {
            self.check()?;
            self.script.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> Result<(), AccountError> {
            self.check()?;
            self.script.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(script: &Arc<Script>) -> SessionManager<FakeClient, FakeCookies> {
        SessionManager::new(
            FakeClient(script.clone()),
            FakeCookies(script.clone()),
            Credentials {
                user: "steve".to_string(),
                password: "hunter2".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn repeated_ensure_runs_one_acquisition() {
        let script = Arc::new(Script::default());
        let m = manager(&script);

        assert!(m.ensure_session().await);
        assert!(m.ensure_session().await);
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 1);
        assert_eq!(script.logins.load(Ordering::SeqCst), 1);
        assert!(m.is_active());
        assert_eq!(script.injected.lock().unwrap()[0].get("SESSION"), Some("abc"));
        let info = m.perform(ServerAction::Fetch).await.unwrap();
        assert_eq!(info.name, "first");
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_full_flow() {
        let script = Arc::new(Script::default());
        let m = manager(&script);

        assert!(m.ensure_session().await);
        m.invalidate().await;
        assert!(!m.is_active());
        assert!(m.ensure_session().await);
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 2);
        assert_eq!(script.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_acquisition() {
        let script = Arc::new(Script::default());
        let m = manager(&script);

        let (a, b) = tokio::join!(m.ensure_session(), m.ensure_session());
        assert!(a && b);
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_cookies_skip_login() {
        let script = Arc::new(Script::default());
        script.no_cookies.store(true, Ordering::SeqCst);
        let m = manager(&script);

        assert!(!m.ensure_session().await);
        assert_eq!(script.logins.load(Ordering::SeqCst), 0);
        assert!(!m.is_active());
    }

    #[tokio::test]
    async fn failing_login_leaves_no_session() {
        let script = Arc::new(Script::default());
        script.fail_login.store(true, Ordering::SeqCst);
        let m = manager(&script);

        assert!(!m.ensure_session().await);
        assert!(!m.is_active());

        // Nothing is cached, so the next call tries again from scratch.
        assert!(!m.ensure_session().await);
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_server_list_is_a_failure() {
        let script = Arc::new(Script::default());
        script.no_servers.store(true, Ordering::SeqCst);
        let m = manager(&script);

        assert!(!m.ensure_session().await);
        assert!(!m.is_active());
    }

    #[tokio::test]
    async fn actions_short_circuit_without_session() {
        let script = Arc::new(Script::default());
        script.no_cookies.store(true, Ordering::SeqCst);
        let m = manager(&script);

        let err = m.perform(ServerAction::Start).await.unwrap_err();
        assert!(matches!(err, ActionError::Unavailable));
        assert_eq!(script.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_returns_snapshot() {
        let script = Arc::new(Script::default());
        let m = manager(&script);

        let info = m.perform(ServerAction::Fetch).await.unwrap();
        assert_eq!(info.name, "first");
        assert_eq!(info.status, ServerStatus::Online);
        assert_eq!(info.players, Some(2));

        m.perform(ServerAction::Stop).await.unwrap();
        assert_eq!(script.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_session_is_dropped_and_rebuilt() {
        let script = Arc::new(Script::default());
        let m = manager(&script);
        assert!(m.ensure_session().await);

        script.expire_next_call.store(true, Ordering::SeqCst);
        let err = m.perform(ServerAction::Start).await.unwrap_err();
        assert!(matches!(err, ActionError::Failed(AccountError::SessionExpired)));
        assert!(!m.is_active());

        m.perform(ServerAction::Start).await.unwrap();
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 2);
        assert_eq!(script.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_if_active_never_acquires() {
        let script = Arc::new(Script::default());
        let m = manager(&script);

        assert!(m.refresh_if_active().await.is_none());
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 0);

        assert!(m.ensure_session().await);
        let info = m.refresh_if_active().await.unwrap().unwrap();
        assert_eq!(info.status, ServerStatus::Online);

        script.expire_next_call.store(true, Ordering::SeqCst);
        assert!(m.refresh_if_active().await.unwrap().is_err());
        assert!(!m.is_active());
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_reruns_login() {
        let script = Arc::new(Script::default());
        let m = manager(&script);

        assert!(m.ensure_session().await);
        assert_eq!(m.force_refresh().await.as_deref(), Some("first"));
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 2);

        script.fail_login.store(true, Ordering::SeqCst);
        assert!(m.force_refresh().await.is_none());
        assert!(!m.is_active());
    }
}
