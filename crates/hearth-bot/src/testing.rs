//! Fakes shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hearth_session::{
    AccountClient, AccountError, AcquirePolicy, CookieProvider, CookieSet, Credentials,
    RemoteServer, ServerStatus, SessionManager,
};

use crate::commands::ReplySink;

#[derive(Default)]
pub struct Script {
    pub acquisitions: AtomicUsize,
    pub no_cookies: AtomicBool,
    pub fail_login: AtomicBool,
    pub fail_start: AtomicBool,
    pub expire_next_call: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

pub struct FakeCookies(pub Arc<Script>);

#[async_trait]
impl CookieProvider for FakeCookies {
    async fn acquire(&self, _policy: &AcquirePolicy) -> Option<CookieSet> {
        self.0.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.0.no_cookies.load(Ordering::SeqCst) {
            return None;
        }
        Some([("cf_clearance", "abc")].into_iter().collect())
    }
}

pub struct FakeAccount(pub Arc<Script>);

#[async_trait]
impl AccountClient for FakeAccount {
    type Server = FakeServer;

    fn inject_cookies(&self, _cookies: &CookieSet) -> Result<(), AccountError> {
        Ok(())
    }

    async fn login(&self, _user: &str, _password: &str) -> Result<(), AccountError> {
        if self.0.fail_login.load(Ordering::SeqCst) {
            return Err(AccountError::Rejected("invalid credentials".to_string()));
        }
        Ok(())
    }

    async fn list_servers(&self) -> Result<Vec<FakeServer>, AccountError> {
        Ok(vec![FakeServer {
            script: self.0.clone(),
            status: ServerStatus::Offline,
            players: None,
        }])
    }
}

pub struct FakeServer {
    script: Arc<Script>,
    status: ServerStatus,
    players: Option<u32>,
}

impl FakeServer {
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
        "Survival"
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
        self.players = Some(3);
        Ok(())
    }

    async fn start(&self) -> Result<(), AccountError> {
        self.check()?;
        if self.script.fail_start.load(Ordering::SeqCst) {
            return Err(AccountError::Rejected("server is already running".to_string()));
        }
        self.script.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), AccountError> {
        self.check()?;
        self.script.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub type FakeSession = SessionManager<FakeAccount, FakeCookies>;

pub fn fake_session(script: &Arc<Script>) -> Arc<FakeSession> {
    Arc::new(SessionManager::new(
        FakeAccount(script.clone()),
        FakeCookies(script.clone()),
        Credentials {
            user: "steve".to_string(),
            password: "hunter2".to_string(),
        },
    ))
}

#[derive(Default)]
pub struct RecordingReply {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingReply {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplySink for RecordingReply {
    async fn say(&self, text: &str) {
        self.lines.lock().unwrap().push(text.to_string());
    }
}
