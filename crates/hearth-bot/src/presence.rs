use std::sync::Arc;
use std::time::Duration;

use hearth_session::{AccountClient, CookieProvider, SessionManager};
use hearth_types::ServerStatus;
use tokio::sync::watch;

use crate::discord::model::Presence;

/// What the bot shows as its Discord activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceState {
    Starting,
    NoSession,
    Server {
        status: ServerStatus,
        players: Option<u32>,
    },
    Unreachable,
}

impl PresenceState {
    pub fn to_presence(&self) -> Presence {
        match self {
            Self::Starting => Presence {
                activity: "starting up".to_string(),
                status: "idle",
            },
            Self::NoSession => Presence {
                activity: "Aternos: not logged in".to_string(),
                status: "idle",
            },
            Self::Server { status, players } => {
                let mut activity = format!("Minecraft: {status}");
                match players {
                    Some(1) => activity.push_str(" (1 player)"),
                    Some(n) => activity.push_str(&format!(" ({n} players)")),
                    None => {}
                }
                let status = match status {
                    ServerStatus::Online => "online",
                    ServerStatus::Offline | ServerStatus::Unknown => "dnd",
                    ServerStatus::Starting | ServerStatus::Stopping => "idle",
                };
                Presence { activity, status }
            }
            Self::Unreachable => Presence {
                activity: "Minecraft: status unavailable".to_string(),
                status: "dnd",
            },
        }
    }
}

/// Refreshes the cached server's status on a fixed interval and publishes it.
///
/// Only polls while a session exists; it never logs in on its own.
pub struct PresencePoller<C: AccountClient, P> {
    session: Arc<SessionManager<C, P>>,
    tx: watch::Sender<PresenceState>,
    interval: Duration,
}

impl<C, P> PresencePoller<C, P>
where
    C: AccountClient + 'static,
    P: CookieProvider + 'static,
{
    pub fn new(
        session: Arc<SessionManager<C, P>>,
        tx: watch::Sender<PresenceState>,
        interval: Duration,
    ) -> Self {
        Self {
            session,
            tx,
            interval,
        }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(self.interval).await;
            }
        });
    }

    async fn tick(&self) {
        let next = match self.session.refresh_if_active().await {
            None => PresenceState::NoSession,
            Some(Ok(info)) => PresenceState::Server {
                status: info.status,
                players: info.players,
            },
            Some(Err(e)) => {
                tracing::warn!(error = %e, "status poll failed");
                PresenceState::Unreachable
            }
        };

        let changed = self.tx.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            *cur = next;
            true
        });
        if changed {
            tracing::debug!(state = ?*self.tx.borrow(), "presence updated");
        }
    }
}
