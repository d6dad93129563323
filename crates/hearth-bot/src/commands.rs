use std::sync::Arc;

use async_trait::async_trait;
use hearth_session::{AccountClient, ActionError, CookieProvider, ServerAction, SessionManager};
use tokio::sync::mpsc;

use crate::discord::model::MessageCreate;
use crate::discord::rest::DiscordHttp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    RetryCookie,
    Help,
}

impl Command {
    /// Recognizes `<prefix><name>` as the first word of a message.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim_start().strip_prefix(prefix)?;
        let name = rest.split_whitespace().next()?;
        match name.to_ascii_lowercase().as_str() {
            "startserver" | "start" => Some(Self::Start),
            "stopserver" | "stop" => Some(Self::Stop),
            "status" => Some(Self::Status),
            "retrycookie" | "refresh" => Some(Self::RetryCookie),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}

/// Where command output goes.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn say(&self, text: &str);
}

pub struct ChannelReply {
    http: DiscordHttp,
    channel_id: String,
}

impl ChannelReply {
    pub fn new(http: DiscordHttp, channel_id: String) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl ReplySink for ChannelReply {
    async fn say(&self, text: &str) {
        if let Err(e) = self.http.send_message(&self.channel_id, text).await {
            tracing::warn!(channel_id = %self.channel_id, error = %e, "failed to send reply");
        }
    }
}

fn unavailable(prefix: &str) -> String {
    format!("❌ Failed to login to Aternos. Try `{prefix}retrycookie` or check logs.")
}

fn help(prefix: &str) -> String {
    format!(
        "**Commands**\n\
         `{prefix}startserver` start the server\n\
         `{prefix}stopserver` stop the server\n\
         `{prefix}status` show server status and player count\n\
         `{prefix}retrycookie` drop the cached login and sign in again"
    )
}

pub async fn run<C, P>(
    command: Command,
    session: &SessionManager<C, P>,
    reply: &dyn ReplySink,
    prefix: &str,
) where
    C: AccountClient,
    P: CookieProvider,
{
    match command {
        Command::Start => {
            reply.say("🔄 Attempting to start server...").await;
            match session.perform(ServerAction::Start).await {
                Ok(_) => {
                    reply
                        .say("✅ Server start command sent. It may take a few minutes to come online.")
                        .await
                }
                Err(ActionError::Unavailable) => reply.say(&unavailable(prefix)).await,
                Err(ActionError::Failed(e)) => {
                    tracing::error!(error = %e, "error starting server");
                    reply.say(&format!("❌ Error starting server: {e}")).await
                }
            }
        }
        Command::Stop => {
            reply.say("🔄 Attempting to stop server...").await;
            match session.perform(ServerAction::Stop).await {
                Ok(_) => reply.say("✅ Server stop command sent.").await,
                Err(ActionError::Unavailable) => reply.say(&unavailable(prefix)).await,
                Err(ActionError::Failed(e)) => {
                    tracing::error!(error = %e, "error stopping server");
                    reply.say(&format!("❌ Error stopping server: {e}")).await
                }
            }
        }
        Command::Status => match session.perform(ServerAction::Fetch).await {
            Ok(info) => {
                reply
                    .say(&format!(
                        "🖥️ Server status: **{}** | Players: **{}**",
                        info.status,
                        info.players_label()
                    ))
                    .await
            }
            Err(ActionError::Unavailable) => reply.say(&unavailable(prefix)).await,
            Err(ActionError::Failed(e)) => {
                tracing::error!(error = %e, "error fetching status");
                reply.say(&format!("❌ Error fetching status: {e}")).await
            }
        },
        Command::RetryCookie => {
            reply.say("🔄 Forcing cookie refresh...").await;
            match session.force_refresh().await {
                Some(name) => {
                    reply
                        .say(&format!("✅ Re-login successful. Server: {name}"))
                        .await
                }
                None => {
                    reply
                        .say("❌ Re-login failed. Check logs and bypass service quota.")
                        .await
                }
            }
        }
        Command::Help => reply.say(&help(prefix)).await,
    }
}

/// Consumes gateway messages and runs each recognized command on its own task.
pub fn spawn_router<C, P>(
    mut events: mpsc::Receiver<MessageCreate>,
    session: Arc<SessionManager<C, P>>,
    http: DiscordHttp,
    prefix: String,
) where
    C: AccountClient + 'static,
    P: CookieProvider + 'static,
{
    tokio::spawn(async move {
        while let Some(msg) = events.recv().await {
            if msg.author.bot {
                continue;
            }
            let Some(command) = Command::parse(&prefix, &msg.content) else {
                continue;
            };
            tracing::info!(
                ?command,
                user = %msg.author.username,
                channel_id = %msg.channel_id,
                "command received"
            );

            let session = session.clone();
            let reply = ChannelReply::new(http.clone(), msg.channel_id);
            let prefix = prefix.clone();
            tokio::spawn(async move {
                run(command, &session, &reply, &prefix).await;
            });
        }
        tracing::info!("command router stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingReply, Script, fake_session};
    use std::sync::atomic::Ordering;

    #[test]
    fn parse_recognizes_names_and_aliases() {
        assert_eq!(Command::parse("!", "!startserver"), Some(Command::Start));
        assert_eq!(Command::parse("!", "  !STOP now"), Some(Command::Stop));
        assert_eq!(Command::parse("!", "!status"), Some(Command::Status));
        assert_eq!(Command::parse("!", "!retrycookie"), Some(Command::RetryCookie));
        assert_eq!(Command::parse("?", "?help"), Some(Command::Help));
    }

    #[test]
    fn parse_ignores_other_messages() {
        assert_eq!(Command::parse("!", "status"), None);
        assert_eq!(Command::parse("!", "!"), None);
        assert_eq!(Command::parse("!", "!dance"), None);
        assert_eq!(Command::parse("!", "hello !status"), None);
    }

    #[tokio::test]
    async fn start_reports_progress_then_success() {
        let script = Arc::new(Script::default());
        let session = fake_session(&script);
        let reply = RecordingReply::default();

        run(Command::Start, &session, &reply, "!").await;

        assert_eq!(
            reply.lines(),
            vec![
                "🔄 Attempting to start server...".to_string(),
                "✅ Server start command sent. It may take a few minutes to come online."
                    .to_string(),
            ]
        );
        assert_eq!(script.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn commands_short_circuit_when_login_is_unavailable() {
        let script = Arc::new(Script::default());
        script.no_cookies.store(true, Ordering::SeqCst);
        let session = fake_session(&script);
        let reply = RecordingReply::default();

        run(Command::Stop, &session, &reply, "!").await;
        run(Command::Status, &session, &reply, "!").await;

        let lines = reply.lines();
        assert_eq!(lines[0], "🔄 Attempting to stop server...");
        assert_eq!(
            lines[1],
            "❌ Failed to login to Aternos. Try `!retrycookie` or check logs."
        );
        assert_eq!(lines[2], lines[1]);
        assert_eq!(script.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn status_formats_players() {
        let script = Arc::new(Script::default());
        let session = fake_session(&script);
        let reply = RecordingReply::default();

        run(Command::Status, &session, &reply, "!").await;

        assert_eq!(
            reply.lines(),
            vec!["🖥️ Server status: **online** | Players: **3**".to_string()]
        );
    }

    #[tokio::test]
    async fn server_errors_are_reported_without_dropping_session() {
        let script = Arc::new(Script::default());
        script.fail_start.store(true, Ordering::SeqCst);
        let session = fake_session(&script);
        let reply = RecordingReply::default();

        run(Command::Start, &session, &reply, "!").await;

        let lines = reply.lines();
        assert_eq!(
            lines[1],
            "❌ Error starting server: rejected by hosting provider: server is already running"
        );
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn retry_cookie_relogs_and_names_server() {
        let script = Arc::new(Script::default());
        let session = fake_session(&script);
        let reply = RecordingReply::default();

        assert!(session.ensure_session().await);
        run(Command::RetryCookie, &session, &reply, "!").await;

        assert_eq!(
            reply.lines(),
            vec![
                "🔄 Forcing cookie refresh...".to_string(),
                "✅ Re-login successful. Server: Survival".to_string(),
            ]
        );
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_cookie_failure_is_reported() {
        let script = Arc::new(Script::default());
        script.fail_login.store(true, Ordering::SeqCst);
        let session = fake_session(&script);
        let reply = RecordingReply::default();

        run(Command::RetryCookie, &session, &reply, "!").await;

        assert_eq!(
            reply.lines()[1],
            "❌ Re-login failed. Check logs and bypass service quota."
        );
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn help_uses_configured_prefix() {
        let script = Arc::new(Script::default());
        let session = fake_session(&script);
        let reply = RecordingReply::default();

        run(Command::Help, &session, &reply, "?").await;

        let text = &reply.lines()[0];
        assert!(text.contains("`?startserver`"));
        assert!(text.contains("`?retrycookie`"));
        assert_eq!(script.acquisitions.load(Ordering::SeqCst), 0);
    }
}
