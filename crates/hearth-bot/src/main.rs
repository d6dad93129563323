use std::sync::Arc;

use anyhow::Context;
use hearth_bot::commands;
use hearth_bot::config::Config;
use hearth_bot::discord::{DiscordHttp, gateway};
use hearth_bot::keepalive;
use hearth_bot::logging::init_tracing;
use hearth_bot::presence::{PresencePoller, PresenceState};
use hearth_session::{AternosClient, CookieAcquirer, SessionManager};
use tokio::sync::{mpsc, watch};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };
    tracing::info!(?config, "starting hearth");

    let client = AternosClient::new(config.aternos_base_url.clone())
        .context("build hosting account client")?;
    let cookies = CookieAcquirer::new(config.bypass.clone());
    let session = Arc::new(
        SessionManager::new(client, cookies, config.credentials.clone())
            .with_policy(config.acquire_policy),
    );

    let (presence_tx, presence_rx) = watch::channel(PresenceState::Starting);
    let (events_tx, events_rx) = mpsc::channel(64);
    let http = DiscordHttp::new(&config.discord_token)?;

    PresencePoller::new(session.clone(), presence_tx, config.poll_interval).spawn();
    gateway::spawn(config.discord_token.clone(), events_tx, presence_rx);
    commands::spawn_router(events_rx, session.clone(), http, config.command_prefix.clone());

    keepalive::serve(config.port, session).await
}
