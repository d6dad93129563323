use std::time::Duration;

use anyhow::Context;
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{Instrument, info_span};

use super::model::{self, GatewayPayload, Hello, MessageCreate, Ready, opcode};
use crate::presence::PresenceState;

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Close code for an invalid bot token. Reconnecting will not help.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

/// Keeps a gateway connection open for the life of the process.
pub fn spawn(
    token: String,
    events: mpsc::Sender<MessageCreate>,
    mut presence: watch::Receiver<PresenceState>,
) {
    tokio::spawn(async move {
        let span = info_span!("gateway", url = GATEWAY_URL);
        async move {
            let mut backoff = Duration::from_millis(500);
            loop {
                match run_once(GATEWAY_URL, &token, &events, &mut presence).await {
                    Ok(()) => {
                        tracing::info!("gateway connection closed, reconnecting");
                        backoff = Duration::from_millis(500);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "gateway disconnected");
                        backoff = (backoff * 2).min(Duration::from_secs(30));
                    }
                }
                if events.is_closed() {
                    break;
                }
                tokio::time::sleep(backoff).await;
            }
        }
        .instrument(span)
        .await;
    });
}

async fn send_json<S>(sink: &mut S, value: &Value) -> anyhow::Result<()>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    sink.send(WsMessage::Text(value.to_string().into())).await?;
    Ok(())
}

pub(crate) async fn run_once(
    url: &str,
    token: &str,
    events: &mpsc::Sender<MessageCreate>,
    presence: &mut watch::Receiver<PresenceState>,
) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .context("connect to gateway")?;
    let (mut sink, mut stream) = ws.split();

    let hello = loop {
        let Some(msg) = stream.next().await else {
            anyhow::bail!("gateway closed before hello");
        };
        if let WsMessage::Text(text) = msg? {
            let payload: GatewayPayload = serde_json::from_str(&text).context("decode hello")?;
            if payload.op == opcode::HELLO {
                break serde_json::from_value::<Hello>(payload.d).context("decode hello")?;
            }
        }
    };

    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(hello.heartbeat_interval.max(1)));
    // First tick completes immediately.
    heartbeat.tick().await;

    let current = presence.borrow_and_update().to_presence();
    send_json(&mut sink, &model::identify(token, &current)).await?;

    let mut seq: Option<u64> = None;
    let mut acked = true;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !acked {
                    anyhow::bail!("heartbeat not acknowledged");
                }
                acked = false;
                send_json(&mut sink, &model::heartbeat(seq)).await?;
            }
            Ok(()) = presence.changed() => {
                let next = presence.borrow_and_update().to_presence();
                tracing::debug!(activity = %next.activity, "sending presence update");
                send_json(&mut sink, &model::presence_update(&next)).await?;
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    return Ok(());
                };
                match msg? {
                    WsMessage::Text(text) => {
                        let payload = match serde_json::from_str::<GatewayPayload>(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::debug!(error = %e, "ignoring undecodable gateway frame");
                                continue;
                            }
                        };
                        if payload.s.is_some() {
                            seq = payload.s;
                        }
                        match payload.op {
                            opcode::DISPATCH => dispatch(payload, events).await?,
                            opcode::HEARTBEAT => {
                                send_json(&mut sink, &model::heartbeat(seq)).await?;
                            }
                            opcode::HEARTBEAT_ACK => acked = true,
                            opcode::RECONNECT => {
                                tracing::info!("gateway requested reconnect");
                                return Ok(());
                            }
                            opcode::INVALID_SESSION => anyhow::bail!("gateway invalidated session"),
                            _ => {}
                        }
                    }
                    WsMessage::Close(frame) => {
                        if let Some(frame) = frame {
                            let code = u16::from(frame.code);
                            if code == CLOSE_AUTHENTICATION_FAILED {
                                anyhow::bail!("gateway rejected bot token");
                            }
                            tracing::info!(code, reason = %frame.reason, "gateway sent close");
                        }
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn dispatch(
    payload: GatewayPayload,
    events: &mpsc::Sender<MessageCreate>,
) -> anyhow::Result<()> {
    match payload.t.as_deref() {
        Some("READY") => {
            if let Ok(ready) = serde_json::from_value::<Ready>(payload.d) {
                tracing::info!(user = %ready.user.username, id = %ready.user.id, "gateway ready");
            }
        }
        Some("MESSAGE_CREATE") => match serde_json::from_value::<MessageCreate>(payload.d) {
            Ok(msg) if msg.author.bot => {}
            Ok(msg) => {
                events
                    .send(msg)
                    .await
                    .map_err(|_| anyhow::anyhow!("command router stopped"))?;
            }
            Err(e) => tracing::debug!(error = %e, "skipping malformed MESSAGE_CREATE"),
        },
        _ => {}
    }
    Ok(())
}
