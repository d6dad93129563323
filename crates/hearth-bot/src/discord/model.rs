use serde::Deserialize;
use serde_json::{Value, json};

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const PRESENCE_UPDATE: u8 = 3;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

const GUILD_MESSAGES: u64 = 1 << 9;
const DIRECT_MESSAGES: u64 = 1 << 12;
const MESSAGE_CONTENT: u64 = 1 << 15;

pub const INTENTS: u64 = GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT;

/// Activity type 0 renders as "Playing <name>".
const ACTIVITY_PLAYING: u8 = 0;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub user: Author,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    pub author: Author,
}

/// Presence payload body (`d` of op 3, `presence` of identify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub activity: String,
    pub status: &'static str,
}

impl Presence {
    pub fn to_value(&self) -> Value {
        json!({
            "since": null,
            "activities": [{ "name": self.activity, "type": ACTIVITY_PLAYING }],
            "status": self.status,
            "afk": false,
        })
    }
}

pub fn identify(token: &str, presence: &Presence) -> Value {
    json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "hearth",
                "device": "hearth",
            },
            "presence": presence.to_value(),
        }
    })
}

pub fn heartbeat(seq: Option<u64>) -> Value {
    json!({ "op": opcode::HEARTBEAT, "d": seq })
}

pub fn presence_update(presence: &Presence) -> Value {
    json!({ "op": opcode::PRESENCE_UPDATE, "d": presence.to_value() })
}
