//! Minimal Discord client: a gateway connection for inbound messages and
//! presence, plus REST for replies.

pub mod gateway;
pub mod model;
pub mod rest;

pub use model::{MessageCreate, Presence};
pub use rest::DiscordHttp;
