//! Session handling for the hosting account: cookie acquisition through a
//! bypass service, login, and the cached handle of the managed server.

pub mod account;
pub mod aternos;
pub mod bypass;
pub mod manager;
pub mod retry;

pub use account::{AccountClient, AccountError, RemoteServer};
pub use aternos::{AternosClient, AternosServer};
pub use bypass::{AcquirePolicy, BypassConfig, CookieAcquirer, CookieProvider};
pub use manager::{ActionError, Credentials, ServerAction, SessionManager};

pub use hearth_types::{CookieSet, ServerInfo, ServerStatus};
