pub mod commands;
pub mod config;
pub mod discord;
pub mod keepalive;
pub mod logging;
pub mod presence;

#[cfg(test)]
mod testing;
