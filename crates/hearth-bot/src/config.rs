use std::fmt;
use std::time::Duration;

use hearth_session::aternos::DEFAULT_BASE_URL;
use hearth_session::bypass::DEFAULT_ENDPOINT;
use hearth_session::{AcquirePolicy, BypassConfig, Credentials};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub credentials: Credentials,
    pub bypass: BypassConfig,
    pub acquire_policy: AcquirePolicy,
    pub aternos_base_url: Url,
    pub port: u16,
    pub command_prefix: String,
    pub poll_interval: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"<redacted>")
            .field("credentials", &self.credentials)
            .field("bypass", &self.bypass)
            .field("acquire_policy", &self.acquire_policy)
            .field("aternos_base_url", &self.aternos_base_url.as_str())
            .field("port", &self.port)
            .field("command_prefix", &self.command_prefix)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any `name -> value` source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |name: &str| {
            get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let discord_token = required("DISCORD_TOKEN")?;
        let user = required("ATERNOS_USER")?;
        // Passwords may legitimately start or end with spaces.
        let password = get("ATERNOS_PASS")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("ATERNOS_PASS"))?;
        let api_key = required("ZENROWS_API_KEY")?;

        let endpoint = parse_url(
            "ZENROWS_URL",
            &lookup("ZENROWS_URL").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        )?;
        let aternos_base_url = parse_url(
            "ATERNOS_BASE_URL",
            &lookup("ATERNOS_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )?;
        let target_url = match lookup("ATERNOS_LOGIN_URL") {
            Some(v) => parse_url("ATERNOS_LOGIN_URL", &v)?.to_string(),
            None => aternos_base_url
                .join("/login")
                .map_err(|e| ConfigError::Invalid {
                    name: "ATERNOS_BASE_URL",
                    reason: e.to_string(),
                })?
                .to_string(),
        };

        let port = match lookup("PORT") {
            Some(v) => v.parse::<u16>().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: e.to_string(),
            })?,
            None => 8080,
        };

        let command_prefix = lookup("HEARTH_COMMAND_PREFIX").unwrap_or_else(|| "!".to_string());

        let poll_secs = parse_num(&lookup, "HEARTH_POLL_INTERVAL_SECS", 60)?.clamp(10, 3600);
        let acquire_policy = AcquirePolicy {
            max_attempts: parse_num(&lookup, "HEARTH_BYPASS_ATTEMPTS", 2)?.clamp(1, 5) as u32,
            delay: Duration::from_secs(parse_num(&lookup, "HEARTH_BYPASS_DELAY_SECS", 3)?.min(60)),
            timeout: Duration::from_secs(
                parse_num(&lookup, "HEARTH_BYPASS_TIMEOUT_SECS", 60)?.clamp(1, 300),
            ),
        };

        Ok(Self {
            discord_token,
            credentials: Credentials { user, password },
            bypass: BypassConfig {
                endpoint,
                api_key,
                target_url,
            },
            acquire_policy,
            aternos_base_url,
            port,
            command_prefix,
            poll_interval: Duration::from_secs(poll_secs),
        })
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

fn parse_num(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name) {
        Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
