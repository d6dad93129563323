use std::time::Duration;

use anyhow::Context;

pub const API_BASE: &str = "https://discord.com/api/v10";

/// Discord rejects message bodies above this many characters.
const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Clone)]
pub struct DiscordHttp {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl std::fmt::Debug for DiscordHttp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttp").field("base", &self.base).finish()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let suffix = "…";
    let keep = max.saturating_sub(suffix.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(suffix);
    out
}

impl DiscordHttp {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        Self::with_base(API_BASE, token)
    }

    pub fn with_base(base: &str, token: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("DiscordBot (hearth, ", env!("CARGO_PKG_VERSION"), ")"))
            .timeout(Duration::from_secs(15))
            .build()
            .context("build discord http client")?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub async fn send_message(&self, channel_id: &str, content: &str) -> anyhow::Result<()> {
        let url = format!("{}/channels/{channel_id}/messages", self.base);
        let body = serde_json::json!({ "content": truncate_chars(content, MAX_CONTENT_CHARS) });

        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(&body)
            .send()
            .await
            .context("post discord message")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("discord message post failed ({status}): {text}");
        }
        Ok(())
    }
}
