use crate::config::DiscordConfig;
use crate::error::WatchError;
use crate::notify::Notifier;
use async_trait::async_trait;
use serde_json::json;

/// Posts notices to a Discord channel through the REST API.
pub struct DiscordNotifier {
    bot_token: String,
    channel_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for DiscordNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordNotifier")
            .field("channel_id", &self.channel_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            bot_token: config.bot_token.trim().to_owned(),
            channel_id: config.channel_id.trim().to_owned(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", self.api_base, self.channel_id)
    }

    /// Best-effort check that the bot token is accepted.
    pub async fn health_check(&self) -> crate::Result<bool> {
        if self.bot_token.is_empty() {
            return Ok(false);
        }
        let response = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()
            .await
            .map_err(|e| WatchError::Notifier(format!("discord health check failed: {e}")))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    fn id(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, text: &str) -> crate::Result<()> {
        if self.bot_token.is_empty() {
            return Err(WatchError::Notifier("discord bot token is empty".into()));
        }
        let body = json!({
            "content": text
        });
        let response = self
            .client
            .post(self.messages_url())
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::Notifier(format!("discord request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::Notifier(format!(
                "discord send failed ({status}): {body}"
            )));
        }
        Ok(())
    }
}
