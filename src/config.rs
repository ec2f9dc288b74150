//! Configuration for the override watcher.
//!
//! Loaded from TOML with per-section defaults, then optionally overlaid with
//! the environment variables older deployments used (`COURSE_ID`,
//! `CANVAS_TOKEN`, `DISCORD_CHANNEL_ID`, ...).

use crate::auth::Credentials;
use crate::changes::render::{DEFAULT_MAX_CHARS, RenderOptions};
use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Canvas endpoint and credentials.
    pub canvas: CanvasConfig,
    /// Discord notification target.
    pub discord: DiscordConfig,
    /// Poll cadence and notice policy.
    pub poll: PollConfig,
    /// Where state is persisted.
    pub state: StateConfig,
}

/// Canvas API settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    /// Instance root, e.g. `https://utexas.instructure.com`.
    pub base_url: String,
    /// Course whose quiz overrides are watched.
    pub course_id: String,
    /// Page size requested from the API.
    pub per_page: u32,
    /// API access token. Preferred over `cookie`.
    pub token: String,
    /// Raw browser cookie string (`k=v; a=b`).
    pub cookie: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// User-Agent sent with every request.
    pub user_agent: String,
    /// Upper bound on continuation pages followed per cycle.
    pub max_pages: usize,
}

impl std::fmt::Debug for CanvasConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasConfig")
            .field("base_url", &self.base_url)
            .field("course_id", &self.course_id)
            .field("per_page", &self.per_page)
            .field("token", &redact(&self.token))
            .field("cookie", &redact(&self.cookie))
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            base_url: "https://utexas.instructure.com".to_owned(),
            course_id: "1431941".to_owned(),
            per_page: 100,
            token: String::new(),
            cookie: String::new(),
            timeout_secs: 30,
            user_agent: format!("override-watch/{}", env!("CARGO_PKG_VERSION")),
            max_pages: 50,
        }
    }
}

impl CanvasConfig {
    /// `{base_url}/api/v1/courses/{course_id}/quizzes/assignment_overrides?per_page=N`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] if `base_url` is not a valid URL.
    pub fn endpoint_url(&self) -> Result<String> {
        let base = self.base_url.trim_end_matches('/');
        let raw = format!(
            "{base}/api/v1/courses/{}/quizzes/assignment_overrides",
            self.course_id.trim()
        );
        let mut url = url::Url::parse(&raw)
            .map_err(|e| WatchError::Config(format!("invalid canvas base_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("per_page", &self.per_page.to_string());
        Ok(url.into())
    }

    /// Credentials from the configured token/cookie, if any.
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(Some(&self.token), Some(&self.cookie))
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Discord REST settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token.
    pub bot_token: String,
    /// Channel the notices are posted to.
    pub channel_id: String,
    /// REST API root.
    pub api_base: String,
    /// Mention prepended to change notices. Empty for none.
    pub mention: String,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("channel_id", &self.channel_id)
            .field("api_base", &self.api_base)
            .field("mention", &self.mention)
            .finish()
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            channel_id: String::new(),
            api_base: "https://discord.com/api/v10".to_owned(),
            mention: "@everyone".to_owned(),
        }
    }
}

impl DiscordConfig {
    /// Whether a bot token and a non-zero channel id are configured.
    pub fn is_configured(&self) -> bool {
        !self.bot_token.trim().is_empty() && channel_id_is_set(&self.channel_id)
    }
}

fn channel_id_is_set(channel_id: &str) -> bool {
    let trimmed = channel_id.trim();
    !trimmed.is_empty() && trimmed != "0"
}

/// Poll cadence and notification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between the end of one cycle and the start of the next.
    pub interval_secs: u64,
    /// Minimum seconds between two "nothing changed" notices.
    pub no_change_cooldown_secs: u64,
    /// Character cap for change notices.
    pub max_message_chars: usize,
    /// Text of the "nothing changed" notice.
    pub no_change_message: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            no_change_cooldown_secs: 120,
            max_message_chars: DEFAULT_MAX_CHARS,
            no_change_message: "Nothing changed.".to_owned(),
        }
    }
}

impl PollConfig {
    /// Poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// No-change cooldown.
    pub fn no_change_cooldown(&self) -> Duration {
        Duration::from_secs(self.no_change_cooldown_secs)
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding snapshot, etag and notice timestamp files.
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".canvas_state"),
        }
    }
}

fn redact(s: &str) -> &str {
    if s.is_empty() { "" } else { "[REDACTED]" }
}

impl WatchConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| WatchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::watch_dirs::config_file()
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`. Unparseable numbers are ignored with a warning.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        if let Some(v) = get("COURSE_ID") {
            self.canvas.course_id = v;
        }
        if let Some(v) = get("CANVAS_BASE_URL") {
            self.canvas.base_url = v;
        }
        if let Some(v) = get("PER_PAGE") {
            match v.parse() {
                Ok(n) => self.canvas.per_page = n,
                Err(_) => tracing::warn!("ignoring non-numeric PER_PAGE={v}"),
            }
        }
        if let Some(v) = get("CANVAS_TOKEN") {
            self.canvas.token = v;
        }
        if let Some(v) = get("COOKIES_JSON") {
            self.canvas.cookie = v;
        }
        if let Some(v) = get("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = v;
        }
        if let Some(v) = get("DISCORD_CHANNEL_ID") {
            self.discord.channel_id = v;
        }
        if let Some(v) = get("INTERVAL_SEC") {
            match v.parse() {
                Ok(n) => self.poll.interval_secs = n,
                Err(_) => tracing::warn!("ignoring non-numeric INTERVAL_SEC={v}"),
            }
        }
        if let Some(v) = get("STATE_DIR") {
            self.state.dir = PathBuf::from(v);
        }
    }

    /// Check values a watcher cannot run with.
    ///
    /// Missing Canvas credentials are not an error here: cycles are skipped
    /// until credentials are supplied.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.canvas.course_id.trim().is_empty() {
            return Err(WatchError::Config("canvas.course_id must be set".into()));
        }
        if self.canvas.per_page == 0 {
            return Err(WatchError::Config(
                "canvas.per_page must be greater than 0".into(),
            ));
        }
        if self.canvas.timeout_secs == 0 {
            return Err(WatchError::Config(
                "canvas.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.canvas.max_pages == 0 {
            return Err(WatchError::Config(
                "canvas.max_pages must be greater than 0".into(),
            ));
        }
        self.canvas.endpoint_url()?;
        if self.poll.interval_secs == 0 {
            return Err(WatchError::Config(
                "poll.interval_secs must be greater than 0".into(),
            ));
        }
        if self.poll.max_message_chars == 0 {
            return Err(WatchError::Config(
                "poll.max_message_chars must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), and additionally require a usable
    /// Discord target.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] when the bot token or channel id is missing.
    pub fn validate_for_discord(&self) -> Result<()> {
        self.validate()?;
        if self.discord.bot_token.trim().is_empty() {
            return Err(WatchError::Config("discord.bot_token must be set".into()));
        }
        if !channel_id_is_set(&self.discord.channel_id) {
            return Err(WatchError::Config("discord.channel_id must be set".into()));
        }
        Ok(())
    }

    /// Render options derived from the Discord and poll sections.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            mention: self.discord.mention.clone(),
            target_label: self.canvas.course_id.clone(),
            max_chars: self.poll.max_message_chars,
        }
    }
}
