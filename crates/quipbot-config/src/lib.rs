//! Quipbot Configuration
//!
//! TOML configuration loading with environment variable support

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const TELEGRAM_TOKEN_ENV: &str = "QUIPBOT_TELEGRAM_TOKEN";

const DEFAULT_BOT_NAME: &str = "Quipbot";
const MAX_POLL_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub quiz: QuizConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
    pub bot_name: Option<String>,
}

impl CoreConfig {
    pub fn bot_name(&self) -> &str {
        self.bot_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_BOT_NAME)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Bot username, used to accept `/command@username` in groups.
    #[serde(default)]
    pub bot_username: Option<String>,
    #[serde(default)]
    pub allowed_chats: Option<Vec<i64>>,
    pub poll_timeout_secs: Option<u64>,
    pub client_recreate_interval_secs: Option<u64>,
}

impl TelegramConfig {
    pub fn account_tag(&self) -> String {
        telegram_account_tag(&self.bot_token)
    }

    pub fn bot_username(&self) -> Option<String> {
        self.bot_username
            .as_deref()
            .map(str::trim)
            .map(|value| value.trim_start_matches('@').to_lowercase())
            .filter(|value| !value.is_empty())
    }
}

/// Endpoint overrides for the content providers. Unset fields fall back to
/// the public defaults baked into `quipbot-providers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    pub joke_url: Option<String>,
    pub weather_url: Option<String>,
    pub quote_url: Option<String>,
    pub cat_url: Option<String>,
    pub dog_url: Option<String>,
    pub trivia_url: Option<String>,
    pub qr_url: Option<String>,
    pub shorten_url: Option<String>,
    pub timezone_url: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provider_timeout_secs(),
            joke_url: None,
            weather_url: None,
            quote_url: None,
            cat_url: None,
            dog_url: None,
            trivia_url: None,
            qr_url: None,
            shorten_url: None,
            timezone_url: None,
        }
    }
}

impl ProvidersConfig {
    fn overrides(&self) -> [(&'static str, Option<&String>); 9] {
        [
            ("joke_url", self.joke_url.as_ref()),
            ("weather_url", self.weather_url.as_ref()),
            ("quote_url", self.quote_url.as_ref()),
            ("cat_url", self.cat_url.as_ref()),
            ("dog_url", self.dog_url.as_ref()),
            ("trivia_url", self.trivia_url.as_ref()),
            ("qr_url", self.qr_url.as_ref()),
            ("shorten_url", self.shorten_url.as_ref()),
            ("timezone_url", self.timezone_url.as_ref()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    /// Seconds an unanswered quiz stays answerable.
    #[serde(default = "default_quiz_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_quiz_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandsConfig {
    #[serde(default)]
    pub case_insensitive: bool,
}

pub fn telegram_account_tag(bot_token: &str) -> String {
    let token = bot_token.trim();
    token.split(':').next().unwrap_or(token).trim().to_string()
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_quiz_ttl_secs() -> u64 {
    600
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("quipbot").join("config.toml"))
    }

    pub fn default_data_dir() -> std::path::PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".quipbot"))
            .unwrap_or_else(|| std::path::PathBuf::from(".quipbot"))
    }

    pub fn data_dir(&self) -> std::path::PathBuf {
        match self.core.data_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => expand_home(dir),
            _ => Self::default_data_dir(),
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(TELEGRAM_TOKEN_ENV) {
            self.apply_token_override(&token);
        }
    }

    fn apply_token_override(&mut self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            return;
        }
        self.telegram
            .get_or_insert_with(TelegramConfig::default)
            .bot_token = token.to_string();
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(telegram) = &self.telegram {
            let token = telegram.bot_token.trim();
            if token.is_empty() {
                anyhow::bail!(
                    "telegram.bot_token cannot be empty (set it in config or via {})",
                    TELEGRAM_TOKEN_ENV
                );
            }
            if !token.contains(':') || telegram.account_tag().is_empty() {
                anyhow::bail!("telegram.bot_token has invalid format (expected '<id>:<secret>')");
            }
            if let Some(timeout) = telegram.poll_timeout_secs {
                if timeout == 0 || timeout > MAX_POLL_TIMEOUT_SECS {
                    anyhow::bail!(
                        "telegram.poll_timeout_secs must be in range 1..={}",
                        MAX_POLL_TIMEOUT_SECS
                    );
                }
            }
            if let Some(interval) = telegram.client_recreate_interval_secs {
                if interval == 0 {
                    anyhow::bail!("telegram.client_recreate_interval_secs must be > 0");
                }
            }
        }

        if self.providers.timeout_secs == 0 {
            anyhow::bail!("providers.timeout_secs must be > 0");
        }
        for (field, value) in self.providers.overrides() {
            if let Some(url) = value {
                let url = url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("providers.{} must be an http(s) URL, got '{}'", field, url);
                }
            }
        }

        if self.quiz.ttl_secs == 0 {
            anyhow::bail!("quiz.ttl_secs must be > 0");
        }

        if let Some(level) = self.core.log_level.as_deref() {
            if level.trim().is_empty() {
                anyhow::bail!("core.log_level cannot be empty when set");
            }
        }

        Ok(())
    }
}

fn expand_home(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    std::path::PathBuf::from(path)
}
