use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::prompts::{MESSAGE_PLACEHOLDER, TITLE_PROMPT};
use crate::session::DEFAULT_TOPIC;

pub const URL_ENV: &str = "OLLAMA_CHAT_URL";
pub const MODEL_ENV: &str = "OLLAMA_CHAT_MODEL";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model used for both replies and titles
    pub model: String,

    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,

    pub server: ServerConfig,

    pub title: TitleConfig,
}

/// Where and how to reach the inference server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub generate_path: String,
    /// Whole-request timeout for non-streaming calls
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Longest silence tolerated on a streamed reply: before the response headers
    /// arrive and between body chunks
    pub stream_idle_timeout_secs: u64,
}

/// Auto-titling of new conversations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    pub enabled: bool,
    /// Topic shown until a title is generated
    pub placeholder: String,
    /// Must contain `{message}`
    pub template: String,
    /// List the conversation even if the title request fails
    pub record_on_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            model: "llama3".to_string(),
            log_filter: "warn".to_string(),
            server: ServerConfig::default(),
            title: TitleConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            base_url: "http://localhost:11434".to_string(),
            generate_path: "/api/generate".to_string(),
            timeout_secs: 300,
            connect_timeout_secs: 5,
            stream_idle_timeout_secs: 120,
        }
    }
}

impl Default for TitleConfig {
    fn default() -> Self {
        TitleConfig {
            enabled: true,
            placeholder: DEFAULT_TOPIC.to_string(),
            template: TITLE_PROMPT.to_string(),
            record_on_failure: true,
        }
    }
}

impl ServerConfig {
    pub fn generate_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.generate_path.trim_start_matches('/')
        )
    }
}

impl Config {
    /// `~/.ollama-chat`
    pub fn home_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".ollama-chat"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }
}

/// Server URL and model taken from outside the config file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub url: Option<String>,
    pub model: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var(URL_ENV).ok(),
            model: std::env::var(MODEL_ENV).ok(),
        }
    }
}

impl Config {
    /// Load from the default location. Environment overrides apply first and `cli`
    /// last; the result is validated once.
    pub fn load(cli: Overrides) -> Result<Self> {
        Self::load_layered(&Self::default_path()?, &[Overrides::from_env(), cli])
    }

    pub fn load_layered(path: &Path, layers: &[Overrides]) -> Result<Self> {
        let mut config = Self::load_from(path)?;
        for layer in layers {
            config.apply_overrides(layer.url.clone(), layer.model.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without validating it; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn apply_overrides(&mut self, url: Option<String>, model: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.server.base_url = url.trim().to_string();
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.model = model.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            anyhow::bail!("model must not be empty");
        }
        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "server.base_url must start with http:// or https://, got {:?}",
                self.server.base_url
            );
        }
        if self.title.enabled && !self.title.template.contains(MESSAGE_PLACEHOLDER) {
            anyhow::bail!("title.template must contain {}", MESSAGE_PLACEHOLDER);
        }
        Ok(())
    }
}
