/*!
common/src/lib.rs

Shared configuration types for scotusfeed.

This file provides:
- Config data structures (deserialized from TOML), each section with defaults
- An async loader for a TOML config file
- A loader that deep-merges an override file over a default file
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_LISTING_URL: &str = "https://www.law.cornell.edu/supremecourt/text";
pub const DEFAULT_COURTLISTENER_URL: &str = "https://www.courtlistener.com/feed/court/scotus/";
pub const DEFAULT_USER_AGENT: &str = "scotus-rss-bot/1.0 (+https://github.com/)";
pub const DEFAULT_LLM_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.5-flash-lite";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const FALLBACK_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Which listing the fetcher reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Cornell LII "Most Recent Decisions" HTML page
    #[default]
    Cornell,
    /// CourtListener Atom feed for the scotus court
    CourtListener,
}

impl SourceKind {
    pub fn default_url(self) -> &'static str {
        match self {
            SourceKind::Cornell => DEFAULT_LISTING_URL,
            SourceKind::CourtListener => DEFAULT_COURTLISTENER_URL,
        }
    }
}

/// Listing source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Listing page (or Atom feed) URL. Unset: the default for `kind`.
    pub url: Option<String>,
    /// Maximum number of candidates taken from one listing
    pub max_items: usize,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Cornell,
            url: None,
            max_items: 10,
            timeout_seconds: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SourceConfig {
    /// The configured URL, or the default listing of the configured kind.
    pub fn listing_url(&self) -> &str {
        self.url.as_deref().unwrap_or_else(|| self.kind.default_url())
    }
}

/// Remote LLM config (OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteLlmConfig {
    pub api_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for RemoteLlmConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_LLM_API_URL.to_string(),
            api_key_env: None,
            model: DEFAULT_LLM_MODEL.to_string(),
            timeout_seconds: 120,
            max_tokens: 650,
            temperature: 0.2,
        }
    }
}

impl RemoteLlmConfig {
    /// Environment variables consulted for the API key, in order.
    pub fn api_key_envs(&self) -> Vec<String> {
        match &self.api_key_env {
            Some(name) => vec![name.clone()],
            None => vec![DEFAULT_API_KEY_ENV.to_string(), FALLBACK_API_KEY_ENV.to_string()],
        }
    }
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LlmConfig {
    pub remote: RemoteLlmConfig,
}

/// Where the two feed files live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub decisions_path: String,
    pub summaries_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            decisions_path: "public/feed.xml".to_string(),
            summaries_path: "public/summary.xml".to_string(),
        }
    }
}

/// RSS channel metadata for one feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en-us".to_string()
}

/// Channel metadata for both feeds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub decisions: ChannelConfig,
    pub summaries: ChannelConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            decisions: ChannelConfig {
                title: "Supreme Court of the United States - Recent Decisions".to_string(),
                link: DEFAULT_LISTING_URL.to_string(),
                description: "Most recent SCOTUS decisions, generated from Cornell LII.".to_string(),
                language: default_language(),
            },
            summaries: ChannelConfig {
                title: "Supreme Court of the United States - Recent Decisions (Summaries)"
                    .to_string(),
                link: DEFAULT_LISTING_URL.to_string(),
                description:
                    "Background / Holding / Reasoning / Outcome summaries generated from Cornell LII."
                        .to_string(),
                language: default_language(),
            },
        }
    }
}

/// Merge behaviour knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Summarize stored decisions that have no summary entry yet
    pub backfill_missing_summaries: bool,
    /// Cap on the opinion text sent to the model
    pub max_prompt_chars: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            backfill_missing_summaries: true,
            max_prompt_chars: 80_000,
        }
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub llm: LlmConfig,
    pub output: OutputConfig,
    pub channel: ChannelsConfig,
    pub merge: MergeConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence). With neither,
    /// the built-in defaults apply.
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn config_from_string() {
        let toml = r#"
            [source]
            kind = "courtlistener"
            url = "https://www.courtlistener.com/feed/court/scotus/"
            max_items = 5

            [llm.remote]
            api_key_env = "MY_KEY"
            model = "gpt-4o-mini"

            [output]
            summaries_path = "out/summary.xml"
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.source.kind, SourceKind::CourtListener);
        assert_eq!(cfg.source.max_items, 5);
        // unspecified fields keep their defaults
        assert_eq!(cfg.source.timeout_seconds, 60);
        assert_eq!(cfg.llm.remote.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.remote.api_key_envs(), vec!["MY_KEY".to_string()]);
        assert_eq!(cfg.output.decisions_path, "public/feed.xml");
        assert_eq!(cfg.output.summaries_path, "out/summary.xml");
        assert_eq!(cfg.channel.decisions.language, "en-us");
        assert!(cfg.merge.backfill_missing_summaries);
    }

    #[test]
    fn default_api_key_envs_fall_back_to_google() {
        let cfg = Config::default();
        assert_eq!(
            cfg.llm.remote.api_key_envs(),
            vec!["GEMINI_API_KEY".to_string(), "GOOGLE_API_KEY".to_string()]
        );
    }

    #[tokio::test]
    async fn load_with_defaults_merges_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        fs::write(
            &default_path,
            r#"
            [source]
            max_items = 10
            timeout_seconds = 30

            [channel.decisions]
            title = "Default title"
            link = "https://example.com/"
            description = "Default description"
            "#,
        )
        .expect("write default");
        fs::write(
            &override_path,
            r#"
            [source]
            max_items = 3

            [channel.decisions]
            title = "Override title"
            "#,
        )
        .expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");
        assert_eq!(cfg.source.max_items, 3);
        assert_eq!(cfg.source.timeout_seconds, 30);
        assert_eq!(cfg.channel.decisions.title, "Override title");
        assert_eq!(cfg.channel.decisions.description, "Default description");
    }

    #[tokio::test]
    async fn load_with_no_files_uses_builtin_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let cfg = Config::load_with_defaults(Some(&missing), None)
            .await
            .expect("load config");
        assert_eq!(cfg.source.listing_url(), DEFAULT_LISTING_URL);
        assert_eq!(cfg.source.kind, SourceKind::Cornell);
    }

    #[tokio::test]
    async fn courtlistener_kind_without_url_uses_its_own_feed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");
        fs::write(&default_path, "[source]\nkind = \"cornell\"\nmax_items = 10\n")
            .expect("write default");
        fs::write(&override_path, "[source]\nkind = \"courtlistener\"\n").expect("write override");

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");
        assert_eq!(cfg.source.kind, SourceKind::CourtListener);
        assert_eq!(cfg.source.listing_url(), DEFAULT_COURTLISTENER_URL);

        let explicit = SourceConfig {
            url: Some("https://mirror.example.com/scotus".to_string()),
            ..cfg.source
        };
        assert_eq!(explicit.listing_url(), "https://mirror.example.com/scotus");
    }

    #[tokio::test]
    async fn from_file_reports_missing_file() {
        let err = Config::from_file("/definitely/not/here.toml")
            .await
            .expect_err("missing file must fail");
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
