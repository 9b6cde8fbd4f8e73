use crate::error::{ChangelogError, Result};
use crate::media::{DEFAULT_CONCURRENCY, DEFAULT_MAX_FILE_SIZE};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SlackConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Used when `SLACK_CHANNEL_ID` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default = "default_slack_api")]
    pub api_url: String,
    #[serde(default = "default_days_back")]
    pub days_back: u32,
    /// Reaction name (without colons) marking a message as incorporated.
    #[serde(default = "default_reaction")]
    pub processed_reaction: String,
}

fn default_slack_api() -> String {
    "https://slack.com/api".to_string()
}

fn default_days_back() -> u32 {
    14
}

fn default_reaction() -> String {
    "white_check_mark".to_string()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            channel_id: None,
            api_url: default_slack_api(),
            days_back: default_days_back(),
            processed_reaction: default_reaction(),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_concurrency")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_concurrency(),
            max_file_size: default_max_file_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_writer_model")]
    pub writer: String,
    #[serde(default = "default_strong_model")]
    pub formatter: String,
    #[serde(default = "default_strong_model")]
    pub reviewer: String,
}

fn default_writer_model() -> String {
    "sonnet".to_string()
}

fn default_strong_model() -> String {
    "opus".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            writer: default_writer_model(),
            formatter: default_strong_model(),
            reviewer: default_strong_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
    /// Explicit path to the `claude` binary; otherwise looked up on `PATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_path: Option<String>,
}

fn default_max_turns() -> u32 {
    20
}

fn default_permission_mode() -> String {
    "bypassPermissions".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            max_turns: default_max_turns(),
            permission_mode: default_permission_mode(),
            claude_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// GitHubConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api")]
    pub api_url: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_true")]
    pub draft: bool,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_docs_json")]
    pub docs_json: String,
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_labels() -> Vec<String> {
    ["bot", "automated-pr", "needs-review", "changelog"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_docs_json() -> String {
    paths::DOCS_JSON.to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api(),
            base_branch: default_base_branch(),
            draft: default_true(),
            labels: default_labels(),
            docs_json: default_docs_json(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Contents of `changelog.yaml`. Every field has a default, so the file is
/// optional and may be partial.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub github: GitHubConfig,
}

impl Config {
    /// Load `changelog.yaml` from `root`, or the defaults if it does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.slack.days_back == 0 {
            warnings.push(ConfigWarning::error(
                "slack.days_back is 0; no messages would ever be fetched",
            ));
        }
        if self.slack.processed_reaction.trim().is_empty() {
            warnings.push(ConfigWarning::error("slack.processed_reaction is empty"));
        } else if self.slack.processed_reaction.contains(':') {
            warnings.push(ConfigWarning::warning(format!(
                "slack.processed_reaction '{}' should be given without colons",
                self.slack.processed_reaction
            )));
        }

        if self.media.max_concurrent_downloads == 0 {
            warnings.push(ConfigWarning::warning(
                "media.max_concurrent_downloads is 0; downloads will run one at a time",
            ));
        }
        if self.media.max_file_size == 0 {
            warnings.push(ConfigWarning::error(
                "media.max_file_size is 0; every download would be rejected",
            ));
        }

        for (stage, model) in [
            ("writer", &self.agent.models.writer),
            ("formatter", &self.agent.models.formatter),
            ("reviewer", &self.agent.models.reviewer),
        ] {
            if model.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "agent.models.{stage} is empty"
                )));
            }
        }
        if self.agent.max_turns == 0 {
            warnings.push(ConfigWarning::error("agent.max_turns is 0"));
        }

        if self.github.base_branch.trim().is_empty() {
            warnings.push(ConfigWarning::error("github.base_branch is empty"));
        }
        if self.github.docs_json.trim().is_empty() {
            warnings.push(ConfigWarning::warning(
                "github.docs_json is empty; navigation will not be updated",
            ));
        }
        if self.github.labels.iter().any(|l| l.trim().is_empty()) {
            warnings.push(ConfigWarning::warning("github.labels contains an empty label"));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

pub const ENV_SLACK_TOKEN: &str = "SLACK_TOKEN";
pub const ENV_SLACK_CHANNEL: &str = "SLACK_CHANNEL_ID";
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_GITHUB_REPO: &str = "GITHUB_REPO";
pub const ENV_MODEL: &str = "CHANGELOG_MODEL";

/// Secrets and identifiers that only ever come from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub slack_token: String,
    pub slack_channel: String,
    pub github_token: String,
    /// `owner/name`
    pub github_repo: String,
    /// Overrides every stage model when set.
    pub model_override: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("slack_token", &"<redacted>")
            .field("slack_channel", &self.slack_channel)
            .field("github_token", &"<redacted>")
            .field("github_repo", &self.github_repo)
            .field("model_override", &self.model_override)
            .finish()
    }
}

impl Credentials {
    pub fn from_env(config: &Config) -> Result<Self> {
        Self::from_lookup(config, |key| std::env::var(key).ok())
    }

    /// Resolve credentials through `lookup`. Every missing variable is
    /// reported in one error.
    pub fn from_lookup<F>(config: &Config, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut missing = Vec::new();

        let mut require = |key: &'static str, value: Option<String>| {
            value.unwrap_or_else(|| {
                missing.push(key);
                String::new()
            })
        };

        let slack_token = require(ENV_SLACK_TOKEN, get(ENV_SLACK_TOKEN));
        let slack_channel = require(
            ENV_SLACK_CHANNEL,
            get(ENV_SLACK_CHANNEL).or_else(|| config.slack.channel_id.clone()),
        );
        let github_token = require(ENV_GITHUB_TOKEN, get(ENV_GITHUB_TOKEN));
        let github_repo = require(ENV_GITHUB_REPO, get(ENV_GITHUB_REPO));

        if !missing.is_empty() {
            return Err(ChangelogError::MissingConfig(missing.join(", ")));
        }
        if !github_repo.contains('/') {
            return Err(ChangelogError::MissingConfig(format!(
                "{ENV_GITHUB_REPO} must be 'owner/name', got '{github_repo}'"
            )));
        }

        Ok(Self {
            slack_token,
            slack_channel,
            github_token,
            github_repo,
            model_override: get(ENV_MODEL),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.slack.days_back, 14);
        assert_eq!(cfg.slack.processed_reaction, "white_check_mark");
        assert_eq!(cfg.media.max_concurrent_downloads, 5);
        assert_eq!(cfg.media.max_file_size, 100 * 1024 * 1024);
        assert_eq!(cfg.agent.models.writer, "sonnet");
        assert_eq!(cfg.agent.models.reviewer, "opus");
        assert!(cfg.github.draft);
        assert_eq!(cfg.github.labels.len(), 4);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("changelog.yaml"),
            "slack:\n  days_back: 7\nagent:\n  models:\n    writer: haiku\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.slack.days_back, 7);
        assert_eq!(cfg.slack.api_url, "https://slack.com/api");
        assert_eq!(cfg.agent.models.writer, "haiku");
        assert_eq!(cfg.agent.models.formatter, "opus");
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.github.draft = false;
        cfg.slack.channel_id = Some("C123".into());
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert!(!loaded.github.draft);
        assert_eq!(loaded.slack.channel_id.as_deref(), Some("C123"));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("changelog.yaml"), "slack: [unclosed").unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ChangelogError::Yaml(_))
        ));
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.media.max_concurrent_downloads = 0;
        cfg.agent.models.reviewer = " ".into();
        cfg.slack.processed_reaction = ":white_check_mark:".into();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("reviewer")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("one at a time")));
    }

    #[test]
    fn credentials_report_every_missing_variable() {
        let err = Credentials::from_lookup(&Config::default(), env(&[("SLACK_TOKEN", "x")]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("SLACK_CHANNEL_ID"));
        assert!(msg.contains("GITHUB_TOKEN"));
        assert!(msg.contains("GITHUB_REPO"));
        assert!(!msg.contains("SLACK_TOKEN,"));
    }

    #[test]
    fn channel_falls_back_to_config() {
        let mut cfg = Config::default();
        cfg.slack.channel_id = Some("C999".into());
        let creds = Credentials::from_lookup(
            &cfg,
            env(&[
                ("SLACK_TOKEN", "xoxb"),
                ("GITHUB_TOKEN", "ghp"),
                ("GITHUB_REPO", "acme/docs"),
                ("CHANGELOG_MODEL", "haiku"),
            ]),
        )
        .unwrap();
        assert_eq!(creds.slack_channel, "C999");
        assert_eq!(creds.model_override.as_deref(), Some("haiku"));
        assert!(!format!("{creds:?}").contains("xoxb"));
    }

    #[test]
    fn repo_must_be_owner_slash_name() {
        let err = Credentials::from_lookup(
            &Config::default(),
            env(&[
                ("SLACK_TOKEN", "xoxb"),
                ("SLACK_CHANNEL_ID", "C1"),
                ("GITHUB_TOKEN", "ghp"),
                ("GITHUB_REPO", "docs"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, ChangelogError::MissingConfig(m) if m.contains("owner/name")));
    }
}
