pub mod config;
pub mod fetch;
pub mod frontmatter;
pub mod path;
pub mod run;

use anyhow::Context;
use changelog_core::config::{Config, Credentials};
use changelog_core::github::GitHubClient;
use changelog_core::media::{FetchOptions, HttpTransfer};
use changelog_core::paths;
use changelog_core::pipeline::FetchRequest;
use changelog_core::slack::SlackClient;
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::Args;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

const USER_AGENT: &str = concat!("changelog-bot/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Shared arguments
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone)]
pub struct WindowArgs {
    /// How many days of messages to consider (default: slack.days_back)
    #[arg(long)]
    pub days_back: Option<u32>,

    /// Include messages already marked as processed
    #[arg(long)]
    pub ignore_processed: bool,

    /// Changelog date (YYYY-MM-DD, default: today)
    #[arg(long)]
    pub date: Option<String>,
}

impl WindowArgs {
    /// Page date and end of the message window. A past date ends its window
    /// at the end of that day; today ends it now.
    fn resolve(&self) -> anyhow::Result<(NaiveDate, DateTime<Utc>)> {
        let now = Utc::now();
        let Some(raw) = self.date.as_deref() else {
            return Ok((Local::now().date_naive(), now));
        };
        let date = paths::parse_date(raw)?;
        let end_of_day = date
            .and_hms_opt(23, 59, 59)
            .context("invalid end of day")?
            .and_utc();
        Ok((date, end_of_day.min(now)))
    }

    pub fn fetch_request(
        &self,
        root: &Path,
        config: &Config,
        channel: &str,
        strip_emojis: bool,
    ) -> anyhow::Result<FetchRequest> {
        let (date, until) = self.resolve()?;
        let mut media = FetchOptions::new(paths::media_root(root));
        media.concurrency = config.media.max_concurrent_downloads;
        Ok(FetchRequest {
            channel: channel.to_string(),
            date,
            until,
            days_back: self.days_back.unwrap_or(config.slack.days_back),
            ignore_processed: self.ignore_processed,
            strip_emojis,
            media,
        })
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

pub struct Services {
    pub slack: SlackClient,
    pub transfer: Arc<HttpTransfer>,
    pub github: GitHubClient,
}

impl Services {
    pub fn new(config: &Config, creds: &Credentials) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            slack: SlackClient::new(
                http.clone(),
                &config.slack.api_url,
                &creds.slack_token,
                &config.slack.processed_reaction,
            ),
            transfer: Arc::new(HttpTransfer::new(
                http.clone(),
                &creds.slack_token,
                config.media.max_file_size,
            )),
            github: GitHubClient::new(
                http,
                &config.github.api_url,
                &creds.github_token,
                &creds.github_repo,
            ),
        })
    }
}

/// Load config and credentials, failing before any network work.
pub fn load_settings(root: &Path) -> anyhow::Result<(Config, Credentials)> {
    let config = Config::load(root).context("failed to load changelog.yaml")?;
    let creds = Credentials::from_env(&config)?;
    Ok((config, creds))
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Drive `fut` to completion from synchronous command code.
pub fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
        Err(_) => {
            let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            Ok(rt.block_on(fut))
        }
    }
}
