//! Chat-service collaborator: where the product-update posts come from and
//! where the processed marker is written back.

use crate::error::{ChangelogError, Result};
use crate::media::{MediaDescriptor, MediaKind};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;

const PAGE_LIMIT: u32 = 200;

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    /// Private download URL. Absent for files the bot may not read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Attachment {
    /// Descriptor for caching this attachment under `date`, or `None` when
    /// there is nothing to download.
    pub fn descriptor(&self, date: NaiveDate) -> Option<MediaDescriptor> {
        let url = self.url.as_ref()?;
        Some(MediaDescriptor {
            remote_id: self.id.clone(),
            url: url.clone(),
            suggested_name: self.name.clone(),
            kind: MediaKind::detect(self.mimetype.as_deref(), &self.name),
            date,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub ts: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub replies: Vec<SourceMessage>,
    #[serde(default)]
    pub already_processed: bool,
}

impl SourceMessage {
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        parse_ts(&self.ts)
    }

    /// Attachments of this message followed by those of its replies.
    pub fn all_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .chain(self.replies.iter().flat_map(|r| r.attachments.iter()))
    }
}

/// `"1736937000.000100"` -> UTC instant.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = format!("{frac:0<6}").get(..6)?.parse().ok()?;
    DateTime::from_timestamp(secs, micros * 1000)
}

fn format_ts(at: DateTime<Utc>) -> String {
    format!("{}.{:06}", at.timestamp(), at.timestamp_subsec_micros())
}

// ---------------------------------------------------------------------------
// ChatService
// ---------------------------------------------------------------------------

pub trait ChatService: Send + Sync {
    /// Top-level messages posted in `[since, until]`, oldest first, each with
    /// permalink, thread replies and processed flag resolved.
    fn list_recent_messages(
        &self,
        channel: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<SourceMessage>>> + Send;

    /// Attach the processed marker to message `ts`. Marking twice is not an
    /// error.
    fn mark_processed(&self, channel: &str, ts: &str) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    body: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<RawMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    permalink: String,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct RawMessage {
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    reply_count: u32,
    #[serde(default)]
    files: Vec<RawFile>,
    #[serde(default)]
    reactions: Vec<RawReaction>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mimetype: Option<String>,
    #[serde(default)]
    url_private: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReaction {
    name: String,
}

impl RawMessage {
    fn has_reaction(&self, name: &str) -> bool {
        self.reactions.iter().any(|r| r.name == name)
    }

    fn into_source(self, reaction: &str) -> SourceMessage {
        let already_processed = self.has_reaction(reaction);
        let attachments = self
            .files
            .into_iter()
            .map(|f| {
                if f.url_private.is_none() {
                    tracing::warn!(file_id = %f.id, "file has no private url; it will not be downloaded");
                }
                Attachment {
                    name: f.name.unwrap_or_else(|| "unknown".to_string()),
                    id: f.id,
                    mimetype: f.mimetype,
                    url: f.url_private,
                }
            })
            .collect();
        SourceMessage {
            ts: self.ts,
            user: self.user.unwrap_or_else(|| "unknown".to_string()),
            text: self.text,
            permalink: None,
            attachments,
            replies: Vec::new(),
            already_processed,
        }
    }
}

// ---------------------------------------------------------------------------
// SlackClient
// ---------------------------------------------------------------------------

pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    processed_reaction: String,
}

impl SlackClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        processed_reaction: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            processed_reaction: processed_reaction.into(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let req = self
            .http
            .get(format!("{}/{method}", self.base_url))
            .query(query);
        self.call(method, req).await
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let req = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .json(&body);
        self.call(method, req).await
    }

    /// Transport and status failures are reported as Slack errors naming the
    /// method, the same as an `ok: false` envelope.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T> {
        let failed = |e: reqwest::Error| ChangelogError::slack(format!("{method}: {e}"));
        let resp = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(failed)?
            .error_for_status()
            .map_err(failed)?;
        unwrap_envelope(method, resp.json().await.map_err(failed)?)
    }

    async fn history(
        &self,
        channel: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawMessage>> {
        let oldest = format_ts(since);
        let latest = format_ts(until);
        let limit = PAGE_LIMIT.to_string();
        let mut cursor = String::new();
        let mut out = Vec::new();

        loop {
            let mut query = vec![
                ("channel", channel),
                ("oldest", oldest.as_str()),
                ("latest", latest.as_str()),
                ("inclusive", "true"),
                ("limit", limit.as_str()),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }
            let page: HistoryPage = self.get("conversations.history", &query).await?;
            out.extend(page.messages);
            cursor = page
                .response_metadata
                .map(|m| m.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }
        Ok(out)
    }

    async fn permalink(&self, channel: &str, ts: &str) -> Option<String> {
        let result: Result<Permalink> = self
            .get("chat.getPermalink", &[("channel", channel), ("message_ts", ts)])
            .await;
        match result {
            Ok(p) => Some(p.permalink),
            Err(e) => {
                tracing::warn!(ts, error = %e, "could not fetch permalink");
                None
            }
        }
    }

    /// Replies in the thread rooted at `thread_ts`, parent excluded.
    async fn replies(&self, channel: &str, thread_ts: &str) -> Result<Vec<SourceMessage>> {
        let page: HistoryPage = self
            .get("conversations.replies", &[("channel", channel), ("ts", thread_ts)])
            .await?;
        let mut replies = Vec::new();
        for raw in page.messages.into_iter().filter(|m| m.ts != thread_ts) {
            let mut reply = raw.into_source(&self.processed_reaction);
            reply.permalink = self.permalink(channel, &reply.ts).await;
            replies.push(reply);
        }
        Ok(replies)
    }
}

fn unwrap_envelope<T>(method: &str, envelope: Envelope<T>) -> Result<T> {
    if !envelope.ok {
        let code = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
        return Err(ChangelogError::slack(format!("{method}: {code}")));
    }
    envelope
        .body
        .ok_or_else(|| ChangelogError::slack(format!("{method}: empty response body")))
}

impl ChatService for SlackClient {
    async fn list_recent_messages(
        &self,
        channel: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<SourceMessage>> {
        tracing::info!(
            channel,
            from = %since.format("%Y-%m-%d"),
            to = %until.format("%Y-%m-%d"),
            "fetching messages"
        );
        let raw = self.history(channel, since, until).await?;

        let mut messages = Vec::with_capacity(raw.len());
        for msg in raw {
            let thread = msg
                .thread_ts
                .clone()
                .filter(|t| *t == msg.ts && msg.reply_count > 0);
            let mut source = msg.into_source(&self.processed_reaction);
            source.permalink = self.permalink(channel, &source.ts).await;
            if let Some(thread_ts) = thread {
                source.replies = match self.replies(channel, &thread_ts).await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(ts = %thread_ts, error = %e, "could not fetch thread replies");
                        Vec::new()
                    }
                };
            }
            messages.push(source);
        }

        // History arrives newest first.
        messages.sort_by_key(|m| m.posted_at());
        tracing::info!(count = messages.len(), "fetched messages");
        Ok(messages)
    }

    async fn mark_processed(&self, channel: &str, ts: &str) -> Result<()> {
        let body = json!({
            "channel": channel,
            "timestamp": ts,
            "name": self.processed_reaction,
        });
        match self.post::<Empty>("reactions.add", body).await {
            Ok(_) => Ok(()),
            Err(ChangelogError::ExternalService { message, .. })
                if message.ends_with("already_reacted") =>
            {
                tracing::debug!(ts, "message already marked");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
