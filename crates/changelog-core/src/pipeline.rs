//! The changelog run: Fetch → Draft → Format → Review → Publish.
//!
//! Each stage is a plain async function from one record to the next, so a
//! stage can be run, tested or resumed on its own. Collaborators come in as
//! trait bounds: [`ChatService`], [`MediaTransfer`], [`Transform`] and
//! [`SourceControl`].

use crate::config::ModelsConfig;
use crate::docs_nav::update_docs_navigation;
use crate::error::{ChangelogError, Result};
use crate::frontmatter::{apply_frontmatter, strip_frontmatter};
use crate::github::{self, CommitFile, PullRequest, PullRequestRef, SourceControl};
use crate::io::{atomic_write, list_dirs, remove_if_exists};
use crate::markdown::{
    drop_missing_media, extract_document, referenced_media, rewrite_media_paths,
    parse_timestamps_comment, strip_emoji_shortcodes, strip_timestamps_comment,
    timestamps_comment,
};
use crate::media::{fetch_media, FetchManifestEntry, FetchOptions, MediaDescriptor, MediaTransfer};
use crate::paths;
use crate::prompts::{self, MediaRef};
use crate::slack::{ChatService, SourceMessage};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Stage / Transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Draft,
    Format,
    Review,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Draft => "draft",
            Stage::Format => "format",
            Stage::Review => "review",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One LLM call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRequest {
    pub stage: Stage,
    pub model: String,
    pub system_prompt: String,
    pub prompt: String,
    pub allowed_tools: Vec<String>,
}

/// Text-to-text capability behind the Draft, Format and Review stages.
pub trait Transform: Send + Sync {
    fn complete(&self, request: StageRequest) -> impl Future<Output = Result<String>> + Send;
}

fn writer_tools() -> Vec<String> {
    // The writer may open cached images to describe them.
    vec!["Read".to_string()]
}

// ---------------------------------------------------------------------------
// Stage records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Fetched {
    pub date: NaiveDate,
    pub since: NaiveDate,
    pub messages: Vec<SourceMessage>,
    /// Messages dropped because they already carry the processed marker.
    pub skipped_processed: usize,
    pub manifest: Vec<FetchManifestEntry>,
}

impl Fetched {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Timestamps of the top-level messages this run incorporates.
    pub fn timestamps(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.ts.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub date: NaiveDate,
    pub timestamps: Vec<String>,
    /// Working draft on disk.
    pub path: PathBuf,
    /// Body without the timestamps header.
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Formatted {
    pub date: NaiveDate,
    pub timestamps: Vec<String>,
    pub path: PathBuf,
    /// Page with frontmatter and published media paths.
    pub page: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reviewed {
    pub date: NaiveDate,
    pub timestamps: Vec<String>,
    /// Final page on disk at the changelog path.
    pub path: PathBuf,
    pub page: String,
    /// Referenced media found locally, by filename.
    pub media: BTreeMap<String, PathBuf>,
    /// Referenced media that could not be found; their lines were removed.
    pub dropped_media: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Published {
    pub branch: String,
    pub commit: String,
    pub pull_request: PullRequestRef,
    pub files: Vec<String>,
    pub marked: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// No unprocessed messages in the window.
    NothingToDo { since: NaiveDate, skipped_processed: usize },
    /// Stopped after Review; nothing pushed, nothing marked.
    DryRun(Reviewed),
    Published(Published),
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub channel: String,
    pub date: NaiveDate,
    /// End of the window.
    pub until: DateTime<Utc>,
    pub days_back: u32,
    pub ignore_processed: bool,
    pub strip_emojis: bool,
    pub media: FetchOptions,
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub channel: String,
    pub base_branch: String,
    pub draft: bool,
    pub labels: Vec<String>,
    pub title: Option<String>,
    /// Repository-relative docs navigation file; empty skips navigation.
    pub docs_json: String,
    /// Local time used for the branch name.
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub fetch: FetchRequest,
    pub models: ModelsConfig,
    pub publish: PublishOptions,
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Remove the working draft for `date` and stray drafts at the project root.
pub fn cleanup(root: &Path, date: NaiveDate) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let candidates = std::iter::once(paths::draft_path(root, date))
        .chain(paths::STRAY_DRAFTS.iter().map(|name| root.join(name)));
    for path in candidates {
        if remove_if_exists(&path)? {
            tracing::info!(path = %path.display(), "removed previous draft");
            removed.push(path);
        }
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

pub async fn fetch<C, T>(chat: &C, transfer: Arc<T>, request: &FetchRequest) -> Result<Fetched>
where
    C: ChatService,
    T: MediaTransfer,
{
    let since = request.until - Duration::days(i64::from(request.days_back));
    let all = chat
        .list_recent_messages(&request.channel, since, request.until)
        .await?;

    let total = all.len();
    let mut messages: Vec<SourceMessage> = all
        .into_iter()
        .filter(|m| request.ignore_processed || !m.already_processed)
        .collect();
    let skipped_processed = total - messages.len();
    if skipped_processed > 0 {
        tracing::info!(skipped = skipped_processed, "skipping already-processed messages");
    }

    if request.strip_emojis {
        for msg in &mut messages {
            msg.text = strip_emoji_shortcodes(&msg.text);
            for reply in &mut msg.replies {
                reply.text = strip_emoji_shortcodes(&reply.text);
            }
        }
    }

    let mut seen = HashSet::new();
    let descriptors: Vec<MediaDescriptor> = messages
        .iter()
        .flat_map(SourceMessage::all_attachments)
        .filter(|a| seen.insert(a.id.clone()))
        .filter_map(|a| a.descriptor(request.date))
        .collect();

    let manifest = fetch_media(&descriptors, &request.media, transfer).await;

    Ok(Fetched {
        date: request.date,
        since: since.date_naive(),
        messages,
        skipped_processed,
        manifest,
    })
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

pub async fn draft<L: Transform>(
    llm: &L,
    root: &Path,
    models: &ModelsConfig,
    fetched: &Fetched,
) -> Result<Draft> {
    let date = fetched.date;
    let media: HashMap<String, MediaRef> = fetched
        .manifest
        .iter()
        .filter(|e| e.is_available())
        .filter_map(|e| {
            let name = e.filename()?;
            Some((
                e.remote_id.clone(),
                MediaRef {
                    kind: e.kind,
                    path: paths::relative_media_path(date, name),
                },
            ))
        })
        .collect();

    let reply = llm
        .complete(StageRequest {
            stage: Stage::Draft,
            model: models.writer.clone(),
            system_prompt: prompts::SYSTEM_PROMPT.to_string(),
            prompt: prompts::writer_prompt(date, fetched.since, &fetched.messages, &media),
            allowed_tools: writer_tools(),
        })
        .await?;

    let body = strip_timestamps_comment(&extract_document(&reply)).trim().to_string();
    if body.is_empty() {
        return Err(ChangelogError::llm("writer returned an empty draft"));
    }

    let timestamps = fetched.timestamps();
    let path = paths::draft_path(root, date);
    write_draft(&path, &timestamps, &body)?;
    tracing::info!(path = %path.display(), messages = timestamps.len(), "wrote draft");

    Ok(Draft {
        date,
        timestamps,
        path,
        body,
    })
}

fn write_draft(path: &Path, timestamps: &[String], body: &str) -> Result<()> {
    let content = format!("{}\n{}\n", timestamps_comment(timestamps), body.trim_end());
    atomic_write(path, content.as_bytes())
}

/// Read a working draft back. The date comes from `date` or, failing that,
/// from the file name (`docs/updates/2025-01-15.md`).
pub fn load_draft(path: &Path, date: Option<NaiveDate>) -> Result<Draft> {
    let date = match date {
        Some(d) => d,
        None => paths::date_from_path(&path.to_string_lossy())?,
    };
    let content = std::fs::read_to_string(path)?;
    let timestamps = parse_timestamps_comment(&content);
    let body = strip_timestamps_comment(&content).trim().to_string();
    if body.is_empty() {
        return Err(ChangelogError::EmptyBody);
    }
    if timestamps.is_empty() {
        tracing::warn!(path = %path.display(), "draft has no message timestamps; nothing will be marked");
    }
    Ok(Draft {
        date,
        timestamps,
        path: path.to_path_buf(),
        body,
    })
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

pub async fn format<L: Transform>(llm: &L, models: &ModelsConfig, draft: &Draft) -> Result<Formatted> {
    let reply = llm
        .complete(StageRequest {
            stage: Stage::Format,
            model: models.formatter.clone(),
            system_prompt: prompts::SYSTEM_PROMPT.to_string(),
            prompt: prompts::formatter_prompt(draft.date, &draft.body),
            allowed_tools: Vec::new(),
        })
        .await?;

    let body = strip_timestamps_comment(&extract_document(&reply));
    let body = rewrite_media_paths(&body, draft.date);
    let page = apply_frontmatter(draft.date, &body)?;

    write_draft(&draft.path, &draft.timestamps, &page)?;
    tracing::info!(path = %draft.path.display(), "formatted draft");

    Ok(Formatted {
        date: draft.date,
        timestamps: draft.timestamps.clone(),
        path: draft.path.clone(),
        page,
    })
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

pub async fn review<L: Transform>(
    llm: &L,
    root: &Path,
    models: &ModelsConfig,
    formatted: &Formatted,
) -> Result<Reviewed> {
    let date = formatted.date;
    let reply = llm
        .complete(StageRequest {
            stage: Stage::Review,
            model: models.reviewer.clone(),
            system_prompt: prompts::SYSTEM_PROMPT.to_string(),
            prompt: prompts::reviewer_prompt(date, &formatted.page),
            allowed_tools: Vec::new(),
        })
        .await?;

    let reviewed = strip_timestamps_comment(&extract_document(&reply));
    let body = rewrite_media_paths(strip_frontmatter(&reviewed), date);

    let wanted = referenced_media(&body, date);
    let media = locate_media(&paths::media_root(root), date, &wanted)?;
    let available: BTreeSet<String> = media.keys().cloned().collect();
    let (body, dropped_media) = drop_missing_media(&body, date, &available);
    if !dropped_media.is_empty() {
        tracing::warn!(
            missing = %dropped_media.join(", "),
            "removed references to media that is not available locally"
        );
    }

    let page = apply_frontmatter(date, &body)?;
    let path = paths::changelog_file(root, date);
    atomic_write(&path, page.as_bytes())?;
    write_draft(&formatted.path, &formatted.timestamps, &page)?;
    tracing::info!(path = %path.display(), media = media.len(), "wrote changelog page");

    Ok(Reviewed {
        date,
        timestamps: formatted.timestamps.clone(),
        path,
        page,
        media,
        dropped_media,
    })
}

/// Find each wanted filename in the day's media directory, falling back to
/// the other day directories (newest first).
fn locate_media(
    media_root: &Path,
    date: NaiveDate,
    wanted: &BTreeSet<String>,
) -> Result<BTreeMap<String, PathBuf>> {
    let day_dir = media_root.join(paths::date_stamp(date));
    let mut dirs = vec![day_dir.clone()];
    let mut others = list_dirs(media_root)?;
    others.retain(|d| *d != day_dir);
    others.reverse();
    dirs.extend(others);

    let mut found = BTreeMap::new();
    for name in wanted {
        if let Some(path) = dirs.iter().map(|d| d.join(name)).find(|p| p.is_file()) {
            found.insert(name.clone(), path);
        }
    }
    Ok(found)
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

pub async fn publish<S, C>(
    scm: &S,
    chat: &C,
    options: &PublishOptions,
    reviewed: &Reviewed,
) -> Result<Published>
where
    S: SourceControl,
    C: ChatService,
{
    let date = reviewed.date;
    let page_path = paths::changelog_path(date);

    let mut files = vec![CommitFile::new(page_path.clone(), reviewed.page.clone())];
    for (name, local) in &reviewed.media {
        let bytes = tokio::fs::read(local).await?;
        files.push(CommitFile::new(paths::published_media_path(date, name), bytes));
    }
    if let Some(nav) = navigation_file(scm, options, date).await {
        files.push(nav);
    }

    let branch = github::branch_name(options.now);
    scm.create_branch(&branch, &options.base_branch).await?;
    let commit = scm
        .commit_files(&branch, &files, &format!("Add changelog for {}", paths::date_stamp(date)))
        .await?;

    let pr = PullRequest {
        title: options
            .title
            .clone()
            .unwrap_or_else(|| github::pr_title(date)),
        head: branch.clone(),
        base: options.base_branch.clone(),
        body: github::pr_body(date, &page_path, reviewed.media.len(), &options.labels),
        draft: options.draft,
        labels: options.labels.clone(),
    };
    let pull_request = scm.open_pull_request(&pr).await?;
    tracing::info!(url = %pull_request.url, "pull request opened");

    let mut failures = Vec::new();
    for ts in &reviewed.timestamps {
        if let Err(e) = chat.mark_processed(&options.channel, ts).await {
            tracing::warn!(ts = %ts, error = %e, "could not mark message processed");
            failures.push(format!("{ts} ({e})"));
        }
    }
    if !failures.is_empty() {
        return Err(ChangelogError::slack(format!(
            "pull request {} opened, but {} message(s) could not be marked processed: {}",
            pull_request.url,
            failures.len(),
            failures.join("; ")
        )));
    }

    Ok(Published {
        branch,
        commit,
        pull_request,
        files: files.into_iter().map(|f| f.path).collect(),
        marked: reviewed.timestamps.len(),
    })
}

/// Updated navigation file, or `None` if it could not be read or updated.
async fn navigation_file<S: SourceControl>(
    scm: &S,
    options: &PublishOptions,
    date: NaiveDate,
) -> Option<CommitFile> {
    if options.docs_json.is_empty() {
        return None;
    }
    let path = &options.docs_json;
    let raw = match scm.read_file(path, &options.base_branch).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            tracing::warn!(path = %path, "navigation file not found; skipping");
            return None;
        }
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "could not read navigation file; skipping");
            return None;
        }
    };
    let updated = String::from_utf8(raw)
        .map_err(|e| e.to_string())
        .and_then(|text| update_docs_navigation(&text, date).map_err(|e| e.to_string()));
    match updated {
        Ok(text) => Some(CommitFile::new(path.clone(), text)),
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "could not update navigation file; skipping");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Run every stage in order. Any failure is reported with the stage it came
/// from.
pub async fn run<C, T, L, S>(
    chat: &C,
    transfer: Arc<T>,
    llm: &L,
    scm: &S,
    options: &RunOptions,
) -> Result<Outcome>
where
    C: ChatService,
    T: MediaTransfer,
    L: Transform,
    S: SourceControl,
{
    let root = options.root.as_path();
    cleanup(root, options.fetch.date).map_err(|e| e.in_stage(Stage::Fetch))?;

    let fetched = fetch(chat, transfer, &options.fetch)
        .await
        .map_err(|e| e.in_stage(Stage::Fetch))?;
    if fetched.is_empty() {
        tracing::info!(since = %fetched.since, "no new messages; nothing to do");
        return Ok(Outcome::NothingToDo {
            since: fetched.since,
            skipped_processed: fetched.skipped_processed,
        });
    }

    let drafted = draft(llm, root, &options.models, &fetched)
        .await
        .map_err(|e| e.in_stage(Stage::Draft))?;
    finish(chat, llm, scm, options, &drafted).await
}

/// Resume a run from a working draft left by an earlier run: Format, Review
/// and Publish only.
pub async fn run_from_draft<C, L, S>(
    chat: &C,
    llm: &L,
    scm: &S,
    options: &RunOptions,
    draft: &Draft,
) -> Result<Outcome>
where
    C: ChatService,
    L: Transform,
    S: SourceControl,
{
    tracing::info!(
        path = %draft.path.display(),
        messages = draft.timestamps.len(),
        "resuming from draft"
    );
    finish(chat, llm, scm, options, draft).await
}

async fn finish<C, L, S>(
    chat: &C,
    llm: &L,
    scm: &S,
    options: &RunOptions,
    drafted: &Draft,
) -> Result<Outcome>
where
    C: ChatService,
    L: Transform,
    S: SourceControl,
{
    let formatted = format(llm, &options.models, drafted)
        .await
        .map_err(|e| e.in_stage(Stage::Format))?;
    let reviewed = review(llm, &options.root, &options.models, &formatted)
        .await
        .map_err(|e| e.in_stage(Stage::Review))?;

    if options.dry_run {
        tracing::info!(path = %reviewed.path.display(), "dry run; stopping before publish");
        return Ok(Outcome::DryRun(reviewed));
    }

    let published = publish(scm, chat, &options.publish, &reviewed)
        .await
        .map_err(|e| e.in_stage(Stage::Publish))?;
    Ok(Outcome::Published(published))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
