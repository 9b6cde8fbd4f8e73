//! Media fetch-and-cache helper.
//!
//! Every attachment of an incorporated message is cached once under
//! `docs/updates/media/<YYYY-MM-DD>/`. A file already on disk is never fetched
//! again; presence alone decides. Transfers run on tokio tasks gated by a
//! semaphore, and the manifest comes back in input order no matter which
//! transfer finishes first.

use crate::error::{ChangelogError, Result};
use crate::paths::date_stamp;
use chrono::NaiveDate;
use futures::StreamExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

const STEM_MAX: usize = 40;
const EXT_MAX: usize = 10;
const HASH_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Descriptor / manifest types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    /// Classify from the upstream mimetype, falling back to the extension.
    pub fn detect(mimetype: Option<&str>, filename: &str) -> Self {
        let guessed;
        let mime = match mimetype.filter(|m| !m.is_empty()) {
            Some(m) => m,
            None => {
                guessed = mime_guess::from_path(filename).first_raw().unwrap_or("");
                guessed
            }
        };
        if mime.starts_with("image/") {
            MediaKind::Image
        } else if mime.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::File
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }
}

/// One remote attachment to cache for the changelog dated `date`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    /// Stable upstream id. URLs carry rotating tokens, ids do not.
    pub remote_id: String,
    pub url: String,
    pub suggested_name: String,
    pub kind: MediaKind,
    pub date: NaiveDate,
}

impl MediaDescriptor {
    /// `<media_root>/<YYYY-MM-DD>/` for this descriptor.
    pub fn target_dir(&self, media_root: &Path) -> PathBuf {
        media_root.join(date_stamp(self.date))
    }

    /// Sanitized, collision-resistant local filename.
    pub fn local_filename(&self) -> Result<String> {
        let clean = sanitize_filename(&self.suggested_name)?;
        let key = if self.remote_id.is_empty() {
            &self.url
        } else {
            &self.remote_id
        };
        Ok(unique_filename(&clean, key))
    }

    /// Full destination path, guaranteed to sit directly inside
    /// [`MediaDescriptor::target_dir`].
    pub fn local_path(&self, media_root: &Path) -> Result<PathBuf> {
        let name = self.local_filename()?;
        let mut components = Path::new(&name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.target_dir(media_root).join(name)),
            _ => Err(ChangelogError::UnsafeFilename(self.suggested_name.clone())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Downloaded,
    AlreadyPresent,
    Failed,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Downloaded => "downloaded",
            FetchStatus::AlreadyPresent => "already-present",
            FetchStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchManifestEntry {
    pub remote_id: String,
    pub original_name: String,
    pub kind: MediaKind,
    /// `None` only when no safe path could be derived.
    pub local_path: Option<PathBuf>,
    pub status: FetchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchManifestEntry {
    fn new(media: &MediaDescriptor, local_path: Option<PathBuf>, status: FetchStatus) -> Self {
        Self {
            remote_id: media.remote_id.clone(),
            original_name: media.suggested_name.clone(),
            kind: media.kind,
            local_path,
            status,
            error: None,
        }
    }

    fn failed(media: &MediaDescriptor, local_path: Option<PathBuf>, err: &ChangelogError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::new(media, local_path, FetchStatus::Failed)
        }
    }

    /// True when the file is on disk after this call.
    pub fn is_available(&self) -> bool {
        self.status != FetchStatus::Failed
    }

    pub fn filename(&self) -> Option<&str> {
        self.local_path
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
    }
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Lowercase ASCII slug: alphanumerics kept, every other run collapsed to a
/// single `-`, trimmed, at most `max_len` bytes.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len().min(max_len));
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(max_len);
    slug.trim_end_matches('-').to_string()
}

/// Filesystem-safe version of an upstream filename.
///
/// Any directory part is discarded, then stem and extension are slugified
/// separately. A stem with nothing left becomes `media`; a name with nothing
/// left in either part is rejected.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let base = name
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (base, ""),
    };
    let stem = slugify(stem, STEM_MAX);
    let ext = slugify(ext, EXT_MAX);

    match (stem.is_empty(), ext.is_empty()) {
        (true, true) => Err(ChangelogError::UnsafeFilename(name.to_string())),
        (true, false) => Ok(format!("media.{ext}")),
        (false, true) => Ok(stem),
        (false, false) => Ok(format!("{stem}.{ext}")),
    }
}

/// Append a short digest of `key` to an already-sanitized filename so two
/// uploads that share a name never share a cache slot.
pub fn unique_filename(sanitized: &str, key: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
    let hash = &digest[..HASH_LEN];
    match sanitized.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_{hash}.{ext}"),
        None => format!("{sanitized}_{hash}"),
    }
}

// ---------------------------------------------------------------------------
// Transfer capability
// ---------------------------------------------------------------------------

/// Moves the bytes of one descriptor to `dest`.
///
/// Implementations own timeouts; the helper imposes no deadline.
pub trait MediaTransfer: Send + Sync + 'static {
    fn transfer(
        &self,
        media: &MediaDescriptor,
        dest: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Authenticated HTTP GET, size-capped, persisted atomically.
pub struct HttpTransfer {
    client: reqwest::Client,
    token: String,
    max_bytes: u64,
}

impl HttpTransfer {
    pub fn new(client: reqwest::Client, token: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            client,
            token: token.into(),
            max_bytes,
        }
    }

    fn error(media: &MediaDescriptor, message: impl Into<String>) -> ChangelogError {
        ChangelogError::Transfer {
            name: media.suggested_name.clone(),
            message: message.into(),
        }
    }
}

impl MediaTransfer for HttpTransfer {
    async fn transfer(&self, media: &MediaDescriptor, dest: &Path) -> Result<()> {
        let resp = self
            .client
            .get(&media.url)
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::error(media, e.to_string()))?;

        if let Some(len) = resp.content_length() {
            if len > self.max_bytes {
                return Err(Self::error(
                    media,
                    format!("{len} bytes exceeds limit of {}", self.max_bytes),
                ));
            }
        }

        let mut body = Vec::new();
        let mut chunks = resp.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| Self::error(media, e.to_string()))?;
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes {
                return Err(Self::error(
                    media,
                    format!("body exceeds limit of {} bytes", self.max_bytes),
                ));
            }
        }

        let dest = dest.to_path_buf();
        let size = body.len();
        tokio::task::spawn_blocking(move || crate::io::atomic_write(&dest, &body))
            .await
            .map_err(|e| Self::error(media, e.to_string()))??;

        tracing::info!(file = %media.suggested_name, bytes = size, "downloaded");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// fetch_media
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub media_root: PathBuf,
    /// Maximum simultaneous transfers. Zero is treated as one.
    pub concurrency: usize,
}

impl FetchOptions {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

enum Slot {
    Settled(FetchManifestEntry),
    Running {
        path: PathBuf,
        handle: JoinHandle<Result<()>>,
    },
}

/// Ensure every descriptor is cached locally, transferring only what is
/// missing. Returns exactly one entry per descriptor, in input order.
///
/// Per-entry failures (unsafe names, transfer errors, even a panicking
/// transfer) are recorded in the manifest and never abort the batch. Failed
/// transfers are not retried.
pub async fn fetch_media<T: MediaTransfer>(
    descriptors: &[MediaDescriptor],
    options: &FetchOptions,
    transfer: Arc<T>,
) -> Vec<FetchManifestEntry> {
    if descriptors.is_empty() {
        return Vec::new();
    }

    let started = Instant::now();
    let workers = options.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut slots = Vec::with_capacity(descriptors.len());

    for media in descriptors {
        let path = match media.local_path(&options.media_root) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(file = %media.suggested_name, error = %e, "skipping media");
                slots.push(Slot::Settled(FetchManifestEntry::failed(media, None, &e)));
                continue;
            }
        };

        if path.exists() {
            tracing::info!(path = %path.display(), "already cached, skipping download");
            slots.push(Slot::Settled(FetchManifestEntry::new(
                media,
                Some(path),
                FetchStatus::AlreadyPresent,
            )));
            continue;
        }

        if let Some(dir) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                let e = ChangelogError::from(e);
                slots.push(Slot::Settled(FetchManifestEntry::failed(media, Some(path), &e)));
                continue;
            }
        }

        let sem = Arc::clone(&semaphore);
        let transfer = Arc::clone(&transfer);
        let owned = media.clone();
        let dest = path.clone();
        let handle = tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.map_err(|_| ChangelogError::Transfer {
                name: owned.suggested_name.clone(),
                message: "transfer pool closed".into(),
            })?;
            transfer.transfer(&owned, &dest).await
        });
        slots.push(Slot::Running { path, handle });
    }

    let mut manifest = Vec::with_capacity(slots.len());
    for (slot, media) in slots.into_iter().zip(descriptors) {
        let entry = match slot {
            Slot::Settled(entry) => entry,
            Slot::Running { path, handle } => {
                let outcome = match handle.await {
                    Ok(r) => r,
                    Err(join) => Err(ChangelogError::Transfer {
                        name: media.suggested_name.clone(),
                        message: format!("transfer task aborted: {join}"),
                    }),
                };
                match outcome {
                    Ok(()) => FetchManifestEntry::new(media, Some(path), FetchStatus::Downloaded),
                    Err(e) => {
                        tracing::warn!(file = %media.suggested_name, error = %e, "download failed");
                        // A partial file would pass as cached on the next run.
                        if let Err(rm) = crate::io::remove_if_exists(&path) {
                            tracing::warn!(path = %path.display(), error = %rm, "could not remove partial download");
                        }
                        FetchManifestEntry::failed(media, Some(path), &e)
                    }
                }
            }
        };
        manifest.push(entry);
    }

    log_summary(&manifest, workers, started);
    manifest
}

fn log_summary(manifest: &[FetchManifestEntry], workers: usize, started: Instant) {
    let count = |s: FetchStatus| manifest.iter().filter(|e| e.status == s).count();
    tracing::info!(
        total = manifest.len(),
        downloaded = count(FetchStatus::Downloaded),
        already_present = count(FetchStatus::AlreadyPresent),
        failed = count(FetchStatus::Failed),
        workers,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "media fetch complete"
    );

    let failed: Vec<&str> = manifest
        .iter()
        .filter(|e| e.status == FetchStatus::Failed)
        .map(|e| e.original_name.as_str())
        .collect();
    if !failed.is_empty() {
        let mut names = failed.iter().take(5).copied().collect::<Vec<_>>().join(", ");
        if failed.len() > 5 {
            names.push_str(&format!(" and {} more", failed.len() - 5));
        }
        tracing::warn!("failed to download {} file(s): {names}", failed.len());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn descriptor(id: &str, name: &str) -> MediaDescriptor {
        MediaDescriptor {
            remote_id: id.into(),
            url: format!("https://files.example.com/{id}/{name}?token=t"),
            suggested_name: name.into(),
            kind: MediaKind::detect(None, name),
            date: date(),
        }
    }

    /// Writes a marker file per call and records which ids it was asked for.
    #[derive(Default)]
    struct RecordingTransfer {
        calls: Mutex<Vec<String>>,
        fail_ids: HashSet<String>,
        delays_ms: std::collections::HashMap<String, u64>,
        completion: Mutex<Vec<String>>,
    }

    impl MediaTransfer for RecordingTransfer {
        async fn transfer(&self, media: &MediaDescriptor, dest: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(media.remote_id.clone());
            if let Some(ms) = self.delays_ms.get(&media.remote_id) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            if self.fail_ids.contains(&media.remote_id) {
                std::fs::write(dest, b"partial").unwrap();
                return Err(ChangelogError::Transfer {
                    name: media.suggested_name.clone(),
                    message: "connection reset".into(),
                });
            }
            std::fs::write(dest, media.remote_id.as_bytes()).unwrap();
            self.completion.lock().unwrap().push(media.remote_id.clone());
            Ok(())
        }
    }

    /// Tracks the peak number of transfers in flight.
    #[derive(Default)]
    struct CountingTransfer {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MediaTransfer for CountingTransfer {
        async fn transfer(&self, _media: &MediaDescriptor, dest: &Path) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            std::fs::write(dest, b"x").unwrap();
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PanickingTransfer;

    impl MediaTransfer for PanickingTransfer {
        async fn transfer(&self, media: &MediaDescriptor, dest: &Path) -> Result<()> {
            if media.remote_id == "boom" {
                panic!("transfer blew up");
            }
            std::fs::write(dest, b"ok").unwrap();
            Ok(())
        }
    }

    fn options(dir: &TempDir, concurrency: usize) -> FetchOptions {
        FetchOptions {
            media_root: dir.path().join("media"),
            concurrency,
        }
    }

    // --- filenames -------------------------------------------------------

    #[test]
    fn sanitizes_awkward_names() {
        assert_eq!(
            sanitize_filename("My Cool File (Final).mp4").unwrap(),
            "my-cool-file-final.mp4"
        );
        assert_eq!(
            sanitize_filename("Screenshot 2025-01-15 @ 3:45 PM.png").unwrap(),
            "screenshot-2025-01-15-3-45-pm.png"
        );
        assert_eq!(sanitize_filename("testfile").unwrap(), "testfile");
    }

    #[test]
    fn non_ascii_stem_falls_back_to_media() {
        assert_eq!(sanitize_filename("北京_上海.jpg").unwrap(), "media.jpg");
    }

    #[test]
    fn traversal_is_neutralised() {
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini").unwrap(), "boot.ini");
        assert_eq!(sanitize_filename("dir/.hidden").unwrap(), "media.hidden");
    }

    #[test]
    fn extensionless_names_keep_only_the_last_component() {
        assert_eq!(sanitize_filename("../dir/readme").unwrap(), "readme");
        assert_eq!(sanitize_filename("a\\b\\Release Notes").unwrap(), "release-notes");
    }

    #[test]
    fn unsalvageable_names_are_rejected() {
        for name in ["", "   ", "../..", "北京", "???"] {
            assert!(
                matches!(sanitize_filename(name), Err(ChangelogError::UnsafeFilename(_))),
                "expected reject: {name:?}"
            );
        }
    }

    #[test]
    fn stem_and_extension_are_capped() {
        let long = format!("{}.{}", "a".repeat(80), "b".repeat(20));
        let clean = sanitize_filename(&long).unwrap();
        let (stem, ext) = clean.rsplit_once('.').unwrap();
        assert_eq!(stem.len(), STEM_MAX);
        assert_eq!(ext.len(), EXT_MAX);
    }

    #[test]
    fn unique_name_is_stable_per_remote_id() {
        let a = descriptor("F12345ABCDE", "My Cool Image.png");
        let mut b = a.clone();
        b.url = "https://files.example.com/other?token=rotated".into();
        assert_eq!(a.local_filename().unwrap(), b.local_filename().unwrap());

        let c = descriptor("F67890FGHIJ", "My Cool Image.png");
        assert_ne!(a.local_filename().unwrap(), c.local_filename().unwrap());
    }

    #[test]
    fn unique_name_falls_back_to_url() {
        let mut a = descriptor("", "image.png");
        let mut b = a.clone();
        a.url = "https://files.example.com/x?token=abc".into();
        b.url = "https://files.example.com/x?token=xyz".into();
        assert_ne!(a.local_filename().unwrap(), b.local_filename().unwrap());
    }

    #[test]
    fn unique_name_has_twelve_char_hash() {
        let name = unique_filename("test.png", "F12345ABCDE");
        let (stem, ext) = name.rsplit_once('.').unwrap();
        assert_eq!(ext, "png");
        let hash = stem.rsplit_once('_').unwrap().1;
        assert_eq!(hash.len(), HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn local_path_is_inside_day_dir() {
        let root = Path::new("/srv/docs/updates/media");
        let path = descriptor("F1", "../../secret.png").local_path(root).unwrap();
        assert!(path.starts_with("/srv/docs/updates/media/2025-01-15"));
        assert_eq!(path.parent().unwrap(), Path::new("/srv/docs/updates/media/2025-01-15"));
    }

    #[test]
    fn detects_kind_from_mime_or_extension() {
        assert_eq!(MediaKind::detect(Some("image/png"), "x"), MediaKind::Image);
        assert_eq!(MediaKind::detect(Some("video/mp4"), "x.png"), MediaKind::Video);
        assert_eq!(MediaKind::detect(None, "clip.mp4"), MediaKind::Video);
        assert_eq!(MediaKind::detect(Some(""), "shot.jpeg"), MediaKind::Image);
        assert_eq!(MediaKind::detect(None, "notes.pdf"), MediaKind::File);
    }

    // --- fetch_media -----------------------------------------------------

    #[tokio::test]
    async fn empty_input_yields_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let transfer = Arc::new(RecordingTransfer::default());
        let manifest = fetch_media(&[], &options(&dir, 5), transfer.clone()).await;
        assert!(manifest.is_empty());
        assert!(transfer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_run_skips_cached_files() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 5);
        let items = vec![descriptor("F1", "shot.png")];

        let transfer = Arc::new(RecordingTransfer::default());
        let first = fetch_media(&items, &opts, transfer.clone()).await;
        assert_eq!(first[0].status, FetchStatus::Downloaded);

        let second = fetch_media(&items, &opts, transfer.clone()).await;
        assert_eq!(second[0].status, FetchStatus::AlreadyPresent);
        assert_eq!(second[0].local_path, first[0].local_path);
        assert_eq!(*transfer.calls.lock().unwrap(), vec!["F1".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn manifest_keeps_input_order() {
        let dir = TempDir::new().unwrap();
        let items = vec![
            descriptor("A", "a.png"),
            descriptor("B", "b.png"),
            descriptor("C", "c.png"),
        ];
        let transfer = Arc::new(RecordingTransfer {
            delays_ms: [("A".to_string(), 60), ("B".to_string(), 120), ("C".to_string(), 0)]
                .into_iter()
                .collect(),
            ..Default::default()
        });

        let manifest = fetch_media(&items, &options(&dir, 5), transfer.clone()).await;

        let ids: Vec<_> = manifest.iter().map(|e| e.remote_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(
            *transfer.completion.lock().unwrap(),
            vec!["C".to_string(), "A".to_string(), "B".to_string()]
        );
        assert!(manifest.iter().all(|e| e.status == FetchStatus::Downloaded));
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_others() {
        let dir = TempDir::new().unwrap();
        let items = vec![descriptor("A", "a.png"), descriptor("B", "b.png")];
        let transfer = Arc::new(RecordingTransfer {
            fail_ids: ["B".to_string()].into_iter().collect(),
            ..Default::default()
        });

        let manifest = fetch_media(&items, &options(&dir, 2), transfer).await;

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[0].status, FetchStatus::Downloaded);
        assert_eq!(manifest[1].status, FetchStatus::Failed);
        assert!(manifest[1].error.as_deref().unwrap().contains("connection reset"));
        // The partial write must not survive to masquerade as a cached copy.
        assert!(!manifest[1].local_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn unsafe_name_fails_only_its_entry() {
        let dir = TempDir::new().unwrap();
        let items = vec![descriptor("A", "../.."), descriptor("B", "b.png")];
        let transfer = Arc::new(RecordingTransfer::default());

        let manifest = fetch_media(&items, &options(&dir, 2), transfer.clone()).await;

        assert_eq!(manifest[0].status, FetchStatus::Failed);
        assert!(manifest[0].local_path.is_none());
        assert!(manifest[0].error.as_deref().unwrap().contains("unsafe filename"));
        assert_eq!(manifest[1].status, FetchStatus::Downloaded);
        assert_eq!(*transfer.calls.lock().unwrap(), vec!["B".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn never_exceeds_concurrency() {
        let dir = TempDir::new().unwrap();
        let items: Vec<_> = (0..20)
            .map(|i| descriptor(&format!("F{i}"), &format!("file-{i}.png")))
            .collect();
        let transfer = Arc::new(CountingTransfer::default());

        let manifest = fetch_media(&items, &options(&dir, 5), transfer.clone()).await;

        assert_eq!(manifest.len(), 20);
        assert!(manifest.iter().all(|e| e.status == FetchStatus::Downloaded));
        let peak = transfer.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak concurrency was {peak}");
        assert!(peak >= 2, "transfers never overlapped");
        assert_eq!(transfer.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_concurrency_still_makes_progress() {
        let dir = TempDir::new().unwrap();
        let items = vec![descriptor("A", "a.png"), descriptor("B", "b.png")];
        let transfer = Arc::new(CountingTransfer::default());
        let manifest = fetch_media(&items, &options(&dir, 0), transfer.clone()).await;
        assert!(manifest.iter().all(|e| e.status == FetchStatus::Downloaded));
        assert_eq!(transfer.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_transfer_is_recorded_as_failure() {
        let dir = TempDir::new().unwrap();
        let items = vec![descriptor("boom", "a.png"), descriptor("fine", "b.png")];
        let manifest = fetch_media(&items, &options(&dir, 2), Arc::new(PanickingTransfer)).await;
        assert_eq!(manifest[0].status, FetchStatus::Failed);
        assert!(manifest[0].error.as_deref().unwrap().contains("aborted"));
        assert_eq!(manifest[1].status, FetchStatus::Downloaded);
    }

    #[tokio::test]
    async fn http_transfer_writes_body_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/files/F1/shot.png")
            .match_header("authorization", "Bearer xoxb-test")
            .with_status(200)
            .with_body("PNGDATA")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut media = descriptor("F1", "shot.png");
        media.url = format!("{}/files/F1/shot.png", server.url());
        let dest = dir.path().join("shot.png");

        let transfer = HttpTransfer::new(reqwest::Client::new(), "xoxb-test", 1024);
        transfer.transfer(&media, &dest).await.unwrap();

        mock.assert_async().await;
        assert_eq!(std::fs::read(&dest).unwrap(), b"PNGDATA");
    }

    #[tokio::test]
    async fn http_transfer_rejects_oversized_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/big")
            .with_status(200)
            .with_body(vec![0u8; 64])
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let mut media = descriptor("F1", "big.bin");
        media.url = format!("{}/big", server.url());
        let dest = dir.path().join("big.bin");

        let transfer = HttpTransfer::new(reqwest::Client::new(), "t", 16);
        let err = transfer.transfer(&media, &dest).await.unwrap_err();
        assert!(matches!(err, ChangelogError::Transfer { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn http_transfer_maps_status_errors() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/gone").with_status(404).create_async().await;

        let dir = TempDir::new().unwrap();
        let mut media = descriptor("F1", "gone.png");
        media.url = format!("{}/gone", server.url());

        let transfer = HttpTransfer::new(reqwest::Client::new(), "t", 1024);
        let err = transfer
            .transfer(&media, &dir.path().join("gone.png"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone.png"));
    }
}
