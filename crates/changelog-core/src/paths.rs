use crate::error::{ChangelogError, Result};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const UPDATES_DIR: &str = "docs/updates";
pub const MEDIA_DIR: &str = "docs/updates/media";
pub const PUBLISHED_MEDIA_DIR: &str = "docs/images/changelog";
pub const CDN_MEDIA_PREFIX: &str = "/images/changelog";
pub const DOCS_JSON: &str = "docs/docs.json";
pub const CONFIG_FILE: &str = "changelog.yaml";

pub const CHANGELOG_FILENAME: &str = "changelog.mdx";

/// Drafts that earlier, less disciplined runs left at the project root.
pub const STRAY_DRAFTS: &[&str] = &["draft_changelog.md", "changelog_draft.md", "draft.md"];

// ---------------------------------------------------------------------------
// Changelog path
// ---------------------------------------------------------------------------

/// Canonical repository-relative path of the changelog page for `date`.
pub fn changelog_path(date: NaiveDate) -> String {
    format!(
        "{UPDATES_DIR}/{}/{CHANGELOG_FILENAME}",
        date.format("%Y/%m/%d")
    )
}

static CHANGELOG_PATH_RE: OnceLock<Regex> = OnceLock::new();

fn changelog_path_re() -> &'static Regex {
    CHANGELOG_PATH_RE.get_or_init(|| {
        Regex::new(r"^docs/updates/(\d{4})/(\d{2})/(\d{2})/changelog\.mdx$").unwrap()
    })
}

/// Recover the date from a path produced by [`changelog_path`].
///
/// Only the exact canonical shape is accepted. Well-shaped paths naming an
/// impossible date (`2025/13/99`) are rejected the same way as malformed ones.
pub fn parse_changelog_path(path: &str) -> Result<NaiveDate> {
    let invalid = || ChangelogError::InvalidPathFormat(path.to_string());
    let caps = changelog_path_re().captures(path).ok_or_else(invalid)?;
    date_from_captures(&caps).ok_or_else(invalid)
}

static LOOSE_DATE_RE: OnceLock<Regex> = OnceLock::new();

fn loose_date_re() -> &'static Regex {
    LOOSE_DATE_RE.get_or_init(|| Regex::new(r"(\d{4})[-/](\d{2})[-/](\d{2})").unwrap())
}

/// Pull the first `YYYY-MM-DD` or `YYYY/MM/DD` date out of any path, e.g. a
/// working draft such as `docs/updates/2025-01-15.md`.
pub fn date_from_path(path: &str) -> Result<NaiveDate> {
    let invalid = || ChangelogError::InvalidPathFormat(path.to_string());
    let caps = loose_date_re().captures(path).ok_or_else(invalid)?;
    date_from_captures(&caps).ok_or_else(invalid)
}

fn date_from_captures(caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let year = caps[1].parse().ok()?;
    let month = caps[2].parse().ok()?;
    let day = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a `YYYY-MM-DD` command-line or config date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ChangelogError::InvalidDate(s.to_string()))
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Working draft the writer stage produces before formatting.
pub fn draft_path(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(UPDATES_DIR)
        .join(format!("{}.md", date_stamp(date)))
}

pub fn changelog_file(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(changelog_path(date))
}

pub fn media_root(root: &Path) -> PathBuf {
    root.join(MEDIA_DIR)
}

pub fn media_dir(root: &Path, date: NaiveDate) -> PathBuf {
    media_root(root).join(date_stamp(date))
}

/// Where a cached media file lives inside the docs repository once published.
pub fn published_media_path(date: NaiveDate, filename: &str) -> String {
    format!("{PUBLISHED_MEDIA_DIR}/{}/{filename}", date_stamp(date))
}

/// How the changelog page references a published media file.
pub fn cdn_media_path(date: NaiveDate, filename: &str) -> String {
    format!("{CDN_MEDIA_PREFIX}/{}/{filename}", date_stamp(date))
}

/// Media path relative to the draft, as the writer stage is told to use it.
pub fn relative_media_path(date: NaiveDate, filename: &str) -> String {
    format!("./media/{}/{filename}", date_stamp(date))
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn builds_zero_padded_path() {
        assert_eq!(
            changelog_path(d(2025, 1, 15)),
            "docs/updates/2025/01/15/changelog.mdx"
        );
    }

    #[test]
    fn parse_recovers_built_date() {
        let dates = [
            d(2025, 1, 15),
            d(2024, 2, 29),
            d(1999, 12, 31),
            d(2030, 7, 1),
        ];
        for date in dates {
            assert_eq!(parse_changelog_path(&changelog_path(date)).unwrap(), date);
        }
    }

    #[test]
    fn parse_rejects_impossible_calendar_values() {
        for path in [
            "docs/updates/2025/13/99/changelog.mdx",
            "docs/updates/2025/02/30/changelog.mdx",
            "docs/updates/2023/02/29/changelog.mdx",
            "docs/updates/2025/00/10/changelog.mdx",
        ] {
            let err = parse_changelog_path(path).unwrap_err();
            assert!(
                matches!(&err, ChangelogError::InvalidPathFormat(p) if p == path),
                "unexpected error for {path}: {err}"
            );
        }
    }

    #[test]
    fn parse_rejects_other_shapes() {
        for path in [
            "",
            "docs/updates/2025-01-15.md",
            "./docs/updates/2025/01/15/changelog.mdx",
            "docs/updates/2025/1/15/changelog.mdx",
            "docs/updates/2025/01/15/changelog.md",
            "docs/updates/2025/01/15/changelog.mdx.bak",
            "other/updates/2025/01/15/changelog.mdx",
        ] {
            assert!(parse_changelog_path(path).is_err(), "expected reject: {path}");
        }
    }

    #[test]
    fn invalid_path_error_names_input() {
        let err = parse_changelog_path("nope").unwrap_err();
        assert!(err.to_string().contains("'nope'"));
    }

    #[test]
    fn loose_date_accepts_draft_paths() {
        assert_eq!(
            date_from_path("./docs/updates/2025-01-15.md").unwrap(),
            d(2025, 1, 15)
        );
        assert_eq!(
            date_from_path("docs/updates/2025/03/04/changelog.mdx").unwrap(),
            d(2025, 3, 4)
        );
        assert!(date_from_path("docs/updates/latest.md").is_err());
        assert!(date_from_path("docs/updates/2025-13-01.md").is_err());
    }

    #[test]
    fn parse_date_requires_iso_format() {
        assert_eq!(parse_date("2025-01-15").unwrap(), d(2025, 1, 15));
        assert!(matches!(
            parse_date("01/15/2025"),
            Err(ChangelogError::InvalidDate(_))
        ));
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/docs-repo");
        let date = d(2025, 10, 21);
        assert_eq!(
            draft_path(root, date),
            PathBuf::from("/tmp/docs-repo/docs/updates/2025-10-21.md")
        );
        assert_eq!(
            media_dir(root, date),
            PathBuf::from("/tmp/docs-repo/docs/updates/media/2025-10-21")
        );
        assert_eq!(
            published_media_path(date, "lamp_abc.mp4"),
            "docs/images/changelog/2025-10-21/lamp_abc.mp4"
        );
        assert_eq!(
            cdn_media_path(date, "lamp_abc.mp4"),
            "/images/changelog/2025-10-21/lamp_abc.mp4"
        );
        assert_eq!(
            relative_media_path(date, "lamp_abc.mp4"),
            "./media/2025-10-21/lamp_abc.mp4"
        );
    }
}
