//! Text surgery on changelog drafts: media references, the timestamps
//! header, and unwrapping documents out of model replies.

use crate::paths::{date_stamp, CDN_MEDIA_PREFIX};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Media references
// ---------------------------------------------------------------------------

static LOCAL_MEDIA_RE: OnceLock<Regex> = OnceLock::new();

fn local_media_re() -> &'static Regex {
    LOCAL_MEDIA_RE.get_or_init(|| {
        Regex::new(r#"(?m)(^|[\s("'=\[])(?:\./|/)?(?:docs/updates/)?media/\d{4}-\d{2}-\d{2}/"#)
            .unwrap()
    })
}

/// Point every local media reference (`./media/…`, `media/…`,
/// `docs/updates/media/…`) at the published location for `date`.
pub fn rewrite_media_paths(content: &str, date: NaiveDate) -> String {
    let target = format!("${{1}}{CDN_MEDIA_PREFIX}/{}/", date_stamp(date));
    local_media_re()
        .replace_all(content, target.as_str())
        .into_owned()
}

static CDN_REFERENCE_RE: OnceLock<Regex> = OnceLock::new();

fn cdn_reference_re() -> &'static Regex {
    CDN_REFERENCE_RE.get_or_init(|| {
        Regex::new(&format!(
            r#"{}/(\d{{4}}-\d{{2}}-\d{{2}})/([^"'\s)\]>]+)"#,
            regex::escape(CDN_MEDIA_PREFIX)
        ))
        .unwrap()
    })
}

/// Filenames referenced under the published media path for `date`.
fn cdn_references(content: &str, date: NaiveDate) -> impl Iterator<Item = String> + '_ {
    let stamp = date_stamp(date);
    cdn_reference_re()
        .captures_iter(content)
        .filter(move |c| c[1] == *stamp)
        .map(|c| c[2].to_string())
}

/// Filenames the page references under the published media path for `date`.
pub fn referenced_media(content: &str, date: NaiveDate) -> BTreeSet<String> {
    cdn_references(content, date).collect()
}

/// Remove every line that references a media file not in `available`.
///
/// Returns the cleaned page and the sorted, de-duplicated missing names.
pub fn drop_missing_media(
    content: &str,
    date: NaiveDate,
    available: &BTreeSet<String>,
) -> (String, Vec<String>) {
    let mut missing = BTreeSet::new();
    let mut kept = Vec::new();

    for line in content.lines() {
        let absent: Vec<String> = cdn_references(line, date)
            .filter(|name| !available.contains(name))
            .collect();
        if absent.is_empty() {
            kept.push(line);
        } else {
            missing.extend(absent);
        }
    }

    let mut out = kept.join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    (out, missing.into_iter().collect())
}

// ---------------------------------------------------------------------------
// Timestamps header
// ---------------------------------------------------------------------------

static TIMESTAMPS_RE: OnceLock<Regex> = OnceLock::new();

fn timestamps_re() -> &'static Regex {
    TIMESTAMPS_RE
        .get_or_init(|| Regex::new(r"<!--\s*slack_timestamps:\s*([^>]*?)\s*-->\n?").unwrap())
}

/// First-line marker recording which source messages a draft covers.
pub fn timestamps_comment(timestamps: &[String]) -> String {
    format!("<!-- slack_timestamps: {} -->", timestamps.join(","))
}

pub fn parse_timestamps_comment(content: &str) -> Vec<String> {
    timestamps_re()
        .captures(content)
        .map(|c| {
            c[1].split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

pub fn strip_timestamps_comment(content: &str) -> String {
    timestamps_re().replace_all(content, "").into_owned()
}

// ---------------------------------------------------------------------------
// Model replies
// ---------------------------------------------------------------------------

/// The document inside a model reply.
///
/// A reply that is one fenced block is unwrapped; anything else is taken
/// verbatim (trimmed).
pub fn extract_document(reply: &str) -> String {
    let trimmed = reply.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some((_info, body)) = rest.split_once('\n') {
            if let Some(inner) = body.trim_end().strip_suffix("```") {
                return inner.trim().to_string();
            }
        }
    }
    trimmed.to_string()
}

// ---------------------------------------------------------------------------
// Emoji shortcodes
// ---------------------------------------------------------------------------

static SHORTCODE_RE: OnceLock<Regex> = OnceLock::new();
static SPACES_RE: OnceLock<Regex> = OnceLock::new();

/// Remove `:shortcode:` emoji and the double spaces they leave behind.
pub fn strip_emoji_shortcodes(text: &str) -> String {
    let shortcode = SHORTCODE_RE
        .get_or_init(|| Regex::new(r":[a-z0-9_+\-]*[a-z][a-z0-9_+\-]*:").unwrap());
    let spaces = SPACES_RE.get_or_init(|| Regex::new(r" {2,}").unwrap());
    let stripped = shortcode.replace_all(text, "");
    spaces
        .replace_all(&stripped, " ")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
