//! Frontmatter block prepended to every changelog page.

use crate::error::{ChangelogError, Result};
use chrono::NaiveDate;
use serde::Serialize;

pub const WORDS_PER_MINUTE: usize = 200;

const AUTHOR_IMPORT: &str = "import { AuthorCard } from '/snippets/author-card.mdx';";
const AUTHOR_COMPONENT: &str = "<AuthorCard/>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frontmatter {
    pub title: String,
    pub description: String,
}

impl Frontmatter {
    /// Literal markdown, ready to prepend to a page body.
    pub fn render(&self) -> String {
        format!(
            "---\ntitle: {}\ndescription: {}\n---\n\n{AUTHOR_IMPORT}\n\n{AUTHOR_COMPONENT}\n\n",
            self.title, self.description
        )
    }
}

/// Build the frontmatter for the page dated `date` whose body is `body`.
///
/// An empty or whitespace-only body is an error rather than a "1 min read".
pub fn build_frontmatter(date: NaiveDate, body: &str) -> Result<Frontmatter> {
    let words = word_count(body);
    if words == 0 {
        return Err(ChangelogError::EmptyBody);
    }
    Ok(Frontmatter {
        title: format_title(date),
        description: format!("{} min read", reading_minutes(words)),
    })
}

/// `"January 15, 2025"`: full month name, unpadded day.
pub fn format_title(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Whole minutes at [`WORDS_PER_MINUTE`], rounded up, never below one.
pub fn reading_minutes(words: usize) -> usize {
    words.div_ceil(WORDS_PER_MINUTE).max(1)
}

/// Replace whatever frontmatter `content` carries with a freshly built block.
///
/// Any leading `---` block and the author-card preamble are removed first, so
/// running this twice yields the same page.
pub fn apply_frontmatter(date: NaiveDate, content: &str) -> Result<String> {
    let body = strip_frontmatter(content);
    let fm = build_frontmatter(date, body)?;
    Ok(format!("{}{}\n", fm.render(), body))
}

/// The page body with any frontmatter block and author-card preamble removed.
pub fn strip_frontmatter(content: &str) -> &str {
    let mut rest = content.trim_start();

    if let Some(after_open) = rest.strip_prefix("---\n").or_else(|| rest.strip_prefix("---\r\n")) {
        if let Some(close) = find_closing_fence(after_open) {
            rest = after_open[close..].trim_start();
        }
    }

    loop {
        let trimmed = rest.trim_start();
        if let Some(after) = trimmed.strip_prefix(AUTHOR_IMPORT) {
            rest = after;
        } else if let Some(after) = trimmed.strip_prefix(AUTHOR_COMPONENT) {
            rest = after;
        } else {
            rest = trimmed;
            break;
        }
    }

    rest.trim_end()
}

/// Byte offset just past the closing `---` line, relative to `s`.
fn find_closing_fence(s: &str) -> Option<usize> {
    let mut offset = 0;
    for line in s.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end() == "---" {
            return Some(offset);
        }
    }
    None
}
