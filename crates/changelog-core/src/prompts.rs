//! Prompt text for the three text-transform stages.

use crate::media::MediaKind;
use crate::slack::SourceMessage;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt::Write as _;

pub const SYSTEM_PROMPT: &str = "You are an expert developer relations professional writing \
product changelogs for a documentation site. Reply with the requested markdown document only, \
with no preamble and no commentary.";

/// Where a cached attachment can be referenced from the draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    /// `./media/<date>/<file>`
    pub path: String,
}

const STYLE_RULES: &str = "\
- Write in a friendly, confident, second-person voice (\"you can now...\").
- Use sentence case for headings.
- Group related updates under `##` headings; never use `#` headings or horizontal rules.
- Each entry: a short bold lead sentence, then one or two sentences of detail.
- Images: `![short description](path)`. Videos: `<video src=\"path\" controls />`.
- Only reference media paths listed in the input. Never invent a path.";

/// Writer stage: turn raw posts into a first draft.
pub fn writer_prompt(
    date: NaiveDate,
    since: NaiveDate,
    messages: &[SourceMessage],
    media: &HashMap<String, MediaRef>,
) -> String {
    format!(
        "Create a changelog draft for {date} from the product-update posts below \
         (posted between {since} and {date}).\n\n\
         Rules:\n{STYLE_RULES}\n\
         - Keep each entry's source permalink on its own line as `Source: <link>` so reviewers \
         can trace it; it is removed later.\n\
         - Skip posts that are not product updates (chatter, questions, reminders).\n\n\
         # Posts\n\n{}",
        message_digest(messages, media),
        date = date.format("%Y-%m-%d"),
        since = since.format("%Y-%m-%d"),
    )
}

/// Formatter stage: bring a draft into the page template.
pub fn formatter_prompt(date: NaiveDate, draft: &str) -> String {
    format!(
        "Reformat the changelog draft for {date} below to match the changelog template.\n\n\
         Rules:\n{STYLE_RULES}\n\
         - Remove every chat link and `Source:` line.\n\
         - Do not add frontmatter, import lines or components; they are added for you.\n\
         - Keep every media reference exactly as written.\n\n\
         # Draft\n\n{draft}",
        date = date.format("%Y-%m-%d"),
    )
}

/// Reviewer stage: copy-edit the formatted page.
pub fn reviewer_prompt(date: NaiveDate, page: &str) -> String {
    format!(
        "Review the changelog page for {date} below for accuracy, voice, tone, capitalization \
         and structure, and return the corrected page.\n\n\
         Rules:\n{STYLE_RULES}\n\
         - Fix problems directly; do not list them.\n\
         - Do not add or change frontmatter; it is regenerated for you.\n\
         - Do not add chat links back.\n\n\
         # Page\n\n{page}",
        date = date.format("%Y-%m-%d"),
    )
}

/// Plain-text rendering of the posts handed to the writer.
pub fn message_digest(messages: &[SourceMessage], media: &HashMap<String, MediaRef>) -> String {
    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        let _ = writeln!(out, "## Post {}", i + 1);
        write_message(&mut out, msg, media);
        if !msg.replies.is_empty() {
            let _ = writeln!(out, "Thread replies:");
            for reply in &msg.replies {
                let _ = writeln!(out, "> reply from {}", reply.user);
                write_message(&mut out, reply, media);
            }
        }
        out.push('\n');
    }
    out
}

fn write_message(out: &mut String, msg: &SourceMessage, media: &HashMap<String, MediaRef>) {
    if let Some(at) = msg.posted_at() {
        let _ = writeln!(out, "Posted: {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(link) = &msg.permalink {
        let _ = writeln!(out, "Link: {link}");
    }
    let _ = writeln!(out, "Text:\n{}", msg.text.trim());

    let refs: Vec<&MediaRef> = msg
        .attachments
        .iter()
        .filter_map(|a| media.get(&a.id))
        .collect();
    if !refs.is_empty() {
        let _ = writeln!(out, "Media:");
        for r in refs {
            let _ = writeln!(out, "- {}: {}", r.kind.as_str(), r.path);
        }
    }
}
