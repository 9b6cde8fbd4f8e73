//! Navigation entry for the docs site (`docs/docs.json`).
//!
//! The "Changelog" anchor lists every published page, newest first, grouped
//! under "Month YYYY" headings. Other anchors and keys are left untouched.

use crate::error::Result;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

pub const CHANGELOG_ANCHOR: &str = "Changelog";
pub const CHANGELOG_ICON: &str = "clock-rotate-left";
pub const CHANGELOG_DESCRIPTION: &str = "Latest updates and changes";

static PAGE_RE: OnceLock<Regex> = OnceLock::new();

fn page_re() -> &'static Regex {
    PAGE_RE.get_or_init(|| Regex::new(r"^updates/(\d{4})/(\d{2})/(\d{2})/changelog$").unwrap())
}

/// Navigation page id for the changelog dated `date`.
pub fn nav_page(date: NaiveDate) -> String {
    format!("updates/{}/changelog", date.format("%Y/%m/%d"))
}

/// Add the page for `date` to the changelog anchor of `docs_json` and return
/// the re-serialized document (two-space indent).
///
/// When no changelog anchor exists the document is returned re-serialized but
/// otherwise unchanged.
pub fn update_docs_navigation(docs_json: &str, date: NaiveDate) -> Result<String> {
    let mut doc: Value = serde_json::from_str(docs_json)?;

    let anchor = doc
        .get_mut("navigation")
        .and_then(|n| n.get_mut("anchors"))
        .and_then(Value::as_array_mut)
        .and_then(|anchors| {
            anchors
                .iter_mut()
                .find(|a| a.get("anchor").and_then(Value::as_str) == Some(CHANGELOG_ANCHOR))
        })
        .and_then(Value::as_object_mut);

    match anchor {
        Some(anchor) => rebuild_anchor(anchor, date),
        None => tracing::warn!("docs.json has no '{CHANGELOG_ANCHOR}' anchor; leaving navigation as is"),
    }

    Ok(serde_json::to_string_pretty(&doc)?)
}

fn rebuild_anchor(anchor: &mut Map<String, Value>, date: NaiveDate) {
    let mut dates = existing_dates(anchor);
    dates.push(date);
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();

    let mut groups: Vec<Value> = Vec::new();
    let mut current: Option<(String, Vec<Value>)> = None;
    for d in dates {
        let label = d.format("%B %Y").to_string();
        match current.as_mut() {
            Some((name, pages)) if *name == label => pages.push(Value::String(nav_page(d))),
            _ => {
                if let Some((name, pages)) = current.take() {
                    groups.push(json!({ "group": name, "pages": pages }));
                }
                current = Some((label, vec![Value::String(nav_page(d))]));
            }
        }
    }
    if let Some((name, pages)) = current {
        groups.push(json!({ "group": name, "pages": pages }));
    }

    anchor.insert("icon".into(), Value::String(CHANGELOG_ICON.into()));
    anchor.insert("description".into(), Value::String(CHANGELOG_DESCRIPTION.into()));
    anchor.insert("groups".into(), Value::Array(groups));
}

/// Dates of every changelog page already listed under the anchor. Pages may be
/// plain strings or `{ "page": ... }` objects; anything else is ignored.
fn existing_dates(anchor: &Map<String, Value>) -> Vec<NaiveDate> {
    let groups = anchor.get("groups").and_then(Value::as_array);
    groups
        .into_iter()
        .flatten()
        .filter_map(|g| g.get("pages").and_then(Value::as_array))
        .flatten()
        .filter_map(|p| match p {
            Value::String(s) => Some(s.as_str()),
            Value::Object(o) => o.get("page").and_then(Value::as_str),
            _ => None,
        })
        .filter_map(|page| {
            let caps = page_re().captures(page)?;
            NaiveDate::from_ymd_opt(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            )
        })
        .collect()
}
