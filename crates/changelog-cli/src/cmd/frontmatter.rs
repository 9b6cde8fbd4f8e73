use crate::output::print_json;
use anyhow::Context;
use changelog_core::{frontmatter, paths};
use std::io::Read;
use std::path::Path;

pub fn run(date: &str, file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let date = paths::parse_date(date)?;
    let body = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let page = frontmatter::apply_frontmatter(date, &body)?;
    if json {
        let fm = frontmatter::build_frontmatter(date, frontmatter::strip_frontmatter(&body))?;
        print_json(&serde_json::json!({
            "title": fm.title,
            "description": fm.description,
            "page": page,
        }))
    } else {
        print!("{page}");
        Ok(())
    }
}
