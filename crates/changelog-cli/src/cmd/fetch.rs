use super::{block_on, load_settings, Services, WindowArgs};
use crate::output::{print_json, print_table};
use anyhow::Context;
use changelog_core::pipeline;
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub window: WindowArgs,
}

pub fn run(root: &Path, args: FetchArgs, json: bool) -> anyhow::Result<()> {
    let (config, creds) = load_settings(root)?;
    let services = Services::new(&config, &creds)?;
    let request = args
        .window
        .fetch_request(root, &config, &creds.slack_channel, false)?;

    let fetched = block_on(pipeline::fetch(
        &services.slack,
        services.transfer.clone(),
        &request,
    ))?
    .context("fetch failed")?;

    if json {
        return print_json(&fetched);
    }

    println!(
        "{} message(s) since {} ({} already processed)",
        fetched.messages.len(),
        fetched.since,
        fetched.skipped_processed
    );
    if fetched.manifest.is_empty() {
        return Ok(());
    }
    println!();
    let rows = fetched
        .manifest
        .iter()
        .map(|e| {
            vec![
                e.kind.as_str().to_string(),
                e.status.as_str().to_string(),
                e.filename().unwrap_or(&e.original_name).to_string(),
                e.error.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["KIND", "STATUS", "FILE", "ERROR"], rows);
    Ok(())
}
