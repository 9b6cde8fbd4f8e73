use super::{block_on, load_settings, Services, WindowArgs};
use crate::agent::AgentTransform;
use crate::output::{print_json, print_table};
use anyhow::Context;
use changelog_core::config::ModelsConfig;
use changelog_core::paths;
use changelog_core::pipeline::{self, Outcome, PublishOptions, RunOptions};
use clap::Args;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub window: WindowArgs,

    /// Remove `:shortcode:` emoji from message text before drafting
    #[arg(long)]
    pub strip_emojis: bool,

    /// Stop after review: write the page locally, push nothing, mark nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Open the pull request ready for review instead of as a draft
    #[arg(long)]
    pub ready: bool,

    /// Pull request title (default: "[BOT] Changelog: <date>")
    #[arg(long)]
    pub title: Option<String>,

    /// Resume from an existing working draft: skip fetching and drafting
    #[arg(long, value_name = "DRAFT")]
    pub from: Option<PathBuf>,
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let (config, creds) = load_settings(root)?;
    let llm = AgentTransform::new(&config.agent, root)?;
    let services = Services::new(&config, &creds)?;

    let fetch = args
        .window
        .fetch_request(root, &config, &creds.slack_channel, args.strip_emojis)?;
    let models = match &creds.model_override {
        Some(model) => ModelsConfig {
            writer: model.clone(),
            formatter: model.clone(),
            reviewer: model.clone(),
        },
        None => config.agent.models.clone(),
    };
    let options = RunOptions {
        root: root.to_path_buf(),
        publish: PublishOptions {
            channel: creds.slack_channel.clone(),
            base_branch: config.github.base_branch.clone(),
            draft: config.github.draft && !args.ready,
            labels: config.github.labels.clone(),
            title: args.title,
            docs_json: config.github.docs_json.clone(),
            now: chrono::Local::now().naive_local(),
        },
        fetch,
        models,
        dry_run: args.dry_run,
    };

    let outcome = match args.from {
        Some(from) => {
            let date = args.window.date.as_deref().map(paths::parse_date).transpose()?;
            let draft = pipeline::load_draft(&from, date)
                .with_context(|| format!("failed to load draft {}", from.display()))?;
            block_on(pipeline::run_from_draft(
                &services.slack,
                &llm,
                &services.github,
                &options,
                &draft,
            ))?
        }
        None => {
            tracing::info!(
                date = %options.fetch.date,
                days_back = options.fetch.days_back,
                dry_run = options.dry_run,
                "starting changelog run"
            );
            block_on(pipeline::run(
                &services.slack,
                services.transfer.clone(),
                &llm,
                &services.github,
                &options,
            ))?
        }
    }
    .context("changelog run failed")?;

    if json {
        return print_json(&outcome);
    }
    match outcome {
        Outcome::NothingToDo {
            since,
            skipped_processed,
        } => {
            println!("No new messages since {since}; nothing to do.");
            if skipped_processed > 0 {
                println!("({skipped_processed} already processed; use --ignore-processed to include them)");
            }
        }
        Outcome::DryRun(reviewed) => {
            println!("Dry run: changelog written to {}", reviewed.path.display());
            println!("Media: {} file(s)", reviewed.media.len());
            for dropped in &reviewed.dropped_media {
                println!("  dropped missing media: {dropped}");
            }
        }
        Outcome::Published(published) => {
            println!(
                "Opened pull request #{}: {}",
                published.pull_request.number, published.pull_request.url
            );
            println!("Branch: {}", published.branch);
            println!("Marked {} message(s) as processed", published.marked);
            println!();
            print_table(
                &["FILE"],
                published.files.into_iter().map(|f| vec![f]).collect(),
            );
        }
    }
    Ok(())
}
