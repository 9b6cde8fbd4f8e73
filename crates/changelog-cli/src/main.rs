mod agent;
mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, path::PathSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "changelog",
    about = "Turn product-update posts from a Slack channel into a changelog pull request",
    version,
    propagate_version = true
)]
struct Cli {
    /// Docs repository root (default: auto-detect from changelog.yaml or .git/)
    #[arg(long, global = true, env = "CHANGELOG_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, draft, format, review and publish the changelog
    Run(cmd::run::RunArgs),

    /// Fetch messages and cache their media, without writing anything else
    Fetch(cmd::fetch::FetchArgs),

    /// Build or parse changelog page paths
    Path {
        #[command(subcommand)]
        subcommand: PathSubcommand,
    },

    /// Print a page body with the changelog frontmatter applied
    Frontmatter {
        /// Page date (YYYY-MM-DD)
        date: String,
        /// Read the body from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Inspect and validate changelog.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run(_) | Commands::Fetch(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run(args) => cmd::run::run(&root, args, cli.json),
        Commands::Fetch(args) => cmd::fetch::run(&root, args, cli.json),
        Commands::Path { subcommand } => cmd::path::run(subcommand, cli.json),
        Commands::Frontmatter { date, file } => {
            cmd::frontmatter::run(&date, file.as_deref(), cli.json)
        }
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
