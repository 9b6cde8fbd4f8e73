use crate::output::print_json;
use changelog_core::paths;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum PathSubcommand {
    /// Print the changelog page path for a date
    Build {
        /// YYYY-MM-DD
        date: String,
    },
    /// Print the date encoded in a changelog page path
    Parse {
        /// e.g. docs/updates/2025/01/15/changelog.mdx
        path: String,
    },
}

pub fn run(subcmd: PathSubcommand, json: bool) -> anyhow::Result<()> {
    let build = matches!(subcmd, PathSubcommand::Build { .. });
    let (date, path) = match subcmd {
        PathSubcommand::Build { date } => {
            let date = paths::parse_date(&date)?;
            (date, paths::changelog_path(date))
        }
        PathSubcommand::Parse { path } => (paths::parse_changelog_path(&path)?, path),
    };

    if json {
        return print_json(&serde_json::json!({
            "date": paths::date_stamp(date),
            "path": path,
        }));
    }
    if build {
        println!("{path}");
    } else {
        println!("{}", paths::date_stamp(date));
    }
    Ok(())
}
