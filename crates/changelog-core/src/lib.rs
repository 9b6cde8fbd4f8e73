pub mod config;
pub mod docs_nav;
pub mod error;
pub mod frontmatter;
pub mod github;
pub mod io;
pub mod markdown;
pub mod media;
pub mod paths;
pub mod pipeline;
pub mod prompts;
pub mod slack;

pub use error::{ChangelogError, Result};
