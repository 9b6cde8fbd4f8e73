//! `changelog-agent`: drives the `claude` CLI for the changelog text stages.
//!
//! Speaks the `--output-format stream-json --input-format stream-json`
//! protocol: one user message on stdin, JSONL messages on stdout, terminated
//! by a `result` message.
//!
//! ```text
//! AgentOptions
//!     │
//!     ▼
//! AgentProcess    ← spawns `claude --output-format stream-json …`
//!     │
//!     ▼
//! QueryStream     ← futures::Stream<Item = Result<Message>>
//!     │
//!     ▼
//! run / RunResult ← terminal result, `into_text()` for the reply
//! ```
//!
//! ```rust,ignore
//! use changelog_agent::{run, AgentOptions};
//!
//! let opts = AgentOptions { model: Some("sonnet".into()), ..Default::default() };
//! let text = run("Summarise these notes…", opts).await?.into_text()?;
//! ```

pub mod error;
pub mod runner;
pub mod stream;
pub mod types;

pub(crate) mod process;

pub use error::AgentError;
pub use runner::{run, RunResult};
pub use stream::QueryStream;
pub use types::{
    AgentOptions, AssistantMessage, ContentBlock, Message, PermissionMode, ResultMessage,
};

pub type Result<T> = std::result::Result<T, AgentError>;

/// Start a query. The stream ends after the first [`Message::Result`] or on
/// process exit.
pub fn query(prompt: impl Into<String>, opts: AgentOptions) -> QueryStream {
    QueryStream::new(prompt.into(), opts)
}
