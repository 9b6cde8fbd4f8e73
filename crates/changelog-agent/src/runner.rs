use futures::StreamExt;

use crate::stream::QueryStream;
use crate::{query, AgentError, AgentOptions, Message, Result};

// ─── RunResult ────────────────────────────────────────────────────────────

/// The terminal result of one run.
#[derive(Debug)]
pub struct RunResult {
    pub session_id: String,
    /// Final text; empty for error subtypes.
    pub result_text: String,
    pub subtype: &'static str,
    pub total_cost_usd: f64,
    pub num_turns: u32,
    pub is_error: bool,
    pub errors: Vec<String>,
}

impl RunResult {
    /// The final text, or [`AgentError::Failed`] when the run ended in error.
    pub fn into_text(self) -> Result<String> {
        if self.is_error {
            return Err(AgentError::Failed {
                subtype: self.subtype.to_string(),
                num_turns: self.num_turns,
                errors: self.errors,
            });
        }
        Ok(self.result_text)
    }
}

// ─── Public API ───────────────────────────────────────────────────────────

/// Run `prompt` to completion and return the terminal result.
///
/// Fails when the stream ends without a result message or a line does not
/// parse.
pub async fn run(prompt: impl Into<String>, opts: AgentOptions) -> Result<RunResult> {
    let model = opts.model.clone().unwrap_or_else(|| "default".into());
    let result = collect(query(prompt, opts)).await?;
    tracing::debug!(
        model = %model,
        session = %result.session_id,
        turns = result.num_turns,
        cost_usd = result.total_cost_usd,
        subtype = result.subtype,
        "agent run finished"
    );
    Ok(result)
}

/// Drain a [`QueryStream`] down to its result message.
pub(crate) async fn collect(mut stream: QueryStream) -> Result<RunResult> {
    while let Some(msg) = stream.next().await {
        match msg? {
            Message::Result(r) => {
                return Ok(RunResult {
                    session_id: r.session_id().to_string(),
                    result_text: r.result_text().unwrap_or("").to_string(),
                    subtype: r.subtype(),
                    total_cost_usd: r.total_cost_usd(),
                    num_turns: r.num_turns(),
                    is_error: r.is_error(),
                    errors: r.errors().to_vec(),
                });
            }
            Message::Assistant(a) => {
                for tool in a.tool_names() {
                    tracing::debug!(tool, "agent tool call");
                }
            }
            _ => {}
        }
    }
    Err(AgentError::Process(
        "stream ended without a result message".into(),
    ))
}

// ─── Tests ────────────────────────────────────────────────────────────────
