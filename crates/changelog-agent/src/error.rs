use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse stream-json line: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("process error: {0}")]
    Process(String),

    /// The run completed but ended with an error subtype (max turns, budget...).
    #[error("agent run ended with {subtype} after {num_turns} turn(s){}", format_errors(.errors))]
    Failed {
        subtype: String,
        num_turns: u32,
        errors: Vec<String>,
    },
}

fn format_errors(errors: &[String]) -> String {
    if errors.is_empty() {
        String::new()
    } else {
        format!(": {}", errors.join("; "))
    }
}
