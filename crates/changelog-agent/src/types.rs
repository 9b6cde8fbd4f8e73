use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

// ─── Message ──────────────────────────────────────────────────────────────

/// The messages of `claude --output-format stream-json` this crate reads.
/// Discriminated by the JSON `"type"` field; other types are skipped by the
/// reader before they get here.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
}

impl Message {
    pub fn session_id(&self) -> &str {
        match self {
            Message::System(m) => &m.session_id,
            Message::Assistant(m) => &m.session_id,
            Message::User(m) => &m.session_id,
            Message::Result(m) => m.session_id(),
        }
    }
}

/// `type = "system"`. Only the init subtype carries a model.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    pub session_id: String,
    #[serde(default)]
    pub subtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// ─── Assistant ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantMessage {
    pub message: AssistantContent,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantContent {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

impl AssistantMessage {
    /// Concatenated text blocks of this turn.
    pub fn text(&self) -> String {
        self.message
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.message.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

// ─── User ─────────────────────────────────────────────────────────────────

/// `type = "user"`: tool results fed back to the model. Content is not
/// inspected.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserMessage {
    pub session_id: String,
}

// ─── Result ───────────────────────────────────────────────────────────────

/// `type = "result"`: the terminal message of every run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ResultMessage {
    Success(ResultSuccess),
    ErrorDuringExecution(ResultError),
    ErrorMaxTurns(ResultError),
    ErrorMaxBudgetUsd(ResultError),
}

impl ResultMessage {
    pub fn session_id(&self) -> &str {
        match self {
            ResultMessage::Success(r) => &r.session_id,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r) => &r.session_id,
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            ResultMessage::Success(r) => r.is_error,
            _ => true,
        }
    }

    pub fn subtype(&self) -> &'static str {
        match self {
            ResultMessage::Success(_) => "success",
            ResultMessage::ErrorDuringExecution(_) => "error_during_execution",
            ResultMessage::ErrorMaxTurns(_) => "error_max_turns",
            ResultMessage::ErrorMaxBudgetUsd(_) => "error_max_budget_usd",
        }
    }

    /// The final text. `None` for error subtypes.
    pub fn result_text(&self) -> Option<&str> {
        match self {
            ResultMessage::Success(r) => Some(&r.result),
            _ => None,
        }
    }

    pub fn num_turns(&self) -> u32 {
        match self {
            ResultMessage::Success(r) => r.num_turns,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r) => r.num_turns,
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        match self {
            ResultMessage::Success(r) => r.total_cost_usd,
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r) => r.total_cost_usd,
        }
    }

    pub fn errors(&self) -> &[String] {
        match self {
            ResultMessage::Success(_) => &[],
            ResultMessage::ErrorDuringExecution(r)
            | ResultMessage::ErrorMaxTurns(r)
            | ResultMessage::ErrorMaxBudgetUsd(r) => &r.errors,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultSuccess {
    pub session_id: String,
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultError {
    pub session_id: String,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub errors: Vec<String>,
}

// ─── AgentOptions ─────────────────────────────────────────────────────────

/// Options for one `claude` subprocess run.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Model alias or id (e.g. `"sonnet"`, `"opus"`).
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    /// Tools that run without prompting.
    pub allowed_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    /// Replaces the default system prompt.
    pub system_prompt: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Path to the `claude` binary (default: `"claude"` on `PATH`).
    pub path_to_executable: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }

    /// Parse the CLI spelling. Unknown values fall back to `Default`.
    pub fn parse(s: &str) -> Self {
        match s {
            "acceptEdits" => PermissionMode::AcceptEdits,
            "bypassPermissions" => PermissionMode::BypassPermissions,
            "plan" => PermissionMode::Plan,
            _ => PermissionMode::Default,
        }
    }
}
