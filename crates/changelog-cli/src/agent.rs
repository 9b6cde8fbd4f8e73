use anyhow::Context;
use changelog_agent::{AgentOptions, PermissionMode};
use changelog_core::config::AgentConfig;
use changelog_core::pipeline::{StageRequest, Transform};
use changelog_core::ChangelogError;
use std::path::{Path, PathBuf};

/// Runs each text stage as one `claude` subprocess.
pub struct AgentTransform {
    executable: PathBuf,
    max_turns: u32,
    permission_mode: PermissionMode,
    cwd: PathBuf,
}

impl AgentTransform {
    /// Locate the `claude` binary (config override, then `PATH`).
    pub fn new(config: &AgentConfig, root: &Path) -> anyhow::Result<Self> {
        let executable = match &config.claude_path {
            Some(p) => PathBuf::from(p),
            None => which::which("claude")
                .context("claude CLI not found on PATH; install it or set agent.claude_path")?,
        };
        tracing::debug!(claude = %executable.display(), "using claude CLI");
        Ok(Self {
            executable,
            max_turns: config.max_turns,
            permission_mode: PermissionMode::parse(&config.permission_mode),
            cwd: root.to_path_buf(),
        })
    }

    fn options(&self, request: &StageRequest) -> AgentOptions {
        AgentOptions {
            model: Some(request.model.clone()),
            max_turns: Some(self.max_turns),
            allowed_tools: request.allowed_tools.clone(),
            permission_mode: self.permission_mode.clone(),
            system_prompt: Some(request.system_prompt.clone()),
            cwd: Some(self.cwd.clone()),
            path_to_executable: Some(self.executable.to_string_lossy().into_owned()),
            ..Default::default()
        }
    }
}

impl Transform for AgentTransform {
    async fn complete(&self, request: StageRequest) -> changelog_core::Result<String> {
        let opts = self.options(&request);
        tracing::info!(stage = %request.stage, model = %request.model, "running claude");
        changelog_agent::run(request.prompt, opts)
            .await
            .and_then(|r| r.into_text())
            .map_err(|e| ChangelogError::ExternalService {
                service: "llm",
                message: e.to_string(),
            })
    }
}
