use thiserror::Error;

use crate::pipeline::Stage;

#[derive(Debug, Error)]
pub enum ChangelogError {
    #[error("invalid changelog path format: '{0}'")]
    InvalidPathFormat(String),

    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("cannot build frontmatter for an empty body")]
    EmptyBody,

    #[error("unsafe filename '{0}': nothing usable survives sanitization")]
    UnsafeFilename(String),

    #[error("transfer of '{name}' failed: {message}")]
    Transfer { name: String, message: String },

    #[error("{service} error: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    #[error("{stage} stage failed")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ChangelogError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ChangelogError {
    pub(crate) fn slack(message: impl Into<String>) -> Self {
        ChangelogError::ExternalService {
            service: "slack",
            message: message.into(),
        }
    }

    pub(crate) fn github(message: impl Into<String>) -> Self {
        ChangelogError::ExternalService {
            service: "github",
            message: message.into(),
        }
    }

    pub(crate) fn llm(message: impl Into<String>) -> Self {
        ChangelogError::ExternalService {
            service: "llm",
            message: message.into(),
        }
    }

    /// Wrap this error with the pipeline stage it surfaced from.
    /// Already-wrapped errors keep their original stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            e @ ChangelogError::Stage { .. } => e,
            other => ChangelogError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ChangelogError>;
