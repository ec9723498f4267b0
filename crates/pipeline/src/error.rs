use std::path::PathBuf;

use kbtools_core::request::ValidationError;

/// Failures while generating a project.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("{tool} binary not found: {source}")]
    ToolNotFound {
        tool: &'static str,
        source: std::io::Error,
    },

    #[error("{tool} failed (exit code {exit_code:?}): {detail}")]
    ToolFailed {
        tool: &'static str,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("expected output was not produced: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("failed to bundle footprint library: {0}")]
    FootprintLibrary(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenerateError {
    /// Whether running the same request again could succeed.
    ///
    /// Only malformed input is permanent; tool crashes, missing outputs and
    /// file-system trouble are treated as transient.
    pub fn is_retriable(&self) -> bool {
        match self {
            GenerateError::Validation(_) => false,
            GenerateError::ToolNotFound { .. }
            | GenerateError::ToolFailed { .. }
            | GenerateError::MissingOutput(_)
            | GenerateError::FootprintLibrary(_)
            | GenerateError::Io(_) => true,
        }
    }
}
