//! Subprocess helpers shared by the generation steps.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use crate::error::GenerateError;

/// How much of a failing tool's log is quoted in the error.
const LOG_TAIL_BYTES: usize = 2048;

/// Run `program` with `args`, capturing stderr for the error message.
pub async fn run<I, S>(tool: &'static str, program: &str, args: I) -> Result<(), GenerateError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| GenerateError::ToolNotFound { tool, source })?;

    if !output.status.success() {
        return Err(GenerateError::ToolFailed {
            tool,
            exit_code: output.status.code(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Run `program` with stdout and stderr appended to `log_path`.
///
/// On failure the tail of the log becomes the error detail.
pub async fn run_logged<I, S>(
    tool: &'static str,
    program: &str,
    args: I,
    log_path: &Path,
) -> Result<(), GenerateError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let status = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|source| GenerateError::ToolNotFound { tool, source })?;

    if !status.success() {
        return Err(GenerateError::ToolFailed {
            tool,
            exit_code: status.code(),
            detail: log_tail(log_path).await,
        });
    }
    Ok(())
}

async fn log_tail(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let start = bytes.len().saturating_sub(LOG_TAIL_BYTES);
            String::from_utf8_lossy(&bytes[start..]).trim().to_string()
        }
        Err(_) => String::new(),
    }
}
