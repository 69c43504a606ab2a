use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::os::OsDescriptor;

/// What the remote model is told about a request.
#[derive(Debug, Clone, Copy)]
pub struct ExternalQuery<'a> {
    /// Request text in the user's original casing.
    pub request: &'a str,
    pub os: &'a OsDescriptor,
    pub working_dir: Option<&'a Path>,
}

/// A command proposed by a remote model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub command: String,
    pub explanation: Option<String>,
}

/// Remote natural-language interpreter used when the catalog has no answer.
#[async_trait::async_trait]
pub trait ExternalInterpreter: Send + Sync {
    fn name(&self) -> &str;

    async fn interpret(&self, query: &ExternalQuery<'_>) -> Result<Suggestion, ExternalError>;
}

/// Outcome of running a command. Failures are reported here, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process never started, was killed, or the command was a builtin.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Set when a `cd` builtin changed directory.
    pub working_dir: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            succeeded: false,
            timed_out: true,
            stderr: format!("Command timed out after {:?}", after),
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs an already validated command. Must never panic or return early
    /// without a result; every failure is folded into the returned value.
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        working_dir: Option<&Path>,
    ) -> ExecutionResult;
}

/// Errors from startup and configuration paths.
#[derive(Error, Debug)]
pub enum TaiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to write configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid pattern catalog: {0}")]
    Catalog(String),

    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),
}

pub type TaiResult<T> = Result<T, TaiError>;

/// Errors an external interpreter may report. All of them are recoverable.
#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider returned error: {0}")]
    Provider(String),

    #[error("No API key configured")]
    Unauthenticated,

    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    #[error("Timeout waiting for response")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_keeps_sub_second_limits() {
        let result = ExecutionResult::timeout(Duration::from_millis(500));
        assert!(result.timed_out);
        assert!(!result.succeeded);
        assert_eq!(result.stderr, "Command timed out after 500ms");
        assert_eq!(
            ExecutionResult::timeout(Duration::from_secs(30)).stderr,
            "Command timed out after 30s"
        );
    }
}
