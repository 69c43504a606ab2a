//! Request → command resolution and guarded execution.
//!
//! A request is tried against the catalog (exact, then fuzzy), then the
//! optional external model. Whatever resolves goes through the safety gate
//! before it can reach the executor.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::catalog::{normalize, PatternCatalog};
use crate::core::lib::{CommandExecutor, ExecutionResult, ExternalInterpreter, ExternalQuery};
use crate::core::os::OsDescriptor;
use crate::core::safety::{RuleCategory, SafetyValidator};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(30);

/// One user invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub text: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl CommandRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    ExactMatch,
    FuzzyMatch,
    ExternalModel,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact-match",
            Self::FuzzyMatch => "fuzzy-match",
            Self::ExternalModel => "external-model",
        }
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved {
        command: String,
        source: ResolutionSource,
        explanation: Option<String>,
    },
    Unresolved {
        reason: String,
    },
    Rejected {
        command: String,
        rule: RuleCategory,
    },
}

impl Resolution {
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Resolved { command, .. } | Self::Rejected { command, .. } => Some(command),
            Self::Unresolved { .. } => None,
        }
    }

    pub fn source(&self) -> Option<ResolutionSource> {
        match self {
            Self::Resolved { source, .. } => Some(*source),
            _ => None,
        }
    }

    fn resolved(command: impl Into<String>, source: ResolutionSource) -> Self {
        Self::Resolved {
            command: command.into(),
            source,
            explanation: None,
        }
    }

    fn unresolved(reason: &str) -> Self {
        Self::Unresolved {
            reason: reason.to_string(),
        }
    }
}

/// What `interpret_and_run` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpretOutcome {
    pub resolution: Resolution,
    /// `None` unless the command was actually run.
    pub execution: Option<ExecutionResult>,
}

impl InterpretOutcome {
    pub fn command(&self) -> Option<&str> {
        self.resolution.command()
    }

    pub fn source(&self) -> Option<ResolutionSource> {
        self.resolution.source()
    }

    pub fn succeeded(&self) -> bool {
        self.execution.as_ref().is_some_and(|e| e.succeeded)
    }
}

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    pub fallback_enabled: bool,
    pub default_timeout: Duration,
    pub external_timeout: Duration,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            default_timeout: DEFAULT_TIMEOUT,
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
        }
    }
}

pub struct CommandInterpreter {
    catalog: Arc<PatternCatalog>,
    validator: Arc<SafetyValidator>,
    os: Arc<OsDescriptor>,
    external: Option<Arc<dyn ExternalInterpreter>>,
    executor: Arc<dyn CommandExecutor>,
    config: InterpreterConfig,
}

impl CommandInterpreter {
    pub fn new(
        catalog: Arc<PatternCatalog>,
        validator: Arc<SafetyValidator>,
        os: Arc<OsDescriptor>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            catalog,
            validator,
            os,
            external: None,
            executor,
            config: InterpreterConfig::default(),
        }
    }

    pub fn with_external(mut self, external: Arc<dyn ExternalInterpreter>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(&self) -> &PatternCatalog {
        &self.catalog
    }

    pub fn os(&self) -> &OsDescriptor {
        &self.os
    }

    pub fn external_name(&self) -> Option<&str> {
        self.external
            .as_deref()
            .filter(|_| self.config.fallback_enabled)
            .map(|e| e.name())
    }

    /// Resolves a request to a gated command without running it.
    pub async fn resolve(&self, request: &CommandRequest) -> Resolution {
        let resolution = self.lookup(request).await;
        self.gate(resolution)
    }

    /// Runs a resolution produced by [`resolve`](Self::resolve). The gate is
    /// applied again so a hand-built `Resolved` cannot bypass it.
    pub async fn execute(&self, request: &CommandRequest, resolution: Resolution) -> InterpretOutcome {
        let resolution = self.gate(resolution);
        let target = match &resolution {
            Resolution::Resolved { command, source, .. } => Some((command.clone(), *source)),
            _ => None,
        };
        let Some((command, source)) = target else {
            return InterpretOutcome {
                resolution,
                execution: None,
            };
        };

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        info!(command = %command, source = %source, "executing command");
        let execution = self
            .executor
            .run(&command, timeout, request.working_dir.as_deref())
            .await;
        debug!(
            succeeded = execution.succeeded,
            exit_code = ?execution.exit_code,
            timed_out = execution.timed_out,
            "command finished"
        );

        InterpretOutcome {
            resolution,
            execution: Some(execution),
        }
    }

    pub async fn interpret_and_run(&self, request: &CommandRequest) -> InterpretOutcome {
        let resolution = self.resolve(request).await;
        self.execute(request, resolution).await
    }

    async fn lookup(&self, request: &CommandRequest) -> Resolution {
        let normalized = normalize(&request.text);
        if normalized.is_empty() {
            return Resolution::unresolved("empty request");
        }

        if let Some(command) = self.catalog.lookup(&normalized) {
            debug!(request = %normalized, command, "exact catalog match");
            return Resolution::resolved(command, ResolutionSource::ExactMatch);
        }

        if let Some(entry) = self.catalog.fuzzy_match(&normalized) {
            debug!(request = %normalized, phrase = %entry.phrase, "fuzzy catalog match");
            return Resolution::resolved(&entry.command, ResolutionSource::FuzzyMatch);
        }

        let Some(external) = self.external.as_ref().filter(|_| self.config.fallback_enabled)
        else {
            debug!(request = %normalized, "no pattern matched and no external interpreter");
            return Resolution::unresolved("no pattern matched");
        };

        let query = ExternalQuery {
            request: request.text.trim(),
            os: &self.os,
            working_dir: request.working_dir.as_deref(),
        };
        match tokio::time::timeout(self.config.external_timeout, external.interpret(&query)).await
        {
            Ok(Ok(suggestion)) if !suggestion.command.trim().is_empty() => {
                debug!(provider = external.name(), command = %suggestion.command, "external suggestion");
                Resolution::Resolved {
                    command: suggestion.command.trim().to_string(),
                    source: ResolutionSource::ExternalModel,
                    explanation: suggestion.explanation,
                }
            }
            Ok(Ok(_)) => {
                warn!(provider = external.name(), "external interpreter returned an empty command");
                Resolution::unresolved("no match")
            }
            Ok(Err(e)) => {
                warn!(provider = external.name(), error = %e, "external interpreter failed");
                Resolution::unresolved("no match")
            }
            Err(_) => {
                warn!(
                    provider = external.name(),
                    timeout_secs = self.config.external_timeout.as_secs(),
                    "external interpreter timed out"
                );
                Resolution::unresolved("no match")
            }
        }
    }

    fn gate(&self, resolution: Resolution) -> Resolution {
        let rule = match &resolution {
            Resolution::Resolved { command, .. } => self.validator.check(command),
            _ => None,
        };
        match (rule, resolution) {
            (Some(rule), Resolution::Resolved { command, .. }) => {
                warn!(command = %command, rule = %rule, "command rejected by safety check");
                Resolution::Rejected { command, rule }
            }
            (_, resolution) => resolution,
        }
    }
}
