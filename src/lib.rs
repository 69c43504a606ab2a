//! Turns short plain-language requests into shell commands for the current
//! platform, checks them against a denylist of destructive operations and
//! runs them without a shell.

pub mod config;
pub mod core;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::core::{
    CommandInterpreter, InterpreterConfig, OsDescriptor, PatternCatalog, SafetyValidator, TaiResult,
};
use crate::services::ProcessExecutor;

/// Wires an interpreter from settings for the given platform. Fails only on
/// malformed built-in data.
pub fn build_interpreter(settings: &Settings, os: OsDescriptor) -> TaiResult<CommandInterpreter> {
    let catalog = PatternCatalog::for_os(&os)?;
    let validator = SafetyValidator::new()?;
    let external = services::ai::from_settings(settings);

    let config = InterpreterConfig {
        fallback_enabled: external.is_some(),
        default_timeout: Duration::from_secs(settings.execution.timeout_secs),
        external_timeout: Duration::from_secs(settings.ai.request_timeout_secs.max(1)),
    };

    let interpreter = CommandInterpreter::new(
        Arc::new(catalog),
        Arc::new(validator),
        Arc::new(os),
        Arc::new(ProcessExecutor::new()),
    )
    .with_config(config);

    Ok(match external {
        Some(external) => interpreter.with_external(external),
        None => interpreter,
    })
}
