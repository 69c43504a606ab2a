use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tai::core::{
    CommandExecutor, CommandInterpreter, CommandRequest, ExecutionResult, ExternalError,
    ExternalInterpreter, ExternalQuery, OsDescriptor, PatternCatalog, Platform, Resolution,
    ResolutionSource, RuleCategory, SafetyValidator, ShellFamily, Suggestion,
};
use tai::services::ProcessExecutor;

/// Executor double that records every spawn request.
#[derive(Default)]
struct CountingExecutor {
    spawns: AtomicUsize,
}

#[async_trait::async_trait]
impl CommandExecutor for CountingExecutor {
    async fn run(&self, _command: &str, _timeout: Duration, _dir: Option<&Path>) -> ExecutionResult {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        ExecutionResult {
            succeeded: true,
            exit_code: Some(0),
            ..ExecutionResult::default()
        }
    }
}

/// Remote model double with a canned answer.
struct StubModel {
    reply: Result<&'static str, ()>,
    calls: AtomicUsize,
}

impl StubModel {
    fn answering(command: &'static str) -> Self {
        Self {
            reply: Ok(command),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            reply: Err(()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl ExternalInterpreter for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn interpret(&self, query: &ExternalQuery<'_>) -> Result<Suggestion, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(query.os.platform, Platform::Linux);
        match self.reply {
            Ok(command) => Ok(Suggestion {
                command: command.to_string(),
                explanation: Some(format!("answer for '{}'", query.request)),
            }),
            Err(()) => Err(ExternalError::Provider("quota exceeded".to_string())),
        }
    }
}

fn linux() -> OsDescriptor {
    OsDescriptor::new(Platform::Linux, "ubuntu", "22.04", "x86_64", ShellFamily::Bash)
}

fn interpreter(executor: Arc<dyn CommandExecutor>) -> CommandInterpreter {
    let os = linux();
    CommandInterpreter::new(
        Arc::new(PatternCatalog::for_os(&os).unwrap()),
        Arc::new(SafetyValidator::new().unwrap()),
        Arc::new(os),
        executor,
    )
}

#[cfg(unix)]
#[tokio::test]
async fn list_files_runs_in_existing_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hi").unwrap();

    let interp = interpreter(Arc::new(ProcessExecutor::new()));
    let request = CommandRequest::new("list files").with_working_dir(dir.path());
    let outcome = interp.interpret_and_run(&request).await;

    assert_eq!(outcome.source(), Some(ResolutionSource::ExactMatch));
    assert_eq!(outcome.command(), Some("ls -la"));
    let execution = outcome.execution.expect("command should have run");
    assert!(execution.succeeded);
    assert!(execution.stdout.contains("hello.txt"));
}

#[tokio::test]
async fn go_home_resolves_exactly() {
    let interp = interpreter(Arc::new(CountingExecutor::default()));
    let resolution = interp.resolve(&CommandRequest::new("Go   Home")).await;
    assert_eq!(
        resolution,
        Resolution::Resolved {
            command: "cd ~".to_string(),
            source: ResolutionSource::ExactMatch,
            explanation: None,
        }
    );
}

#[tokio::test]
async fn go_home_changes_directory() {
    let interp = interpreter(Arc::new(ProcessExecutor::new()));
    let outcome = interp.interpret_and_run(&CommandRequest::new("go home")).await;
    let execution = outcome.execution.unwrap();
    assert!(execution.succeeded);
    assert!(execution.working_dir.is_some());
}

#[tokio::test]
async fn destructive_model_suggestion_is_rejected() {
    let executor = Arc::new(CountingExecutor::default());
    let model = Arc::new(StubModel::answering("rm -rf /"));
    let interp = interpreter(executor.clone()).with_external(model.clone());

    let outcome = interp
        .interpret_and_run(&CommandRequest::new("delete everything in root"))
        .await;

    assert_eq!(
        outcome.resolution,
        Resolution::Rejected {
            command: "rm -rf /".to_string(),
            rule: RuleCategory::RecursiveDelete,
        }
    );
    assert!(outcome.execution.is_none());
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert_eq!(executor.spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn nonsense_without_model_is_unresolved() {
    let executor = Arc::new(CountingExecutor::default());
    let interp = interpreter(executor.clone());
    let outcome = interp
        .interpret_and_run(&CommandRequest::new("asdkjqwe nonsense"))
        .await;
    assert_eq!(
        outcome.resolution,
        Resolution::Unresolved {
            reason: "no pattern matched".to_string()
        }
    );
    assert!(outcome.execution.is_none());
    assert_eq!(executor.spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_model_downgrades_to_unresolved() {
    let interp = interpreter(Arc::new(CountingExecutor::default()))
        .with_external(Arc::new(StubModel::failing()));
    let resolution = interp.resolve(&CommandRequest::new("asdkjqwe nonsense")).await;
    assert_eq!(
        resolution,
        Resolution::Unresolved {
            reason: "no match".to_string()
        }
    );
}

#[tokio::test]
async fn empty_model_answer_is_unresolved() {
    let interp = interpreter(Arc::new(CountingExecutor::default()))
        .with_external(Arc::new(StubModel::answering("   ")));
    let resolution = interp.resolve(&CommandRequest::new("asdkjqwe nonsense")).await;
    assert!(matches!(resolution, Resolution::Unresolved { .. }));
}

#[tokio::test]
async fn safe_model_suggestion_runs_with_original_casing() {
    let executor = Arc::new(CountingExecutor::default());
    let interp = interpreter(executor.clone())
        .with_external(Arc::new(StubModel::answering("du -sh Downloads")));
    let outcome = interp
        .interpret_and_run(&CommandRequest::new("  How big is Downloads "))
        .await;

    match &outcome.resolution {
        Resolution::Resolved {
            command,
            source,
            explanation,
        } => {
            assert_eq!(command, "du -sh Downloads");
            assert_eq!(*source, ResolutionSource::ExternalModel);
            assert_eq!(
                explanation.as_deref(),
                Some("answer for 'How big is Downloads'")
            );
        }
        other => panic!("unexpected resolution: {:?}", other),
    }
    assert!(outcome.succeeded());
    assert_eq!(executor.spawns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn catalog_hits_never_reach_the_model() {
    let model = Arc::new(StubModel::answering("echo nope"));
    let interp = interpreter(Arc::new(CountingExecutor::default())).with_external(model.clone());
    interp.resolve(&CommandRequest::new("list files")).await;
    interp.resolve(&CommandRequest::new("show disk usage please")).await;
    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn resolution_is_idempotent() {
    let interp = interpreter(Arc::new(CountingExecutor::default()));
    for text in ["list files", "please show disk usage", "asdkjqwe nonsense"] {
        let request = CommandRequest::new(text);
        let first = interp.resolve(&request).await;
        let second = interp.resolve(&request).await;
        assert_eq!(first, second, "resolution changed for '{}'", text);
    }
}

#[tokio::test]
async fn concurrent_requests_share_one_interpreter() {
    let executor = Arc::new(CountingExecutor::default());
    let interp = Arc::new(interpreter(executor.clone()));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let interp = Arc::clone(&interp);
        handles.push(tokio::spawn(async move {
            interp
                .interpret_and_run(&CommandRequest::new("show hostname"))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().succeeded());
    }
    assert_eq!(executor.spawns.load(Ordering::SeqCst), 8);
}

#[cfg(unix)]
#[tokio::test]
async fn slow_command_times_out_through_pipeline() {
    let interp = interpreter(Arc::new(ProcessExecutor::new()))
        .with_external(Arc::new(StubModel::answering("sleep 5")));
    let request = CommandRequest::new("wait a while").with_timeout(Duration::from_secs(1));
    let start = std::time::Instant::now();
    let outcome = interp.interpret_and_run(&request).await;
    let execution = outcome.execution.unwrap();
    assert!(!execution.succeeded);
    assert!(execution.timed_out);
    assert!(start.elapsed() < Duration::from_secs(2));
}
