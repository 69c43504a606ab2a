use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};
use which::which;

use crate::core::lib::{CommandExecutor, ExecutionResult};

/// How long to wait for pipe readers after a killed child before giving up on them.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Runs commands as child processes without a shell.
///
/// The command line is split with shell quoting rules and the first token is
/// spawned directly, so globs, pipes, redirections and `$VARS` are passed
/// through as literal arguments rather than expanded.
#[derive(Debug, Default, Clone)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }

    fn handle_cd(&self, args: &[String], working_dir: Option<&Path>) -> ExecutionResult {
        if args.len() > 1 {
            return ExecutionResult::failure("cd: too many arguments");
        }
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let target = match args.first().map(String::as_str) {
            None | Some("~") => home,
            Some(path) if path.starts_with("~/") => home.join(&path[2..]),
            Some(path) => {
                let path = Path::new(path);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    let base = working_dir
                        .map(Path::to_path_buf)
                        .or_else(|| env::current_dir().ok())
                        .unwrap_or_else(|| PathBuf::from("/"));
                    base.join(path)
                }
            }
        };

        match std::fs::canonicalize(&target) {
            Ok(dir) if dir.is_dir() => ExecutionResult {
                succeeded: true,
                exit_code: Some(0),
                working_dir: Some(dir),
                ..ExecutionResult::default()
            },
            Ok(dir) => ExecutionResult::failure(format!("cd: not a directory: {}", dir.display())),
            Err(e) => ExecutionResult::failure(format!("cd: {}: {}", target.display(), e)),
        }
    }

    async fn spawn(
        &self,
        argv: &[String],
        deadline: Instant,
        limit: Duration,
        working_dir: Option<&Path>,
    ) -> ExecutionResult {
        let program = &argv[0];
        if !program.contains(['/', '\\']) && which(program).is_err() {
            return ExecutionResult::failure(format!("command not found: {}", program));
        }

        let mut command = Command::new(program);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so background descendants can be killed with the child.
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return ExecutionResult::failure(format!("Failed to execute command: {}", e)),
        };
        let pid = child.id();
        debug!(program = %program, pid = ?pid, "spawned child process");

        let mut stdout = tokio::spawn(read_pipe(child.stdout.take()));
        let mut stderr = tokio::spawn(read_pipe(child.stderr.take()));

        let status = match timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                kill_process_group(pid);
                return ExecutionResult::failure(format!("Failed to wait for command: {}", e));
            }
            Err(_) => {
                warn!(program = %program, ?limit, "command timed out, killing");
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed out command");
                }
                return drain_after_timeout(limit, stdout).await;
            }
        };

        // Descendants that inherited the pipes can keep them open after the child exits.
        let joined = timeout_at(deadline, async { tokio::join!(&mut stdout, &mut stderr) }).await;
        kill_process_group(pid);
        match joined {
            Ok((out, err)) => ExecutionResult {
                succeeded: status.success(),
                stdout: out.unwrap_or_default(),
                stderr: err.unwrap_or_default(),
                exit_code: status.code(),
                ..ExecutionResult::default()
            },
            Err(_) => {
                warn!(program = %program, ?limit, "background process held output open past timeout");
                drain_after_timeout(limit, stdout).await
            }
        }
    }

    async fn run_chain(&self, command: &str, limit: Duration, working_dir: Option<&Path>) -> ExecutionResult {
        let tokens = match shell_words::split(command) {
            Ok(tokens) => tokens,
            Err(e) => return ExecutionResult::failure(format!("Could not parse command: {}", e)),
        };
        let segments = split_chain(tokens);
        if segments.is_empty() {
            return ExecutionResult::failure("Empty command provided");
        }

        // One budget for the whole chain.
        let deadline = Instant::now() + limit;
        let mut dir = working_dir.map(Path::to_path_buf);
        let mut combined = ExecutionResult {
            succeeded: true,
            ..ExecutionResult::default()
        };
        for argv in segments {
            let result = if deadline.saturating_duration_since(Instant::now()).is_zero() {
                ExecutionResult::timeout(limit)
            } else if argv[0] == "cd" {
                self.handle_cd(&argv[1..], dir.as_deref())
            } else {
                self.spawn(&argv, deadline, limit, dir.as_deref()).await
            };

            combined.stdout.push_str(&result.stdout);
            combined.stderr.push_str(&result.stderr);
            combined.exit_code = result.exit_code;
            combined.timed_out = result.timed_out;
            if let Some(new_dir) = result.working_dir {
                dir = Some(new_dir.clone());
                combined.working_dir = Some(new_dir);
            }
            if !result.succeeded {
                combined.succeeded = false;
                break;
            }
        }
        combined
    }
}

/// Timeout result carrying whatever stdout the killed process had flushed.
async fn drain_after_timeout(limit: Duration, stdout: JoinHandle<String>) -> ExecutionResult {
    let mut result = ExecutionResult::timeout(limit);
    if let Ok(Ok(out)) = timeout(DRAIN_GRACE, stdout).await {
        result.stdout = out;
    }
    result
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    // SAFETY: kill(2) has no memory effects; a group that is already gone yields ESRCH.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[async_trait::async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, command: &str, timeout: Duration, working_dir: Option<&Path>) -> ExecutionResult {
        if command.trim().is_empty() {
            return ExecutionResult::failure("Empty command provided");
        }
        self.run_chain(command, timeout, working_dir).await
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "error reading child output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Splits tokens on unquoted `;` and `&&` into sequential argument vectors.
pub fn split_chain(tokens: Vec<String>) -> Vec<Vec<String>> {
    let mut segments = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if token == "&&" || token == ";" {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
        } else if let Some(stripped) = token.strip_suffix(';') {
            if !stripped.is_empty() {
                current.push(stripped.to_string());
            }
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Trims output and caps it at `max_lines`, noting how many lines were cut.
pub fn format_output(output: &str, max_lines: usize) -> String {
    let trimmed = output.trim();
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() <= max_lines {
        return trimmed.to_string();
    }
    let mut shown = lines[..max_lines].join("\n");
    shown.push_str(&format!("\n... ({} more lines)", lines.len() - max_lines));
    shown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        shell_words::split(s).unwrap()
    }

    #[test]
    fn chain_splits_on_separators() {
        assert_eq!(
            split_chain(words("mkdir out && cd out; ls -la")),
            vec![
                vec!["mkdir".to_string(), "out".to_string()],
                vec!["cd".to_string(), "out".to_string()],
                vec!["ls".to_string(), "-la".to_string()],
            ]
        );
    }

    #[test]
    fn quoted_separators_stay_literal() {
        assert_eq!(
            split_chain(words("echo 'a && b'")),
            vec![vec!["echo".to_string(), "a && b".to_string()]]
        );
    }

    #[test]
    fn format_output_truncates() {
        let text = (1..=10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(format_output(&text, 3), "1\n2\n3\n... (7 more lines)");
        assert_eq!(format_output("  short\n", 3), "short");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_command_has_empty_stderr() {
        let result = ProcessExecutor::new()
            .run("true", Duration::from_secs(5), None)
            .await;
        assert!(result.succeeded);
        assert!(result.stderr.is_empty());
        assert_eq!(result.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quoted_arguments_are_single_tokens() {
        let result = ProcessExecutor::new()
            .run("echo 'hello   world' $HOME", Duration::from_secs(5), None)
            .await;
        assert!(result.succeeded);
        assert_eq!(result.stdout.trim(), "hello   world $HOME");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let result = ProcessExecutor::new()
            .run("false", Duration::from_secs(5), None)
            .await;
        assert!(!result.succeeded);
        assert!(!result.timed_out);
        assert_eq!(result.exit_code, Some(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_child() {
        let start = Instant::now();
        let result = ProcessExecutor::new()
            .run("sleep 10", Duration::from_secs(1), None)
            .await;
        assert!(!result.succeeded);
        assert!(result.timed_out);
        assert!(result.stderr.contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chain_shares_one_timeout() {
        let start = Instant::now();
        let result = ProcessExecutor::new()
            .run("sleep 0.8; sleep 0.8; sleep 0.8", Duration::from_secs(1), None)
            .await;
        assert!(!result.succeeded);
        assert!(result.timed_out);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn background_descendant_cannot_outlive_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("sleep 3 && touch {} & echo hi", marker.display());

        let start = Instant::now();
        let result = ProcessExecutor::new()
            .run(
                &format!("sh -c {}", shell_words::quote(&script)),
                Duration::from_secs(1),
                None,
            )
            .await;
        assert!(result.timed_out);
        assert!(!result.succeeded);
        assert!(start.elapsed() < Duration::from_secs(2));

        // The backgrounded job was killed with its group.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn missing_program_reports_in_stderr() {
        let result = ProcessExecutor::new()
            .run("definitely-not-a-real-binary-xyz --flag", Duration::from_secs(5), None)
            .await;
        assert!(!result.succeeded);
        assert!(result.stderr.contains("command not found"));
    }

    #[tokio::test]
    async fn unbalanced_quote_is_failure() {
        let result = ProcessExecutor::new()
            .run("echo 'oops", Duration::from_secs(5), None)
            .await;
        assert!(!result.succeeded);
        assert!(result.stderr.contains("Could not parse"));
    }

    #[tokio::test]
    async fn cd_reports_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let result = ProcessExecutor::new()
            .run("cd sub", Duration::from_secs(5), Some(dir.path()))
            .await;
        assert!(result.succeeded);
        assert_eq!(
            result.working_dir,
            Some(std::fs::canonicalize(dir.path().join("sub")).unwrap())
        );

        let missing = ProcessExecutor::new()
            .run("cd nope", Duration::from_secs(5), Some(dir.path()))
            .await;
        assert!(!missing.succeeded);
        assert!(missing.working_dir.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chain_runs_in_directory_from_cd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        std::fs::write(dir.path().join("inner").join("marker.txt"), "x").unwrap();
        let result = ProcessExecutor::new()
            .run("cd inner && ls", Duration::from_secs(5), Some(dir.path()))
            .await;
        assert!(result.succeeded);
        assert!(result.stdout.contains("marker.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chain_stops_at_first_failure() {
        let result = ProcessExecutor::new()
            .run("false; echo after", Duration::from_secs(5), None)
            .await;
        assert!(!result.succeeded);
        assert!(!result.stdout.contains("after"));
    }
}
