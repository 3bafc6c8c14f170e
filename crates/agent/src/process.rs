use std::collections::VecDeque;
use std::process::{Output, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// A child process to launch directly, without a shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl ProcessInvocation {
    /// Builds an invocation from already-split words; the first word is the program.
    pub fn from_words(words: Vec<String>) -> Option<Self> {
        let mut words = words.into_iter();
        let program = words.next()?;
        Some(Self { program, args: words.collect(), env: Vec::new(), timeout: None })
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with status {code:?}: {stderr}")]
    NonZeroExit { program: String, code: Option<i32>, stderr: String },
    #[error("`{program}` did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: ProcessInvocation) -> Result<ProcessOutput, ProcessError>;
}

/// Runs invocations as tokio child processes.
///
/// A started child is supervised on its own task, so it runs to completion even
/// when the caller stops waiting. Only an elapsed timeout kills it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProcessRunner;

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, invocation: ProcessInvocation) -> Result<ProcessOutput, ProcessError> {
        let ProcessInvocation { program, args, env, timeout } = invocation;
        let start = Instant::now();

        let child = Command::new(&program)
            .args(&args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Launch { program: program.clone(), source })?;

        let output = tokio::spawn(supervise(child, program.clone(), timeout))
            .await
            .map_err(|join| ProcessError::Launch {
                program: program.clone(),
                source: std::io::Error::other(join),
            })??;

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            event_name = "process.finished",
            program = %program,
            exit_code = ?output.status.code(),
            duration_ms,
            "child process finished"
        );

        if !output.status.success() {
            return Err(ProcessError::NonZeroExit {
                program,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }
}

async fn supervise(
    mut child: Child,
    program: String,
    timeout: Option<Duration>,
) -> Result<Output, ProcessError> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let collected = async {
        let (status, stdout, stderr) =
            tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
        Ok::<_, std::io::Error>(Output { status: status?, stdout: stdout?, stderr: stderr? })
    };

    let result = match timeout {
        Some(limit) => {
            let waited = tokio::time::timeout(limit, collected).await;
            match waited {
                Ok(result) => result,
                Err(_) => {
                    if let Err(error) = child.kill().await {
                        warn!(
                            event_name = "process.kill_failed",
                            program = %program,
                            error = %error,
                            "timed-out child could not be killed"
                        );
                    }
                    return Err(ProcessError::TimedOut { program, timeout: limit });
                }
            }
        }
        None => collected.await,
    };
    result.map_err(|source| ProcessError::Launch { program, source })
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buffer).await?;
    }
    Ok(buffer)
}

/// Runner that never spawns anything: it records invocations and replays queued
/// results in order. Used wherever real provider calls must not happen.
#[derive(Default)]
pub struct ScriptedProcessRunner {
    results: Mutex<VecDeque<Result<String, (i32, String)>>>,
    invocations: Mutex<Vec<ProcessInvocation>>,
}

impl ScriptedProcessRunner {
    pub fn push_success(&self, stdout: impl Into<String>) {
        lock(&self.results).push_back(Ok(stdout.into()));
    }

    pub fn push_exit_failure(&self, code: i32, stderr: impl Into<String>) {
        lock(&self.results).push_back(Err((code, stderr.into())));
    }

    pub fn invocations(&self) -> Vec<ProcessInvocation> {
        lock(&self.invocations).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl ProcessRunner for ScriptedProcessRunner {
    async fn run(&self, invocation: ProcessInvocation) -> Result<ProcessOutput, ProcessError> {
        let program = invocation.program.clone();
        lock(&self.invocations).push(invocation);

        match lock(&self.results).pop_front() {
            Some(Ok(stdout)) => Ok(ProcessOutput { stdout, stderr: String::new(), duration_ms: 0 }),
            Some(Err((code, stderr))) => {
                Err(ProcessError::NonZeroExit { program, code: Some(code), stderr })
            }
            None => Err(ProcessError::Launch {
                program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no scripted result"),
            }),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::{ProcessError, ProcessInvocation, ProcessRunner, SystemProcessRunner};

    fn invocation(words: &[&str]) -> ProcessInvocation {
        ProcessInvocation::from_words(words.iter().map(|word| word.to_string()).collect())
            .expect("non-empty")
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_process() {
        let output = SystemProcessRunner.run(invocation(&["echo", "make_bucket: logs"])).await;
        assert_eq!(output.expect("runs").stdout.trim(), "make_bucket: logs");
    }

    #[tokio::test]
    async fn passes_environment_without_a_shell() {
        let output = SystemProcessRunner
            .run(
                invocation(&["sh", "-c", "printf %s \"$AWS_ACCESS_KEY_ID\""])
                    .with_env(vec![("AWS_ACCESS_KEY_ID".to_string(), "AKIATEST".to_string())]),
            )
            .await
            .expect("runs");
        assert_eq!(output.stdout, "AKIATEST");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let error = SystemProcessRunner
            .run(invocation(&["sh", "-c", "echo denied >&2; exit 3"]))
            .await
            .expect_err("fails");
        match error {
            ProcessError::NonZeroExit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let error = SystemProcessRunner
            .run(invocation(&["cirrus-test-no-such-binary"]))
            .await
            .expect_err("fails");
        assert!(matches!(error, ProcessError::Launch { .. }));
    }

    #[tokio::test]
    async fn slow_process_times_out() {
        let error = SystemProcessRunner
            .run(invocation(&["sleep", "5"]).with_timeout(Some(Duration::from_millis(100))))
            .await
            .expect_err("times out");
        assert!(matches!(error, ProcessError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn child_finishes_after_caller_stops_waiting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("created");
        let script = format!("sleep 0.3; touch '{}'", marker.display());

        let caller = tokio::spawn(async move {
            SystemProcessRunner.run(invocation(&["sh", "-c", &script])).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        caller.abort();
        assert!(caller.await.expect_err("aborted").is_cancelled());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !marker.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(marker.exists());
    }

    #[test]
    fn empty_word_list_has_no_program() {
        assert!(ProcessInvocation::from_words(Vec::new()).is_none());
    }
}
