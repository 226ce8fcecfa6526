//! The process boundary: every task becomes one subprocess.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

/// Starts processes for the scheduler.
///
/// The future resolves to the exit code (`None` when killed by a signal).
/// A launch error or a timeout resolves to `Err`.
pub trait Launcher: Send + Sync + 'static {
    fn launch(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = io::Result<Option<i32>>> + Send + 'static;
}

/// Runs real subprocesses with inherited stdout and stderr.
#[derive(Debug, Clone)]
pub struct SystemLauncher {
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl SystemLauncher {
    pub fn new(working_dir: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

impl Launcher for SystemLauncher {
    fn launch(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = io::Result<Option<i32>>> + Send + 'static {
        let working_dir = self.working_dir.clone();
        let timeout = self.timeout;

        async move {
            debug!(program = %invocation.program, args = ?invocation.args, "spawning process");

            let mut command = Command::new(&invocation.program);
            command
                .args(&invocation.args)
                .current_dir(&working_dir)
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true);
            if invocation.stdin.is_some() {
                command.stdin(Stdio::piped());
            } else {
                command.stdin(Stdio::null());
            }

            let mut child = command.spawn()?;

            if let Some(bytes) = invocation.stdin
                && let Some(mut stdin) = child.stdin.take()
            {
                stdin.write_all(&bytes).await?;
                // Closing stdin tells the compiler the input is complete
                drop(stdin);
            }

            let status = match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("timed out after {}s", limit.as_secs_f64()),
                        ));
                    }
                },
                None => child.wait().await?,
            };

            Ok(status.code())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str]) -> Invocation {
        Invocation {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            stdin: None,
        }
    }

    #[tokio::test]
    async fn test_exit_codes() {
        let launcher = SystemLauncher::new(".", None);
        assert_eq!(launcher.launch(invocation("true", &[])).await.unwrap(), Some(0));
        assert_eq!(
            launcher.launch(invocation("sh", &["-c", "exit 3"])).await.unwrap(),
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_a_launch_error() {
        let launcher = SystemLauncher::new(".", None);
        assert!(
            launcher
                .launch(invocation("/no/such/compiler", &[]))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = SystemLauncher::new(dir.path(), None);
        let mut inv = invocation("sh", &["-c", "cat > piped.txt"]);
        inv.stdin = Some(b"int main() {}".to_vec());

        assert_eq!(launcher.launch(inv).await.unwrap(), Some(0));
        assert_eq!(
            std::fs::read(dir.path().join("piped.txt")).unwrap(),
            b"int main() {}"
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let launcher = SystemLauncher::new(".", Some(Duration::from_millis(50)));
        let err = launcher
            .launch(invocation("sleep", &["5"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
