//! Spawning of the wrapped command-line tools (`gcloud`, `kubectl`, `helm`,
//! `terraform`).
//!
//! Both output streams of a child are drained while it runs: stdout by a
//! spawned task and stderr on the calling task. Each stream is echoed live
//! (unless echo is suppressed) and captured for the caller.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const MASK: &str = "*****";

/// An external program invocation, built once and consumed by a [`CommandRunner`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    /// Indices into `args` whose values must never be printed.
    masked: Vec<usize>,
    working_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    suppress_echo: bool,
    ignore_failure: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            ..CommandSpec::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an argument carrying secret material; it is shown as `*****`
    /// wherever the command line is displayed.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.masked.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets an environment variable for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn suppress_echo(mut self) -> Self {
        self.suppress_echo = true;
        self
    }

    pub fn ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }
}

#[cfg(test)]
impl CommandSpec {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_working_dir(&self) -> Option<&std::path::Path> {
        self.working_dir.as_deref()
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    pub fn is_echo_suppressed(&self) -> bool {
        self.suppress_echo
    }

    pub fn is_failure_ignored(&self) -> bool {
        self.ignore_failure
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for (index, arg) in self.args.iter().enumerate() {
            if self.masked.contains(&index) {
                write!(f, " {MASK}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured output of a finished process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandResult {
    #[cfg(test)]
    pub fn from_output(output: impl Into<String>) -> Self {
        CommandResult {
            stdout: output.into().into_bytes(),
            stderr: Vec::new(),
        }
    }

    /// stdout followed by stderr, as text.
    pub fn output(&self) -> String {
        let mut combined = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        combined.extend_from_slice(&self.stdout);
        combined.extend_from_slice(&self.stderr);
        String::from_utf8_lossy(&combined).into_owned()
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion.
    ///
    /// A non-zero exit is an [`Error::ProcessFailure`] unless `spec` ignores
    /// failures, in which case it is logged and an empty result is returned.
    async fn run(&self, spec: CommandSpec) -> Result<CommandResult>;
}

/// Runs commands as real child processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(&self, spec: CommandSpec) -> Result<CommandResult> {
        debug!("running `{spec}`");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(spec.envs.iter().map(|(key, value)| (key, value)))
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let echo = !spec.suppress_echo;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            match stdout {
                Some(pipe) => drain(pipe, echo.then(tokio::io::stdout)).await,
                None => Ok(Vec::new()),
            }
        });

        let stderr = match stderr {
            Some(pipe) => drain(pipe, echo.then(tokio::io::stderr)).await,
            None => Ok(Vec::new()),
        };

        // Joined before waiting on the child, whatever the stderr outcome.
        let drained = stdout_task
            .await
            .map_err(std::io::Error::other)
            .and_then(|stdout| stdout)
            .and_then(|stdout| stderr.map(|stderr| (stdout, stderr)));
        let (stdout, stderr) = reap_on_error(&mut child, drained).await?;

        let status = child.wait().await?;

        if !status.success() {
            if spec.ignore_failure {
                warn!("`{spec}` failed ({status}), ignoring");
                return Ok(CommandResult::default());
            }

            return Err(Error::ProcessFailure {
                command: spec.to_string(),
                code: status.code(),
            });
        }

        Ok(CommandResult { stdout, stderr })
    }
}

/// Kills and waits for `child` when draining its output failed, so no
/// process outlives the error.
async fn reap_on_error<T>(child: &mut Child, drained: std::io::Result<T>) -> Result<T> {
    match drained {
        Ok(drained) => Ok(drained),
        Err(err) => {
            if let Err(kill_err) = child.kill().await {
                warn!("could not kill child after output error: {kill_err}");
            }
            Err(err.into())
        }
    }
}

/// Reads `reader` to the end, copying every chunk to `echo` when present.
async fn drain<R, W>(mut reader: R, mut echo: Option<W>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }

        if let Some(out) = echo.as_mut() {
            out.write_all(&chunk[..read]).await?;
        }
        captured.extend_from_slice(&chunk[..read]);
    }

    if let Some(out) = echo.as_mut() {
        out.flush().await?;
    }

    Ok(captured)
}
