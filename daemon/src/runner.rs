/// Launching of external collaborators (chooser, notifier, backend actions).
///
/// Handlers describe what to run as an [`Invocation`] and hand it to a
/// [`CommandRunner`]; the daemon uses [`SystemRunner`], tests use a recording fake.
use std::future::Future;
use std::io::ErrorKind;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// A fully rendered external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    /// `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[cfg(test)]
impl CommandOutput {
    /// A successful exit with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

pub trait CommandRunner {
    /// Runs `invocation` to completion. `Err` means the command could not be
    /// launched or its pipes failed; a nonzero exit is reported in the output.
    fn run(&self, invocation: &Invocation) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> impl Future<Output = Result<CommandOutput>> + Send {
        let invocation = invocation.clone();
        async move {
            let stdin = if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            };

            let mut child = Command::new(&invocation.program)
                .args(&invocation.args)
                .stdin(stdin)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                // Dropping the run future (shutdown mid-prompt) closes the child.
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("Failed to launch {}", invocation.program))?;

            if let Some(input) = &invocation.stdin {
                let mut pipe = child
                    .stdin
                    .take()
                    .context("Failed to open child stdin")?;
                match pipe.write_all(input.as_bytes()).await {
                    // The child may exit without reading its input.
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                        return Err(e).context("Failed to write child stdin");
                    }
                    _ => {}
                }
            }

            let output = child
                .wait_with_output()
                .await
                .with_context(|| format!("Failed to wait for {}", invocation.program))?;

            Ok(CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}
