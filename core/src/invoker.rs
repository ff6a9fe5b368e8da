//! Child-process invocation of the CLI under test.

use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::HarnessError;
use crate::types::{Invocation, InvocationResult};

/// Spawns exactly one child per call. Holds no state between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Run to completion. A non-zero exit code is returned in the result, not
    /// as an error.
    pub async fn invoke(&self, invocation: &Invocation) -> Result<InvocationResult, HarnessError> {
        let program = invocation.program_name();
        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.args())
            .stdin(if invocation.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = invocation.current_dir() {
            cmd.current_dir(dir);
        }

        debug!(%invocation, "spawning");
        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Write the whole payload and close the pipe before reading anything back.
        if let Some(payload) = invocation.stdin() {
            let mut stdin = child.stdin.take().ok_or_else(|| HarnessError::StdinWrite {
                program: program.clone(),
                source: std::io::Error::other("stdin was not captured"),
            })?;
            match stdin.write_all(payload.render().as_bytes()).await {
                Ok(()) => {}
                // The child exited or closed stdin early; its exit code tells the story.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    warn!(%invocation, "child closed stdin before the payload was written");
                }
                Err(source) => return Err(HarnessError::StdinWrite { program, source }),
            }
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| HarnessError::Wait {
                program: program.clone(),
                source,
            })?;

        let exit_code = output
            .status
            .code()
            .unwrap_or(InvocationResult::SIGNALLED_EXIT_CODE);
        debug!(%invocation, exit_code, "exited");
        Ok(InvocationResult::new(
            exit_code,
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    /// Start the invocation on the runtime and return at once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_background(&self, invocation: Invocation) -> BackgroundInvocation {
        let invoker = *self;
        let description = invocation.to_string();
        let handle = tokio::spawn(async move { invoker.invoke(&invocation).await });
        BackgroundInvocation {
            description,
            handle: Some(handle),
        }
    }
}

/// Handle to an invocation running in the background. Dropping it before
/// `join` aborts the task, and the child is killed with it.
#[derive(Debug)]
pub struct BackgroundInvocation {
    description: String,
    handle: Option<JoinHandle<Result<InvocationResult, HarnessError>>>,
}

impl BackgroundInvocation {
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub async fn join(mut self) -> Result<InvocationResult, HarnessError> {
        match self.handle.take() {
            Some(handle) => handle.await?,
            None => unreachable!("handle is only taken by join, which consumes self"),
        }
    }
}

impl Drop for BackgroundInvocation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Builds invocations of the node CLI: `<program> -datadir=<dir> <options..> [command] [args..]`.
#[derive(Debug, Clone)]
pub struct NodeCli {
    program: PathBuf,
    datadir: PathBuf,
    options: Vec<String>,
}

impl NodeCli {
    pub fn new(program: impl Into<PathBuf>, datadir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            datadir: datadir.into(),
            options: Vec::new(),
        }
    }

    /// A copy with extra options appended after the existing ones.
    pub fn with<I, S>(&self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.options.extend(options.into_iter().map(Into::into));
        next
    }

    /// Options only, no command (e.g. `-version`, `-getinfo`).
    pub fn bare(&self) -> Invocation {
        Invocation::new(&self.program, self.base_args())
    }

    pub fn command(&self, command: &str, args: &[Value]) -> Invocation {
        let mut all = self.base_args();
        all.push(command.to_owned());
        all.extend(args.iter().map(arg_to_cli));
        Invocation::new(&self.program, all)
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.options.len() + 1);
        args.push(format!("-datadir={}", self.datadir.display()));
        args.extend(self.options.iter().cloned());
        args
    }
}

/// Render a positional argument the way the CLI expects it on the command line.
pub fn arg_to_cli(arg: &Value) -> String {
    match arg {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_owned(),
        other => other.to_string(),
    }
}
