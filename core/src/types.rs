//! Domain types: invocations of the CLI under test and their results.

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::HarnessError;

/// Argument prefixes whose value is a secret and must never be printed.
const SECRET_ARG_PREFIXES: &[&str] = &["-rpcpassword="];

/// Text written to the child's standard input: a secret on the first line,
/// optionally followed by further lines (e.g. a batch of commands read by
/// `-stdin`).
#[derive(Clone, PartialEq, Eq)]
pub struct StdinPayload {
    secret: String,
    rest: Option<String>,
}

impl StdinPayload {
    pub fn secret(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            rest: None,
        }
    }

    pub fn secret_then(secret: impl Into<String>, rest: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            rest: Some(rest.into()),
        }
    }

    /// The exact bytes handed to the child.
    pub fn render(&self) -> String {
        match &self.rest {
            None => self.secret.clone(),
            Some(rest) => format!("{}\n{rest}", self.secret),
        }
    }

    /// True if `arg` would hand the secret to the child on its command line,
    /// either bare or as the value of an `-option=`.
    fn is_carried_by(&self, arg: &str) -> bool {
        !self.secret.is_empty()
            && (arg == self.secret
                || arg
                    .strip_suffix(self.secret.as_str())
                    .is_some_and(|head| head.ends_with('=')))
    }
}

impl fmt::Debug for StdinPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdinPayload")
            .field("secret", &"<redacted>")
            .field("rest", &self.rest)
            .finish()
    }
}

/// One fully specified run of an executable. Immutable once built.
#[derive(Clone)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    stdin: Option<StdinPayload>,
    current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            current_dir: None,
        }
    }

    /// Attach a stdin payload. Rejected if an argument also carries the secret,
    /// as a bare value or after `=`.
    pub fn with_stdin(mut self, payload: StdinPayload) -> Result<Self, HarnessError> {
        if self.args.iter().any(|a| payload.is_carried_by(a)) {
            return Err(HarnessError::SecretInArguments);
        }
        self.stdin = Some(payload);
        Ok(self)
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn stdin(&self) -> Option<&StdinPayload> {
        self.stdin.as_ref()
    }

    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Arguments with secret values masked, for logs and error reports.
    pub fn redacted_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                match SECRET_ARG_PREFIXES
                    .iter()
                    .find(|prefix| arg.starts_with(**prefix))
                {
                    Some(prefix) if arg.len() > prefix.len() => format!("{prefix}***"),
                    _ => arg.clone(),
                }
            })
            .collect()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in self.redacted_args() {
            write!(f, " {arg}")?;
        }
        match &self.stdin {
            Some(_) => write!(f, " <stdin: redacted>"),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.redacted_args())
            .field("stdin", &self.stdin)
            .field("current_dir", &self.current_dir)
            .finish()
    }
}

/// Outcome of a completed child process.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    /// Exit code, or `SIGNALLED_EXIT_CODE` if the child was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Structured stdout; present only on success when stdout is JSON.
    pub parsed: Option<Value>,
}

impl InvocationResult {
    pub const SIGNALLED_EXIT_CODE: i32 = -1;

    pub fn new(exit_code: i32, stdout: String, stderr: String) -> Self {
        let parsed = if exit_code == 0 {
            parse_structured(&stdout)
        } else {
            None
        };
        Self {
            exit_code,
            stdout,
            stderr,
            parsed,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The structured value, or the trimmed stdout as a JSON string.
    pub fn output(&self) -> Value {
        self.parsed
            .clone()
            .unwrap_or_else(|| Value::String(self.stdout.trim().to_owned()))
    }

    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stderr, self.stdout)
    }
}

fn parse_structured(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Username/password pair for the node's RPC server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What a single assertion expects.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonExpectation {
    /// The process must exit with `exit_code` and mention `substring`.
    Failure { exit_code: i32, substring: String },
    /// Two values must be structurally equal.
    Equivalence { expected: Value, actual: Value },
}
