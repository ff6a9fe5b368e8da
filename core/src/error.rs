//! Typed errors for cliconform-core.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::compare::{render_differences, Difference};

/// Errors raised by the harness itself.
///
/// Failures reported by the CLI under test are not errors of the harness; they
/// come back as an `InvocationResult` with a non-zero exit code and are only
/// turned into `UnexpectedOutcome` when an assertion about them fails.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("RPC credentials unavailable at {}: {reason}", path.display())]
    CredentialUnavailable { path: PathBuf, reason: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write stdin of {program}: {source}")]
    StdinWrite {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to collect output of {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("background invocation did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("piped secret must not appear in the argument list")]
    SecretInArguments,

    #[error("RPC {method} returned error {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("RPC transport failure calling {method}: {reason}")]
    Transport { method: String, reason: String },

    #[error("{context} mismatch:\n{}", render_differences(.differences))]
    Mismatch {
        context: String,
        differences: Vec<Difference>,
    },

    #[error(
        "`{invocation}`: expected {expected}, got {actual}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}"
    )]
    UnexpectedOutcome {
        invocation: String,
        expected: String,
        actual: String,
        stdout: String,
        stderr: String,
    },

    #[error("{0}")]
    Assertion(String),

    #[error("precondition `{precondition}` cannot be established for {scenario}")]
    PreconditionUnmet {
        scenario: &'static str,
        precondition: String,
    },

    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),

    #[error("suite exceeded its {0:?} timeout")]
    SuiteTimeout(Duration),

    #[error("node lifecycle: {0}")]
    Lifecycle(String),
}

impl HarnessError {
    /// Infrastructure failures are not part of the system under test.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::StdinWrite { .. } | Self::Wait { .. } | Self::Join(_)
        )
    }
}

/// Failure kinds the node CLI reports. All of them exit with code 1 and are told
/// apart only by the text of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliFailure {
    /// Server reachable but the credential was rejected.
    AuthenticationRejected,
    /// Server unreachable (wrong port, not started yet).
    ConnectionUnavailable,
    /// The cookie file named on the command line does not exist.
    CredentialSourceUnavailable,
    /// Invalid flag combination, e.g. `-getinfo` with positional arguments.
    ArgumentValidation,
}

impl CliFailure {
    pub const EXIT_CODE: i32 = 1;

    pub fn message(self) -> &'static str {
        match self {
            Self::AuthenticationRejected => "Incorrect rpcuser or rpcpassword",
            Self::ConnectionUnavailable => "Could not connect to the server",
            Self::CredentialSourceUnavailable => "Could not locate RPC credentials",
            Self::ArgumentValidation => "-getinfo takes no arguments",
        }
    }
}
