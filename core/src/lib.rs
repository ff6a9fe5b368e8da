//! Conformance checks for a node's command-line RPC client.
//!
//! The CLI under test and the node behind it are black boxes: the library runs
//! the CLI as a child process, queries the node's RPC server directly for
//! ground truth, and compares the two.

pub mod compare;
pub mod config;
pub mod credential;
pub mod error;
pub mod invoker;
pub mod lifecycle;
pub mod readiness;
pub mod rpc;
pub mod scenario;
pub mod types;

pub use compare::{assert_equal, assert_process_fails, diff, Difference};
pub use config::HarnessConfig;
pub use credential::CredentialResolver;
pub use error::{CliFailure, HarnessError};
pub use invoker::{BackgroundInvocation, NodeCli, ProcessInvoker};
pub use lifecycle::{DaemonLifecycle, NodeLifecycle};
pub use readiness::{ReadinessPoller, ReadinessState};
pub use rpc::{HttpRpcClient, RpcBackend};
pub use scenario::{Outcome, Precondition, Scenario, ScenarioReport, ScenarioRunner, SuiteReport};
pub use types::{Credential, Invocation, InvocationResult, StdinPayload};
