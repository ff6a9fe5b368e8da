//! Readiness wait: run the CLI with its own wait-for-connection flag against a
//! server that may still be starting.
//!
//! The poller does not retry. The CLI retries internally; what is under test
//! is that it eventually returns the right answer instead of a connection
//! error. Any overall bound lives with the caller.

use serde_json::Value;
use tracing::info;

use crate::credential::CredentialResolver;
use crate::error::HarnessError;
use crate::invoker::{BackgroundInvocation, NodeCli, ProcessInvoker};
use crate::types::InvocationResult;

pub const WAIT_FLAG: &str = "-rpcwait";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Nothing launched yet.
    Unstarted,
    /// Credential confirmed, CLI running and waiting on the server.
    Waiting,
    /// CLI exited.
    Complete,
}

#[derive(Debug)]
pub struct ReadinessPoller {
    invoker: ProcessInvoker,
    resolver: CredentialResolver,
    state: ReadinessState,
}

impl ReadinessPoller {
    pub fn new(invoker: ProcessInvoker, resolver: CredentialResolver) -> Self {
        Self {
            invoker,
            resolver,
            state: ReadinessState::Unstarted,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    /// Launch `<cli> -rpcwait <command> <args..>` in the background.
    ///
    /// Some credential (cookie or explicit conf-file user/password) must already
    /// resolve; without one the CLI fails on authentication instead of waiting
    /// on connectivity.
    pub fn launch(
        &mut self,
        cli: &NodeCli,
        command: &str,
        args: &[Value],
    ) -> Result<BackgroundInvocation, HarnessError> {
        self.resolver.resolve()?;
        let invocation = cli.with([WAIT_FLAG]).command(command, args);
        let handle = self.invoker.spawn_background(invocation);
        info!(invocation = handle.description(), "waiting for RPC server");
        self.state = ReadinessState::Waiting;
        Ok(handle)
    }

    /// Block until the launched CLI exits.
    pub async fn complete(
        &mut self,
        handle: BackgroundInvocation,
    ) -> Result<InvocationResult, HarnessError> {
        let result = handle.join().await?;
        self.state = ReadinessState::Complete;
        Ok(result)
    }

    /// `launch` followed by `complete`: exactly one child invocation.
    pub async fn wait_for(
        &mut self,
        cli: &NodeCli,
        command: &str,
        args: &[Value],
    ) -> Result<InvocationResult, HarnessError> {
        let handle = self.launch(cli, command, args)?;
        self.complete(handle).await
    }
}
