//! Scenario catalogue and the runner that sequences it.
//!
//! Scenarios run one after another in a fixed order: plain calls, then
//! authenticated calls, then failure paths, then those that restart the node.
//! The first failure ends the run.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::compare::{
    assert_equal, assert_fields_match, assert_process_fails, expect_success, FieldMapping,
};
use crate::config::HarnessConfig;
use crate::error::{CliFailure, HarnessError};
use crate::invoker::{NodeCli, ProcessInvoker};
use crate::lifecycle::NodeLifecycle;
use crate::readiness::ReadinessPoller;
use crate::rpc::{indicates_missing_wallet, RpcBackend};
use crate::types::{ComparisonExpectation, Invocation, InvocationResult, StdinPayload};

/// Sent with `-stdinrpcpass` where authentication must fail.
const WRONG_PASSWORD: &str = "not-the-rpc-password";

/// `-getinfo` fields and the RPC each one is summarised from.
#[rustfmt::skip]
pub const GETINFO_FIELDS: &[FieldMapping] = &[
    FieldMapping { field: "version", source: "getnetworkinfo", pointer: "/version" },
    FieldMapping { field: "blocks", source: "getblockchaininfo", pointer: "/blocks" },
    FieldMapping { field: "headers", source: "getblockchaininfo", pointer: "/headers" },
    FieldMapping { field: "timeoffset", source: "getnetworkinfo", pointer: "/timeoffset" },
    FieldMapping { field: "connections", source: "getnetworkinfo", pointer: "/connections" },
    FieldMapping { field: "proxy", source: "getnetworkinfo", pointer: "/networks/0/proxy" },
    FieldMapping { field: "difficulty", source: "getblockchaininfo", pointer: "/difficulty" },
    FieldMapping { field: "chain", source: "getblockchaininfo", pointer: "/chain" },
];

/// `-getinfo` fields that only exist with a wallet.
#[rustfmt::skip]
pub const GETINFO_WALLET_FIELDS: &[FieldMapping] = &[
    FieldMapping { field: "balance", source: "getwalletinfo", pointer: "/balance" },
    FieldMapping { field: "keypoolsize", source: "getwalletinfo", pointer: "/keypoolsize" },
    FieldMapping { field: "unlocked_until", source: "getwalletinfo", pointer: "/unlocked_until" },
    FieldMapping { field: "paytxfee", source: "getwalletinfo", pointer: "/paytxfee" },
    FieldMapping { field: "relayfee", source: "getnetworkinfo", pointer: "/relayfee" },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    NodeRunning,
    NodeStopped,
    WalletPresent,
    LifecycleControl,
}

impl Precondition {
    pub fn name(self) -> &'static str {
        match self {
            Self::NodeRunning => "node_running",
            Self::NodeStopped => "node_stopped",
            Self::WalletPresent => "wallet_present",
            Self::LifecycleControl => "lifecycle_control",
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    VersionQuery,
    WalletInfoEquivalence,
    BlockchainInfoEquivalence,
    StdinPassword,
    StdinBatch,
    UnreachableServer,
    MissingCookieFile,
    GetInfoRejectsArguments,
    GetInfoEquivalence,
    GetInfoWalletFields,
    VersionWhileStopped,
    WaitForConnection,
}

impl Scenario {
    /// Execution order.
    pub const ALL: [Scenario; 12] = [
        Self::VersionQuery,
        Self::WalletInfoEquivalence,
        Self::BlockchainInfoEquivalence,
        Self::StdinPassword,
        Self::StdinBatch,
        Self::UnreachableServer,
        Self::MissingCookieFile,
        Self::GetInfoRejectsArguments,
        Self::GetInfoEquivalence,
        Self::GetInfoWalletFields,
        Self::VersionWhileStopped,
        Self::WaitForConnection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::VersionQuery => "version_query",
            Self::WalletInfoEquivalence => "walletinfo_equivalence",
            Self::BlockchainInfoEquivalence => "blockchaininfo_equivalence",
            Self::StdinPassword => "stdin_password",
            Self::StdinBatch => "stdin_batch",
            Self::UnreachableServer => "unreachable_server",
            Self::MissingCookieFile => "missing_cookie_file",
            Self::GetInfoRejectsArguments => "getinfo_rejects_arguments",
            Self::GetInfoEquivalence => "getinfo_equivalence",
            Self::GetInfoWalletFields => "getinfo_wallet_fields",
            Self::VersionWhileStopped => "version_while_stopped",
            Self::WaitForConnection => "wait_for_connection",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::VersionQuery => "-version prints the client banner, identically twice",
            Self::WalletInfoEquivalence => "getwalletinfo via CLI equals the RPC",
            Self::BlockchainInfoEquivalence => "getblockchaininfo via CLI equals the RPC",
            Self::StdinPassword => "-stdinrpcpass authenticates; a wrong password is rejected",
            Self::StdinBatch => "-stdin -stdinrpcpass runs piped commands after the password line",
            Self::UnreachableServer => "a non-listening port fails with a connection error",
            Self::MissingCookieFile => "a nonexistent -rpccookiefile fails to locate credentials",
            Self::GetInfoRejectsArguments => "-getinfo with positional arguments is rejected",
            Self::GetInfoEquivalence => "-getinfo fields equal the RPCs they summarise",
            Self::GetInfoWalletFields => "-getinfo wallet fields equal the wallet RPCs",
            Self::VersionWhileStopped => "-version works with the node stopped",
            Self::WaitForConnection => "-rpcwait blocks until a restarting node answers",
        }
    }

    /// Checked in order; node state is established through the lifecycle.
    pub fn preconditions(self) -> &'static [Precondition] {
        use Precondition::*;
        match self {
            Self::VersionQuery
            | Self::BlockchainInfoEquivalence
            | Self::StdinPassword
            | Self::StdinBatch
            | Self::GetInfoEquivalence => &[NodeRunning],
            Self::WalletInfoEquivalence | Self::GetInfoWalletFields => {
                &[NodeRunning, WalletPresent]
            }
            Self::UnreachableServer | Self::MissingCookieFile | Self::GetInfoRejectsArguments => &[],
            Self::VersionWhileStopped | Self::WaitForConnection => {
                &[LifecycleControl, NodeStopped]
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Skipped { reason: String },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub passed: bool,
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    pub fn new(scenarios: Vec<ScenarioReport>) -> Self {
        let passed = !scenarios
            .iter()
            .any(|r| matches!(r.outcome, Outcome::Failed { .. }));
        Self { passed, scenarios }
    }

    pub fn failure(&self) -> Option<&ScenarioReport> {
        self.scenarios
            .iter()
            .find(|r| matches!(r.outcome, Outcome::Failed { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Running,
    Stopped,
}

pub struct ScenarioRunner {
    config: HarnessConfig,
    cli: NodeCli,
    invoker: ProcessInvoker,
    rpc: Box<dyn RpcBackend>,
    lifecycle: Option<Box<dyn NodeLifecycle>>,
    node: NodeState,
    wallet: Option<bool>,
    expected_blocks: Option<Value>,
}

impl ScenarioRunner {
    /// The node is assumed to be running when the runner is created.
    pub fn new(
        config: HarnessConfig,
        rpc: Box<dyn RpcBackend>,
        lifecycle: Option<Box<dyn NodeLifecycle>>,
    ) -> Self {
        Self {
            cli: config.node_cli(),
            wallet: config.wallet,
            config,
            invoker: ProcessInvoker::new(),
            rpc,
            lifecycle,
            node: NodeState::Running,
            expected_blocks: None,
        }
    }

    /// Scenarios selected by the config, in execution order.
    pub fn selected(&self) -> Result<Vec<Scenario>, HarnessError> {
        for name in &self.config.scenarios {
            if Scenario::from_name(name).is_none() {
                return Err(HarnessError::UnknownScenario(name.clone()));
            }
        }
        Ok(Scenario::ALL
            .into_iter()
            .filter(|s| {
                self.config.scenarios.is_empty()
                    || self.config.scenarios.iter().any(|n| n == s.name())
            })
            .collect())
    }

    /// Run the selected scenarios under the suite timeout. Children still
    /// running when the timeout fires are killed.
    pub async fn run(&mut self) -> Result<SuiteReport, HarnessError> {
        let limit = self.config.suite_timeout();
        timeout(limit, self.run_scenarios())
            .await
            .map_err(|_| HarnessError::SuiteTimeout(limit))?
    }

    async fn run_scenarios(&mut self) -> Result<SuiteReport, HarnessError> {
        let selected = self.selected()?;
        self.prepare().await?;

        let mut reports = Vec::with_capacity(selected.len());
        for scenario in selected {
            let started = Instant::now();
            info!(scenario = scenario.name(), "{}", scenario.description());
            let result = match self.establish(scenario).await {
                Ok(Some(reason)) => {
                    warn!(scenario = scenario.name(), %reason, "skipped");
                    Ok(Outcome::Skipped { reason })
                }
                Ok(None) => self.execute(scenario).await.map(|()| Outcome::Passed),
                Err(e) => Err(e),
            };
            let outcome = match result {
                Ok(outcome) => outcome,
                // The harness itself broke; nothing was learned about the CLI.
                Err(e) if e.is_infrastructure() => {
                    error!(scenario = scenario.name(), error = %e, "aborting run");
                    self.teardown().await;
                    return Err(e);
                }
                Err(e) => Outcome::Failed {
                    message: e.to_string(),
                },
            };
            let failed = matches!(outcome, Outcome::Failed { .. });
            if failed {
                error!(scenario = scenario.name(), "failed");
            }
            reports.push(ScenarioReport {
                scenario: scenario.name(),
                outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            });
            if failed {
                break;
            }
        }

        self.teardown().await;
        Ok(SuiteReport::new(reports))
    }

    async fn prepare(&mut self) -> Result<(), HarnessError> {
        if let Some(blocks) = self.config.mine_blocks {
            if self.wallet_present().await? {
                let address = self.rpc.call("getnewaddress", Vec::new()).await?;
                self.rpc
                    .call("generatetoaddress", vec![json!(blocks), address])
                    .await?;
                info!(blocks, "mined");
            } else {
                warn!("block generation requested but the node has no wallet");
            }
        }
        self.expected_blocks = Some(self.rpc.call("getblockcount", Vec::new()).await?);
        Ok(())
    }

    async fn teardown(&mut self) {
        if self.node != NodeState::Running {
            return;
        }
        if let Some(lifecycle) = self.lifecycle.as_mut() {
            if lifecycle.owns_running_node() {
                if let Err(e) = lifecycle.stop(self.rpc.as_ref()).await {
                    warn!(error = %e, "failed to stop the node started by the harness");
                }
            }
        }
    }

    /// `Some(reason)` means skip.
    async fn establish(&mut self, scenario: Scenario) -> Result<Option<String>, HarnessError> {
        for &pre in scenario.preconditions() {
            match pre {
                Precondition::LifecycleControl => {
                    if self.lifecycle.is_none() {
                        return Ok(Some("no node daemon configured".into()));
                    }
                }
                Precondition::WalletPresent => {
                    if !self.wallet_present().await? {
                        return Ok(Some("wallet component not present".into()));
                    }
                }
                Precondition::NodeRunning => self.ensure_running(scenario).await?,
                Precondition::NodeStopped => self.ensure_stopped(scenario).await?,
            }
        }
        Ok(None)
    }

    async fn wallet_present(&mut self) -> Result<bool, HarnessError> {
        if let Some(present) = self.wallet {
            return Ok(present);
        }
        let present = match self.rpc.call("getwalletinfo", Vec::new()).await {
            Ok(_) => true,
            Err(e) if indicates_missing_wallet(&e) => false,
            Err(e) => return Err(e),
        };
        self.wallet = Some(present);
        Ok(present)
    }

    async fn ensure_running(&mut self, scenario: Scenario) -> Result<(), HarnessError> {
        if self.node == NodeState::Running {
            return Ok(());
        }
        let lifecycle = self.lifecycle.as_mut().ok_or(HarnessError::PreconditionUnmet {
            scenario: scenario.name(),
            precondition: Precondition::NodeRunning.to_string(),
        })?;
        lifecycle.start().await?;
        lifecycle
            .wait_for_cookie_credentials(&self.config.resolver())
            .await?;
        lifecycle.wait_for_rpc_connection(self.rpc.as_ref()).await?;
        self.node = NodeState::Running;
        Ok(())
    }

    async fn ensure_stopped(&mut self, scenario: Scenario) -> Result<(), HarnessError> {
        if self.node == NodeState::Stopped {
            return Ok(());
        }
        let lifecycle = self.lifecycle.as_mut().ok_or(HarnessError::PreconditionUnmet {
            scenario: scenario.name(),
            precondition: Precondition::NodeStopped.to_string(),
        })?;
        lifecycle.stop(self.rpc.as_ref()).await?;
        self.node = NodeState::Stopped;
        Ok(())
    }

    async fn execute(&mut self, scenario: Scenario) -> Result<(), HarnessError> {
        match scenario {
            Scenario::VersionQuery => self.version_query().await,
            Scenario::WalletInfoEquivalence => self.raw_command_equivalence("getwalletinfo").await,
            Scenario::BlockchainInfoEquivalence => {
                self.raw_command_equivalence("getblockchaininfo").await
            }
            Scenario::StdinPassword => self.stdin_password().await,
            Scenario::StdinBatch => self.stdin_batch().await,
            Scenario::UnreachableServer => {
                self.expect_cli_failure(
                    self.cli.with(["-rpcport=1"]).command("echo", &[]),
                    CliFailure::ConnectionUnavailable,
                )
                .await
            }
            Scenario::MissingCookieFile => {
                self.expect_cli_failure(
                    self.cli
                        .with(["-rpccookiefile=does-not-exist", "-rpcpassword="])
                        .command("echo", &[]),
                    CliFailure::CredentialSourceUnavailable,
                )
                .await
            }
            Scenario::GetInfoRejectsArguments => {
                self.expect_cli_failure(
                    self.cli.with(["-getinfo"]).command("help", &[]),
                    CliFailure::ArgumentValidation,
                )
                .await
            }
            Scenario::GetInfoEquivalence => self.getinfo_equivalence().await,
            Scenario::GetInfoWalletFields => self.getinfo_wallet_fields().await,
            Scenario::VersionWhileStopped => {
                let invocation = self.cli.with(["-version"]).bare();
                let result = expect_success(&self.invoker, &invocation).await?;
                self.check_banner(&invocation, &result)
            }
            Scenario::WaitForConnection => self.wait_for_connection().await,
        }
    }

    fn check_banner(
        &self,
        invocation: &Invocation,
        result: &InvocationResult,
    ) -> Result<(), HarnessError> {
        let banner = self.config.version_banner();
        if result.stdout.contains(&banner) {
            Ok(())
        } else {
            Err(HarnessError::Assertion(format!(
                "`{invocation}` output lacks {banner:?}:\n{}",
                result.stdout
            )))
        }
    }

    async fn version_query(&self) -> Result<(), HarnessError> {
        let invocation = self.cli.with(["-version"]).bare();
        let first = expect_success(&self.invoker, &invocation).await?;
        self.check_banner(&invocation, &first)?;
        let second = expect_success(&self.invoker, &invocation).await?;
        assert_equal(
            "repeated -version output",
            &Value::String(first.stdout),
            &Value::String(second.stdout),
        )
    }

    async fn raw_command_equivalence(&self, method: &str) -> Result<(), HarnessError> {
        let invocation = self.cli.command(method, &[]);
        let result = expect_success(&self.invoker, &invocation).await?;
        ComparisonExpectation::Equivalence {
            expected: self.rpc.call(method, Vec::new()).await?,
            actual: result.output(),
        }
        .verify(&invocation, &result)
    }

    async fn expect_cli_failure(
        &self,
        invocation: Invocation,
        failure: CliFailure,
    ) -> Result<(), HarnessError> {
        assert_process_fails(
            &self.invoker,
            CliFailure::EXIT_CODE,
            failure.message(),
            &invocation,
        )
        .await?;
        Ok(())
    }

    async fn stdin_password(&self) -> Result<(), HarnessError> {
        let credential = self.config.resolver().resolve()?;
        let authed = self
            .cli
            .with([format!("-rpcuser={}", credential.username), "-stdinrpcpass".into()]);

        let good = authed
            .command("getblockcount", &[])
            .with_stdin(StdinPayload::secret(&credential.password))?;
        let via_cli = expect_success(&self.invoker, &good).await?.output();
        let via_rpc = self.rpc.call("getblockcount", Vec::new()).await?;
        assert_equal("getblockcount with -stdinrpcpass vs RPC", &via_rpc, &via_cli)?;

        let bad = authed
            .command("echo", &[])
            .with_stdin(StdinPayload::secret(WRONG_PASSWORD))?;
        self.expect_cli_failure(bad, CliFailure::AuthenticationRejected)
            .await
    }

    async fn stdin_batch(&self) -> Result<(), HarnessError> {
        let credential = self.config.resolver().resolve()?;
        let batch = self.cli.with([
            format!("-rpcuser={}", credential.username),
            "-stdin".into(),
            "-stdinrpcpass".into(),
        ]);

        let good = batch
            .command("echo", &[])
            .with_stdin(StdinPayload::secret_then(&credential.password, "foo\nbar"))?;
        let result = expect_success(&self.invoker, &good).await?;
        // Only the piped commands come back; the password line is consumed.
        assert_equal("-stdin batch echo", &json!(["foo", "bar"]), &result.output())?;

        let bad = batch
            .command("echo", &[])
            .with_stdin(StdinPayload::secret(WRONG_PASSWORD))?;
        self.expect_cli_failure(bad, CliFailure::AuthenticationRejected)
            .await
    }

    async fn getinfo(&self) -> Result<Value, HarnessError> {
        let invocation = self.cli.with(["-getinfo"]).bare();
        Ok(expect_success(&self.invoker, &invocation).await?.output())
    }

    async fn getinfo_equivalence(&self) -> Result<(), HarnessError> {
        let getinfo = self.getinfo().await?;
        let mut sources = BTreeMap::new();
        for method in ["getnetworkinfo", "getblockchaininfo"] {
            sources.insert(method, self.rpc.call(method, Vec::new()).await?);
        }
        assert_fields_match("-getinfo", &getinfo, GETINFO_FIELDS, &sources)
    }

    async fn getinfo_wallet_fields(&self) -> Result<(), HarnessError> {
        // unlocked_until only exists once the wallet is encrypted. Encryption is
        // permanent, so it needs a passphrase the operator chose and keeps.
        let wallet = self.rpc.call("getwalletinfo", Vec::new()).await?;
        if wallet.get("unlocked_until").is_none() {
            match &self.config.wallet_passphrase {
                Some(passphrase) => {
                    warn!("encrypting wallet with the configured passphrase");
                    self.rpc
                        .call("encryptwallet", vec![json!(passphrase)])
                        .await?;
                }
                None => info!("wallet not encrypted; unlocked_until is not compared"),
            }
        }

        let getinfo = self.getinfo().await?;
        let mut sources = BTreeMap::new();
        for method in ["getnetworkinfo", "getwalletinfo"] {
            sources.insert(method, self.rpc.call(method, Vec::new()).await?);
        }

        if let Some(balance) = self.config.expected_balance() {
            assert_equal(
                "-getinfo balance",
                &json!(balance),
                getinfo.get("balance").unwrap_or(&Value::Null),
            )?;
        }
        assert_fields_match("-getinfo wallet fields", &getinfo, GETINFO_WALLET_FIELDS, &sources)?;
        self.raw_command_equivalence("getwalletinfo").await
    }

    async fn wait_for_connection(&mut self) -> Result<(), HarnessError> {
        let lifecycle = self.lifecycle.as_mut().ok_or(HarnessError::PreconditionUnmet {
            scenario: Scenario::WaitForConnection.name(),
            precondition: Precondition::LifecycleControl.to_string(),
        })?;

        // Bring the node up without waiting for RPC, then race the CLI's own
        // wait against the server coming up.
        lifecycle.start().await?;
        self.node = NodeState::Running;
        let resolver = self.config.resolver();
        lifecycle.wait_for_cookie_credentials(&resolver).await?;

        let mut poller = ReadinessPoller::new(self.invoker, resolver);
        let handle = poller.launch(&self.cli, "getblockcount", &[])?;
        let description = handle.description().to_owned();
        lifecycle.wait_for_rpc_connection(self.rpc.as_ref()).await?;
        let limit = self.config.lifecycle_timeout();
        let result = timeout(limit, poller.complete(handle))
            .await
            .map_err(|_| {
                HarnessError::Assertion(format!(
                    "`{description}` still waiting {limit:?} after the RPC server came up"
                ))
            })??;

        if !result.success() {
            return Err(HarnessError::UnexpectedOutcome {
                invocation: description,
                expected: "exit code 0 once the server is reachable".into(),
                actual: format!("exit code {}", result.exit_code),
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        let expected = match &self.expected_blocks {
            Some(blocks) => blocks.clone(),
            None => self.rpc.call("getblockcount", Vec::new()).await?,
        };
        assert_equal("-rpcwait getblockcount", &expected, &result.output())
    }
}
