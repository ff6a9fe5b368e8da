//! Harness configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::credential::{CredentialResolver, DEFAULT_CONF_NAME};
use crate::invoker::NodeCli;

pub const DEFAULT_CHAIN: &str = "regtest";
pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_PACKAGE_NAME: &str = "BGL Core";
pub const DEFAULT_BLOCK_REWARD: u64 = 50;
pub const DEFAULT_COINBASE_MATURITY: u64 = 100;
pub const DEFAULT_SUITE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_LIFECYCLE_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// The CLI executable under test.
    pub cli_path: PathBuf,
    /// Node daemon used to restart the node. Lifecycle scenarios are skipped without it.
    pub daemon_path: Option<PathBuf>,
    pub daemon_args: Vec<String>,
    pub datadir: PathBuf,
    pub chain: String,
    pub conf_name: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    /// Options passed to every CLI invocation after `-datadir`.
    pub cli_options: Vec<String>,
    /// Expected in the `-version` banner as `"<package_name> RPC client version"`.
    pub package_name: String,
    /// `None` asks the node whether a wallet is loaded.
    pub wallet: Option<bool>,
    /// Passphrase for encrypting an unencrypted wallet. Without it the wallet
    /// is left as it is and `unlocked_until` is not compared.
    #[serde(default, skip_serializing)]
    pub wallet_passphrase: Option<String>,
    /// Blocks to mine before the suite. Enables the balance check.
    pub mine_blocks: Option<u64>,
    pub block_reward: u64,
    pub coinbase_maturity: u64,
    pub suite_timeout_secs: u64,
    pub lifecycle_timeout_secs: u64,
    /// Scenario names to run; empty runs all of them.
    pub scenarios: Vec<String>,
}

impl HarnessConfig {
    pub fn new(cli_path: impl Into<PathBuf>, datadir: impl Into<PathBuf>, rpc_port: u16) -> Self {
        Self {
            cli_path: cli_path.into(),
            daemon_path: None,
            daemon_args: Vec::new(),
            datadir: datadir.into(),
            chain: DEFAULT_CHAIN.to_owned(),
            conf_name: DEFAULT_CONF_NAME.to_owned(),
            rpc_host: DEFAULT_RPC_HOST.to_owned(),
            rpc_port,
            cli_options: Vec::new(),
            package_name: DEFAULT_PACKAGE_NAME.to_owned(),
            wallet: None,
            wallet_passphrase: None,
            mine_blocks: None,
            block_reward: DEFAULT_BLOCK_REWARD,
            coinbase_maturity: DEFAULT_COINBASE_MATURITY,
            suite_timeout_secs: DEFAULT_SUITE_TIMEOUT_SECS,
            lifecycle_timeout_secs: DEFAULT_LIFECYCLE_TIMEOUT_SECS,
            scenarios: Vec::new(),
        }
    }

    pub fn rpc_url(&self) -> String {
        format!("http://{}:{}/", self.rpc_host, self.rpc_port)
    }

    pub fn resolver(&self) -> CredentialResolver {
        CredentialResolver::new(&self.datadir, &self.chain).with_conf_name(&self.conf_name)
    }

    pub fn node_cli(&self) -> NodeCli {
        NodeCli::new(&self.cli_path, &self.datadir).with(self.cli_options.iter().cloned())
    }

    pub fn version_banner(&self) -> String {
        format!("{} RPC client version", self.package_name)
    }

    /// Balance the wallet must report after mining, if mining was requested.
    pub fn expected_balance(&self) -> Option<u64> {
        self.mine_blocks
            .map(|blocks| blocks.saturating_sub(self.coinbase_maturity) * self.block_reward)
    }

    pub fn suite_timeout(&self) -> Duration {
        Duration::from_secs(self.suite_timeout_secs)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle_timeout_secs)
    }
}

impl fmt::Debug for HarnessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessConfig")
            .field("cli_path", &self.cli_path)
            .field("daemon_path", &self.daemon_path)
            .field("datadir", &self.datadir)
            .field("chain", &self.chain)
            .field("rpc_url", &self.rpc_url())
            .field("wallet", &self.wallet)
            .field(
                "wallet_passphrase",
                &self.wallet_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("scenarios", &self.scenarios)
            .finish_non_exhaustive()
    }
}
