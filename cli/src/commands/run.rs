use clap::Args;
use cliconform_core::{
    DaemonLifecycle, HarnessConfig, HttpRpcClient, NodeLifecycle, Outcome, ScenarioRunner,
};
use eyre::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use super::util::{parse_scenario_name, parse_wallet_mode};

#[derive(Args)]
pub struct RunArgs {
    /// Node CLI executable under test
    #[arg(long)]
    pub cli: PathBuf,
    #[arg(long)]
    pub datadir: PathBuf,
    #[arg(long, default_value_t = 18443)]
    pub rpc_port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub rpc_host: String,
    #[arg(long, default_value = "regtest")]
    pub chain: String,
    #[arg(long, default_value = "BGL.conf")]
    pub conf_name: String,
    /// Extra option passed to every CLI invocation (repeatable)
    #[arg(long = "cli-option", allow_hyphen_values = true)]
    pub cli_options: Vec<String>,
    /// Node daemon used for restart scenarios; they are skipped without it
    #[arg(long)]
    pub daemon: Option<PathBuf>,
    #[arg(long = "daemon-arg", allow_hyphen_values = true)]
    pub daemon_args: Vec<String>,
    #[arg(long, default_value = "BGL Core")]
    pub package_name: String,
    /// Wallet presence: auto, present or absent
    #[arg(long, default_value = "auto")]
    pub wallet: String,
    /// Encrypt an unencrypted wallet with this passphrase. Encryption cannot
    /// be undone; without it `unlocked_until` is not checked
    #[arg(long)]
    pub wallet_passphrase: Option<String>,
    /// Mine this many blocks before the suite and check the resulting balance
    #[arg(long)]
    pub mine_blocks: Option<u64>,
    #[arg(long, default_value_t = 600)]
    pub timeout_secs: u64,
    #[arg(long, default_value_t = 60)]
    pub lifecycle_timeout_secs: u64,
    /// Run only the named scenario (repeatable)
    #[arg(long = "scenario", value_parser = parse_scenario_name)]
    pub scenarios: Vec<String>,
    #[arg(long, default_value = "json", value_parser = ["json", "human"])]
    pub output: String,
}

impl RunArgs {
    fn into_config(self) -> Result<HarnessConfig> {
        let wallet = parse_wallet_mode(&self.wallet).wrap_err("invalid --wallet")?;
        let mut config = HarnessConfig::new(self.cli, self.datadir, self.rpc_port);
        config.rpc_host = self.rpc_host;
        config.chain = self.chain;
        config.conf_name = self.conf_name;
        config.cli_options = self.cli_options;
        config.daemon_path = self.daemon;
        config.daemon_args = self.daemon_args;
        config.package_name = self.package_name;
        config.wallet = wallet;
        config.wallet_passphrase = self.wallet_passphrase;
        config.mine_blocks = self.mine_blocks;
        config.suite_timeout_secs = self.timeout_secs;
        config.lifecycle_timeout_secs = self.lifecycle_timeout_secs;
        config.scenarios = self.scenarios;
        Ok(config)
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let output = args.output.clone();
    let config = args.into_config()?;

    let rpc = HttpRpcClient::new(config.rpc_url(), config.resolver(), config.lifecycle_timeout())
        .wrap_err("failed to build RPC client")?;
    let lifecycle = config.daemon_path.as_ref().map(|daemon| {
        Box::new(DaemonLifecycle::new(
            daemon,
            &config.datadir,
            config.daemon_args.clone(),
            config.resolver(),
            config.lifecycle_timeout(),
        )) as Box<dyn NodeLifecycle>
    });
    info!(cli = %config.cli_path.display(), url = %config.rpc_url(), "starting suite");

    let mut runner = ScenarioRunner::new(config, Box::new(rpc), lifecycle);
    let report = runner.run().await.wrap_err("suite aborted")?;

    match output.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "human" => {
            for r in &report.scenarios {
                match &r.outcome {
                    Outcome::Passed => println!("PASS  {} ({} ms)", r.scenario, r.duration_ms),
                    Outcome::Skipped { reason } => println!("SKIP  {}: {reason}", r.scenario),
                    Outcome::Failed { message } => {
                        println!("FAIL  {} ({} ms)", r.scenario, r.duration_ms);
                        for line in message.lines() {
                            println!("      {line}");
                        }
                    }
                }
            }
            if report.passed {
                println!("All scenarios passed.");
            }
        }
        _ => unreachable!(),
    }
    std::process::exit(if report.passed { 0 } else { 1 });
}
