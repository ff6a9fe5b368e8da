// End-to-end runs of the scenario runner against the fake node CLI.
#![cfg(unix)]

mod common;

use cliconform_core::{
    HarnessConfig, HarnessError, NodeLifecycle, Outcome, ScenarioRunner, SuiteReport,
};
use common::{FakeLifecycle, FakeRpc};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn setup() -> (TempDir, HarnessConfig) {
    let dir = tempfile::tempdir().unwrap();
    let cli_path = common::write_script(dir.path(), "node-cli", common::FAKE_NODE_CLI);
    common::write_cookie(dir.path(), "regtest", common::COOKIE_PASSWORD);
    common::mark_rpc_up(dir.path());
    let mut config = HarnessConfig::new(cli_path, dir.path(), 18443);
    config.suite_timeout_secs = 30;
    (dir, config)
}

fn rpc() -> Box<FakeRpc> {
    Box::new(FakeRpc::default().with("getblockcount", json!(101)))
}

fn select(config: &mut HarnessConfig, names: &[&str]) {
    config.scenarios = names.iter().map(|s| s.to_string()).collect();
}

fn outcomes(report: &SuiteReport) -> Vec<(&'static str, &Outcome)> {
    report
        .scenarios
        .iter()
        .map(|r| (r.scenario, &r.outcome))
        .collect()
}

fn lifecycle(datadir: &Path) -> Box<dyn NodeLifecycle> {
    Box::new(FakeLifecycle {
        datadir: datadir.to_path_buf(),
        chain: "regtest".into(),
        rpc_delay: Duration::from_millis(300),
    })
}

#[tokio::test]
async fn test_failure_paths_and_version_pass() {
    let (_dir, mut config) = setup();
    select(
        &mut config,
        &[
            "getinfo_rejects_arguments",
            "version_query",
            "unreachable_server",
            "missing_cookie_file",
        ],
    );
    let report = ScenarioRunner::new(config, rpc(), None).run().await.unwrap();

    assert!(report.passed, "{:?}", report.failure());
    // Fixed order regardless of selection order.
    assert_eq!(
        outcomes(&report),
        vec![
            ("version_query", &Outcome::Passed),
            ("unreachable_server", &Outcome::Passed),
            ("missing_cookie_file", &Outcome::Passed),
            ("getinfo_rejects_arguments", &Outcome::Passed),
        ]
    );
}

#[tokio::test]
async fn test_stdin_authentication_scenarios() {
    let (_dir, mut config) = setup();
    select(&mut config, &["stdin_password", "stdin_batch"]);
    let report = ScenarioRunner::new(config, rpc(), None).run().await.unwrap();
    assert!(report.passed, "{:?}", report.failure());
    assert_eq!(report.scenarios.len(), 2);
}

#[tokio::test]
async fn test_absent_wallet_and_lifecycle_are_skipped() {
    let (_dir, mut config) = setup();
    select(
        &mut config,
        &["walletinfo_equivalence", "getinfo_wallet_fields", "version_while_stopped", "wait_for_connection"],
    );
    // No wallet override: the wallet check hits "Method not found".
    let report = ScenarioRunner::new(config, rpc(), None).run().await.unwrap();

    assert!(report.passed);
    assert_eq!(report.scenarios.len(), 4);
    for r in &report.scenarios {
        assert!(matches!(r.outcome, Outcome::Skipped { .. }), "{}: {:?}", r.scenario, r.outcome);
    }
}

#[tokio::test]
async fn test_first_failure_aborts_the_run() {
    let (_dir, mut config) = setup();
    config.package_name = "Other Core".into();
    select(&mut config, &["version_query", "unreachable_server"]);
    let report = ScenarioRunner::new(config, rpc(), None).run().await.unwrap();

    assert!(!report.passed);
    assert_eq!(report.scenarios.len(), 1);
    match &report.scenarios[0].outcome {
        Outcome::Failed { message } => assert!(message.contains("Other Core RPC client version")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_scenario_is_rejected() {
    let (_dir, mut config) = setup();
    select(&mut config, &["no_such_scenario"]);
    let err = ScenarioRunner::new(config, rpc(), None).run().await.unwrap_err();
    assert!(matches!(err, HarnessError::UnknownScenario(ref n) if n == "no_such_scenario"));
}

#[tokio::test]
async fn test_restart_and_wait_for_connection() {
    let (dir, mut config) = setup();
    select(&mut config, &["version_while_stopped", "wait_for_connection"]);
    let report = ScenarioRunner::new(config, rpc(), Some(lifecycle(dir.path())))
        .run()
        .await
        .unwrap();

    assert!(report.passed, "{:?}", report.failure());
    assert_eq!(
        outcomes(&report),
        vec![
            ("version_while_stopped", &Outcome::Passed),
            ("wait_for_connection", &Outcome::Passed),
        ]
    );
    // The node is back up at the end.
    assert!(dir.path().join(common::RPC_UP_MARKER).exists());
}

const GETINFO_JSON: &str = r#"{"version":210000,"blocks":101,"headers":101,"timeoffset":0,"connections":0,"proxy":"","difficulty":4.656542373906925e-10,"chain":"regtest","warnings":""}"#;

#[tokio::test]
async fn test_getinfo_fields_match_source_rpcs() {
    let (dir, mut config) = setup();
    config.cli_path = common::write_script(dir.path(), "getinfo-cli", &format!("echo '{GETINFO_JSON}'\n"));
    select(&mut config, &["getinfo_equivalence"]);
    let rpc = FakeRpc::default()
        .with("getblockcount", json!(101))
        .with(
            "getnetworkinfo",
            json!({
                "version": 210000,
                "timeoffset": 0,
                "connections": 0,
                "networks": [{"name": "ipv4", "proxy": ""}],
                "relayfee": 0.00001
            }),
        )
        .with(
            "getblockchaininfo",
            json!({
                "chain": "regtest",
                "blocks": 101,
                "headers": 101,
                "difficulty": 4.656542373906925e-10
            }),
        );
    let report = ScenarioRunner::new(config, Box::new(rpc), None).run().await.unwrap();
    assert!(report.passed, "{:?}", report.failure());
}

#[tokio::test]
async fn test_raw_command_mismatch_names_the_field() {
    let (dir, mut config) = setup();
    config.cli_path = common::write_script(
        dir.path(),
        "stale-cli",
        "echo '{\"chain\": \"regtest\", \"blocks\": 100}'\n",
    );
    select(&mut config, &["blockchaininfo_equivalence"]);
    let rpc = FakeRpc::default()
        .with("getblockcount", json!(101))
        .with("getblockchaininfo", json!({"chain": "regtest", "blocks": 101}));
    let report = ScenarioRunner::new(config, Box::new(rpc), None).run().await.unwrap();

    let failure = report.failure().expect("blocks differ");
    match &failure.outcome {
        Outcome::Failed { message } => {
            assert!(message.contains("$.blocks"), "{message}");
            assert!(!message.contains("$.chain"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_suite_timeout_kills_hung_run() {
    let dir = tempfile::tempdir().unwrap();
    let cli_path = common::write_script(dir.path(), "node-cli", "sleep 30\n");
    common::write_cookie(dir.path(), "regtest", common::COOKIE_PASSWORD);
    let mut config = HarnessConfig::new(cli_path, dir.path(), 18443);
    config.suite_timeout_secs = 1;
    select(&mut config, &["version_query"]);

    let started = std::time::Instant::now();
    let err = ScenarioRunner::new(config, rpc(), None).run().await.unwrap_err();
    assert!(matches!(err, HarnessError::SuiteTimeout(_)), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_missing_cli_aborts_instead_of_failing_a_scenario() {
    let (dir, mut config) = setup();
    config.cli_path = dir.path().join("no-such-cli");
    select(&mut config, &["version_query", "unreachable_server"]);
    let err = ScenarioRunner::new(config, rpc(), None).run().await.unwrap_err();
    assert!(matches!(err, HarnessError::Spawn { .. }), "got {err:?}");
    assert!(err.is_infrastructure());
}

const WALLETINFO_JSON: &str =
    r#"{"walletname":"","balance":50.00000000,"keypoolsize":1000,"paytxfee":0.00000000}"#;

/// A CLI with a wallet: `-getinfo` prints `getinfo`, `getwalletinfo` prints
/// the wallet summary, anything else prints the block count.
fn wallet_cli(dir: &Path, getinfo: &str) -> std::path::PathBuf {
    let body = format!(
        r#"for arg in "$@"; do
  case "$arg" in
    -getinfo) echo '{getinfo}'; exit 0 ;;
    getwalletinfo) echo '{WALLETINFO_JSON}'; exit 0 ;;
  esac
done
echo 101
"#
    );
    common::write_script(dir, "wallet-cli", &body)
}

fn wallet_rpc() -> FakeRpc {
    FakeRpc::default()
        .with("getblockcount", json!(101))
        .with("getnewaddress", json!("bcrt1qfakeaddress"))
        .with("generatetoaddress", json!([]))
        .with("encryptwallet", Value::Null)
        .with("getnetworkinfo", json!({"relayfee": 0.00001}))
        .with("getwalletinfo", serde_json::from_str(WALLETINFO_JSON).unwrap())
}

fn called(calls: &[(String, Vec<Value>)], method: &str) -> Option<Vec<Value>> {
    calls.iter().find(|(m, _)| m == method).map(|(_, p)| p.clone())
}

#[tokio::test]
async fn test_wallet_fields_with_mining_and_encryption() {
    let (dir, mut config) = setup();
    config.cli_path = wallet_cli(
        dir.path(),
        r#"{"blocks":101,"balance":50.0,"keypoolsize":1000,"paytxfee":0,"relayfee":0.00001}"#,
    );
    config.wallet = Some(true);
    config.wallet_passphrase = Some("harness passphrase".into());
    config.mine_blocks = Some(101);
    select(&mut config, &["getinfo_wallet_fields"]);
    let rpc = wallet_rpc();
    let calls = rpc.calls();

    let report = ScenarioRunner::new(config, Box::new(rpc), None).run().await.unwrap();
    assert!(report.passed, "{:?}", report.failure());

    let calls = calls.lock().unwrap();
    assert_eq!(
        called(&calls, "generatetoaddress"),
        Some(vec![json!(101), json!("bcrt1qfakeaddress")])
    );
    assert_eq!(called(&calls, "encryptwallet"), Some(vec![json!("harness passphrase")]));
}

#[tokio::test]
async fn test_wallet_balance_mismatch_fails_without_mining() {
    let (dir, mut config) = setup();
    config.cli_path = wallet_cli(
        dir.path(),
        r#"{"blocks":101,"balance":999.0,"keypoolsize":1000,"paytxfee":0,"relayfee":0.00001}"#,
    );
    config.wallet = Some(true);
    select(&mut config, &["getinfo_wallet_fields"]);
    let rpc = wallet_rpc();
    let calls = rpc.calls();

    let report = ScenarioRunner::new(config, Box::new(rpc), None).run().await.unwrap();
    match &report.failure().expect("balance differs").outcome {
        Outcome::Failed { message } => {
            assert!(message.contains("$.balance: expected 50, got 999"), "{message}")
        }
        other => panic!("expected failure, got {other:?}"),
    }
    // No passphrase configured: the wallet is left unencrypted.
    assert_eq!(called(&calls.lock().unwrap(), "encryptwallet"), None);
}

#[tokio::test]
async fn test_rpcwait_returning_a_connection_error_fails() {
    let (dir, mut config) = setup();
    config.cli_path = common::write_script(
        dir.path(),
        "impatient-cli",
        "echo 'error: Could not connect to the server 127.0.0.1:18443' >&2\nexit 1\n",
    );
    select(&mut config, &["wait_for_connection"]);
    let report = ScenarioRunner::new(config, rpc(), Some(lifecycle(dir.path())))
        .run()
        .await
        .unwrap();

    assert!(!report.passed);
    match &report.scenarios[0].outcome {
        Outcome::Failed { message } => {
            assert!(message.contains("exit code 0 once the server is reachable"), "{message}");
            assert!(message.contains("Could not connect to the server"), "{message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
