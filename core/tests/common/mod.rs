// Shared fixtures: a shell-script stand-in for the node CLI, a canned RPC
// backend and a lifecycle that simulates a restart through marker files.
#![allow(dead_code)]

use async_trait::async_trait;
use cliconform_core::{CredentialResolver, HarnessError, NodeLifecycle, RpcBackend};
use serde_json::Value;
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const COOKIE_PASSWORD: &str = "sekrit";
pub const RPC_UP_MARKER: &str = "rpc-up";

/// Behaves like the real CLI for the invocations the suite makes. The server is
/// "up" while `<datadir>/rpc-up` exists.
pub const FAKE_NODE_CLI: &str = r#"
datadir=""
getinfo=0
stdinpass=0
batch=0
wait=0
last=""
for arg in "$@"; do
  case "$arg" in
    -datadir=*) datadir="${arg#-datadir=}" ;;
    -version) echo "BGL Core RPC client version v0.21.0"; exit 0 ;;
    -rpcport=1) echo "error: Could not connect to the server 127.0.0.1:1" >&2; exit 1 ;;
    -rpccookiefile=*) echo "error: Could not locate RPC credentials. No authentication cookie could be found, and RPC password is not set." >&2; exit 1 ;;
    -getinfo) getinfo=1 ;;
    -stdinrpcpass) stdinpass=1 ;;
    -stdin) batch=1 ;;
    -rpcwait) wait=1 ;;
  esac
  last="$arg"
done
if [ "$getinfo" = 1 ] && [ "$last" != "-getinfo" ]; then
  echo "error: -getinfo takes no arguments" >&2
  exit 1
fi
if [ "$wait" = 1 ]; then
  while [ ! -f "$datadir/rpc-up" ]; do sleep 0.05; done
elif [ ! -f "$datadir/rpc-up" ]; then
  echo "error: Could not connect to the server 127.0.0.1:18443" >&2
  exit 1
fi
if [ "$stdinpass" = 1 ]; then
  IFS= read -r pass
  if [ "$pass" != "sekrit" ]; then
    echo "error: Authorization failed: Incorrect rpcuser or rpcpassword" >&2
    exit 1
  fi
  if [ "$batch" = 1 ]; then
    out=""
    while IFS= read -r line || [ -n "$line" ]; do
      out="$out${out:+,}\"$line\""
    done
    echo "[$out]"
    exit 0
  fi
fi
echo 101
"#;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

pub fn write_cookie(datadir: &Path, chain: &str, password: &str) {
    let dir = datadir.join(chain);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(".cookie"), format!("__cookie__:{password}")).unwrap();
}

pub fn mark_rpc_up(datadir: &Path) {
    std::fs::write(datadir.join(RPC_UP_MARKER), "").unwrap();
}

/// Canned RPC responses; anything else is "Method not found". Every call is
/// recorded.
#[derive(Default)]
pub struct FakeRpc {
    responses: BTreeMap<String, Value>,
    calls: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
}

impl FakeRpc {
    pub fn with(mut self, method: &str, response: Value) -> Self {
        self.responses.insert(method.to_owned(), response);
        self
    }

    /// Shared log of `(method, params)`, still readable after the backend is
    /// boxed and handed away.
    pub fn calls(&self) -> Arc<Mutex<Vec<(String, Vec<Value>)>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl RpcBackend for FakeRpc {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, HarnessError> {
        self.calls.lock().unwrap().push((method.to_owned(), params));
        self.responses
            .get(method)
            .cloned()
            .ok_or_else(|| HarnessError::Rpc {
                method: method.to_owned(),
                code: -32601,
                message: "Method not found".into(),
            })
    }
}

/// Stops by deleting the cookie and marker; starts by writing the cookie
/// first and the marker a little later, like a node still warming up.
pub struct FakeLifecycle {
    pub datadir: PathBuf,
    pub chain: String,
    pub rpc_delay: Duration,
}

#[async_trait]
impl NodeLifecycle for FakeLifecycle {
    async fn stop(&mut self, _rpc: &dyn RpcBackend) -> Result<(), HarnessError> {
        let _ = std::fs::remove_file(self.datadir.join(RPC_UP_MARKER));
        let _ = std::fs::remove_file(self.datadir.join(&self.chain).join(".cookie"));
        Ok(())
    }

    async fn start(&mut self) -> Result<(), HarnessError> {
        let datadir = self.datadir.clone();
        let chain = self.chain.clone();
        let delay = self.rpc_delay;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            write_cookie(&datadir, &chain, COOKIE_PASSWORD);
            tokio::time::sleep(delay).await;
            mark_rpc_up(&datadir);
        });
        Ok(())
    }

    async fn wait_for_cookie_credentials(
        &mut self,
        resolver: &CredentialResolver,
    ) -> Result<(), HarnessError> {
        while !resolver.cookie_exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn wait_for_rpc_connection(&mut self, _rpc: &dyn RpcBackend) -> Result<(), HarnessError> {
        while !self.datadir.join(RPC_UP_MARKER).exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}
