//! Node start/stop, driven from outside the scenarios that need it.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::credential::CredentialResolver;
use crate::error::HarnessError;
use crate::rpc::{RpcBackend, RPC_IN_WARMUP};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// A spawned daemon still running after this long counts as started.
const STARTUP_GRACE: Duration = Duration::from_millis(500);

#[async_trait]
pub trait NodeLifecycle: Send {
    /// Stop the node and wait until it is gone.
    async fn stop(&mut self, rpc: &dyn RpcBackend) -> Result<(), HarnessError>;

    /// Start the node. Returns without waiting for the RPC server.
    async fn start(&mut self) -> Result<(), HarnessError>;

    /// Wait until the node has written its cookie.
    async fn wait_for_cookie_credentials(
        &mut self,
        resolver: &CredentialResolver,
    ) -> Result<(), HarnessError>;

    /// Wait until the RPC server answers.
    async fn wait_for_rpc_connection(&mut self, rpc: &dyn RpcBackend) -> Result<(), HarnessError>;

    /// Whether a node this lifecycle started is still running.
    fn owns_running_node(&self) -> bool {
        false
    }
}

/// Runs the node daemon as a child of the harness.
#[derive(Debug)]
pub struct DaemonLifecycle {
    program: PathBuf,
    datadir: PathBuf,
    args: Vec<String>,
    resolver: CredentialResolver,
    timeout: Duration,
    child: Option<Child>,
}

impl DaemonLifecycle {
    pub fn new(
        program: impl Into<PathBuf>,
        datadir: impl Into<PathBuf>,
        args: Vec<String>,
        resolver: CredentialResolver,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            datadir: datadir.into(),
            args,
            resolver,
            timeout,
            child: None,
        }
    }
}

async fn bounded<F, T>(limit: Duration, what: &str, fut: F) -> Result<T, HarnessError>
where
    F: std::future::Future<Output = Result<T, HarnessError>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| HarnessError::Lifecycle(format!("{what} timed out after {limit:?}")))?
}

/// Reap the child if it has exited, returning its status.
fn exited(child: &mut Option<Child>) -> Result<Option<ExitStatus>, HarnessError> {
    let Some(running) = child.as_mut() else {
        return Ok(None);
    };
    let status = running
        .try_wait()
        .map_err(|e| HarnessError::Lifecycle(format!("checking node status: {e}")))?;
    if status.is_some() {
        *child = None;
    }
    Ok(status)
}

impl DaemonLifecycle {
    fn spawn(&self) -> Result<Child, HarnessError> {
        Command::new(&self.program)
            .arg(format!("-datadir={}", self.datadir.display()))
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }
}

#[async_trait]
impl NodeLifecycle for DaemonLifecycle {
    async fn stop(&mut self, rpc: &dyn RpcBackend) -> Result<(), HarnessError> {
        info!("stopping node");
        rpc.call("stop", Vec::new()).await?;
        let limit = self.timeout;
        match self.child.take() {
            Some(mut child) => {
                let status = timeout(limit, child.wait())
                    .await
                    .map_err(|_| HarnessError::Lifecycle(format!("node did not exit within {limit:?}")))?
                    .map_err(|e| HarnessError::Lifecycle(format!("waiting for node exit: {e}")))?;
                debug!(%status, "node exited");
            }
            None => {
                // Not our child, so there is no exit to wait on. Wait for the
                // RPC server to refuse connections and the cookie to go. The
                // data directory lock can outlive both; `start` retries for it.
                let resolver = &self.resolver;
                bounded(limit, "node shutdown", async {
                    loop {
                        match rpc.call("getblockcount", Vec::new()).await {
                            Err(HarnessError::Transport { .. })
                            | Err(HarnessError::CredentialUnavailable { .. }) => break,
                            _ => sleep(POLL_INTERVAL).await,
                        }
                    }
                    while resolver.cookie_exists() {
                        sleep(POLL_INTERVAL).await;
                    }
                    Ok(())
                })
                .await?;
            }
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<(), HarnessError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let mut child = Some(self.spawn()?);
            sleep(STARTUP_GRACE).await;
            match exited(&mut child)? {
                None => {
                    info!(pid = ?child.as_ref().and_then(Child::id), "node started");
                    self.child = child;
                    return Ok(());
                }
                Some(status) if Instant::now() >= deadline => {
                    return Err(HarnessError::Lifecycle(format!(
                        "node exited during startup ({status})"
                    )));
                }
                Some(status) => {
                    // Usually a previous instance still holding the data directory.
                    warn!(%status, "node exited during startup, retrying");
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn wait_for_cookie_credentials(
        &mut self,
        resolver: &CredentialResolver,
    ) -> Result<(), HarnessError> {
        let child = &mut self.child;
        bounded(self.timeout, "cookie creation", async {
            while resolver.resolve().is_err() {
                if let Some(status) = exited(child)? {
                    return Err(HarnessError::Lifecycle(format!(
                        "node exited ({status}) before writing its cookie"
                    )));
                }
                sleep(POLL_INTERVAL).await;
            }
            Ok(())
        })
        .await
    }

    async fn wait_for_rpc_connection(&mut self, rpc: &dyn RpcBackend) -> Result<(), HarnessError> {
        let started = Instant::now();
        let child = &mut self.child;
        bounded(self.timeout, "RPC connection", async {
            loop {
                match rpc.call("getblockcount", Vec::new()).await {
                    Ok(_) => return Ok(()),
                    Err(HarnessError::Transport { .. })
                    | Err(HarnessError::CredentialUnavailable { .. }) => {}
                    Err(HarnessError::Rpc { code, .. }) if code == RPC_IN_WARMUP => {}
                    Err(e) => return Err(e),
                }
                if let Some(status) = exited(child)? {
                    return Err(HarnessError::Lifecycle(format!(
                        "node exited ({status}) before its RPC server answered"
                    )));
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await?;
        info!(elapsed = ?started.elapsed(), "RPC connection up");
        Ok(())
    }

    fn owns_running_node(&self) -> bool {
        self.child.is_some()
    }
}
