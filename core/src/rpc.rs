//! Direct JSON-RPC access to the node, used as ground truth for comparisons.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::credential::CredentialResolver;
use crate::error::HarnessError;

pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
pub const RPC_WALLET_NOT_FOUND: i64 = -18;
pub const RPC_IN_WARMUP: i64 = -28;

#[async_trait]
pub trait RpcBackend: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, HarnessError>;
}

/// True if the error means the wallet component is not there at all.
pub fn indicates_missing_wallet(err: &HarnessError) -> bool {
    matches!(
        err,
        HarnessError::Rpc { code, .. } if *code == RPC_METHOD_NOT_FOUND || *code == RPC_WALLET_NOT_FOUND
    )
}

/// JSON-RPC over HTTP with basic auth. Credentials are read again for every
/// request so a cookie rotated by a restart is picked up.
#[derive(Debug)]
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
    resolver: CredentialResolver,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(
        url: impl Into<String>,
        resolver: CredentialResolver,
        timeout: Duration,
    ) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Transport {
                method: "<client setup>".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            resolver,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait]
impl RpcBackend for HttpRpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, HarnessError> {
        let credential = self.resolver.resolve()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "rpc call");

        let transport = |reason: String| HarnessError::Transport {
            method: method.to_owned(),
            reason,
        };
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&credential.username, Some(&credential.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        // The node answers RPC errors with a JSON body on a non-2xx status, so
        // the body is read before the status is judged.
        let status = response.status();
        let text = response.text().await.map_err(|e| transport(e.to_string()))?;
        let reply: Value = serde_json::from_str(&text)
            .map_err(|_| transport(format!("HTTP {status}: {}", text.trim())))?;
        parse_reply(method, reply)
    }
}

fn parse_reply(method: &str, mut reply: Value) -> Result<Value, HarnessError> {
    let err = reply.get_mut("error").map(Value::take).unwrap_or(Value::Null);
    if err.is_null() {
        return Ok(reply
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null));
    }
    Err(HarnessError::Rpc {
        method: method.to_owned(),
        code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
        message: err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    })
}
