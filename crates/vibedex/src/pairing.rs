//! Remote pairing provider: an EIP-1193-shaped HTTP bridge used when no
//! local signer key is available. The human approves the pairing (and every
//! transaction) in their own wallet; this client only relays requests and
//! polls for outcomes.

use crate::config::{HttpConfig, NetworkParams};
use alloy::{
    primitives::{Address, TxKind, B256},
    rpc::types::TransactionRequest,
};
use eyre::Context as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::{str::FromStr as _, time::Duration};
use tokio::time::sleep;

/// Wallet error codes surfaced by EIP-1193 providers.
pub const ERR_USER_REJECTED: i64 = 4001;
pub const ERR_UNKNOWN_CHAIN: i64 = 4902;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const APPROVAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PairingError {
    pub code: Option<i64>,
    pub message: String,
}

impl PairingError {
    fn transport(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.code == Some(ERR_USER_REJECTED)
    }

    pub fn is_unknown_chain(&self) -> bool {
        self.code == Some(ERR_UNKNOWN_CHAIN)
    }
}

impl std::fmt::Display for PairingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for PairingError {}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingPairing {
    pub topic: String,
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct ApprovedPairing {
    pub address: Address,
    pub chain_id: u64,
}

#[derive(Debug)]
pub enum PairingStatus {
    Pending,
    Approved(ApprovedPairing),
    Rejected,
}

#[derive(Debug, Deserialize)]
struct StatusResp {
    status: String,
    address: Option<String>,
    chain_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RequestResp {
    result: Option<Value>,
    error: Option<RpcError>,
}

fn url_is_allowed(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    if u.starts_with("https://") {
        return true;
    }
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

/// `wallet_addEthereumChain` parameter object (field names per the wire).
pub(crate) fn add_chain_params(params: &NetworkParams) -> Value {
    json!({
        "chainId": params.chain_id_hex(),
        "chainName": params.chain_name,
        "nativeCurrency": {
            "name": params.native_currency.name,
            "symbol": params.native_currency.symbol,
            "decimals": params.native_currency.decimals,
        },
        "rpcUrls": params.rpc_urls,
        "blockExplorerUrls": params.block_explorer_urls,
    })
}

/// `eth_sendTransaction` parameter object built from an alloy request.
pub(crate) fn tx_request_params(tx: &TransactionRequest) -> Result<Value, PairingError> {
    let from = tx
        .from
        .ok_or_else(|| PairingError::transport("transaction missing `from`"))?;
    let to = match tx.to {
        Some(TxKind::Call(a)) => a,
        _ => return Err(PairingError::transport("transaction missing `to`")),
    };

    let mut obj = json!({
        "from": format!("{from:#x}"),
        "to": format!("{to:#x}"),
    });
    if let Some(v) = tx.value {
        obj["value"] = json!(format!("{v:#x}"));
    }
    if let Some(input) = tx.input.input() {
        if !input.is_empty() {
            obj["data"] = json!(format!("0x{}", hex::encode(input)));
        }
    }
    if let Some(id) = tx.chain_id {
        obj["chainId"] = json!(format!("0x{id:x}"));
    }
    Ok(obj)
}

#[derive(Debug, Clone)]
pub struct PairingClient {
    http: Client,
    base_url: String,
    project_id: String,
}

impl PairingClient {
    /// `None` when no bridge is configured; the caller decides whether that
    /// is an error (connect does, teardown does not).
    pub fn from_config(http: &HttpConfig) -> eyre::Result<Option<Self>> {
        let Some(base) = http
            .pairing_base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok(None);
        };
        if !url_is_allowed(base) {
            eyre::bail!("pairing_base_url must use https (or loopback for local testing)");
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build pairing http client")?;
        Ok(Some(Self {
            http: client,
            base_url: base.trim_end_matches('/').to_owned(),
            project_id: http.pairing_project_id.clone().unwrap_or_default(),
        }))
    }

    pub async fn open(&self) -> Result<PendingPairing, PairingError> {
        let resp = self
            .http
            .post(format!("{}/pair", self.base_url))
            .json(&json!({ "project_id": self.project_id }))
            .send()
            .await
            .map_err(|e| PairingError::transport(format!("open pairing: {e}")))?;
        if !resp.status().is_success() {
            return Err(PairingError::transport(format!(
                "open pairing: http {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| PairingError::transport(format!("open pairing: {e}")))
    }

    pub async fn status(&self, topic: &str) -> Result<PairingStatus, PairingError> {
        let resp = self
            .http
            .get(format!("{}/pair/{topic}", self.base_url))
            .send()
            .await
            .map_err(|e| PairingError::transport(format!("pairing status: {e}")))?;
        if !resp.status().is_success() {
            return Err(PairingError::transport(format!(
                "pairing status: http {}",
                resp.status()
            )));
        }
        let s: StatusResp = resp
            .json()
            .await
            .map_err(|e| PairingError::transport(format!("pairing status: {e}")))?;

        match s.status.as_str() {
            "approved" => {
                let raw = s
                    .address
                    .ok_or_else(|| PairingError::transport("approved pairing without address"))?;
                let address = Address::from_str(raw.trim())
                    .map_err(|e| PairingError::transport(format!("bad pairing address: {e}")))?;
                let chain_id = s
                    .chain_id
                    .ok_or_else(|| PairingError::transport("approved pairing without chain id"))?;
                Ok(PairingStatus::Approved(ApprovedPairing { address, chain_id }))
            }
            "rejected" | "expired" => Ok(PairingStatus::Rejected),
            _ => Ok(PairingStatus::Pending),
        }
    }

    pub async fn wait_for_approval(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<ApprovedPairing, PairingError> {
        let start = std::time::Instant::now();
        loop {
            match self.status(topic).await? {
                PairingStatus::Approved(a) => return Ok(a),
                PairingStatus::Rejected => {
                    return Err(PairingError {
                        code: Some(ERR_USER_REJECTED),
                        message: "pairing rejected in the wallet".into(),
                    })
                }
                PairingStatus::Pending => {}
            }
            if start.elapsed() > timeout {
                return Err(PairingError::transport(
                    "timed out waiting for pairing approval",
                ));
            }
            sleep(APPROVAL_POLL_INTERVAL).await;
        }
    }

    /// Relay one provider request and unwrap the JSON-RPC-shaped response.
    pub async fn request(
        &self,
        topic: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, PairingError> {
        let resp = self
            .http
            .post(format!("{}/pair/{topic}/request", self.base_url))
            .json(&json!({ "method": method, "params": params }))
            .send()
            .await
            .map_err(|e| PairingError::transport(format!("{method}: {e}")))?;
        if !resp.status().is_success() {
            return Err(PairingError::transport(format!(
                "{method}: http {}",
                resp.status()
            )));
        }
        let r: RequestResp = resp
            .json()
            .await
            .map_err(|e| PairingError::transport(format!("{method}: {e}")))?;

        if let Some(e) = r.error {
            return Err(PairingError {
                code: Some(e.code),
                message: e.message,
            });
        }
        Ok(r.result.unwrap_or(Value::Null))
    }

    pub async fn switch_chain(
        &self,
        topic: &str,
        params: &NetworkParams,
    ) -> Result<(), PairingError> {
        self.request(
            topic,
            "wallet_switchEthereumChain",
            json!([{ "chainId": params.chain_id_hex() }]),
        )
        .await
        .map(|_| ())
    }

    pub async fn add_chain(&self, topic: &str, params: &NetworkParams) -> Result<(), PairingError> {
        self.request(topic, "wallet_addEthereumChain", json!([add_chain_params(params)]))
            .await
            .map(|_| ())
    }

    pub async fn send_transaction(
        &self,
        topic: &str,
        tx: &TransactionRequest,
    ) -> Result<B256, PairingError> {
        let params = tx_request_params(tx)?;
        let v = self.request(topic, "eth_sendTransaction", json!([params])).await?;
        let hash = v
            .as_str()
            .ok_or_else(|| PairingError::transport("missing transaction hash in response"))?;
        B256::from_str(hash.trim())
            .map_err(|e| PairingError::transport(format!("bad transaction hash: {e}")))
    }

    /// Tear down the pairing topic. Already-gone topics are fine.
    pub async fn disconnect(&self, topic: &str) -> Result<(), PairingError> {
        let resp = self
            .http
            .delete(format!("{}/pair/{topic}", self.base_url))
            .send()
            .await
            .map_err(|e| PairingError::transport(format!("close pairing: {e}")))?;
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(PairingError::transport(format!(
                "close pairing: http {}",
                resp.status()
            )))
        }
    }
}
