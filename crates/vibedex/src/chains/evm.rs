use crate::config::RpcConfig;
use crate::retry::{rotate_endpoints, RetryPolicy};
use alloy::{
    network::{EthereumWallet, TransactionBuilder as _},
    primitives::{Address, Bytes, B256, U256},
    providers::{Provider as _, ProviderBuilder, RootProvider},
    rpc::types::{TransactionReceipt, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolCall as _,
};
use eyre::Context as _;
use reqwest::Client;
use std::{str::FromStr as _, time::Duration};
use tokio::time::sleep;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type EvmProvider = RootProvider;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function approve(address spender, uint256 value) returns (bool);
    }
}

/// Read/submit client for the one EVM chain this instance targets.
///
/// Reads rotate through the configured endpoints with bounded backoff;
/// submission picks a healthy endpoint first and sends exactly once.
#[derive(Debug, Clone)]
pub struct EvmChain {
    pub chain_id: u64,
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    retry: RetryPolicy,
}

impl EvmChain {
    pub fn from_config(rpc: &RpcConfig) -> Self {
        Self {
            chain_id: rpc.chain_id,
            rpc_url: rpc.rpc_url.clone(),
            fallback_rpc_urls: rpc.fallback_rpc_urls.clone(),
            retry: RetryPolicy::default(),
        }
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(1 + self.fallback_rpc_urls.len());
        if !self.rpc_url.trim().is_empty() {
            urls.push(self.rpc_url.trim().to_owned());
        }
        for u in &self.fallback_rpc_urls {
            let t = u.trim();
            if t.is_empty() {
                continue;
            }
            if urls.iter().any(|x| x == t) {
                continue;
            }
            urls.push(t.to_owned());
        }
        urls
    }

    pub(crate) async fn with_fallback<T, Fut>(
        &self,
        label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Send + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: std::future::Future<Output = eyre::Result<T>> + Send,
    {
        let urls = self.all_rpc_urls();
        rotate_endpoints(&urls, &self.retry, label, |u| {
            let u = u.to_owned();
            let f = &f;
            async move {
                let p = Self::provider_for_url(&u)?;
                f(p).await
            }
        })
        .await
    }

    pub async fn get_native_balance(&self, addr: Address) -> eyre::Result<U256> {
        self.with_fallback("get balance", |p| async move {
            let v = p.get_balance(addr).await.context("get balance")?;
            Ok(v)
        })
        .await
    }

    pub async fn get_erc20_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> eyre::Result<(U256, u8)> {
        self.with_fallback("erc20 balance", |p| async move {
            let c = IERC20::new(token, &p);
            let bal = c.balanceOf(owner).call().await.context("erc20 balanceOf")?;
            let decimals = c.decimals().call().await.context("erc20 decimals")?;
            Ok((bal, decimals))
        })
        .await
    }

    pub async fn get_erc20_decimals(&self, token: Address) -> eyre::Result<u8> {
        self.with_fallback("erc20 decimals", |p| async move {
            let c = IERC20::new(token, &p);
            let decimals = c.decimals().call().await.context("erc20 decimals")?;
            Ok(decimals)
        })
        .await
    }

    pub async fn get_gas_price(&self) -> eyre::Result<u128> {
        self.with_fallback("get gas price", |p| async move {
            let gp = p.get_gas_price().await.context("get gas price")?;
            Ok(gp)
        })
        .await
    }

    pub async fn estimate_tx_gas(&self, tx: &TransactionRequest) -> eyre::Result<u64> {
        let txc = tx.clone();
        self.with_fallback("estimate gas", |p| {
            let tx_inner = txc.clone();
            async move {
                let gas = p.estimate_gas(tx_inner).await.context("estimate gas")?;
                Ok(gas)
            }
        })
        .await
    }

    pub async fn get_tx_receipt(&self, tx: B256) -> eyre::Result<Option<TransactionReceipt>> {
        self.with_fallback("get tx receipt", |p| async move {
            let r = p
                .get_transaction_receipt(tx)
                .await
                .context("get transaction receipt")?;
            Ok(r)
        })
        .await
    }

    pub async fn wait_for_receipt(
        &self,
        tx: B256,
        timeout: Duration,
    ) -> eyre::Result<TransactionReceipt> {
        let start = std::time::Instant::now();
        loop {
            if start.elapsed() > timeout {
                eyre::bail!("timed out waiting for tx receipt");
            }
            if let Some(r) = self.get_tx_receipt(tx).await? {
                return Ok(r);
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }

    async fn pick_healthy_url(&self) -> eyre::Result<String> {
        let urls = self.all_rpc_urls();
        rotate_endpoints(&urls, &self.retry, "select rpc", |u| {
            let u = u.to_owned();
            async move {
                let p = Self::provider_for_url(&u)?;
                // Basic liveness check.
                p.get_block_number().await.context("get block number")?;
                Ok(u)
            }
        })
        .await
    }

    /// Sign and submit a transaction with the local key.
    ///
    /// Nonce, gas and fees are filled by the provider. The transaction is
    /// sent once, to a single endpoint that answered a liveness probe.
    pub async fn send_tx(
        &self,
        signer: PrivateKeySigner,
        mut tx: TransactionRequest,
    ) -> eyre::Result<B256> {
        let url = self.pick_healthy_url().await?;
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;

        if tx.from.is_none() {
            tx.from = Some(signer.address());
        }
        tx.chain_id = Some(self.chain_id);

        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(u);
        let pending = provider
            .send_transaction(tx)
            .await
            .context("send transaction")?;
        Ok(*pending.tx_hash())
    }

    pub fn build_erc20_approve(
        from: Address,
        token: Address,
        spender: Address,
        value: U256,
    ) -> TransactionRequest {
        let calldata = IERC20::approveCall { spender, value }.abi_encode();
        TransactionRequest::default()
            .with_from(from)
            .with_to(token)
            .with_input(Bytes::from(calldata))
    }

    pub fn parse_address(s: &str) -> eyre::Result<Address> {
        Address::from_str(s).context("parse evm address")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_url_rotation_dedupes_and_trims() {
        let chain = EvmChain {
            chain_id: 8453,
            rpc_url: " https://one.example ".into(),
            fallback_rpc_urls: vec![
                "https://two.example".into(),
                "https://one.example".into(),
                "  ".into(),
            ],
            retry: RetryPolicy::default(),
        };
        assert_eq!(
            chain.all_rpc_urls(),
            vec!["https://one.example", "https://two.example"]
        );
    }

    #[test]
    fn approve_calldata_carries_the_erc20_selector() -> eyre::Result<()> {
        let token = EvmChain::parse_address("0x7048d52bab5c458e8127a0018cde59a3b3427f38")?;
        let spender = EvmChain::parse_address("0x4752ba5dbc23f44d87826276bf6fd6b1c372ad24")?;
        let tx = EvmChain::build_erc20_approve(Address::ZERO, token, spender, U256::from(5_u64));

        let input = tx
            .input
            .input()
            .ok_or_else(|| eyre::eyre!("approve tx has no calldata"))?;
        // approve(address,uint256)
        assert_eq!(&input[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(tx.to, Some(alloy::primitives::TxKind::Call(token)));
        Ok(())
    }
}
