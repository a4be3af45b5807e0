//! Quotes and swaps through the fixed UniswapV2-style router.
//!
//! Swaps follow the router's three call shapes. A token-funded swap is a
//! strict two-step sequence: the approval transaction is submitted and its
//! receipt awaited before the swap transaction goes out, because the router
//! cannot pull un-approved tokens.

use crate::{
    amount,
    chains::evm::EvmChain,
    cli_output,
    config::SwapConfig,
    errors::{revert_reason, VibeError},
    session::SessionManager,
    tokens::TokenTable,
};
use alloy::{
    network::TransactionBuilder as _,
    primitives::{Address, Bytes, B256, U256},
    rpc::types::TransactionRequest,
    sol,
    sol_types::SolCall as _,
};
use chrono::Utc;
use eyre::Context as _;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

const BPS_DENOMINATOR: u64 = 10_000;

sol! {
    #[sol(rpc)]
    contract IUniswapV2Router {
        function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts);
        function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) external payable returns (uint256[] amounts);
        function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts);
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts);
    }
}

/// Ephemeral per-action input; consumed once and discarded.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub from_token: String,
    pub to_token: String,
    pub amount_in: String,
    pub slippage_bps: u32,
}

/// Terminal outcome handed back to the caller; not retained here.
#[derive(Debug, Clone, Serialize)]
pub struct SwapResult {
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    NativeForTokens,
    TokensForNative,
    TokensForTokens,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    pub shape: CallShape,
    pub needs_approval: bool,
    pub min_out: U256,
    pub deadline: u64,
}

/// Minimum acceptable output after slippage, in integer arithmetic.
pub fn compute_min_out(quote_out: U256, slippage_bps: u32) -> Result<U256, VibeError> {
    if u64::from(slippage_bps) >= BPS_DENOMINATOR {
        return Err(VibeError::InvalidAmount(format!(
            "slippage out of range: {slippage_bps} bps"
        )));
    }
    quote_out
        .checked_mul(U256::from(BPS_DENOMINATOR - u64::from(slippage_bps)))
        .map(|v| v / U256::from(BPS_DENOMINATOR))
        .ok_or_else(|| VibeError::InvalidAmount("quote overflow".to_owned()))
}

/// Pure planning step: call shape, approval requirement, slippage floor and
/// deadline, with no provider in sight.
pub fn plan_swap(
    from_native: bool,
    to_native: bool,
    quote_out: U256,
    slippage_bps: u32,
    now_unix: i64,
    deadline_seconds: u64,
) -> Result<SwapPlan, VibeError> {
    if from_native && to_native {
        return Err(VibeError::Unknown(
            "cannot swap the native asset for itself".to_owned(),
        ));
    }
    let min_out = compute_min_out(quote_out, slippage_bps)?;
    let shape = if from_native {
        CallShape::NativeForTokens
    } else if to_native {
        CallShape::TokensForNative
    } else {
        CallShape::TokensForTokens
    };
    Ok(SwapPlan {
        shape,
        // Only a token input needs the router approved; the native asset
        // rides along as transaction value.
        needs_approval: !from_native,
        min_out,
        deadline: u64::try_from(now_unix).unwrap_or(0).saturating_add(deadline_seconds),
    })
}

fn classify_chain_error(e: &eyre::Report) -> VibeError {
    let s = format!("{e:#}").to_lowercase();
    if s.contains("user rejected") || s.contains("user denied") {
        return VibeError::UserRejected;
    }
    if s.contains("insufficient funds") {
        return VibeError::InsufficientBalance;
    }
    if s.contains("revert") {
        return VibeError::SwapReverted(revert_reason(e));
    }
    VibeError::Unknown(revert_reason(e))
}

pub struct RouterAdapter {
    table: TokenTable,
    router: Address,
    cfg: SwapConfig,
}

impl RouterAdapter {
    pub fn new(table: TokenTable, cfg: SwapConfig) -> Self {
        let router = table.router;
        Self { table, router, cfg }
    }

    /// Resolve a symbol from the fixed table, falling through to a raw
    /// contract address for anything the table does not know.
    fn resolve(&self, symbol_or_address: &str) -> Result<(Address, bool), VibeError> {
        if let Some(t) = self.table.lookup(symbol_or_address) {
            return Ok((t.address, t.native));
        }
        EvmChain::parse_address(symbol_or_address.trim())
            .map(|a| (a, false))
            .map_err(|_| VibeError::Unknown(format!("unrecognized token: {symbol_or_address}")))
    }

    async fn amounts_out(
        &self,
        chain: &EvmChain,
        amount_in: U256,
        path: Vec<Address>,
    ) -> eyre::Result<Vec<U256>> {
        let router = self.router;
        chain
            .with_fallback("router getAmountsOut", move |p| {
                let path = path.clone();
                async move {
                    let c = IUniswapV2Router::new(router, &p);
                    let amounts = c
                        .getAmountsOut(amount_in, path)
                        .call()
                        .await
                        .context("getAmountsOut")?;
                    Ok(amounts)
                }
            })
            .await
    }

    /// Router output for the pairwise path. Empty or non-positive input
    /// means "no quote yet" and yields zero rather than an error.
    pub async fn quote(
        &self,
        chain: &EvmChain,
        amount_in: &str,
        from: &str,
        to: &str,
    ) -> eyre::Result<U256> {
        let Ok((from_addr, from_native)) = self.resolve(from) else {
            return Ok(U256::ZERO);
        };
        let Ok((to_addr, _)) = self.resolve(to) else {
            return Ok(U256::ZERO);
        };
        if amount::parse_positive_to_base(amount_in, 18).is_err() {
            return Ok(U256::ZERO);
        }

        let decimals_in = if from_native {
            18
        } else {
            chain.get_erc20_decimals(from_addr).await.unwrap_or(18)
        };
        let Ok(amt) = amount::parse_positive_to_base(amount_in, decimals_in) else {
            return Ok(U256::ZERO);
        };

        let amounts = self.amounts_out(chain, amt, vec![from_addr, to_addr]).await?;
        Ok(amounts.last().copied().unwrap_or(U256::ZERO))
    }

    /// Like [`RouterAdapter::quote`], plus the output formatted in the
    /// destination token's decimals.
    pub async fn quote_decimal(
        &self,
        chain: &EvmChain,
        amount_in: &str,
        from: &str,
        to: &str,
    ) -> eyre::Result<(U256, String)> {
        let out = self.quote(chain, amount_in, from, to).await?;
        if out.is_zero() {
            return Ok((out, "0".to_owned()));
        }
        let decimals_out = match self.resolve(to) {
            Ok((_, true)) | Err(_) => 18,
            Ok((addr, false)) => chain.get_erc20_decimals(addr).await.unwrap_or(18),
        };
        let formatted = amount::format_base_to_decimal(out, decimals_out);
        Ok((out, formatted))
    }

    /// Execute a swap. Never returns an error: every failure is folded into
    /// the result, and exactly one user-visible notification is emitted per
    /// attempt. Balances are not refreshed here; callers re-query.
    pub async fn swap(
        &self,
        chain: &EvmChain,
        session: &SessionManager,
        req: &SwapRequest,
    ) -> SwapResult {
        match self.try_swap(chain, session, req).await {
            Ok(tx_hash) => {
                let hash = format!("{tx_hash:#x}");
                cli_output::notify_swap(true, &hash);
                SwapResult {
                    succeeded: true,
                    tx_hash: Some(hash),
                    error: None,
                    error_code: None,
                }
            }
            Err(e) => {
                cli_output::notify_swap(false, &e.to_string());
                SwapResult {
                    succeeded: false,
                    tx_hash: None,
                    error: Some(e.to_string()),
                    error_code: Some(e.code()),
                }
            }
        }
    }

    async fn try_swap(
        &self,
        chain: &EvmChain,
        session: &SessionManager,
        req: &SwapRequest,
    ) -> Result<B256, VibeError> {
        let Some(s) = session.current() else {
            return Err(VibeError::WalletNotConnected);
        };
        if !s.has_signer {
            return Err(VibeError::WalletNotConnected);
        }

        let (from_addr, from_native) = self.resolve(&req.from_token)?;
        let (to_addr, to_native) = self.resolve(&req.to_token)?;

        // Validated before anything touches the network.
        amount::parse_positive_to_base(&req.amount_in, 18)?;

        let decimals_in = if from_native {
            18
        } else {
            chain.get_erc20_decimals(from_addr).await.unwrap_or(18)
        };
        let amount_in = amount::parse_positive_to_base(&req.amount_in, decimals_in)?;

        let path = vec![from_addr, to_addr];
        let amounts = self
            .amounts_out(chain, amount_in, path.clone())
            .await
            .map_err(|e| classify_chain_error(&e))?;
        let quote_out = amounts
            .last()
            .copied()
            .ok_or_else(|| VibeError::Unknown("router returned an empty quote".to_owned()))?;

        let plan = plan_swap(
            from_native,
            to_native,
            quote_out,
            req.slippage_bps,
            Utc::now().timestamp(),
            self.cfg.deadline_seconds,
        )?;
        let swap_tx = self.build_swap_tx(&plan, s.address, amount_in, path);

        if from_native {
            self.check_native_balance(chain, s.address, amount_in, &swap_tx)
                .await?;
        }

        if plan.needs_approval {
            self.approve_router(chain, session, s.address, from_addr, amount_in)
                .await?;
        }

        let tx_hash = session
            .send_transaction(chain, swap_tx)
            .await
            .map_err(|e| classify_chain_error(&e))?;
        info!(tx = %format!("{tx_hash:#x}"), "swap submitted");

        let receipt = chain
            .wait_for_receipt(tx_hash, self.receipt_timeout())
            .await
            .map_err(|e| VibeError::Unknown(format!("{e:#}")))?;
        if !receipt.status() {
            return Err(VibeError::SwapReverted("swap transaction reverted".to_owned()));
        }
        Ok(tx_hash)
    }

    fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.receipt_timeout_seconds)
    }

    /// Best-effort client-side check: amount plus estimated gas must fit in
    /// the live balance. Skipped when estimation itself is unavailable.
    async fn check_native_balance(
        &self,
        chain: &EvmChain,
        owner: Address,
        amount_in: U256,
        swap_tx: &TransactionRequest,
    ) -> Result<(), VibeError> {
        let balance = chain
            .get_native_balance(owner)
            .await
            .map_err(|e| classify_chain_error(&e))?;
        if balance < amount_in {
            return Err(VibeError::InsufficientBalance);
        }
        let gas_cost = match (
            chain.estimate_tx_gas(swap_tx).await.ok(),
            chain.get_gas_price().await.ok(),
        ) {
            (Some(gas), Some(gas_price)) => U256::from(gas).saturating_mul(U256::from(gas_price)),
            _ => U256::ZERO,
        };
        if balance < amount_in.saturating_add(gas_cost) {
            return Err(VibeError::InsufficientBalance);
        }
        Ok(())
    }

    /// Approve the router for the input amount and wait for inclusion.
    /// Failure here means the swap is never submitted.
    async fn approve_router(
        &self,
        chain: &EvmChain,
        session: &SessionManager,
        owner: Address,
        token: Address,
        amount_in: U256,
    ) -> Result<(), VibeError> {
        let approve_tx = EvmChain::build_erc20_approve(owner, token, self.router, amount_in);
        let tx_hash = session
            .send_transaction(chain, approve_tx)
            .await
            .map_err(|e| VibeError::ApprovalFailed(revert_reason(&e)))?;
        info!(tx = %format!("{tx_hash:#x}"), "approval submitted; waiting for inclusion");

        let receipt = chain
            .wait_for_receipt(tx_hash, self.receipt_timeout())
            .await
            .map_err(|e| VibeError::ApprovalFailed(format!("{e:#}")))?;
        if !receipt.status() {
            return Err(VibeError::ApprovalFailed(
                "approval transaction reverted".to_owned(),
            ));
        }
        Ok(())
    }

    fn build_swap_tx(
        &self,
        plan: &SwapPlan,
        from: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> TransactionRequest {
        let to = from;
        let deadline = U256::from(plan.deadline);
        let (calldata, value) = match plan.shape {
            CallShape::NativeForTokens => (
                IUniswapV2Router::swapExactETHForTokensCall {
                    amountOutMin: plan.min_out,
                    path,
                    to,
                    deadline,
                }
                .abi_encode(),
                amount_in,
            ),
            CallShape::TokensForNative => (
                IUniswapV2Router::swapExactTokensForETHCall {
                    amountIn: amount_in,
                    amountOutMin: plan.min_out,
                    path,
                    to,
                    deadline,
                }
                .abi_encode(),
                U256::ZERO,
            ),
            CallShape::TokensForTokens => (
                IUniswapV2Router::swapExactTokensForTokensCall {
                    amountIn: amount_in,
                    amountOutMin: plan.min_out,
                    path,
                    to,
                    deadline,
                }
                .abi_encode(),
                U256::ZERO,
            ),
        };
        TransactionRequest::default()
            .with_from(from)
            .with_to(self.router)
            .with_value(value)
            .with_input(Bytes::from(calldata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> eyre::Result<RouterAdapter> {
        Ok(RouterAdapter::new(
            TokenTable::base_mainnet()?,
            SwapConfig::default(),
        ))
    }

    #[test]
    fn min_out_truncates_like_the_router_expects() -> eyre::Result<()> {
        // 0.5% on a quote of 1000 leaves exactly 995.
        assert_eq!(
            compute_min_out(U256::from(1000_u64), 50).map_err(|e| eyre::eyre!("{e}"))?,
            U256::from(995_u64)
        );
        assert_eq!(
            compute_min_out(U256::from(1000_u64), 0).map_err(|e| eyre::eyre!("{e}"))?,
            U256::from(1000_u64)
        );
        // 999 * 9950 / 10000 truncates to 994.
        assert_eq!(
            compute_min_out(U256::from(999_u64), 50).map_err(|e| eyre::eyre!("{e}"))?,
            U256::from(994_u64)
        );
        Ok(())
    }

    #[test]
    fn min_out_rejects_full_range_slippage() {
        assert!(compute_min_out(U256::from(1000_u64), 10_000).is_err());
        assert!(compute_min_out(U256::from(1000_u64), 65_000).is_err());
    }

    #[test]
    fn native_input_skips_approval_and_picks_the_payable_shape() -> eyre::Result<()> {
        let plan = plan_swap(true, false, U256::from(1000_u64), 50, 1_700_000_000, 1200)
            .map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(plan.shape, CallShape::NativeForTokens);
        assert!(!plan.needs_approval);
        assert_eq!(plan.min_out, U256::from(995_u64));
        assert_eq!(plan.deadline, 1_700_001_200);
        Ok(())
    }

    #[test]
    fn token_input_requires_approval_for_both_remaining_shapes() -> eyre::Result<()> {
        let to_native = plan_swap(false, true, U256::from(10_u64), 50, 0, 1200)
            .map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(to_native.shape, CallShape::TokensForNative);
        assert!(to_native.needs_approval);

        let to_token = plan_swap(false, false, U256::from(10_u64), 50, 0, 1200)
            .map_err(|e| eyre::eyre!("{e}"))?;
        assert_eq!(to_token.shape, CallShape::TokensForTokens);
        assert!(to_token.needs_approval);
        Ok(())
    }

    #[test]
    fn native_for_native_is_not_a_swap() {
        assert!(plan_swap(true, true, U256::from(1_u64), 50, 0, 1200).is_err());
    }

    #[test]
    fn resolve_prefers_the_table_and_accepts_raw_addresses() -> eyre::Result<()> {
        let a = adapter()?;
        let (eth, native) = a.resolve("eth").map_err(|e| eyre::eyre!("{e}"))?;
        assert!(native);
        assert_eq!(eth, a.table.wrapped_native);

        let raw = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
        let (addr, native) = a.resolve(raw).map_err(|e| eyre::eyre!("{e}"))?;
        assert!(!native);
        assert_eq!(format!("{addr:#x}"), raw);

        assert!(a.resolve("not-a-token").is_err());
        Ok(())
    }

    #[test]
    fn swap_tx_value_follows_the_call_shape() -> eyre::Result<()> {
        let a = adapter()?;
        let from = Address::from([0x22_u8; 20]);
        let path = vec![a.table.wrapped_native, Address::from([0x33_u8; 20])];

        let native_plan = plan_swap(true, false, U256::from(1000_u64), 50, 0, 1200)
            .map_err(|e| eyre::eyre!("{e}"))?;
        let tx = a.build_swap_tx(&native_plan, from, U256::from(7_u64), path.clone());
        assert_eq!(tx.value, Some(U256::from(7_u64)));

        let token_plan = plan_swap(false, false, U256::from(1000_u64), 50, 0, 1200)
            .map_err(|e| eyre::eyre!("{e}"))?;
        let tx = a.build_swap_tx(&token_plan, from, U256::from(7_u64), path);
        assert_eq!(tx.value, Some(U256::ZERO));
        Ok(())
    }

    fn temp_manager(dir: &std::path::Path, with_key: bool) -> eyre::Result<SessionManager> {
        let paths = crate::paths::VibePaths {
            config_dir: dir.join("config"),
            data_dir: dir.join("data"),
            log_file: dir.join("data").join("vibedex.log.jsonl"),
        };
        std::fs::create_dir_all(&paths.config_dir)?;
        std::fs::create_dir_all(&paths.data_dir)?;
        if with_key {
            std::fs::write(
                paths.signer_key_file(),
                "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
            )?;
        }
        SessionManager::new(crate::config::VibeConfig::default(), &paths)
    }

    #[tokio::test]
    async fn swap_without_a_session_reports_wallet_not_connected() -> eyre::Result<()> {
        let a = adapter()?;
        let dir = tempfile::tempdir()?;
        let manager = temp_manager(dir.path(), false)?;
        let chain = EvmChain::from_config(&crate::config::RpcConfig::default());

        let result = a
            .swap(
                &chain,
                &manager,
                &SwapRequest {
                    from_token: "ETH".into(),
                    to_token: "BRETT".into(),
                    amount_in: "1".into(),
                    slippage_bps: 50,
                },
            )
            .await;
        assert!(!result.succeeded);
        assert_eq!(result.error_code, Some("wallet_not_connected"));
        Ok(())
    }

    #[tokio::test]
    async fn swap_rejects_bad_amounts_before_touching_the_chain() -> eyre::Result<()> {
        let a = adapter()?;
        let dir = tempfile::tempdir()?;
        let manager = temp_manager(dir.path(), true)?;
        manager.connect().await.map_err(|e| eyre::eyre!("{e}"))?;

        // Nothing listens on this endpoint; a network call would not return
        // invalid_amount, so reaching it at all fails the assertion below.
        let chain = EvmChain::from_config(&crate::config::RpcConfig {
            rpc_url: "http://127.0.0.1:9".into(),
            fallback_rpc_urls: vec![],
            chain_id: crate::config::BASE_CHAIN_ID,
        });

        for bad in ["0", "-5", "abc", "1,5", ""] {
            let result = a
                .swap(
                    &chain,
                    &manager,
                    &SwapRequest {
                        from_token: "ETH".into(),
                        to_token: "BRETT".into(),
                        amount_in: bad.into(),
                        slippage_bps: 50,
                    },
                )
                .await;
            assert!(!result.succeeded);
            assert_eq!(
                result.error_code,
                Some("invalid_amount"),
                "amount {bad:?} must be rejected up front"
            );
        }
        Ok(())
    }
}
