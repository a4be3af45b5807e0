use thiserror::Error;

/// Typed failures surfaced to callers of the session/swap/price adapters.
///
/// Every variant has a stable string code so CLI output and logs stay
/// greppable even when messages change.
#[derive(Debug, Error, Clone)]
pub enum VibeError {
    #[error("no wallet provider available")]
    NoProviderAvailable,

    #[error("user rejected the request")]
    UserRejected,

    #[error("network switch rejected")]
    NetworkSwitchRejected,

    #[error("unknown network: chain id {0}")]
    UnknownNetwork(u64),

    #[error("wallet not connected")]
    WalletNotConnected,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("insufficient balance for amount plus gas")]
    InsufficientBalance,

    #[error("approval failed: {0}")]
    ApprovalFailed(String),

    #[error("swap reverted: {0}")]
    SwapReverted(String),

    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    #[error("connection attempt superseded")]
    ConnectionSuperseded,

    #[error("{0}")]
    Unknown(String),
}

impl VibeError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoProviderAvailable => "no_provider_available",
            Self::UserRejected => "user_rejected",
            Self::NetworkSwitchRejected => "network_switch_rejected",
            Self::UnknownNetwork(_) => "unknown_network",
            Self::WalletNotConnected => "wallet_not_connected",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InsufficientBalance => "insufficient_balance",
            Self::ApprovalFailed(_) => "approval_failed",
            Self::SwapReverted(_) => "swap_reverted",
            Self::PriceUnavailable(_) => "price_unavailable",
            Self::ConnectionSuperseded => "connection_superseded",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Extract a human-readable revert reason from a provider error.
///
/// Node errors carry a short reason followed by a parenthesized technical
/// suffix (method, transaction payload, error codes). Keep the prefix only.
pub fn revert_reason(err: &eyre::Report) -> String {
    let full = format!("{err:#}");
    let trimmed = full.split('(').next().unwrap_or(&full).trim();
    if trimmed.is_empty() {
        "execution reverted".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_reason_strips_parenthetical_suffix() {
        let err = eyre::eyre!(
            "execution reverted: UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT (method=eth_call, data=0xdeadbeef)"
        );
        assert_eq!(
            revert_reason(&err),
            "execution reverted: UniswapV2Router: INSUFFICIENT_OUTPUT_AMOUNT"
        );
    }

    #[test]
    fn revert_reason_passes_plain_messages_through() {
        let err = eyre::eyre!("transfer amount exceeds balance");
        assert_eq!(revert_reason(&err), "transfer amount exceeds balance");
    }

    #[test]
    fn revert_reason_never_returns_empty() {
        let err = eyre::eyre!("(odd node error with leading parenthesis)");
        assert_eq!(revert_reason(&err), "execution reverted");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(VibeError::WalletNotConnected.code(), "wallet_not_connected");
        assert_eq!(
            VibeError::InvalidAmount("x".into()).code(),
            "invalid_amount"
        );
        assert_eq!(
            VibeError::SwapReverted("r".into()).code(),
            "swap_reverted"
        );
    }
}
