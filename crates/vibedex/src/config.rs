use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BASE_CHAIN_ID: u64 = 8453;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary JSON-RPC endpoint for the chain this instance targets.
    pub rpc_url: String,
    /// Additional endpoints to rotate through when the primary fails.
    pub fallback_rpc_urls: Vec<String>,
    /// Chain id the endpoints above serve.
    pub chain_id: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://mainnet.base.org".into(),
            fallback_rpc_urls: vec![
                "https://base-rpc.publicnode.com".into(),
                "https://base.llamarpc.com".into(),
            ],
            chain_id: BASE_CHAIN_ID,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Price API base URL (GeckoTerminal-compatible, keyless).
    pub price_api_base_url: String,
    /// Network slug used in price API token endpoints.
    pub price_api_network: String,
    /// Optional remote-pairing bridge base URL. If unset and no local signer
    /// key is available, `connect` fails with `no_provider_available`.
    pub pairing_base_url: Option<String>,
    /// Project identifier sent when opening a pairing session.
    pub pairing_project_id: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            price_api_base_url: "https://api.geckoterminal.com/api/v2".into(),
            price_api_network: "base".into(),
            pairing_base_url: None,
            pairing_project_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// Default slippage tolerance in basis points (50 = 0.5%).
    pub default_slippage_bps: u32,
    /// Router call deadline, seconds from submission.
    pub deadline_seconds: u64,
    /// How long to poll for a transaction receipt before giving up.
    pub receipt_timeout_seconds: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            default_slippage_bps: 50,
            deadline_seconds: 20 * 60,
            receipt_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// Cache TTL for spot prices (seconds).
    pub cache_ttl_seconds: u64,
    /// Last-resort USD prices per symbol, used when the price API is
    /// unavailable. Degrading to a known-good constant is deliberate policy.
    pub fallback_usd: BTreeMap<String, f64>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        let mut fallback_usd = BTreeMap::new();
        fallback_usd.insert("ETH".to_owned(), 1800.0_f64);
        fallback_usd.insert("BRETT".to_owned(), 0.32_f64);
        fallback_usd.insert("QR".to_owned(), 0.0045_f64);
        fallback_usd.insert("PUBLIC".to_owned(), 0.003_f64);
        fallback_usd.insert("VIBE".to_owned(), 0.32_f64);
        Self {
            cache_ttl_seconds: 5 * 60,
            fallback_usd,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Parameters submitted when asking a wallet to add a network it does not
/// know yet (chain id goes over the wire hex-encoded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Vec<String>,
}

impl NetworkParams {
    pub fn base_mainnet() -> Self {
        Self {
            chain_id: BASE_CHAIN_ID,
            chain_name: "Base".into(),
            native_currency: NativeCurrency {
                name: "ETH".into(),
                symbol: "ETH".into(),
                decimals: 18,
            },
            rpc_urls: vec!["https://mainnet.base.org".into()],
            block_explorer_urls: vec!["https://basescan.org".into()],
        }
    }

    pub fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VibeConfig {
    pub rpc: RpcConfig,
    pub http: HttpConfig,
    pub swap: SwapConfig,
    pub price: PriceConfig,
    /// Networks this instance may ask a wallet to add/switch to.
    pub networks: Vec<NetworkParams>,
}

impl Default for VibeConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            http: HttpConfig::default(),
            swap: SwapConfig::default(),
            price: PriceConfig::default(),
            networks: vec![NetworkParams::base_mainnet()],
        }
    }
}

impl VibeConfig {
    pub fn network_params(&self, chain_id: u64) -> Option<&NetworkParams> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_base() {
        let cfg = VibeConfig::default();
        assert_eq!(cfg.rpc.chain_id, BASE_CHAIN_ID);
        assert!(cfg.network_params(BASE_CHAIN_ID).is_some());
        assert!(cfg.network_params(1).is_none());
    }

    #[test]
    fn chain_id_serializes_hex_on_the_wire() {
        let params = NetworkParams::base_mainnet();
        assert_eq!(params.chain_id_hex(), "0x2105");
        assert_eq!(params.native_currency.decimals, 18);
    }

    #[test]
    fn fallback_table_covers_the_token_set() {
        let cfg = VibeConfig::default();
        for sym in ["ETH", "BRETT", "QR", "PUBLIC", "VIBE"] {
            assert!(
                cfg.price.fallback_usd.contains_key(sym),
                "missing fallback for {sym}"
            );
        }
    }

    #[test]
    fn config_round_trips_through_toml() -> eyre::Result<()> {
        let cfg = VibeConfig::default();
        let s = toml::to_string_pretty(&cfg)?;
        let back: VibeConfig = toml::from_str(&s)?;
        assert_eq!(back.rpc.chain_id, cfg.rpc.chain_id);
        assert_eq!(back.swap.default_slippage_bps, cfg.swap.default_slippage_bps);
        Ok(())
    }
}
