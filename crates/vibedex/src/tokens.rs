use alloy::primitives::Address;
use std::str::FromStr as _;

/// One entry of the fixed start-up token table.
///
/// `address` is the on-chain contract used for router paths; for the native
/// asset it is the wrapped-native contract, with `native` set so the swap
/// layer picks the payable call shapes.
#[derive(Debug, Clone)]
pub struct TokenDescriptor {
    pub symbol: &'static str,
    pub display_name: &'static str,
    pub address: Address,
    pub native: bool,
    /// Identifier understood by the price API: either a listing slug or the
    /// token contract address. Absent for tokens the API does not track.
    pub oracle_id: Option<&'static str>,
}

/// Fixed set of tokens tradeable on the VibeDex surface (Base mainnet).
#[derive(Debug, Clone)]
pub struct TokenTable {
    tokens: Vec<TokenDescriptor>,
    pub router: Address,
    pub wrapped_native: Address,
}

const ROUTER_V2: &str = "0x4752ba5dbc23f44d87826276bf6fd6b1c372ad24";
const WRAPPED_NATIVE: &str = "0x4200000000000000000000000000000000000006";
const BRETT: &str = "0x7048d52bab5c458e8127a0018cde59a3b3427f38";
const QR: &str = "0x6c1822168cf3f961f58e3249ba5f9f6b14c363d7";
const PUBLIC: &str = "0x6966954da0b7f6be3e4c0fa64ed6f38ffde22322";

impl TokenTable {
    pub fn base_mainnet() -> eyre::Result<Self> {
        fn addr(s: &str) -> eyre::Result<Address> {
            Address::from_str(s).map_err(|e| eyre::eyre!("bad builtin address {s}: {e}"))
        }

        let wrapped_native = addr(WRAPPED_NATIVE)?;
        let tokens = vec![
            TokenDescriptor {
                symbol: "ETH",
                display_name: "Ethereum",
                address: wrapped_native,
                native: true,
                oracle_id: None,
            },
            TokenDescriptor {
                symbol: "BRETT",
                display_name: "Brett",
                address: addr(BRETT)?,
                native: false,
                oracle_id: Some("based-brett"),
            },
            TokenDescriptor {
                symbol: "QR",
                display_name: "QR",
                address: addr(QR)?,
                native: false,
                oracle_id: Some(QR),
            },
            TokenDescriptor {
                symbol: "PUBLIC",
                display_name: "Public",
                address: addr(PUBLIC)?,
                native: false,
                oracle_id: Some(PUBLIC),
            },
            // VIBE is pre-launch; it trades and prices against the BRETT pool.
            TokenDescriptor {
                symbol: "VIBE",
                display_name: "Vibe",
                address: addr(BRETT)?,
                native: false,
                oracle_id: Some(BRETT),
            },
        ];

        Ok(Self {
            tokens,
            router: addr(ROUTER_V2)?,
            wrapped_native,
        })
    }

    pub fn lookup(&self, symbol: &str) -> Option<&TokenDescriptor> {
        let s = symbol.trim();
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(s))
    }

    pub fn all(&self) -> &[TokenDescriptor] {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() -> eyre::Result<()> {
        let table = TokenTable::base_mainnet()?;
        let brett = table.lookup("brett");
        assert!(brett.is_some(), "BRETT must resolve");
        assert_eq!(brett.map(|t| t.symbol), Some("BRETT"));
        assert!(table.lookup(" eth ").is_some(), "whitespace is trimmed");
        assert!(table.lookup("DOGE").is_none());
        Ok(())
    }

    #[test]
    fn native_entry_points_at_wrapped_native() -> eyre::Result<()> {
        let table = TokenTable::base_mainnet()?;
        let eth = table.lookup("ETH").ok_or_else(|| eyre::eyre!("no ETH"))?;
        assert!(eth.native);
        assert_eq!(eth.address, table.wrapped_native);
        assert!(eth.oracle_id.is_none(), "native asset is priced via fallback");
        Ok(())
    }

    #[test]
    fn symbols_are_unique() -> eyre::Result<()> {
        let table = TokenTable::base_mainnet()?;
        let mut seen = std::collections::BTreeSet::new();
        for t in table.all() {
            assert!(seen.insert(t.symbol), "duplicate symbol {}", t.symbol);
        }
        Ok(())
    }
}
