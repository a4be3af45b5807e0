//! Spot prices and OHLCV history from the GeckoTerminal-style API.
//!
//! Lookup failures never propagate as errors: callers get the stale cache
//! entry when one exists, `None`/empty otherwise, and the injected fallback
//! table covers the rest.

use crate::{
    config::{HttpConfig, PriceConfig},
    tokens::TokenTable,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use eyre::Context as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};
use tracing::warn;

const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Recent,
    Medium,
    Extended,
}

impl Timeframe {
    /// API granularity and point count for each window.
    pub const fn granularity(self) -> (&'static str, u32) {
        match self {
            Self::Recent => ("1H", 24),
            Self::Medium => ("4H", 42),
            Self::Extended => ("1D", 30),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Medium => "medium",
            Self::Extended => "extended",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub symbol: String,
    pub usd: f64,
    pub native: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Oracle,
    Fallback,
}

impl PriceSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PricePoint {
    pub timestamp_ms: i64,
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug)]
struct CacheEntry {
    quote: PriceQuote,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct PriceOracle {
    http: Client,
    base_url: String,
    network: String,
    ttl: ChronoDuration,
    fallback_usd: BTreeMap<String, f64>,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

fn parse_price_field(v: Option<&String>) -> f64 {
    v.and_then(|s| s.trim().parse::<f64>().ok()).unwrap_or(0.0)
}

fn coerce_timestamp_ms(v: &Value) -> Option<i64> {
    if let Some(s) = v.as_str() {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.timestamp_millis());
    }
    let n = v.as_i64()?;
    // Epoch seconds unless the value already looks like milliseconds.
    Some(if n >= 1_000_000_000_000 {
        n
    } else {
        n.saturating_mul(1000)
    })
}

fn coerce_f64(v: Option<&Value>) -> f64 {
    let Some(v) = v else { return 0.0 };
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
struct SpotResp {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    attributes: SpotAttrs,
}

#[derive(Debug, Deserialize)]
struct SpotAttrs {
    price_usd: Option<String>,
    price_eth: Option<String>,
    price_native: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OhlcvResp {
    #[serde(default)]
    data: Vec<OhlcvItem>,
}

#[derive(Debug, Deserialize)]
struct OhlcvItem {
    attributes: OhlcvAttrs,
}

#[derive(Debug, Deserialize)]
struct OhlcvAttrs {
    timestamp: Value,
    c: Option<Value>,
    v: Option<Value>,
}

impl PriceOracle {
    pub fn new(http: &HttpConfig, price: &PriceConfig) -> eyre::Result<Self> {
        let base = http.price_api_base_url.trim();
        if !base.starts_with("https://") && !is_loopback_http(base) {
            eyre::bail!("price_api_base_url must use https (or loopback for local testing)");
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build price http client")?;
        let ttl_secs = i64::try_from(price.cache_ttl_seconds).unwrap_or(i64::MAX);
        Ok(Self {
            http: client,
            base_url: base.trim_end_matches('/').to_owned(),
            network: http.price_api_network.clone(),
            ttl: ChronoDuration::seconds(ttl_secs),
            fallback_usd: price.fallback_usd.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cached_fresh(&self, key: &str) -> Option<PriceQuote> {
        let cache = self.cache_lock();
        let e = cache.get(key)?;
        if e.expires_at > Utc::now() {
            Some(e.quote.clone())
        } else {
            None
        }
    }

    fn cached_any(&self, key: &str) -> Option<PriceQuote> {
        self.cache_lock().get(key).map(|e| e.quote.clone())
    }

    /// Insert a fetched quote unless the cache already holds a fresher one.
    ///
    /// Guards against out-of-order async completions: a slow fetch that
    /// started earlier must not clobber the result of a later one. Returns
    /// whatever the cache holds afterwards.
    fn store_if_newer(&self, quote: PriceQuote) -> PriceQuote {
        let mut cache = self.cache_lock();
        match cache.get(&quote.symbol) {
            Some(e) if e.quote.observed_at > quote.observed_at => e.quote.clone(),
            _ => {
                let expires_at = quote.observed_at + self.ttl;
                cache.insert(
                    quote.symbol.clone(),
                    CacheEntry {
                        quote: quote.clone(),
                        expires_at,
                    },
                );
                quote
            }
        }
    }

    /// Current spot price, cache-first. `None` when the token has no oracle
    /// identifier or the API is unreachable and nothing is cached.
    pub async fn current_price(&self, table: &TokenTable, symbol: &str) -> Option<PriceQuote> {
        let key = symbol.trim().to_uppercase();
        if let Some(q) = self.cached_fresh(&key) {
            return Some(q);
        }

        let Some(id) = table.lookup(&key).and_then(|t| t.oracle_id) else {
            warn!(symbol = %key, "no oracle identifier for token");
            return self.cached_any(&key);
        };

        // Stamped before the request goes out, so completions can be ordered.
        let observed_at = Utc::now();
        match self.fetch_spot(&key, id).await {
            Ok(mut quote) => {
                quote.observed_at = observed_at;
                Some(self.store_if_newer(quote))
            }
            Err(e) => {
                warn!(symbol = %key, error = %e, "price fetch failed; serving stale cache if present");
                self.cached_any(&key)
            }
        }
    }

    /// Spot price in USD with the degrade-to-constant policy applied.
    pub async fn current_price_usd(
        &self,
        table: &TokenTable,
        symbol: &str,
    ) -> Option<(f64, PriceSource)> {
        if let Some(q) = self.current_price(table, symbol).await {
            return Some((q.usd, PriceSource::Oracle));
        }
        let key = symbol.trim().to_uppercase();
        self.fallback_usd
            .get(&key)
            .map(|v| (*v, PriceSource::Fallback))
    }

    async fn fetch_spot(&self, symbol: &str, id: &str) -> eyre::Result<PriceQuote> {
        let url = if id.starts_with("0x") {
            format!("{}/networks/{}/tokens/{id}", self.base_url, self.network)
        } else {
            format!("{}/simple/tokens/{id}", self.base_url)
        };
        let v: SpotResp = self
            .http
            .get(url)
            .send()
            .await
            .context("price request")?
            .error_for_status()
            .context("price status")?
            .json()
            .await
            .context("price json")?;

        let attrs = v.data.attributes;
        let native = match &attrs.price_eth {
            Some(_) => parse_price_field(attrs.price_eth.as_ref()),
            None => parse_price_field(attrs.price_native.as_ref()),
        };
        Ok(PriceQuote {
            symbol: symbol.to_owned(),
            usd: parse_price_field(attrs.price_usd.as_ref()),
            native,
            observed_at: Utc::now(),
        })
    }

    /// OHLCV-style history, oldest first. Empty on any failure.
    pub async fn price_history(
        &self,
        table: &TokenTable,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Vec<PricePoint> {
        let key = symbol.trim().to_uppercase();
        let Some(id) = table.lookup(&key).and_then(|t| t.oracle_id) else {
            warn!(symbol = %key, "no oracle identifier for token");
            return vec![];
        };

        let (gran, limit) = timeframe.granularity();
        let url = if id.starts_with("0x") {
            format!(
                "{}/networks/{}/tokens/{id}/ohlcv/{gran}?limit={limit}",
                self.base_url, self.network
            )
        } else {
            format!("{}/tokens/{id}/ohlcv/{gran}?limit={limit}", self.base_url)
        };

        match self.fetch_history(&url).await {
            Ok(mut points) => {
                points.sort_by_key(|p| p.timestamp_ms);
                points
            }
            Err(e) => {
                warn!(symbol = %key, error = %e, "history fetch failed");
                vec![]
            }
        }
    }

    async fn fetch_history(&self, url: &str) -> eyre::Result<Vec<PricePoint>> {
        let v: OhlcvResp = self
            .http
            .get(url)
            .send()
            .await
            .context("history request")?
            .error_for_status()
            .context("history status")?
            .json()
            .await
            .context("history json")?;

        Ok(v.data
            .into_iter()
            .filter_map(|item| {
                let ts = coerce_timestamp_ms(&item.attributes.timestamp)?;
                Some(PricePoint {
                    timestamp_ms: ts,
                    price: coerce_f64(item.attributes.c.as_ref()),
                    volume: coerce_f64(item.attributes.v.as_ref()),
                })
            })
            .collect())
    }
}
