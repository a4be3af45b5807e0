#![recursion_limit = "256"]

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use tracing::warn;
use tracing_subscriber::prelude::*;

mod amount;
mod chains;
mod cli_output;
mod config;
mod doctor;
mod errors;
mod pairing;
mod paths;
mod price;
mod retry;
mod session;
mod store;
mod swap;
mod tokens;

use chains::evm::EvmChain;
use session::SessionManager;
use swap::RouterAdapter;
use tokens::TokenTable;

#[derive(Parser, Debug)]
#[command(name = "vibedex", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliTimeframe {
    Recent,
    Medium,
    Extended,
}

impl From<CliTimeframe> for price::Timeframe {
    fn from(v: CliTimeframe) -> Self {
        match v {
            CliTimeframe::Recent => Self::Recent,
            CliTimeframe::Medium => Self::Medium,
            CliTimeframe::Extended => Self::Extended,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect a wallet (local signer key if present, remote pairing otherwise).
    Connect,

    /// Tear down the session and forget the persisted address. Safe to repeat.
    Disconnect,

    /// Show the current session, restoring it from disk when possible.
    Status,

    /// Ask the connected wallet to switch networks (adding it first if unknown).
    EnsureNetwork {
        /// Target chain id; defaults to the configured chain.
        #[arg(long)]
        chain_id: Option<u64>,
    },

    /// List the tradeable token table.
    Tokens,

    /// Show a token balance for the connected address.
    Balance { symbol: String },

    /// Spot price in USD (live when the oracle answers, fallback constant otherwise).
    Price { symbol: String },

    /// OHLCV-style price history, oldest first.
    History {
        symbol: String,
        #[arg(long, value_enum, default_value_t = CliTimeframe::Recent)]
        timeframe: CliTimeframe,
    },

    /// Quote the router output for a prospective swap.
    Quote {
        #[arg(allow_hyphen_values = true)]
        amount: String,
        from: String,
        to: String,
    },

    /// Execute a swap through the router.
    Swap {
        amount: String,
        from: String,
        to: String,
        /// Slippage tolerance in basis points (50 = 0.5%).
        #[arg(long)]
        slippage_bps: Option<u32>,
    },

    /// Print resolved paths (useful for debugging).
    Paths,

    /// Print a quick self-diagnostic report (safe to paste; contains no secrets).
    Doctor {
        /// Emit JSON to stdout (machine-readable).
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(paths: &paths::VibePaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("vibedex.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn print_json(v: &serde_json::Value) -> eyre::Result<()> {
    use std::io::Write as _;
    let s = serde_json::to_string_pretty(v).context("serialize result")?;
    writeln!(std::io::stdout().lock(), "{s}").context("write result")
}

fn with_code(e: errors::VibeError) -> eyre::Report {
    eyre::eyre!("{e} ({})", e.code())
}

async fn cmd_connect(cfg: config::VibeConfig, paths: &paths::VibePaths) -> eyre::Result<()> {
    let manager = SessionManager::new(cfg, paths)?;
    let mut events = manager.subscribe();
    let s = manager.connect().await.map_err(with_code)?;
    // The user-visible notice is driven by the session event, not the
    // return value.
    while let Ok(ev) = events.try_recv() {
        if let session::SessionEvent::Connected(snap) = ev {
            cli_output::notify_connected(&format!("{:#x}", snap.address));
        }
    }
    print_json(&serde_json::json!({
      "address": format!("{:#x}", s.address),
      "chain_id": s.chain_id,
      "has_signer": s.has_signer,
    }))
}

async fn cmd_disconnect(cfg: config::VibeConfig, paths: &paths::VibePaths) -> eyre::Result<()> {
    let manager = SessionManager::new(cfg, paths)?;
    let mut events = manager.subscribe();
    manager.disconnect().await?;
    // One notice per actual teardown; repeating the command stays silent.
    while let Ok(ev) = events.try_recv() {
        if ev == session::SessionEvent::Disconnected {
            cli_output::notify_disconnected();
        }
    }
    print_json(&serde_json::json!({ "disconnected": true }))
}

async fn cmd_status(cfg: config::VibeConfig, paths: &paths::VibePaths) -> eyre::Result<()> {
    let manager = SessionManager::new(cfg, paths)?;
    match manager.restore().await? {
        Some(s) => print_json(&serde_json::json!({
          "connected": true,
          "address": format!("{:#x}", s.address),
          "chain_id": s.chain_id,
          "has_signer": s.has_signer,
        })),
        None => print_json(&serde_json::json!({ "connected": false })),
    }
}

async fn cmd_ensure_network(
    cfg: config::VibeConfig,
    paths: &paths::VibePaths,
    chain_id: Option<u64>,
) -> eyre::Result<()> {
    let target = chain_id.unwrap_or(cfg.rpc.chain_id);
    let manager = SessionManager::new(cfg, paths)?;
    if manager.restore().await?.is_none() {
        return Err(with_code(errors::VibeError::WalletNotConnected));
    }
    manager.ensure_network(target).await.map_err(with_code)?;
    print_json(&serde_json::json!({ "chain_id": target, "switched": true }))
}

fn cmd_tokens() -> eyre::Result<()> {
    let table = TokenTable::base_mainnet()?;
    let list: Vec<_> = table
        .all()
        .iter()
        .map(|t| {
            serde_json::json!({
              "symbol": t.symbol,
              "name": t.display_name,
              "address": format!("{:#x}", t.address),
              "native": t.native,
            })
        })
        .collect();
    print_json(&serde_json::json!({
      "router": format!("{:#x}", table.router),
      "tokens": list,
    }))
}

async fn cmd_balance(
    cfg: config::VibeConfig,
    paths: &paths::VibePaths,
    symbol: &str,
) -> eyre::Result<()> {
    let chain = EvmChain::from_config(&cfg.rpc);
    let table = TokenTable::base_mainnet()?;
    let manager = SessionManager::new(cfg, paths)?;
    let Some(s) = manager.restore().await? else {
        return Err(with_code(errors::VibeError::WalletNotConnected));
    };
    let t = table
        .lookup(symbol)
        .ok_or_else(|| eyre::eyre!("unrecognized token: {symbol}"))?;

    let balance = if t.native {
        let wei = chain.get_native_balance(s.address).await?;
        amount::format_base_to_decimal(wei, 18)
    } else {
        match chain.get_erc20_balance(t.address, s.address).await {
            Ok((base, decimals)) => amount::format_base_to_decimal(base, decimals),
            Err(e) => {
                warn!(error = %e, "balance lookup failed");
                "0".to_owned()
            }
        }
    };
    print_json(&serde_json::json!({
      "symbol": t.symbol,
      "address": format!("{:#x}", s.address),
      "balance": balance,
    }))
}

async fn cmd_price(cfg: &config::VibeConfig, symbol: &str) -> eyre::Result<()> {
    let table = TokenTable::base_mainnet()?;
    let oracle = price::PriceOracle::new(&cfg.http, &cfg.price)?;
    match oracle.current_price_usd(&table, symbol).await {
        Some((usd, source)) => print_json(&serde_json::json!({
          "symbol": symbol.trim().to_uppercase(),
          "usd": usd,
          "source": source.as_str(),
        })),
        None => Err(with_code(errors::VibeError::PriceUnavailable(
            symbol.trim().to_uppercase(),
        ))),
    }
}

async fn cmd_history(
    cfg: &config::VibeConfig,
    symbol: &str,
    timeframe: CliTimeframe,
) -> eyre::Result<()> {
    let table = TokenTable::base_mainnet()?;
    let oracle = price::PriceOracle::new(&cfg.http, &cfg.price)?;
    let tf: price::Timeframe = timeframe.into();
    let points: Vec<_> = oracle
        .price_history(&table, symbol, tf)
        .await
        .into_iter()
        .map(|p| {
            serde_json::json!({
              "timestamp_ms": p.timestamp_ms,
              "price": p.price,
              "volume": p.volume,
            })
        })
        .collect();
    print_json(&serde_json::json!({
      "symbol": symbol.trim().to_uppercase(),
      "timeframe": tf.as_str(),
      "points": points,
    }))
}

async fn cmd_quote(
    cfg: &config::VibeConfig,
    amount: &str,
    from: &str,
    to: &str,
) -> eyre::Result<()> {
    let chain = EvmChain::from_config(&cfg.rpc);
    let adapter = RouterAdapter::new(TokenTable::base_mainnet()?, cfg.swap.clone());
    let (out, formatted) = adapter.quote_decimal(&chain, amount, from, to).await?;
    print_json(&serde_json::json!({
      "amount_in": amount,
      "from": from,
      "to": to,
      "amount_out_base": out.to_string(),
      "amount_out": formatted,
    }))
}

async fn cmd_swap(
    cfg: config::VibeConfig,
    paths: &paths::VibePaths,
    amount: String,
    from: String,
    to: String,
    slippage_bps: Option<u32>,
) -> eyre::Result<()> {
    let chain = EvmChain::from_config(&cfg.rpc);
    let adapter = RouterAdapter::new(TokenTable::base_mainnet()?, cfg.swap.clone());
    let slippage = slippage_bps.unwrap_or(cfg.swap.default_slippage_bps);

    let manager = SessionManager::new(cfg, paths)?;
    let _restored = manager.restore().await?;

    let req = swap::SwapRequest {
        from_token: from,
        to_token: to,
        amount_in: amount,
        slippage_bps: slippage,
    };
    let result = adapter.swap(&chain, &manager, &req).await;
    print_json(&serde_json::to_value(&result).context("serialize swap result")?)
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let paths = paths::VibePaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);

    let cfg = store::ConfigStore::new(&paths).load_or_init_default()?;

    match cli.cmd {
        Command::Connect => cmd_connect(cfg, &paths).await,
        Command::Disconnect => cmd_disconnect(cfg, &paths).await,
        Command::Status => cmd_status(cfg, &paths).await,
        Command::EnsureNetwork { chain_id } => cmd_ensure_network(cfg, &paths, chain_id).await,
        Command::Tokens => cmd_tokens(),
        Command::Balance { symbol } => cmd_balance(cfg, &paths, &symbol).await,
        Command::Price { symbol } => cmd_price(&cfg, &symbol).await,
        Command::History { symbol, timeframe } => cmd_history(&cfg, &symbol, timeframe).await,
        Command::Quote { amount, from, to } => cmd_quote(&cfg, &amount, &from, &to).await,
        Command::Swap {
            amount,
            from,
            to,
            slippage_bps,
        } => cmd_swap(cfg, &paths, amount, from, to, slippage_bps).await,
        Command::Paths => {
            use std::io::Write as _;
            let s = serde_json::to_string(&serde_json::json!({
              "config_dir": paths.config_dir,
              "data_dir": paths.data_dir,
              "log_file": paths.log_file,
            }))
            .context("serialize paths")?;
            writeln!(std::io::stdout().lock(), "{s}").context("write paths")?;
            Ok(())
        }
        Command::Doctor { json } => doctor::run(json).context("doctor failed"),
    }
}
