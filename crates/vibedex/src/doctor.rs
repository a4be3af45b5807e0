use crate::{config::VibeConfig, paths::VibePaths, store::SessionStore, tokens::TokenTable};
use eyre::Context as _;
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
};

fn config_toml_path(paths: &VibePaths) -> PathBuf {
    paths.config_dir.join("config.toml")
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

fn try_parse_config(path: &Path) -> eyre::Result<VibeConfig> {
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: VibeConfig = toml::from_str(&s).context("parse config.toml")?;
    Ok(cfg)
}

struct PathsReport {
    config_dir: PathBuf,
    data_dir: PathBuf,
    log_file: PathBuf,
}

struct ConfigReport {
    path: PathBuf,
    exists: bool,
    parse_ok: bool,
    error: Option<String>,
    chain_id: Option<u64>,
    rpc_url: Option<String>,
    fallback_rpc_count: usize,
    pairing_configured: Option<bool>,
}

struct TokensReport {
    count: usize,
    symbols: Vec<String>,
    router: Option<String>,
}

struct SignerReport {
    key_file: PathBuf,
    key_file_exists: bool,
    env_key_set: bool,
}

struct SessionReport {
    path: PathBuf,
    persisted: bool,
    address: Option<String>,
    provider: Option<String>,
    chain_id: Option<u64>,
}

struct DoctorReport {
    version: &'static str,
    paths: PathsReport,
    config: ConfigReport,
    tokens: TokensReport,
    signer: SignerReport,
    session: SessionReport,
    env: serde_json::Value,
}

fn collect(paths: &VibePaths) -> DoctorReport {
    let config_path = config_toml_path(paths);
    let config_exists = config_path.exists();
    let (config_ok, config_err, cfg) = if config_exists {
        match try_parse_config(&config_path) {
            Ok(cfg) => (true, None, Some(cfg)),
            Err(e) => (false, Some(format!("{e:#}")), None),
        }
    } else {
        (false, None, None)
    };

    let tokens = match TokenTable::base_mainnet() {
        Ok(table) => TokensReport {
            count: table.all().len(),
            symbols: table.all().iter().map(|t| t.symbol.to_owned()).collect(),
            router: Some(format!("{:#x}", table.router)),
        },
        Err(_) => TokensReport {
            count: 0,
            symbols: vec![],
            router: None,
        },
    };

    let key_file = paths.signer_key_file();
    let signer = SignerReport {
        key_file_exists: key_file.exists(),
        key_file,
        env_key_set: env_opt("VIBEDEX_SIGNER_KEY").is_some(),
    };

    let session_store = SessionStore::new(paths);
    let persisted = session_store.load().ok().flatten();
    let session = SessionReport {
        path: paths.session_file(),
        persisted: session_store.exists(),
        address: persisted.as_ref().map(|p| p.address.clone()),
        provider: persisted
            .as_ref()
            .map(|p| format!("{:?}", p.provider).to_lowercase()),
        chain_id: persisted.as_ref().map(|p| p.chain_id),
    };

    let env = json!({
      "VIBEDEX_CONFIG_DIR": env_opt("VIBEDEX_CONFIG_DIR"),
      "VIBEDEX_DATA_DIR": env_opt("VIBEDEX_DATA_DIR"),
      "VIBEDEX_RPC_URL": env_opt("VIBEDEX_RPC_URL"),
      "VIBEDEX_PRICE_API_BASE_URL": env_opt("VIBEDEX_PRICE_API_BASE_URL"),
      "VIBEDEX_SIGNER_KEY_set": std::env::var("VIBEDEX_SIGNER_KEY").is_ok(),
    });

    DoctorReport {
        version: env!("CARGO_PKG_VERSION"),
        paths: PathsReport {
            config_dir: paths.config_dir.clone(),
            data_dir: paths.data_dir.clone(),
            log_file: paths.log_file.clone(),
        },
        config: ConfigReport {
            path: config_path,
            exists: config_exists,
            parse_ok: config_ok,
            error: config_err,
            chain_id: cfg.as_ref().map(|c| c.rpc.chain_id),
            rpc_url: cfg.as_ref().map(|c| c.rpc.rpc_url.clone()),
            fallback_rpc_count: cfg.as_ref().map_or(0, |c| c.rpc.fallback_rpc_urls.len()),
            pairing_configured: cfg.as_ref().map(|c| {
                c.http
                    .pairing_base_url
                    .as_ref()
                    .is_some_and(|u| !u.trim().is_empty())
            }),
        },
        tokens,
        signer,
        session,
        env,
    }
}

fn print_json(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(&json!({
      "ok": true,
      "version": r.version,
      "paths": {
        "config_dir": r.paths.config_dir,
        "data_dir": r.paths.data_dir,
        "log_file": r.paths.log_file,
      },
      "config": {
        "path": r.config.path,
        "exists": r.config.exists,
        "parse_ok": r.config.parse_ok,
        "error": r.config.error,
        "chain_id": r.config.chain_id,
        "rpc_url": r.config.rpc_url,
        "fallback_rpc_count": r.config.fallback_rpc_count,
        "pairing_configured": r.config.pairing_configured,
      },
      "tokens": {
        "count": r.tokens.count,
        "symbols": r.tokens.symbols,
        "router": r.tokens.router,
      },
      "signer": {
        "key_file": r.signer.key_file,
        "key_file_exists": r.signer.key_file_exists,
        "env_key_set": r.signer.env_key_set,
      },
      "session": {
        "path": r.session.path,
        "persisted": r.session.persisted,
        "address": r.session.address,
        "provider": r.session.provider,
        "chain_id": r.session.chain_id,
      },
      "env": r.env,
      "hints": [
        "If connect fails with no_provider_available, put a hex signer key at the signer.key path above or set http.pairing_base_url in config.toml.",
        "Prices fall back to the constants in [price.fallback_usd] whenever the oracle is unreachable.",
      ]
    }))
    .context("serialize doctor json")?;
    writeln!(out, "{s}").context("write doctor json")?;
    Ok(())
}

fn print_human(out: &mut impl std::io::Write, r: &DoctorReport) -> eyre::Result<()> {
    writeln!(out, "VibeDex doctor (v{})", r.version).context("write header")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Paths:").context("write paths header")?;
    writeln!(out, "  config_dir: {}", r.paths.config_dir.display()).context("write paths")?;
    writeln!(out, "  data_dir:   {}", r.paths.data_dir.display()).context("write paths")?;
    writeln!(out, "  log_file:   {}", r.paths.log_file.display()).context("write paths")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Config:").context("write config header")?;
    writeln!(out, "  config.toml: {}", r.config.path.display()).context("write config")?;
    if !r.config.exists {
        writeln!(out, "  status: missing (will be created on first run)")
            .context("write config")?;
    } else if r.config.parse_ok {
        writeln!(
            out,
            "  status: ok (chain_id: {:?}, fallback rpcs: {})",
            r.config.chain_id, r.config.fallback_rpc_count
        )
        .context("write config")?;
        writeln!(
            out,
            "  pairing_configured: {:?}",
            r.config.pairing_configured
        )
        .context("write config")?;
    } else {
        writeln!(out, "  status: parse failed").context("write config")?;
        if let Some(e) = &r.config.error {
            let first = e.lines().next().unwrap_or("parse error");
            writeln!(out, "  error: {first}").context("write config")?;
        }
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Tokens:").context("write tokens header")?;
    writeln!(out, "  count: {}", r.tokens.count).context("write tokens")?;
    writeln!(out, "  symbols: {}", r.tokens.symbols.join(", ")).context("write tokens")?;
    if let Some(router) = &r.tokens.router {
        writeln!(out, "  router: {router}").context("write tokens")?;
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Signer:").context("write signer header")?;
    writeln!(out, "  key_file: {}", r.signer.key_file.display()).context("write signer")?;
    writeln!(out, "  key_file_exists: {}", r.signer.key_file_exists).context("write signer")?;
    writeln!(out, "  env_key_set: {}", r.signer.env_key_set).context("write signer")?;
    writeln!(out).context("write newline")?;

    writeln!(out, "Session:").context("write session header")?;
    writeln!(out, "  session.json: {}", r.session.path.display()).context("write session")?;
    writeln!(out, "  persisted: {}", r.session.persisted).context("write session")?;
    if let Some(addr) = &r.session.address {
        writeln!(out, "  address: {addr}").context("write session")?;
    }
    if let Some(provider) = &r.session.provider {
        writeln!(out, "  provider: {provider}").context("write session")?;
    }
    writeln!(out).context("write newline")?;

    writeln!(out, "Env (redacted):").context("write env header")?;
    writeln!(
        out,
        "  VIBEDEX_CONFIG_DIR: {:?}",
        r.env.get("VIBEDEX_CONFIG_DIR").and_then(|v| v.as_str())
    )
    .context("write env")?;
    writeln!(
        out,
        "  VIBEDEX_DATA_DIR:   {:?}",
        r.env.get("VIBEDEX_DATA_DIR").and_then(|v| v.as_str())
    )
    .context("write env")?;
    writeln!(
        out,
        "  VIBEDEX_SIGNER_KEY_set: {}",
        r.env
            .get("VIBEDEX_SIGNER_KEY_set")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    )
    .context("write env")?;
    Ok(())
}

pub fn run(as_json: bool) -> eyre::Result<()> {
    let paths = VibePaths::discover()?;
    let report = collect(&paths);
    let mut out = std::io::stdout().lock();
    if as_json {
        print_json(&mut out, &report)?;
    } else {
        print_human(&mut out, &report)?;
    }
    Ok(())
}
