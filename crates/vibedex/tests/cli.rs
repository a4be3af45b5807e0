use std::process::{Command, Output};

use eyre::Context as _;
use predicates::prelude::*;

const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

// Nothing listens here; any HTTP call fails immediately.
const DEAD_API: &str = "http://127.0.0.1:9";

struct TestDirs {
    cfg: tempfile::TempDir,
    data: tempfile::TempDir,
}

impl TestDirs {
    fn new() -> eyre::Result<Self> {
        Ok(Self {
            cfg: tempfile::tempdir()?,
            data: tempfile::tempdir()?,
        })
    }

    fn with_signer_key(self) -> eyre::Result<Self> {
        std::fs::write(self.cfg.path().join("signer.key"), TEST_KEY)?;
        Ok(self)
    }

    fn run(&self, args: &[&str]) -> eyre::Result<Output> {
        let exe = assert_cmd::cargo::cargo_bin!("vibedex");
        Command::new(exe)
            .env("VIBEDEX_CONFIG_DIR", self.cfg.path())
            .env("VIBEDEX_DATA_DIR", self.data.path())
            .env("VIBEDEX_PRICE_API_BASE_URL", DEAD_API)
            .env("VIBEDEX_RPC_URL", DEAD_API)
            .args(args)
            .output()
            .with_context(|| format!("run vibedex {args:?}"))
    }

    fn run_json(&self, args: &[&str]) -> eyre::Result<serde_json::Value> {
        let out = self.run(args)?;
        assert!(
            out.status.success(),
            "vibedex {args:?} exited non-zero: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        );
        serde_json::from_slice(&out.stdout).with_context(|| format!("parse output of {args:?}"))
    }
}

#[test]
fn paths_prints_resolved_dirs_as_json() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    let v = dirs.run_json(&["paths"])?;
    assert!(v.get("config_dir").and_then(|x| x.as_str()).is_some());
    assert!(v.get("data_dir").and_then(|x| x.as_str()).is_some());
    assert!(v.get("log_file").and_then(|x| x.as_str()).is_some());
    Ok(())
}

#[test]
fn doctor_json_runs_and_returns_valid_json() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    let v = dirs.run_json(&["doctor", "--json"])?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert!(v.get("version").and_then(|x| x.as_str()).is_some());
    assert!(v.get("paths").and_then(|x| x.as_object()).is_some());
    assert_eq!(
        v.pointer("/tokens/count").and_then(serde_json::Value::as_u64),
        Some(5)
    );
    Ok(())
}

#[test]
fn tokens_lists_the_fixed_table() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    let v = dirs.run_json(&["tokens"])?;
    let symbols: Vec<&str> = v["tokens"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|t| t.get("symbol").and_then(|s| s.as_str()))
                .collect()
        })
        .unwrap_or_default();
    assert!(symbols.contains(&"ETH"));
    assert!(symbols.contains(&"BRETT"));
    assert!(v.get("router").and_then(|x| x.as_str()).is_some());
    Ok(())
}

#[test]
fn quote_with_invalid_amount_is_zero_not_an_error() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    for bad in ["abc", "0", "-1"] {
        let v = dirs.run_json(&["quote", bad, "ETH", "BRETT"])?;
        assert_eq!(
            v.get("amount_out_base").and_then(|x| x.as_str()),
            Some("0"),
            "amount {bad:?} must quote as zero"
        );
    }
    Ok(())
}

#[test]
fn swap_without_a_wallet_reports_not_connected() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    let v = dirs.run_json(&["swap", "1", "ETH", "BRETT"])?;
    assert_eq!(v.get("succeeded").and_then(serde_json::Value::as_bool), Some(false));
    assert_eq!(
        v.get("error_code").and_then(|x| x.as_str()),
        Some("wallet_not_connected")
    );
    Ok(())
}

#[test]
fn swap_rejects_invalid_amounts_before_any_network_call() -> eyre::Result<()> {
    let dirs = TestDirs::new()?.with_signer_key()?;
    let _session = dirs.run_json(&["connect"])?;
    for bad in ["abc", "0", "-5", "1,5"] {
        // `--` keeps clap from eating the leading dash on "-5".
        let v = dirs.run_json(&["swap", "--slippage-bps", "50", "--", bad, "ETH", "BRETT"])?;
        assert_eq!(
            v.get("succeeded").and_then(serde_json::Value::as_bool),
            Some(false)
        );
        assert_eq!(
            v.get("error_code").and_then(|x| x.as_str()),
            Some("invalid_amount"),
            "amount {bad:?} must be rejected as invalid"
        );
    }
    Ok(())
}

#[test]
fn connect_disconnect_reconnect_round_trip() -> eyre::Result<()> {
    let dirs = TestDirs::new()?.with_signer_key()?;

    let out = dirs.run(&["connect"])?;
    assert!(out.status.success());
    let first: serde_json::Value = serde_json::from_slice(&out.stdout)?;
    let address = first["address"]
        .as_str()
        .ok_or_else(|| eyre::eyre!("connect printed no address"))?
        .to_owned();
    assert_eq!(first.get("has_signer").and_then(serde_json::Value::as_bool), Some(true));
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(predicate::str::contains("wallet connected").eval(&stderr));

    let status = dirs.run_json(&["status"])?;
    assert_eq!(status.get("connected").and_then(serde_json::Value::as_bool), Some(true));

    let _gone = dirs.run_json(&["disconnect"])?;
    let status = dirs.run_json(&["status"])?;
    assert_eq!(status.get("connected").and_then(serde_json::Value::as_bool), Some(false));

    // Repeating disconnect is a no-op, not a failure.
    let again = dirs.run_json(&["disconnect"])?;
    assert_eq!(again.get("disconnected").and_then(serde_json::Value::as_bool), Some(true));

    let second = dirs.run_json(&["connect"])?;
    assert_eq!(second.get("address").and_then(|x| x.as_str()), Some(address.as_str()));
    assert_eq!(second.get("has_signer").and_then(serde_json::Value::as_bool), Some(true));
    Ok(())
}

#[test]
fn price_degrades_to_the_fallback_constant() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    let v = dirs.run_json(&["price", "BRETT"])?;
    assert_eq!(v.get("source").and_then(|x| x.as_str()), Some("fallback"));
    let usd = v
        .get("usd")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| eyre::eyre!("price printed no usd"))?;
    assert!((usd - 0.32).abs() < 1e-9);
    Ok(())
}

#[test]
fn price_for_an_untracked_symbol_fails_typed() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    let out = dirs.run(&["price", "DOGE"])?;
    assert!(!out.status.success(), "no oracle id and no fallback: must fail");
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    assert!(predicate::str::contains("price_unavailable").eval(&stderr));
    Ok(())
}

#[test]
fn history_is_an_empty_series_when_the_api_is_unreachable() -> eyre::Result<()> {
    let dirs = TestDirs::new()?;
    let v = dirs.run_json(&["history", "BRETT", "--timeframe", "extended"])?;
    assert_eq!(v.get("timeframe").and_then(|x| x.as_str()), Some("extended"));
    assert_eq!(v["points"].as_array().map(Vec::len), Some(0));
    Ok(())
}
