use crate::{config::VibeConfig, paths::VibePaths};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

/// Apply environment variable overrides (deploy-time knobs).
fn apply_env_overrides(cfg: &mut VibeConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("VIBEDEX_RPC_URL", |v| {
        v.clone_into(&mut cfg.rpc.rpc_url);
    });
    apply_env("VIBEDEX_PRICE_API_BASE_URL", |v| {
        v.clone_into(&mut cfg.http.price_api_base_url);
    });
    apply_env("VIBEDEX_PAIRING_BASE_URL", |v| {
        cfg.http.pairing_base_url = Some(v.to_owned());
    });
    apply_env("VIBEDEX_PAIRING_PROJECT_ID", |v| {
        cfg.http.pairing_project_id = Some(v.to_owned());
    });
}

impl ConfigStore {
    pub fn new(paths: &VibePaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<VibeConfig> {
        let mut cfg = if self.path.exists() {
            let raw = fs::read_to_string(&self.path)
                .with_context(|| format!("read {}", self.path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parse {}", self.path.display()))?
        } else {
            let cfg = VibeConfig::default();
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            let raw = toml::to_string_pretty(&cfg).context("serialize default config")?;
            fs::write(&self.path, raw)
                .with_context(|| format!("write {}", self.path.display()))?;
            cfg
        };
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }
}

/// Snapshot of the last-connected session, used for silent reconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedSession {
    pub address: String,
    pub chain_id: u64,
    pub provider: PersistedProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_topic: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistedProvider {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(paths: &VibePaths) -> Self {
        Self {
            path: paths.session_file(),
        }
    }

    pub fn load(&self) -> eyre::Result<Option<PersistedSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let s = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(s))
    }

    pub fn save(&self, session: &PersistedSession) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(session).context("serialize session")?;
        fs::write(&self.path, raw).with_context(|| format!("write {}", self.path.display()))
    }

    /// Remove the persisted snapshot. Missing file is fine.
    pub fn clear(&self) -> eyre::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(eyre::Report::new(e).wrap_err("clear persisted session")),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths(dir: &std::path::Path) -> VibePaths {
        VibePaths {
            config_dir: dir.join("config"),
            data_dir: dir.join("data"),
            log_file: dir.join("data").join("vibedex.log.jsonl"),
        }
    }

    #[test]
    fn init_writes_default_config_then_reloads_it() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = temp_paths(dir.path());
        let store = ConfigStore::new(&paths);

        let first = store.load_or_init_default()?;
        assert!(paths.config_dir.join("config.toml").exists());
        let second = store.load_or_init_default()?;
        assert_eq!(first.rpc.chain_id, second.rpc.chain_id);
        Ok(())
    }

    #[test]
    fn session_round_trip_and_clear() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = temp_paths(dir.path());
        let store = SessionStore::new(&paths);

        assert_eq!(store.load()?, None);

        let s = PersistedSession {
            address: "0x0000000000000000000000000000000000000001".into(),
            chain_id: 8453,
            provider: PersistedProvider::Local,
            pairing_topic: None,
        };
        store.save(&s)?;
        assert_eq!(store.load()?, Some(s));

        store.clear()?;
        assert_eq!(store.load()?, None);
        // Clearing twice is a no-op.
        store.clear()?;
        Ok(())
    }
}
