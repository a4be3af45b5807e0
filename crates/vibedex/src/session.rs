//! Wallet session manager: at most one live wallet connection per process,
//! with a typed broadcast channel announcing every state transition.
//!
//! Two provider paths exist. A local signer key (env var or key file) gives
//! a fully local session; otherwise the remote pairing bridge is used and
//! the human approves everything in their own wallet. Connect attempts carry
//! a generation token so a completion that arrives after `disconnect` (or a
//! newer `connect`) is discarded instead of resurrecting a dead session.

use crate::{
    chains::evm::EvmChain,
    cli_output,
    config::VibeConfig,
    errors::VibeError,
    pairing::{PairingClient, PairingError},
    paths::VibePaths,
    store::{PersistedProvider, PersistedSession, SessionStore},
};
use alloy::{
    primitives::{Address, B256},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use eyre::Context as _;
use std::{
    path::PathBuf,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use zeroize::Zeroizing;

const PAIRING_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Snapshot of the live connection. Valid until the next session event;
/// consumers re-fetch rather than caching across suspension points.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WalletSession {
    pub address: Address,
    pub chain_id: u64,
    pub has_signer: bool,
}

/// One event per state transition; payloads are snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected(WalletSession),
    Disconnected,
    ChainChanged(u64),
    AccountsChanged(Address),
}

#[derive(Clone)]
enum ProviderHandle {
    Local(PrivateKeySigner),
    Remote { topic: String },
}

#[derive(Default)]
struct State {
    session: Option<WalletSession>,
    provider: Option<ProviderHandle>,
    generation: u64,
}

pub struct SessionManager {
    cfg: VibeConfig,
    store: SessionStore,
    signer_key_file: PathBuf,
    pairing: Option<PairingClient>,
    events: broadcast::Sender<SessionEvent>,
    state: Mutex<State>,
}

fn parse_signer_key(s: &str) -> eyre::Result<PrivateKeySigner> {
    let hexs = s.strip_prefix("0x").unwrap_or(s);
    hexs.parse::<PrivateKeySigner>()
        .map_err(|e| eyre::eyre!("invalid signer key: {e}"))
}

fn map_switch_err(e: &PairingError) -> VibeError {
    if e.is_rejection() {
        VibeError::NetworkSwitchRejected
    } else {
        VibeError::Unknown(e.to_string())
    }
}

impl SessionManager {
    pub fn new(cfg: VibeConfig, paths: &VibePaths) -> eyre::Result<Self> {
        let pairing = PairingClient::from_config(&cfg.http)?;
        let (events, _) = broadcast::channel(32);
        Ok(Self {
            cfg,
            store: SessionStore::new(paths),
            signer_key_file: paths.signer_key_file(),
            pairing,
            events,
            state: Mutex::new(State::default()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn current(&self) -> Option<WalletSession> {
        self.state().session.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, ev: SessionEvent) {
        let _receivers = self.events.send(ev);
    }

    /// Start a connect attempt; the returned token must still be current at
    /// commit time or the attempt is discarded.
    fn begin_attempt(&self) -> u64 {
        let mut st = self.state();
        st.generation += 1;
        st.generation
    }

    fn commit_connect(
        &self,
        token: u64,
        session: WalletSession,
        provider: ProviderHandle,
    ) -> Result<(), VibeError> {
        let mut st = self.state();
        if st.generation != token {
            return Err(VibeError::ConnectionSuperseded);
        }
        st.session = Some(session);
        st.provider = Some(provider);
        Ok(())
    }

    fn persist(&self, session: &WalletSession, provider: PersistedProvider, topic: Option<String>) {
        let snapshot = PersistedSession {
            address: format!("{:#x}", session.address),
            chain_id: session.chain_id,
            provider,
            pairing_topic: topic,
        };
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "failed to persist session");
        }
    }

    fn discover_local_signer(&self) -> eyre::Result<Option<PrivateKeySigner>> {
        if let Ok(raw) = std::env::var("VIBEDEX_SIGNER_KEY") {
            let raw = Zeroizing::new(raw);
            if !raw.trim().is_empty() {
                return parse_signer_key(raw.trim()).map(Some);
            }
        }
        if self.signer_key_file.exists() {
            let raw = Zeroizing::new(
                std::fs::read_to_string(&self.signer_key_file)
                    .with_context(|| format!("read {}", self.signer_key_file.display()))?,
            );
            return parse_signer_key(raw.trim()).map(Some);
        }
        Ok(None)
    }

    /// Establish a session: local signer when one is discoverable, remote
    /// pairing otherwise. Emits exactly one `Connected` event on success.
    pub async fn connect(&self) -> Result<WalletSession, VibeError> {
        let token = self.begin_attempt();

        if let Some(signer) = self
            .discover_local_signer()
            .map_err(|e| VibeError::Unknown(format!("{e:#}")))?
        {
            let session = WalletSession {
                address: signer.address(),
                chain_id: self.cfg.rpc.chain_id,
                has_signer: true,
            };
            self.commit_connect(token, session.clone(), ProviderHandle::Local(signer))?;
            self.persist(&session, PersistedProvider::Local, None);
            self.emit(SessionEvent::Connected(session.clone()));
            return Ok(session);
        }

        let Some(pairing) = self.pairing.clone() else {
            return Err(VibeError::NoProviderAvailable);
        };

        let pending = pairing
            .open()
            .await
            .map_err(|e| VibeError::Unknown(e.to_string()))?;
        cli_output::show_pairing_uri(&pending.uri);

        let approved = pairing
            .wait_for_approval(&pending.topic, PAIRING_APPROVAL_TIMEOUT)
            .await
            .map_err(|e| {
                if e.is_rejection() {
                    VibeError::UserRejected
                } else {
                    VibeError::Unknown(e.to_string())
                }
            })?;

        let mut session = WalletSession {
            address: approved.address,
            chain_id: approved.chain_id,
            has_signer: true,
        };
        if let Err(err) = self.commit_connect(
            token,
            session.clone(),
            ProviderHandle::Remote {
                topic: pending.topic.clone(),
            },
        ) {
            // The attempt was superseded; drop the orphaned topic.
            let _discard = pairing.disconnect(&pending.topic).await;
            return Err(err);
        }
        self.persist(
            &session,
            PersistedProvider::Remote,
            Some(pending.topic.clone()),
        );
        self.emit(SessionEvent::Connected(session.clone()));

        // The swap surface lives on one chain; nudge the wallet over to it.
        if session.chain_id != self.cfg.rpc.chain_id {
            match self.ensure_network(self.cfg.rpc.chain_id).await {
                Ok(()) => session.chain_id = self.cfg.rpc.chain_id,
                Err(e) => warn!(error = %e, "wallet stayed on a different network"),
            }
        }
        Ok(session)
    }

    /// Tear down the session and forget the persisted address. Idempotent:
    /// with nothing to tear down this is a no-op and emits nothing.
    pub async fn disconnect(&self) -> eyre::Result<()> {
        let (had_live, live_topic) = {
            let mut st = self.state();
            // Supersede any in-flight connect attempt.
            st.generation += 1;
            let had = st.session.take().is_some();
            let topic = match st.provider.take() {
                Some(ProviderHandle::Remote { topic }) => Some(topic),
                _ => None,
            };
            (had, topic)
        };

        let mut had_persisted = false;
        let mut persisted_topic = None;
        if !had_live {
            if let Ok(Some(p)) = self.store.load() {
                had_persisted = true;
                persisted_topic = p.pairing_topic;
            }
        }

        if let (Some(pairing), Some(topic)) = (&self.pairing, live_topic.or(persisted_topic)) {
            if let Err(e) = pairing.disconnect(&topic).await {
                debug!(error = %e, "pairing teardown failed");
            }
        }
        self.store.clear()?;

        if had_live || had_persisted {
            self.emit(SessionEvent::Disconnected);
        }
        Ok(())
    }

    /// Silent reconnect from persisted state. Failure clears the stale
    /// snapshot and reports nothing to the user.
    pub async fn restore(&self) -> eyre::Result<Option<WalletSession>> {
        let persisted = match self.store.load() {
            Ok(Some(p)) => p,
            Ok(None) => return Ok(None),
            Err(e) => {
                debug!(error = %e, "persisted session unreadable; clearing");
                self.store.clear()?;
                return Ok(None);
            }
        };

        let token = self.begin_attempt();
        match persisted.provider {
            PersistedProvider::Local => match self.discover_local_signer() {
                Ok(Some(signer))
                    if persisted
                        .address
                        .eq_ignore_ascii_case(&format!("{:#x}", signer.address())) =>
                {
                    let session = WalletSession {
                        address: signer.address(),
                        chain_id: persisted.chain_id,
                        has_signer: true,
                    };
                    if self
                        .commit_connect(token, session.clone(), ProviderHandle::Local(signer))
                        .is_err()
                    {
                        return Ok(None);
                    }
                    self.emit(SessionEvent::Connected(session.clone()));
                    Ok(Some(session))
                }
                _ => {
                    debug!("persisted local session no longer matches a signer; clearing");
                    self.store.clear()?;
                    Ok(None)
                }
            },
            PersistedProvider::Remote => {
                let (Some(pairing), Some(topic)) = (&self.pairing, persisted.pairing_topic.clone())
                else {
                    self.store.clear()?;
                    return Ok(None);
                };
                match pairing.status(&topic).await {
                    Ok(crate::pairing::PairingStatus::Approved(a)) => {
                        let Ok(addr) = persisted.address.parse::<Address>() else {
                            self.store.clear()?;
                            return Ok(None);
                        };
                        let session = WalletSession {
                            address: addr,
                            chain_id: persisted.chain_id,
                            has_signer: true,
                        };
                        if self
                            .commit_connect(
                                token,
                                session.clone(),
                                ProviderHandle::Remote { topic },
                            )
                            .is_err()
                        {
                            return Ok(None);
                        }
                        self.emit(SessionEvent::Connected(session));
                        // Replay whatever drifted in the wallet while the
                        // process was away.
                        self.accounts_changed(&[a.address])?;
                        self.chain_changed(a.chain_id);
                        Ok(self.current())
                    }
                    _ => {
                        debug!("persisted pairing no longer approved; clearing");
                        self.store.clear()?;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Move the connected wallet to `target`, adding the network first when
    /// the wallet does not know it.
    pub async fn ensure_network(&self, target: u64) -> Result<(), VibeError> {
        let (session, provider) = {
            let st = self.state();
            (st.session.clone(), st.provider.clone())
        };
        let Some(session) = session else {
            return Err(VibeError::WalletNotConnected);
        };
        if session.chain_id == target {
            return Ok(());
        }
        let Some(params) = self.cfg.network_params(target).cloned() else {
            return Err(VibeError::UnknownNetwork(target));
        };

        match provider {
            Some(ProviderHandle::Remote { topic }) => {
                let Some(pairing) = &self.pairing else {
                    return Err(VibeError::Unknown("pairing not configured".into()));
                };
                match pairing.switch_chain(&topic, &params).await {
                    Ok(()) => {}
                    Err(e) if e.is_unknown_chain() => {
                        pairing
                            .add_chain(&topic, &params)
                            .await
                            .map_err(|e| map_switch_err(&e))?;
                        pairing
                            .switch_chain(&topic, &params)
                            .await
                            .map_err(|e| map_switch_err(&e))?;
                    }
                    Err(e) => return Err(map_switch_err(&e)),
                }
            }
            // The local signer follows whatever endpoint is configured;
            // switching is a bookkeeping update.
            Some(ProviderHandle::Local(_)) => {}
            None => return Err(VibeError::WalletNotConnected),
        }

        self.chain_changed(target);
        Ok(())
    }

    /// Provider callback: the wallet reports a different chain.
    pub fn chain_changed(&self, chain_id: u64) {
        let updated = {
            let mut st = self.state();
            let kind = match &st.provider {
                Some(ProviderHandle::Remote { topic }) => {
                    (PersistedProvider::Remote, Some(topic.clone()))
                }
                _ => (PersistedProvider::Local, None),
            };
            match &mut st.session {
                Some(s) if s.chain_id != chain_id => {
                    s.chain_id = chain_id;
                    Some((s.clone(), kind))
                }
                _ => None,
            }
        };
        if let Some((session, (kind, topic))) = updated {
            self.persist(&session, kind, topic);
            self.emit(SessionEvent::ChainChanged(chain_id));
        }
    }

    /// Provider callback: the account list changed. An empty list destroys
    /// the session; otherwise the first account becomes the bound address.
    pub fn accounts_changed(&self, accounts: &[Address]) -> eyre::Result<()> {
        let Some(addr) = accounts.first().copied() else {
            let had = {
                let mut st = self.state();
                st.generation += 1;
                st.provider = None;
                st.session.take().is_some()
            };
            self.store.clear()?;
            if had {
                self.emit(SessionEvent::Disconnected);
            }
            return Ok(());
        };

        let updated = {
            let mut st = self.state();
            let kind = match &st.provider {
                Some(ProviderHandle::Remote { topic }) => {
                    (PersistedProvider::Remote, Some(topic.clone()))
                }
                _ => (PersistedProvider::Local, None),
            };
            match &mut st.session {
                Some(s) if s.address != addr => {
                    s.address = addr;
                    Some((s.clone(), kind))
                }
                _ => None,
            }
        };
        if let Some((session, (kind, topic))) = updated {
            self.persist(&session, kind, topic);
            self.emit(SessionEvent::AccountsChanged(addr));
        }
        Ok(())
    }

    /// Submit a transaction through whichever provider owns the session.
    pub async fn send_transaction(
        &self,
        chain: &EvmChain,
        tx: TransactionRequest,
    ) -> eyre::Result<B256> {
        let provider = self.state().provider.clone();
        match provider {
            None => eyre::bail!("wallet not connected"),
            Some(ProviderHandle::Local(signer)) => chain.send_tx(signer, tx).await,
            Some(ProviderHandle::Remote { topic }) => {
                let Some(pairing) = &self.pairing else {
                    eyre::bail!("pairing not configured");
                };
                pairing
                    .send_transaction(&topic, &tx)
                    .await
                    .map_err(|e| eyre::eyre!("{e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BASE_CHAIN_ID;
    use std::path::Path;

    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    fn temp_paths(dir: &Path) -> VibePaths {
        VibePaths {
            config_dir: dir.join("config"),
            data_dir: dir.join("data"),
            log_file: dir.join("data").join("vibedex.log.jsonl"),
        }
    }

    fn manager(dir: &Path, with_key: bool) -> eyre::Result<SessionManager> {
        let paths = temp_paths(dir);
        std::fs::create_dir_all(&paths.config_dir)?;
        std::fs::create_dir_all(&paths.data_dir)?;
        if with_key {
            std::fs::write(paths.signer_key_file(), TEST_KEY)?;
        }
        SessionManager::new(VibeConfig::default(), &paths)
    }

    #[tokio::test]
    async fn connect_uses_the_local_signer_and_persists() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;

        let s = m.connect().await?;
        assert!(s.has_signer);
        assert_eq!(s.chain_id, BASE_CHAIN_ID);
        assert_eq!(m.current(), Some(s));
        assert!(m.store.exists());
        Ok(())
    }

    #[tokio::test]
    async fn connect_without_any_provider_fails_typed() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), false)?;
        let err = match m.connect().await {
            Ok(_) => eyre::bail!("connect must fail without signer or bridge"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "no_provider_available");
        Ok(())
    }

    #[tokio::test]
    async fn reconnect_round_trip_restores_the_same_address() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;

        let first = m.connect().await?;
        m.disconnect().await?;
        assert!(!m.store.exists(), "persisted address must be gone");
        assert_eq!(m.current(), None);

        let second = m.connect().await?;
        assert_eq!(second.address, first.address);
        assert!(second.has_signer);
        Ok(())
    }

    #[tokio::test]
    async fn double_disconnect_emits_exactly_one_event() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;
        let mut rx = m.subscribe();

        m.connect().await?;
        m.disconnect().await?;
        m.disconnect().await?;

        let mut disconnects = 0_u32;
        while let Ok(ev) = rx.try_recv() {
            if ev == SessionEvent::Disconnected {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        Ok(())
    }

    #[tokio::test]
    async fn superseded_connect_cannot_resurrect_a_dead_session() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;

        // A connect attempt starts, then a disconnect lands before it commits.
        let token = m.begin_attempt();
        m.disconnect().await?;

        let signer = parse_signer_key(TEST_KEY)?;
        let session = WalletSession {
            address: signer.address(),
            chain_id: BASE_CHAIN_ID,
            has_signer: true,
        };
        let err = m
            .commit_connect(token, session, ProviderHandle::Local(signer))
            .expect_err("late completion must be discarded");
        assert_eq!(err.code(), "connection_superseded");
        assert_eq!(m.current(), None);
        Ok(())
    }

    #[tokio::test]
    async fn restore_clears_a_stale_snapshot() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;

        // Persisted address does not belong to the available key.
        m.store.save(&PersistedSession {
            address: "0x000000000000000000000000000000000000dead".into(),
            chain_id: BASE_CHAIN_ID,
            provider: PersistedProvider::Local,
            pairing_topic: None,
        })?;

        assert_eq!(m.restore().await?, None);
        assert!(!m.store.exists(), "stale snapshot must be cleared");
        Ok(())
    }

    #[tokio::test]
    async fn restore_rebuilds_a_matching_local_session() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;
        let connected = m.connect().await?;

        // Fresh manager over the same dirs, as after a process restart.
        let m2 = manager(dir.path(), true)?;
        let restored = m2.restore().await?;
        assert_eq!(restored.map(|s| s.address), Some(connected.address));
        Ok(())
    }

    #[tokio::test]
    async fn empty_account_list_destroys_the_session() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;
        let mut rx = m.subscribe();

        m.connect().await?;
        m.accounts_changed(&[])?;
        assert_eq!(m.current(), None);
        assert!(!m.store.exists());

        let mut disconnects = 0_u32;
        while let Ok(ev) = rx.try_recv() {
            if ev == SessionEvent::Disconnected {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        Ok(())
    }

    #[tokio::test]
    async fn account_change_rebinds_the_address() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;
        let mut rx = m.subscribe();

        m.connect().await?;
        let next = Address::from([0x11_u8; 20]);
        m.accounts_changed(&[next])?;

        assert_eq!(m.current().map(|s| s.address), Some(next));
        let saw_rebind = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|ev| ev == SessionEvent::AccountsChanged(next));
        assert!(saw_rebind);
        Ok(())
    }

    #[tokio::test]
    async fn chain_change_updates_the_snapshot_once() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;
        let mut rx = m.subscribe();

        m.connect().await?;
        m.chain_changed(1);
        m.chain_changed(1);

        assert_eq!(m.current().map(|s| s.chain_id), Some(1));
        let changes = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|ev| matches!(ev, SessionEvent::ChainChanged(_)))
            .count();
        assert_eq!(changes, 1, "repeat reports of the same chain emit nothing");
        Ok(())
    }

    #[tokio::test]
    async fn ensure_network_rejects_unconfigured_targets() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let m = manager(dir.path(), true)?;
        m.connect().await?;

        let err = match m.ensure_network(1).await {
            Ok(()) => eyre::bail!("chain 1 is not configured"),
            Err(e) => e,
        };
        assert_eq!(err.code(), "unknown_network");
        Ok(())
    }
}
