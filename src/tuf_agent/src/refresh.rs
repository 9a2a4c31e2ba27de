//! Refresh orchestration.
//!
//! [`Refresher`] owns the single published [`TrustedState`] slot and runs at
//! most one refresh at a time. A refresh reads the locally trusted root,
//! binds a fresh [`ByteFetcher`] to the resolved repository, lets the trust
//! engine verify the metadata chain, and only then swaps the new state in.
//! Any failure leaves the previously published state untouched.

use crate::config::{AgentConfig, ConcurrentRefresh};
use crate::engine::{RepositoryConfig, TargetMetadata, TrustEngine, TrustedState};
use crate::error::{AgentError, Result};
use crate::fetcher::ByteFetcher;
use crate::location::{Location, LocationResolver, Resolution};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Per-fetch timeout used when none is configured
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed on-disk layout shared with the trust engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TufLayout {
    pub root_path: PathBuf,
    pub metadata_dir: PathBuf,
    pub targets_dir: PathBuf,
}

impl TufLayout {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            root_path: config.tuf.root_path(),
            metadata_dir: config.tuf.metadata_dir.clone(),
            targets_dir: config.tuf.targets_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

pub struct Refresher {
    engine: Arc<dyn TrustEngine>,
    client: Client,
    tag_header: String,
    layout: TufLayout,
    policy: ConcurrentRefresh,
    fetch_timeout: Duration,
    /// Held for the whole lifetime of a refresh session
    in_flight: Mutex<()>,
    state: RwLock<Option<Arc<TrustedState>>>,
}

impl Refresher {
    pub fn new(
        engine: Arc<dyn TrustEngine>,
        client: Client,
        tag_header: impl Into<String>,
        layout: TufLayout,
        policy: ConcurrentRefresh,
    ) -> Self {
        Self {
            engine,
            client,
            tag_header: tag_header.into(),
            layout,
            policy,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            in_flight: Mutex::new(()),
            state: RwLock::new(None),
        }
    }

    /// Timeout the trust engine applies to each sub-fetch.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn layout(&self) -> &TufLayout {
        &self.layout
    }

    pub fn phase(&self) -> RefreshPhase {
        match self.in_flight.try_lock() {
            Ok(_) => RefreshPhase::Idle,
            Err(_) => RefreshPhase::Refreshing,
        }
    }

    /// Run one refresh attempt against `base`, honouring the configured
    /// policy for triggers that arrive while another refresh is in flight.
    pub async fn refresh(&self, base: Location, tag: String) -> Result<Arc<TrustedState>> {
        self.refresh_resolved(move || Resolution { base, tag }).await
    }

    /// Like [`Refresher::refresh`], but the repository location is resolved
    /// only once this trigger holds the in-flight lock, so a queued trigger
    /// sees the configuration current when its own attempt starts.
    pub async fn refresh_resolved<F>(&self, resolve: F) -> Result<Arc<TrustedState>>
    where
        F: FnOnce() -> Resolution + Send,
    {
        let _guard = self.acquire().await?;
        let resolution = resolve();
        self.run(resolution.base, resolution.tag).await
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        match self.policy {
            ConcurrentRefresh::Queue => Ok(self.in_flight.lock().await),
            ConcurrentRefresh::Reject => self.in_flight.try_lock().map_err(|_| AgentError::Busy),
        }
    }

    /// Like [`Refresher::refresh`] but never waits for an in-flight refresh.
    pub async fn try_refresh(&self, base: Location, tag: String) -> Result<Arc<TrustedState>> {
        let _guard = self.in_flight.try_lock().map_err(|_| AgentError::Busy)?;
        self.run(base, tag).await
    }

    async fn run(&self, base: Location, tag: String) -> Result<Arc<TrustedState>> {
        tracing::info!(base = %base, tag = %tag, "Refreshing trusted metadata");

        match self.run_session(base, tag).await {
            Ok(state) => {
                for name in state.targets.keys() {
                    tracing::info!(target_name = %name, "Trusted target");
                }
                self.publish(state.clone());
                tracing::info!(targets = state.targets.len(), "Trusted metadata refreshed");
                Ok(state)
            }
            Err(e) => {
                tracing::error!(error = %e, "Metadata refresh failed, keeping previous trusted state");
                Err(e)
            }
        }
    }

    async fn run_session(&self, base: Location, tag: String) -> Result<Arc<TrustedState>> {
        // No network fallback for the root of trust
        let root_bytes = tokio::fs::read(&self.layout.root_path)
            .await
            .map_err(|source| AgentError::RootBootstrap {
                path: self.layout.root_path.display().to_string(),
                source,
            })?;

        let config = self.repository_config(base, tag).await?;

        let mut session = self
            .engine
            .open(config, root_bytes)
            .await
            .map_err(AgentError::Session)?;

        session.refresh().await.map_err(AgentError::TrustChain)?;

        Ok(Arc::new(TrustedState {
            root: session.trusted_root(),
            targets: session.top_level_targets(),
        }))
    }

    async fn repository_config(&self, base: Location, tag: String) -> Result<RepositoryConfig> {
        tokio::fs::create_dir_all(&self.layout.targets_dir).await?;
        let fetcher = ByteFetcher::new(self.client.clone(), tag, &self.tag_header)?;
        Ok(RepositoryConfig {
            metadata_base: base.clone(),
            targets_base: base,
            local_metadata_dir: self.layout.metadata_dir.clone(),
            local_targets_dir: self.layout.targets_dir.clone(),
            prefix_targets_with_hash: true,
            fetch_timeout: self.fetch_timeout,
            fetcher: Arc::new(fetcher),
        })
    }

    fn publish(&self, state: Arc<TrustedState>) {
        match self.state.write() {
            Ok(mut slot) => *slot = Some(state),
            // The slot only ever holds a complete Arc, so a poisoned lock is still consistent
            Err(poisoned) => *poisoned.into_inner() = Some(state),
        }
    }

    /// Currently published trusted state, if any refresh has succeeded.
    pub fn current(&self) -> Option<Arc<TrustedState>> {
        match self.state.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn targets(&self) -> BTreeMap<String, TargetMetadata> {
        self.current()
            .map(|state| state.targets.clone())
            .unwrap_or_default()
    }

    pub fn root(&self) -> Option<serde_json::Value> {
        self.current().map(|state| state.root.clone())
    }
}

/// Resolver plus orchestrator: the entry point behind the control API.
pub struct TufAgent {
    resolver: LocationResolver,
    refresher: Refresher,
}

impl TufAgent {
    pub fn new(resolver: LocationResolver, refresher: Refresher) -> Self {
        Self {
            resolver,
            refresher,
        }
    }

    /// Resolve the repository for this trigger and run one refresh.
    pub async fn refresh_from(&self, local_override: Option<&str>) -> Result<Arc<TrustedState>> {
        self.refresher
            .refresh_resolved(|| self.resolver.resolve(local_override))
            .await
    }

    pub fn refresher(&self) -> &Refresher {
        &self.refresher
    }

    pub fn targets(&self) -> BTreeMap<String, TargetMetadata> {
        self.refresher.targets()
    }

    pub fn root(&self) -> Option<serde_json::Value> {
        self.refresher.root()
    }
}
