//! Shared test fixtures: a fake trust engine driving sub-fetches through the
//! bound fetcher, repository/layout builders and a mock upstream server.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tuf_agent::{
    EngineError, RepositoryConfig, TargetMetadata, TrustEngine, TrustSession, TufLayout,
};

pub const TARGETS_FILE: &str = "targets.json";
pub const MAX_METADATA_LENGTH: u64 = 1024 * 1024;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Observations shared between the fake engine and its sessions.
#[derive(Default)]
pub struct EngineStats {
    pub opened: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub fail_open: AtomicBool,
    pub configs: Mutex<Vec<RepositoryConfig>>,
}

/// Trust engine stand-in: "verifies" by fetching `targets.json` from the
/// repository root and parsing it.
pub struct FakeEngine {
    pub stats: Arc<EngineStats>,
    pub session_delay: Duration,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(EngineStats::default()),
            session_delay: Duration::ZERO,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            session_delay: delay,
            ..Self::new()
        }
    }
}

#[async_trait]
impl TrustEngine for FakeEngine {
    async fn open(
        &self,
        config: RepositoryConfig,
        trusted_root: Vec<u8>,
    ) -> Result<Box<dyn TrustSession>, EngineError> {
        if self.stats.fail_open.load(Ordering::SeqCst) {
            return Err("root metadata rejected".into());
        }
        let root: serde_json::Value = serde_json::from_slice(&trusted_root)?;
        self.stats.configs.lock().unwrap().push(config.clone());
        self.stats.opened.fetch_add(1, Ordering::SeqCst);

        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(FakeSession {
            config,
            root,
            targets: BTreeMap::new(),
            stats: self.stats.clone(),
            delay: self.session_delay,
        }))
    }
}

pub struct FakeSession {
    config: RepositoryConfig,
    root: serde_json::Value,
    targets: BTreeMap<String, TargetMetadata>,
    stats: Arc<EngineStats>,
    delay: Duration,
}

#[async_trait]
impl TrustSession for FakeSession {
    async fn refresh(&mut self) -> Result<(), EngineError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.stats.fail_refresh.load(Ordering::SeqCst) {
            return Err("timestamp signature threshold not met".into());
        }
        let location = self.config.metadata_base.join(TARGETS_FILE);
        let bytes = self
            .config
            .fetcher
            .fetch(&location, MAX_METADATA_LENGTH, self.config.fetch_timeout)
            .await?;
        self.targets = serde_json::from_slice(&bytes)?;
        std::fs::write(self.config.local_metadata_dir.join(TARGETS_FILE), &bytes)?;
        Ok(())
    }

    fn top_level_targets(&self) -> BTreeMap<String, TargetMetadata> {
        self.targets.clone()
    }

    fn trusted_root(&self) -> serde_json::Value {
        self.root.clone()
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn sample_root() -> serde_json::Value {
    serde_json::json!({
        "_type": "root",
        "version": 1,
        "consistent_snapshot": true,
        "expires": "2030-01-01T00:00:00Z",
    })
}

pub fn target(length: u64, sha256: &str) -> TargetMetadata {
    let mut hashes = BTreeMap::new();
    hashes.insert("sha256".to_string(), sha256.to_string());
    TargetMetadata {
        length,
        hashes,
        custom: None,
    }
}

/// Lay out a device metadata directory holding the trusted root.
pub fn write_layout(dir: &Path) -> TufLayout {
    let metadata_dir = dir.join("tuf");
    std::fs::create_dir_all(&metadata_dir).unwrap();
    let root_path = metadata_dir.join("root.json");
    std::fs::write(&root_path, serde_json::to_vec(&sample_root()).unwrap()).unwrap();
    TufLayout {
        root_path,
        targets_dir: metadata_dir.join("download"),
        metadata_dir,
    }
}

/// Write a local repository whose targets role lists `targets`.
pub fn write_repo(dir: &Path, targets: &BTreeMap<String, TargetMetadata>) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(TARGETS_FILE), serde_json::to_vec(targets).unwrap()).unwrap();
}

/// Serve `app` on an ephemeral loopback port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("Mock server failed");
    });
    addr
}
