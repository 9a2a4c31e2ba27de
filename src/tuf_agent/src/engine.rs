//! Contract with the external trust engine.
//!
//! The engine performs the root, timestamp, snapshot and targets verification
//! chain. This crate never checks signatures itself: it hands the engine a
//! [`RepositoryConfig`] whose bound [`Fetcher`] performs every sub-fetch, and
//! publishes whatever verified state the engine returns.

use crate::error::EngineError;
use crate::fetcher::Fetcher;
use crate::location::Location;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration bound to one refresh attempt. Built fresh per refresh and
/// never mutated afterwards.
#[derive(Clone)]
pub struct RepositoryConfig {
    /// Repository root for metadata
    pub metadata_base: Location,
    /// Repository root for target files (same as the metadata root here)
    pub targets_base: Location,
    pub local_metadata_dir: PathBuf,
    pub local_targets_dir: PathBuf,
    /// Target filenames are prefixed with their content hash
    pub prefix_targets_with_hash: bool,
    /// Timeout for each sub-fetch made through `fetcher`
    pub fetch_timeout: Duration,
    pub fetcher: Arc<dyn Fetcher>,
}

impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryConfig")
            .field("metadata_base", &self.metadata_base)
            .field("targets_base", &self.targets_base)
            .field("local_metadata_dir", &self.local_metadata_dir)
            .field("local_targets_dir", &self.local_targets_dir)
            .field("prefix_targets_with_hash", &self.prefix_targets_with_hash)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

/// Metadata of one target file as recorded in the verified targets role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMetadata {
    pub length: u64,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// Last successfully verified metadata set.
///
/// Published as a whole behind an `Arc`; readers see either the previous
/// complete state or the new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrustedState {
    /// Signed root role, structure owned by the engine
    pub root: serde_json::Value,
    /// Top-level targets by name
    pub targets: BTreeMap<String, TargetMetadata>,
}

/// Builds refresh sessions.
#[async_trait]
pub trait TrustEngine: Send + Sync {
    /// Open a session bound to `config` and the locally trusted root.
    async fn open(
        &self,
        config: RepositoryConfig,
        trusted_root: Vec<u8>,
    ) -> Result<Box<dyn TrustSession>, EngineError>;
}

/// One refresh session. Dropped when the refresh completes.
#[async_trait]
pub trait TrustSession: Send {
    /// Run the full verification chain, fetching through the bound fetcher.
    async fn refresh(&mut self) -> Result<(), EngineError>;

    fn top_level_targets(&self) -> BTreeMap<String, TargetMetadata>;

    fn trusted_root(&self) -> serde_json::Value;
}
