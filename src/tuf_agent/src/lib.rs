//! Fetch-and-refresh orchestration for a TUF update client.
//!
//! Signed metadata is fetched from a local directory or the device gateway's
//! repository endpoint, verified by an external [`TrustEngine`], and published
//! as a single [`TrustedState`] that the control API serves.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod location;
pub mod refresh;
pub mod server;
pub mod store;

pub use config::{AgentConfig, ConcurrentRefresh};
pub use engine::{RepositoryConfig, TargetMetadata, TrustEngine, TrustSession, TrustedState};
pub use error::{AgentError, EngineError, FetchError, Result};
pub use fetcher::{build_http_client, ByteFetcher, FetchRequest, Fetcher};
pub use location::{Location, LocationResolver, Resolution};
pub use refresh::{RefreshPhase, Refresher, TufAgent, TufLayout};
pub use store::{ConfigStore, MemoryStore, TomlFileStore};

/// Start the control API with the given configuration and trust engine
pub async fn start_server(
    config: AgentConfig,
    engine: std::sync::Arc<dyn TrustEngine>,
) -> Result<tokio::task::JoinHandle<()>> {
    server::start_server(config, engine).await
}
