use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Opaque failure raised by a trust engine implementation.
pub type EngineError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single byte fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Remote status was not a success, or a local file could not be read
    /// (reported with a synthetic 404).
    #[error("download failed for {url}: HTTP status {status}")]
    Http { status: u16, url: String },

    #[error("download failed for {url}, length {length} is larger than expected {max_length}")]
    LengthMismatch {
        url: String,
        length: u64,
        max_length: u64,
    },

    #[error("download failed for {url}: invalid Content-Length {value:?}")]
    InvalidContentLength { url: String, value: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Status code carried by a transport failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_length_mismatch(&self) -> bool {
        matches!(self, FetchError::LengthMismatch { .. })
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read trusted root {path}: {source}")]
    RootBootstrap {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create updater session: {0}")]
    Session(#[source] EngineError),

    #[error("failed to refresh trusted metadata: {0}")]
    TrustChain(#[source] EngineError),

    #[error("a metadata refresh is already in progress")]
    Busy,
}
