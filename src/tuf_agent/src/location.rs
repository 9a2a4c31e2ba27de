//! Byte locations and repository location resolution.
//!
//! A [`Location`] is either a local filesystem path or a remote URL. Strings
//! carrying the `file://` prefix become [`Location::Local`]; everything else
//! is treated as remote.
//!
//! The [`LocationResolver`] picks the repository root for one refresh: a
//! caller-supplied local override, or the remote repository derived from the
//! control-plane configuration URL. Deriving the remote root is a routing
//! convention of the device gateway (the `/config` endpoint has a sibling
//! `/repo` endpoint), not a generic URL algorithm.

use crate::store::ConfigStore;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prefix marking a local filesystem location.
pub const LOCAL_PREFIX: &str = "file://";

/// Path segment of the control-plane configuration endpoint.
pub const CONFIG_SEGMENT: &str = "/config";

/// Path segment of the sibling TUF repository endpoint.
pub const REPO_SEGMENT: &str = "/repo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(String),
}

impl Location {
    /// Normalize a location string at the boundary.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix(LOCAL_PREFIX) {
            Some(path) => Location::Local(PathBuf::from(path)),
            None => Location::Remote(s.to_string()),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Location::Local(path.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local(_))
    }

    /// Location of `name` beneath this one.
    pub fn join(&self, name: &str) -> Self {
        let name = name.trim_start_matches('/');
        match self {
            Location::Local(path) => Location::Local(path.join(name)),
            Location::Remote(url) => {
                Location::Remote(format!("{}/{}", url.trim_end_matches('/'), name))
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}{}", LOCAL_PREFIX, path.display()),
            Location::Remote(url) => f.write_str(url),
        }
    }
}

impl From<&Path> for Location {
    fn from(path: &Path) -> Self {
        Location::Local(path.to_path_buf())
    }
}

/// Outcome of resolving one refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub base: Location,
    pub tag: String,
}

/// Decides which repository root a refresh fetches from and which tag it
/// attaches to remote requests.
pub struct LocationResolver {
    control_plane_url: String,
    store: Arc<dyn ConfigStore>,
    tag_key: String,
}

impl LocationResolver {
    pub fn new(
        control_plane_url: impl Into<String>,
        store: Arc<dyn ConfigStore>,
        tag_key: impl Into<String>,
    ) -> Self {
        Self {
            control_plane_url: control_plane_url.into(),
            store,
            tag_key: tag_key.into(),
        }
    }

    /// Resolve the base location and tag for a single refresh.
    ///
    /// The tag is read from the configuration store on every call; it may
    /// change between refreshes.
    pub fn resolve(&self, local_override: Option<&str>) -> Resolution {
        let tag = self.store.get(&self.tag_key).unwrap_or_default();

        let base = match local_override.map(str::trim).filter(|s| !s.is_empty()) {
            None => Location::Remote(remote_repo_url(&self.control_plane_url)),
            Some(path) => Location::parse(&local_repo_url(path)),
        };

        tracing::debug!(base = %base, tag = %tag, "Resolved repository location");
        Resolution { base, tag }
    }
}

/// Map the control-plane configuration URL to its sibling repository URL.
pub fn remote_repo_url(control_plane_url: &str) -> String {
    control_plane_url.replace(CONFIG_SEGMENT, REPO_SEGMENT)
}

/// Apply the local prefix to a bare path; prefixed values pass through.
pub fn local_repo_url(path: &str) -> String {
    if path.starts_with(LOCAL_PREFIX) {
        path.to_string()
    } else {
        format!("{}{}", LOCAL_PREFIX, path)
    }
}
