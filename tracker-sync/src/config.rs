//! Engine configuration and the persisted relay list.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracker_types::{SyncCursor, Timestamp};

/// Directory under the platform config dir holding tracker settings.
pub const CONFIG_DIR_NAME: &str = "tracker-app";

/// File name of the relay list.
pub const RELAYS_FILE_NAME: &str = "relays.json";

/// Default capacity of the reconciler → cascade directive queue.
pub const DEFAULT_DIRECTIVE_BUFFER: usize = 256;

/// Lower bound used for an entity that has never been synced.
///
/// A persisted cursor always wins over this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SincePolicy {
    /// Only events from now on. History is not backfilled.
    #[default]
    Now,
    /// No lower bound: replay everything the relays still hold.
    Backfill,
    /// Replay the last `seconds` of history.
    Lookback { seconds: u64 },
}

impl SincePolicy {
    /// Resolves the `since` bound for a subscription.
    pub fn resolve(&self, cursor: Option<&SyncCursor>, now: Timestamp) -> Option<Timestamp> {
        if let Some(cursor) = cursor {
            return Some(cursor.created_at);
        }
        match self {
            Self::Now => Some(now),
            Self::Backfill => None,
            Self::Lookback { seconds } => Some(now.saturating_sub_secs(*seconds)),
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Relay endpoints used for every publish and subscription.
    pub relays: Vec<String>,
    /// `since` policy for entities without a cursor.
    pub since_policy: SincePolicy,
    /// Capacity of the directive queue between reconciler and cascade controller.
    pub directive_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            since_policy: SincePolicy::Now,
            directive_buffer: DEFAULT_DIRECTIVE_BUFFER,
        }
    }
}

impl SyncConfig {
    /// Config using the given relays and default everything else.
    pub fn with_relays<I, S>(relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relays: relays.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Config built from the user's persisted relay list.
    pub fn from_relay_list(list: &RelayList) -> Self {
        Self::with_relays(list.relays.iter().cloned())
    }

    pub fn since_policy(mut self, policy: SincePolicy) -> Self {
        self.since_policy = policy;
        self
    }

    /// Checks invariants that would otherwise surface as confusing runtime errors.
    pub fn validate(&self) -> SyncResult<()> {
        if self.directive_buffer == 0 {
            return Err(SyncError::Config(
                "directive_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// The user's relay endpoints, persisted as `{"relays": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayList {
    #[serde(default)]
    pub relays: Vec<String>,
}

impl RelayList {
    /// `<config_dir>/tracker-app/relays.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(RELAYS_FILE_NAME))
    }

    /// Loads the list. A missing file is an empty list.
    pub fn load(path: &Path) -> SyncResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("relay list {} not found, starting empty", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(SyncError::Config(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Loads from [`RelayList::default_path`].
    pub fn load_default() -> SyncResult<Self> {
        let path = Self::default_path()
            .ok_or_else(|| SyncError::Config("no config directory on this platform".into()))?;
        Self::load(&path)
    }

    /// Writes the list, creating parent directories.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .map_err(|e| SyncError::Config(format!("failed to write {}: {e}", path.display())))
    }

    /// Adds a relay. Returns false if it was already listed.
    pub fn add(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.relays.contains(&url) {
            return false;
        }
        self.relays.push(url);
        true
    }

    /// Removes a relay. Returns false if it was not listed.
    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.relays.len();
        self.relays.retain(|r| r != url);
        self.relays.len() != before
    }
}
