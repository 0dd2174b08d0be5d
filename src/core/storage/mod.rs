//! Preference persistence
//!
//! Provides pluggable storage for:
//! - In-process maps (tests, single-window hosts)
//! - DragonflyDB / Redis (shared across hosts)
//!
//! Nothing here affects the correctness of a workflow run.

pub mod dragonfly;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compliance::classifier::SelectionMode;
use crate::compliance::mapping::EntityType;

pub use dragonfly::RedisPreferenceStore;
pub use memory::InMemoryPreferenceStore;

/// Key the preferences document lives under
pub const PREFERENCES_KEY: &str = "promptveil:preferences";

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    ConnectionFailed(String),
    NotFound(String),
    Serialization(String),
    OperationFailed(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            StorageError::NotFound(msg) => write!(f, "Not found: {}", msg),
            StorageError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            StorageError::OperationFailed(msg) => write!(f, "Operation failed: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Key-value backend for user preferences
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn save(&self, key: &str, value: &str) -> StorageResult<()>;

    /// `NotFound` when the key is absent
    async fn load(&self, key: &str) -> StorageResult<String>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

/// Where the host UI docks its control panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanelPosition {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

/// Persisted user choices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub mode: SelectionMode,
    pub enabled_types: Vec<EntityType>,
    pub panel_position: PanelPosition,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            mode: SelectionMode::Automatic,
            enabled_types: EntityType::ALL.to_vec(),
            panel_position: PanelPosition::default(),
        }
    }
}

/// Read preferences, falling back to defaults when none were saved.
pub async fn load_preferences(store: &dyn PreferenceStore) -> StorageResult<Preferences> {
    match store.load(PREFERENCES_KEY).await {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(StorageError::NotFound(_)) => {
            debug!("📭 [Preferences] Nothing saved yet, using defaults");
            Ok(Preferences::default())
        }
        Err(e) => Err(e),
    }
}

pub async fn save_preferences(store: &dyn PreferenceStore, prefs: &Preferences) -> StorageResult<()> {
    let raw = serde_json::to_string(prefs)?;
    store.save(PREFERENCES_KEY, &raw).await
}
