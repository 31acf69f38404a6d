//! Key/value config-store abstraction over platform storage.
//!
//! The store is shared process-wide with unrelated subsystems, so the core
//! declares the exact keys it owns and never touches anything else. There
//! is no multi-key transaction guarantee; partially written state (for
//! example a base URL persisted before the app version) is a valid,
//! retry-able condition for callers.

use std::{collections::HashMap, fmt, future::Future, pin::Pin};

use serde_json::Value;

use crate::error::{CoreError, Result};

/// Keys owned by the delivery core in the shared config store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Backend base URL supplied by the companion application.
    BaseUrl,
    /// Companion application version.
    AppVersion,
    /// Cached auth hash.
    AuthHash,
    /// Per-installation identifier.
    InstallId,
    /// Persisted waypoint sequence counter.
    SortIndex,
    /// Number of times the extension has been installed or re-enabled.
    InstallCounter,
}

impl ConfigKey {
    /// Stable storage name for this key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BaseUrl => "url_end_point",
            Self::AppVersion => "app_version",
            Self::AuthHash => "auth_hash",
            Self::InstallId => "install_id",
            Self::SortIndex => "sort_index",
            Self::InstallCounter => "install_counter",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A partial map of config values, as returned by `ConfigStore::get`.
///
/// Absent keys are simply missing from the map; typed accessors distinguish
/// "not present" (`Ok(None)`) from "present but wrong type" (`Err`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigMap(HashMap<ConfigKey, Value>);

impl ConfigMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a string value.
    pub fn insert_str(&mut self, key: ConfigKey, value: impl Into<String>) {
        self.0.insert(key, Value::String(value.into()));
    }

    /// Inserts an unsigned integer value.
    pub fn insert_u64(&mut self, key: ConfigKey, value: u64) {
        self.0.insert(key, Value::from(value));
    }

    /// Inserts a raw JSON value.
    pub fn insert_value(&mut self, key: ConfigKey, value: Value) {
        self.0.insert(key, value);
    }

    /// Returns a string value, or `None` if the key is absent.
    pub fn get_str(&self, key: ConfigKey) -> Result<Option<&str>> {
        match self.0.get(&key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(CoreError::invalid_value(key)),
        }
    }

    /// Returns an unsigned integer value, or `None` if the key is absent.
    pub fn get_u64(&self, key: ConfigKey) -> Result<Option<u64>> {
        match self.0.get(&key) {
            None => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or(CoreError::invalid_value(key)),
        }
    }

    /// Returns whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over entries.
    pub fn iter(&self) -> impl Iterator<Item = (&ConfigKey, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(ConfigKey, Value)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (ConfigKey, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Persisted key/value storage shared with the rest of the process.
///
/// Modeled on the platform's local-storage API: `get` returns a partial map
/// of the requested keys, `set` writes entries individually with no
/// transactional guarantee across keys. Both are fallible with
/// `CoreError::Store`.
pub trait ConfigStore: Send + Sync + 'static {
    /// Reads the requested keys, omitting absent ones.
    fn get(&self, keys: &[ConfigKey]) -> Pin<Box<dyn Future<Output = Result<ConfigMap>> + Send + '_>>;

    /// Writes the given entries.
    fn set(&self, entries: ConfigMap) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Increments and persists the install counter, returning the new count.
///
/// First-run detection lives in platform glue outside this crate, but the
/// counter itself is a core-owned key.
pub async fn record_install(store: &dyn ConfigStore) -> Result<u64> {
    let current = store
        .get(&[ConfigKey::InstallCounter])
        .await?
        .get_u64(ConfigKey::InstallCounter)?
        .unwrap_or(0);

    let count = current + 1;
    let mut entries = ConfigMap::new();
    entries.insert_u64(ConfigKey::InstallCounter, count);
    store.set(entries).await?;

    tracing::debug!(count, "recorded install");
    Ok(count)
}

pub mod mock {
    //! In-memory config store for tests and storeless embedders.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

    use serde_json::Value;
    use tokio::sync::RwLock;

    use super::{ConfigKey, ConfigMap, ConfigStore};
    use crate::error::{CoreError, Result};

    /// Volatile config store with injectable failures.
    ///
    /// Stores values in-memory behind an async lock. A single injected error
    /// fails the next operation (get or set) and is then cleared, which is
    /// enough to exercise the propagation paths.
    #[derive(Debug, Default)]
    pub struct MemoryConfigStore {
        values: Arc<RwLock<HashMap<ConfigKey, Value>>>,
        fail_next: Arc<RwLock<Option<String>>>,
    }

    impl MemoryConfigStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Fails the next get or set with the given message.
        pub async fn inject_error(&self, message: impl Into<String>) {
            *self.fail_next.write().await = Some(message.into());
        }

        /// Returns a snapshot of all stored entries.
        pub async fn snapshot(&self) -> HashMap<ConfigKey, Value> {
            self.values.read().await.clone()
        }

        /// Seeds a string value directly, bypassing the trait.
        pub async fn seed_str(&self, key: ConfigKey, value: impl Into<String>) {
            self.values.write().await.insert(key, Value::String(value.into()));
        }

        /// Seeds an integer value directly, bypassing the trait.
        pub async fn seed_u64(&self, key: ConfigKey, value: u64) {
            self.values.write().await.insert(key, Value::from(value));
        }

        async fn take_injected_error(&self) -> Option<String> {
            self.fail_next.write().await.take()
        }
    }

    impl ConfigStore for MemoryConfigStore {
        fn get(
            &self,
            keys: &[ConfigKey],
        ) -> Pin<Box<dyn Future<Output = Result<ConfigMap>> + Send + '_>> {
            let keys = keys.to_vec();
            Box::pin(async move {
                if let Some(message) = self.take_injected_error().await {
                    return Err(CoreError::store(message));
                }

                let values = self.values.read().await;
                Ok(keys
                    .into_iter()
                    .filter_map(|key| values.get(&key).map(|value| (key, value.clone())))
                    .collect())
            })
        }

        fn set(&self, entries: ConfigMap) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                if let Some(message) = self.take_injected_error().await {
                    return Err(CoreError::store(message));
                }

                let mut values = self.values.write().await;
                for (key, value) in entries.iter() {
                    values.insert(*key, value.clone());
                }
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MemoryConfigStore, *};

    #[tokio::test]
    async fn get_returns_partial_map() {
        let store = MemoryConfigStore::new();
        store.seed_str(ConfigKey::BaseUrl, "https://backend.example").await;

        let map = store.get(&[ConfigKey::BaseUrl, ConfigKey::AppVersion]).await.unwrap();
        assert_eq!(map.get_str(ConfigKey::BaseUrl).unwrap(), Some("https://backend.example"));
        assert_eq!(map.get_str(ConfigKey::AppVersion).unwrap(), None);
    }

    #[tokio::test]
    async fn typed_accessor_rejects_wrong_type() {
        let store = MemoryConfigStore::new();
        store.seed_u64(ConfigKey::SortIndex, 7).await;

        let map = store.get(&[ConfigKey::SortIndex]).await.unwrap();
        assert_eq!(map.get_u64(ConfigKey::SortIndex).unwrap(), Some(7));
        assert!(map.get_str(ConfigKey::SortIndex).is_err());
    }

    #[tokio::test]
    async fn injected_error_fails_one_operation() {
        let store = MemoryConfigStore::new();
        store.inject_error("disk full").await;

        assert!(store.get(&[ConfigKey::AuthHash]).await.is_err());
        assert!(store.get(&[ConfigKey::AuthHash]).await.is_ok());
    }

    #[tokio::test]
    async fn record_install_increments_counter() {
        let store = MemoryConfigStore::new();
        assert_eq!(record_install(&store).await.unwrap(), 1);
        assert_eq!(record_install(&store).await.unwrap(), 2);
    }
}
