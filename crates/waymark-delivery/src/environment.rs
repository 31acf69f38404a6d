//! Backend-location resolution via the companion application.
//!
//! The base URL and app version come from the companion app over a
//! native-messaging channel this crate does not implement. Resolution is
//! non-blocking: a cache miss fires a request at the bridge and fails
//! recoverably; callers retry once the companion's answer has been
//! persisted through `apply_update`.

use std::{future::Future, pin::Pin, sync::Arc};

use waymark_core::{
    models::{Environment, EnvironmentUpdate},
    ConfigKey, ConfigMap, ConfigStore,
};

use crate::error::{DeliveryError, Prerequisite, Result};

/// Request/response channel to the companion application.
///
/// The core only needs a fire-and-forget "send me environment data" call;
/// the companion's eventual answer arrives through platform glue that calls
/// `EnvironmentResolver::apply_update`.
pub trait CompanionBridge: Send + Sync + 'static {
    /// Asks the companion application to supply environment data.
    ///
    /// Must not block on the companion's answer.
    fn request_environment(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Bridge that never answers, for tests and hostless embedders.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBridge;

impl CompanionBridge for NoopBridge {
    fn request_environment(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Resolves and caches the backend base URL and app version.
pub struct EnvironmentResolver {
    store: Arc<dyn ConfigStore>,
    bridge: Arc<dyn CompanionBridge>,
}

impl EnvironmentResolver {
    /// Creates a resolver over the given store and companion bridge.
    pub fn new(store: Arc<dyn ConfigStore>, bridge: Arc<dyn CompanionBridge>) -> Self {
        Self { store, bridge }
    }

    /// Returns the backend base URL.
    ///
    /// On a cache miss this triggers an environment request at the bridge
    /// and fails immediately with `PrerequisiteUnavailable`; it never waits
    /// for the companion's answer.
    ///
    /// # Errors
    ///
    /// `PrerequisiteUnavailable { BaseUrl }` until the companion has
    /// answered; `Store` if the config store fails.
    pub async fn base_url(&self) -> Result<String> {
        let map = self.store.get(&[ConfigKey::BaseUrl]).await?;
        if let Some(url) = map.get_str(ConfigKey::BaseUrl)? {
            return Ok(url.to_string());
        }

        tracing::debug!("base URL not cached, requesting environment from companion");
        self.bridge.request_environment().await;
        Err(DeliveryError::missing(Prerequisite::BaseUrl))
    }

    /// Returns the companion application version.
    ///
    /// Unlike `base_url` this does not trigger a bridge request; the app
    /// version only ever arrives alongside the base URL.
    ///
    /// # Errors
    ///
    /// `PrerequisiteUnavailable { AppVersion }` until the companion has
    /// answered; `Store` if the config store fails.
    pub async fn app_version(&self) -> Result<String> {
        let map = self.store.get(&[ConfigKey::AppVersion]).await?;
        match map.get_str(ConfigKey::AppVersion)? {
            Some(version) => Ok(version.to_string()),
            None => Err(DeliveryError::missing(Prerequisite::AppVersion)),
        }
    }

    /// Returns base URL and app version together.
    ///
    /// Reads both keys in one store call. Partially written state (base URL
    /// present, app version absent) fails on the missing half and is
    /// retry-able.
    ///
    /// # Errors
    ///
    /// `PrerequisiteUnavailable` for whichever value is absent, base URL
    /// checked first; `Store` if the config store fails.
    pub async fn environment(&self) -> Result<Environment> {
        let map = self.store.get(&[ConfigKey::BaseUrl, ConfigKey::AppVersion]).await?;

        let base_url = match map.get_str(ConfigKey::BaseUrl)? {
            Some(url) => url.to_string(),
            None => {
                tracing::debug!("base URL not cached, requesting environment from companion");
                self.bridge.request_environment().await;
                return Err(DeliveryError::missing(Prerequisite::BaseUrl));
            },
        };
        let app_version = map
            .get_str(ConfigKey::AppVersion)?
            .map(str::to_string)
            .ok_or(DeliveryError::missing(Prerequisite::AppVersion))?;

        Ok(Environment { base_url, app_version })
    }

    /// Persists the companion's environment answer.
    ///
    /// Called by the native-messaging glue when the companion responds to
    /// an earlier `request_environment`. After this succeeds, base URL, app
    /// version, and credential resolution all hit the cache.
    ///
    /// # Errors
    ///
    /// `Store` if the config store rejects the write.
    pub async fn apply_update(&self, update: EnvironmentUpdate) -> Result<()> {
        let mut entries = ConfigMap::new();
        entries.insert_str(ConfigKey::BaseUrl, update.base_url);
        entries.insert_str(ConfigKey::AppVersion, update.app_version);
        entries.insert_str(ConfigKey::AuthHash, update.auth_hash);
        self.store.set(entries).await?;

        tracing::info!("environment data persisted from companion");
        Ok(())
    }
}
