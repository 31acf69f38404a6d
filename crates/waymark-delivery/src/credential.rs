//! Lazily fetched, cached auth credential.
//!
//! The credential identifies this installation to the backend. It is read
//! from the config store when present; otherwise the cache resolves the
//! per-installation identifier (minting one on first use) and fetches a
//! fresh hash from the backend. Failures are never cached, so the next
//! caller retries the fetch.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;
use waymark_core::{
    models::{Credential, InstallId},
    ConfigKey, ConfigMap, ConfigStore,
};

use crate::{
    client::BackendClient,
    environment::EnvironmentResolver,
    error::{DeliveryError, Prerequisite, Result},
};

/// Resolves and caches the auth hash for this installation.
pub struct CredentialCache {
    store: Arc<dyn ConfigStore>,
    client: Arc<BackendClient>,
    environment: Arc<EnvironmentResolver>,
    // Serializes install-id creation so concurrent first callers cannot
    // mint two different identifiers.
    install_id_guard: Mutex<()>,
}

impl CredentialCache {
    /// Creates a credential cache over the given collaborators.
    pub fn new(
        store: Arc<dyn ConfigStore>,
        client: Arc<BackendClient>,
        environment: Arc<EnvironmentResolver>,
    ) -> Self {
        Self { store, client, environment, install_id_guard: Mutex::new(()) }
    }

    /// Returns the credential, fetching and persisting one on a cache miss.
    ///
    /// A cache hit performs no network call. On a miss, the backend is
    /// queried with the per-installation identifier; a fetched credential
    /// is persisted before being returned. Fetch failures of any kind are
    /// logged and surfaced as `PrerequisiteUnavailable`, so the next call
    /// retries.
    ///
    /// # Errors
    ///
    /// `PrerequisiteUnavailable` when the base URL is unresolved or the
    /// fetch fails; `Store` if the config store fails.
    pub async fn get(&self) -> Result<Credential> {
        let map = self.store.get(&[ConfigKey::AuthHash]).await?;
        if let Some(hash) = map.get_str(ConfigKey::AuthHash)? {
            return Ok(Credential::cached(hash));
        }

        let base_url = self.environment.base_url().await?;
        let install_id = self.install_id().await?;

        let hash = match self.client.fetch_auth_hash(&base_url, &install_id.0).await {
            Ok(hash) => hash,
            Err(error) => {
                tracing::warn!(%error, "auth hash fetch failed");
                return Err(DeliveryError::missing(Prerequisite::Credential));
            },
        };

        let mut entries = ConfigMap::new();
        entries.insert_str(ConfigKey::AuthHash, hash.clone());
        self.store.set(entries).await?;

        Ok(Credential::fetched(hash))
    }

    /// Returns the per-installation identifier, minting one on first use.
    ///
    /// The identifier is a random UUID persisted on creation. Creation is
    /// serialized internally, so concurrent first callers observe the same
    /// identifier. Public so platform glue can hand the identifier to the
    /// companion application.
    ///
    /// # Errors
    ///
    /// `Store` if the config store fails.
    pub async fn install_id(&self) -> Result<InstallId> {
        let _guard = self.install_id_guard.lock().await;

        let map = self.store.get(&[ConfigKey::InstallId]).await?;
        if let Some(id) = map.get_str(ConfigKey::InstallId)? {
            return Ok(InstallId(id.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let mut entries = ConfigMap::new();
        entries.insert_str(ConfigKey::InstallId, id.clone());
        self.store.set(entries).await?;

        tracing::info!(install_id = %id, "minted new installation identifier");
        Ok(InstallId(id))
    }
}
