//! HTTP client for the three backend calls.
//!
//! Stateless aside from connection pooling: one GET to obtain the auth
//! hash, one POST for batched visit events, one POST per waypoint. Success
//! is exactly HTTP 2xx; response bodies are never inspected beyond the
//! auth-hash field, and any non-2xx status or transport failure is reported
//! the same way to the caller's retry policy.

use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use waymark_core::{models::Waypoint, VisitEvent};

use crate::error::{DeliveryError, Result};

/// Path of the auth-hash endpoint.
pub const AUTH_HASH_PATH: &str = "/auth_hash";
/// Path of the batched visited-urls endpoint.
pub const VISITED_URLS_PATH: &str = "/visited_urls";
/// Path of the waypoints endpoint.
pub const WAYPOINTS_PATH: &str = "/waypoints";

/// OS tag sent with every waypoint.
const OS_TAG: &str = "ios";

/// Configuration for the backend client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout applied to every outbound request.
    pub timeout: std::time::Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(30),
            user_agent: "Waymark-SDK/0.1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthHashResponse {
    auth_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct VisitedUrlsBody<'a> {
    visited_urls: &'a [VisitEvent],
}

#[derive(Debug, Serialize)]
struct WaypointBody<'a> {
    auth_hash: &'a str,
    waypoint: &'a serde_json::Value,
    #[serde(rename = "sortIndex")]
    sort_index: u64,
}

/// HTTP client for the backend API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl BackendClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Network` if the underlying HTTP client
    /// cannot be built with these settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DeliveryError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Fetches a fresh auth hash for the given installation.
    ///
    /// # Errors
    ///
    /// Returns `HttpStatus` for non-2xx responses, `Network`/`Timeout` for
    /// transport failures, and `MalformedResponse` when the 2xx body lacks
    /// the `auth_hash` field.
    pub async fn fetch_auth_hash(&self, base_url: &str, install_id: &str) -> Result<String> {
        let span = info_span!("fetch_auth_hash", install_id);

        async move {
            let response = self
                .http
                .get(format!("{base_url}{AUTH_HASH_PATH}"))
                .query(&[("extension_unique_id", install_id)])
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            if !status.is_success() {
                tracing::warn!(status = status.as_u16(), "auth hash request rejected");
                return Err(DeliveryError::http_status(status.as_u16()));
            }

            let body: AuthHashResponse =
                response.json().await.map_err(|_| DeliveryError::malformed("auth_hash"))?;

            match body.auth_hash {
                Some(hash) => {
                    tracing::debug!("auth hash obtained");
                    Ok(hash)
                },
                None => {
                    tracing::warn!("auth hash missing from 2xx response");
                    Err(DeliveryError::malformed("auth_hash"))
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Sends one batch of visit events.
    ///
    /// # Errors
    ///
    /// Returns `HttpStatus` for non-2xx responses and `Network`/`Timeout`
    /// for transport failures.
    pub async fn send_visited_urls(
        &self,
        base_url: &str,
        auth_hash: &str,
        events: &[VisitEvent],
    ) -> Result<()> {
        let span = info_span!("send_visited_urls", count = events.len());

        async move {
            let response = self
                .http
                .post(format!("{base_url}{VISITED_URLS_PATH}"))
                .query(&[("auth_hash", auth_hash)])
                .json(&VisitedUrlsBody { visited_urls: events })
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            if status.is_success() {
                tracing::debug!("visit batch delivered");
                Ok(())
            } else {
                tracing::warn!(status = status.as_u16(), "visit batch rejected");
                Err(DeliveryError::http_status(status.as_u16()))
            }
        }
        .instrument(span)
        .await
    }

    /// Sends one waypoint with its persisted sort index.
    ///
    /// # Errors
    ///
    /// Returns `HttpStatus` for non-2xx responses and `Network`/`Timeout`
    /// for transport failures.
    pub async fn send_waypoint(
        &self,
        base_url: &str,
        auth_hash: &str,
        app_version: &str,
        waypoint: &Waypoint,
    ) -> Result<()> {
        let span = info_span!("send_waypoint", sequence = waypoint.sequence);

        async move {
            let response = self
                .http
                .post(format!("{base_url}{WAYPOINTS_PATH}"))
                .query(&[("auth_hash", auth_hash), ("os", OS_TAG), ("version", app_version)])
                .json(&WaypointBody {
                    auth_hash,
                    waypoint: &waypoint.payload,
                    sort_index: waypoint.sequence,
                })
                .send()
                .await
                .map_err(|e| self.transport_error(e))?;

            let status = response.status();
            if status.is_success() {
                tracing::debug!("waypoint delivered");
                Ok(())
            } else {
                tracing::warn!(status = status.as_u16(), "waypoint rejected");
                Err(DeliveryError::http_status(status.as_u16()))
            }
        }
        .instrument(span)
        .await
    }

    fn transport_error(&self, error: reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::timeout(self.config.timeout.as_secs())
        } else {
            DeliveryError::network(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn fetch_auth_hash_success() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path(AUTH_HASH_PATH))
            .and(matchers::query_param("extension_unique_id", "abc-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth_hash": "h1"})))
            .mount(&server)
            .await;

        let client = BackendClient::with_defaults().unwrap();
        let hash = client.fetch_auth_hash(&server.uri(), "abc-123").await.unwrap();
        assert_eq!(hash, "h1");
    }

    #[tokio::test]
    async fn fetch_auth_hash_missing_field_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path(AUTH_HASH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"other": 1})))
            .mount(&server)
            .await;

        let client = BackendClient::with_defaults().unwrap();
        let result = client.fetch_auth_hash(&server.uri(), "abc-123").await;
        assert!(matches!(result, Err(DeliveryError::MalformedResponse { field: "auth_hash" })));
    }

    #[tokio::test]
    async fn fetch_auth_hash_non_2xx_is_status_error() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("GET"))
            .and(matchers::path(AUTH_HASH_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = BackendClient::with_defaults().unwrap();
        let result = client.fetch_auth_hash(&server.uri(), "abc-123").await;
        assert!(matches!(result, Err(DeliveryError::HttpStatus { status: 503 })));
    }

    #[tokio::test]
    async fn visited_urls_body_shape() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path(VISITED_URLS_PATH))
            .and(matchers::query_param("auth_hash", "h1"))
            .and(matchers::body_partial_json(json!({
                "visited_urls": [{"url": "https://a", "title": "A"}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let events = vec![VisitEvent {
            url: "https://a".into(),
            title: "A".into(),
            timestamp_utc: "2025-01-01 00:00:00.000000".into(),
            time_zone_offset: "+00:00".into(),
        }];

        let client = BackendClient::with_defaults().unwrap();
        client.send_visited_urls(&server.uri(), "h1", &events).await.unwrap();
    }

    #[tokio::test]
    async fn waypoint_query_and_body_shape() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path(WAYPOINTS_PATH))
            .and(matchers::query_param("auth_hash", "h1"))
            .and(matchers::query_param("os", "ios"))
            .and(matchers::query_param("version", "3.2.0"))
            .and(matchers::body_partial_json(json!({
                "auth_hash": "h1",
                "waypoint": {"kind": "ping"},
                "sortIndex": 41
            })))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let waypoint = Waypoint { payload: json!({"kind": "ping"}), sequence: 41 };

        let client = BackendClient::with_defaults().unwrap();
        client.send_waypoint(&server.uri(), "h1", "3.2.0", &waypoint).await.unwrap();
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        // Port 1 is never listening
        let client = BackendClient::with_defaults().unwrap();
        let waypoint = Waypoint { payload: json!({}), sequence: 0 };

        let result = client.send_waypoint("http://127.0.0.1:1", "h", "1.0", &waypoint).await;
        assert!(matches!(result, Err(DeliveryError::Network { .. })));
    }
}
