//! Core domain models and platform abstractions for the waymark SDK.
//!
//! Provides the data types exchanged with the backend, the error taxonomy,
//! the key/value config-store abstraction backing all persisted state, and
//! a clock abstraction for deterministic testing. The delivery crate builds
//! on these foundations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod store;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    Credential, CredentialOrigin, Environment, EnvironmentUpdate, InstallId, VisitEvent, Waypoint,
};
pub use store::{ConfigKey, ConfigMap, ConfigStore};
pub use time::{Clock, SystemClock, TestClock};
