//! # keel_config
//!
//! Environment configuration for Keel deployments.
//!
//! A stage name (`dev`, `prod`) resolves to a complete, immutable
//! [`EnvironmentConfig`]. Unknown names resolve to the `dev` record instead of
//! failing. The [`DeploymentManifest`] describes what gets deployed into a
//! stage and is loaded from `keel.yaml`.
//!
//! ## Example
//!
//! ```rust
//! use keel_config::{resolve, RemovalPolicy, StageName};
//!
//! let prod = resolve("prod");
//! assert_eq!(prod.stage, StageName::Prod);
//! assert_eq!(prod.database.removal_policy, RemovalPolicy::Snapshot);
//!
//! // Unknown stages degrade to development.
//! assert_eq!(resolve("staging").stage, StageName::Dev);
//! ```

pub mod ambient;
pub mod environment;
pub mod error;
pub mod manifest;
pub mod table;

pub use ambient::AmbientContext;
pub use environment::{
    ComputeConfig, DatabaseConfig, EnvironmentConfig, MonitoringConfig, RemovalPolicy, SafetyTier,
    StageName, VpcConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use manifest::{DatabaseSpec, DeploymentManifest, WorkloadSpec, MANIFEST_FILE};
pub use table::{resolve, resolve_with, EnvironmentTable, DEFAULT_ALERT_EMAIL, DEFAULT_REGION};
