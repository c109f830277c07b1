//! # keel_constructs
//!
//! Reusable cloud resource constructs for Keel.
//!
//! A construct is a parameterized unit that expands into template resources.
//! Constructs know nothing about stacks or stages; they take an
//! [`EnvironmentConfig`](keel_config::EnvironmentConfig) plus typed inputs and
//! return a value that can be rendered with [`Construct::resources`].
//!
//! # Constructs
//!
//! - **Network**: VPC with public, compute and database subnet groups
//! - **Database**: PostgreSQL instance with generated credentials
//! - **Compute**: container-image function, `live` alias and REST API
//! - **Image repository**: per-stage registry with bounded history
//! - **Monitoring**: alert topic and alarms, owned by database and compute
//!
//! # Example
//!
//! ```rust
//! use keel_config::resolve;
//! use keel_constructs::{Construct, DatabaseOverrides, ManagedDatabase, NetworkTopology};
//!
//! let config = resolve("prod");
//! let network = NetworkTopology::build(&config).unwrap();
//! let database = ManagedDatabase::build(
//!     "orders",
//!     &config,
//!     &network.database_placement(),
//!     &DatabaseOverrides::default(),
//!     None,
//! )
//! .unwrap();
//!
//! assert_eq!(database.instance.max_allocated_storage_gb, 200);
//! assert!(!database.resources().is_empty());
//! ```

pub mod cidr;
pub mod compute;
pub mod database;
pub mod error;
pub mod image_repo;
pub mod monitoring;
pub mod network;
pub mod resource;
pub mod security;
pub mod token;

pub use cidr::CidrBlock;
pub use compute::{
    ComputeEndpoint, ComputeOptions, ComputeOutputs, CorsPolicy, ImageReference, PortGrant,
    SecretReadGrant,
};
pub use database::{DatabaseOutputs, DatabaseOverrides, InstanceClass, ManagedDatabase};
pub use error::{ConstructError, ConstructResult};
pub use image_repo::{ImageRepository, RepositoryRef};
pub use monitoring::{Alarm, AlarmKind, Monitoring};
pub use network::{NetworkTopology, Placement, SubnetRole};
pub use resource::{ensure_unique, logical_id, Construct, Resource};
pub use security::{SecurityGroup, SecurityGroupRef};
pub use token::{imported_names, Token};
