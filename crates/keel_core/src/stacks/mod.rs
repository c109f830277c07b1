//! Builders for the stacks of a stage.
//!
//! Each builder declares one stack on a [`StageBuilder`](crate::StageBuilder)
//! and returns the [`Exported`](crate::Exported) values later stacks need.

pub mod compute;
pub mod database;
pub mod image_repo;
pub mod network;

pub use compute::{declare_compute, ComputeStackOutputs, RepositorySource};
pub use database::{declare_database, DatabaseStackOutputs};
pub use image_repo::{declare_image_repo, ImageRepoStackOutputs};
pub use network::{declare_network, NetworkStackOutputs};

pub const NETWORK_STACK: &str = "Network";
pub const IMAGE_REPO_STACK: &str = "ImageRepo";
pub const DATABASE_STACK: &str = "Database";
pub const COMPUTE_STACK: &str = "Compute";
