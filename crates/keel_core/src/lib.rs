//! # keel_core
//!
//! Stack orchestration for Keel.
//!
//! This crate turns an environment configuration and a deployment manifest into
//! a stage: a set of stacks wired together through exported values, ordered by
//! an explicit dependency graph, and synthesized into templates for an external
//! provisioning engine.
//!
//! # Architecture
//!
//! - **Stacks**: independently provisionable bundles of constructs
//! - **Graph**: acyclic dependency graph with a deterministic build order
//! - **Scope**: typed [`Exported`] values are the only way across a stack boundary
//! - **Outputs**: per-stage registry of `<stage>-<key>` export names
//! - **Assembly**: templates plus manifest, written to disk or fed to an engine
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_config::{resolve, DeploymentManifest};
//! use keel_core::{compose_stage, provision, DryRunEngine};
//!
//! let manifest = DeploymentManifest::from_file(Path::new("keel.yaml"))?.with_image("v1.4.0");
//! let stage = compose_stage(&resolve("prod"), &manifest)?;
//!
//! for stack in stage.build_order() {
//!     println!("{}", stack.stack_name);
//! }
//!
//! let report = provision(&DryRunEngine, &stage.synthesize()).await?;
//! ```

pub mod assembly;
pub mod compose;
pub mod engine;
pub mod error;
pub mod graph;
pub mod outputs;
pub mod scope;
pub mod stack;
pub mod stacks;
pub mod stage;

// Re-export main types for convenience
pub use assembly::{AssemblyManifest, AssemblyWriter, CloudAssembly, StackArtifact, MANIFEST_FILE};
pub use compose::{compose_app, compose_stage};
pub use engine::{
    provision, DryRunEngine, ProvisionReport, ProvisioningEngine, RecordingEngine,
    StackDeployment, StackReport, StackStatus,
};
pub use error::{CoreError, CoreResult};
pub use graph::StackGraph;
pub use outputs::{export_name, keys, OutputRecord, OutputRegistry};
pub use scope::{Exported, StackScope};
pub use stack::{Stack, StackId};
pub use stacks::{
    ComputeStackOutputs, DatabaseStackOutputs, ImageRepoStackOutputs, NetworkStackOutputs,
    RepositorySource,
};
pub use stage::{App, Stage, StageBuilder};
