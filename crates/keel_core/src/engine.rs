//! Provisioning engine seam.
//!
//! Applying templates to a cloud account is the job of an external engine.
//! [`provision`] feeds it one stack at a time in build order and stops at the
//! first failure, so no stack is ever applied before its dependencies.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use crate::assembly::CloudAssembly;
use crate::error::{CoreError, CoreResult};

/// One stack as handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDeployment {
    pub stack_name: String,
    pub template: Value,
    pub dependencies: Vec<String>,
}

impl StackDeployment {
    pub fn resource_count(&self) -> usize {
        self.template
            .get("Resources")
            .and_then(Value::as_object)
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    /// The engine applied the template.
    Applied,
    /// The engine only reported what it would do.
    Planned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackReport {
    pub stack_name: String,
    pub status: StackStatus,
    pub resource_count: usize,
    pub finished_at: DateTime<Utc>,
}

impl StackReport {
    pub fn new(stack: &StackDeployment, status: StackStatus) -> Self {
        Self {
            stack_name: stack.stack_name.clone(),
            status,
            resource_count: stack.resource_count(),
            finished_at: Utc::now(),
        }
    }
}

/// Outcome of a provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub run_id: Uuid,
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stacks: Vec<StackReport>,
}

/// Something that can apply a stack template.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply_stack(&self, stack: &StackDeployment) -> CoreResult<StackReport>;
}

/// Apply every stack of `assembly` in build order.
pub async fn provision(
    engine: &dyn ProvisioningEngine,
    assembly: &CloudAssembly,
) -> CoreResult<ProvisionReport> {
    let started_at = Utc::now();
    info!(
        "Provisioning {} stacks of stage {} with {} engine",
        assembly.manifest.build_order.len(),
        assembly.manifest.stage,
        engine.name()
    );

    let mut reports = Vec::with_capacity(assembly.manifest.build_order.len());
    for stack_name in &assembly.manifest.build_order {
        let artifact = assembly
            .artifact(stack_name)
            .ok_or_else(|| CoreError::UnknownStack(stack_name.clone()))?;
        let template = assembly
            .template(stack_name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownStack(stack_name.clone()))?;

        let deployment = StackDeployment {
            stack_name: stack_name.clone(),
            template,
            dependencies: artifact.dependencies.clone(),
        };

        match engine.apply_stack(&deployment).await {
            Ok(report) => {
                info!("Stack {} {:?}", stack_name, report.status);
                reports.push(report);
            }
            Err(e) => {
                error!("Stack {} failed: {}", stack_name, e);
                return Err(match e {
                    err @ CoreError::Provisioning { .. } => err,
                    other => CoreError::Provisioning {
                        stack: stack_name.clone(),
                        message: other.to_string(),
                    },
                });
            }
        }
    }

    Ok(ProvisionReport {
        run_id: assembly.manifest.run_id,
        engine: engine.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        stacks: reports,
    })
}

/// Engine that only logs what would be applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunEngine;

#[async_trait]
impl ProvisioningEngine for DryRunEngine {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn apply_stack(&self, stack: &StackDeployment) -> CoreResult<StackReport> {
        info!(
            "[dry-run] Would deploy {} ({} resources) after [{}]",
            stack.stack_name,
            stack.resource_count(),
            stack.dependencies.join(", ")
        );
        Ok(StackReport::new(stack, StackStatus::Planned))
    }
}

/// Engine that records applied stacks, for tests.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    applied: Arc<RwLock<Vec<StackDeployment>>>,
    fail_on: Arc<RwLock<Option<String>>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail when asked to apply `stack_name`.
    pub fn fail_on(self, stack_name: impl Into<String>) -> Self {
        *self.fail_on.write() = Some(stack_name.into());
        self
    }

    pub fn applied(&self) -> Vec<StackDeployment> {
        self.applied.read().clone()
    }

    pub fn applied_names(&self) -> Vec<String> {
        self.applied
            .read()
            .iter()
            .map(|s| s.stack_name.clone())
            .collect()
    }

    pub fn apply_count(&self) -> usize {
        self.applied.read().len()
    }
}

#[async_trait]
impl ProvisioningEngine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn apply_stack(&self, stack: &StackDeployment) -> CoreResult<StackReport> {
        if self.fail_on.read().as_deref() == Some(stack.stack_name.as_str()) {
            return Err(CoreError::Provisioning {
                stack: stack.stack_name.clone(),
                message: "simulated failure".to_string(),
            });
        }
        self.applied.write().push(stack.clone());
        Ok(StackReport::new(stack, StackStatus::Applied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageBuilder;
    use keel_config::resolve;
    use keel_constructs::Token;

    fn assembly() -> CloudAssembly {
        let mut builder = StageBuilder::new("keel", resolve("dev"));
        let vpc = builder
            .declare_stack("Network", &[], |scope| {
                Ok(scope.export("vpc-id", Token::reference("Vpc"), "VPC"))
            })
            .unwrap();
        let network = builder.stack_id("Network");
        builder
            .declare_stack("Database", &[&network], |scope| {
                scope.import(&vpc);
                Ok(())
            })
            .unwrap();
        builder.finish().synthesize()
    }

    #[tokio::test]
    async fn test_stacks_are_applied_in_build_order() {
        let engine = RecordingEngine::new();
        let report = provision(&engine, &assembly()).await.unwrap();

        assert_eq!(
            engine.applied_names(),
            vec!["keel-dev-Network", "keel-dev-Database"]
        );
        assert_eq!(report.stacks.len(), 2);
        assert!(report.stacks.iter().all(|s| s.status == StackStatus::Applied));
        assert_eq!(engine.applied()[1].dependencies, vec!["keel-dev-Network"]);
    }

    #[tokio::test]
    async fn test_failure_stops_dependents() {
        let engine = RecordingEngine::new().fail_on("keel-dev-Network");
        let err = provision(&engine, &assembly()).await.unwrap_err();

        assert!(matches!(err, CoreError::Provisioning { ref stack, .. } if stack == "keel-dev-Network"));
        assert_eq!(engine.apply_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_plans_everything() {
        let report = provision(&DryRunEngine, &assembly()).await.unwrap();
        assert_eq!(report.engine, "dry-run");
        assert!(report.stacks.iter().all(|s| s.status == StackStatus::Planned));
    }

    #[tokio::test]
    async fn test_engine_errors_are_wrapped_as_provisioning_failures() {
        let mut engine = MockProvisioningEngine::new();
        engine.expect_name().return_const("mock");
        engine
            .expect_apply_stack()
            .times(1)
            .returning(|_| Err(CoreError::Serialization("quota exceeded".to_string())));

        let err = provision(&engine, &assembly()).await.unwrap_err();
        match err {
            CoreError::Provisioning { stack, message } => {
                assert_eq!(stack, "keel-dev-Network");
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("expected provisioning error, got {:?}", other),
        }
    }
}
