//! Cloud assembly: the synthesized output handed to a provisioning engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keel_config::StageName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::stack::StackId;
use crate::stage::Stage;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Per-stack entry of the assembly manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackArtifact {
    pub stack_name: String,
    pub template_file: String,
    /// Physical names of the stacks this one depends on.
    pub dependencies: Vec<String>,
    pub exports: Vec<String>,
    pub resource_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub app: String,
    pub stage: StageName,
    pub region: String,
    pub account: Option<String>,
    /// Physical stack names, dependencies first.
    pub build_order: Vec<String>,
    pub stacks: Vec<StackArtifact>,
}

/// Templates plus manifest for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudAssembly {
    pub manifest: AssemblyManifest,
    /// Templates keyed by physical stack name.
    pub templates: BTreeMap<String, Value>,
}

impl CloudAssembly {
    pub(crate) fn from_stage(stage: &Stage) -> Self {
        let name_of = |id: &StackId| {
            stage
                .stacks()
                .iter()
                .find(|s| &s.id == id)
                .map(|s| s.stack_name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        let mut templates = BTreeMap::new();
        let mut stacks = Vec::new();
        for stack in stage.build_order() {
            templates.insert(stack.stack_name.clone(), stack.to_template());
            stacks.push(StackArtifact {
                stack_name: stack.stack_name.clone(),
                template_file: stack.template_file(),
                dependencies: stack.dependencies.iter().map(&name_of).collect(),
                exports: stack.exports.iter().map(|e| e.export_name.clone()).collect(),
                resource_count: stack.resources.len(),
            });
        }

        let manifest = AssemblyManifest {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            app: stage.app().to_string(),
            stage: stage.name(),
            region: stage.config().region.clone(),
            account: stage.config().account.clone(),
            build_order: stacks.iter().map(|s| s.stack_name.clone()).collect(),
            stacks,
        };

        info!(
            "Synthesized stage {} ({} stacks, run {})",
            manifest.stage,
            manifest.stacks.len(),
            manifest.run_id
        );
        Self {
            manifest,
            templates,
        }
    }

    pub fn template(&self, stack_name: &str) -> Option<&Value> {
        self.templates.get(stack_name)
    }

    pub fn artifact(&self, stack_name: &str) -> Option<&StackArtifact> {
        self.manifest
            .stacks
            .iter()
            .find(|s| s.stack_name == stack_name)
    }
}

/// Writes assemblies to disk.
pub struct AssemblyWriter;

impl AssemblyWriter {
    /// Write `manifest.json` and one template per stack into `dir`.
    ///
    /// Returns the paths written, manifest first.
    pub async fn write(assembly: &CloudAssembly, dir: &Path) -> CoreResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir).await?;

        let manifest_path = dir.join(MANIFEST_FILE);
        debug!("Writing assembly manifest to {:?}", manifest_path);
        tokio::fs::write(&manifest_path, serde_json::to_vec_pretty(&assembly.manifest)?).await?;

        let mut written = vec![manifest_path];
        for artifact in &assembly.manifest.stacks {
            let template = assembly.template(&artifact.stack_name).ok_or_else(|| {
                CoreError::Serialization(format!(
                    "assembly has no template for stack {}",
                    artifact.stack_name
                ))
            })?;
            let path = dir.join(&artifact.template_file);
            debug!("Writing template to {:?}", path);
            tokio::fs::write(&path, serde_json::to_vec_pretty(template)?).await?;
            written.push(path);
        }

        info!("Wrote {} files to {:?}", written.len(), dir);
        Ok(written)
    }

    /// Read an assembly back from `dir`.
    pub async fn read(dir: &Path) -> CoreResult<CloudAssembly> {
        let manifest: AssemblyManifest =
            serde_json::from_slice(&tokio::fs::read(dir.join(MANIFEST_FILE)).await?)?;

        let mut templates: BTreeMap<String, Value> = BTreeMap::new();
        for artifact in &manifest.stacks {
            let content = tokio::fs::read(dir.join(&artifact.template_file)).await?;
            templates.insert(artifact.stack_name.clone(), serde_json::from_slice(&content)?);
        }

        Ok(CloudAssembly {
            manifest,
            templates,
        })
    }
}
