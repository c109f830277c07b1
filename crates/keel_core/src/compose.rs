//! Standard stage layout.
//!
//! ```text
//! Network ──┬──────────────► Database ──┐
//!           │                           ▼
//!           └──────────────────────► Compute
//! ImageRepo ────────────────────────────┘
//! ```
//!
//! `ImageRepo` is left out when the workload names an external repository and
//! `Database` when the manifest declares no databases.

use keel_config::{AmbientContext, DeploymentManifest, EnvironmentConfig, EnvironmentTable};
use keel_constructs::{ComputeOptions, ImageReference};
use tracing::info;

use crate::error::CoreResult;
use crate::stacks::{
    declare_compute, declare_database, declare_image_repo, declare_network, RepositorySource,
};
use crate::stage::{App, Stage, StageBuilder};

fn compute_options(manifest: &DeploymentManifest) -> ComputeOptions {
    let workload = &manifest.workload;
    ComputeOptions {
        canary: workload.canary,
        cors_allow_origins: workload.cors_allow_origins.clone(),
        cors_allow_headers: workload.cors_allow_headers.clone(),
        alert_email: manifest.alert_email.clone(),
        ..ComputeOptions::new(&workload.function_name)
    }
}

/// Compose every stack of one stage.
///
/// Fails without returning a partial stage if the manifest is invalid, if no
/// image reference was supplied, or if any stack cannot be built.
pub fn compose_stage(config: &EnvironmentConfig, manifest: &DeploymentManifest) -> CoreResult<Stage> {
    manifest.validate()?;
    let image = ImageReference::parse(manifest.workload.image.as_deref().unwrap_or_default())?;

    info!(
        "Composing stage {} of {} in {} (image {})",
        config.stage, manifest.app, config.region, image
    );

    let mut builder = StageBuilder::new(&manifest.app, config.clone());
    let network = declare_network(&mut builder)?;

    let repo = match &manifest.workload.repository {
        Some(_) => None,
        None => Some(declare_image_repo(&mut builder, &manifest.app)?),
    };

    let databases = if manifest.databases.is_empty() {
        None
    } else {
        Some(declare_database(
            &mut builder,
            &network,
            &manifest.databases,
            manifest.alert_email.as_deref(),
        )?)
    };

    let repository = match &repo {
        Some(repo) => RepositorySource::Stack(repo),
        None => RepositorySource::External(manifest.workload.repository.clone().unwrap_or_default()),
    };

    declare_compute(
        &mut builder,
        &network,
        repository,
        databases.as_ref(),
        manifest.workload.database.as_deref(),
        &image,
        &compute_options(manifest),
    )?;

    Ok(builder.finish())
}

/// Compose every stage in `stages` against `table`.
pub fn compose_app(
    table: &EnvironmentTable,
    manifest: &DeploymentManifest,
    stages: &[String],
    ambient: &AmbientContext,
) -> CoreResult<App> {
    let mut app = App::new();
    for stage_name in stages {
        let config = table.resolve_with(stage_name, ambient);
        app.add_stage(compose_stage(&config, manifest)?)?;
    }
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::stacks::{COMPUTE_STACK, DATABASE_STACK, IMAGE_REPO_STACK, NETWORK_STACK};
    use keel_config::resolve;
    use keel_constructs::ConstructError;

    fn manifest() -> DeploymentManifest {
        DeploymentManifest::default().with_image("v1.0.0")
    }

    fn order(stage: &Stage) -> Vec<&str> {
        stage
            .build_order()
            .iter()
            .map(|s| s.id.name.as_str())
            .collect()
    }

    #[test]
    fn test_default_layout() {
        let stage = compose_stage(&resolve("dev"), &manifest()).unwrap();
        assert_eq!(
            order(&stage),
            vec![NETWORK_STACK, IMAGE_REPO_STACK, DATABASE_STACK, COMPUTE_STACK]
        );
        assert_eq!(stage.graph().edges().len(), 4);
    }

    #[test]
    fn test_external_repository_and_no_databases() {
        let mut manifest = manifest();
        manifest.workload.repository = Some("shared-images".to_string());
        manifest.workload.database = None;
        manifest.databases.clear();

        let stage = compose_stage(&resolve("prod"), &manifest).unwrap();
        assert_eq!(order(&stage), vec![NETWORK_STACK, COMPUTE_STACK]);
        assert!(stage.outputs().get("prod-ecr-uri").is_none());
    }

    #[test]
    fn test_missing_image_is_fatal() {
        let err = compose_stage(&resolve("dev"), &DeploymentManifest::default()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Construct(ConstructError::MissingWorkload)
        ));
    }

    #[test]
    fn test_compose_app_keeps_stages_apart() {
        let app = compose_app(
            &EnvironmentTable::standard(),
            &manifest(),
            &["dev".to_string(), "prod".to_string()],
            &AmbientContext::default(),
        )
        .unwrap();
        assert_eq!(app.stages().len(), 2);
    }

    #[test]
    fn test_unknown_stages_collapse_onto_dev() {
        let err = compose_app(
            &EnvironmentTable::standard(),
            &manifest(),
            &["dev".to_string(), "staging".to_string()],
            &AmbientContext::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateStage(name) if name == "dev"));
    }
}
