//! Container image repository for the compute workload.

use keel_config::{EnvironmentConfig, RemovalPolicy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::{ConstructError, ConstructResult};
use crate::resource::{Construct, Resource};
use crate::token::Token;

/// Images kept per repository; older ones expire.
pub const MAX_IMAGE_COUNT: u32 = 10;

const REPOSITORY_ID: &str = "LambdaRepository";

/// How a consumer addresses an image repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub name: Token,
    pub uri: Token,
}

impl RepositoryRef {
    /// Reference a repository created outside of this deployment.
    pub fn external(name: &str) -> Self {
        Self {
            name: Token::literal(name),
            uri: Token::join(
                "",
                vec![
                    Token::account_id(),
                    Token::literal(".dkr.ecr."),
                    Token::region(),
                    Token::literal("."),
                    Token::url_suffix(),
                    Token::literal(format!("/{}", name)),
                ],
            ),
        }
    }
}

/// One repository per stage, scanned on push, with bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRepository {
    pub repository_name: String,
    pub scan_on_push: bool,
    pub max_image_count: u32,
    pub removal_policy: RemovalPolicy,
}

impl ImageRepository {
    /// Repository `<app>-lambda-<stage>`.
    pub fn build(app: &str, config: &EnvironmentConfig) -> ConstructResult<Self> {
        if app.is_empty()
            || !app
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConstructError::InvalidOverride {
                construct: REPOSITORY_ID.to_string(),
                message: format!("'{}' is not a valid repository prefix", app),
            });
        }

        let removal_policy = if config.is_protected() {
            RemovalPolicy::Retain
        } else {
            RemovalPolicy::Destroy
        };

        let repository_name = format!("{}-lambda-{}", app, config.stage.as_str());
        info!("Image repository {} ({:?} on removal)", repository_name, removal_policy);

        Ok(Self {
            repository_name,
            scan_on_push: true,
            max_image_count: MAX_IMAGE_COUNT,
            removal_policy,
        })
    }

    pub fn reference(&self) -> RepositoryRef {
        RepositoryRef {
            name: Token::reference(REPOSITORY_ID),
            uri: Token::get_att(REPOSITORY_ID, "RepositoryUri"),
        }
    }

    fn lifecycle_policy(&self) -> String {
        json!({
            "rules": [{
                "rulePriority": 1,
                "description": format!("Keep only the last {} images", self.max_image_count),
                "selection": {
                    "tagStatus": "any",
                    "countType": "imageCountMoreThan",
                    "countNumber": self.max_image_count,
                },
                "action": { "type": "expire" },
            }]
        })
        .to_string()
    }
}

impl Construct for ImageRepository {
    fn id(&self) -> &str {
        REPOSITORY_ID
    }

    fn resources(&self) -> Vec<Resource> {
        vec![Resource::new(
            REPOSITORY_ID,
            "AWS::ECR::Repository",
            json!({
                "RepositoryName": self.repository_name,
                "ImageScanningConfiguration": { "ScanOnPush": self.scan_on_push },
                "LifecyclePolicy": { "LifecyclePolicyText": self.lifecycle_policy() },
                "EmptyOnDelete": self.removal_policy == RemovalPolicy::Destroy,
            }),
        )
        .with_removal_policy(self.removal_policy)]
    }
}
