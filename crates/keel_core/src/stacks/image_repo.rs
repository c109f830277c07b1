//! Per-stage image repository stack.

use keel_constructs::{ImageRepository, RepositoryRef, Token};

use crate::error::CoreResult;
use crate::outputs::keys;
use crate::scope::Exported;
use crate::stack::StackId;
use crate::stacks::IMAGE_REPO_STACK;
use crate::stage::StageBuilder;

#[derive(Debug, Clone)]
pub struct ImageRepoStackOutputs {
    pub stack: StackId,
    pub repository: Exported<RepositoryRef>,
}

pub fn declare_image_repo(builder: &mut StageBuilder, app: &str) -> CoreResult<ImageRepoStackOutputs> {
    let repository = ImageRepository::build(app, builder.config())?;

    builder.declare_stack(IMAGE_REPO_STACK, &[], |scope| {
        scope.add_construct(&repository);
        let local = repository.reference();
        let uri = scope.export(keys::ECR_URI, local.uri, "Image repository URI");

        // The physical name is fixed at build time, so only the URI needs an import.
        let reference = RepositoryRef {
            name: Token::literal(&repository.repository_name),
            uri: scope.import(&uri),
        };

        Ok(ImageRepoStackOutputs {
            stack: scope.id().clone(),
            repository: scope.share(reference),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::resolve;

    #[test]
    fn test_repository_uri_is_exported() {
        let mut builder = StageBuilder::new("keel", resolve("prod"));
        let repo = declare_image_repo(&mut builder, "keel").unwrap();

        let reference = repo.repository.value();
        assert_eq!(reference.name, Token::literal("keel-lambda-prod"));
        assert_eq!(reference.uri, Token::Import("prod-ecr-uri".to_string()));

        let stage = builder.finish();
        let record = stage.outputs().get("prod-ecr-uri").unwrap();
        assert_eq!(record.stack.name, IMAGE_REPO_STACK);
    }
}
