//! Compute stack: the function, its alias and API, and their alarms.

use keel_constructs::{
    ComputeEndpoint, ComputeOptions, ComputeOutputs, ImageReference, RepositoryRef,
};

use crate::error::{CoreError, CoreResult};
use crate::outputs::keys;
use crate::scope::Exported;
use crate::stack::StackId;
use crate::stacks::{DatabaseStackOutputs, ImageRepoStackOutputs, NetworkStackOutputs, COMPUTE_STACK};
use crate::stage::StageBuilder;

/// Where the function image comes from.
#[derive(Debug, Clone)]
pub enum RepositorySource<'a> {
    /// The stage's own image repository stack.
    Stack(&'a ImageRepoStackOutputs),
    /// A repository created outside of this deployment, by name.
    External(String),
}

#[derive(Debug, Clone)]
pub struct ComputeStackOutputs {
    pub stack: StackId,
    pub endpoint: Exported<ComputeOutputs>,
}

/// Declare the compute stack.
///
/// The stack depends on the network, on the database stack when there is one,
/// and on the image repository stack unless the repository is external. When
/// `bound_database` is set the function receives that database's secret and
/// port grant.
pub fn declare_compute(
    builder: &mut StageBuilder,
    network: &NetworkStackOutputs,
    repository: RepositorySource<'_>,
    database_stack: Option<&DatabaseStackOutputs>,
    bound_database: Option<&str>,
    image: &ImageReference,
    options: &ComputeOptions,
) -> CoreResult<ComputeStackOutputs> {
    let config = builder.config().clone();

    let bound = match bound_database {
        Some(name) => Some(
            database_stack
                .and_then(|stack| stack.get(name))
                .ok_or_else(|| CoreError::UnknownDatabase(name.to_string()))?,
        ),
        None => None,
    };

    let mut depends_on = vec![&network.stack];
    if let Some(stack) = database_stack {
        depends_on.push(&stack.stack);
    }
    if let RepositorySource::Stack(repo) = &repository {
        depends_on.push(&repo.stack);
    }

    builder.declare_stack(COMPUTE_STACK, &depends_on, |scope| {
        let placement = scope.import(&network.compute);
        let repository_ref = match &repository {
            RepositorySource::Stack(repo) => scope.import(&repo.repository),
            RepositorySource::External(name) => RepositoryRef::external(name),
        };
        let database = bound.map(|exported| scope.import(exported));

        let endpoint = ComputeEndpoint::build(
            &config,
            &placement,
            &repository_ref,
            image,
            database.as_ref(),
            options,
        )?;
        scope.add_construct(&endpoint);

        let local = endpoint.outputs();
        let api_url = scope.export(keys::API_URL, local.api_url, "REST API base URL");
        let function_arn = scope.export(keys::FUNCTION_ARN, local.function_arn, "Function ARN");

        let shared = ComputeOutputs {
            function_name: local.function_name,
            function_arn: scope.import(&function_arn),
            api_url: scope.import(&api_url),
        };
        Ok(ComputeStackOutputs {
            stack: scope.id().clone(),
            endpoint: scope.share(shared),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stacks::{declare_database, declare_image_repo, declare_network};
    use keel_config::{resolve, DatabaseSpec};
    use keel_constructs::Token;

    fn image() -> ImageReference {
        ImageReference::parse("v1.0.0").unwrap()
    }

    #[test]
    fn test_compute_depends_on_everything_it_reads() {
        let mut builder = StageBuilder::new("keel", resolve("dev"));
        let network = declare_network(&mut builder).unwrap();
        let repo = declare_image_repo(&mut builder, "keel").unwrap();
        let databases =
            declare_database(&mut builder, &network, &[DatabaseSpec::new("demo")], None).unwrap();

        let compute = declare_compute(
            &mut builder,
            &network,
            RepositorySource::Stack(&repo),
            Some(&databases),
            Some("demo"),
            &image(),
            &ComputeOptions::new("keel_demo"),
        )
        .unwrap();
        assert_eq!(
            compute.endpoint.value().api_url,
            Token::Import("dev-api-url".to_string())
        );

        let stage = builder.finish();
        let deps: Vec<&str> = stage
            .stack(COMPUTE_STACK)
            .unwrap()
            .dependencies
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(deps, vec!["Network", "Database", "ImageRepo"]);
    }

    #[test]
    fn test_external_repository_needs_no_repo_stack() {
        let mut builder = StageBuilder::new("keel", resolve("dev"));
        let network = declare_network(&mut builder).unwrap();

        declare_compute(
            &mut builder,
            &network,
            RepositorySource::External("shared-images".to_string()),
            None,
            None,
            &image(),
            &ComputeOptions::new("keel_demo"),
        )
        .unwrap();

        let stage = builder.finish();
        assert_eq!(
            stage.stack(COMPUTE_STACK).unwrap().dependencies,
            vec![network.stack]
        );
    }

    #[test]
    fn test_binding_to_missing_database_fails() {
        let mut builder = StageBuilder::new("keel", resolve("dev"));
        let network = declare_network(&mut builder).unwrap();

        let err = declare_compute(
            &mut builder,
            &network,
            RepositorySource::External("shared-images".to_string()),
            None,
            Some("ghost"),
            &image(),
            &ComputeOptions::new("keel_demo"),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UnknownDatabase(name) if name == "ghost"));
    }
}
