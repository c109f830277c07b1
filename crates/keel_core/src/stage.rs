//! Stages: every stack of one environment, wired together.

use std::collections::BTreeSet;

use keel_config::{EnvironmentConfig, StageName};
use keel_constructs::{ensure_unique, imported_names, CidrBlock, Resource};
use tracing::{debug, info, warn};

use crate::assembly::CloudAssembly;
use crate::error::{CoreError, CoreResult};
use crate::graph::StackGraph;
use crate::outputs::{OutputRecord, OutputRegistry};
use crate::scope::StackScope;
use crate::stack::{Stack, StackId};

/// Builds one stage stack by stack.
///
/// Stacks must be declared after the stacks they depend on, which is also
/// the only way to get hold of their exports.
#[derive(Debug)]
pub struct StageBuilder {
    app: String,
    config: EnvironmentConfig,
    graph: StackGraph,
    outputs: OutputRegistry,
    stacks: Vec<Stack>,
}

impl StageBuilder {
    pub fn new(app: impl Into<String>, config: EnvironmentConfig) -> Self {
        let stage = config.stage;
        Self {
            app: app.into(),
            config,
            graph: StackGraph::new(),
            outputs: OutputRegistry::new(stage),
            stacks: Vec::new(),
        }
    }

    pub fn stage(&self) -> StageName {
        self.config.stage
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn stack_id(&self, name: &str) -> StackId {
        StackId::new(self.config.stage, name)
    }

    /// Declare a stack named `name` that depends on `depends_on`.
    ///
    /// `build` receives the stack's scope and returns whatever the stack
    /// publishes to later stacks. Fails if the stack name is taken, if a
    /// dependency is unknown, if `build` imports from a stack that is not in
    /// `depends_on` or belongs to another stage, or if an export name clashes.
    /// Imports written straight into resource properties are held to the same
    /// rule as those obtained through [`StackScope::import`].
    pub fn declare_stack<T, F>(
        &mut self,
        name: &str,
        depends_on: &[&StackId],
        build: F,
    ) -> CoreResult<T>
    where
        F: FnOnce(&mut StackScope) -> CoreResult<T>,
    {
        let id = self.stack_id(name);
        if self.graph.contains(&id) {
            return Err(CoreError::DuplicateStack(id.to_string()));
        }
        for dependency in depends_on {
            if !self.graph.contains(dependency) {
                return Err(CoreError::UnknownStack(dependency.to_string()));
            }
        }

        debug!("Building stack {}", id);
        let mut scope = StackScope::new(id.clone());
        let published = build(&mut scope)?;

        for producer in scope.consumed() {
            if producer.stage != id.stage {
                return Err(CoreError::CrossStageReference {
                    consumer: id.to_string(),
                    producer: producer.to_string(),
                });
            }
            if !depends_on.contains(&producer) {
                return Err(CoreError::UndeclaredDependency {
                    consumer: id.to_string(),
                    producer: producer.to_string(),
                });
            }
        }

        let (resources, exports) = scope.into_parts();
        ensure_unique(&resources)?;
        self.check_imports(&id, depends_on, &resources, &exports)?;
        for record in &exports {
            if self.outputs.contains(&record.export_name) {
                return Err(CoreError::DuplicateExport(record.export_name.clone()));
            }
        }

        self.graph.add_stack(id.clone())?;
        for dependency in depends_on {
            self.graph.add_dependency(&id, dependency)?;
        }
        for record in &exports {
            self.outputs.register(record.clone())?;
        }

        let mut stack = Stack::new(&self.app, id);
        stack.resources = resources;
        stack.exports = exports;
        stack.dependencies = depends_on.iter().map(|d| (*d).clone()).collect();

        info!(
            "Declared stack {} ({} resources, {} exports)",
            stack.stack_name,
            stack.resources.len(),
            stack.exports.len()
        );
        self.stacks.push(stack);
        Ok(published)
    }

    /// Every `Fn::ImportValue` in the stack must name an export of a declared
    /// dependency or of the stack itself.
    fn check_imports(
        &self,
        consumer: &StackId,
        depends_on: &[&StackId],
        resources: &[Resource],
        exports: &[OutputRecord],
    ) -> CoreResult<()> {
        let mut names = BTreeSet::new();
        for resource in resources {
            imported_names(&resource.to_template(), &mut names);
        }
        for record in exports {
            imported_names(&record.value.to_json(), &mut names);
        }

        for name in &names {
            if exports.iter().any(|r| &r.export_name == name) {
                continue;
            }
            let record = self.outputs.get(name).ok_or_else(|| CoreError::UnknownImport {
                consumer: consumer.to_string(),
                export: name.clone(),
            })?;
            if !depends_on.contains(&&record.stack) {
                return Err(CoreError::UndeclaredDependency {
                    consumer: consumer.to_string(),
                    producer: record.stack.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Declare an extra ordering edge between two already declared stacks.
    pub fn add_dependency(&mut self, dependent: &StackId, dependency: &StackId) -> CoreResult<()> {
        self.graph.add_dependency(dependent, dependency)?;
        if let Some(stack) = self.stacks.iter_mut().find(|s| &s.id == dependent) {
            if !stack.dependencies.contains(dependency) {
                stack.dependencies.push(dependency.clone());
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Stage {
        info!(
            "Stage {} composed: {} stacks, {} exports",
            self.config.stage,
            self.stacks.len(),
            self.outputs.len()
        );
        Stage {
            app: self.app,
            config: self.config,
            graph: self.graph,
            outputs: self.outputs,
            stacks: self.stacks,
        }
    }
}

/// A fully composed stage. Immutable once built.
#[derive(Debug, Clone)]
pub struct Stage {
    app: String,
    config: EnvironmentConfig,
    graph: StackGraph,
    outputs: OutputRegistry,
    stacks: Vec<Stack>,
}

impl Stage {
    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn name(&self) -> StageName {
        self.config.stage
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn graph(&self) -> &StackGraph {
        &self.graph
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    /// Stacks in declaration order.
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    pub fn stack(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.id.name == name)
    }

    /// Stacks in the order they must be provisioned.
    pub fn build_order(&self) -> Vec<&Stack> {
        self.graph
            .build_order()
            .into_iter()
            .filter_map(|id| self.stacks.iter().find(|s| &s.id == id))
            .collect()
    }

    pub fn synthesize(&self) -> CloudAssembly {
        CloudAssembly::from_stage(self)
    }
}

/// Several isolated stages of the same application.
#[derive(Debug, Default)]
pub struct App {
    stages: Vec<Stage>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage. Stages may not share a name, a stack or an export.
    pub fn add_stage(&mut self, stage: Stage) -> CoreResult<()> {
        for existing in &self.stages {
            if existing.name() == stage.name() {
                return Err(CoreError::DuplicateStage(stage.name().to_string()));
            }
            if let Some(name) = stage
                .outputs()
                .names()
                .into_iter()
                .find(|name| existing.outputs().contains(name))
            {
                return Err(CoreError::DuplicateExport(name.to_string()));
            }
            if let Some(stack) = stage.stacks().iter().find(|s| {
                existing
                    .stacks()
                    .iter()
                    .any(|e| e.stack_name == s.stack_name)
            }) {
                return Err(CoreError::DuplicateStack(stack.stack_name.clone()));
            }

            let overlapping = CidrBlock::parse(&existing.config().vpc.cidr)
                .and_then(|a| CidrBlock::parse(&stage.config().vpc.cidr).map(|b| a.overlaps(&b)))
                .unwrap_or(false);
            if overlapping {
                warn!(
                    "Stages {} and {} use overlapping network ranges ({} / {})",
                    existing.name(),
                    stage.name(),
                    existing.config().vpc.cidr,
                    stage.config().vpc.cidr
                );
            }
        }

        debug!("Adding stage {} to app", stage.name());
        self.stages.push(stage);
        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: StageName) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::resolve;
    use keel_constructs::{Resource, Token};
    use serde_json::json;

    fn builder(stage: &str) -> StageBuilder {
        StageBuilder::new("keel", resolve(stage))
    }

    #[test]
    fn test_outputs_flow_through_declared_dependency() {
        let mut builder = builder("dev");
        let vpc = builder
            .declare_stack("Network", &[], |scope| {
                Ok(scope.export("vpc-id", Token::reference("Vpc"), "VPC"))
            })
            .unwrap();

        let network = builder.stack_id("Network");
        let consumed = builder
            .declare_stack("Database", &[&network], |scope| Ok(scope.import(&vpc)))
            .unwrap();
        assert_eq!(consumed, Token::Import("dev-vpc-id".to_string()));

        let stage = builder.finish();
        let order: Vec<&str> = stage
            .build_order()
            .iter()
            .map(|s| s.id.name.as_str())
            .collect();
        assert_eq!(order, vec!["Network", "Database"]);
    }

    #[test]
    fn test_undeclared_consumption_is_fatal() {
        let mut builder = builder("dev");
        let vpc = builder
            .declare_stack("Network", &[], |scope| {
                Ok(scope.export("vpc-id", Token::reference("Vpc"), "VPC"))
            })
            .unwrap();

        let err = builder
            .declare_stack("Database", &[], |scope| Ok(scope.import(&vpc)))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::UndeclaredDependency { ref consumer, ref producer }
                if consumer == "dev/Database" && producer == "dev/Network"
        ));

        // Nothing of the rejected stack was kept.
        let stage = builder.finish();
        assert!(stage.stack("Database").is_none());
        assert_eq!(stage.outputs().len(), 1);
    }

    struct Raw(Vec<Resource>);

    impl keel_constructs::Construct for Raw {
        fn id(&self) -> &str {
            "raw"
        }
        fn resources(&self) -> Vec<Resource> {
            self.0.clone()
        }
    }

    fn subnet_group(vpc: Token) -> Raw {
        Raw(vec![Resource::new(
            "SubnetGroup",
            "AWS::RDS::DBSubnetGroup",
            json!({ "VpcId": vpc.to_json() }),
        )])
    }

    fn with_network(stage: &str) -> StageBuilder {
        let mut builder = builder(stage);
        builder
            .declare_stack("Network", &[], |scope| {
                scope.export("vpc-id", Token::reference("Vpc"), "VPC");
                Ok(())
            })
            .unwrap();
        builder
    }

    #[test]
    fn test_import_written_into_properties_needs_dependency() {
        let mut builder = with_network("dev");
        let err = builder
            .declare_stack("Database", &[], |scope| {
                scope.add_construct(&subnet_group(Token::Import("dev-vpc-id".to_string())));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::UndeclaredDependency { ref consumer, ref producer }
                if consumer == "dev/Database" && producer == "dev/Network"
        ));
        assert!(builder.finish().stack("Database").is_none());
    }

    #[test]
    fn test_import_of_unknown_export_is_fatal() {
        let mut builder = with_network("dev");
        let network = builder.stack_id("Network");
        let err = builder
            .declare_stack("Database", &[&network], |scope| {
                scope.add_construct(&subnet_group(Token::Import("prod-vpc-id".to_string())));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnknownImport { ref export, .. } if export == "prod-vpc-id"
        ));
    }

    #[test]
    fn test_import_written_into_properties_with_dependency() {
        let mut builder = with_network("dev");
        let network = builder.stack_id("Network");
        builder
            .declare_stack("Database", &[&network], |scope| {
                scope.add_construct(&subnet_group(Token::Import("dev-vpc-id".to_string())));
                scope.export("db-vpc-id", Token::Import("dev-vpc-id".to_string()), "VPC");
                Ok(())
            })
            .unwrap();
        assert_eq!(builder.finish().stacks().len(), 2);
    }

    #[test]
    fn test_cross_stage_reference_is_fatal() {
        let mut prod = builder("prod");
        let prod_vpc = prod
            .declare_stack("Network", &[], |scope| {
                Ok(scope.export("vpc-id", Token::reference("Vpc"), "VPC"))
            })
            .unwrap();

        let mut dev = builder("dev");
        dev.declare_stack("Network", &[], |_| Ok(())).unwrap();
        let network = dev.stack_id("Network");
        let err = dev
            .declare_stack("Database", &[&network], |scope| Ok(scope.import(&prod_vpc)))
            .unwrap_err();
        assert!(matches!(err, CoreError::CrossStageReference { .. }));
    }

    #[test]
    fn test_unknown_dependency_and_duplicate_stack() {
        let mut builder = builder("dev");
        let ghost = builder.stack_id("Ghost");
        assert!(matches!(
            builder.declare_stack("Database", &[&ghost], |_| Ok(())),
            Err(CoreError::UnknownStack(_))
        ));

        builder.declare_stack("Network", &[], |_| Ok(())).unwrap();
        assert!(matches!(
            builder.declare_stack("Network", &[], |_| Ok(())),
            Err(CoreError::DuplicateStack(_))
        ));
    }

    #[test]
    fn test_duplicate_logical_id_in_stack_is_fatal() {
        let mut builder = builder("dev");
        let err = builder
            .declare_stack("Network", &[], |scope| {
                let resource = Resource::new("Vpc", "AWS::EC2::VPC", json!({}));
                struct Twice(Resource);
                impl keel_constructs::Construct for Twice {
                    fn id(&self) -> &str {
                        "twice"
                    }
                    fn resources(&self) -> Vec<Resource> {
                        vec![self.0.clone(), self.0.clone()]
                    }
                }
                scope.add_construct(&Twice(resource));
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Construct(_)));
    }

    #[test]
    fn test_app_rejects_duplicate_stage() {
        let mut app = App::new();
        app.add_stage(builder("dev").finish()).unwrap();
        assert!(matches!(
            app.add_stage(builder("dev").finish()),
            Err(CoreError::DuplicateStage(_))
        ));
        app.add_stage(builder("prod").finish()).unwrap();
        assert_eq!(app.stages().len(), 2);
        assert!(app.stage(StageName::Prod).is_some());
    }

    #[test]
    fn test_extra_dependency_edge() {
        let mut builder = builder("dev");
        builder.declare_stack("Repo", &[], |_| Ok(())).unwrap();
        builder.declare_stack("Network", &[], |_| Ok(())).unwrap();
        let repo = builder.stack_id("Repo");
        let network = builder.stack_id("Network");

        builder.add_dependency(&repo, &network).unwrap();
        let stage = builder.finish();
        let order: Vec<&str> = stage
            .build_order()
            .iter()
            .map(|s| s.id.name.as_str())
            .collect();
        assert_eq!(order, vec!["Network", "Repo"]);
        assert_eq!(stage.stack("Repo").unwrap().dependencies, vec![network]);
    }
}
