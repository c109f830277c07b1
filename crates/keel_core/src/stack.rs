//! Stacks: independently deployable bundles of constructs.

use std::fmt;

use keel_config::StageName;
use keel_constructs::{logical_id, Resource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::outputs::OutputRecord;

const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Identity of a stack: the stage it belongs to and its name within the stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackId {
    pub stage: StageName,
    pub name: String,
}

impl StackId {
    pub fn new(stage: StageName, name: impl Into<String>) -> Self {
        Self {
            stage,
            name: name.into(),
        }
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stage, self.name)
    }
}

/// A synthesized stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    pub id: StackId,
    /// Name the provisioning engine knows the stack by, e.g. `keel-dev-Network`.
    pub stack_name: String,
    pub resources: Vec<Resource>,
    pub exports: Vec<OutputRecord>,
    /// Stacks that must be provisioned first, in declaration order.
    pub dependencies: Vec<StackId>,
}

impl Stack {
    pub fn new(app: &str, id: StackId) -> Self {
        let stack_name = format!("{}-{}-{}", app, id.stage, id.name);
        Self {
            id,
            stack_name,
            resources: Vec::new(),
            exports: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn template_file(&self) -> String {
        format!("{}.template.json", self.stack_name)
    }

    /// Render the stack as a provisioning template.
    pub fn to_template(&self) -> Value {
        let mut resources = Map::new();
        for resource in &self.resources {
            resources.insert(resource.logical_id.clone(), resource.to_template());
        }

        let mut outputs = Map::new();
        for record in &self.exports {
            outputs.insert(
                logical_id(&[record.key.as_str()]),
                json!({
                    "Description": record.description,
                    "Value": record.value.to_json(),
                    "Export": { "Name": record.export_name },
                }),
            );
        }

        let mut template = Map::new();
        template.insert(
            "AWSTemplateFormatVersion".to_string(),
            Value::String(TEMPLATE_FORMAT_VERSION.to_string()),
        );
        template.insert(
            "Description".to_string(),
            Value::String(format!("{} ({} stage)", self.stack_name, self.id.stage)),
        );
        template.insert("Resources".to_string(), Value::Object(resources));
        if !outputs.is_empty() {
            template.insert("Outputs".to_string(), Value::Object(outputs));
        }
        Value::Object(template)
    }
}
