//! Template-level resources and the [`Construct`] trait.

use std::collections::{BTreeMap, HashSet};

use keel_config::RemovalPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConstructError, ConstructResult};

/// One resource entry in a synthesized template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub logical_id: String,
    /// Provider type name, e.g. `AWS::EC2::VPC`.
    pub resource_type: String,
    pub properties: Value,
    /// Applied as both `DeletionPolicy` and `UpdateReplacePolicy`.
    pub removal_policy: Option<RemovalPolicy>,
    pub depends_on: Vec<String>,
    /// Extra resource attributes such as `UpdatePolicy`.
    pub attributes: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(logical_id: impl Into<String>, resource_type: impl Into<String>, properties: Value) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            properties,
            removal_policy: None,
            depends_on: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = Some(policy);
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Render the `Resources.<logical_id>` body.
    pub fn to_template(&self) -> Value {
        let mut body = Map::new();
        body.insert("Type".to_string(), Value::String(self.resource_type.clone()));
        body.insert("Properties".to_string(), self.properties.clone());
        if let Some(policy) = self.removal_policy {
            let policy = Value::String(policy.as_template_str().to_string());
            body.insert("DeletionPolicy".to_string(), policy.clone());
            body.insert("UpdateReplacePolicy".to_string(), policy);
        }
        if !self.depends_on.is_empty() {
            body.insert("DependsOn".to_string(), Value::from(self.depends_on.clone()));
        }
        for (key, value) in &self.attributes {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }
}

/// A reusable unit that expands into template resources.
pub trait Construct {
    /// Construct id, unique within its stack.
    fn id(&self) -> &str;

    /// Every resource the construct owns, including sub-constructs.
    fn resources(&self) -> Vec<Resource>;
}

/// Build a logical id from path segments: `["demo", "db-secret"]` -> `DemoDbSecret`.
pub fn logical_id(parts: &[&str]) -> String {
    let mut id = String::new();
    for part in parts {
        for word in part.split(|c: char| !c.is_ascii_alphanumeric()) {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                id.push(first.to_ascii_uppercase());
                id.extend(chars);
            }
        }
    }
    id
}

/// Fail if any two resources share a logical id.
pub fn ensure_unique(resources: &[Resource]) -> ConstructResult<()> {
    let mut seen = HashSet::new();
    for resource in resources {
        if !seen.insert(resource.logical_id.as_str()) {
            return Err(ConstructError::DuplicateLogicalId(resource.logical_id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_logical_id() {
        assert_eq!(logical_id(&["demo", "db-secret"]), "DemoDbSecret");
        assert_eq!(logical_id(&["Network", "compute_sg"]), "NetworkComputeSg");
        assert_eq!(logical_id(&["api", "{proxy+}"]), "ApiProxy");
    }

    #[test]
    fn test_removal_policy_is_rendered_twice() {
        let resource = Resource::new("Db", "AWS::RDS::DBInstance", json!({}))
            .with_removal_policy(RemovalPolicy::Snapshot);
        let template = resource.to_template();
        assert_eq!(template["DeletionPolicy"], "Snapshot");
        assert_eq!(template["UpdateReplacePolicy"], "Snapshot");
    }

    #[test]
    fn test_ensure_unique() {
        let a = Resource::new("A", "T", json!({}));
        assert!(ensure_unique(&[a.clone(), Resource::new("B", "T", json!({}))]).is_ok());
        assert_eq!(
            ensure_unique(&[a.clone(), a]),
            Err(ConstructError::DuplicateLogicalId("A".to_string()))
        );
    }
}
