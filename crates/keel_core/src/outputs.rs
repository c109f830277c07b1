//! Named values a stage publishes for consumers outside the stack that made them.
//!
//! Export names are `<stage>-<key>`. The keys below form a contract with
//! operators and other deployments and must not change between releases.

use std::collections::BTreeMap;

use keel_config::StageName;
use keel_constructs::Token;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::stack::StackId;

/// Stable export keys.
pub mod keys {
    pub const VPC_ID: &str = "vpc-id";
    pub const PUBLIC_SUBNET_IDS: &str = "public-subnet-ids";
    pub const COMPUTE_SUBNET_IDS: &str = "compute-subnet-ids";
    pub const DATABASE_SUBNET_IDS: &str = "database-subnet-ids";
    pub const COMPUTE_SECURITY_GROUP_ID: &str = "compute-sg-id";
    pub const DATABASE_SECURITY_GROUP_ID: &str = "database-sg-id";
    pub const API_URL: &str = "api-url";
    pub const FUNCTION_ARN: &str = "function-arn";
    pub const ECR_URI: &str = "ecr-uri";

    pub fn db_endpoint(database: &str) -> String {
        format!("db-{}-endpoint", database)
    }

    pub fn db_secret_arn(database: &str) -> String {
        format!("db-{}-secret-arn", database)
    }
}

/// Export name for `key` in `stage`.
pub fn export_name(stage: StageName, key: &str) -> String {
    format!("{}-{}", stage, key)
}

/// One exported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub stack: StackId,
    pub key: String,
    pub export_name: String,
    /// Value as seen from inside the producing stack.
    pub value: Token,
    pub description: String,
}

/// All exports of one stage, keyed by export name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRegistry {
    stage: StageName,
    records: BTreeMap<String, OutputRecord>,
}

impl OutputRegistry {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            records: BTreeMap::new(),
        }
    }

    pub fn stage(&self) -> StageName {
        self.stage
    }

    /// Add a record. Export names are unique within a stage.
    pub fn register(&mut self, record: OutputRecord) -> CoreResult<()> {
        if self.records.contains_key(&record.export_name) {
            return Err(CoreError::DuplicateExport(record.export_name));
        }
        debug!("Registering export {} from {}", record.export_name, record.stack);
        self.records.insert(record.export_name.clone(), record);
        Ok(())
    }

    pub fn contains(&self, export_name: &str) -> bool {
        self.records.contains_key(export_name)
    }

    pub fn get(&self, export_name: &str) -> Option<&OutputRecord> {
        self.records.get(export_name)
    }

    /// Look up by key instead of by full export name.
    pub fn get_key(&self, key: &str) -> Option<&OutputRecord> {
        self.get(&export_name(self.stage, key))
    }

    pub fn names(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &OutputRecord> {
        self.records.values()
    }

    pub fn for_stack<'a>(&'a self, stack: &'a StackId) -> impl Iterator<Item = &'a OutputRecord> {
        self.records.values().filter(move |r| &r.stack == stack)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stage: StageName, key: &str) -> OutputRecord {
        OutputRecord {
            stack: StackId::new(stage, "Network"),
            key: key.to_string(),
            export_name: export_name(stage, key),
            value: Token::reference("Vpc"),
            description: String::new(),
        }
    }

    #[test]
    fn test_export_names_are_stage_scoped() {
        assert_eq!(export_name(StageName::Dev, keys::VPC_ID), "dev-vpc-id");
        assert_eq!(export_name(StageName::Prod, keys::VPC_ID), "prod-vpc-id");
        assert_eq!(keys::db_endpoint("demo"), "db-demo-endpoint");
        assert_eq!(keys::db_secret_arn("demo"), "db-demo-secret-arn");
    }

    #[test]
    fn test_duplicate_export_is_rejected() {
        let mut registry = OutputRegistry::new(StageName::Dev);
        registry.register(record(StageName::Dev, keys::VPC_ID)).unwrap();
        let err = registry
            .register(record(StageName::Dev, keys::VPC_ID))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateExport(name) if name == "dev-vpc-id"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_by_key() {
        let mut registry = OutputRegistry::new(StageName::Prod);
        registry.register(record(StageName::Prod, keys::ECR_URI)).unwrap();
        assert!(registry.get_key(keys::ECR_URI).is_some());
        assert!(registry.contains("prod-ecr-uri"));
        assert_eq!(registry.names(), vec!["prod-ecr-uri"]);
    }
}
