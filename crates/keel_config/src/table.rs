//! The fixed environment table and stage resolution.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::ambient::AmbientContext;
use crate::environment::{
    ComputeConfig, DatabaseConfig, EnvironmentConfig, MonitoringConfig, RemovalPolicy, SafetyTier,
    StageName, VpcConfig,
};
use crate::error::{ConfigError, ConfigResult};

/// Region every stage deploys to unless the ambient context says otherwise.
pub const DEFAULT_REGION: &str = "eu-central-1";

/// Fallback alert address used when neither the manifest nor the caller sets one.
pub const DEFAULT_ALERT_EMAIL: &str = "alerts@example.com";

/// Closed table of stage configurations.
#[derive(Debug, Clone)]
pub struct EnvironmentTable {
    entries: BTreeMap<StageName, EnvironmentConfig>,
    default_stage: StageName,
}

impl EnvironmentTable {
    /// The built-in development and production records.
    pub fn standard() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(StageName::Dev, dev_config());
        entries.insert(StageName::Prod, prod_config());
        Self {
            entries,
            default_stage: StageName::default(),
        }
    }

    pub fn default_stage(&self) -> StageName {
        self.default_stage
    }

    pub fn get(&self, stage: StageName) -> Option<&EnvironmentConfig> {
        self.entries.get(&stage)
    }

    /// Resolve a stage name to its record.
    ///
    /// Unknown names fall back to the default stage; this never fails.
    pub fn resolve(&self, stage_name: &str) -> EnvironmentConfig {
        let stage = match StageName::from_str(stage_name) {
            Some(stage) => stage,
            None => {
                warn!(
                    "Unknown stage '{}', falling back to '{}'",
                    stage_name, self.default_stage
                );
                self.default_stage
            }
        };

        debug!("Resolved stage '{}' to {}", stage_name, stage);
        // validate() guarantees every StageName has an entry
        self.entries
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| config_for(stage))
    }

    /// Resolve and apply account/region from the ambient process context.
    pub fn resolve_with(&self, stage_name: &str, ambient: &AmbientContext) -> EnvironmentConfig {
        let mut config = self.resolve(stage_name);
        if let Some(account) = &ambient.account {
            config.account = Some(account.clone());
        }
        if let Some(region) = &ambient.region {
            config.region = region.clone();
        }
        config
    }

    /// Check the table is complete and that tiers differ where it matters.
    pub fn validate(&self) -> ConfigResult<()> {
        for stage in StageName::all() {
            let config = self
                .entries
                .get(&stage)
                .ok_or_else(|| ConfigError::MissingStage(stage.to_string()))?;
            validate_entry(config)?;
        }

        let dev = self.resolve(StageName::Dev.as_str());
        let prod = self.resolve(StageName::Prod.as_str());
        if prod.database.allocated_storage_gb <= dev.database.allocated_storage_gb {
            return Err(violation(
                &prod,
                "protected storage must exceed disposable storage",
            ));
        }

        Ok(())
    }
}

impl Default for EnvironmentTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Resolve a stage name against the standard table.
pub fn resolve(stage_name: &str) -> EnvironmentConfig {
    EnvironmentTable::standard().resolve(stage_name)
}

/// Resolve a stage name against the standard table with ambient overrides.
pub fn resolve_with(stage_name: &str, ambient: &AmbientContext) -> EnvironmentConfig {
    EnvironmentTable::standard().resolve_with(stage_name, ambient)
}

fn validate_entry(config: &EnvironmentConfig) -> ConfigResult<()> {
    let db = &config.database;
    match config.tier() {
        SafetyTier::Protected => {
            if !db.multi_az {
                return Err(violation(config, "multi-AZ must be enabled"));
            }
            if !db.deletion_protection {
                return Err(violation(config, "deletion protection must be enabled"));
            }
            if !db.removal_policy.is_protective() {
                return Err(violation(config, "removal policy must retain or snapshot"));
            }
        }
        SafetyTier::Disposable => {
            if db.deletion_protection || db.removal_policy.is_protective() {
                return Err(violation(config, "disposable stages must be destroyable"));
            }
        }
    }

    let monitoring = &config.monitoring;
    if monitoring.client_error_threshold <= monitoring.server_error_threshold {
        return Err(violation(config, "4XX threshold must exceed 5XX threshold"));
    }
    if monitoring.evaluation_periods == 0 || monitoring.period_minutes == 0 {
        return Err(violation(config, "alarms need a non-empty evaluation window"));
    }
    if config.compute.timeout_secs == 0 {
        return Err(violation(config, "compute timeout must be positive"));
    }

    Ok(())
}

fn violation(config: &EnvironmentConfig, message: &str) -> ConfigError {
    ConfigError::TierViolation {
        stage: config.stage.to_string(),
        message: message.to_string(),
    }
}

fn config_for(stage: StageName) -> EnvironmentConfig {
    match stage {
        StageName::Dev => dev_config(),
        StageName::Prod => prod_config(),
    }
}

fn dev_config() -> EnvironmentConfig {
    EnvironmentConfig {
        stage: StageName::Dev,
        region: DEFAULT_REGION.to_string(),
        account: None,
        vpc: VpcConfig {
            cidr: "10.0.0.0/16".to_string(),
            nat_gateways: 1,
            max_azs: 2,
        },
        database: DatabaseConfig {
            port: 5432,
            instance_class: "t4g.micro".to_string(),
            allocated_storage_gb: 20,
            multi_az: false,
            deletion_protection: false,
            removal_policy: RemovalPolicy::Destroy,
            backup_retention_days: 1,
            backup_window: "03:00-04:00".to_string(),
            performance_insights: false,
        },
        compute: ComputeConfig {
            timeout_secs: 30,
            memory_mb: 512,
            tracing: false,
        },
        monitoring: MonitoringConfig {
            alert_email: DEFAULT_ALERT_EMAIL.to_string(),
            period_minutes: 1,
            evaluation_periods: 3,
            error_threshold: 5.0,
            server_error_threshold: 5.0,
            client_error_threshold: 10.0,
            latency_threshold_ms: 25_000.0,
            cpu_threshold_percent: 80.0,
            free_storage_ratio: 0.15,
        },
    }
}

fn prod_config() -> EnvironmentConfig {
    EnvironmentConfig {
        stage: StageName::Prod,
        region: DEFAULT_REGION.to_string(),
        account: None,
        vpc: VpcConfig {
            cidr: "10.1.0.0/16".to_string(),
            nat_gateways: 2,
            max_azs: 3,
        },
        database: DatabaseConfig {
            port: 5445,
            instance_class: "t4g.small".to_string(),
            allocated_storage_gb: 100,
            multi_az: true,
            deletion_protection: true,
            removal_policy: RemovalPolicy::Snapshot,
            backup_retention_days: 7,
            backup_window: "02:00-03:00".to_string(),
            performance_insights: true,
        },
        compute: ComputeConfig {
            timeout_secs: 60,
            memory_mb: 1024,
            tracing: true,
        },
        monitoring: MonitoringConfig {
            alert_email: DEFAULT_ALERT_EMAIL.to_string(),
            period_minutes: 1,
            evaluation_periods: 2,
            error_threshold: 3.0,
            server_error_threshold: 3.0,
            client_error_threshold: 10.0,
            latency_threshold_ms: 25_000.0,
            cpu_threshold_percent: 80.0,
            free_storage_ratio: 0.15,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_validates() {
        EnvironmentTable::standard().validate().unwrap();
    }

    #[test]
    fn test_resolve_prod_is_protected() {
        let config = resolve("prod");
        assert_eq!(config.stage, StageName::Prod);
        assert!(config.database.multi_az);
        assert!(config.database.deletion_protection);
        assert_eq!(config.database.removal_policy, RemovalPolicy::Snapshot);
    }

    #[test]
    fn test_resolve_dev_is_disposable() {
        let config = resolve("dev");
        assert!(!config.database.multi_az);
        assert!(!config.database.deletion_protection);
        assert_eq!(config.database.removal_policy, RemovalPolicy::Destroy);
    }

    #[test]
    fn test_unknown_stage_falls_back_to_dev() {
        let dev = resolve("dev");
        for name in ["", "staging", "PROD", "prod ", "qa"] {
            assert_eq!(resolve(name), dev, "stage {:?} should fall back", name);
        }
    }

    #[test]
    fn test_resolve_is_deterministic() {
        assert_eq!(resolve("prod"), resolve("prod"));
        assert_eq!(resolve("nope"), resolve("nope"));
    }

    #[test]
    fn test_resolve_with_ambient_context() {
        let ambient = AmbientContext {
            account: Some("123456789012".to_string()),
            region: Some("us-west-2".to_string()),
        };
        let config = resolve_with("prod", &ambient);
        assert_eq!(config.account.as_deref(), Some("123456789012"));
        assert_eq!(config.region, "us-west-2");

        let plain = resolve_with("prod", &AmbientContext::default());
        assert_eq!(plain.account, None);
        assert_eq!(plain.region, DEFAULT_REGION);
    }

    #[test]
    fn test_validate_rejects_unprotected_prod() {
        let mut table = EnvironmentTable::standard();
        if let Some(prod) = table.entries.get_mut(&StageName::Prod) {
            prod.database.deletion_protection = false;
        }
        let err = table.validate().unwrap_err();
        assert!(matches!(err, ConfigError::TierViolation { .. }));
    }

    #[test]
    fn test_validate_rejects_missing_stage() {
        let mut table = EnvironmentTable::standard();
        table.entries.remove(&StageName::Prod);
        assert!(matches!(table.validate(), Err(ConfigError::MissingStage(_))));
    }
}
