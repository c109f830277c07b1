//! Environment configuration records.
//!
//! An [`EnvironmentConfig`] is the complete, read-only parameter set for one
//! deployment stage. Everything downstream (network sizing, database safety
//! posture, alarm thresholds) is derived from it at construction time.

use serde::{Deserialize, Serialize};

/// Known deployment stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Dev,
    Prod,
}

impl Default for StageName {
    fn default() -> Self {
        Self::Dev
    }
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Dev => "dev",
            StageName::Prod => "prod",
        }
    }

    /// Exact, case-sensitive lookup. `"PROD"` is not `prod`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dev" => Some(StageName::Dev),
            "prod" => Some(StageName::Prod),
            _ => None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![StageName::Dev, StageName::Prod]
    }

    /// Safety tier the stage belongs to.
    pub fn tier(&self) -> SafetyTier {
        match self {
            StageName::Dev => SafetyTier::Disposable,
            StageName::Prod => SafetyTier::Protected,
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a stage's stateful resources may be thrown away on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    /// Safe to destroy.
    Disposable,
    /// Must survive teardown.
    Protected,
}

/// Disposition of a stateful resource when its stack is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    Destroy,
    Retain,
    Snapshot,
}

impl RemovalPolicy {
    /// Template spelling used for `DeletionPolicy` / `UpdateReplacePolicy`.
    pub fn as_template_str(&self) -> &'static str {
        match self {
            RemovalPolicy::Destroy => "Delete",
            RemovalPolicy::Retain => "Retain",
            RemovalPolicy::Snapshot => "Snapshot",
        }
    }

    /// True when the resource outlives its stack.
    pub fn is_protective(&self) -> bool {
        !matches!(self, RemovalPolicy::Destroy)
    }
}

/// Virtual network sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcConfig {
    /// IPv4 block for the whole network, e.g. `10.0.0.0/16`.
    pub cidr: String,
    pub nat_gateways: u8,
    /// Number of availability zones each subnet group is spread over.
    pub max_azs: u8,
}

/// Managed database sizing and safety policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub port: u16,
    /// `"<family>.<size>"`, e.g. `t4g.micro`.
    pub instance_class: String,
    pub allocated_storage_gb: u32,
    pub multi_az: bool,
    pub deletion_protection: bool,
    pub removal_policy: RemovalPolicy,
    pub backup_retention_days: u16,
    /// Daily UTC window, `hh:mm-hh:mm`.
    pub backup_window: String,
    pub performance_insights: bool,
}

/// Serverless compute settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub timeout_secs: u32,
    pub memory_mb: u32,
    /// Active X-Ray style tracing on function and API.
    pub tracing: bool,
}

/// Alerting destination and alarm tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Fallback alert address when a construct is not given one.
    pub alert_email: String,
    pub period_minutes: u32,
    pub evaluation_periods: u32,
    /// Function errors per period.
    pub error_threshold: f64,
    /// API 5XX responses per period.
    pub server_error_threshold: f64,
    /// API 4XX responses per period.
    pub client_error_threshold: f64,
    pub latency_threshold_ms: f64,
    pub cpu_threshold_percent: f64,
    /// Fraction of allocated storage below which free space alarms.
    pub free_storage_ratio: f64,
}

/// Fully populated configuration for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub stage: StageName,
    pub region: String,
    pub account: Option<String>,
    pub vpc: VpcConfig,
    pub database: DatabaseConfig,
    pub compute: ComputeConfig,
    pub monitoring: MonitoringConfig,
}

impl EnvironmentConfig {
    pub fn tier(&self) -> SafetyTier {
        self.stage.tier()
    }

    pub fn is_protected(&self) -> bool {
        self.tier() == SafetyTier::Protected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_is_case_sensitive() {
        assert_eq!(StageName::from_str("prod"), Some(StageName::Prod));
        assert_eq!(StageName::from_str("PROD"), None);
        assert_eq!(StageName::from_str("Dev"), None);
    }

    #[test]
    fn test_stage_tiers() {
        assert_eq!(StageName::Dev.tier(), SafetyTier::Disposable);
        assert_eq!(StageName::Prod.tier(), SafetyTier::Protected);
    }

    #[test]
    fn test_removal_policy_template_names() {
        assert_eq!(RemovalPolicy::Destroy.as_template_str(), "Delete");
        assert_eq!(RemovalPolicy::Snapshot.as_template_str(), "Snapshot");
        assert!(!RemovalPolicy::Destroy.is_protective());
        assert!(RemovalPolicy::Retain.is_protective());
    }
}
