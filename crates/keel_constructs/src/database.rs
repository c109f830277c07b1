//! Managed relational database construct.

use std::collections::BTreeMap;

use keel_config::{EnvironmentConfig, RemovalPolicy};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::{ConstructError, ConstructResult};
use crate::monitoring::{MonitoredDatabase, Monitoring};
use crate::network::Placement;
use crate::resource::{logical_id, Construct, Resource};
use crate::security::SecurityGroupRef;
use crate::token::{list_to_json, Token};

pub const ENGINE_VERSION: &str = "15";
pub const PARAMETER_FAMILY: &str = "postgres15";
pub const DEFAULT_USERNAME: &str = "keel";
pub const SECRET_LENGTH: u32 = 30;
const SECRET_EXCLUDED_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";

/// Instance class parsed from `"<family>.<size>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceClass {
    pub family: String,
    pub size: String,
}

impl InstanceClass {
    /// Parse `t4g.micro` style strings. Anything else is an error.
    pub fn parse(s: &str) -> ConstructResult<Self> {
        let invalid = || ConstructError::InvalidInstanceClass(s.to_string());
        let (family, size) = s.split_once('.').ok_or_else(invalid)?;

        let valid_part =
            |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid_part(family) || !valid_part(size) {
            return Err(invalid());
        }

        Ok(Self {
            family: family.to_string(),
            size: size.to_string(),
        })
    }

    /// Provider spelling, e.g. `db.t4g.micro`.
    pub fn db_instance_class(&self) -> String {
        format!("db.{}.{}", self.family, self.size)
    }
}

impl std::fmt::Display for InstanceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.family, self.size)
    }
}

/// Per-database adjustments. They may narrow the tier defaults, never loosen them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseOverrides {
    pub db_name: Option<String>,
    pub username: Option<String>,
    /// At most the tier's allocation.
    pub allocated_storage_gb: Option<u32>,
    pub instance_class: Option<String>,
    /// May only turn multi-AZ on.
    pub multi_az: Option<bool>,
}

/// Generated credential secret attached to the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSecret {
    pub logical_id: String,
    pub username: String,
    pub password_length: u32,
}

impl GeneratedSecret {
    pub fn arn(&self) -> Token {
        Token::reference(&self.logical_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub logical_id: String,
    pub family: String,
    pub parameters: BTreeMap<String, String>,
}

/// Resolved instance settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInstance {
    pub logical_id: String,
    pub db_name: String,
    pub instance_class: InstanceClass,
    pub port: u16,
    pub allocated_storage_gb: u32,
    pub max_allocated_storage_gb: u32,
    pub multi_az: bool,
    pub deletion_protection: bool,
    pub removal_policy: RemovalPolicy,
    pub backup_retention_days: u16,
    pub backup_window: String,
    pub performance_insights: bool,
    pub storage_encrypted: bool,
}

impl DatabaseInstance {
    pub fn instance_id(&self) -> Token {
        Token::reference(&self.logical_id)
    }

    pub fn endpoint_address(&self) -> Token {
        Token::get_att(&self.logical_id, "Endpoint.Address")
    }
}

/// What dependents of a database get to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseOutputs {
    pub name: String,
    pub endpoint_address: Token,
    pub secret_arn: Token,
    pub port: u16,
    pub security_group: SecurityGroupRef,
    pub allocated_storage_gb: u32,
}

/// One database instance with its secret, parameters and monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedDatabase {
    pub name: String,
    pub placement: Placement,
    pub subnet_group_logical_id: String,
    pub secret: GeneratedSecret,
    pub parameter_group: ParameterGroup,
    pub instance: DatabaseInstance,
    pub monitoring: Monitoring,
}

impl ManagedDatabase {
    /// Build a database named `name` inside `placement`.
    pub fn build(
        name: &str,
        config: &EnvironmentConfig,
        placement: &Placement,
        overrides: &DatabaseOverrides,
        alert_email: Option<&str>,
    ) -> ConstructResult<Self> {
        let tier = &config.database;

        let instance_class = match &overrides.instance_class {
            Some(class) => InstanceClass::parse(class)?,
            None => InstanceClass::parse(&tier.instance_class)?,
        };

        let allocated_storage_gb = match overrides.allocated_storage_gb {
            Some(0) => {
                return Err(ConstructError::InvalidOverride {
                    construct: name.to_string(),
                    message: "allocated storage must be positive".to_string(),
                })
            }
            Some(gb) if gb > tier.allocated_storage_gb => {
                return Err(ConstructError::ProtectionDowngrade {
                    construct: name.to_string(),
                    message: format!(
                        "allocated storage {} GiB exceeds the tier's {} GiB",
                        gb, tier.allocated_storage_gb
                    ),
                })
            }
            Some(gb) => gb,
            None => tier.allocated_storage_gb,
        };

        let multi_az = match overrides.multi_az {
            Some(false) if tier.multi_az => {
                return Err(ConstructError::ProtectionDowngrade {
                    construct: name.to_string(),
                    message: "multi-AZ cannot be disabled".to_string(),
                })
            }
            Some(requested) => requested,
            None => tier.multi_az,
        };

        let secret = GeneratedSecret {
            logical_id: logical_id(&[name, "secret"]),
            username: overrides
                .username
                .clone()
                .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            password_length: SECRET_LENGTH,
        };

        let mut parameters = BTreeMap::new();
        // Clients of this database do not all speak TLS.
        parameters.insert("rds.force_ssl".to_string(), "0".to_string());
        let parameter_group = ParameterGroup {
            logical_id: logical_id(&[name, "parameters"]),
            family: PARAMETER_FAMILY.to_string(),
            parameters,
        };

        let instance = DatabaseInstance {
            logical_id: logical_id(&[name, "database"]),
            db_name: overrides
                .db_name
                .clone()
                .unwrap_or_else(|| name.replace('-', "_")),
            instance_class,
            port: tier.port,
            allocated_storage_gb,
            max_allocated_storage_gb: allocated_storage_gb.saturating_mul(2),
            multi_az,
            deletion_protection: tier.deletion_protection,
            removal_policy: tier.removal_policy,
            backup_retention_days: tier.backup_retention_days,
            backup_window: tier.backup_window.clone(),
            performance_insights: tier.performance_insights,
            storage_encrypted: true,
        };

        let mut monitoring = Monitoring::attach(&format!("{}-monitoring", name), config, alert_email);
        monitoring.add_database_alarms(&MonitoredDatabase {
            id: name.to_string(),
            instance_id: instance.instance_id(),
            allocated_storage_gb,
        });

        info!(
            "Database {} ({}, {} GiB, multi-AZ: {}, removal: {:?})",
            name, instance.instance_class, allocated_storage_gb, multi_az, instance.removal_policy
        );

        Ok(Self {
            name: name.to_string(),
            placement: placement.clone(),
            subnet_group_logical_id: logical_id(&[name, "subnet-group"]),
            secret,
            parameter_group,
            instance,
            monitoring,
        })
    }

    pub fn outputs(&self) -> DatabaseOutputs {
        DatabaseOutputs {
            name: self.name.clone(),
            endpoint_address: self.instance.endpoint_address(),
            secret_arn: self.secret.arn(),
            port: self.instance.port,
            security_group: self.placement.security_group.clone(),
            allocated_storage_gb: self.instance.allocated_storage_gb,
        }
    }
}

impl Construct for ManagedDatabase {
    fn id(&self) -> &str {
        &self.name
    }

    fn resources(&self) -> Vec<Resource> {
        let instance = &self.instance;
        let removal = instance.removal_policy;

        let secret = Resource::new(
            &self.secret.logical_id,
            "AWS::SecretsManager::Secret",
            json!({
                "Description": format!("Generated credentials for database {}", self.name),
                "GenerateSecretString": {
                    "SecretStringTemplate": json!({ "username": self.secret.username }).to_string(),
                    "GenerateStringKey": "password",
                    "PasswordLength": self.secret.password_length,
                    "ExcludeCharacters": SECRET_EXCLUDED_CHARACTERS,
                },
            }),
        )
        .with_removal_policy(match removal {
            RemovalPolicy::Destroy => RemovalPolicy::Destroy,
            _ => RemovalPolicy::Retain,
        });

        let credential = |key: &str| {
            Token::join(
                "",
                vec![
                    Token::literal("{{resolve:secretsmanager:"),
                    self.secret.arn(),
                    Token::literal(format!(":SecretString:{}::}}}}", key)),
                ],
            )
            .to_json()
        };

        let mut resources = vec![
            Resource::new(
                &self.subnet_group_logical_id,
                "AWS::RDS::DBSubnetGroup",
                json!({
                    "DBSubnetGroupDescription": format!("Subnets for database {}", self.name),
                    "SubnetIds": list_to_json(&self.placement.subnet_ids),
                }),
            )
            .with_removal_policy(removal_for_subnet_group(removal)),
            secret,
            Resource::new(
                &self.parameter_group.logical_id,
                "AWS::RDS::DBParameterGroup",
                json!({
                    "Description": format!("Parameters for database {}", self.name),
                    "Family": self.parameter_group.family,
                    "Parameters": self.parameter_group.parameters,
                }),
            ),
            Resource::new(
                &instance.logical_id,
                "AWS::RDS::DBInstance",
                json!({
                    "Engine": "postgres",
                    "EngineVersion": ENGINE_VERSION,
                    "DBName": instance.db_name,
                    "DBInstanceClass": instance.instance_class.db_instance_class(),
                    "Port": instance.port.to_string(),
                    "AllocatedStorage": instance.allocated_storage_gb.to_string(),
                    "MaxAllocatedStorage": instance.max_allocated_storage_gb,
                    "MultiAZ": instance.multi_az,
                    "DeletionProtection": instance.deletion_protection,
                    "StorageEncrypted": instance.storage_encrypted,
                    "BackupRetentionPeriod": instance.backup_retention_days,
                    "PreferredBackupWindow": instance.backup_window,
                    "EnablePerformanceInsights": instance.performance_insights,
                    "EnableCloudwatchLogsExports": ["postgresql"],
                    "DBSubnetGroupName": Token::reference(&self.subnet_group_logical_id).to_json(),
                    "DBParameterGroupName": Token::reference(&self.parameter_group.logical_id).to_json(),
                    "VPCSecurityGroups": [self.placement.security_group.id.to_json()],
                    "MasterUsername": credential("username"),
                    "MasterUserPassword": credential("password"),
                    "PubliclyAccessible": false,
                }),
            )
            .with_removal_policy(removal),
            Resource::new(
                format!("{}Attachment", self.secret.logical_id),
                "AWS::SecretsManager::SecretTargetAttachment",
                json!({
                    "SecretId": self.secret.arn().to_json(),
                    "TargetId": instance.instance_id().to_json(),
                    "TargetType": "AWS::RDS::DBInstance",
                }),
            ),
        ];

        resources.extend(self.monitoring.resources());
        resources
    }
}

fn removal_for_subnet_group(policy: RemovalPolicy) -> RemovalPolicy {
    // Subnet groups cannot be snapshotted.
    match policy {
        RemovalPolicy::Snapshot => RemovalPolicy::Retain,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::{free_storage_threshold, AlarmKind};
    use crate::network::NetworkTopology;
    use keel_config::resolve;

    fn build(stage: &str, overrides: &DatabaseOverrides) -> ConstructResult<ManagedDatabase> {
        let config = resolve(stage);
        let network = NetworkTopology::build(&config).unwrap();
        ManagedDatabase::build("demo", &config, &network.database_placement(), overrides, None)
    }

    #[test]
    fn test_instance_class_parse() {
        let class = InstanceClass::parse("t4g.micro").unwrap();
        assert_eq!(class.family, "t4g");
        assert_eq!(class.size, "micro");
        assert_eq!(class.db_instance_class(), "db.t4g.micro");
    }

    #[test]
    fn test_instance_class_rejects_malformed() {
        for bad in ["invalid", "", ".micro", "t4g.", "t4g.mi cro", "db.t4g.micro"] {
            assert_eq!(
                InstanceClass::parse(bad),
                Err(ConstructError::InvalidInstanceClass(bad.to_string())),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_malformed_tier_class_is_fatal() {
        let mut config = resolve("dev");
        config.database.instance_class = "invalid".to_string();
        let network = NetworkTopology::build(&config).unwrap();
        let result = ManagedDatabase::build(
            "demo",
            &config,
            &network.database_placement(),
            &DatabaseOverrides::default(),
            None,
        );
        assert!(matches!(result, Err(ConstructError::InvalidInstanceClass(_))));
    }

    #[test]
    fn test_storage_ceiling_is_double() {
        for stage in ["dev", "prod"] {
            let db = build(stage, &DatabaseOverrides::default()).unwrap();
            assert_eq!(
                db.instance.max_allocated_storage_gb,
                2 * db.instance.allocated_storage_gb
            );
        }

        let narrowed = build(
            "prod",
            &DatabaseOverrides {
                allocated_storage_gb: Some(40),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(narrowed.instance.max_allocated_storage_gb, 80);
    }

    #[test]
    fn test_storage_ceiling_saturates() {
        let mut config = resolve("dev");
        config.database.allocated_storage_gb = u32::MAX;
        let network = NetworkTopology::build(&config).unwrap();
        let db = ManagedDatabase::build(
            "demo",
            &config,
            &network.database_placement(),
            &DatabaseOverrides::default(),
            None,
        )
        .unwrap();
        assert_eq!(db.instance.allocated_storage_gb, u32::MAX);
        assert_eq!(db.instance.max_allocated_storage_gb, u32::MAX);
    }

    #[test]
    fn test_tier_posture_is_applied() {
        let prod = build("prod", &DatabaseOverrides::default()).unwrap();
        assert!(prod.instance.multi_az);
        assert!(prod.instance.deletion_protection);
        assert_eq!(prod.instance.removal_policy, RemovalPolicy::Snapshot);

        let dev = build("dev", &DatabaseOverrides::default()).unwrap();
        assert!(!dev.instance.deletion_protection);
        assert_eq!(dev.instance.removal_policy, RemovalPolicy::Destroy);
    }

    #[test]
    fn test_overrides_cannot_loosen_tier() {
        let err = build(
            "prod",
            &DatabaseOverrides {
                multi_az: Some(false),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConstructError::ProtectionDowngrade { .. }));

        let err = build(
            "dev",
            &DatabaseOverrides {
                allocated_storage_gb: Some(500),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConstructError::ProtectionDowngrade { .. }));

        let err = build(
            "dev",
            &DatabaseOverrides {
                allocated_storage_gb: Some(0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ConstructError::InvalidOverride { .. }));
    }

    #[test]
    fn test_dev_may_opt_into_multi_az() {
        let db = build(
            "dev",
            &DatabaseOverrides {
                multi_az: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(db.instance.multi_az);
    }

    #[test]
    fn test_free_storage_alarm_tracks_instance_size() {
        let db = build("prod", &DatabaseOverrides::default()).unwrap();
        let alarm = db
            .monitoring
            .alarms
            .iter()
            .find(|a| a.kind == AlarmKind::DatabaseFreeStorage)
            .unwrap();
        assert_eq!(alarm.threshold, 100.0 * 1024f64.powi(3) * 0.15);
        assert_eq!(alarm.threshold, free_storage_threshold(100, 0.15));
    }

    #[test]
    fn test_parameter_group_disables_forced_tls() {
        let db = build("dev", &DatabaseOverrides::default()).unwrap();
        assert_eq!(
            db.parameter_group.parameters.get("rds.force_ssl").map(String::as_str),
            Some("0")
        );
    }

    #[test]
    fn test_instance_resource_carries_removal_policy() {
        let db = build("prod", &DatabaseOverrides::default()).unwrap();
        let resources = db.resources();
        let instance = resources
            .iter()
            .find(|r| r.resource_type == "AWS::RDS::DBInstance")
            .unwrap();
        assert_eq!(instance.removal_policy, Some(RemovalPolicy::Snapshot));
        assert_eq!(instance.properties["MaxAllocatedStorage"], 200);
        assert_eq!(instance.properties["DBInstanceClass"], "db.t4g.small");
    }
}
