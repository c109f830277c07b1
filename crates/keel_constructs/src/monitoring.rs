//! Alarms and the alert channel they notify.
//!
//! Each monitoring scope owns exactly one notification topic. Every alarm
//! added to the scope routes to that topic.

use std::collections::BTreeMap;

use keel_config::{EnvironmentConfig, MonitoringConfig};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::resource::{logical_id, Construct, Resource};
use crate::token::Token;

pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Share of the function timeout at which the duration alarm fires.
pub const DURATION_ALARM_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterThanOrEqualToThreshold,
    LessThanThreshold,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThanOrEqualToThreshold => "GreaterThanOrEqualToThreshold",
            ComparisonOperator::LessThanThreshold => "LessThanThreshold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Sum,
    Average,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Sum => "Sum",
            Statistic::Average => "Average",
        }
    }
}

/// What an alarm watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    FunctionErrors,
    FunctionDuration,
    ApiServerErrors,
    ApiClientErrors,
    ApiLatency,
    DatabaseCpu,
    DatabaseFreeStorage,
}

impl AlarmKind {
    fn suffix(&self) -> &'static str {
        match self {
            AlarmKind::FunctionErrors => "error-alarm",
            AlarmKind::FunctionDuration => "duration-alarm",
            AlarmKind::ApiServerErrors => "server-error-alarm",
            AlarmKind::ApiClientErrors => "server-warn-alarm",
            AlarmKind::ApiLatency => "latency-alarm",
            AlarmKind::DatabaseCpu => "cpu-alarm",
            AlarmKind::DatabaseFreeStorage => "storage-alarm",
        }
    }
}

/// A metric series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: BTreeMap<String, Token>,
    pub statistic: Statistic,
    pub period_secs: u32,
}

/// A threshold alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub logical_id: String,
    pub kind: AlarmKind,
    pub metric: Metric,
    pub threshold: f64,
    pub evaluation_periods: u32,
    pub comparison: ComparisonOperator,
    /// Topics notified when the alarm fires.
    pub actions: Vec<Token>,
}

impl Alarm {
    pub fn name(&self) -> Token {
        Token::reference(&self.logical_id)
    }

    pub fn to_resource(&self) -> Resource {
        let dimensions: Vec<Value> = self
            .metric
            .dimensions
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value.to_json() }))
            .collect();
        let actions: Vec<Value> = self.actions.iter().map(Token::to_json).collect();

        Resource::new(
            &self.logical_id,
            "AWS::CloudWatch::Alarm",
            json!({
                "Namespace": self.metric.namespace,
                "MetricName": self.metric.metric_name,
                "Dimensions": dimensions,
                "Statistic": self.metric.statistic.as_str(),
                "Period": self.metric.period_secs,
                "EvaluationPeriods": self.evaluation_periods,
                "Threshold": self.threshold,
                "ComparisonOperator": self.comparison.as_str(),
                "AlarmActions": actions,
            }),
        )
    }
}

/// Notification topic with one email subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTopic {
    pub logical_id: String,
    pub display_name: String,
    pub email: String,
}

impl AlertTopic {
    pub fn arn(&self) -> Token {
        Token::reference(&self.logical_id)
    }
}

/// Function facts the function alarms need.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredFunction {
    pub id: String,
    pub function_name: Token,
    pub timeout_secs: u32,
}

/// API facts the API alarms need.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredApi {
    pub id: String,
    pub api_name: String,
}

/// Database facts the database alarms need.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredDatabase {
    pub id: String,
    pub instance_id: Token,
    pub allocated_storage_gb: u32,
}

/// Monitoring scope owned by a construct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitoring {
    pub scope: String,
    pub topic: AlertTopic,
    pub alarms: Vec<Alarm>,
    settings: MonitoringConfig,
}

impl Monitoring {
    /// Create the scope's topic and subscribe the alert destination.
    ///
    /// `alert_email` overrides the environment's fallback address.
    pub fn attach(scope: &str, config: &EnvironmentConfig, alert_email: Option<&str>) -> Self {
        let email = alert_email
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(config.monitoring.alert_email.as_str())
            .to_string();

        debug!("Monitoring scope {} alerts {}", scope, email);

        Self {
            scope: scope.to_string(),
            topic: AlertTopic {
                logical_id: logical_id(&[scope, "alert-topic"]),
                display_name: format!("{}-alerts", config.stage),
                email,
            },
            alarms: Vec::new(),
            settings: config.monitoring.clone(),
        }
    }

    /// Error count and duration alarms for a function.
    pub fn add_function_alarms(&mut self, function: &MonitoredFunction) -> Vec<Alarm> {
        let dimensions = dims("FunctionName", function.function_name.clone());
        let timeout_ms = f64::from(function.timeout_secs) * DURATION_ALARM_RATIO * 1000.0;
        let errors = self.metric("AWS/Lambda", "Errors", dimensions.clone(), Statistic::Sum);
        let duration = self.metric("AWS/Lambda", "Duration", dimensions, Statistic::Average);
        let error_threshold = self.settings.error_threshold;

        vec![
            self.add(
                &function.id,
                AlarmKind::FunctionErrors,
                errors,
                error_threshold,
                ComparisonOperator::GreaterThanOrEqualToThreshold,
            ),
            self.add(
                &function.id,
                AlarmKind::FunctionDuration,
                duration,
                timeout_ms,
                ComparisonOperator::GreaterThanOrEqualToThreshold,
            ),
        ]
    }

    /// 5XX, 4XX and latency alarms for a REST API.
    pub fn add_api_alarms(&mut self, api: &MonitoredApi) -> Vec<Alarm> {
        let dimensions = dims("ApiName", Token::literal(&api.api_name));
        let server = self.metric("AWS/ApiGateway", "5XXError", dimensions.clone(), Statistic::Sum);
        let client = self.metric("AWS/ApiGateway", "4XXError", dimensions.clone(), Statistic::Sum);
        let latency = self.metric("AWS/ApiGateway", "Latency", dimensions, Statistic::Average);
        let settings = self.settings.clone();

        vec![
            self.add(
                &api.id,
                AlarmKind::ApiServerErrors,
                server,
                settings.server_error_threshold,
                ComparisonOperator::GreaterThanOrEqualToThreshold,
            ),
            self.add(
                &api.id,
                AlarmKind::ApiClientErrors,
                client,
                settings.client_error_threshold,
                ComparisonOperator::GreaterThanOrEqualToThreshold,
            ),
            self.add(
                &api.id,
                AlarmKind::ApiLatency,
                latency,
                settings.latency_threshold_ms,
                ComparisonOperator::GreaterThanOrEqualToThreshold,
            ),
        ]
    }

    /// CPU and free-storage alarms for a database instance.
    ///
    /// The free-storage threshold scales with the instance's own allocation.
    pub fn add_database_alarms(&mut self, database: &MonitoredDatabase) -> Vec<Alarm> {
        let dimensions = dims("DBInstanceIdentifier", database.instance_id.clone());
        let cpu = self.metric("AWS/RDS", "CPUUtilization", dimensions.clone(), Statistic::Average);
        let storage = self.metric("AWS/RDS", "FreeStorageSpace", dimensions, Statistic::Average);
        let cpu_threshold = self.settings.cpu_threshold_percent;
        let storage_threshold =
            free_storage_threshold(database.allocated_storage_gb, self.settings.free_storage_ratio);

        vec![
            self.add(
                &database.id,
                AlarmKind::DatabaseCpu,
                cpu,
                cpu_threshold,
                ComparisonOperator::GreaterThanOrEqualToThreshold,
            ),
            self.add(
                &database.id,
                AlarmKind::DatabaseFreeStorage,
                storage,
                storage_threshold,
                ComparisonOperator::LessThanThreshold,
            ),
        ]
    }

    /// Alarm names, e.g. for deployment gating.
    pub fn alarm_names(&self) -> Vec<Token> {
        self.alarms.iter().map(Alarm::name).collect()
    }

    fn metric(
        &self,
        namespace: &str,
        metric_name: &str,
        dimensions: BTreeMap<String, Token>,
        statistic: Statistic,
    ) -> Metric {
        Metric {
            namespace: namespace.to_string(),
            metric_name: metric_name.to_string(),
            dimensions,
            statistic,
            period_secs: self.settings.period_minutes * 60,
        }
    }

    fn add(
        &mut self,
        target: &str,
        kind: AlarmKind,
        metric: Metric,
        threshold: f64,
        comparison: ComparisonOperator,
    ) -> Alarm {
        let alarm = Alarm {
            logical_id: logical_id(&[self.scope.as_str(), target, kind.suffix()]),
            kind,
            metric,
            threshold,
            evaluation_periods: self.settings.evaluation_periods,
            comparison,
            actions: vec![self.topic.arn()],
        };
        self.alarms.push(alarm.clone());
        alarm
    }
}

impl Construct for Monitoring {
    fn id(&self) -> &str {
        &self.scope
    }

    fn resources(&self) -> Vec<Resource> {
        let mut resources = vec![
            Resource::new(
                &self.topic.logical_id,
                "AWS::SNS::Topic",
                json!({ "DisplayName": self.topic.display_name }),
            ),
            Resource::new(
                format!("{}Subscription", self.topic.logical_id),
                "AWS::SNS::Subscription",
                json!({
                    "Protocol": "email",
                    "Endpoint": self.topic.email,
                    "TopicArn": self.topic.arn().to_json(),
                }),
            ),
        ];
        resources.extend(self.alarms.iter().map(Alarm::to_resource));
        resources
    }
}

/// Free-storage alarm threshold in bytes.
pub fn free_storage_threshold(allocated_storage_gb: u32, ratio: f64) -> f64 {
    f64::from(allocated_storage_gb) * GIB * ratio
}

fn dims(name: &str, value: Token) -> BTreeMap<String, Token> {
    let mut dimensions = BTreeMap::new();
    dimensions.insert(name.to_string(), value);
    dimensions
}
