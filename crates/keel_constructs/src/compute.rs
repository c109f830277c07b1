//! Containerized function behind a REST API.
//!
//! The API integrates with the function's `live` alias, never with
//! `$LATEST`, so a canary rollout shifts API traffic together with the alias.

use std::collections::BTreeMap;

use keel_config::EnvironmentConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::database::DatabaseOutputs;
use crate::error::{ConstructError, ConstructResult};
use crate::image_repo::RepositoryRef;
use crate::monitoring::{MonitoredApi, MonitoredFunction, Monitoring};
use crate::network::Placement;
use crate::resource::{logical_id, Construct, Resource};
use crate::token::{list_to_json, Token};

pub const ALIAS_NAME: &str = "live";
pub const CANARY_DEPLOYMENT_CONFIG: &str = "CodeDeployDefault.LambdaCanary10Percent5Minutes";
pub const SECRET_ENV_VAR: &str = "DB_SECRET_NAME";
pub const INSIGHTS_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/CloudWatchLambdaInsightsExecutionRolePolicy";

static DIGEST_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sha256:[a-f0-9]{64}$").expect("Invalid digest regex"));

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("Invalid image tag regex")
});

const DEFAULT_CORS_HEADERS: [&str; 2] = ["Content-Type", "Authorization"];
const SECRET_READ_ACTIONS: [&str; 2] = [
    "secretsmanager:GetSecretValue",
    "secretsmanager:DescribeSecret",
];

/// Image tag or content digest inside the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageReference {
    Tag(String),
    Digest(String),
}

impl ImageReference {
    /// Parse a tag (`v1.2.0`) or a digest (`sha256:<64 hex>`).
    ///
    /// An empty reference means there is nothing to deploy.
    pub fn parse(s: &str) -> ConstructResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConstructError::MissingWorkload);
        }

        let invalid = || ConstructError::InvalidImageReference(s.to_string());

        if s.starts_with("sha256:") {
            return if DIGEST_REGEX.is_match(s) {
                Ok(ImageReference::Digest(s.to_string()))
            } else {
                Err(invalid())
            };
        }

        if TAG_REGEX.is_match(s) {
            Ok(ImageReference::Tag(s.to_string()))
        } else {
            Err(invalid())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageReference::Tag(tag) => tag,
            ImageReference::Digest(digest) => digest,
        }
    }

    /// Full image URI inside `repository`.
    pub fn image_uri(&self, repository: &RepositoryRef) -> Token {
        let suffix = match self {
            ImageReference::Tag(tag) => format!(":{}", tag),
            ImageReference::Digest(digest) => format!("@{}", digest),
        };
        Token::join("", vec![repository.uri.clone(), Token::literal(suffix)])
    }

    /// Short stable fragment identifying this image in logical ids.
    fn fingerprint(&self) -> String {
        match self {
            ImageReference::Tag(tag) => tag.clone(),
            ImageReference::Digest(digest) => digest
                .trim_start_matches("sha256:")
                .chars()
                .take(12)
                .collect(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller choices for one compute endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOptions {
    pub function_name: String,
    pub canary: bool,
    pub cors_allow_origins: Option<Vec<String>>,
    pub cors_allow_headers: Option<Vec<String>>,
    pub alert_email: Option<String>,
}

impl ComputeOptions {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            canary: false,
            cors_allow_origins: None,
            cors_allow_headers: None,
            alert_email: None,
        }
    }
}

/// Network permission from one security group to another on one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGrant {
    pub source_key: String,
    pub target_key: String,
    pub port: u16,
}

/// IAM read access scoped to a single secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretReadGrant {
    pub secret_arn: Token,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_headers: Vec<String>,
}

impl CorsPolicy {
    fn from_options(options: &ComputeOptions) -> ConstructResult<Self> {
        let policy = Self {
            allow_origins: options
                .cors_allow_origins
                .clone()
                .unwrap_or_else(|| vec!["*".to_string()]),
            allow_headers: options
                .cors_allow_headers
                .clone()
                .unwrap_or_else(|| DEFAULT_CORS_HEADERS.iter().map(|h| h.to_string()).collect()),
        };
        policy.validate(&options.function_name)?;
        Ok(policy)
    }

    fn validate(&self, construct: &str) -> ConstructResult<()> {
        let invalid = |message: &str| ConstructError::InvalidOverride {
            construct: construct.to_string(),
            message: message.to_string(),
        };
        if self.allow_origins.is_empty() {
            return Err(invalid("CORS needs at least one allowed origin"));
        }
        if self.allow_origins.len() > 1 && self.allow_origins.iter().any(|o| o == "*") {
            return Err(invalid("CORS origin '*' cannot be combined with other origins"));
        }
        Ok(())
    }

    /// A preflight answer carries exactly one origin. With several allowed
    /// origins the first one is the static answer and the request's `Origin`
    /// is echoed back when it is on the list.
    pub fn is_multi_origin(&self) -> bool {
        self.allow_origins.len() > 1
    }

    fn integration_response_parameters(&self) -> Value {
        let mut parameters = json!({
            "method.response.header.Access-Control-Allow-Headers":
                format!("'{}'", self.allow_headers.join(",")),
            "method.response.header.Access-Control-Allow-Origin":
                format!("'{}'", self.allow_origins.first().map(String::as_str).unwrap_or("*")),
            "method.response.header.Access-Control-Allow-Methods":
                "'OPTIONS,GET,PUT,POST,DELETE,PATCH,HEAD'",
        });
        if self.is_multi_origin() {
            parameters["method.response.header.Vary"] = json!("'Origin'");
        }
        parameters
    }

    fn method_response_parameters(&self) -> Value {
        let mut parameters = json!({
            "method.response.header.Access-Control-Allow-Headers": true,
            "method.response.header.Access-Control-Allow-Origin": true,
            "method.response.header.Access-Control-Allow-Methods": true,
        });
        if self.is_multi_origin() {
            parameters["method.response.header.Vary"] = json!(true);
        }
        parameters
    }

    /// Mapping template that overrides the origin header for listed origins.
    fn origin_template(&self) -> Option<String> {
        if !self.is_multi_origin() {
            return None;
        }
        let condition = self
            .allow_origins
            .iter()
            .map(|o| format!("$origin == \"{}\"", o))
            .collect::<Vec<_>>()
            .join(" || ");
        Some(format!(
            "#set($origin = $input.params().header.get(\"Origin\"))\n\
             #if($origin == \"\")#set($origin = $input.params().header.get(\"origin\"))#end\n\
             #if({})\n  #set($context.responseOverride.header.Access-Control-Allow-Origin = $origin)\n#end",
            condition
        ))
    }
}

/// Traffic-shifting rollout gated on the endpoint's alarms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryDeployment {
    pub application_logical_id: String,
    pub group_logical_id: String,
    pub role_logical_id: String,
    pub deployment_config: String,
    pub alarms: Vec<Token>,
}

/// What dependents of a compute endpoint get to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOutputs {
    pub function_name: String,
    pub function_arn: Token,
    pub api_url: Token,
}

/// Function, alias, optional canary group, REST API and monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeEndpoint {
    pub function_name: String,
    /// Name in the cloud account, unique per stage.
    pub physical_name: String,
    pub prefix: String,
    pub placement: Placement,
    pub image: ImageReference,
    pub image_uri: Token,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    pub tracing: bool,
    /// Lambda Insights. An image function has no layers, so the extension
    /// ships inside the image and the role only needs the insights policy.
    pub insights: bool,
    /// Protected stages log API errors only.
    pub protected: bool,
    pub stage_name: String,
    pub environment: BTreeMap<String, Token>,
    pub secret_grant: Option<SecretReadGrant>,
    pub port_grant: Option<PortGrant>,
    pub canary: Option<CanaryDeployment>,
    pub cors: CorsPolicy,
    pub api_name: String,
    pub monitoring: Monitoring,
}

impl ComputeEndpoint {
    pub fn build(
        config: &EnvironmentConfig,
        placement: &Placement,
        repository: &RepositoryRef,
        image: &ImageReference,
        database: Option<&DatabaseOutputs>,
        options: &ComputeOptions,
    ) -> ConstructResult<Self> {
        let prefix = logical_id(&[options.function_name.as_str()]);
        let mut environment = BTreeMap::new();

        let (secret_grant, port_grant) = match database {
            Some(db) => {
                // The network stack owns the only ingress rule on the database
                // group. Refuse to bind to a database that does not admit us.
                if !db.security_group.admits(&placement.security_group, db.port) {
                    return Err(ConstructError::UnauthorizedDatabaseAccess {
                        source_group: placement.security_group.key.clone(),
                        target: db.security_group.key.clone(),
                        port: db.port,
                    });
                }
                environment.insert(SECRET_ENV_VAR.to_string(), db.secret_arn.clone());
                debug!(
                    "Function {} bound to database {} on port {}",
                    options.function_name, db.name, db.port
                );
                (
                    Some(SecretReadGrant {
                        secret_arn: db.secret_arn.clone(),
                        actions: SECRET_READ_ACTIONS.iter().map(|a| a.to_string()).collect(),
                    }),
                    Some(PortGrant {
                        source_key: placement.security_group.key.clone(),
                        target_key: db.security_group.key.clone(),
                        port: db.port,
                    }),
                )
            }
            None => (None, None),
        };

        let cors = CorsPolicy::from_options(options)?;
        let physical_name = format!("{}-{}", options.function_name, config.stage);
        let api_name = format!("{}-api", physical_name);
        let function_logical_id = format!("{}Function", prefix);

        let mut monitoring = Monitoring::attach(
            &format!("{}-monitoring", options.function_name),
            config,
            options.alert_email.as_deref(),
        );
        monitoring.add_function_alarms(&MonitoredFunction {
            id: "function".to_string(),
            function_name: Token::reference(&function_logical_id),
            timeout_secs: config.compute.timeout_secs,
        });
        monitoring.add_api_alarms(&MonitoredApi {
            id: "api".to_string(),
            api_name: api_name.clone(),
        });

        let canary = options.canary.then(|| CanaryDeployment {
            application_logical_id: format!("{}DeploymentApplication", prefix),
            group_logical_id: format!("{}DeploymentGroup", prefix),
            role_logical_id: format!("{}DeploymentRole", prefix),
            deployment_config: CANARY_DEPLOYMENT_CONFIG.to_string(),
            alarms: monitoring.alarm_names(),
        });

        info!(
            "Compute endpoint {} ({}, timeout {}s, canary: {})",
            options.function_name,
            image,
            config.compute.timeout_secs,
            canary.is_some()
        );

        Ok(Self {
            function_name: options.function_name.clone(),
            physical_name,
            prefix,
            placement: placement.clone(),
            image: image.clone(),
            image_uri: image.image_uri(repository),
            timeout_secs: config.compute.timeout_secs,
            memory_mb: config.compute.memory_mb,
            tracing: config.compute.tracing,
            insights: config.is_protected(),
            protected: config.is_protected(),
            stage_name: config.stage.as_str().to_string(),
            environment,
            secret_grant,
            port_grant,
            canary,
            cors,
            api_name,
            monitoring,
        })
    }

    pub fn outputs(&self) -> ComputeOutputs {
        ComputeOutputs {
            function_name: self.physical_name.clone(),
            function_arn: Token::get_att(self.function_id(), "Arn"),
            api_url: self.api_url(),
        }
    }

    pub fn api_url(&self) -> Token {
        Token::join(
            "",
            vec![
                Token::literal("https://"),
                Token::reference(self.api_id()),
                Token::literal(".execute-api."),
                Token::region(),
                Token::literal("."),
                Token::url_suffix(),
                Token::literal(format!("/{}/", self.stage_name)),
            ],
        )
    }

    fn function_id(&self) -> String {
        format!("{}Function", self.prefix)
    }

    fn role_id(&self) -> String {
        format!("{}Role", self.prefix)
    }

    fn version_id(&self) -> String {
        logical_id(&[self.prefix.as_str(), "version", self.image.fingerprint().as_str()])
    }

    fn alias_id(&self) -> String {
        format!("{}AliasLive", self.prefix)
    }

    fn api_id(&self) -> String {
        format!("{}Api", self.prefix)
    }

    fn function_resources(&self) -> Vec<Resource> {
        let mut managed_policies =
            vec!["arn:aws:iam::aws:policy/service-role/AWSLambdaVPCAccessExecutionRole"];
        if self.tracing {
            managed_policies.push("arn:aws:iam::aws:policy/AWSXRayDaemonWriteAccess");
        }
        if self.insights {
            managed_policies.push(INSIGHTS_POLICY_ARN);
        }

        let variables: BTreeMap<&String, Value> = self
            .environment
            .iter()
            .map(|(name, value)| (name, value.to_json()))
            .collect();
        let tracing_mode = if self.tracing { "Active" } else { "PassThrough" };

        let mut function = Resource::new(
            self.function_id(),
            "AWS::Lambda::Function",
            json!({
                "FunctionName": self.physical_name,
                "PackageType": "Image",
                "Code": { "ImageUri": self.image_uri.to_json() },
                "Role": Token::get_att(self.role_id(), "Arn").to_json(),
                "Timeout": self.timeout_secs,
                "MemorySize": self.memory_mb,
                "Architectures": ["x86_64"],
                "TracingConfig": { "Mode": tracing_mode },
                "Environment": { "Variables": variables },
                "VpcConfig": {
                    "SubnetIds": list_to_json(&self.placement.subnet_ids),
                    "SecurityGroupIds": [self.placement.security_group.id.to_json()],
                },
            }),
        )
        .depends_on(self.role_id());

        let mut resources = vec![Resource::new(
            self.role_id(),
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy("lambda.amazonaws.com"),
                "ManagedPolicyArns": managed_policies,
            }),
        )];

        if let Some(grant) = &self.secret_grant {
            let policy_id = format!("{}SecretReadPolicy", self.prefix);
            resources.push(Resource::new(
                &policy_id,
                "AWS::IAM::Policy",
                json!({
                    "PolicyName": policy_id,
                    "Roles": [Token::reference(self.role_id()).to_json()],
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Action": grant.actions,
                            "Resource": grant.secret_arn.to_json(),
                        }],
                    },
                }),
            ));
            function = function.depends_on(policy_id);
        }

        resources.push(function);
        resources.push(Resource::new(
            self.version_id(),
            "AWS::Lambda::Version",
            json!({ "FunctionName": Token::reference(self.function_id()).to_json() }),
        ));

        let mut alias = Resource::new(
            self.alias_id(),
            "AWS::Lambda::Alias",
            json!({
                "Name": ALIAS_NAME,
                "FunctionName": Token::reference(self.function_id()).to_json(),
                "FunctionVersion": Token::get_att(self.version_id(), "Version").to_json(),
            }),
        );

        if let Some(canary) = &self.canary {
            alias = alias.with_attribute(
                "UpdatePolicy",
                json!({
                    "CodeDeployLambdaAliasUpdate": {
                        "ApplicationName": Token::reference(&canary.application_logical_id).to_json(),
                        "DeploymentGroupName": Token::reference(&canary.group_logical_id).to_json(),
                    }
                }),
            );
            resources.push(alias);
            resources.extend(canary_resources(canary));
        } else {
            resources.push(alias);
        }

        resources
    }

    fn api_resources(&self) -> Vec<Resource> {
        let api_id = self.api_id();
        let api_ref = Token::reference(&api_id).to_json();
        let proxy_id = format!("{}ProxyResource", api_id);
        let alias_arn = Token::reference(self.alias_id());

        let integration_uri = Token::join(
            "",
            vec![
                Token::literal("arn:aws:apigateway:"),
                Token::region(),
                Token::literal(":lambda:path/2015-03-31/functions/"),
                alias_arn.clone(),
                Token::literal("/invocations"),
            ],
        )
        .to_json();

        let proxy_method = |id: &str, resource_id: Value| {
            Resource::new(
                id,
                "AWS::ApiGateway::Method",
                json!({
                    "RestApiId": api_ref,
                    "ResourceId": resource_id,
                    "HttpMethod": "ANY",
                    "AuthorizationType": "NONE",
                    "Integration": {
                        "Type": "AWS_PROXY",
                        "IntegrationHttpMethod": "POST",
                        "Uri": integration_uri,
                    },
                }),
            )
        };

        let cors_method = |id: &str, resource_id: Value| {
            let mut integration_response = json!({
                "StatusCode": "204",
                "ResponseParameters": self.cors.integration_response_parameters(),
            });
            if let Some(template) = self.cors.origin_template() {
                integration_response["ResponseTemplates"] = json!({ "application/json": template });
            }
            Resource::new(
                id,
                "AWS::ApiGateway::Method",
                json!({
                    "RestApiId": api_ref,
                    "ResourceId": resource_id,
                    "HttpMethod": "OPTIONS",
                    "AuthorizationType": "NONE",
                    "Integration": {
                        "Type": "MOCK",
                        "RequestTemplates": { "application/json": "{ statusCode: 200 }" },
                        "IntegrationResponses": [integration_response],
                    },
                    "MethodResponses": [{
                        "StatusCode": "204",
                        "ResponseParameters": self.cors.method_response_parameters(),
                    }],
                }),
            )
        };

        let root = Token::get_att(&api_id, "RootResourceId").to_json();
        let proxy = Token::reference(&proxy_id).to_json();
        let methods = [
            format!("{}RootAnyMethod", api_id),
            format!("{}ProxyAnyMethod", api_id),
            format!("{}RootOptionsMethod", api_id),
            format!("{}ProxyOptionsMethod", api_id),
        ];

        let deployment_id = format!("{}Deployment", api_id);
        let mut deployment = Resource::new(
            &deployment_id,
            "AWS::ApiGateway::Deployment",
            json!({ "RestApiId": api_ref, "Description": format!("{} deployment", self.api_name) }),
        );
        for method in &methods {
            deployment = deployment.depends_on(method.as_str());
        }

        let logging_level = if self.protected { "ERROR" } else { "INFO" };

        vec![
            Resource::new(
                &api_id,
                "AWS::ApiGateway::RestApi",
                json!({ "Name": self.api_name }),
            ),
            Resource::new(
                &proxy_id,
                "AWS::ApiGateway::Resource",
                json!({ "RestApiId": api_ref, "ParentId": root, "PathPart": "{proxy+}" }),
            ),
            proxy_method(&methods[0], root.clone()),
            proxy_method(&methods[1], proxy.clone()),
            cors_method(&methods[2], root),
            cors_method(&methods[3], proxy),
            deployment,
            Resource::new(
                format!("{}Stage", api_id),
                "AWS::ApiGateway::Stage",
                json!({
                    "RestApiId": api_ref,
                    "DeploymentId": Token::reference(&deployment_id).to_json(),
                    "StageName": self.stage_name,
                    "TracingEnabled": self.tracing,
                    "MethodSettings": [{
                        "ResourcePath": "/*",
                        "HttpMethod": "*",
                        "LoggingLevel": logging_level,
                        "MetricsEnabled": true,
                    }],
                }),
            ),
            Resource::new(
                format!("{}InvokePermission", api_id),
                "AWS::Lambda::Permission",
                json!({
                    "Action": "lambda:InvokeFunction",
                    "FunctionName": alias_arn.to_json(),
                    "Principal": "apigateway.amazonaws.com",
                    "SourceArn": Token::join(
                        "",
                        vec![
                            Token::literal("arn:aws:execute-api:"),
                            Token::region(),
                            Token::literal(":"),
                            Token::account_id(),
                            Token::literal(":"),
                            Token::reference(&api_id),
                            Token::literal("/*/*/*"),
                        ],
                    )
                    .to_json(),
                }),
            ),
        ]
    }
}

impl Construct for ComputeEndpoint {
    fn id(&self) -> &str {
        &self.function_name
    }

    fn resources(&self) -> Vec<Resource> {
        let mut resources = self.function_resources();
        resources.extend(self.api_resources());
        resources.extend(self.monitoring.resources());
        resources
    }
}

fn canary_resources(canary: &CanaryDeployment) -> Vec<Resource> {
    let alarms: Vec<Value> = canary
        .alarms
        .iter()
        .map(|name| json!({ "Name": name.to_json() }))
        .collect();

    vec![
        Resource::new(
            &canary.application_logical_id,
            "AWS::CodeDeploy::Application",
            json!({ "ComputePlatform": "Lambda" }),
        ),
        Resource::new(
            &canary.role_logical_id,
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": assume_role_policy("codedeploy.amazonaws.com"),
                "ManagedPolicyArns": [
                    "arn:aws:iam::aws:policy/service-role/AWSCodeDeployRoleForLambdaLimited"
                ],
            }),
        ),
        Resource::new(
            &canary.group_logical_id,
            "AWS::CodeDeploy::DeploymentGroup",
            json!({
                "ApplicationName": Token::reference(&canary.application_logical_id).to_json(),
                "ServiceRoleArn": Token::get_att(&canary.role_logical_id, "Arn").to_json(),
                "DeploymentConfigName": canary.deployment_config,
                "DeploymentStyle": {
                    "DeploymentType": "BLUE_GREEN",
                    "DeploymentOption": "WITH_TRAFFIC_CONTROL",
                },
                "AlarmConfiguration": { "Enabled": true, "Alarms": alarms },
                "AutoRollbackConfiguration": {
                    "Enabled": true,
                    "Events": ["DEPLOYMENT_FAILURE", "DEPLOYMENT_STOP_ON_ALARM"],
                },
            }),
        ),
    ]
}

fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
}
