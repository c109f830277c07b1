//! Integration tests for the construct library.

use keel_config::{resolve, RemovalPolicy, StageName};
use keel_constructs::{
    ensure_unique, ComputeEndpoint, ComputeOptions, Construct, ConstructError, ConstructResult,
    DatabaseOverrides, ImageReference, ImageRepository, InstanceClass, ManagedDatabase,
    NetworkTopology, Resource,
};
use serde_json::json;

fn endpoint(stage: &str, options: &ComputeOptions) -> ConstructResult<ComputeEndpoint> {
    let config = resolve(stage);
    let network = NetworkTopology::build(&config)?;
    let repository = ImageRepository::build("keel", &config)?;
    ComputeEndpoint::build(
        &config,
        &network.compute_placement(),
        &repository.reference(),
        &ImageReference::parse("2024.06.1")?,
        None,
        options,
    )
}

fn preflight_responses(compute: &ComputeEndpoint) -> Vec<(serde_json::Value, serde_json::Value)> {
    compute
        .resources()
        .into_iter()
        .filter(|r| r.properties["HttpMethod"] == "OPTIONS")
        .map(|r| {
            (
                r.properties["Integration"]["IntegrationResponses"][0].clone(),
                r.properties["MethodResponses"][0].clone(),
            )
        })
        .collect()
}

fn full_stage(stage: &str, canary: bool) -> Vec<Resource> {
    let config = resolve(stage);
    let network = NetworkTopology::build(&config).unwrap();
    let repository = ImageRepository::build("keel", &config).unwrap();
    let database = ManagedDatabase::build(
        "demo",
        &config,
        &network.database_placement(),
        &DatabaseOverrides::default(),
        Some("ops@example.org"),
    )
    .unwrap();
    let compute = ComputeEndpoint::build(
        &config,
        &network.compute_placement(),
        &repository.reference(),
        &ImageReference::parse("2024.06.1").unwrap(),
        Some(&database.outputs()),
        &ComputeOptions {
            canary,
            alert_email: Some("ops@example.org".to_string()),
            ..ComputeOptions::new("keel_demo")
        },
    )
    .unwrap();

    let mut resources = network.resources();
    resources.extend(repository.resources());
    resources.extend(database.resources());
    resources.extend(compute.resources());
    resources
}

#[test]
fn test_whole_stage_has_unique_logical_ids() {
    for stage in ["dev", "prod"] {
        let resources = full_stage(stage, true);
        ensure_unique(&resources).unwrap();
    }
}

#[test]
fn test_database_sg_has_single_ingress_after_compute_binds() {
    let resources = full_stage("prod", false);
    let db_sg = resources
        .iter()
        .find(|r| r.logical_id == "DatabaseSecurityGroup")
        .unwrap();

    let ingress = db_sg.properties["SecurityGroupIngress"].as_array().unwrap();
    assert_eq!(ingress.len(), 1);
    assert_eq!(ingress[0]["FromPort"], 5445);
    assert_eq!(
        ingress[0]["SourceSecurityGroupId"]["Fn::GetAtt"][0],
        "ComputeSecurityGroup"
    );
}

#[test]
fn test_alert_email_override_reaches_every_topic() {
    let resources = full_stage("dev", false);
    let subscriptions: Vec<&Resource> = resources
        .iter()
        .filter(|r| r.resource_type == "AWS::SNS::Subscription")
        .collect();

    assert_eq!(subscriptions.len(), 2);
    for subscription in subscriptions {
        assert_eq!(subscription.properties["Endpoint"], "ops@example.org");
    }
}

#[test]
fn test_protected_stage_retains_stateful_resources() {
    let config = resolve("prod");
    assert_eq!(config.stage, StageName::Prod);

    let resources = full_stage("prod", false);
    let policy_of = |resource_type: &str| {
        resources
            .iter()
            .find(|r| r.resource_type == resource_type)
            .and_then(|r| r.removal_policy)
    };

    assert_eq!(policy_of("AWS::RDS::DBInstance"), Some(RemovalPolicy::Snapshot));
    assert_eq!(policy_of("AWS::ECR::Repository"), Some(RemovalPolicy::Retain));
    assert_eq!(policy_of("AWS::SecretsManager::Secret"), Some(RemovalPolicy::Retain));
}

#[test]
fn test_instance_class_examples() {
    assert!(InstanceClass::parse("t4g.micro").is_ok());
    assert_eq!(
        InstanceClass::parse("invalid"),
        Err(ConstructError::InvalidInstanceClass("invalid".to_string()))
    );
}

#[test]
fn test_missing_workload_is_fatal() {
    assert_eq!(ImageReference::parse(""), Err(ConstructError::MissingWorkload));
}

#[test]
fn test_single_origin_is_answered_literally() {
    let options = ComputeOptions {
        cors_allow_origins: Some(vec!["https://app.example.org".to_string()]),
        ..ComputeOptions::new("keel_demo")
    };
    let compute = endpoint("dev", &options).unwrap();
    let responses = preflight_responses(&compute);
    assert_eq!(responses.len(), 2);

    for (integration, method) in responses {
        let headers = &integration["ResponseParameters"];
        assert_eq!(
            headers["method.response.header.Access-Control-Allow-Origin"],
            "'https://app.example.org'"
        );
        assert!(headers.get("method.response.header.Vary").is_none());
        assert!(integration.get("ResponseTemplates").is_none());
        assert!(method["ResponseParameters"].get("method.response.header.Vary").is_none());
    }
}

#[test]
fn test_several_origins_echo_the_matching_one() {
    let options = ComputeOptions {
        cors_allow_origins: Some(vec![
            "https://app.example.org".to_string(),
            "https://admin.example.org".to_string(),
        ]),
        ..ComputeOptions::new("keel_demo")
    };
    let compute = endpoint("prod", &options).unwrap();
    assert!(compute.cors.is_multi_origin());

    for (integration, method) in preflight_responses(&compute) {
        let headers = &integration["ResponseParameters"];
        let origin = headers["method.response.header.Access-Control-Allow-Origin"]
            .as_str()
            .unwrap();
        assert_eq!(origin, "'https://app.example.org'");
        assert!(!origin.contains(','));
        assert_eq!(headers["method.response.header.Vary"], "'Origin'");
        assert_eq!(method["ResponseParameters"]["method.response.header.Vary"], json!(true));

        let template = integration["ResponseTemplates"]["application/json"]
            .as_str()
            .unwrap();
        assert!(template.contains("$origin == \"https://app.example.org\""));
        assert!(template.contains("$origin == \"https://admin.example.org\""));
        assert!(template.contains("responseOverride.header.Access-Control-Allow-Origin"));
    }
}

#[test]
fn test_invalid_origin_lists_are_refused() {
    for origins in [vec![], vec!["*".to_string(), "https://app.example.org".to_string()]] {
        let options = ComputeOptions {
            cors_allow_origins: Some(origins),
            ..ComputeOptions::new("keel_demo")
        };
        assert!(matches!(
            endpoint("dev", &options),
            Err(ConstructError::InvalidOverride { .. })
        ));
    }
}
