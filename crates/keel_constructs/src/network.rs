//! Network topology construct.
//!
//! One virtual network split into three subnet groups, each spread over the
//! configured availability zones:
//!
//! | Group      | Routing                 | Used by            |
//! |------------|-------------------------|--------------------|
//! | `public`   | internet gateway        | NAT gateways       |
//! | `compute`  | default route via NAT   | functions          |
//! | `database` | no default route        | database instances |
//!
//! The database security group has no outbound access and a single inbound
//! rule: the compute security group on the database port.

use keel_config::EnvironmentConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::cidr::CidrBlock;
use crate::error::{ConstructError, ConstructResult};
use crate::resource::{logical_id, Construct, Resource};
use crate::security::{SecurityGroup, SecurityGroupRef};
use crate::token::{list_to_json, Token};

/// Every subnet is a /24.
pub const SUBNET_PREFIX: u8 = 24;

pub const MIN_AVAILABILITY_ZONES: u8 = 2;

pub const COMPUTE_SG_KEY: &str = "compute-sg";
pub const DATABASE_SG_KEY: &str = "database-sg";
pub const ENDPOINT_SG_KEY: &str = "secrets-endpoint-sg";

const HTTPS_PORT: u16 = 443;
const VPC_ID: &str = "Vpc";

/// Role of a subnet group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetRole {
    Public,
    Compute,
    Database,
}

impl SubnetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetRole::Public => "public",
            SubnetRole::Compute => "compute",
            SubnetRole::Database => "database",
        }
    }

    pub fn all() -> [SubnetRole; 3] {
        [SubnetRole::Public, SubnetRole::Compute, SubnetRole::Database]
    }

    fn map_public_ip(&self) -> bool {
        matches!(self, SubnetRole::Public)
    }
}

/// A single subnet in one availability zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub logical_id: String,
    pub role: SubnetRole,
    pub az_index: usize,
    pub cidr: CidrBlock,
}

impl Subnet {
    pub fn id(&self) -> Token {
        Token::reference(&self.logical_id)
    }

    fn route_table_id(&self) -> String {
        format!("{}RouteTable", self.logical_id)
    }
}

/// All subnets of one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetGroup {
    pub role: SubnetRole,
    pub subnets: Vec<Subnet>,
}

impl SubnetGroup {
    pub fn ids(&self) -> Vec<Token> {
        self.subnets.iter().map(Subnet::id).collect()
    }
}

/// NAT gateway and its elastic IP, living in a public subnet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatGateway {
    pub logical_id: String,
    pub eip_logical_id: String,
    pub subnet_logical_id: String,
}

/// Private endpoint so isolated workloads reach the secret store without internet egress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceEndpoint {
    pub logical_id: String,
    pub service: String,
    pub subnet_ids: Vec<Token>,
    pub security_group: SecurityGroup,
}

/// Where a consumer places its resources inside the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub vpc_id: Token,
    pub subnet_ids: Vec<Token>,
    pub security_group: SecurityGroupRef,
}

/// The network, its subnet groups, and its security groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub cidr: CidrBlock,
    pub zones: u8,
    pub public: SubnetGroup,
    pub compute: SubnetGroup,
    pub database: SubnetGroup,
    pub nat_gateways: Vec<NatGateway>,
    pub compute_security_group: SecurityGroup,
    pub database_security_group: SecurityGroup,
    pub secrets_endpoint: InterfaceEndpoint,
}

impl NetworkTopology {
    /// Build the topology for an environment.
    ///
    /// Fails without producing anything when the CIDR cannot hold three /24
    /// groups across the configured zones.
    pub fn build(config: &EnvironmentConfig) -> ConstructResult<Self> {
        let cidr = CidrBlock::parse(&config.vpc.cidr)?;
        let zones = config.vpc.max_azs;

        if zones < MIN_AVAILABILITY_ZONES {
            return Err(ConstructError::InsufficientZones {
                required: MIN_AVAILABILITY_ZONES,
                actual: zones,
            });
        }
        if config.vpc.nat_gateways == 0 {
            return Err(ConstructError::MissingNatGateway);
        }

        let required = SubnetRole::all().len() as u32 * u32::from(zones);
        let available = cidr.capacity(SUBNET_PREFIX);
        if available < required {
            return Err(ConstructError::CidrTooSmall {
                cidr: cidr.to_string(),
                required,
                available,
            });
        }

        let mut next_block = 0u32;
        let mut allocate = |role: SubnetRole| -> ConstructResult<SubnetGroup> {
            let mut subnets = Vec::with_capacity(usize::from(zones));
            for az_index in 0..usize::from(zones) {
                let ordinal = (az_index + 1).to_string();
                let block = cidr
                    .subnet(SUBNET_PREFIX, next_block)
                    .ok_or_else(|| ConstructError::InvalidCidr(cidr.to_string()))?;
                next_block += 1;
                subnets.push(Subnet {
                    logical_id: logical_id(&[VPC_ID, role.as_str(), "subnet", ordinal.as_str()]),
                    role,
                    az_index,
                    cidr: block,
                });
            }
            Ok(SubnetGroup { role, subnets })
        };

        let public = allocate(SubnetRole::Public)?;
        let compute = allocate(SubnetRole::Compute)?;
        let database = allocate(SubnetRole::Database)?;

        let nat_count = usize::from(config.vpc.nat_gateways.min(zones));
        let nat_gateways = public
            .subnets
            .iter()
            .take(nat_count)
            .map(|subnet| NatGateway {
                logical_id: format!("{}NatGateway", subnet.logical_id),
                eip_logical_id: format!("{}Eip", subnet.logical_id),
                subnet_logical_id: subnet.logical_id.clone(),
            })
            .collect();

        let compute_security_group = SecurityGroup::new(
            COMPUTE_SG_KEY,
            "ComputeSecurityGroup",
            "Compute functions",
            true,
        );

        let mut database_security_group = SecurityGroup::new(
            DATABASE_SG_KEY,
            "DatabaseSecurityGroup",
            "Database instances",
            false,
        );
        database_security_group.allow_from(
            &compute_security_group.to_ref(),
            config.database.port,
            "Compute access to database",
        );

        let mut endpoint_security_group = SecurityGroup::new(
            ENDPOINT_SG_KEY,
            "SecretsEndpointSecurityGroup",
            "Secrets manager interface endpoint",
            true,
        );
        endpoint_security_group.allow_from(
            &compute_security_group.to_ref(),
            HTTPS_PORT,
            "Compute access to secrets endpoint",
        );

        let secrets_endpoint = InterfaceEndpoint {
            logical_id: "VpcSecretsManagerEndpoint".to_string(),
            service: "secretsmanager".to_string(),
            subnet_ids: compute.ids(),
            security_group: endpoint_security_group,
        };

        info!(
            "Network {} across {} zones with {} NAT gateway(s)",
            cidr, zones, nat_count
        );

        Ok(Self {
            cidr,
            zones,
            public,
            compute,
            database,
            nat_gateways,
            compute_security_group,
            database_security_group,
            secrets_endpoint,
        })
    }

    pub fn vpc_id(&self) -> Token {
        Token::reference(VPC_ID)
    }

    pub fn subnet_group(&self, role: SubnetRole) -> &SubnetGroup {
        match role {
            SubnetRole::Public => &self.public,
            SubnetRole::Compute => &self.compute,
            SubnetRole::Database => &self.database,
        }
    }

    /// Placement for functions: compute subnets and the compute security group.
    pub fn compute_placement(&self) -> Placement {
        Placement {
            vpc_id: self.vpc_id(),
            subnet_ids: self.compute.ids(),
            security_group: self.compute_security_group.to_ref(),
        }
    }

    /// Placement for databases: isolated subnets and the database security group.
    pub fn database_placement(&self) -> Placement {
        Placement {
            vpc_id: self.vpc_id(),
            subnet_ids: self.database.ids(),
            security_group: self.database_security_group.to_ref(),
        }
    }

    fn subnet_resources(&self, subnet: &Subnet) -> Vec<Resource> {
        let route_table = subnet.route_table_id();
        let mut resources = vec![
            Resource::new(
                &subnet.logical_id,
                "AWS::EC2::Subnet",
                json!({
                    "VpcId": self.vpc_id().to_json(),
                    "CidrBlock": subnet.cidr.to_string(),
                    "AvailabilityZone": Token::AvailabilityZone(subnet.az_index).to_json(),
                    "MapPublicIpOnLaunch": subnet.role.map_public_ip(),
                    "Tags": [{ "Key": "keel:subnet-role", "Value": subnet.role.as_str() }],
                }),
            ),
            Resource::new(
                &route_table,
                "AWS::EC2::RouteTable",
                json!({ "VpcId": self.vpc_id().to_json() }),
            ),
            Resource::new(
                format!("{}Association", route_table),
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({
                    "RouteTableId": Token::reference(&route_table).to_json(),
                    "SubnetId": subnet.id().to_json(),
                }),
            ),
        ];

        match subnet.role {
            SubnetRole::Public => resources.push(
                Resource::new(
                    format!("{}DefaultRoute", subnet.logical_id),
                    "AWS::EC2::Route",
                    json!({
                        "RouteTableId": Token::reference(&route_table).to_json(),
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "GatewayId": Token::reference("VpcInternetGateway").to_json(),
                    }),
                )
                .depends_on("VpcGatewayAttachment"),
            ),
            SubnetRole::Compute => {
                // Zones beyond the NAT count share gateways round-robin.
                let nat = &self.nat_gateways[subnet.az_index % self.nat_gateways.len()];
                resources.push(Resource::new(
                    format!("{}DefaultRoute", subnet.logical_id),
                    "AWS::EC2::Route",
                    json!({
                        "RouteTableId": Token::reference(&route_table).to_json(),
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": Token::reference(&nat.logical_id).to_json(),
                    }),
                ));
            }
            SubnetRole::Database => {}
        }

        resources
    }
}

impl Construct for NetworkTopology {
    fn id(&self) -> &str {
        VPC_ID
    }

    fn resources(&self) -> Vec<Resource> {
        let vpc_id = self.vpc_id();
        let mut resources = vec![
            Resource::new(
                VPC_ID,
                "AWS::EC2::VPC",
                json!({
                    "CidrBlock": self.cidr.to_string(),
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                }),
            ),
            Resource::new("VpcInternetGateway", "AWS::EC2::InternetGateway", json!({})),
            Resource::new(
                "VpcGatewayAttachment",
                "AWS::EC2::VPCGatewayAttachment",
                json!({
                    "VpcId": vpc_id.to_json(),
                    "InternetGatewayId": Token::reference("VpcInternetGateway").to_json(),
                }),
            ),
        ];

        for role in SubnetRole::all() {
            for subnet in &self.subnet_group(role).subnets {
                resources.extend(self.subnet_resources(subnet));
            }
        }

        for nat in &self.nat_gateways {
            resources.push(Resource::new(
                &nat.eip_logical_id,
                "AWS::EC2::EIP",
                json!({ "Domain": "vpc" }),
            ));
            resources.push(Resource::new(
                &nat.logical_id,
                "AWS::EC2::NatGateway",
                json!({
                    "SubnetId": Token::reference(&nat.subnet_logical_id).to_json(),
                    "AllocationId": Token::get_att(&nat.eip_logical_id, "AllocationId").to_json(),
                }),
            ));
        }

        resources.push(self.compute_security_group.to_resource(&vpc_id));
        resources.push(self.database_security_group.to_resource(&vpc_id));
        resources.push(self.secrets_endpoint.security_group.to_resource(&vpc_id));
        resources.push(Resource::new(
            &self.secrets_endpoint.logical_id,
            "AWS::EC2::VPCEndpoint",
            json!({
                "VpcId": vpc_id.to_json(),
                "ServiceName": Token::join(
                    "",
                    vec![
                        Token::literal("com.amazonaws."),
                        Token::region(),
                        Token::literal(format!(".{}", self.secrets_endpoint.service)),
                    ],
                )
                .to_json(),
                "VpcEndpointType": "Interface",
                "PrivateDnsEnabled": true,
                "SubnetIds": list_to_json(&self.secrets_endpoint.subnet_ids),
                "SecurityGroupIds": [self.secrets_endpoint.security_group.id().to_json()],
            }),
        ));

        debug!("Network topology expands to {} resources", resources.len());
        resources
    }
}
