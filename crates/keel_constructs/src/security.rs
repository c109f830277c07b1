//! Security groups and the references other constructs hold to them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::resource::Resource;
use crate::token::Token;

/// Inbound permission from another security group on one TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    /// Key of the source group.
    pub source_key: String,
    pub source_id: Token,
    pub port: u16,
    pub description: String,
}

/// A security group owned by the construct that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// Stable identity used to compare groups across stacks.
    pub key: String,
    pub logical_id: String,
    pub description: String,
    pub allow_all_outbound: bool,
    pub ingress: Vec<IngressRule>,
}

impl SecurityGroup {
    pub fn new(
        key: impl Into<String>,
        logical_id: impl Into<String>,
        description: impl Into<String>,
        allow_all_outbound: bool,
    ) -> Self {
        Self {
            key: key.into(),
            logical_id: logical_id.into(),
            description: description.into(),
            allow_all_outbound,
            ingress: Vec::new(),
        }
    }

    pub fn id(&self) -> Token {
        Token::get_att(&self.logical_id, "GroupId")
    }

    /// Admit `source` on `port`. Returns false if the rule already existed.
    pub fn allow_from(&mut self, source: &SecurityGroupRef, port: u16, description: &str) -> bool {
        if self.admits(&source.key, port) {
            return false;
        }
        self.ingress.push(IngressRule {
            source_key: source.key.clone(),
            source_id: source.id.clone(),
            port,
            description: description.to_string(),
        });
        true
    }

    pub fn admits(&self, source_key: &str, port: u16) -> bool {
        self.ingress
            .iter()
            .any(|rule| rule.source_key == source_key && rule.port == port)
    }

    /// Reference for consumers in the same stack.
    pub fn to_ref(&self) -> SecurityGroupRef {
        SecurityGroupRef {
            key: self.key.clone(),
            id: self.id(),
            ingress: self
                .ingress
                .iter()
                .map(|rule| Permission {
                    source_key: rule.source_key.clone(),
                    port: rule.port,
                })
                .collect(),
        }
    }

    pub fn to_resource(&self, vpc_id: &Token) -> Resource {
        let ingress: Vec<Value> = self
            .ingress
            .iter()
            .map(|rule| {
                json!({
                    "IpProtocol": "tcp",
                    "FromPort": rule.port,
                    "ToPort": rule.port,
                    "SourceSecurityGroupId": rule.source_id.to_json(),
                    "Description": rule.description,
                })
            })
            .collect();

        let egress = if self.allow_all_outbound {
            json!([{
                "CidrIp": "0.0.0.0/0",
                "IpProtocol": "-1",
                "Description": "Allow all outbound traffic by default",
            }])
        } else {
            // Placeholder rule that matches nothing, replacing the default allow-all.
            json!([{
                "CidrIp": "255.255.255.255/32",
                "IpProtocol": "icmp",
                "FromPort": 252,
                "ToPort": 86,
                "Description": "Disallow all traffic",
            }])
        };

        Resource::new(
            &self.logical_id,
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": self.description,
                "VpcId": vpc_id.to_json(),
                "SecurityGroupIngress": ingress,
                "SecurityGroupEgress": egress,
            }),
        )
    }
}

/// Source/port pair a group admits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub source_key: String,
    pub port: u16,
}

/// What a consumer knows about a security group it does not own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRef {
    pub key: String,
    pub id: Token,
    pub ingress: Vec<Permission>,
}

impl SecurityGroupRef {
    /// Same group, addressed through a different token (e.g. an import).
    pub fn with_id(&self, id: Token) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    pub fn admits(&self, source: &SecurityGroupRef, port: u16) -> bool {
        self.ingress
            .iter()
            .any(|p| p.source_key == source.key && p.port == port)
    }
}
