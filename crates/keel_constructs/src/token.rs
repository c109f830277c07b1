//! Deploy-time value references.
//!
//! Most attributes of a resource (ids, ARNs, endpoint addresses) only exist
//! once the provisioning engine has created it. Constructs pass them around as
//! [`Token`]s which render to template intrinsics.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A value resolved by the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    Literal(String),
    /// `Ref` to a resource in the same template, or a pseudo parameter.
    Ref(String),
    GetAtt { logical_id: String, attribute: String },
    /// Value exported by another stack.
    Import(String),
    /// Comma-joined list exported by another stack.
    ImportList(String),
    Join { separator: String, parts: Vec<Token> },
    /// The n-th availability zone of the deployment region.
    AvailabilityZone(usize),
}

impl Token {
    pub fn literal(value: impl Into<String>) -> Self {
        Token::Literal(value.into())
    }

    pub fn reference(logical_id: impl Into<String>) -> Self {
        Token::Ref(logical_id.into())
    }

    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Token::GetAtt {
            logical_id: logical_id.into(),
            attribute: attribute.into(),
        }
    }

    pub fn join(separator: impl Into<String>, parts: Vec<Token>) -> Self {
        Token::Join {
            separator: separator.into(),
            parts,
        }
    }

    pub fn region() -> Self {
        Token::Ref("AWS::Region".to_string())
    }

    pub fn account_id() -> Self {
        Token::Ref("AWS::AccountId".to_string())
    }

    pub fn url_suffix() -> Self {
        Token::Ref("AWS::URLSuffix".to_string())
    }

    /// True if the value comes from another stack.
    pub fn is_import(&self) -> bool {
        match self {
            Token::Import(_) | Token::ImportList(_) => true,
            Token::Join { parts, .. } => parts.iter().any(Token::is_import),
            _ => false,
        }
    }

    /// True if the token renders to a list rather than a scalar.
    pub fn is_list(&self) -> bool {
        matches!(self, Token::ImportList(_))
    }

    /// Render as a template intrinsic.
    pub fn to_json(&self) -> Value {
        match self {
            Token::Literal(value) => Value::String(value.clone()),
            Token::Ref(id) => json!({ "Ref": id }),
            Token::GetAtt {
                logical_id,
                attribute,
            } => json!({ "Fn::GetAtt": [logical_id, attribute] }),
            Token::Import(name) => json!({ "Fn::ImportValue": name }),
            Token::ImportList(name) => {
                json!({ "Fn::Split": [",", { "Fn::ImportValue": name }] })
            }
            Token::Join { separator, parts } => {
                let parts: Vec<Value> = parts.iter().map(Token::to_json).collect();
                json!({ "Fn::Join": [separator, parts] })
            }
            Token::AvailabilityZone(index) => {
                json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
            }
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Literal(value) => write!(f, "{}", value),
            Token::Ref(id) => write!(f, "${{{}}}", id),
            Token::GetAtt {
                logical_id,
                attribute,
            } => write!(f, "${{{}.{}}}", logical_id, attribute),
            Token::Import(name) | Token::ImportList(name) => write!(f, "${{import:{}}}", name),
            Token::Join { separator, parts } => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(separator))
            }
            Token::AvailabilityZone(index) => write!(f, "${{az:{}}}", index),
        }
    }
}

/// Render a list of tokens, collapsing a single imported list into itself.
pub fn list_to_json(tokens: &[Token]) -> Value {
    match tokens {
        [single] if single.is_list() => single.to_json(),
        _ => Value::Array(tokens.iter().map(Token::to_json).collect()),
    }
}

/// Collect every export name read through `Fn::ImportValue` anywhere in `value`.
pub fn imported_names(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                match (key.as_str(), inner) {
                    ("Fn::ImportValue", Value::String(name)) => {
                        names.insert(name.clone());
                    }
                    _ => imported_names(inner, names),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| imported_names(item, names)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsics() {
        assert_eq!(Token::reference("Vpc").to_json(), json!({ "Ref": "Vpc" }));
        assert_eq!(
            Token::get_att("Db", "Endpoint.Address").to_json(),
            json!({ "Fn::GetAtt": ["Db", "Endpoint.Address"] })
        );
        assert_eq!(
            Token::Import("dev-vpc-id".to_string()).to_json(),
            json!({ "Fn::ImportValue": "dev-vpc-id" })
        );
    }

    #[test]
    fn test_imported_list_is_not_nested() {
        let tokens = vec![Token::ImportList("dev-subnets".to_string())];
        let rendered = list_to_json(&tokens);
        assert!(rendered.get("Fn::Split").is_some());

        let plain = list_to_json(&[Token::reference("A"), Token::reference("B")]);
        assert_eq!(plain.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_join_propagates_import() {
        let joined = Token::join(
            "",
            vec![Token::literal("https://"), Token::Import("x".to_string())],
        );
        assert!(joined.is_import());
        assert!(!Token::reference("Local").is_import());
    }

    #[test]
    fn test_imported_names_are_found_at_any_depth() {
        let template = json!({
            "Properties": {
                "VpcId": { "Fn::ImportValue": "dev-vpc-id" },
                "SubnetIds": { "Fn::Split": [",", { "Fn::ImportValue": "dev-subnets" }] },
                "Tags": [{ "Key": "Name", "Value": "Fn::ImportValue" }]
            }
        });
        let mut names = BTreeSet::new();
        imported_names(&template, &mut names);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["dev-subnets", "dev-vpc-id"]
        );
    }
}
