//! Error types for construct building.

use thiserror::Error;

/// Result type alias for construct operations.
pub type ConstructResult<T> = Result<T, ConstructError>;

/// Construction-time failures. All of them are configuration errors and are
/// never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstructError {
    #[error("Invalid CIDR block: {0}")]
    InvalidCidr(String),

    #[error("CIDR {cidr} holds {available} /24 subnets but {required} are needed")]
    CidrTooSmall {
        cidr: String,
        required: u32,
        available: u32,
    },

    #[error("At least {required} availability zones are required, got {actual}")]
    InsufficientZones { required: u8, actual: u8 },

    #[error("Compute subnets need egress but no NAT gateway is configured")]
    MissingNatGateway,

    #[error("Invalid instance class '{0}': expected '<family>.<size>'")]
    InvalidInstanceClass(String),

    #[error("Invalid override for {construct}: {message}")]
    InvalidOverride { construct: String, message: String },

    #[error("Override for {construct} would downgrade protection: {message}")]
    ProtectionDowngrade { construct: String, message: String },

    #[error("No workload image reference was supplied")]
    MissingWorkload,

    #[error("Invalid image reference '{0}': expected a tag or sha256 digest")]
    InvalidImageReference(String),

    #[error("Security group {target} does not admit {source_group} on port {port}")]
    UnauthorizedDatabaseAccess {
        source_group: String,
        target: String,
        port: u16,
    },

    #[error("Duplicate logical id in construct: {0}")]
    DuplicateLogicalId(String),
}
