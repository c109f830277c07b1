//! Ambient process context (account and region).

use serde::{Deserialize, Serialize};

pub const ACCOUNT_ENV: &str = "KEEL_ACCOUNT";
pub const REGION_ENV: &str = "KEEL_REGION";

/// Account and region supplied by the surrounding process.
///
/// Passed explicitly to the resolver so resolution stays a pure function of
/// its inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientContext {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl AmbientContext {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self {
            account: account.filter(|a| !a.trim().is_empty()),
            region: region.filter(|r| !r.trim().is_empty()),
        }
    }

    /// Read `KEEL_ACCOUNT` and `KEEL_REGION`.
    pub fn from_env() -> Self {
        Self::new(std::env::var(ACCOUNT_ENV).ok(), std::env::var(REGION_ENV).ok())
    }
}
