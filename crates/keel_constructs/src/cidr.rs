//! IPv4 CIDR arithmetic for subnet allocation.

use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConstructError, ConstructResult};

/// An IPv4 network block, normalized to its network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CidrBlock {
    base: u32,
    prefix: u8,
}

impl CidrBlock {
    pub fn parse(s: &str) -> ConstructResult<Self> {
        let invalid = || ConstructError::InvalidCidr(s.to_string());

        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr = Ipv4Addr::from_str(addr).map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }

        let base = u32::from(addr) & mask(prefix);
        Ok(Self { base, prefix })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.base)
    }

    /// How many blocks of `prefix` length fit inside this block.
    pub fn capacity(&self, prefix: u8) -> u32 {
        if prefix < self.prefix || prefix > 32 {
            return 0;
        }
        let shift = u32::from(prefix - self.prefix);
        if shift >= 32 {
            u32::MAX
        } else {
            1u32 << shift
        }
    }

    /// The `index`-th sub-block of `prefix` length, counting from the base.
    pub fn subnet(&self, prefix: u8, index: u32) -> Option<CidrBlock> {
        if index >= self.capacity(prefix) {
            return None;
        }
        let size = 1u64 << (32 - u32::from(prefix));
        let base = u64::from(self.base) + size * u64::from(index);
        Some(CidrBlock {
            base: base as u32,
            prefix,
        })
    }

    pub fn overlaps(&self, other: &CidrBlock) -> bool {
        let shorter = self.prefix.min(other.prefix);
        self.base & mask(shorter) == other.base & mask(shorter)
    }
}

impl std::fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}
