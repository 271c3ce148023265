//! Address-selection policies.
//!
//! A coordinator holds an ordered chain of policies.  Each one either
//! picks how the container's address is obtained or passes; the first
//! policy that picks wins.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::NetworkRequest;

/// How the address for one container is obtained from IPAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressMode {
    /// Reserve this exact address.
    Reserve(Ipv4Addr),
    /// Ask IPAM to choose `count` addresses.
    Request { count: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPolicy {
    /// Use the address the framework put in the network request.
    StaticAddress,
    /// Use the address carried in the executor's environment.
    EnvironmentDerived,
    /// Let IPAM pick one address.
    DynamicRequest,
}

impl AddressPolicy {
    pub fn default_chain() -> Vec<AddressPolicy> {
        vec![AddressPolicy::StaticAddress, AddressPolicy::DynamicRequest]
    }

    /// `Ok(None)` means this policy has no opinion for the request.
    pub fn select(
        &self,
        request: &NetworkRequest,
        environment: &BTreeMap<String, String>,
        env_var: &str,
    ) -> Result<Option<AddressMode>> {
        match self {
            AddressPolicy::StaticAddress => request
                .ip_address
                .as_deref()
                .map(|addr| parse_ipv4(addr).map(AddressMode::Reserve))
                .transpose(),
            AddressPolicy::EnvironmentDerived => environment
                .get(env_var)
                .map(|addr| parse_ipv4(addr).map(AddressMode::Reserve))
                .transpose(),
            AddressPolicy::DynamicRequest => Ok(Some(AddressMode::Request { count: 1 })),
        }
    }
}

/// Walk `chain` and return the first mode any policy selects.
pub fn select_mode(
    chain: &[AddressPolicy],
    request: &NetworkRequest,
    environment: &BTreeMap<String, String>,
    env_var: &str,
) -> Result<AddressMode> {
    for policy in chain {
        if let Some(mode) = policy.select(request, environment, env_var)? {
            return Ok(mode);
        }
    }
    Err(Error::InvalidRequest(format!(
        "no address policy in {:?} selected an address",
        chain
    )))
}

fn parse_ipv4(addr: &str) -> Result<Ipv4Addr> {
    addr.trim()
        .parse()
        .map_err(|_| Error::InvalidRequest(format!("'{}' is not an IPv4 address", addr)))
}
