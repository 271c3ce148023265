//! Documents exchanged with the IPAM and isolator helpers.
//!
//! Every request is a JSON object of the form
//! `{"command": "<kind>", "args": {...}}` written to the helper's stdin.
//! Responses are JSON objects; a non-null `error` member marks failure
//! and is handled by [`crate::helper::decode_response`] before any of
//! the types below are decoded.

use serde::{Deserialize, Serialize};

/// Requests understood by the IPAM helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum IpamRequest {
    /// Reserve a caller-chosen address.
    Reserve(ReserveArgs),
    /// Let IPAM choose `num_ipv4` addresses.
    Allocate(AllocateArgs),
    /// Return previously assigned addresses.
    Release(ReleaseArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveArgs {
    pub hostname: String,
    pub ipv4_addrs: Vec<String>,
    pub uid: String,
    pub netgroups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateArgs {
    pub hostname: String,
    pub num_ipv4: u32,
    pub uid: String,
    pub netgroups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseArgs {
    pub ips: Vec<String>,
    pub uid: String,
}

/// IPAM success payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamResponse {
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
}

/// Requests understood by the isolator helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum IsolatorRequest {
    /// Wire the namespace of a running container.
    Isolate(IsolateArgs),
    /// Tear down whatever `Isolate` set up.
    Cleanup(CleanupArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolateArgs {
    pub hostname: String,
    pub container_id: String,
    pub pid: u32,
    pub ipv4_addrs: Vec<String>,
    pub ipv6_addrs: Vec<String>,
    pub netgroups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupArgs {
    pub hostname: String,
    pub container_id: String,
}

/// Isolator success payload.  Carries nothing; unknown members are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolatorResponse {}
