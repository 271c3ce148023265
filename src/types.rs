//! Data structures used throughout the coordinator.
//!
//! These types cross two boundaries: the orchestrator hands us
//! executor descriptors and receives prepare directives, and the
//! status path reads attachments back out.  All of them are
//! serialised with [`serde`](https://serde.rs/) so the hook server can
//! carry them as JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Environment variable the executor binds its listener to.
pub const ADDRESS_ENV_VAR: &str = "LIBPROCESS_IP";

/// Identifier of one container instance, unique for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

/// Identifier of the executor process running inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ExecutorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The allocated-resource record for one container.
///
/// Created once at the end of a successful attach and dropped at
/// release; never modified in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Dotted-quad IPv4 address bound to the container.
    pub address: String,
    /// Network groups the container is a member of, in request order.
    pub groups: Vec<String>,
    /// Correlation token of the IPAM transaction that produced `address`.
    pub request_id: String,
}

/// Transport protocol hint carried by a network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ipv4,
    Ipv6,
}

/// One network attachment requested by an executor's container spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Container section of an executor descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    #[serde(default)]
    pub network_infos: Vec<NetworkRequest>,
}

/// What the orchestrator tells us about the executor it is launching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorDescriptor {
    pub executor_id: ExecutorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    /// Environment overrides the executor will be started with.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl ExecutorDescriptor {
    pub fn new(executor_id: ExecutorId) -> Self {
        Self {
            executor_id,
            container: None,
            environment: BTreeMap::new(),
        }
    }

    /// Attach a single network request to the container spec.
    pub fn with_network(mut self, request: NetworkRequest) -> Self {
        self.container
            .get_or_insert_with(ContainerSpec::default)
            .network_infos
            .push(request);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub(crate) fn network_infos(&self) -> &[NetworkRequest] {
        self.container
            .as_ref()
            .map(|c| c.network_infos.as_slice())
            .unwrap_or(&[])
    }
}

/// Namespaces the orchestrator should create for the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Network,
}

/// Directives returned from a successful attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareDirectives {
    pub namespaces: Vec<Namespace>,
    pub environment: BTreeMap<String, String>,
}

impl PrepareDirectives {
    pub(crate) fn for_address(address: &str) -> Self {
        let mut environment = BTreeMap::new();
        environment.insert(ADDRESS_ENV_VAR.to_string(), address.to_string());
        Self {
            namespaces: vec![Namespace::Network],
            environment,
        }
    }
}

/// Network details exposed on task status reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDecoration {
    pub address: String,
    pub groups: Vec<String>,
}

/// Lifecycle state handed back by the orchestrator on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub container_id: ContainerId,
    pub executor_id: ExecutorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}
