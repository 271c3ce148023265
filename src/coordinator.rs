//! Lifecycle coordinator.
//!
//! Drives the three network phases of a container:
//!
//! * **attach**: obtain an address from IPAM and record it;
//! * **isolate**: have the isolator wire the running container's
//!   namespace;
//! * **release**: return the address and tear the wiring down.
//!
//! The per-container state is implied by the registry: a container with
//! an attachment is attached (or isolated), one without is unattached
//! (or released).  Phases for one container are serialised; phases for
//! different containers run concurrently.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::helper::{self, HelperTransport, ProcessTransport};
use crate::policy::{self, AddressMode, AddressPolicy};
use crate::protocol::{
    AllocateArgs, CleanupArgs, IpamRequest, IpamResponse, IsolateArgs, IsolatorRequest,
    IsolatorResponse, ReleaseArgs, ReserveArgs,
};
use crate::registry::Registry;
use crate::types::{
    ContainerId, ContainerState, ExecutorDescriptor, NetworkAttachment, PrepareDirectives,
    Protocol,
};

/// One async mutex per container with a phase in flight.
#[derive(Default)]
struct PhaseLocks {
    locks: Mutex<HashMap<ContainerId, Arc<AsyncMutex<()>>>>,
}

impl PhaseLocks {
    async fn acquire(&self, container_id: &ContainerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(container_id.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Forget the lock of a container that no longer has state, unless
    /// another phase is already queued on it.  Must be called while
    /// holding that container's guard.
    fn retire(&self, container_id: &ContainerId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in the caller's guard.
        if locks
            .get(container_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(container_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct Coordinator {
    ipam: PathBuf,
    isolator: Option<PathBuf>,
    hostname: String,
    policies: Vec<AddressPolicy>,
    address_env_var: String,
    registry: Arc<Registry>,
    transport: Arc<dyn HelperTransport>,
    phases: PhaseLocks,
}

impl Coordinator {
    /// Build a coordinator that runs helpers as child processes.
    pub fn from_config(config: &Config, registry: Arc<Registry>) -> Result<Self> {
        let transport = ProcessTransport::new(config.max_concurrent_helpers, config.helper_timeout());
        Self::new(config, registry, Arc::new(transport))
    }

    pub fn new(
        config: &Config,
        registry: Arc<Registry>,
        transport: Arc<dyn HelperTransport>,
    ) -> Result<Self> {
        let ipam = config.ipam_path()?.to_path_buf();
        let isolator = config.isolator_path().map(PathBuf::from);
        if isolator.is_none() {
            warn!("Isolator path not specified; isolate and cleanup will be skipped");
        }
        let hostname = config.resolve_hostname()?;
        if config.address_policies.is_empty() {
            return Err(Error::Config("address_policies must not be empty".into()));
        }

        Ok(Self {
            ipam,
            isolator,
            hostname,
            policies: config.address_policies.clone(),
            address_env_var: config.address_env_var.clone(),
            registry,
            transport,
            phases: PhaseLocks::default(),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Run `phase` under the container's lock, then drop the lock entry
    /// if the container ended up with no attachment.
    async fn serialized<T, F>(&self, container_id: &ContainerId, phase: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let _guard = self.phases.acquire(container_id).await;
        let result = phase.await;
        if !self.registry.contains(container_id) {
            self.phases.retire(container_id);
        }
        result
    }

    /// Obtain an address for the container and record it.
    ///
    /// Returns `Ok(None)` when the executor asked for no network.
    pub async fn attach(
        &self,
        container_id: &ContainerId,
        executor: &ExecutorDescriptor,
    ) -> Result<Option<PrepareDirectives>> {
        self.serialized(container_id, self.attach_locked(container_id, executor))
            .await
    }

    async fn attach_locked(
        &self,
        container_id: &ContainerId,
        executor: &ExecutorDescriptor,
    ) -> Result<Option<PrepareDirectives>> {
        info!("Attach for container: {}", container_id);

        let network = match executor.network_infos() {
            [] => {
                info!(
                    "Ignoring attach for container {}: no network requested",
                    container_id
                );
                return Ok(None);
            }
            [network] => network,
            _ => {
                return Err(Error::Unsupported(
                    "multiple network attachments are not supported".into(),
                ))
            }
        };

        if network.groups.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "no network group requested for executor: {}",
                executor.executor_id
            )));
        }
        if network.protocol.is_some() && network.ip_address.is_some() {
            return Err(Error::InvalidRequest(
                "both protocol and ip_address set in network request".into(),
            ));
        }
        if network.protocol == Some(Protocol::Ipv6) {
            return Err(Error::Unsupported("IPv6 addresses are not supported".into()));
        }

        if self.registry.contains(container_id) {
            return Err(Error::InvalidRequest(format!(
                "container {} is already attached",
                container_id
            )));
        }
        if let Some(owner) = self.registry.resolve(&executor.executor_id) {
            if owner != *container_id && self.registry.contains(&owner) {
                return Err(Error::InvalidRequest(format!(
                    "executor {} is already bound to container {}",
                    executor.executor_id, owner
                )));
            }
        }

        let mode = policy::select_mode(
            &self.policies,
            network,
            &executor.environment,
            &self.address_env_var,
        )?;
        let request_id = Uuid::new_v4().to_string();
        let groups = network.groups.clone();

        let address = match mode {
            AddressMode::Reserve(addr) => {
                let request = IpamRequest::Reserve(ReserveArgs {
                    hostname: self.hostname.clone(),
                    ipv4_addrs: vec![addr.to_string()],
                    uid: request_id.clone(),
                    netgroups: groups.clone(),
                });
                info!("Sending IP reserve command to IPAM");
                self.ipam_call(&request).await.map_err(|e| Error::AllocationFailed {
                    container_id: container_id.to_string(),
                    reason: format!("error reserving IPs with IPAM: {}", e),
                })?;
                info!("IP {} reserved with IPAM", addr);
                addr.to_string()
            }
            AddressMode::Request { count } => {
                let request = IpamRequest::Allocate(AllocateArgs {
                    hostname: self.hostname.clone(),
                    num_ipv4: count,
                    uid: request_id.clone(),
                    netgroups: groups.clone(),
                });
                info!("Sending IP request command to IPAM");
                let response = self.ipam_call(&request).await.map_err(|e| {
                    Error::AllocationFailed {
                        container_id: container_id.to_string(),
                        reason: format!("error allocating IP from IPAM: {}", e),
                    }
                })?;
                let address = response.ipv4.into_iter().next().ok_or_else(|| {
                    Error::AllocationFailed {
                        container_id: container_id.to_string(),
                        reason: "no IPv4 addresses received from IPAM".into(),
                    }
                })?;
                if address.parse::<Ipv4Addr>().is_err() {
                    return Err(Error::AllocationFailed {
                        container_id: container_id.to_string(),
                        reason: format!("IPAM returned '{}', which is not an IPv4 address", address),
                    });
                }
                info!("Got IP {} from IPAM", address);
                address
            }
        };

        let directives = PrepareDirectives::for_address(&address);
        let attachment = NetworkAttachment {
            address,
            groups,
            request_id,
        };
        // Another container may have claimed the executor while IPAM was
        // answering; the address we were given must then go back.
        if let Err(e) = self.registry.attach(
            container_id.clone(),
            executor.executor_id.clone(),
            attachment.clone(),
        ) {
            warn!(
                "Attach for container {} lost to a concurrent attach: {}",
                container_id, e
            );
            self.return_address(&attachment).await;
            return Err(e);
        }
        Ok(Some(directives))
    }

    /// Best-effort release of an address that never made it into the
    /// registry.
    async fn return_address(&self, attachment: &NetworkAttachment) {
        info!("Returning unused IP {} to IPAM", attachment.address);
        let request = IpamRequest::Release(ReleaseArgs {
            ips: vec![attachment.address.clone()],
            uid: attachment.request_id.clone(),
        });
        if let Err(e) = self.ipam_call(&request).await {
            warn!(
                "Error returning unused IP {} to IPAM: {}",
                attachment.address, e
            );
        }
    }

    /// Wire the namespace of the container's now-running init process.
    pub async fn isolate(&self, container_id: &ContainerId, pid: u32) -> Result<()> {
        self.serialized(container_id, self.isolate_locked(container_id, pid))
            .await
    }

    async fn isolate_locked(&self, container_id: &ContainerId, pid: u32) -> Result<()> {
        let Some(attachment) = self.registry.get(container_id) else {
            info!(
                "Ignoring isolate request for unknown container: {}",
                container_id
            );
            return Ok(());
        };
        let Some(isolator) = self.isolator.as_deref() else {
            warn!(
                "No isolator configured; container {} left unwired",
                container_id
            );
            return Ok(());
        };

        let request = IsolatorRequest::Isolate(IsolateArgs {
            hostname: self.hostname.clone(),
            container_id: container_id.to_string(),
            pid,
            ipv4_addrs: vec![attachment.address],
            ipv6_addrs: Vec::new(),
            netgroups: attachment.groups,
        });

        info!("Sending isolate command to isolator");
        helper::call::<_, IsolatorResponse>(self.transport.as_ref(), isolator, &request)
            .await
            .map_err(|e| Error::IsolationFailed {
                container_id: container_id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Return the container's address and undo its wiring.
    ///
    /// Safe from any state.  Both helper calls are always attempted and
    /// the registry entry is always removed afterwards; a failure in
    /// either call is still reported.
    pub async fn release(&self, container_id: &ContainerId) -> Result<()> {
        self.serialized(container_id, self.release_locked(container_id))
            .await
    }

    async fn release_locked(&self, container_id: &ContainerId) -> Result<()> {
        let Some(attachment) = self.registry.get(container_id) else {
            info!(
                "Ignoring cleanup request for unknown container: {}",
                container_id
            );
            return Ok(());
        };

        let mut failures = Vec::new();

        info!("Requesting IPAM to release IP: {}", attachment.address);
        let request = IpamRequest::Release(ReleaseArgs {
            ips: vec![attachment.address.clone()],
            uid: attachment.request_id.clone(),
        });
        if let Err(e) = self.ipam_call(&request).await {
            warn!("Error releasing IP {} from IPAM: {}", attachment.address, e);
            failures.push(format!("error releasing IP from IPAM: {}", e));
        }

        match self.isolator.as_deref() {
            Some(isolator) => {
                let request = IsolatorRequest::Cleanup(CleanupArgs {
                    hostname: self.hostname.clone(),
                    container_id: container_id.to_string(),
                });
                if let Err(e) =
                    helper::call::<_, IsolatorResponse>(self.transport.as_ref(), isolator, &request)
                        .await
                {
                    warn!("Error doing cleanup for {}: {}", container_id, e);
                    failures.push(format!("error doing cleanup: {}", e));
                }
            }
            None => warn!(
                "No isolator configured; skipping cleanup for {}",
                container_id
            ),
        }

        // Dropped even on failure so the registry cannot grow without
        // bound; the error below is the only trace of external leftovers.
        self.registry.remove(container_id);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ReleaseFailed {
                container_id: container_id.to_string(),
                reason: failures.join("; "),
            })
        }
    }

    /// Accept the orchestrator's view of surviving containers after a
    /// restart.  Attachments are not rebuilt from it.
    pub async fn recover(&self, states: &[ContainerState]) -> Result<()> {
        info!(
            "Recover called with {} container state(s); registry not rebuilt",
            states.len()
        );
        for state in states {
            if !self.registry.contains(&state.container_id) {
                warn!(
                    "Container {} (executor {}) has no known attachment",
                    state.container_id, state.executor_id
                );
            }
        }
        Ok(())
    }

    async fn ipam_call(&self, request: &IpamRequest) -> Result<IpamResponse> {
        helper::call(self.transport.as_ref(), &self.ipam, request).await
    }

    #[cfg(test)]
    fn in_flight_locks(&self) -> usize {
        self.phases.len()
    }
}
