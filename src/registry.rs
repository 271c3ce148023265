//! Allocation registry.
//!
//! In-memory table of which container holds which address, plus the
//! executor → container links the status path needs.  One instance is
//! built at startup and shared by reference; nothing here is persisted,
//! so a restart forgets every attachment.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use crate::error::{Error, Result};
use crate::types::{ContainerId, ExecutorId, NetworkAttachment};

#[derive(Default)]
struct Tables {
    attachments: HashMap<ContainerId, NetworkAttachment>,
    executors: HashMap<ExecutorId, ContainerId>,
}

/// Shared container → attachment map.
///
/// A single lock guards both tables.  It is only ever held for a map
/// operation, never across helper I/O.
#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // Writers never leave the tables half-updated, so a poisoned lock
    // still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, container_id: ContainerId, attachment: NetworkAttachment) {
        debug!("Registry: {} -> {}", container_id, attachment.address);
        self.write().attachments.insert(container_id, attachment);
    }

    pub fn get(&self, container_id: &ContainerId) -> Option<NetworkAttachment> {
        self.read().attachments.get(container_id).cloned()
    }

    pub fn contains(&self, container_id: &ContainerId) -> bool {
        self.read().attachments.contains_key(container_id)
    }

    /// Drop a container's attachment and every executor link pointing at
    /// it.  Removing an unknown container does nothing.
    pub fn remove(&self, container_id: &ContainerId) -> Option<NetworkAttachment> {
        let mut tables = self.write();
        tables.executors.retain(|_, c| c != container_id);
        let removed = tables.attachments.remove(container_id);
        if removed.is_some() {
            debug!("Registry: removed {}", container_id);
        }
        removed
    }

    pub fn bind(&self, executor_id: ExecutorId, container_id: ContainerId) {
        self.write().executors.insert(executor_id, container_id);
    }

    pub fn resolve(&self, executor_id: &ExecutorId) -> Option<ContainerId> {
        self.read().executors.get(executor_id).cloned()
    }

    /// Insert the attachment and the executor link under one write lock.
    ///
    /// Refused if the container already holds an attachment, or if the
    /// executor is still linked to a different container that does.  The
    /// check and the insert happen under the same lock, so of two racing
    /// attaches for one executor exactly one wins.
    pub fn attach(
        &self,
        container_id: ContainerId,
        executor_id: ExecutorId,
        attachment: NetworkAttachment,
    ) -> Result<()> {
        let mut tables = self.write();
        if tables.attachments.contains_key(&container_id) {
            return Err(Error::InvalidRequest(format!(
                "container {} is already attached",
                container_id
            )));
        }
        if let Some(owner) = tables.executors.get(&executor_id) {
            if *owner != container_id && tables.attachments.contains_key(owner) {
                return Err(Error::InvalidRequest(format!(
                    "executor {} is already bound to container {}",
                    executor_id, owner
                )));
            }
        }
        debug!(
            "Registry: {} ({}) -> {}",
            container_id, executor_id, attachment.address
        );
        tables.executors.insert(executor_id, container_id.clone());
        tables.attachments.insert(container_id, attachment);
        Ok(())
    }

    /// Follow executor → container → attachment in one read.
    pub fn lookup_executor(&self, executor_id: &ExecutorId) -> Option<(ContainerId, NetworkAttachment)> {
        let tables = self.read();
        let container_id = tables.executors.get(executor_id)?;
        let attachment = tables.attachments.get(container_id)?;
        Some((container_id.clone(), attachment.clone()))
    }

    pub fn len(&self) -> usize {
        self.read().attachments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
