//! Task status decoration.
//!
//! The status path knows executors, not containers, so it follows the
//! executor link in the registry.  It only ever reads.

use std::sync::Arc;

use log::{debug, warn};

use crate::registry::Registry;
use crate::types::{ExecutorId, StatusDecoration};

pub struct StatusDecorator {
    registry: Arc<Registry>,
}

impl StatusDecorator {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Address and groups of the executor's container, if it has any.
    pub fn decorate(&self, executor_id: &ExecutorId) -> Option<StatusDecoration> {
        let Some(container_id) = self.registry.resolve(executor_id) else {
            warn!("No valid container id for executor: {}", executor_id);
            return None;
        };
        let Some(attachment) = self.registry.get(&container_id) else {
            warn!("No valid attachment for container: {}", container_id);
            return None;
        };

        debug!(
            "Decorating status of {} with address {}",
            executor_id, attachment.address
        );
        Some(StatusDecoration {
            address: attachment.address,
            groups: attachment.groups,
        })
    }
}
