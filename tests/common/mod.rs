//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use netbind::helper::HelperTransport;
use netbind::types::{ExecutorDescriptor, ExecutorId, NetworkRequest};
use netbind::{Config, Coordinator, Registry, Result};
use serde_json::Value;
use tempfile::TempDir;

pub const IPAM: &str = "/opt/netbind/ipam";
pub const ISOLATOR: &str = "/opt/netbind/isolator";

/// In-memory helpers: records every request and answers with a canned
/// document per program, optionally after a delay.
pub struct FakeHelpers {
    ipam_reply: Mutex<String>,
    isolator_reply: Mutex<String>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<(PathBuf, Value)>>,
    events: Mutex<Vec<String>>,
}

impl FakeHelpers {
    pub fn new(ipam_reply: &str, isolator_reply: &str) -> Arc<Self> {
        Arc::new(Self {
            ipam_reply: Mutex::new(ipam_reply.to_string()),
            isolator_reply: Mutex::new(isolator_reply.to_string()),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn set_ipam_reply(&self, reply: &str) {
        *self.ipam_reply.lock().unwrap() = reply.to_string();
    }

    pub fn set_isolator_reply(&self, reply: &str) {
        *self.isolator_reply.lock().unwrap() = reply.to_string();
    }

    /// Make every helper call take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// `start <command>` / `end <command>` for every call, in the order
    /// they happened.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(PathBuf, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// `command` of every request, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|(_, req)| req["command"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl HelperTransport for FakeHelpers {
    async fn invoke(&self, program: &Path, input: &[u8]) -> Result<Vec<u8>> {
        let request: Value = serde_json::from_slice(input).expect("request is JSON");
        let command = request["command"].as_str().unwrap_or_default().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), request));
        self.events.lock().unwrap().push(format!("start {}", command));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.events.lock().unwrap().push(format!("end {}", command));
        let reply = if program == Path::new(IPAM) {
            self.ipam_reply.lock().unwrap().clone()
        } else {
            self.isolator_reply.lock().unwrap().clone()
        };
        Ok(reply.into_bytes())
    }
}

pub fn config() -> Config {
    Config::from_parameters(&[
        ("ipam_command", IPAM),
        ("isolator_command", ISOLATOR),
        ("hostname", "agent-1"),
    ])
    .unwrap()
}

pub fn coordinator(helpers: &Arc<FakeHelpers>) -> (Coordinator, Arc<Registry>) {
    coordinator_with(helpers, &config())
}

pub fn coordinator_with(helpers: &Arc<FakeHelpers>, config: &Config) -> (Coordinator, Arc<Registry>) {
    let registry = Arc::new(Registry::new());
    let transport: Arc<dyn HelperTransport> = helpers.clone();
    let coordinator = Coordinator::new(config, Arc::clone(&registry), transport).unwrap();
    (coordinator, registry)
}

pub fn executor(id: &str, groups: &[&str], ip: Option<&str>) -> ExecutorDescriptor {
    ExecutorDescriptor::new(ExecutorId::new(id)).with_network(NetworkRequest {
        ip_address: ip.map(String::from),
        protocol: None,
        groups: groups.iter().map(|g| g.to_string()).collect(),
    })
}

/// Write an executable `/bin/sh` script into `dir`.
pub fn stub(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
