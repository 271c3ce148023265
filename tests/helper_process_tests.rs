//! End-to-end tests that run real helper executables.
//!
//! The helpers are tiny `/bin/sh` stubs that append each request they
//! receive to a log file and print a canned response.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{executor, stub};
use netbind::protocol::IpamResponse;
use netbind::types::{ContainerId, ExecutorId, StatusDecoration};
use netbind::{helper, Config, Coordinator, Error, Registry, StatusDecorator};
use serde_json::Value;
use tempfile::TempDir;

struct Stubs {
    dir: TempDir,
    ipam: PathBuf,
    isolator: PathBuf,
}

impl Stubs {
    fn new(ipam_reply: &str, isolator_reply: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let ipam = Self::logging_stub(&dir, "ipam", ipam_reply);
        let isolator = Self::logging_stub(&dir, "isolator", isolator_reply);
        Self {
            dir,
            ipam,
            isolator,
        }
    }

    fn logging_stub(dir: &TempDir, name: &str, reply: &str) -> PathBuf {
        let log = dir.path().join(format!("{}.log", name));
        stub(
            dir,
            name,
            &format!(
                "cat >> '{log}'\necho >> '{log}'\nprintf '%s' '{reply}'",
                log = log.display(),
                reply = reply
            ),
        )
    }

    /// Requests received by `name`, one parsed document per call.
    fn requests(&self, name: &str) -> Vec<Value> {
        let log = self.dir.path().join(format!("{}.log", name));
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn coordinator(&self) -> (Coordinator, Arc<Registry>) {
        let config = Config::from_parameters(&[
            ("ipam_command", self.ipam.to_str().unwrap()),
            ("isolator_command", self.isolator.to_str().unwrap()),
            ("hostname", "agent-1"),
        ])
        .unwrap();
        let registry = Arc::new(Registry::new());
        let coordinator = Coordinator::from_config(&config, Arc::clone(&registry)).unwrap();
        (coordinator, registry)
    }
}

#[tokio::test]
async fn dynamic_attach_against_stub_ipam() {
    let stubs = Stubs::new(r#"{"ipv4": ["10.0.0.5"]}"#, "{}");
    let (coord, registry) = stubs.coordinator();
    let decorator = StatusDecorator::new(Arc::clone(&registry));

    let directives = coord
        .attach(&ContainerId::new("c1"), &executor("e1", &["web"], None))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(directives.environment["LIBPROCESS_IP"], "10.0.0.5");
    assert_eq!(
        decorator.decorate(&ExecutorId::new("e1")),
        Some(StatusDecoration {
            address: "10.0.0.5".into(),
            groups: vec!["web".into()],
        })
    );
    let requests = stubs.requests("ipam");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["command"], "allocate");
}

#[tokio::test]
async fn static_attach_against_stub_ipam() {
    let stubs = Stubs::new("{}", "{}");
    let (coord, _) = stubs.coordinator();

    let directives = coord
        .attach(&ContainerId::new("c2"), &executor("e2", &["db"], Some("10.0.0.9")))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(directives.environment["LIBPROCESS_IP"], "10.0.0.9");
    let requests = stubs.requests("ipam");
    assert_eq!(requests[0]["command"], "reserve");
    assert_eq!(requests[0]["args"]["netgroups"][0], "db");
}

#[tokio::test]
async fn isolate_against_stub_isolator() {
    let stubs = Stubs::new(r#"{"ipv4": ["10.0.0.5"]}"#, "{}");
    let (coord, _) = stubs.coordinator();
    let c1 = ContainerId::new("c1");
    coord.attach(&c1, &executor("e1", &["web"], None)).await.unwrap();

    coord.isolate(&c1, 4242).await.unwrap();

    let requests = stubs.requests("isolator");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["args"]["pid"], 4242);
}

#[tokio::test]
async fn busy_isolator_fails_isolate() {
    let stubs = Stubs::new(r#"{"ipv4": ["10.0.0.5"]}"#, r#"{"error":"namespace busy"}"#);
    let (coord, _) = stubs.coordinator();
    let c1 = ContainerId::new("c1");
    coord.attach(&c1, &executor("e1", &["web"], None)).await.unwrap();

    let err = coord.isolate(&c1, 4242).await.unwrap_err();
    assert!(matches!(err, Error::IsolationFailed { .. }));
}

#[tokio::test]
async fn quota_error_leaves_registry_empty() {
    let stubs = Stubs::new(r#"{"error": "quota exceeded"}"#, "{}");
    let (coord, registry) = stubs.coordinator();

    let err = coord
        .attach(&ContainerId::new("c1"), &executor("e1", &["web"], None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AllocationFailed { .. }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn unparsable_output_after_successful_spawn() {
    let stubs = Stubs::new("<<not json>>", "{}");
    let (coord, registry) = stubs.coordinator();

    let err = coord
        .attach(&ContainerId::new("c1"), &executor("e1", &["web"], None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AllocationFailed { .. }));
    assert_eq!(stubs.requests("ipam").len(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn never_attached_container_spawns_nothing() {
    let stubs = Stubs::new(r#"{"ipv4": ["10.0.0.5"]}"#, "{}");
    let (coord, _) = stubs.coordinator();
    let ghost = ContainerId::new("ghost");

    coord.isolate(&ghost, 1).await.unwrap();
    coord.release(&ghost).await.unwrap();

    assert!(stubs.requests("ipam").is_empty());
    assert!(stubs.requests("isolator").is_empty());
}

#[tokio::test]
async fn full_lifecycle_spawns_each_helper_as_expected() {
    let stubs = Stubs::new(r#"{"ipv4": ["10.0.0.5"]}"#, "{}");
    let (coord, registry) = stubs.coordinator();
    let c1 = ContainerId::new("c1");

    coord.attach(&c1, &executor("e1", &["web"], None)).await.unwrap();
    coord.isolate(&c1, 4242).await.unwrap();
    coord.release(&c1).await.unwrap();
    coord.release(&c1).await.unwrap();

    let ipam: Vec<_> = stubs
        .requests("ipam")
        .iter()
        .map(|r| r["command"].as_str().unwrap().to_string())
        .collect();
    let isolator: Vec<_> = stubs
        .requests("isolator")
        .iter()
        .map(|r| r["command"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ipam, vec!["allocate", "release"]);
    assert_eq!(isolator, vec!["isolate", "cleanup"]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn crashing_helper_is_decode_error() {
    let dir = TempDir::new().unwrap();
    let crash = stub(&dir, "crash", "kill -9 $$");
    let transport = netbind::helper::ProcessTransport::default();

    let err = helper::call::<_, IpamResponse>(&transport, &crash, &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolDecode { .. }));
}

#[tokio::test]
async fn missing_ipam_executable_fails_attach() {
    let config = Config::from_parameters(&[
        ("ipam_command", "/nonexistent/netbind-ipam"),
        ("hostname", "agent-1"),
    ])
    .unwrap();
    let registry = Arc::new(Registry::new());
    let coord = Coordinator::from_config(&config, Arc::clone(&registry)).unwrap();

    let err = coord
        .attach(&ContainerId::new("c1"), &executor("e1", &["web"], None))
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::AllocationFailed { ref reason, .. } if reason.contains("spawn")),
        "{err}"
    );
    assert!(registry.is_empty());
}
