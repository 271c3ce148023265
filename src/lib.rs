//! Network identity for containers.
//!
//! `netbind` gives each container one IPv4 address and a set of network
//! group memberships for as long as it lives.  Address management and
//! namespace wiring are delegated to two external helper executables
//! (IPAM and the isolator) spoken to over JSON on stdin/stdout; this
//! crate keeps the bookkeeping consistent across lifecycle calls that
//! may arrive late, twice, or never.
//!
//! * [`coordinator::Coordinator`] drives attach, isolate and release.
//! * [`helper`] encodes requests, runs helpers and decodes responses.
//! * [`registry::Registry`] maps containers and executors to attachments.
//! * [`status::StatusDecorator`] reads attachments for status reports.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod helper;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod status;
pub mod types;

pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use registry::Registry;
pub use status::StatusDecorator;
