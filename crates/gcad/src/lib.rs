//! gcad - GCA Regional Collection Daemon
//!
//! This daemon provides:
//! - Signed UDP telemetry intake with anti-replay and banning rules
//! - A per-device two-week report ring with weekly freeze-and-rotate
//! - A signed TCP sync responder for bandwidth-constrained devices
//! - Multi-party authorization (GCA bootstrap, equipment onboarding,
//!   equipment migration, peer-server gossip)
//! - An HTTP API for onboarding, queries, and rate-limited archival

pub mod archive;
pub mod config;
pub mod gossip;
pub mod http;
pub mod lock;
pub mod migrate;
pub mod moer;
pub mod registry;
pub mod server;
pub mod state;
pub mod storage;
pub mod tcp;
pub mod udp;

pub use config::Config;
pub use server::Server;
pub use state::CollectorState;
pub use storage::Storage;
