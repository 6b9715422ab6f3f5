//! Service facades.
//!
//! Thin per-call wrappers around the hub, mirroring the interfaces the
//! surrounding IPC layer exposes to clients:
//!
//! - **io** - per-client resource creation, pushes, getters and handlers
//! - **admin** - observations, routing, overrides and filter settings
//! - **query** - reads, buffer queries, statistics and snapshots
//! - **runtime** - a command-loop thread boundary for host processes

pub mod admin;
pub mod io;
pub mod query;
pub mod runtime;

pub use admin::AdminService;
pub use io::IoService;
pub use query::QueryService;
pub use runtime::{HubHandle, HubReply, HubRequest, HubRuntime};
