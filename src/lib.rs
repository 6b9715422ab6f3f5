//! # Data Hub
//!
//! An in-process broker that routes time-stamped telemetry from producers
//! (sensors) to consumers (actuators, analytics sinks, external egress).
//! Applications publish through *Input* resources and subscribe through
//! *Output* resources; administrators interpose *Observations* that filter,
//! throttle, aggregate and archive the stream.
//!
//! ## Architecture
//!
//! - **Resource tree**: a hierarchy of named entries (Namespaces, Inputs,
//!   Outputs, Observations, Placeholders) with path-based lookup
//! - **Push pipeline**: type coercion, filtering, transforms, handler
//!   dispatch and acyclic downstream routing, all synchronous on one thread
//! - **Snapshots**: full or delta views of the tree streamed as JSON or a
//!   flat text format, with tombstones reporting deletions
//! - **Services**: I/O, admin, query and config facades matching the
//!   interfaces the surrounding IPC layer exposes
//! - **Runtime**: an optional thread boundary (crossbeam channels) for
//!   hosts that want the hub on its own thread
//!
//! ## Example
//!
//! ```
//! use datahub_rs::{AdminService, DataType, Hub, IoService};
//!
//! let mut hub = Hub::default();
//!
//! // A sensor app creates an input and pushes a reading.
//! let mut io = IoService::new(&mut hub, "sensor").unwrap();
//! io.create_input("temp", DataType::Numeric, "degC").unwrap();
//! io.push_numeric("temp", 0.0, 21.5).unwrap();
//!
//! // An administrator interposes an observation over it.
//! let mut admin = AdminService::new(&mut hub);
//! admin.create_observation("room").unwrap();
//! admin.set_buffer_max_count("room", 100).unwrap();
//! admin.set_source("room", Some("/app/sensor/temp")).unwrap();
//! ```

pub mod coerce;
pub mod config;
pub mod error;
pub mod handler;
pub mod hub;
pub mod sample;
pub mod service;
pub mod snapshot;
pub mod tree;
pub mod types;

mod backup;
mod resource;

// Re-export commonly used types
pub use coerce::coerce;
pub use error::{HubError, Result};
pub use handler::HandlerId;
pub use hub::{Hub, HubConfig};
pub use sample::{DataSample, Value};
pub use service::{AdminService, HubHandle, HubRuntime, IoService, QueryService};
pub use snapshot::{SnapshotFormat, SnapshotOptions};
pub use tree::EntryId;
pub use types::{DataType, EntryType, ResourceOperation, TransformType};
