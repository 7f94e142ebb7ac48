//! Wire types for the inport broker.
//!
//! This crate contains the serde-serializable shapes exchanged on both sides
//! of the broker:
//!
//! * the caller-facing bus (`message`): calls, replies, errors and signals,
//! * the backend-facing JSON-RPC channel (`rpc`),
//! * the payload types shared by both (`types`, `options`, `response`).
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and small
//!   accessors
//! * Stable: Changes only when one of the wire formats changes
//!
//! Lifecycle logic (requests, sessions, bridging) lives in `inport-runtime`.

pub mod message;
pub mod options;
pub mod response;
pub mod rpc;
pub mod types;

pub use message::*;
pub use options::*;
pub use response::*;
pub use types::*;

/// Object path prefix under which request objects are exported.
pub const REQUEST_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/request";

/// Object path prefix under which session objects are exported.
pub const SESSION_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/session";

/// Interface version reported by the input-capture and emulated-input front doors.
pub const INTERFACE_VERSION: u32 = 1;
