//! Request/session lifecycle and backend call bridging for the inport broker.
//!
//! The broker sits between untrusted callers and a privileged backend:
//!
//! ```text
//! caller ──> Portal ──> InputCapture / EmulatedInput ──> Request (+ Session)
//!                                   │
//!                                   └──> PendingCall ──> Backend (async)
//!                                                │
//!                       Response signal <────────┘ reconcile once
//! ```
//!
//! Every privileged operation is a [`Request`] answered exactly once, every
//! capture capability a [`Session`] with an explicit state machine, and every
//! backend call a [`PendingCall`] reconciled under the request-then-session
//! lock order.

pub mod backend;
pub mod barriers;
pub mod bridge;
pub mod bus;
pub mod caller;
pub mod connection;
pub mod emulated_input;
pub mod error;
pub mod input_capture;
pub mod locked;
pub mod options;
pub mod path;
pub mod portal;
pub mod request;
pub mod rpc_backend;
pub mod session;
mod task;
pub mod testing;
pub mod transport;

pub use backend::{Backend, BackendCall, BackendEvent, ImplRequest};
pub use bridge::PendingCall;
pub use bus::{BusConnection, SignalSink};
pub use caller::{AppInfoResolver, Caller, ProcAppResolver};
pub use emulated_input::{EisEndpoint, EmulatedInput, Lockdown, StaticLockdown};
pub use error::{BackendError, EiError, ExportError, PortalError, Result, SessionError};
pub use input_capture::{InputCapture, InputCaptureCall};
pub use locked::{Locked, LockedObject};
pub use portal::{Portal, Reply};
pub use request::Request;
pub use rpc_backend::RpcBackend;
pub use session::{Session, SessionKind, SessionRegistry, SessionState};
