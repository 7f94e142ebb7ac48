//! Capability sessions and the broker-wide session registry.
//!
//! A [`Session`] is created by `CreateSession`, becomes discoverable through
//! [`SessionRegistry::acquire`] once the backend confirms it, and is closed by
//! a failed or cancelled session-scoped request, by `Release`, by the caller,
//! or by the backend.
//!
//! # States
//!
//! ```text
//!  Init ──> Connected ──> Enabled <──> Disabled
//!    │          │            │            │
//!    └──────────┴─────┬──────┴────────────┘
//!                     v
//!                   Closed (terminal)
//! ```
//!
//! Issuance of a session-scoped operation is gated by [`SessionState`]; the
//! state itself only moves when the backend confirms.

use std::collections::HashMap;
use std::sync::Arc;

use inport_protocol::{Capabilities, Options, SESSION_HANDLE_TOKEN, Signal, lookup_str};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::bus::BusConnection;
use crate::error::{PortalError, Result, SessionError};
use crate::locked::{Locked, LockedObject};
use crate::path;
use crate::request::Request;
use crate::task::spawn_detached;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Created locally; the backend has not confirmed it yet.
	Init,
	/// Confirmed by the backend; capture not active.
	Connected,
	Enabled,
	Disabled,
	/// Terminal.
	Closed,
}

impl SessionState {
	/// Gate for operations that only need a live session.
	pub fn check_open(self) -> Result<()> {
		match self {
			SessionState::Closed => Err(PortalError::invalid_session()),
			_ => Ok(()),
		}
	}

	/// Gate for operations that need a backend-confirmed session.
	pub fn check_connected(self) -> Result<()> {
		match self {
			SessionState::Init => Err(PortalError::Failed("Not connected to EIS".to_string())),
			SessionState::Connected | SessionState::Enabled | SessionState::Disabled => Ok(()),
			SessionState::Closed => Err(PortalError::invalid_session()),
		}
	}
}

/// What a session was created for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionKind {
	InputCapture,
	/// A session owned by another front door.
	Other(String),
}

/// Mutable session fields; reachable only through the session lock.
#[derive(Debug)]
pub struct SessionData {
	state: SessionState,
	registered: bool,
	capabilities: Capabilities,
	zones_serial: Option<u32>,
}

impl SessionData {
	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn is_registered(&self) -> bool {
		self.registered
	}

	pub fn capabilities(&self) -> Capabilities {
		self.capabilities
	}

	pub fn set_capabilities(&mut self, capabilities: Capabilities) {
		self.capabilities = capabilities;
	}

	/// Serial of the zone set last delivered to the caller.
	pub fn zones_serial(&self) -> Option<u32> {
		self.zones_serial
	}

	pub fn set_zones_serial(&mut self, serial: u32) {
		self.zones_serial = Some(serial);
	}

	/// Forgets the zone serial; barriers need a fresh `GetZones` first.
	pub fn invalidate_zones(&mut self) {
		self.zones_serial = None;
	}

	/// Moves to `state`; ignored once closed.
	pub fn transition(&mut self, state: SessionState) {
		if self.state != SessionState::Closed {
			self.state = state;
		}
	}
}

/// One capability-granting session.
pub struct Session {
	id: String,
	sender: String,
	app_id: String,
	kind: SessionKind,
	backend: Arc<dyn Backend>,
	registry: Arc<SessionRegistry>,
	connection: Arc<BusConnection>,
	data: Locked<SessionData>,
}

impl LockedObject for Session {
	type State = SessionData;

	fn locked(&self) -> &Locked<SessionData> {
		&self.data
	}
}

/// Everything a new session is bound to.
#[derive(Clone)]
pub struct SessionContext {
	pub backend: Arc<dyn Backend>,
	pub registry: Arc<SessionRegistry>,
	pub connection: Arc<BusConnection>,
}

impl Session {
	/// Creates a session in [`SessionState::Init`] for the caller of `request`.
	///
	/// The handle comes from the `session_handle_token` option or a generated
	/// token and is claimed in the registry immediately, so a concurrent
	/// `CreateSession` with the same token fails.
	pub fn new(options: &Options, request: &Request, kind: SessionKind, context: &SessionContext) -> Result<Arc<Self>, SessionError> {
		let token = match lookup_str(options, SESSION_HANDLE_TOKEN) {
			Some(token) if path::is_valid_token(token) => token.to_string(),
			Some(token) => return Err(SessionError::InvalidToken(token.to_string())),
			None => path::generate_token("s"),
		};
		let id = path::session_handle(request.sender(), &token);
		context.registry.claim(&id)?;

		debug!(target = "inport.session", id = %id, sender = request.sender(), ?kind, "created");
		Ok(Arc::new(Self {
			id,
			sender: request.sender().to_string(),
			app_id: request.app_id().to_string(),
			kind,
			backend: Arc::clone(&context.backend),
			registry: Arc::clone(&context.registry),
			connection: Arc::clone(&context.connection),
			data: Locked::new(SessionData {
				state: SessionState::Init,
				registered: false,
				capabilities: Capabilities::default(),
				zones_serial: None,
			}),
		}))
	}

	/// Session handle.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn sender(&self) -> &str {
		&self.sender
	}

	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	pub fn kind(&self) -> &SessionKind {
		&self.kind
	}

	pub fn state(&self) -> SessionState {
		self.lock().state
	}

	/// Makes the session discoverable by handle.
	pub fn register_locked(self: &Arc<Self>, data: &mut SessionData) {
		if data.state == SessionState::Closed || data.registered {
			return;
		}
		self.registry.register(Arc::clone(self));
		data.registered = true;
		debug!(target = "inport.session", id = %self.id, "registered");
	}

	/// Closes the session; see [`Session::close_locked`].
	pub fn close(&self, force: bool) {
		let mut data = self.lock();
		self.close_locked(&mut data, force);
	}

	/// Moves to [`SessionState::Closed`], releases the registry entry and
	/// asks the backend to release its side.
	///
	/// With `force`, a registered session also emits `Closed` to its owner:
	/// the session was torn down by the broker, not by the owner's request.
	/// Closing a closed session does nothing.
	pub fn close_locked(&self, data: &mut SessionData, force: bool) {
		self.close_inner(data, force, true);
	}

	/// Close requested by the backend itself; it is not notified back.
	pub fn close_from_backend(&self) {
		let mut data = self.lock();
		self.close_inner(&mut data, true, false);
	}

	fn close_inner(&self, data: &mut SessionData, force: bool, notify_backend: bool) {
		if data.state == SessionState::Closed {
			return;
		}
		let previous = std::mem::replace(&mut data.state, SessionState::Closed);
		let was_registered = std::mem::take(&mut data.registered);
		self.registry.release(&self.id);

		// A session still in Init has no backend side unless CreateSession
		// succeeded; the completion releases it then.
		if notify_backend && previous != SessionState::Init {
			self.release_backend();
		}

		if force && was_registered {
			self.connection.emit(&self.sender, &self.id, Signal::Closed { details: Options::new() });
		}

		debug!(target = "inport.session", id = %self.id, sender = %self.sender, ?previous, force, "closed");
	}

	/// Tells the backend to drop its side of this session, without waiting.
	pub(crate) fn release_backend(&self) {
		let backend = Arc::clone(&self.backend);
		let id = self.id.clone();
		spawn_detached("close backend session", async move {
			if let Err(err) = backend.close_session(&id).await {
				warn!(target = "inport.session", id = %id, error = %err, "backend session close failed");
			}
		});
	}

	/// Relays a backend signal to the owner.
	pub(crate) fn emit(&self, signal: Signal) {
		self.connection.emit(&self.sender, &self.id, signal);
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("id", &self.id)
			.field("sender", &self.sender)
			.field("kind", &self.kind)
			.finish_non_exhaustive()
	}
}

enum Slot {
	/// Handle claimed by a session the backend has not confirmed yet.
	Pending,
	Registered(Arc<Session>),
}

/// Broker-wide table of session handles.
///
/// This is a leaf lock: it is taken while request and session locks may be
/// held, and never calls out while locked.
#[derive(Default)]
pub struct SessionRegistry {
	slots: Mutex<HashMap<String, Slot>>,
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	fn claim(&self, id: &str) -> Result<(), SessionError> {
		let mut slots = self.slots.lock();
		if slots.contains_key(id) {
			return Err(SessionError::HandleInUse(id.to_string()));
		}
		slots.insert(id.to_string(), Slot::Pending);
		Ok(())
	}

	fn register(&self, session: Arc<Session>) {
		self.slots.lock().insert(session.id.clone(), Slot::Registered(session));
	}

	fn release(&self, id: &str) {
		self.slots.lock().remove(id);
	}

	/// Looks up a registered session owned by the caller of `request`.
	///
	/// Returns `None` for unknown handles, unconfirmed sessions and sessions
	/// owned by another sender.
	pub fn acquire(&self, handle: &str, request: &Request) -> Option<Arc<Session>> {
		match self.slots.lock().get(handle) {
			Some(Slot::Registered(session)) if session.sender == request.sender() => Some(Arc::clone(session)),
			_ => None,
		}
	}

	/// Looks up a registered session regardless of owner.
	pub fn lookup(&self, handle: &str) -> Option<Arc<Session>> {
		match self.slots.lock().get(handle) {
			Some(Slot::Registered(session)) => Some(Arc::clone(session)),
			_ => None,
		}
	}

	/// Number of registered sessions.
	pub fn registered_count(&self) -> usize {
		self.slots.lock().values().filter(|slot| matches!(slot, Slot::Registered(_))).count()
	}

	/// Closes every registered session owned by `sender`.
	pub fn close_sender(&self, sender: &str) {
		let owned: Vec<Arc<Session>> = self
			.slots
			.lock()
			.values()
			.filter_map(|slot| match slot {
				Slot::Registered(session) if session.sender == sender => Some(Arc::clone(session)),
				_ => None,
			})
			.collect();
		for session in owned {
			session.close(false);
		}
	}
}

impl std::fmt::Debug for SessionRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionRegistry").field("slots", &self.slots.lock().len()).finish()
	}
}
