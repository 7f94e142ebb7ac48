//! Pending caller operations.
//!
//! A [`Request`] represents one in-flight operation. It is exported on the
//! caller bus at a caller-derived path for as long as it can still be
//! answered, and it emits exactly one terminal `Response` signal.
//!
//! # Terminal Response
//!
//! Two producers race to answer a request: the backend completion and the
//! caller's `Close`. Both go through [`Request::respond_locked`], which checks
//! `exported` under the request lock, emits, and unexports. Whoever gets the
//! lock second sees `exported == false` and only cleans up.
//!
//! ```text
//!  new ──export──> exported ──respond/close──> unexported (dropped)
//! ```

use std::sync::Arc;

use inport_protocol::{HANDLE_TOKEN, Options, ResponseCode, Signal, lookup_str};
use tracing::{debug, trace};

use crate::backend::ImplRequest;
use crate::bus::BusConnection;
use crate::caller::Caller;
use crate::error::{ExportError, PortalError, Result};
use crate::locked::{Locked, LockedObject};
use crate::path;
use crate::session::Session;

/// Mutable request fields; reachable only through the request lock.
#[derive(Debug, Default)]
pub struct RequestState {
	exported: bool,
	connection: Option<Arc<BusConnection>>,
	impl_request: Option<ImplRequest>,
	session: Option<Arc<Session>>,
}

impl RequestState {
	pub fn is_exported(&self) -> bool {
		self.exported
	}

	/// Stores the backend pending-call handle.
	pub fn set_impl_request(&mut self, impl_request: ImplRequest) {
		self.impl_request = Some(impl_request);
	}

	/// Attaches the session the outstanding backend call operates on.
	pub fn attach_session(&mut self, session: Arc<Session>) {
		self.session = Some(session);
	}

	/// Detaches the attached session, if any.
	pub fn detach_session(&mut self) -> Option<Arc<Session>> {
		self.session.take()
	}

	pub fn attached_session(&self) -> Option<&Arc<Session>> {
		self.session.as_ref()
	}
}

/// One pending caller operation.
#[derive(Debug)]
pub struct Request {
	id: String,
	sender: String,
	app_id: String,
	state: Locked<RequestState>,
}

impl LockedObject for Request {
	type State = RequestState;

	fn locked(&self) -> &Locked<RequestState> {
		&self.state
	}
}

impl Request {
	/// Creates an unexported request for `caller`.
	///
	/// The path uses the `handle_token` option when present, a generated
	/// token otherwise.
	pub fn new(caller: &Caller, options: &Options) -> Result<Arc<Self>> {
		let token = match lookup_str(options, HANDLE_TOKEN) {
			Some(token) if path::is_valid_token(token) => token.to_string(),
			Some(token) => return Err(PortalError::InvalidArgument(format!("Invalid token {token:?}"))),
			None => path::generate_token("t"),
		};

		Ok(Arc::new(Self {
			id: path::request_path(&caller.sender, &token),
			sender: caller.sender.clone(),
			app_id: caller.app_id.clone(),
			state: Locked::new(RequestState::default()),
		}))
	}

	/// Object path of this request.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn sender(&self) -> &str {
		&self.sender
	}

	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	pub fn is_exported(&self) -> bool {
		self.lock().exported
	}

	/// Publishes the request on `connection`.
	pub fn export_locked(self: &Arc<Self>, state: &mut RequestState, connection: &Arc<BusConnection>) -> Result<(), ExportError> {
		connection.export(Arc::clone(self))?;
		state.exported = true;
		state.connection = Some(Arc::clone(connection));
		trace!(target = "inport.request", id = %self.id, "exported");
		Ok(())
	}

	/// Removes the request from the bus. Idempotent.
	pub fn unexport_locked(&self, state: &mut RequestState) {
		if !state.exported {
			return;
		}
		state.exported = false;
		state.impl_request = None;
		if let Some(connection) = state.connection.take() {
			connection.unexport(&self.id);
		}
		trace!(target = "inport.request", id = %self.id, "unexported");
	}

	/// Emits the terminal response and unexports.
	///
	/// Returns `false` without emitting if the request was already answered.
	pub fn respond_locked(&self, state: &mut RequestState, code: ResponseCode, results: Options) -> bool {
		if !state.exported {
			return false;
		}
		if let Some(connection) = state.connection.as_ref() {
			connection.emit(&self.sender, &self.id, Signal::response(code, results));
		}
		debug!(target = "inport.request", id = %self.id, %code, "responded");
		self.unexport_locked(state);
		true
	}

	/// Caller-initiated cancellation.
	///
	/// Answers with [`ResponseCode::Cancelled`], notifies the backend's
	/// pending call, force-closes the attached session and unexports. Does
	/// nothing if the request was already answered.
	pub fn close(&self) {
		let mut state = self.lock();
		if !state.exported {
			return;
		}

		if let Some(impl_request) = state.impl_request.take() {
			impl_request.close();
		}
		if let Some(session) = state.session.as_ref() {
			session.close(true);
		}
		self.respond_locked(&mut state, ResponseCode::Cancelled, Options::new());
		debug!(target = "inport.request", id = %self.id, "closed by caller");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::RecordingSink;
	use serde_json::json;

	fn caller() -> Caller {
		Caller::new(":1.9", "org.example.App")
	}

	fn connection() -> (Arc<BusConnection>, Arc<RecordingSink>) {
		let sink = Arc::new(RecordingSink::default());
		(Arc::new(BusConnection::new(sink.clone())), sink)
	}

	#[test]
	fn path_uses_handle_token() {
		let options = json!({"handle_token": "abc"}).as_object().cloned().unwrap();
		let request = Request::new(&caller(), &options).unwrap();
		assert_eq!(request.id(), "/org/freedesktop/portal/desktop/request/1_9/abc");
		assert_eq!(request.sender(), ":1.9");
		assert_eq!(request.app_id(), "org.example.App");
	}

	#[test]
	fn malformed_handle_token_is_rejected() {
		let options = json!({"handle_token": "../x"}).as_object().cloned().unwrap();
		let err = Request::new(&caller(), &options).unwrap_err();
		assert!(matches!(err, PortalError::InvalidArgument(_)));
	}

	#[test]
	fn export_collision_fails() {
		let (conn, _) = connection();
		let options = json!({"handle_token": "same"}).as_object().cloned().unwrap();
		let first = Request::new(&caller(), &options).unwrap();
		let second = Request::new(&caller(), &options).unwrap();

		first.export_locked(&mut first.lock(), &conn).unwrap();
		let err = second.export_locked(&mut second.lock(), &conn).unwrap_err();
		assert!(matches!(err, ExportError::PathInUse(_)));
		assert!(!second.is_exported());
	}

	#[test]
	fn respond_emits_once_and_unexports() {
		let (conn, sink) = connection();
		let request = Request::new(&caller(), &Options::new()).unwrap();
		let mut state = request.lock();
		request.export_locked(&mut state, &conn).unwrap();

		assert!(request.respond_locked(&mut state, ResponseCode::Success, Options::new()));
		assert!(!request.respond_locked(&mut state, ResponseCode::Other, Options::new()));
		drop(state);

		assert_eq!(sink.responses_for(request.id()).len(), 1);
		assert!(!conn.is_exported(request.id()));
		assert_eq!(conn.unexport_count(), 1);
	}

	#[test]
	fn close_answers_cancelled_then_is_inert() {
		let (conn, sink) = connection();
		let request = Request::new(&caller(), &Options::new()).unwrap();
		request.export_locked(&mut request.lock(), &conn).unwrap();

		request.close();
		request.close();

		let responses = sink.responses_for(request.id());
		assert_eq!(responses.len(), 1);
		assert_eq!(responses[0].0, ResponseCode::Cancelled);
		assert!(!request.is_exported());
	}

	#[test]
	fn unexport_is_idempotent() {
		let (conn, _) = connection();
		let request = Request::new(&caller(), &Options::new()).unwrap();
		let mut state = request.lock();
		request.export_locked(&mut state, &conn).unwrap();
		request.unexport_locked(&mut state);
		request.unexport_locked(&mut state);
		assert_eq!(conn.unexport_count(), 1);
	}
}
