//! Backend call bridging.
//!
//! A [`PendingCall`] is the request/session pair captured when a backend call
//! is issued. It owns references to both objects, so neither can go away
//! while the call is outstanding, and it is moved into the task that awaits
//! the backend and reconciles the result.
//!
//! # Completion
//!
//! The completion runs exactly once per issued call:
//!
//! 1. Lock the request, then the session (the only order used anywhere).
//! 2. Detach the session from the request.
//! 3. If the request is still exported, emit the terminal response (empty
//!    results unless the backend succeeded) and unexport.
//! 4. Close the session unless the backend succeeded on a still-exported
//!    request.
//!
//! A caller `Close` that already answered the request leaves it unexported,
//! so step 3 is skipped and the backend result is dropped.

use std::sync::Arc;

use inport_protocol::rpc::BackendReply;
use inport_protocol::{Capabilities, CreateSessionResults, Options, ResponseCode, ZonesResults, lookup_u32};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{Backend, BackendCall};
use crate::error::BackendError;
use crate::locked::LockedObject;
use crate::request::{Request, RequestState};
use crate::session::{Session, SessionData, SessionState};
use crate::task::spawn_detached;

/// Which backend method a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
	CreateSession,
	GetZones,
	SetPointerBarriers,
	Enable,
	Disable,
	Release,
}

impl From<&BackendCall> for CallKind {
	fn from(call: &BackendCall) -> Self {
		match call {
			BackendCall::CreateSession { .. } => CallKind::CreateSession,
			BackendCall::GetZones { .. } => CallKind::GetZones,
			BackendCall::SetPointerBarriers { .. } => CallKind::SetPointerBarriers,
			BackendCall::Enable { .. } => CallKind::Enable,
			BackendCall::Disable { .. } => CallKind::Disable,
			BackendCall::Release { .. } => CallKind::Release,
		}
	}
}

/// Request/session pair reconciled when a backend call completes.
#[derive(Debug)]
pub struct PendingCall {
	request: Arc<Request>,
	session: Arc<Session>,
}

impl PendingCall {
	pub fn new(request: Arc<Request>, session: Arc<Session>) -> Self {
		Self { request, session }
	}

	/// Attaches the session to the request and issues `call` in the
	/// background.
	///
	/// The caller holds the request lock; the completion cannot start
	/// reconciling before that guard is dropped.
	pub fn issue(self, request_state: &mut RequestState, backend: Arc<dyn Backend>, call: BackendCall) {
		request_state.attach_session(Arc::clone(&self.session));
		let kind = CallKind::from(&call);
		debug!(target = "inport.bridge", request = %self.request.id(), session = %self.session.id(), ?kind, "issuing backend call");

		spawn_detached("backend call", async move {
			let outcome = backend.call(call).await;
			self.complete(kind, outcome);
		});
	}

	/// Reconciles the backend outcome with the request and session.
	pub(crate) fn complete(self, kind: CallKind, outcome: Result<BackendReply, BackendError>) {
		let (code, results) = match outcome {
			Ok(reply) => (reply.response, reply.results),
			Err(err) => {
				warn!(target = "inport.bridge", request = %self.request.id(), ?kind, error = %err, "backend call failed");
				(ResponseCode::Other, Options::new())
			}
		};

		let mut request_state = self.request.lock();
		let mut data = self.session.lock();
		request_state.detach_session();

		match kind {
			CallKind::CreateSession => self.complete_create_session(&mut request_state, &mut data, code, results),
			_ => self.complete_session_call(&mut request_state, &mut data, kind, code, results),
		}
	}

	fn complete_session_call(
		&self,
		request_state: &mut RequestState,
		data: &mut SessionData,
		kind: CallKind,
		code: ResponseCode,
		results: Options,
	) {
		let exported = request_state.is_exported();
		let should_close = !exported || !code.is_success();

		if exported {
			let results = if code.is_success() {
				self.apply_success(data, kind, &results);
				results
			} else {
				Options::new()
			};
			self.request.respond_locked(request_state, code, results);
		} else {
			debug!(target = "inport.bridge", request = %self.request.id(), ?kind, %code, "discarding reply to cancelled request");
		}

		if should_close {
			self.session.close_locked(data, true);
		}
	}

	fn apply_success(&self, data: &mut SessionData, kind: CallKind, results: &Options) {
		match kind {
			CallKind::GetZones => match serde_json::from_value::<ZonesResults>(Value::Object(results.clone())) {
				Ok(zones) => data.set_zones_serial(zones.serial),
				Err(err) => {
					warn!(target = "inport.bridge", session = %self.session.id(), error = %err, "backend zones reply is malformed");
				}
			},
			CallKind::Enable => data.transition(SessionState::Enabled),
			CallKind::Disable => data.transition(SessionState::Disabled),
			CallKind::Release => self.session.close_locked(data, false),
			CallKind::SetPointerBarriers | CallKind::CreateSession => {}
		}
	}

	fn complete_create_session(&self, request_state: &mut RequestState, data: &mut SessionData, code: ResponseCode, results: Options) {
		let confirmed = request_state.is_exported() && code.is_success() && data.state() != SessionState::Closed;
		let mut reply = Options::new();

		if confirmed {
			let created = CreateSessionResults {
				capabilities: Capabilities::from_bits_truncate(lookup_u32(&results, "capabilities").unwrap_or(0)),
				session_handle: self.session.id().to_string(),
			};
			data.set_capabilities(created.capabilities);
			data.transition(SessionState::Connected);
			self.session.register_locked(data);

			match serde_json::to_value(&created) {
				Ok(Value::Object(fields)) => reply = fields,
				Ok(_) => {}
				Err(err) => warn!(target = "inport.bridge", session = %self.session.id(), error = %err, "failed to encode session results"),
			}
		}

		if request_state.is_exported() {
			let code = if code.is_success() && !confirmed { ResponseCode::Other } else { code };
			self.request.respond_locked(request_state, code, reply);
		}

		if !confirmed {
			self.session.close_locked(data, false);
			if code.is_success() {
				// The backend holds a live session nobody will confirm.
				self.session.release_backend();
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::BusConnection;
	use crate::caller::Caller;
	use crate::session::{SessionContext, SessionKind, SessionRegistry};
	use crate::testing::{RecordingSink, ScriptedBackend};
	use serde_json::json;

	struct Fixture {
		sink: Arc<RecordingSink>,
		context: SessionContext,
		request: Arc<Request>,
		session: Arc<Session>,
	}

	fn fixture() -> Fixture {
		let sink = Arc::new(RecordingSink::default());
		let context = SessionContext {
			backend: Arc::new(ScriptedBackend::new()),
			registry: Arc::new(SessionRegistry::new()),
			connection: Arc::new(BusConnection::new(sink.clone())),
		};
		let request = Request::new(&Caller::new(":1.3", ""), &Options::new()).unwrap();
		let session = Session::new(&Options::new(), &request, SessionKind::InputCapture, &context).unwrap();
		request.export_locked(&mut request.lock(), &context.connection).unwrap();
		request.lock().attach_session(Arc::clone(&session));
		Fixture {
			sink,
			context,
			request,
			session,
		}
	}

	fn connect(session: &Arc<Session>) {
		let mut data = session.lock();
		data.transition(SessionState::Connected);
		session.register_locked(&mut data);
	}

	#[test]
	fn create_session_success_registers_and_reports_handle() {
		let f = fixture();
		let reply = BackendReply::success(json!({"capabilities": 0xff}).as_object().cloned().unwrap());
		PendingCall::new(Arc::clone(&f.request), Arc::clone(&f.session)).complete(CallKind::CreateSession, Ok(reply));

		let responses = f.sink.responses_for(f.request.id());
		assert_eq!(responses.len(), 1);
		assert_eq!(responses[0].0, ResponseCode::Success);
		assert_eq!(responses[0].1["capabilities"], 7);
		assert_eq!(responses[0].1["session_handle"], f.session.id());
		assert_eq!(f.session.state(), SessionState::Connected);
		assert_eq!(f.context.registry.registered_count(), 1);
		assert!(f.request.lock().attached_session().is_none());
	}

	#[test]
	fn create_session_failure_closes_unregistered_session() {
		let f = fixture();
		PendingCall::new(Arc::clone(&f.request), Arc::clone(&f.session)).complete(CallKind::CreateSession, Err(BackendError::ChannelClosed));

		let responses = f.sink.responses_for(f.request.id());
		assert_eq!(responses.len(), 1);
		assert_eq!(responses[0].0, ResponseCode::Other);
		assert!(responses[0].1.is_empty());
		assert_eq!(f.session.state(), SessionState::Closed);
		assert_eq!(f.context.registry.registered_count(), 0);
	}

	#[tokio::test]
	async fn session_call_failure_force_closes_session() {
		let f = fixture();
		connect(&f.session);
		let reply = BackendReply::failure();
		PendingCall::new(Arc::clone(&f.request), Arc::clone(&f.session)).complete(CallKind::Enable, Ok(reply));

		assert_eq!(f.sink.responses_for(f.request.id())[0].0, ResponseCode::Other);
		assert_eq!(f.session.state(), SessionState::Closed);
		assert_eq!(f.sink.signals_for(f.session.id()).len(), 1);
	}

	#[test]
	fn get_zones_success_records_serial() {
		let f = fixture();
		connect(&f.session);
		let results = json!({"serial": 12, "zones": [[1920, 1080, 0, 0]]}).as_object().cloned().unwrap();
		PendingCall::new(Arc::clone(&f.request), Arc::clone(&f.session)).complete(CallKind::GetZones, Ok(BackendReply::success(results)));

		assert_eq!(f.session.lock().zones_serial(), Some(12));
		assert_eq!(f.session.state(), SessionState::Connected);
		assert_eq!(f.sink.responses_for(f.request.id())[0].1["zones"], json!([[1920, 1080, 0, 0]]));
	}

	#[test]
	fn zones_reply_without_zones_records_no_serial() {
		let f = fixture();
		connect(&f.session);
		let results = json!({"serial": 12}).as_object().cloned().unwrap();
		PendingCall::new(Arc::clone(&f.request), Arc::clone(&f.session)).complete(CallKind::GetZones, Ok(BackendReply::success(results)));

		assert_eq!(f.session.lock().zones_serial(), None);
		assert_eq!(f.sink.responses_for(f.request.id())[0].0, ResponseCode::Success);
	}

	#[tokio::test]
	async fn reply_after_cancel_is_discarded() {
		let f = fixture();
		connect(&f.session);
		f.request.close();
		PendingCall::new(Arc::clone(&f.request), Arc::clone(&f.session)).complete(CallKind::Enable, Ok(BackendReply::success(Options::new())));

		let responses = f.sink.responses_for(f.request.id());
		assert_eq!(responses.len(), 1);
		assert_eq!(responses[0].0, ResponseCode::Cancelled);
		assert_eq!(f.session.state(), SessionState::Closed);
		assert_eq!(f.context.connection.unexport_count(), 1);
	}
}
