//! In-memory collaborators for tests.
//!
//! * [`RecordingSink`] records every emitted signal.
//! * [`ScriptedBackend`] answers backend calls from a script, optionally after
//!   a delay or only once the test opens its gate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use inport_protocol::rpc::BackendReply;
use inport_protocol::{Options, ResponseCode, Signal};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::backend::{Backend, BackendCall};
use crate::bus::SignalSink;
use crate::error::BackendError;

/// One emitted signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
	pub destination: String,
	pub path: String,
	pub signal: Signal,
}

/// [`SignalSink`] that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingSink {
	emitted: Mutex<Vec<Emitted>>,
}

impl RecordingSink {
	pub fn emitted(&self) -> Vec<Emitted> {
		self.emitted.lock().clone()
	}

	/// Signals emitted on `path`, in order.
	pub fn signals_for(&self, path: &str) -> Vec<Signal> {
		self.emitted
			.lock()
			.iter()
			.filter(|emitted| emitted.path == path)
			.map(|emitted| emitted.signal.clone())
			.collect()
	}

	/// `Response` signals emitted on `path`.
	pub fn responses_for(&self, path: &str) -> Vec<(ResponseCode, Options)> {
		self.signals_for(path)
			.into_iter()
			.filter_map(|signal| match signal {
				Signal::Response { code, results } => Some((code, results)),
				_ => None,
			})
			.collect()
	}
}

impl SignalSink for RecordingSink {
	fn emit(&self, destination: &str, path: &str, signal: Signal) {
		self.emitted.lock().push(Emitted {
			destination: destination.to_string(),
			path: path.to_string(),
			signal,
		});
	}
}

#[derive(Debug, Clone)]
enum Scripted {
	Reply(BackendReply),
	Error(String),
}

/// Backend whose replies are scripted per method.
///
/// Unscripted methods succeed with empty results.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
	replies: Mutex<HashMap<&'static str, Scripted>>,
	delay: Mutex<Option<Duration>>,
	gate: Option<Arc<Semaphore>>,
	refuse: Mutex<bool>,
	calls: Mutex<Vec<BackendCall>>,
	closed_requests: Mutex<Vec<String>>,
	closed_sessions: Mutex<Vec<String>>,
}

impl ScriptedBackend {
	pub fn new() -> Self {
		Self::default()
	}

	/// Calls block until [`ScriptedBackend::release`] lets them through.
	pub fn gated() -> Self {
		Self {
			gate: Some(Arc::new(Semaphore::new(0))),
			..Self::default()
		}
	}

	/// Every call sleeps for `delay` before answering.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock() = Some(delay);
	}

	pub fn reply_with(&self, method: &'static str, reply: BackendReply) {
		self.replies.lock().insert(method, Scripted::Reply(reply));
	}

	/// Makes `method` fail at the transport level.
	pub fn fail_with(&self, method: &'static str, message: &str) {
		self.replies.lock().insert(method, Scripted::Error(message.to_string()));
	}

	/// Makes `open_request` fail, as if the backend were unreachable.
	pub fn refuse_requests(&self) {
		*self.refuse.lock() = true;
	}

	/// Lets `n` gated calls complete.
	pub fn release(&self, n: usize) {
		if let Some(gate) = &self.gate {
			gate.add_permits(n);
		}
	}

	/// Calls received so far, in order.
	pub fn calls(&self) -> Vec<BackendCall> {
		self.calls.lock().clone()
	}

	pub fn closed_requests(&self) -> Vec<String> {
		self.closed_requests.lock().clone()
	}

	pub fn closed_sessions(&self) -> Vec<String> {
		self.closed_sessions.lock().clone()
	}

	/// Waits until at least `n` calls have been received.
	pub async fn wait_for_calls(&self, n: usize) {
		while self.calls.lock().len() < n {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	}
}

#[async_trait]
impl Backend for ScriptedBackend {
	fn open_request(&self, _handle: &str) -> Result<(), BackendError> {
		if *self.refuse.lock() {
			return Err(BackendError::ChannelClosed);
		}
		Ok(())
	}

	async fn call(&self, call: BackendCall) -> Result<BackendReply, BackendError> {
		let method = call.method();
		self.calls.lock().push(call);

		let delay = *self.delay.lock();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		if let Some(gate) = &self.gate {
			let permit = gate.acquire().await.map_err(|_| BackendError::ChannelClosed)?;
			permit.forget();
		}

		let scripted = self.replies.lock().get(method).cloned();
		match scripted {
			Some(Scripted::Reply(reply)) => Ok(reply),
			Some(Scripted::Error(message)) => Err(BackendError::Remote { name: None, message }),
			None => Ok(BackendReply::success(Options::new())),
		}
	}

	async fn close_request(&self, handle: &str) -> Result<(), BackendError> {
		self.closed_requests.lock().push(handle.to_string());
		Ok(())
	}

	async fn close_session(&self, session_handle: &str) -> Result<(), BackendError> {
		self.closed_sessions.lock().push(session_handle.to_string());
		Ok(())
	}
}
