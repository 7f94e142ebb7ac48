//! Caller-facing bus connection: exported objects and signal emission.
//!
//! The wire substrate (framing, peers) is supplied from outside through a
//! [`SignalSink`]; this module only keeps the table of exported request
//! objects and routes signals to a destination sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use inport_protocol::Signal;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::ExportError;
use crate::request::Request;

/// Delivers a signal to one bus peer.
///
/// Implementations must not block: signals are emitted while request and
/// session locks are held.
pub trait SignalSink: Send + Sync {
	fn emit(&self, destination: &str, path: &str, signal: Signal);
}

/// Export table plus signal routing for one bus connection.
pub struct BusConnection {
	sink: Arc<dyn SignalSink>,
	objects: Mutex<HashMap<String, Arc<Request>>>,
	unexports: AtomicU64,
}

impl BusConnection {
	pub fn new(sink: Arc<dyn SignalSink>) -> Self {
		Self {
			sink,
			objects: Mutex::new(HashMap::new()),
			unexports: AtomicU64::new(0),
		}
	}

	/// Emits `signal` on `path`, addressed to `destination`.
	pub fn emit(&self, destination: &str, path: &str, signal: Signal) {
		trace!(target = "inport.bus", destination, path, ?signal, "emit");
		self.sink.emit(destination, path, signal);
	}

	/// Publishes `request` at its id.
	pub(crate) fn export(&self, request: Arc<Request>) -> Result<(), ExportError> {
		let mut objects = self.objects.lock();
		let path = request.id().to_string();
		if objects.contains_key(&path) {
			return Err(ExportError::PathInUse(path));
		}
		objects.insert(path, request);
		Ok(())
	}

	/// Removes the object at `path`; returns `false` if nothing was exported there.
	pub(crate) fn unexport(&self, path: &str) -> bool {
		let removed = self.objects.lock().remove(path).is_some();
		if removed {
			self.unexports.fetch_add(1, Ordering::SeqCst);
		}
		removed
	}

	/// Looks up an exported request.
	pub fn lookup(&self, path: &str) -> Option<Arc<Request>> {
		self.objects.lock().get(path).cloned()
	}

	/// Requests currently exported on behalf of `sender`.
	pub fn exported_by(&self, sender: &str) -> Vec<Arc<Request>> {
		self.objects.lock().values().filter(|request| request.sender() == sender).cloned().collect()
	}

	pub fn is_exported(&self, path: &str) -> bool {
		self.objects.lock().contains_key(path)
	}

	/// Number of currently exported requests.
	pub fn exported_count(&self) -> usize {
		self.objects.lock().len()
	}

	/// Total number of successful unexports since creation.
	pub fn unexport_count(&self) -> u64 {
		self.unexports.load(Ordering::SeqCst)
	}
}

impl std::fmt::Debug for BusConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BusConnection").field("exported", &self.exported_count()).finish()
	}
}
