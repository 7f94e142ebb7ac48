#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use inport::testing::{RecordingSink, ScriptedBackend};
use inport::{Caller, EisEndpoint, Portal, PortalError, Reply, StaticLockdown};
use inport_protocol::{Options, PortalCall, ResponseCode};
use serde_json::json;

pub struct Harness {
	pub portal: Arc<Portal>,
	pub backend: Arc<ScriptedBackend>,
	pub sink: Arc<RecordingSink>,
	pub caller: Caller,
}

pub fn harness(backend: ScriptedBackend) -> Harness {
	let backend = Arc::new(backend);
	let sink = Arc::new(RecordingSink::default());
	let portal = Portal::new(
		sink.clone(),
		backend.clone(),
		Arc::new(StaticLockdown::default()),
		EisEndpoint::at("/nonexistent/eis-0"),
	);
	Harness {
		portal: Arc::new(portal),
		backend,
		sink,
		caller: Caller::new(":1.7", "org.example.App"),
	}
}

pub fn options(value: serde_json::Value) -> Options {
	value.as_object().cloned().expect("options must be a JSON object")
}

impl Harness {
	pub async fn call(&self, call: PortalCall) -> Result<Reply, PortalError> {
		self.portal.handle(&self.caller, call).await
	}

	/// Issues a request-returning call and returns its path.
	pub async fn request(&self, call: PortalCall) -> String {
		match self.call(call).await.expect("call should be accepted") {
			Reply::Handle(handle) => handle,
			other => panic!("expected a request handle, got {other:?}"),
		}
	}

	/// Waits for the first `Response` on `path`.
	pub async fn response(&self, path: &str) -> (ResponseCode, Options) {
		for _ in 0..2000 {
			if let Some(response) = self.sink.responses_for(path).into_iter().next() {
				return response;
			}
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
		panic!("no response on {path}");
	}

	/// Creates a backend-confirmed session and returns its handle.
	pub async fn connected_session(&self, token: &str) -> String {
		let handle = self
			.request(PortalCall::CreateSession {
				parent_window: String::new(),
				options: options(json!({"session_handle_token": token})),
			})
			.await;
		self.backend.release(1);
		let (code, results) = self.response(&handle).await;
		assert_eq!(code, ResponseCode::Success, "CreateSession failed");
		results["session_handle"].as_str().expect("session_handle in results").to_string()
	}

	pub fn enable(&self, session_handle: &str, options: Options) -> PortalCall {
		PortalCall::Enable {
			session_handle: session_handle.to_string(),
			options,
		}
	}
}

/// Lets spawned completions run to the end.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(20)).await;
}
