use std::sync::Arc;
use std::time::Duration;

use inport::testing::RecordingSink;
use inport::transport::fake::FakeTransportBuilder;
use inport::{BackendEvent, Caller, EisEndpoint, Portal, PortalError, Reply, RpcBackend, SessionState, StaticLockdown};
use inport_protocol::{Options, PortalCall, ResponseCode, Signal};
use serde_json::json;

async fn wait_for_response(sink: &RecordingSink, path: &str) -> (ResponseCode, Options) {
	for _ in 0..2000 {
		if let Some(response) = sink.responses_for(path).into_iter().next() {
			return response;
		}
		tokio::time::sleep(Duration::from_millis(1)).await;
	}
	panic!("no response on {path}");
}

#[tokio::test]
async fn session_lifecycle_over_rpc_backend() {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let (backend, mut events) = RpcBackend::start(parts);
	let sink = Arc::new(RecordingSink::default());
	let portal = Portal::new(sink.clone(), backend, Arc::new(StaticLockdown::default()), EisEndpoint::at("/nonexistent/eis-0"));
	let caller = Caller::new(":1.4", "org.example.Remote");

	let Reply::Handle(handle) = portal
		.handle(&caller, PortalCall::CreateSession {
			parent_window: "x11:1".to_string(),
			options: json!({"handle_token": "create", "session_handle_token": "rpc", "capabilities": 3})
				.as_object()
				.cloned()
				.unwrap(),
		})
		.await
		.unwrap()
	else {
		panic!("expected a request handle");
	};
	assert_eq!(handle, "/org/freedesktop/portal/desktop/request/1_4/create");

	let sent = controller.next_sent().await.unwrap();
	assert_eq!(sent["guid"], handle);
	assert_eq!(sent["method"], "CreateSession");
	assert_eq!(sent["params"]["app_id"], "org.example.Remote");
	assert_eq!(sent["params"]["parent_window"], "x11:1");
	assert_eq!(sent["params"]["options"], json!({"capabilities": 3}));
	controller.inject_response(sent["id"].as_u64().unwrap() as u32, json!({"response": 0, "results": {"capabilities": 15}}));

	let (code, results) = wait_for_response(&sink, &handle).await;
	assert_eq!(code, ResponseCode::Success);
	// Unknown capability bits are masked off.
	assert_eq!(results["capabilities"], json!(7));
	let session = results["session_handle"].as_str().unwrap().to_string();
	assert_eq!(session, "/org/freedesktop/portal/desktop/session/1_4/rpc");

	let Reply::Handle(enable) = portal
		.handle(&caller, PortalCall::Enable {
			session_handle: session.clone(),
			options: Options::new(),
		})
		.await
		.unwrap()
	else {
		panic!("expected a request handle");
	};
	let sent = controller.next_sent().await.unwrap();
	assert_eq!(sent["method"], "Enable");
	controller.inject_response(sent["id"].as_u64().unwrap() as u32, json!({"response": 0}));
	assert_eq!(wait_for_response(&sink, &enable).await.0, ResponseCode::Success);
	assert_eq!(portal.sessions().lookup(&session).unwrap().state(), SessionState::Enabled);

	controller.inject_event(&session, "Activated", json!({"activation_id": 9}));
	let event = events.recv().await.unwrap();
	portal.handle_backend_event(BackendEvent::from(event));
	match sink.signals_for(&session).last() {
		Some(Signal::Activated { details }) => assert_eq!(details["activation_id"], json!(9)),
		other => panic!("expected Activated, got {other:?}"),
	}

	controller.inject_event(&session, "Closed", json!({}));
	let event = events.recv().await.unwrap();
	portal.handle_backend_event(BackendEvent::from(event));
	assert!(portal.sessions().lookup(&session).is_none());
	assert!(controller.take_sent().is_empty());
}

#[tokio::test]
async fn lost_backend_refuses_new_requests() {
	let (parts, controller) = FakeTransportBuilder::new().build();
	let (backend, _events) = RpcBackend::start(parts);
	let sink = Arc::new(RecordingSink::default());
	let portal = Portal::new(sink, backend, Arc::new(StaticLockdown::default()), EisEndpoint::at("/nonexistent/eis-0"));

	controller.disconnect();
	tokio::time::sleep(Duration::from_millis(20)).await;

	let err = portal
		.handle(&Caller::new(":1.4", ""), PortalCall::CreateSession {
			parent_window: String::new(),
			options: Options::new(),
		})
		.await
		.unwrap_err();
	assert!(matches!(err, PortalError::Backend(_)));
	assert_eq!(portal.connection().exported_count(), 0);
	assert_eq!(portal.sessions().registered_count(), 0);
}
