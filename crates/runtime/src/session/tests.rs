use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::port::{MessageChannel, MessageTarget};
use crate::testing::{Call, StubBehavior, StubLoader};

const WAIT: Duration = Duration::from_secs(1);

fn session(behavior: StubBehavior) -> (Arc<StubLoader>, Session) {
	let loader = StubLoader::new(behavior);
	let options = WorkerOptions::new().load_timeout(Duration::from_millis(50));
	let session = Session::new(loader.clone(), options);
	(loader, session)
}

async fn loaded(behavior: StubBehavior) -> (Arc<StubLoader>, Session) {
	let (loader, session) = session(behavior);
	session.load(None).await.unwrap();
	(loader, session)
}

#[tokio::test]
async fn load_publishes_surface_and_installs_sink() {
	let (loader, session) = session(StubBehavior::default());
	let mut lifecycle = session.lifecycle();

	let handle = session.load(None).await.unwrap();

	assert_eq!(handle.generation(), 1);
	assert_eq!(session.state(), SessionState::Loaded);
	assert_eq!(loader.last().unwrap().generation(), 1);
	assert!(loader.last().unwrap().has_sink());
	assert!(lifecycle.has_changed().unwrap());
	assert_eq!(
		*lifecycle.borrow_and_update(),
		Lifecycle::Running { generation: 1 }
	);
}

#[tokio::test]
async fn load_times_out_when_surface_never_appears() {
	let (_loader, session) = session(StubBehavior::default().never_publish());

	let err = session.load(None).await.unwrap_err();

	match err {
		Error::Load(reason) => assert!(reason.contains("not exposed"), "{reason}"),
		other => panic!("unexpected error: {other}"),
	}
	assert_eq!(session.state(), SessionState::Unloaded);
}

#[tokio::test]
async fn load_times_out_when_loader_never_returns() {
	let (_loader, session) = session(StubBehavior::default().hang_start());

	let err = tokio::time::timeout(WAIT, session.load(None))
		.await
		.expect("load outlived its timeout")
		.unwrap_err();

	match err {
		Error::Load(reason) => assert!(reason.contains("did not start within 50ms"), "{reason}"),
		other => panic!("unexpected error: {other}"),
	}
	assert_eq!(session.state(), SessionState::Unloaded);
}

#[tokio::test]
async fn load_fails_when_run_loop_exits_first() {
	let (_loader, session) = session(StubBehavior {
		exit_immediately: true,
		..StubBehavior::default()
	});

	let err = session.load(None).await.unwrap_err();
	assert!(err.reason().contains("exited before exposing"), "{err}");
	assert_eq!(session.state(), SessionState::Unloaded);
}

#[tokio::test]
async fn loader_failure_is_load_error() {
	let (_loader, session) = session(StubBehavior {
		fail_start: Some("fetch failed".to_string()),
		..StubBehavior::default()
	});

	let err = session.load(None).await.unwrap_err();
	assert!(matches!(err, Error::Load(ref reason) if reason == "fetch failed"));

	// The loading flag is released, so a retry is allowed to run.
	let err = session.load(None).await.unwrap_err();
	assert!(matches!(err, Error::Load(ref reason) if reason == "fetch failed"));
}

#[tokio::test]
async fn second_load_is_rejected() {
	let (_loader, session) = loaded(StubBehavior::default()).await;
	let err = session.load(None).await.unwrap_err();
	assert_eq!(err.reason(), "module already loaded");
}

#[tokio::test]
async fn connect_requires_loaded_module() {
	let (_loader, session) = session(StubBehavior::default());
	let err = session.connect("wss://h", "t", "u").await.unwrap_err();
	assert_eq!(err.reason(), "module not loaded");
}

#[tokio::test]
async fn connect_success_and_rejection() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	session.connect("wss://h/posbus", "tok", "user-1").await.unwrap();
	assert_eq!(session.state(), SessionState::Connected);
	assert_eq!(
		loader.last().unwrap().calls(),
		vec![Call::Connect {
			url: "wss://h/posbus".into(),
			token: "tok".into(),
			user_id: "user-1".into(),
		}]
	);

	let err = session.connect("wss://h/posbus", "tok", "user-1").await.unwrap_err();
	assert_eq!(err.reason(), "already connected");

	let (_loader, session) = loaded(StubBehavior::default().reject_connect("invalid token")).await;
	let err = session.connect("wss://h", "bad", "u").await.unwrap_err();
	assert!(matches!(err, Error::Connect(ref reason) if reason == "invalid token"));
	assert_eq!(session.state(), SessionState::Errored);
}

#[tokio::test]
async fn second_connect_while_connecting_is_rejected() {
	let (loader, session) =
		loaded(StubBehavior::default().connect_delay(Duration::from_millis(30))).await;

	let first = session.begin_connect("wss://h", "t", "u").unwrap();
	assert_eq!(session.state(), SessionState::Connecting);

	let err = session.begin_connect("wss://h", "t", "u").unwrap_err();
	assert_eq!(err.reason(), "connect already in progress");

	first.finish().await.unwrap();
	assert_eq!(session.state(), SessionState::Connected);
	let module = loader.last().unwrap();
	assert_eq!(module.count(|c| matches!(c, Call::Connect { .. })), 1);
}

#[tokio::test]
async fn disconnect_overtaking_connect() {
	let (_loader, session) =
		loaded(StubBehavior::default().connect_delay(Duration::from_millis(30))).await;

	let pending = session.begin_connect("wss://h", "t", "u").unwrap();
	session.disconnect();
	assert_eq!(session.state(), SessionState::Disconnected);

	let err = pending.finish().await.unwrap_err();
	assert_eq!(err.reason(), "disconnected while connecting");
	assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn disconnect_while_unloaded_is_ignored() {
	let (_loader, session) = session(StubBehavior::default());
	session.disconnect();
	assert_eq!(session.state(), SessionState::Unloaded);
}

#[tokio::test]
async fn events_flow_to_data_port_until_disconnect() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	let module = loader.last().unwrap();
	let MessageChannel {
		port1: mut host,
		port2: worker,
	} = MessageChannel::new();

	session.set_data_port(worker);
	session.connect("wss://h", "t", "u").await.unwrap();

	module.emit("signal", json!({"n": 1}));
	assert_eq!(host.recv().await.unwrap().data, json!(["signal", {"n": 1}]));

	session.disconnect();
	assert!(module.wait_for(|c| *c == Call::Disconnect, WAIT).await);
	module.emit("signal", json!({"n": 2}));

	// Reconnect and show that only the post-reconnect event arrives.
	session.connect("wss://h", "t", "u").await.unwrap();
	module.emit("signal", json!({"n": 3}));
	assert_eq!(host.recv().await.unwrap().data, json!(["signal", {"n": 3}]));
}

#[tokio::test]
async fn events_before_data_port_are_buffered() {
	let (_loader, session) = loaded(
		StubBehavior::default()
			.startup_event("hello", json!(1))
			.startup_event("hello", json!(2)),
	)
	.await;

	let MessageChannel {
		port1: mut host,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);

	assert_eq!(host.recv().await.unwrap().data, json!(["hello", 1]));
	assert_eq!(host.recv().await.unwrap().data, json!(["hello", 2]));
}

#[tokio::test]
async fn data_port_messages_reach_module_as_text() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	let module = loader.last().unwrap();
	let MessageChannel {
		port1: host,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);

	host.post(json!(["my-transform", {"x": 1.5}])).unwrap();
	host.post(json!("not a frame")).unwrap();
	host.post(json!(["set-world", "w1"])).unwrap();

	let is_world = |c: &Call| matches!(c, Call::Send { msg_type, .. } if msg_type == "set-world");
	assert!(module.wait_for(is_world, WAIT).await);
	assert_eq!(
		module.calls(),
		vec![
			Call::Send {
				msg_type: "my-transform".into(),
				data: r#"{"x":1.5}"#.into(),
			},
			Call::Send {
				msg_type: "set-world".into(),
				data: r#""w1""#.into(),
			},
		]
	);
}

#[tokio::test]
async fn later_data_port_replaces_former() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	let module = loader.last().unwrap();

	let MessageChannel {
		port1: mut first,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);

	let MessageChannel {
		port1: mut second,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);

	module.emit("tick", json!(null));
	assert_eq!(second.recv().await.unwrap().data, json!(["tick", null]));
	assert!(first.recv().await.is_none());
}

#[tokio::test]
async fn rejected_connect_keeps_live_data_port() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	let module = loader.last().unwrap();
	let MessageChannel {
		port1: mut live,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);
	session.connect("wss://h", "t", "u").await.unwrap();

	let MessageChannel {
		port1: mut rejected,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);
	let err = session.connect("wss://h", "t", "u").await.unwrap_err();
	assert_eq!(err.reason(), "already connected");
	assert!(rejected.recv().await.is_none());

	module.emit("signal", json!(1));
	assert_eq!(live.recv().await.unwrap().data, json!(["signal", 1]));
	live.post(json!(["ping", 2])).unwrap();
	let is_ping = |c: &Call| matches!(c, Call::Send { msg_type, .. } if msg_type == "ping");
	assert!(module.wait_for(is_ping, WAIT).await);
	assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn data_port_staged_while_connected_is_installed_by_next_connect() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	let module = loader.last().unwrap();
	let MessageChannel {
		port1: mut first,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);
	session.connect("wss://h", "t", "u").await.unwrap();

	let MessageChannel {
		port1: mut second,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);
	session.disconnect();
	session.connect("wss://h", "t", "u").await.unwrap();

	module.emit("tick", json!(null));
	assert_eq!(second.recv().await.unwrap().data, json!(["tick", null]));
	assert!(first.recv().await.is_none());
}

#[tokio::test]
async fn teleport_is_forwarded_once() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	let module = loader.last().unwrap();
	session.connect("wss://h", "t", "u").await.unwrap();

	session.teleport("world-A");

	assert!(module.wait_for(|c| *c == Call::Teleport("world-A".into()), WAIT).await);
	assert_eq!(module.count(|c| matches!(c, Call::Teleport(_))), 1);
}

#[tokio::test]
async fn termination_resets_and_allows_reload() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	let module = loader.last().unwrap();
	let mut lifecycle = session.lifecycle();
	let MessageChannel {
		port1: mut host,
		port2: worker,
	} = MessageChannel::new();
	session.set_data_port(worker);
	session.connect("wss://h", "t", "u").await.unwrap();

	module.terminate(ModuleExit::Failed("socket closed".into()));

	let state = lifecycle
		.wait_for(|l| matches!(l, Lifecycle::Terminated { .. }))
		.await
		.unwrap()
		.clone();
	assert_eq!(
		state.termination_reason(),
		Some("run loop failed: socket closed")
	);
	assert_eq!(session.state(), SessionState::Unloaded);
	assert!(host.recv().await.is_none());

	let handle = session.load(None).await.unwrap();
	assert_eq!(handle.generation(), 2);
	assert_eq!(loader.modules().len(), 2);
	assert_eq!(loader.last().unwrap().generation(), 2);
	session.connect("wss://h", "t", "u").await.unwrap();
}

#[tokio::test]
async fn close_reaches_module() {
	let (loader, session) = loaded(StubBehavior::default()).await;
	session.close().await;
	assert_eq!(loader.last().unwrap().calls(), vec![Call::Close]);
}
