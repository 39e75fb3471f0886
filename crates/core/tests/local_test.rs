// In-process client tests
//
// LocalClient drives the session adapter directly, so these run entirely on
// the test runtime.

mod common;

use common::{WAIT, options, stub};
use pbc::{DataMessage, Error, LocalClient, SessionState};
use pbc_runtime::testing::{Call, StubBehavior};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Serialize)]
struct Transform {
	x: f64,
	y: f64,
}

#[tokio::test]
async fn test_operations_before_load_fail() {
	let client = LocalClient::new(stub(StubBehavior::default()), options());

	assert!(matches!(client.disconnect(), Err(Error::NotLoaded)));
	assert!(matches!(client.teleport("world-A"), Err(Error::NotLoaded)));
	assert!(matches!(
		client.connect("wss://h", "t", "u").await,
		Err(Error::NotLoaded)
	));
	assert!(matches!(
		client.send("my-transform", &json!({})).await,
		Err(Error::NotLoaded)
	));
}

#[tokio::test]
async fn test_send_stringifies_payload() {
	let loader = stub(StubBehavior::default());
	let client = LocalClient::new(loader.clone(), options());
	client.load(None).await.unwrap();

	client
		.send("my-transform", &Transform { x: 1.0, y: 2.5 })
		.await
		.unwrap();

	assert_eq!(
		loader.last().unwrap().calls(),
		vec![Call::Send {
			msg_type: "my-transform".into(),
			data: r#"{"x":1.0,"y":2.5}"#.into(),
		}]
	);
}

#[tokio::test]
async fn test_handler_receives_events() {
	let loader = stub(StubBehavior::default().startup_event("hello", json!({"v": 1})));
	let (tx, mut rx) = mpsc::unbounded_channel();
	let client = LocalClient::new(loader.clone(), options()).with_handler(move |msg| {
		let _ = tx.send(msg);
	});
	client.load(None).await.unwrap();

	let mut data = client.connect("wss://h", "t", "u").await.unwrap();
	assert_eq!(client.state(), SessionState::Connected);

	// Buffered before connect, flushed once the data port is installed.
	let first = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
	assert_eq!(first, Some(DataMessage::new("hello", json!({"v": 1}))));

	loader.last().unwrap().emit("signal", json!(7));
	let second = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
	assert_eq!(second, Some(DataMessage::new("signal", json!(7))));

	// The handler owns the port.
	assert!(data.recv().await.is_none());
}

#[tokio::test]
async fn test_disconnect_and_teleport_reach_module() {
	let loader = stub(StubBehavior::default());
	let client = LocalClient::new(loader.clone(), options());
	client.load(None).await.unwrap();
	let _data = client.connect("wss://h", "t", "u").await.unwrap();

	client.teleport("world-A").unwrap();
	client.disconnect().unwrap();

	let module = loader.last().unwrap();
	assert!(module.wait_for(|c| *c == Call::Disconnect, WAIT).await);
	assert!(module.wait_for(|c| matches!(c, Call::Teleport(_)), WAIT).await);
	assert_eq!(client.state(), SessionState::Disconnected);
}
