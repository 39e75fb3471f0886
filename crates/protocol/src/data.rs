//! Frames carried by the data channel once a session is live.
//!
//! A frame is a two-element JSON array `[messageType, payload]`. The tuple
//! shape keeps the message type out of the payload object, so payloads that
//! happen to have a `type` field of their own never collide with it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `(messageType, payload)` frame on the data channel.
///
/// The message type vocabulary belongs to the session (`"set-world"`,
/// `"my-transform"`, ...) and is never interpreted by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Value)", into = "(String, Value)")]
pub struct DataMessage {
	pub msg_type: String,
	pub payload: Value,
}

impl DataMessage {
	/// Creates a frame from its type and payload.
	pub fn new(msg_type: impl Into<String>, payload: Value) -> Self {
		Self {
			msg_type: msg_type.into(),
			payload,
		}
	}

	/// Creates a frame whose payload is any serializable value.
	pub fn from_payload<T: Serialize>(
		msg_type: impl Into<String>,
		payload: &T,
	) -> serde_json::Result<Self> {
		Ok(Self::new(msg_type, serde_json::to_value(payload)?))
	}

	/// Message type.
	pub fn msg_type(&self) -> &str {
		&self.msg_type
	}

	/// Structured payload.
	pub fn payload(&self) -> &Value {
		&self.payload
	}

	/// Payload as JSON text, the form the session module consumes.
	pub fn payload_text(&self) -> serde_json::Result<String> {
		serde_json::to_string(&self.payload)
	}

	/// Splits into `(msg_type, payload)`.
	pub fn into_parts(self) -> (String, Value) {
		(self.msg_type, self.payload)
	}

	/// Serializes to the `[type, payload]` array posted on the port.
	pub fn to_value(&self) -> Value {
		Value::Array(vec![
			Value::String(self.msg_type.clone()),
			self.payload.clone(),
		])
	}

	/// Parses a `[type, payload]` array received on the port.
	pub fn from_value(value: Value) -> serde_json::Result<Self> {
		serde_json::from_value(value)
	}
}

impl From<(String, Value)> for DataMessage {
	fn from((msg_type, payload): (String, Value)) -> Self {
		Self { msg_type, payload }
	}
}

impl From<DataMessage> for (String, Value) {
	fn from(msg: DataMessage) -> Self {
		(msg.msg_type, msg.payload)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn serializes_as_two_element_array() {
		let msg = DataMessage::new("set-world", json!({"id": "w1", "type": "inner"}));
		let json = serde_json::to_value(&msg).unwrap();
		assert_eq!(json, json!(["set-world", {"id": "w1", "type": "inner"}]));
		assert_eq!(json, msg.to_value());
	}

	#[test]
	fn parses_tuple_frames() {
		let msg = DataMessage::from_value(json!(["signal", 3])).unwrap();
		assert_eq!(msg.msg_type(), "signal");
		assert_eq!(msg.payload(), &json!(3));
	}

	#[test]
	fn rejects_non_tuple_frames() {
		assert!(DataMessage::from_value(json!({"msgType": "signal"})).is_err());
		assert!(DataMessage::from_value(json!(["only-type"])).is_err());
	}

	#[test]
	fn payload_text_is_compact_json() {
		let msg = DataMessage::new("my-transform", json!({"x": 1.5}));
		assert_eq!(msg.payload_text().unwrap(), r#"{"x":1.5}"#);
	}
}
