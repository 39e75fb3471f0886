//! Control vocabulary between the host facade and the worker.
//!
//! The host posts [`Command`]s on the worker's control port. Commands that
//! expect an answer travel together with a freshly created reply port, and the
//! worker answers on that port with exactly one [`Reply`]. There is no
//! correlation identifier anywhere in the vocabulary: the reply port *is* the
//! correlation.
//!
//! On the wire a command is a JSON object tagged by its `type` field:
//!
//! ```text
//! {"type":"PBC_LOAD","source":{"url":"https://cdn.example/pbc.wasm"}}
//! {"type":"PBC_CONN","url":"wss://host/posbus","token":"...","userId":"..."}
//! {"type":"PBC_DISC"}
//! {"type":"PBC_TP","world":"..."}
//! {"type":"PBC_PORT"}                       + data port in the transfer list
//! {"type":"PBC_ERR","err":"reason"}         (error replies)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::source::ModuleSource;

/// Tag asking the worker to load and start the session module.
pub const TAG_LOAD: &str = "PBC_LOAD";
/// Tag of error replies sent back to the host.
pub const TAG_ERROR: &str = "PBC_ERR";
/// Tag asking the worker to open the session.
pub const TAG_CONNECT: &str = "PBC_CONN";
/// Tag asking the worker to close the session.
pub const TAG_DISCONNECT: &str = "PBC_DISC";
/// Tag handing the data channel endpoint to the worker.
pub const TAG_DATA_PORT: &str = "PBC_PORT";
/// Tag asking the worker to move the session to another world.
pub const TAG_TELEPORT: &str = "PBC_TP";

/// Every tag the worker understands. Anything else is dropped.
pub const TAGS: [&str; 6] = [
	TAG_LOAD,
	TAG_ERROR,
	TAG_CONNECT,
	TAG_DISCONNECT,
	TAG_DATA_PORT,
	TAG_TELEPORT,
];

/// A control message posted from the host to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
	/// Instantiate and start the session module.
	#[serde(rename = "PBC_LOAD")]
	Load {
		/// Where to load the module from; the worker's default when absent.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		source: Option<ModuleSource>,
	},
	/// Open a session against a posbus endpoint.
	#[serde(rename = "PBC_CONN", rename_all = "camelCase")]
	Connect {
		url: String,
		token: String,
		user_id: String,
	},
	/// Close the current session.
	#[serde(rename = "PBC_DISC")]
	Disconnect,
	/// Move the session to another world.
	#[serde(rename = "PBC_TP")]
	Teleport { world: String },
	/// Install the data channel endpoint carried in the transfer list.
	#[serde(rename = "PBC_PORT")]
	SetDataPort,
	/// Error report. Only meaningful as a [`Reply`]; the worker ignores it.
	#[serde(rename = "PBC_ERR")]
	Error { err: String },
}

/// The kind of a [`Command`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
	Load,
	Connect,
	Disconnect,
	Teleport,
	SetDataPort,
	Error,
}

impl CommandKind {
	/// Wire tag of this kind.
	pub fn tag(self) -> &'static str {
		match self {
			CommandKind::Load => TAG_LOAD,
			CommandKind::Connect => TAG_CONNECT,
			CommandKind::Disconnect => TAG_DISCONNECT,
			CommandKind::Teleport => TAG_TELEPORT,
			CommandKind::SetDataPort => TAG_DATA_PORT,
			CommandKind::Error => TAG_ERROR,
		}
	}

	/// Whether the worker answers this kind with a [`Reply`].
	///
	/// `LOAD` and `CONNECT` always get exactly one reply. Everything else is
	/// fire-and-forget.
	pub fn expects_reply(self) -> bool {
		matches!(self, CommandKind::Load | CommandKind::Connect)
	}
}

impl std::fmt::Display for CommandKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.tag())
	}
}

impl Command {
	/// Builds a `PBC_LOAD` command.
	pub fn load(source: Option<ModuleSource>) -> Self {
		Command::Load { source }
	}

	/// Builds a `PBC_CONN` command.
	pub fn connect(
		url: impl Into<String>,
		token: impl Into<String>,
		user_id: impl Into<String>,
	) -> Self {
		Command::Connect {
			url: url.into(),
			token: token.into(),
			user_id: user_id.into(),
		}
	}

	/// Builds a `PBC_TP` command.
	pub fn teleport(world: impl Into<String>) -> Self {
		Command::Teleport {
			world: world.into(),
		}
	}

	/// Returns the kind of this command.
	pub fn kind(&self) -> CommandKind {
		match self {
			Command::Load { .. } => CommandKind::Load,
			Command::Connect { .. } => CommandKind::Connect,
			Command::Disconnect => CommandKind::Disconnect,
			Command::Teleport { .. } => CommandKind::Teleport,
			Command::SetDataPort => CommandKind::SetDataPort,
			Command::Error { .. } => CommandKind::Error,
		}
	}

	/// Serializes to the JSON object posted on the control port.
	pub fn to_value(&self) -> serde_json::Result<Value> {
		serde_json::to_value(self)
	}

	/// Parses a message received on the control port.
	///
	/// Fails for unknown tags and for known tags with a malformed payload.
	pub fn from_value(value: Value) -> serde_json::Result<Self> {
		serde_json::from_value(value)
	}

	/// Returns the `type` tag of a raw control message, if it has one.
	pub fn tag_of(value: &Value) -> Option<&str> {
		value.get("type").and_then(Value::as_str)
	}
}

/// Answer to a command that expects one.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
	/// Success, with a kind-dependent value (the worker sends `true`).
	Ok(Value),
	/// `PBC_ERR` carrying the failure reason.
	Err(String),
}

#[derive(Deserialize)]
struct ErrorReply {
	#[serde(default)]
	err: Value,
}

impl Reply {
	/// The plain success reply.
	pub fn ok() -> Self {
		Reply::Ok(Value::Bool(true))
	}

	/// An error reply with the given reason.
	pub fn error(reason: impl Into<String>) -> Self {
		Reply::Err(reason.into())
	}

	/// Returns true for `PBC_ERR` replies.
	pub fn is_error(&self) -> bool {
		matches!(self, Reply::Err(_))
	}

	/// Serializes to the value posted on the reply port.
	pub fn into_value(self) -> Value {
		match self {
			Reply::Ok(value) => value,
			Reply::Err(reason) => serde_json::json!({ "type": TAG_ERROR, "err": reason }),
		}
	}

	/// Interprets a value received on a reply port.
	///
	/// Any object tagged `PBC_ERR` is an error; everything else is success.
	/// A non-string `err` is kept as its JSON text.
	pub fn from_value(value: Value) -> Self {
		if Command::tag_of(&value) != Some(TAG_ERROR) {
			return Reply::Ok(value);
		}
		match serde_json::from_value::<ErrorReply>(value) {
			Ok(ErrorReply {
				err: Value::String(reason),
			}) => Reply::Err(reason),
			Ok(ErrorReply { err: Value::Null }) => Reply::Err("unknown error".to_string()),
			Ok(ErrorReply { err }) => Reply::Err(err.to_string()),
			Err(e) => Reply::Err(format!("malformed error reply: {e}")),
		}
	}

	/// Converts into a `Result`, the error side carrying the reason.
	pub fn into_result(self) -> std::result::Result<Value, String> {
		match self {
			Reply::Ok(value) => Ok(value),
			Reply::Err(reason) => Err(reason),
		}
	}
}
