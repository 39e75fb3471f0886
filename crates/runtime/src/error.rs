//! Error types for the bridge runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a session across the bridge.
#[derive(Debug, Error)]
pub enum Error {
	/// The session module failed to start or never exposed its surface.
	#[error("Failed to load session module: {0}")]
	Load(String),

	/// The session module rejected or failed the connect attempt.
	#[error("Failed to connect: {0}")]
	Connect(String),

	/// An unrecognized or malformed control message.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// The session module's run loop exited. Reload to continue.
	#[error("Session module terminated: {reason}")]
	ModuleTerminated { reason: String },

	/// The worker context is gone.
	#[error("Worker exited")]
	WorkerExited,

	/// Raw `PBC_ERR` reply received by a control call.
	#[error("Worker replied with error: {message}")]
	Remote { message: String },

	/// The far end of a channel is closed, or a reply port was dropped unanswered.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// A port with an installed message handler was put in a transfer list.
	#[error("Port cannot be transferred: a message handler is installed")]
	NotTransferable,

	/// Data was sent before a session was connected.
	#[error("Not connected: call connect() first")]
	NotConnected,

	/// A session operation was issued before the module was loaded.
	#[error("Session module not loaded: call load() first")]
	NotLoaded,

	/// I/O error (worker thread or runtime creation).
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true when the whole session has to be rebuilt from `load`.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Error::ModuleTerminated { .. } | Error::WorkerExited)
	}

	/// Returns the bare reason, without the variant prefix.
	///
	/// This is what travels in a `PBC_ERR` reply, so module rejections reach
	/// the host verbatim.
	pub fn reason(&self) -> String {
		match self {
			Error::Load(reason)
			| Error::Connect(reason)
			| Error::Protocol(reason)
			| Error::ModuleTerminated { reason }
			| Error::Remote { message: reason } => reason.clone(),
			other => other.to_string(),
		}
	}
}
