//! Typed end of the data channel.

use futures_util::Stream;
use futures_util::stream;
use pbc_protocol::DataMessage;
use pbc_runtime::{MessagePort, MessageTarget, PortSender, Result};
use tracing::warn;

/// The host's end of a session's data channel.
///
/// Inbound module events arrive here as [`DataMessage`]s; messages sent here
/// reach the module's outbound `send`. The port closes when the session
/// module terminates or the worker goes away.
#[derive(Debug)]
pub struct DataPort {
	port: MessagePort,
}

impl DataPort {
	pub fn new(port: MessagePort) -> Self {
		Self { port }
	}

	/// Sends a message to the session.
	pub fn send(&self, msg: &DataMessage) -> Result<()> {
		self.port.post(msg.to_value())
	}

	/// Receives the next inbound event. Frames that are not `[type, payload]`
	/// pairs are skipped.
	///
	/// Returns `None` once the channel is closed or a handler was installed.
	pub async fn recv(&mut self) -> Option<DataMessage> {
		loop {
			let msg = self.port.recv().await?;
			match DataMessage::from_value(msg.data) {
				Ok(msg) => return Some(msg),
				Err(e) => warn!(error = %e, "skipping malformed data frame"),
			}
		}
	}

	/// Delivers inbound events to `handler` instead of [`recv`](Self::recv).
	/// A later handler replaces the former one.
	pub fn on_message<F>(&mut self, mut handler: F)
	where
		F: FnMut(DataMessage) + Send + 'static,
	{
		self.port
			.set_onmessage(move |msg| match DataMessage::from_value(msg.data) {
				Ok(msg) => handler(msg),
				Err(e) => warn!(error = %e, "skipping malformed data frame"),
			});
	}

	/// A clonable handle for sending from elsewhere.
	pub fn sender(&self) -> PortSender {
		self.port.sender()
	}

	/// Whether the worker end is gone.
	pub fn is_closed(&self) -> bool {
		self.port.is_closed()
	}

	/// Inbound events as a stream.
	pub fn into_stream(self) -> impl Stream<Item = DataMessage> + Send {
		stream::unfold(self, |mut port| async move {
			let msg = port.recv().await?;
			Some((msg, port))
		})
	}

	pub fn into_port(self) -> MessagePort {
		self.port
	}
}

impl From<MessagePort> for DataPort {
	fn from(port: MessagePort) -> Self {
		Self::new(port)
	}
}
