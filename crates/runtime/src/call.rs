//! Request/reply over message ports.
//!
//! Every call creates its own channel, keeps one end, and sends the other
//! along with the command. The worker answers on that end exactly once, so
//! concurrent calls can never see each other's replies and no correlation
//! id is needed.

use pbc_protocol::{Command, Reply};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::port::{MessageChannel, MessagePort, MessageTarget, PortMessage};

/// Sends `command` with a fresh reply port and waits for the single reply.
///
/// A `PBC_ERR` reply becomes [`Error::Remote`]. If the worker drops the reply
/// port without answering, the call fails with [`Error::ChannelClosed`].
pub async fn call<T>(target: &T, command: &Command) -> Result<Value>
where
	T: MessageTarget + ?Sized,
{
	let MessageChannel {
		port1: mut reply_port,
		port2: remote,
	} = MessageChannel::new();

	debug!(command = %command.kind(), "call");
	target.post_message(command.to_value()?, vec![remote])?;

	let msg = reply_port.recv().await.ok_or(Error::ChannelClosed)?;
	trace!(command = %command.kind(), reply = %msg.data, "reply");
	Reply::from_value(msg.data)
		.into_result()
		.map_err(|message| Error::Remote { message })
}

/// Posts `command` without waiting for anything. `ports` move to the worker.
pub fn notify<T>(target: &T, command: &Command, ports: Vec<MessagePort>) -> Result<()>
where
	T: MessageTarget + ?Sized,
{
	debug!(command = %command.kind(), ports = ports.len(), "notify");
	target.post_message(command.to_value()?, ports)
}

/// The answering side of a [`call`].
///
/// Sending consumes the responder, so a command is answered at most once.
/// Dropping it unanswered closes the reply port.
#[derive(Debug)]
pub struct Responder(Option<MessagePort>);

impl Responder {
	pub fn new(port: Option<MessagePort>) -> Self {
		Self(port)
	}

	/// Takes the reply port out of a received command.
	pub fn from_message(msg: &mut PortMessage) -> Self {
		Self(msg.take_port())
	}

	/// Whether the caller supplied a reply port.
	pub fn is_expected(&self) -> bool {
		self.0.is_some()
	}

	/// Sends `reply`. Without a reply port this is a no-op.
	pub fn send(mut self, reply: Reply) -> Result<()> {
		match self.0.take() {
			Some(port) => port.post(reply.into_value()),
			None => {
				debug!(error = reply.is_error(), "no reply port, dropping reply");
				Ok(())
			}
		}
	}

	/// Replies `true` on success and `PBC_ERR` with the bare reason on failure.
	pub fn send_result(self, result: Result<()>) -> Result<()> {
		let reply = match result {
			Ok(()) => Reply::ok(),
			Err(e) => Reply::error(e.reason()),
		};
		self.send(reply)
	}
}
