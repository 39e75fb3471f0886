//! Entangled message ports.
//!
//! A [`MessageChannel`] is a pair of ports: whatever is posted on one comes
//! out of the other, in order. Messages carry a JSON value plus a transfer
//! list of further ports, which move to the receiver. A moved port can no
//! longer be used by the sender, which the type system enforces for free.
//!
//! A port is consumed either by pulling with [`MessagePort::recv`] or by
//! installing a handler with [`MessagePort::set_onmessage`]. Once a handler
//! is installed the port is pinned to its context and refuses to be
//! transferred.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

type Handler = Box<dyn FnMut(PortMessage) + Send>;

/// A message received on a port.
#[derive(Debug)]
pub struct PortMessage {
	pub data: Value,
	/// Ports transferred along with the data.
	pub ports: Vec<MessagePort>,
}

impl PortMessage {
	/// A message without transferred ports.
	pub fn new(data: Value) -> Self {
		Self {
			data,
			ports: Vec::new(),
		}
	}

	/// Takes the first transferred port, if any.
	pub fn take_port(&mut self) -> Option<MessagePort> {
		if self.ports.is_empty() {
			None
		} else {
			Some(self.ports.remove(0))
		}
	}
}

/// Anything messages can be posted to.
pub trait MessageTarget {
	/// Posts `data`, moving `ports` to the receiver.
	fn post_message(&self, data: Value, ports: Vec<MessagePort>) -> Result<()>;

	/// Posts `data` without a transfer list.
	fn post(&self, data: Value) -> Result<()> {
		self.post_message(data, Vec::new())
	}
}

/// Two entangled ports.
#[derive(Debug)]
pub struct MessageChannel {
	pub port1: MessagePort,
	pub port2: MessagePort,
}

impl MessageChannel {
	pub fn new() -> Self {
		let (tx1, rx1) = mpsc::unbounded_channel();
		let (tx2, rx2) = mpsc::unbounded_channel();
		Self {
			port1: MessagePort::new(tx2, rx1),
			port2: MessagePort::new(tx1, rx2),
		}
	}
}

impl Default for MessageChannel {
	fn default() -> Self {
		Self::new()
	}
}

/// One end of a [`MessageChannel`].
pub struct MessagePort {
	peer: mpsc::UnboundedSender<PortMessage>,
	inbox: Option<mpsc::UnboundedReceiver<PortMessage>>,
	handler: Arc<Mutex<Option<Handler>>>,
	pump: Option<JoinHandle<()>>,
}

impl MessagePort {
	fn new(
		peer: mpsc::UnboundedSender<PortMessage>,
		inbox: mpsc::UnboundedReceiver<PortMessage>,
	) -> Self {
		Self {
			peer,
			inbox: Some(inbox),
			handler: Arc::new(Mutex::new(None)),
			pump: None,
		}
	}

	/// Receives the next message.
	///
	/// Returns `None` once the peer and every [`PortSender`] cloned from it
	/// are gone, or when a handler owns this port's inbox.
	pub async fn recv(&mut self) -> Option<PortMessage> {
		match self.inbox.as_mut() {
			Some(inbox) => inbox.recv().await,
			None => None,
		}
	}

	/// Installs the message handler. The last handler installed wins.
	///
	/// Messages that arrived before the first handler are delivered to it in
	/// order. Must be called from within a Tokio runtime.
	pub fn set_onmessage<F>(&mut self, handler: F)
	where
		F: FnMut(PortMessage) + Send + 'static,
	{
		*self.handler.lock() = Some(Box::new(handler));

		if let Some(mut inbox) = self.inbox.take() {
			let handler = Arc::clone(&self.handler);
			self.pump = Some(tokio::spawn(async move {
				while let Some(msg) = inbox.recv().await {
					if let Some(handler) = handler.lock().as_mut() {
						handler(msg);
					}
				}
			}));
		}
	}

	/// Whether a handler owns this port.
	pub fn has_handler(&self) -> bool {
		self.inbox.is_none()
	}

	/// Whether the peer port has gone away.
	pub fn is_closed(&self) -> bool {
		self.peer.is_closed()
	}

	/// A cheap, clonable handle that posts to this port's peer.
	pub fn sender(&self) -> PortSender {
		PortSender {
			peer: self.peer.clone(),
		}
	}
}

impl MessageTarget for MessagePort {
	fn post_message(&self, data: Value, ports: Vec<MessagePort>) -> Result<()> {
		send(&self.peer, data, ports)
	}
}

impl fmt::Debug for MessagePort {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MessagePort")
			.field("has_handler", &self.has_handler())
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl Drop for MessagePort {
	fn drop(&mut self) {
		if let Some(pump) = self.pump.take() {
			pump.abort();
		}
	}
}

/// Posting-only handle to a port's peer.
#[derive(Debug, Clone)]
pub struct PortSender {
	peer: mpsc::UnboundedSender<PortMessage>,
}

impl PortSender {
	/// Whether the receiving port has gone away.
	pub fn is_closed(&self) -> bool {
		self.peer.is_closed()
	}
}

impl MessageTarget for PortSender {
	fn post_message(&self, data: Value, ports: Vec<MessagePort>) -> Result<()> {
		send(&self.peer, data, ports)
	}
}

fn send(
	peer: &mpsc::UnboundedSender<PortMessage>,
	data: Value,
	ports: Vec<MessagePort>,
) -> Result<()> {
	if ports.iter().any(MessagePort::has_handler) {
		return Err(Error::NotTransferable);
	}
	peer.send(PortMessage { data, ports })
		.map_err(|_| Error::ChannelClosed)
}
