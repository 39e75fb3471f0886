//! Inbound event relay from the session module to the data port.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use pbc_protocol::DataMessage;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::port::{MessageTarget, PortSender};

/// Where module events go.
#[derive(Debug)]
pub(crate) struct Relay {
	sender: Option<PortSender>,
	backlog: VecDeque<Value>,
	capacity: usize,
	accepting: bool,
}

impl Relay {
	pub(crate) fn new(capacity: usize) -> Self {
		Self {
			sender: None,
			backlog: VecDeque::new(),
			capacity,
			accepting: true,
		}
	}

	fn push(&mut self, frame: Value) {
		if !self.accepting {
			debug!("session disconnected, dropping event");
			return;
		}

		if let Some(sender) = &self.sender {
			if let Err(e) = sender.post(frame) {
				debug!(error = %e, "data port closed, dropping event");
			}
			return;
		}

		if self.capacity == 0 {
			debug!("no data port and no buffer, dropping event");
			return;
		}
		if self.backlog.len() >= self.capacity {
			self.backlog.pop_front();
			warn!(capacity = self.capacity, "event buffer full, dropped oldest event");
		}
		self.backlog.push_back(frame);
	}

	/// Installs the data port and flushes buffered events into it, oldest
	/// first. Replaces any previous port.
	pub(crate) fn install(&mut self, sender: PortSender) {
		let flushed = self.backlog.len();
		for frame in self.backlog.drain(..) {
			if let Err(e) = sender.post(frame) {
				debug!(error = %e, "data port closed while flushing");
				break;
			}
		}
		if flushed > 0 {
			debug!(flushed, "flushed buffered events");
		}
		self.sender = Some(sender);
	}

	/// Drops the data port and any buffered events.
	pub(crate) fn clear(&mut self) {
		self.sender = None;
		self.backlog.clear();
	}

	pub(crate) fn set_accepting(&mut self, accepting: bool) {
		self.accepting = accepting;
	}

	#[cfg(test)]
	pub(crate) fn buffered(&self) -> usize {
		self.backlog.len()
	}
}

/// Handed to the module for its unsolicited inbound events.
///
/// Events are forwarded unmodified as `[type, payload]` frames. While no
/// data port is installed they are buffered, up to the configured bound.
#[derive(Debug, Clone)]
pub struct EventSink {
	relay: Arc<Mutex<Relay>>,
}

impl EventSink {
	pub(crate) fn new(relay: Arc<Mutex<Relay>>) -> Self {
		Self { relay }
	}

	/// Emits an event.
	pub fn emit(&self, msg_type: &str, payload: Value) {
		self.emit_message(DataMessage::new(msg_type, payload));
	}

	/// Emits an already built data message.
	pub fn emit_message(&self, msg: DataMessage) {
		trace!(msg_type = %msg.msg_type(), "module event");
		self.relay.lock().push(msg.to_value());
	}
}
