// Copyright 2024 Paul Adamson
// Licensed under the Apache License, Version 2.0
//
// LocalClient - session adapter driven in the caller's own runtime

use std::sync::Arc;

use pbc_protocol::{DataMessage, ModuleSource};
use pbc_runtime::{
	Error, Lifecycle, MessageChannel, ModuleLoader, Result, Session, SessionState, WorkerOptions,
};
use serde::Serialize;
use tokio::sync::watch;

use crate::data::DataPort;

type EventHandler = Arc<dyn Fn(DataMessage) + Send + Sync>;

/// Runs the session module in the current runtime, without a worker.
///
/// Same session semantics as [`Client`](crate::Client), minus the control
/// channel: calls go straight to the session adapter. Must be used from
/// within a Tokio runtime.
pub struct LocalClient {
	session: Session,
	handler: Option<EventHandler>,
}

impl LocalClient {
	pub fn new(loader: Arc<dyn ModuleLoader>, options: WorkerOptions) -> Self {
		Self {
			session: Session::new(loader, options),
			handler: None,
		}
	}

	/// Installs `handler` on the data channel of every later
	/// [`connect`](Self::connect).
	pub fn with_handler<F>(mut self, handler: F) -> Self
	where
		F: Fn(DataMessage) + Send + Sync + 'static,
	{
		self.handler = Some(Arc::new(handler));
		self
	}

	/// Loads and starts the session module.
	pub async fn load(&self, source: Option<ModuleSource>) -> Result<()> {
		self.session.load(source).await.map(drop)
	}

	/// Connects and returns the data channel. With a handler installed the
	/// returned port delivers to it instead of `recv`.
	pub async fn connect(
		&self,
		url: impl Into<String>,
		token: impl Into<String>,
		user_id: impl Into<String>,
	) -> Result<DataPort> {
		self.require_loaded()?;

		let MessageChannel {
			port1: local,
			port2: remote,
		} = MessageChannel::new();
		let mut data = DataPort::new(local);
		if let Some(handler) = &self.handler {
			let handler = Arc::clone(handler);
			data.on_message(move |msg| handler(msg));
		}

		self.session.set_data_port(remote);
		self.session.connect(url, token, user_id).await?;
		Ok(data)
	}

	pub fn disconnect(&self) -> Result<()> {
		self.require_loaded()?;
		self.session.disconnect();
		Ok(())
	}

	pub fn teleport(&self, world: impl Into<String>) -> Result<()> {
		self.require_loaded()?;
		self.session.teleport(world);
		Ok(())
	}

	/// Sends `payload`, stringified as JSON, to the module.
	pub async fn send<T: Serialize>(&self, msg_type: &str, payload: &T) -> Result<()> {
		let msg = DataMessage::from_payload(msg_type, payload)?;
		self.session.send(msg).await
	}

	pub fn state(&self) -> SessionState {
		self.session.state()
	}

	pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
		self.session.lifecycle()
	}

	fn require_loaded(&self) -> Result<()> {
		match self.session.module() {
			Some(_) => Ok(()),
			None => Err(Error::NotLoaded),
		}
	}
}

impl std::fmt::Debug for LocalClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LocalClient")
			.field("session", &self.session)
			.field("handler", &self.handler.is_some())
			.finish()
	}
}
