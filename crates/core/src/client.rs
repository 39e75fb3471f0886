// Copyright 2024 Paul Adamson
// Licensed under the Apache License, Version 2.0
//
// Client - host-side facade over a worker running the session module

use std::sync::Arc;

use parking_lot::Mutex;
use pbc_protocol::{Command, DataMessage, ModuleSource};
use pbc_runtime::{
	Error, Lifecycle, MessageChannel, MessageTarget, ModuleLoader, PortSender, Result, Worker,
	WorkerOptions, call, notify,
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::data::DataPort;

/// Drives a posbus session that runs inside a worker.
///
/// `load` and `connect` wait for the worker's answer; `disconnect` and
/// `teleport` only post the command. Session traffic goes over the
/// [`DataPort`] returned from [`connect`](Self::connect).
///
/// # Example
///
/// ```ignore
/// let client = Client::spawn(loader, WorkerOptions::default())?;
/// client.load(None).await?;
/// let data = client.connect(url, token, user_id).await?;
/// ```
#[derive(Debug)]
pub struct Client {
	worker: Worker,
	data: Mutex<Option<PortSender>>,
	lifecycle: watch::Receiver<Lifecycle>,
}

impl Client {
	/// Starts a worker context for `loader`'s modules.
	pub fn spawn(loader: Arc<dyn ModuleLoader>, options: WorkerOptions) -> Result<Self> {
		let worker = Worker::spawn(loader, options)?;
		let lifecycle = worker.lifecycle();
		Ok(Self {
			worker,
			data: Mutex::new(None),
			lifecycle,
		})
	}

	/// Loads the session module into the worker.
	///
	/// # Errors
	///
	/// Returns [`Error::Load`] if the module failed to start or did not
	/// expose its surface in time.
	pub async fn load(&self, source: Option<ModuleSource>) -> Result<()> {
		call(self.worker.control(), &Command::load(source))
			.await
			.map_err(|e| call_error(e, Error::Load))?;
		info!("session module loaded");
		Ok(())
	}

	/// Opens the session and returns the data channel.
	///
	/// A fresh data channel is handed to the worker before connecting. It
	/// replaces the one from an earlier connect only if this connect is
	/// admitted; a rejected attempt leaves the live channel in place.
	///
	/// # Errors
	///
	/// Returns [`Error::Connect`] with the module's reason if the connect
	/// attempt was rejected.
	pub async fn connect(
		&self,
		url: impl Into<String>,
		token: impl Into<String>,
		user_id: impl Into<String>,
	) -> Result<DataPort> {
		let MessageChannel {
			port1: local,
			port2: remote,
		} = MessageChannel::new();

		let control = self.worker.control();
		notify(control, &Command::SetDataPort, vec![remote]).map_err(worker_gone)?;
		call(control, &Command::connect(url, token, user_id))
			.await
			.map_err(|e| call_error(e, Error::Connect))?;

		*self.data.lock() = Some(local.sender());
		info!("session connected");
		Ok(DataPort::new(local))
	}

	/// Closes the session. Does not wait for the module.
	pub fn disconnect(&self) -> Result<()> {
		notify(self.worker.control(), &Command::Disconnect, Vec::new()).map_err(worker_gone)
	}

	/// Moves the session to another world. Does not wait for the module.
	pub fn teleport(&self, world_id: impl Into<String>) -> Result<()> {
		notify(self.worker.control(), &Command::teleport(world_id), Vec::new()).map_err(worker_gone)
	}

	/// Sends a data message on the current data channel.
	///
	/// # Errors
	///
	/// Returns [`Error::NotConnected`] before the first successful connect.
	pub fn send(&self, msg: &DataMessage) -> Result<()> {
		let data = self.data.lock();
		let sender = data.as_ref().ok_or(Error::NotConnected)?;
		debug!(msg_type = %msg.msg_type(), "send");
		sender.post(msg.to_value())
	}

	/// Current module lifecycle in the worker.
	pub fn lifecycle(&self) -> Lifecycle {
		self.lifecycle.borrow().clone()
	}

	/// Resolves when the session module terminates or the worker exits.
	///
	/// After [`Error::ModuleTerminated`] the session must be rebuilt with
	/// [`load`](Self::load) and [`connect`](Self::connect).
	pub async fn terminated(&self) -> Error {
		let mut lifecycle = self.lifecycle.clone();
		lifecycle
			.wait_for(|l| l.termination_reason().is_some())
			.await
			.map(|state| Error::ModuleTerminated {
				reason: state.termination_reason().unwrap_or_default().to_string(),
			})
			.unwrap_or(Error::WorkerExited)
	}

	/// Closes the control channel and waits for the worker to exit.
	pub async fn shutdown(self) -> Result<()> {
		self.worker.terminate().await
	}
}

/// The worker only drops the control channel or a reply port on its way out.
fn worker_gone(err: Error) -> Error {
	match err {
		Error::ChannelClosed => Error::WorkerExited,
		other => other,
	}
}

fn call_error(err: Error, reject: fn(String) -> Error) -> Error {
	match err {
		Error::Remote { message } => reject(message),
		other => worker_gone(other),
	}
}

/// Starts a worker and loads the session module into it.
pub async fn load_client_worker(
	loader: Arc<dyn ModuleLoader>,
	source: Option<ModuleSource>,
	options: WorkerOptions,
) -> Result<Client> {
	let client = Client::spawn(loader, options)?;
	client.load(source).await?;
	Ok(client)
}
