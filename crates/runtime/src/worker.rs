//! The worker execution context.
//!
//! A [`Worker`] is a dedicated OS thread running its own single-threaded
//! Tokio runtime. The thread owns a [`Session`] and serves the control
//! vocabulary on a port; the host keeps the other end. Dropping that end
//! shuts the worker down.

use std::sync::Arc;
use std::thread;

use pbc_protocol::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::call::Responder;
use crate::error::{Error, Result};
use crate::module::ModuleLoader;
use crate::options::WorkerOptions;
use crate::port::{MessageChannel, MessagePort, PortMessage};
use crate::session::{Lifecycle, Session};

/// Handle to a running worker.
#[derive(Debug)]
pub struct Worker {
	control: MessagePort,
	lifecycle: watch::Receiver<Lifecycle>,
	thread: thread::JoinHandle<()>,
}

impl Worker {
	/// Starts the worker thread.
	///
	/// The session is created here and moved into the thread, so the
	/// returned lifecycle receiver is live before any command is sent.
	pub fn spawn(loader: Arc<dyn ModuleLoader>, options: WorkerOptions) -> Result<Self> {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()?;

		let session = Session::new(loader, options.clone());
		let lifecycle = session.lifecycle();
		let MessageChannel {
			port1: control,
			port2: remote,
		} = MessageChannel::new();

		let thread = thread::Builder::new()
			.name(options.thread_name.clone())
			.spawn(move || {
				runtime.block_on(serve(session, remote));
				debug!("worker runtime shutting down");
			})?;

		info!(thread = %options.thread_name, "worker started");
		Ok(Self {
			control,
			lifecycle,
			thread,
		})
	}

	/// The host end of the control channel.
	pub fn control(&self) -> &MessagePort {
		&self.control
	}

	/// Lifecycle of the session inside the worker. The channel closes when
	/// the worker thread exits.
	pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
		self.lifecycle.clone()
	}

	/// Closes the control channel and waits for the thread to exit.
	pub async fn terminate(self) -> Result<()> {
		let Worker {
			control, thread, ..
		} = self;
		drop(control);

		let joined = tokio::task::spawn_blocking(move || thread.join())
			.await
			.map_err(|e| Error::Io(std::io::Error::other(e)))?;
		if joined.is_err() {
			error!("worker thread panicked");
			return Err(Error::WorkerExited);
		}
		info!("worker terminated");
		Ok(())
	}
}

/// Serves control commands for `session` until the control channel closes.
pub async fn serve(session: Session, mut control: MessagePort) {
	while let Some(msg) = control.recv().await {
		dispatch(&session, msg).await;
	}
	debug!("control channel closed");
	session.close().await;
}

async fn dispatch(session: &Session, msg: PortMessage) {
	let PortMessage { data, ports } = msg;
	let tag = Command::tag_of(&data).map(str::to_owned);

	let command = match Command::from_value(data) {
		Ok(command) => command,
		Err(e) => {
			let err = Error::Protocol(format!(
				"unrecognized control message {}: {e}",
				tag.as_deref().unwrap_or("<untagged>")
			));
			warn!(error = %err, "dropping control message");
			return;
		}
	};

	let kind = command.kind();
	debug!(command = %kind, "control message");
	let port = ports.into_iter().next();

	match command {
		Command::Load { source } => {
			let result = session.load(source).await.map(drop);
			reply(Responder::new(port), result);
		}
		Command::Connect {
			url,
			token,
			user_id,
		} => {
			let responder = Responder::new(port);
			match session.begin_connect(url, token, user_id) {
				Ok(pending) => {
					tokio::spawn(async move {
						reply(responder, pending.finish().await);
					});
				}
				Err(e) => reply(responder, Err(e)),
			}
		}
		Command::Disconnect => session.disconnect(),
		Command::Teleport { world } => session.teleport(world),
		Command::SetDataPort => match port {
			Some(port) => session.set_data_port(port),
			None => warn!(command = %kind, "no port in transfer list, ignoring"),
		},
		Command::Error { err } => debug!(%err, "ignoring error report"),
	}
}

fn reply(responder: Responder, result: Result<()>) {
	if !responder.is_expected() {
		warn!("command expects a reply but carried no reply port");
	}
	if let Err(e) = &result {
		debug!(error = %e, "replying with error");
	}
	if let Err(e) = responder.send_result(result) {
		debug!(error = %e, "caller went away before the reply");
	}
}
