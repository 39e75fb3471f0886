//! Session module adapter.
//!
//! [`Session`] owns the loaded module instance and drives it through
//!
//! ```text
//! UNLOADED ─LOAD─▶ LOADED ─CONNECT─▶ CONNECTING ─ok─▶ CONNECTED
//!                                        │               │
//!                                        └─err─▶ ERRORED │
//!                          DISCONNECTED ◀──DISCONNECT────┘
//! ```
//!
//! The module's inbound events flow through a relay onto the data port, and
//! messages arriving on the data port are handed to the module's `send`.
//! When the module's run loop exits the session resets to UNLOADED and
//! publishes [`Lifecycle::Terminated`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pbc_protocol::{DataMessage, ModuleSource};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::module::{
	Exports, ModuleContext, ModuleExit, ModuleHandle, ModuleLoader, ModuleRun, SessionModule,
};
use crate::options::WorkerOptions;
use crate::port::MessagePort;
use crate::relay::{EventSink, Relay};

#[cfg(test)]
mod tests;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
	Unloaded,
	Loaded,
	Connecting,
	Connected,
	Disconnected,
	Errored,
}

/// Module lifecycle as seen by whoever owns the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
	/// No module has been loaded yet.
	Unloaded,
	/// A module is loaded and running.
	Running { generation: u64 },
	/// The module's run loop exited. A new LOAD is needed.
	Terminated { reason: String },
}

impl Lifecycle {
	pub fn termination_reason(&self) -> Option<&str> {
		match self {
			Lifecycle::Terminated { reason } => Some(reason),
			_ => None,
		}
	}
}

#[derive(Debug)]
struct Core {
	state: SessionState,
	module: Option<ModuleHandle>,
	generation: u64,
	loading: bool,
	data_task: Option<JoinHandle<()>>,
	staged_port: Option<MessagePort>,
	exit_task: Option<JoinHandle<()>>,
}

struct SessionInner {
	loader: Arc<dyn ModuleLoader>,
	options: WorkerOptions,
	core: Mutex<Core>,
	relay: Arc<Mutex<Relay>>,
	lifecycle: watch::Sender<Lifecycle>,
}

impl Drop for SessionInner {
	fn drop(&mut self) {
		let core = self.core.get_mut();
		for task in [core.data_task.take(), core.exit_task.take()].into_iter().flatten() {
			task.abort();
		}
	}
}

/// The adapter between the control protocol and the session module.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session")
			.field("state", &self.state())
			.finish()
	}
}

/// Resets the loading flag even if the load future is dropped.
struct LoadGuard<'a>(&'a Mutex<Core>);

impl Drop for LoadGuard<'_> {
	fn drop(&mut self) {
		self.0.lock().loading = false;
	}
}

impl Session {
	/// Creates an unloaded session. Does not need a runtime.
	pub fn new(loader: Arc<dyn ModuleLoader>, options: WorkerOptions) -> Self {
		let relay = Arc::new(Mutex::new(Relay::new(options.event_buffer)));
		let (lifecycle, _) = watch::channel(Lifecycle::Unloaded);
		Self {
			inner: Arc::new(SessionInner {
				loader,
				options,
				core: Mutex::new(Core {
					state: SessionState::Unloaded,
					module: None,
					generation: 0,
					loading: false,
					data_task: None,
					staged_port: None,
					exit_task: None,
				}),
				relay,
				lifecycle,
			}),
		}
	}

	fn from_weak(weak: &Weak<SessionInner>) -> Option<Self> {
		weak.upgrade().map(|inner| Self { inner })
	}

	pub fn state(&self) -> SessionState {
		self.inner.core.lock().state
	}

	pub fn options(&self) -> &WorkerOptions {
		&self.inner.options
	}

	/// Handle to the loaded module, if any.
	pub fn module(&self) -> Option<ModuleHandle> {
		self.inner.core.lock().module.clone()
	}

	/// Subscribes to lifecycle changes. The channel closes when the session
	/// is dropped.
	pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
		self.inner.lifecycle.subscribe()
	}

	/// Loads and starts the session module.
	///
	/// Succeeds once the module publishes its surface. Fails with
	/// [`Error::Load`] if the loader fails, the run loop exits first, or
	/// starting the module and seeing its surface takes longer than the load
	/// timeout.
	pub async fn load(&self, source: Option<ModuleSource>) -> Result<ModuleHandle> {
		let generation = {
			let mut core = self.inner.core.lock();
			if core.loading || core.state != SessionState::Unloaded {
				return Err(Error::Load("module already loaded".to_string()));
			}
			core.loading = true;
			core.generation + 1
		};
		let _guard = LoadGuard(&self.inner.core);

		let (module, run) = self.start_module(source, generation).await?;
		let handle = ModuleHandle::new(Arc::clone(&module), generation);

		module.set_port(EventSink::new(Arc::clone(&self.inner.relay)));

		{
			let mut core = self.inner.core.lock();
			core.generation = generation;
			core.module = Some(handle.clone());
			core.state = SessionState::Loaded;
		}
		self.inner.relay.lock().set_accepting(true);
		self.inner
			.lifecycle
			.send_replace(Lifecycle::Running { generation });

		let weak = Arc::downgrade(&self.inner);
		let exit_task = tokio::spawn(async move {
			let exit = run.await;
			if let Some(session) = Session::from_weak(&weak) {
				session.module_exited(generation, exit);
			}
		});
		if let Some(stale) = self.inner.core.lock().exit_task.replace(exit_task) {
			stale.abort();
		}
		info!(generation, "session module loaded");

		Ok(handle)
	}

	async fn start_module(
		&self,
		source: Option<ModuleSource>,
		generation: u64,
	) -> Result<(Arc<dyn SessionModule>, ModuleRun)> {
		let exports = Exports::new();
		let ctx = ModuleContext::new(exports.clone(), generation);
		debug!(
			source = ?source.as_ref().map(ModuleSource::describe),
			generation,
			"starting session module"
		);

		// One deadline covers both the loader and the surface wait.
		let timeout = self.inner.options.load_timeout_duration();
		let deadline = Instant::now() + timeout;
		let mut run = tokio::time::timeout_at(deadline, self.inner.loader.start(source, ctx))
			.await
			.map_err(|_| Error::Load(format!("module did not start within {timeout:?}")))?
			.map_err(Error::Load)?;

		let remaining = deadline.saturating_duration_since(Instant::now());
		let module = tokio::select! {
			module = exports.wait(remaining) => module.ok_or_else(|| {
				Error::Load(format!("module surface not exposed within {timeout:?}"))
			})?,
			exit = &mut run => {
				return Err(Error::Load(format!("module exited before exposing its surface: {exit}")));
			}
		};
		Ok((module, run))
	}

	/// Starts a connect attempt.
	///
	/// The state check and the move to CONNECTING happen synchronously, so a
	/// second attempt issued before this one completes is rejected. A data
	/// port staged for this attempt is installed on admission and dropped on
	/// rejection, leaving the current port in place.
	pub fn begin_connect(
		&self,
		url: impl Into<String>,
		token: impl Into<String>,
		user_id: impl Into<String>,
	) -> Result<PendingConnect> {
		let (admitted, staged) = {
			let mut core = self.inner.core.lock();
			let staged = core.staged_port.take();
			let admitted = match (&core.module, core.state) {
				(None, _) => Err("module not loaded"),
				(_, SessionState::Connecting) => Err("connect already in progress"),
				(_, SessionState::Connected) => Err("already connected"),
				(Some(handle), _) => Ok(handle.clone()),
			};
			if admitted.is_ok() {
				core.state = SessionState::Connecting;
			}
			(admitted, staged)
		};
		let handle = match admitted {
			Ok(handle) => handle,
			Err(reason) => {
				if staged.is_some() {
					debug!(%reason, "dropping data port of rejected connect");
				}
				return Err(Error::Connect(reason.to_string()));
			}
		};
		if let Some(port) = staged {
			self.install_data_port(port);
		}
		self.inner.relay.lock().set_accepting(true);
		debug!(generation = handle.generation(), "connecting");

		Ok(PendingConnect {
			session: self.clone(),
			handle,
			url: url.into(),
			token: token.into(),
			user_id: user_id.into(),
		})
	}

	/// Connects and waits for the module's answer.
	pub async fn connect(
		&self,
		url: impl Into<String>,
		token: impl Into<String>,
		user_id: impl Into<String>,
	) -> Result<()> {
		self.begin_connect(url, token, user_id)?.finish().await
	}

	fn finish_connect(&self, generation: u64, result: std::result::Result<(), String>) -> Result<()> {
		let mut core = self.inner.core.lock();
		if core.module.as_ref().map(ModuleHandle::generation) != Some(generation) {
			return Err(Error::Connect("module terminated while connecting".to_string()));
		}
		match (core.state, result) {
			(SessionState::Connecting, Ok(())) => {
				core.state = SessionState::Connected;
				info!(generation, "session connected");
				Ok(())
			}
			(SessionState::Connecting, Err(reason)) => {
				core.state = SessionState::Errored;
				warn!(generation, %reason, "connect rejected by module");
				Err(Error::Connect(reason))
			}
			(state, _) => {
				debug!(?state, "connect finished after disconnect");
				Err(Error::Connect("disconnected while connecting".to_string()))
			}
		}
	}

	/// Installs the data port. A later port replaces the former one.
	///
	/// Buffered module events are flushed into the new port, and messages
	/// arriving on it are forwarded to the module. While a connect is in
	/// flight or established the port is staged instead, and the next
	/// CONNECT decides whether it replaces the live one.
	pub fn set_data_port(&self, port: MessagePort) {
		let port = {
			let mut core = self.inner.core.lock();
			match core.state {
				SessionState::Connecting | SessionState::Connected => {
					debug!(state = ?core.state, "staging data port for the next connect");
					core.staged_port = Some(port);
					return;
				}
				_ => {
					core.staged_port = None;
					port
				}
			}
		};
		self.install_data_port(port);
	}

	fn install_data_port(&self, mut port: MessagePort) {
		let sender = port.sender();
		let weak = Arc::downgrade(&self.inner);
		let task = tokio::spawn(async move {
			while let Some(msg) = port.recv().await {
				let Some(session) = Session::from_weak(&weak) else {
					break;
				};
				session.forward(msg.data).await;
			}
			debug!("data port closed");
		});

		let old = self.inner.core.lock().data_task.replace(task);
		if let Some(old) = old {
			debug!("replacing data port");
			old.abort();
		}
		self.inner.relay.lock().install(sender);
	}

	async fn forward(&self, data: Value) {
		let msg = match DataMessage::from_value(data) {
			Ok(msg) => msg,
			Err(e) => {
				warn!(error = %e, "dropping malformed data message");
				return;
			}
		};
		if let Err(e) = self.send(msg).await {
			debug!(error = %e, "data message not delivered to module");
		}
	}

	/// Hands an outbound data message to the module, payload as JSON text.
	pub async fn send(&self, msg: DataMessage) -> Result<()> {
		let handle = self.module().ok_or(Error::NotLoaded)?;
		let data = msg.payload_text()?;
		handle.module().send(msg.msg_type(), &data).await;
		Ok(())
	}

	/// Closes the session. Inbound events are dropped from now on.
	pub fn disconnect(&self) {
		let handle = {
			let mut core = self.inner.core.lock();
			let Some(handle) = core.module.clone() else {
				warn!("disconnect while unloaded, ignoring");
				return;
			};
			match core.state {
				SessionState::Connected | SessionState::Connecting | SessionState::Errored => {
					core.state = SessionState::Disconnected;
					self.inner.relay.lock().set_accepting(false);
					info!(generation = handle.generation(), "session disconnected");
				}
				state => debug!(?state, "disconnect without state change"),
			}
			handle
		};

		tokio::spawn(async move {
			handle.module().disconnect().await;
			debug!("module disconnect returned");
		});
	}

	/// Moves the session to another world. Failures are not reported here.
	pub fn teleport(&self, world: impl Into<String>) {
		let Some(handle) = self.module() else {
			warn!("teleport while unloaded, ignoring");
			return;
		};
		let world = world.into();
		tokio::spawn(async move {
			handle.module().teleport(&world).await;
			debug!(%world, "module teleport returned");
		});
	}

	/// Lets the module release its resources.
	pub async fn close(&self) {
		if let Some(handle) = self.module() {
			handle.module().close().await;
			debug!(generation = handle.generation(), "module closed");
		}
	}

	fn module_exited(&self, generation: u64, exit: ModuleExit) {
		let data_task = {
			let mut core = self.inner.core.lock();
			if core.module.as_ref().map(ModuleHandle::generation) != Some(generation) {
				return;
			}
			core.module = None;
			core.state = SessionState::Unloaded;
			core.exit_task = None;
			core.staged_port = None;
			core.data_task.take()
		};
		if let Some(task) = data_task {
			task.abort();
		}
		{
			let mut relay = self.inner.relay.lock();
			relay.clear();
			relay.set_accepting(true);
		}

		warn!(generation, reason = %exit, "session module terminated");
		self.inner.lifecycle.send_replace(Lifecycle::Terminated {
			reason: exit.reason(),
		});
	}
}

/// A connect attempt whose state check already passed.
#[derive(Debug)]
pub struct PendingConnect {
	session: Session,
	handle: ModuleHandle,
	url: String,
	token: String,
	user_id: String,
}

impl PendingConnect {
	/// Runs the module's connect and settles the session state.
	pub async fn finish(self) -> Result<()> {
		let result = self
			.handle
			.module()
			.connect(&self.url, &self.token, &self.user_id)
			.await;
		self.session.finish_connect(self.handle.generation(), result)
	}
}
