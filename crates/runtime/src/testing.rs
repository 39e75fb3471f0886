//! Stub session modules for tests.
//!
//! [`StubLoader`] hands out [`StubModule`]s that record every call made on
//! their surface, can emit inbound events, echo outbound data back, and be
//! told to terminate their run loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pbc_protocol::ModuleSource;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::module::{ModuleContext, ModuleExit, ModuleLoader, ModuleRun, SessionModule};
use crate::relay::EventSink;

/// A call recorded by a [`StubModule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Connect {
		url: String,
		token: String,
		user_id: String,
	},
	Disconnect,
	Teleport(String),
	Send {
		msg_type: String,
		data: String,
	},
	Close,
}

/// How stub modules behave.
#[derive(Debug, Clone)]
pub struct StubBehavior {
	/// Delay before the surface is published; `None` never publishes.
	pub publish_delay: Option<Duration>,
	/// Fail in the loader itself with this reason.
	pub fail_start: Option<String>,
	/// Never return from the loader.
	pub hang_start: bool,
	/// Exit the run loop right away, before publishing.
	pub exit_immediately: bool,
	/// Result of every `connect`.
	pub connect_result: Result<(), String>,
	/// How long `connect` takes.
	pub connect_delay: Duration,
	/// Emit every outbound message back as an inbound event.
	pub echo: bool,
	/// Events emitted as soon as the sink is installed.
	pub startup_events: Vec<(String, Value)>,
}

impl Default for StubBehavior {
	fn default() -> Self {
		Self {
			publish_delay: Some(Duration::from_millis(10)),
			fail_start: None,
			hang_start: false,
			exit_immediately: false,
			connect_result: Ok(()),
			connect_delay: Duration::ZERO,
			echo: false,
			startup_events: Vec::new(),
		}
	}
}

impl StubBehavior {
	pub fn never_publish(mut self) -> Self {
		self.publish_delay = None;
		self
	}

	pub fn hang_start(mut self) -> Self {
		self.hang_start = true;
		self
	}

	pub fn reject_connect(mut self, reason: impl Into<String>) -> Self {
		self.connect_result = Err(reason.into());
		self
	}

	pub fn connect_delay(mut self, delay: Duration) -> Self {
		self.connect_delay = delay;
		self
	}

	pub fn echo(mut self) -> Self {
		self.echo = true;
		self
	}

	pub fn startup_event(mut self, msg_type: impl Into<String>, payload: Value) -> Self {
		self.startup_events.push((msg_type.into(), payload));
		self
	}
}

/// A recording [`SessionModule`].
pub struct StubModule {
	behavior: StubBehavior,
	generation: u64,
	calls: Mutex<Vec<Call>>,
	sink: Mutex<Option<EventSink>>,
	exit: Mutex<Option<oneshot::Sender<ModuleExit>>>,
}

impl StubModule {
	fn new(behavior: StubBehavior, generation: u64, exit: oneshot::Sender<ModuleExit>) -> Self {
		Self {
			behavior,
			generation,
			calls: Mutex::new(Vec::new()),
			sink: Mutex::new(None),
			exit: Mutex::new(Some(exit)),
		}
	}

	fn record(&self, call: Call) {
		self.calls.lock().push(call);
	}

	/// Generation the adapter started this instance with.
	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Calls recorded so far.
	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().clone()
	}

	/// Number of recorded calls matching `pred`.
	pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
		self.calls.lock().iter().filter(|c| pred(c)).count()
	}

	/// Waits until a recorded call matches `pred`.
	pub async fn wait_for(&self, pred: impl Fn(&Call) -> bool, timeout: Duration) -> bool {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			if self.count(&pred) > 0 {
				return true;
			}
			if tokio::time::Instant::now() >= deadline {
				return false;
			}
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	}

	/// Whether the adapter installed the event sink.
	pub fn has_sink(&self) -> bool {
		self.sink.lock().is_some()
	}

	/// Emits an inbound event. Returns false if no sink is installed yet.
	pub fn emit(&self, msg_type: &str, payload: Value) -> bool {
		match self.sink.lock().as_ref() {
			Some(sink) => {
				sink.emit(msg_type, payload);
				true
			}
			None => false,
		}
	}

	/// Ends the run loop.
	pub fn terminate(&self, exit: ModuleExit) {
		if let Some(tx) = self.exit.lock().take() {
			let _ = tx.send(exit);
		}
	}
}

#[async_trait]
impl SessionModule for StubModule {
	async fn connect(&self, url: &str, token: &str, user_id: &str) -> Result<(), String> {
		self.record(Call::Connect {
			url: url.to_string(),
			token: token.to_string(),
			user_id: user_id.to_string(),
		});
		if !self.behavior.connect_delay.is_zero() {
			tokio::time::sleep(self.behavior.connect_delay).await;
		}
		self.behavior.connect_result.clone()
	}

	async fn disconnect(&self) {
		self.record(Call::Disconnect);
	}

	fn set_port(&self, sink: EventSink) {
		for (msg_type, payload) in &self.behavior.startup_events {
			sink.emit(msg_type, payload.clone());
		}
		*self.sink.lock() = Some(sink);
	}

	async fn teleport(&self, world: &str) {
		self.record(Call::Teleport(world.to_string()));
	}

	async fn send(&self, msg_type: &str, data: &str) {
		self.record(Call::Send {
			msg_type: msg_type.to_string(),
			data: data.to_string(),
		});
		if self.behavior.echo {
			let payload = serde_json::from_str(data).unwrap_or(Value::String(data.to_string()));
			self.emit(msg_type, payload);
		}
	}

	async fn close(&self) {
		self.record(Call::Close);
	}
}

/// A [`ModuleLoader`] producing [`StubModule`]s.
#[derive(Default)]
pub struct StubLoader {
	behavior: StubBehavior,
	modules: Mutex<Vec<Arc<StubModule>>>,
	sources: Mutex<Vec<Option<ModuleSource>>>,
}

impl StubLoader {
	pub fn new(behavior: StubBehavior) -> Arc<Self> {
		Arc::new(Self {
			behavior,
			..Self::default()
		})
	}

	/// Every module started so far, oldest first.
	pub fn modules(&self) -> Vec<Arc<StubModule>> {
		self.modules.lock().clone()
	}

	/// The most recently started module.
	pub fn last(&self) -> Option<Arc<StubModule>> {
		self.modules.lock().last().cloned()
	}

	/// Sources passed to `start`, in order.
	pub fn sources(&self) -> Vec<Option<ModuleSource>> {
		self.sources.lock().clone()
	}
}

#[async_trait]
impl ModuleLoader for StubLoader {
	async fn start(&self, source: Option<ModuleSource>, ctx: ModuleContext) -> Result<ModuleRun, String> {
		self.sources.lock().push(source);
		if let Some(reason) = &self.behavior.fail_start {
			return Err(reason.clone());
		}
		if self.behavior.hang_start {
			std::future::pending::<()>().await;
		}
		if self.behavior.exit_immediately {
			return Ok(ModuleRun::new(async {
				ModuleExit::Failed("exited during startup".to_string())
			}));
		}

		let (tx, rx) = oneshot::channel();
		let module = Arc::new(StubModule::new(self.behavior.clone(), ctx.generation(), tx));
		self.modules.lock().push(Arc::clone(&module));

		if let Some(delay) = self.behavior.publish_delay {
			let exports = ctx.exports().clone();
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				exports.publish(module);
			});
		}

		Ok(ModuleRun::new(async move {
			rx.await.unwrap_or(ModuleExit::Finished)
		}))
	}
}
