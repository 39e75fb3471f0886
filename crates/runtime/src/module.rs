//! Capability interface of the opaque session module.
//!
//! The module is instantiated by a [`ModuleLoader`], which starts its run
//! loop and hands back a [`ModuleRun`] future resolving when that loop
//! exits. The module announces that it is ready by publishing its
//! [`SessionModule`] surface through [`Exports::publish`]. The session waits
//! for that publication, bounded by the load timeout, and keeps the result as
//! an explicit [`ModuleHandle`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use pbc_protocol::ModuleSource;
use tokio::sync::Notify;

use crate::relay::EventSink;

/// Operations exported by a running session module.
///
/// Only the session adapter calls these.
#[async_trait]
pub trait SessionModule: Send + Sync {
	/// Opens the session. The error string is forwarded verbatim to the
	/// caller of `connect`.
	async fn connect(&self, url: &str, token: &str, user_id: &str) -> Result<(), String>;

	async fn disconnect(&self);

	/// Installs the sink for unsolicited inbound events. Called once, right
	/// after the surface is published.
	fn set_port(&self, sink: EventSink);

	async fn teleport(&self, world: &str);

	/// Outbound data message; `data` is the payload as JSON text.
	async fn send(&self, msg_type: &str, data: &str);

	/// Called when the owning worker shuts down.
	async fn close(&self) {}
}

/// Instantiates session modules.
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
	/// Instantiates the module from `source` and starts its run loop.
	///
	/// Returning `Ok` does not mean the module is usable yet: it becomes
	/// usable once it publishes its surface through `ctx.exports()`.
	async fn start(&self, source: Option<ModuleSource>, ctx: ModuleContext) -> Result<ModuleRun, String>;
}

/// What a starting module gets from the adapter.
#[derive(Debug, Clone)]
pub struct ModuleContext {
	exports: Exports,
	generation: u64,
}

impl ModuleContext {
	pub(crate) fn new(exports: Exports, generation: u64) -> Self {
		Self { exports, generation }
	}

	/// Where the module publishes its surface.
	pub fn exports(&self) -> &Exports {
		&self.exports
	}

	/// Load counter of this instance, starting at 1.
	pub fn generation(&self) -> u64 {
		self.generation
	}
}

struct ExportsInner {
	module: Mutex<Option<Arc<dyn SessionModule>>>,
	published: Notify,
}

/// Slot the module publishes its surface into.
#[derive(Clone)]
pub struct Exports {
	inner: Arc<ExportsInner>,
}

impl Default for Exports {
	fn default() -> Self {
		Self::new()
	}
}

impl Exports {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(ExportsInner {
				module: Mutex::new(None),
				published: Notify::new(),
			}),
		}
	}

	/// Publishes the module surface and wakes the waiting adapter. A second
	/// publication replaces the first.
	pub fn publish(&self, module: Arc<dyn SessionModule>) {
		*self.inner.module.lock() = Some(module);
		self.inner.published.notify_waiters();
	}

	/// Returns the published surface, if any.
	pub fn get(&self) -> Option<Arc<dyn SessionModule>> {
		self.inner.module.lock().clone()
	}

	/// Waits for the surface to be published. Returns `None` on timeout.
	pub async fn wait(&self, timeout: Duration) -> Option<Arc<dyn SessionModule>> {
		let deadline = tokio::time::Instant::now() + timeout;

		loop {
			// Register before checking so a publish in between is not lost.
			let notified = self.inner.published.notified();

			if let Some(module) = self.get() {
				return Some(module);
			}

			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			if remaining.is_zero() {
				return None;
			}

			tokio::select! {
				biased;
				_ = notified => {}
				_ = tokio::time::sleep(remaining) => return self.get(),
			}
		}
	}
}

impl fmt::Debug for Exports {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Exports")
			.field("published", &self.inner.module.lock().is_some())
			.finish()
	}
}

/// Why a module's run loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleExit {
	Finished,
	Failed(String),
}

impl ModuleExit {
	pub fn reason(&self) -> String {
		self.to_string()
	}
}

impl fmt::Display for ModuleExit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ModuleExit::Finished => f.write_str("run loop exited"),
			ModuleExit::Failed(reason) => write!(f, "run loop failed: {reason}"),
		}
	}
}

/// The module's run loop. Resolves when the loop exits.
pub struct ModuleRun(BoxFuture<'static, ModuleExit>);

impl ModuleRun {
	pub fn new<F>(run: F) -> Self
	where
		F: Future<Output = ModuleExit> + Send + 'static,
	{
		Self(run.boxed())
	}

	/// A run loop that never exits on its own.
	pub fn forever() -> Self {
		Self::new(std::future::pending())
	}
}

impl Future for ModuleRun {
	type Output = ModuleExit;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<ModuleExit> {
		self.0.as_mut().poll(cx)
	}
}

impl fmt::Debug for ModuleRun {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("ModuleRun")
	}
}

/// Owned handle to a loaded module instance.
#[derive(Clone)]
pub struct ModuleHandle {
	module: Arc<dyn SessionModule>,
	generation: u64,
}

impl ModuleHandle {
	pub(crate) fn new(module: Arc<dyn SessionModule>, generation: u64) -> Self {
		Self { module, generation }
	}

	pub fn module(&self) -> &Arc<dyn SessionModule> {
		&self.module
	}

	/// Which load produced this instance.
	pub fn generation(&self) -> u64 {
		self.generation
	}
}

impl fmt::Debug for ModuleHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModuleHandle")
			.field("generation", &self.generation)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Noop;

	#[async_trait]
	impl SessionModule for Noop {
		async fn connect(&self, _: &str, _: &str, _: &str) -> Result<(), String> {
			Ok(())
		}
		async fn disconnect(&self) {}
		fn set_port(&self, _: EventSink) {}
		async fn teleport(&self, _: &str) {}
		async fn send(&self, _: &str, _: &str) {}
	}

	#[tokio::test]
	async fn wait_sees_later_publish() {
		let exports = Exports::new();
		let publisher = exports.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			publisher.publish(Arc::new(Noop));
		});
		assert!(exports.wait(Duration::from_secs(1)).await.is_some());
	}

	#[tokio::test]
	async fn wait_times_out() {
		let exports = Exports::new();
		assert!(exports.wait(Duration::from_millis(20)).await.is_none());
	}

	#[tokio::test]
	async fn wait_returns_already_published() {
		let exports = Exports::new();
		exports.publish(Arc::new(Noop));
		assert!(exports.wait(Duration::ZERO).await.is_some());
	}

	#[tokio::test]
	async fn run_resolves_with_exit() {
		let run = ModuleRun::new(async { ModuleExit::Failed("panic".into()) });
		assert_eq!(run.await.reason(), "run loop failed: panic");
	}
}
