//! Worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound for `PBC_LOAD` to start the module and see its surface.
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 10_000;

/// Default number of module events buffered before a data port is installed.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Default name of the worker thread.
pub const DEFAULT_THREAD_NAME: &str = "pbc-worker";

/// Environment variable overriding [`WorkerOptions::load_timeout_ms`].
pub const ENV_LOAD_TIMEOUT_MS: &str = "PBC_LOAD_TIMEOUT_MS";

/// Environment variable overriding [`WorkerOptions::event_buffer`].
pub const ENV_EVENT_BUFFER: &str = "PBC_EVENT_BUFFER";

/// Options for a worker and the session it hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerOptions {
	/// How long `PBC_LOAD` waits for the module to start and expose its surface.
	pub load_timeout_ms: u64,

	/// Module events kept while no data port is installed. The oldest event
	/// is dropped when the buffer is full.
	pub event_buffer: usize,

	/// Name of the worker thread.
	pub thread_name: String,
}

impl Default for WorkerOptions {
	fn default() -> Self {
		Self {
			load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
			event_buffer: DEFAULT_EVENT_BUFFER,
			thread_name: DEFAULT_THREAD_NAME.to_string(),
		}
	}
}

impl WorkerOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Default options overlaid with `PBC_LOAD_TIMEOUT_MS` / `PBC_EVENT_BUFFER`.
	pub fn from_env() -> Self {
		Self::default().with_env_from(|key| std::env::var(key).ok())
	}

	/// Overlays values from an environment lookup. Unparsable values are
	/// ignored with a warning.
	pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
		if let Some(raw) = lookup(ENV_LOAD_TIMEOUT_MS) {
			match raw.trim().parse() {
				Ok(ms) => self.load_timeout_ms = ms,
				Err(e) => tracing::warn!(var = ENV_LOAD_TIMEOUT_MS, %raw, error = %e, "ignoring invalid value"),
			}
		}
		if let Some(raw) = lookup(ENV_EVENT_BUFFER) {
			match raw.trim().parse() {
				Ok(n) => self.event_buffer = n,
				Err(e) => tracing::warn!(var = ENV_EVENT_BUFFER, %raw, error = %e, "ignoring invalid value"),
			}
		}
		self
	}

	/// Sets the load timeout.
	pub fn load_timeout(mut self, timeout: Duration) -> Self {
		self.load_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
		self
	}

	/// Sets the pre-port event buffer bound.
	pub fn event_buffer(mut self, capacity: usize) -> Self {
		self.event_buffer = capacity;
		self
	}

	/// Sets the worker thread name.
	pub fn thread_name(mut self, name: impl Into<String>) -> Self {
		self.thread_name = name.into();
		self
	}

	/// Load timeout as a [`Duration`].
	pub fn load_timeout_duration(&self) -> Duration {
		Duration::from_millis(self.load_timeout_ms)
	}
}
