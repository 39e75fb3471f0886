// Shared helpers for the client integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pbc::WorkerOptions;
use pbc_runtime::testing::{StubBehavior, StubLoader};
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(2);

/// Installs a test subscriber once. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_test_writer()
		.compact()
		.try_init();
}

/// Options with a short load timeout.
pub fn options() -> WorkerOptions {
	WorkerOptions::new()
		.load_timeout(Duration::from_millis(50))
		.thread_name("pbc-worker-test")
}

pub fn stub(behavior: StubBehavior) -> Arc<StubLoader> {
	init_tracing();
	StubLoader::new(behavior)
}
