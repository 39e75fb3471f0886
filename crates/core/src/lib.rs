//! pbc: host-side client for a posbus session running in a worker context.
//!
//! The networking session lives in an opaque module loaded into a worker
//! thread. [`Client`] drives it over a control channel (load, connect,
//! disconnect, teleport) and exchanges session traffic over a separate data
//! channel, returned from [`Client::connect`] as a [`DataPort`].
//!
//! # Example
//!
//! ```ignore
//! use pbc::{Client, DataMessage, ModuleSource, WorkerOptions};
//! use serde_json::json;
//!
//! # async fn run(loader: std::sync::Arc<dyn pbc::ModuleLoader>) -> pbc::Result<()> {
//! let client = Client::spawn(loader, WorkerOptions::from_env())?;
//! client.load(Some(ModuleSource::url("https://cdn.example/pbc.wasm"))).await?;
//!
//! let mut data = client.connect("wss://host/posbus", "token", "user-1").await?;
//! client.teleport("world-A")?;
//! client.send(&DataMessage::new("my-transform", json!({"x": 1.0})))?;
//!
//! while let Some(msg) = data.recv().await {
//!     println!("{}: {}", msg.msg_type(), msg.payload());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`LocalClient`] runs the same session adapter directly in the caller's
//! runtime, without a worker or control channel.

pub mod client;
pub mod data;
pub mod local;

pub use client::{Client, load_client_worker};
pub use data::DataPort;
pub use local::LocalClient;
pub use pbc_protocol::{Command, CommandKind, DataMessage, ModuleSource, Reply};
pub use pbc_runtime::{
	Error, EventSink, Exports, Lifecycle, ModuleContext, ModuleExit, ModuleLoader, ModuleRun,
	Result, SessionModule, SessionState, WorkerOptions,
};
