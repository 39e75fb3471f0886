//! Runtime for the posbus client worker bridge.
//!
//! This crate provides everything below the host-facing facade:
//!
//! - **Ports**: [`MessageChannel`] pairs of message-passing endpoints with
//!   endpoint transfer
//! - **Correlation**: [`call`] turns a fire-only post into an awaitable
//!   request/reply by giving each call its own disposable reply channel
//! - **Session adapter**: [`Session`] owns the loaded session module, runs the
//!   `UNLOADED → LOADED → CONNECTING → CONNECTED → DISCONNECTED` state machine
//!   and relays module events onto the data channel
//! - **Worker**: [`Worker`] runs a [`Session`] on its own thread and serves the
//!   control vocabulary on a port
//!
//! # Architecture
//!
//! ```text
//! host context                      │  worker context (own thread + runtime)
//!                                   │
//!  pbc::Client ── control port ─────┼──▶ worker::serve ──▶ Session
//!       │          (Command +       │                        │
//!       │           reply port)     │                        ├── ModuleHandle
//!       │                           │                        │     (SessionModule)
//!  DataPort ◀──── data port ────────┼──── Relay ◀── EventSink┘
//! ```
//!
//! The session module itself is opaque: it is reached only through the
//! [`SessionModule`] and [`ModuleLoader`] traits.

pub mod call;
pub mod error;
pub mod module;
pub mod options;
pub mod port;
pub mod relay;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use call::{Responder, call, notify};
pub use error::{Error, Result};
pub use module::{
	Exports, ModuleContext, ModuleExit, ModuleHandle, ModuleLoader, ModuleRun, SessionModule,
};
pub use options::WorkerOptions;
pub use port::{MessageChannel, MessagePort, MessageTarget, PortMessage, PortSender};
pub use relay::EventSink;
pub use session::{Lifecycle, PendingConnect, Session, SessionState};
pub use worker::{Worker, serve};
