//! Wire types for the posbus client worker bridge.
//!
//! Everything that crosses a message port between the host and the worker is
//! defined here as plain serde data:
//!
//! - [`Command`] / [`Reply`]: the closed control vocabulary (`PBC_*` tags)
//! - [`DataMessage`]: the `[type, payload]` frames carried by the data channel
//! - [`ModuleSource`]: where the worker should load the session module from
//!
//! Types in this crate carry no behavior beyond (de)serialization and a few
//! accessors. Ports, correlation and the session state machine live in
//! `pbc-runtime`.

pub mod control;
pub mod data;
pub mod source;

pub use control::*;
pub use data::*;
pub use source::*;
