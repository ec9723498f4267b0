//! Domain types shared by the gateway and the worker.
//!
//! Everything here is pure: no I/O, no async. The queue, storage and
//! pipeline crates build on these types so both processes agree on the
//! task contract.

pub mod env;
pub mod error;
pub mod progress;
pub mod request;
pub mod status;
pub mod task;
pub mod types;
