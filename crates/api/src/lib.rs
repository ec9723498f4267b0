//! Keyboard PCB gateway library.
//!
//! Exposes the building blocks of the HTTP gateway (config, state, error
//! handling, admission and lifecycle engine, routes) so integration tests and
//! the binary entrypoint share one router.

pub mod app;
pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;
