//! Worker process: claims generation tasks from the queue, runs the
//! pipeline, uploads artifacts and reports progress.

pub mod config;
pub mod error;
pub mod lanes;
pub mod processor;
pub mod server;

#[cfg(test)]
mod testing;
