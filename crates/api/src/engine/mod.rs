//! Task lifecycle engine of the gateway.
//!
//! Admission of new submissions, status lookups and cancellation, plus the
//! [`tracker::AbandonmentTracker`] they keep up to date.

pub mod admission;
pub mod lifecycle;
pub mod tracker;
