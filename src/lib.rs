//! Turnstile - Fixed-Window Rate Limiting
//!
//! This crate decides whether an actor may perform a named action right now.
//! Each action has a fixed-window rule; counters live in a pluggable store
//! that is either local to the process or shared through Redis, so the same
//! limits hold when the service is scaled horizontally.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
