//! Core engine for the massstar reaction-mirroring fleet.
//!
//! This crate is intentionally framework-agnostic. The chat backend (Discord today)
//! lives behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod fleet;
pub mod logging;
pub mod messaging;
pub mod mirror;
pub mod router;

pub use errors::{Error, Result};
