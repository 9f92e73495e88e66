//! Cross-backend abstractions (Discord today).

pub mod port;
pub mod timed;
pub mod types;
