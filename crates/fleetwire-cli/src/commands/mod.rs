//! CLI command implementations.

pub mod agent;
pub mod server;
