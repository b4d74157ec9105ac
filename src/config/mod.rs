//! Configuration

pub mod cli;
pub mod connection_config;

pub use cli::CliArgs;
pub use connection_config::{ConnectionConfig, RunConfig};
