//! Error types for mcload

use std::io;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Workload error: {0}")]
    Workload(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Agent error: {0}")]
    Agent(String),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Unexpected EOF from server")]
    Closed,

    #[error("SASL authentication failed (status 0x{0:04x})")]
    SaslFailed(u16),

    #[error("Read event on unconnected connection")]
    NotConnected,
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unexpected line while waiting for GET reply: {0:?}")]
    UnexpectedGetLine(String),

    #[error("Unexpected line while waiting for END: {0:?}")]
    UnexpectedEndLine(String),

    #[error("Malformed VALUE header: {0:?}")]
    InvalidValueHeader(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;
