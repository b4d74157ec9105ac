//! Per-connection client engine

pub mod connection;
pub mod op_queue;
pub mod transport;

pub use connection::{Connection, ReadState, WriteState};
pub use op_queue::{OpKind, OpQueue, Operation};
pub use transport::{RecvBuffer, Transport};
