//! Inter-process communication with snipbench worker processes.
//!
//! This module provides the framed message protocol spoken over the
//! worker's stdin/stdout, and the host-side [`RunManager`] that owns the
//! worker's lifecycle.

mod manager;
pub mod protocol;

pub use manager::{ProgressCallback, RunManager};
pub use protocol::{
    MAX_MESSAGE_SIZE, WorkerRequest, WorkerResponse, read_message, read_message_async, write_message,
    write_message_async,
};
