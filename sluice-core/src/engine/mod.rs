//! Actor runtime for buffer controllers.
//!
//! Each controller runs on its own task and is reached through a cloneable
//! [`BufferControllerHandle`]. The actor executes the sink operations the
//! controller queues and feeds their outcomes back in order.

mod actor;
mod commands;
mod handle;

pub use actor::spawn_buffer_controller;
pub use commands::{BufferCommand, SinkCompletion};
pub use handle::BufferControllerHandle;
