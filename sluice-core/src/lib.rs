//! Sluice Core - per-track media buffer admission
//!
//! This crate provides the buffer controller that sits between segment
//! fetching and a quota-limited media sink: admission ordering, quality
//! switches, cross-track balancing and quota recovery, plus the actor
//! runtime, configuration and tracing setup around it.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use buffer::{BufferController, BufferError, BufferSignal, BufferSink, SinkError, TrackKind};
pub use config::SluiceConfig;
pub use engine::{BufferControllerHandle, spawn_buffer_controller};

/// Core errors that can bubble up from any Sluice subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SluiceError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Tracing setup error: {0}")]
    Tracing(#[from] tracing_setup::TracingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SluiceError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            SluiceError::Buffer(e) => match e {
                BufferError::ControllerShutdown => "The buffer controller has stopped".to_string(),
                BufferError::NotInitialized { track } => {
                    format!("No {track} media buffer is attached")
                }
                BufferError::Sink(_) => "The media buffer reported an error".to_string(),
            },
            SluiceError::Sink(SinkError::QuotaExceeded) => "The media buffer is full".to_string(),
            SluiceError::Sink(_) => "The media buffer reported an error".to_string(),
            SluiceError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            SluiceError::Tracing(_) => "Logging could not be set up".to_string(),
            SluiceError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SluiceError::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, SluiceError>;
