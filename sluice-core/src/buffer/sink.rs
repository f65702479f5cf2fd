//! Seams to the collaborators a controller is built over.
//!
//! The controller never fetches, decodes or plays media. It appends into a
//! [`BufferSink`], reads the playback position from a [`PlaybackClock`] and
//! asks a [`FetchTracker`] where the request covering the playback position
//! started. Production players plug in their media pipeline; tests and the
//! simulator plug in in-memory versions.

use bytes::Bytes;
use thiserror::Error;

use super::types::{TimeRange, TrackKind};

/// Append-only, quota-limited, time-ranged media store for one track.
///
/// At most one of `append`/`remove` is outstanding per sink at any time;
/// the controller guarantees this, implementations may rely on it.
#[async_trait::async_trait]
pub trait BufferSink: Send + Sync {
    /// Appends an encoded payload.
    ///
    /// # Errors
    ///
    /// - `SinkError::QuotaExceeded` - The store has no room for the payload
    /// - `SinkError::AppendFailed` - Any other append failure
    /// - `SinkError::Detached` - The sink was detached from its source
    async fn append(&self, bytes: Bytes) -> Result<(), SinkError>;

    /// Removes buffered media inside `range`.
    ///
    /// Returns the span that was actually cleared.
    ///
    /// # Errors
    ///
    /// - `SinkError::RemoveFailed` - The store could not remove the range
    /// - `SinkError::Detached` - The sink was detached from its source
    async fn remove(&self, range: TimeRange) -> Result<TimeRange, SinkError>;

    /// Returns the buffered ranges in ascending order.
    fn buffered_ranges(&self) -> Vec<TimeRange>;

    /// Returns seconds of contiguous media buffered from `at` onward.
    fn buffer_length(&self, at: f64) -> f64;

    /// Returns the presentation offset applied to appended media.
    fn timestamp_offset(&self) -> f64;

    /// Sets the presentation offset applied to subsequent appends.
    fn set_timestamp_offset(&self, offset: f64);

    /// Aborts any parsing of a partially appended payload.
    fn abort(&self);

    /// Detaches the sink from its media source.
    fn detach(&self);
}

/// Read-only view of the playback position.
pub trait PlaybackClock: Send + Sync {
    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Seconds left until the end of the current period.
    fn time_to_period_end(&self) -> f64;

    /// Duration of the current period, if known.
    fn period_duration(&self) -> Option<f64>;
}

/// Knowledge of the fetch layer about executed segment requests.
pub trait FetchTracker: Send + Sync {
    /// Start time of the executed request that covers `time` for `track`.
    fn executed_request_start(&self, track: TrackKind, time: f64) -> Option<f64>;
}

/// Errors reported by a [`BufferSink`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SinkError {
    /// The store is full; media must be evicted before retrying.
    #[error("sink quota exceeded")]
    QuotaExceeded,

    /// The append failed for a reason other than space.
    #[error("append failed: {reason}")]
    AppendFailed { reason: String },

    /// The remove operation failed.
    #[error("remove failed: {reason}")]
    RemoveFailed { reason: String },

    /// The sink is no longer attached to a media source.
    #[error("sink detached")]
    Detached,
}

impl SinkError {
    /// Returns true for the recoverable out-of-space failure.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, SinkError::QuotaExceeded)
    }
}
