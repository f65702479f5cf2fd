//! Quota-exceeded recovery.
//!
//! Eviction runs only after the sink rejected an append for lack of space.
//! Each round removes media behind the playback position; once the rounds
//! together freed at least the target buffer duration, admission resumes.

use super::state::OperationTicket;
use super::types::TimeRange;

/// Progress after one completed removal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryProgress {
    /// Enough media was removed; the rejected segment can be retried.
    Recovered { removed_seconds: f64 },
    /// Not enough yet; wait and evict again.
    Continue { removed_seconds: f64 },
}

/// Bookkeeping for one run of the eviction loop.
#[derive(Debug, Default, Clone)]
pub struct QuotaRecovery {
    active: bool,
    rounds: u32,
    removed_seconds: f64,
    pending_retry: Option<OperationTicket>,
}

impl QuotaRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh run, forgetting what earlier runs removed.
    pub fn begin(&mut self) {
        *self = Self {
            active: true,
            ..Self::default()
        };
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of removal rounds completed in this run.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn removed_seconds(&self) -> f64 {
        self.removed_seconds
    }

    /// Accumulates a completed removal and decides whether to stop.
    pub fn record_removed(&mut self, range: TimeRange, target_buffer: f64) -> RecoveryProgress {
        self.rounds += 1;
        self.removed_seconds += range.duration();
        if self.removed_seconds >= target_buffer {
            RecoveryProgress::Recovered {
                removed_seconds: self.removed_seconds,
            }
        } else {
            RecoveryProgress::Continue {
                removed_seconds: self.removed_seconds,
            }
        }
    }

    /// Remembers the timer armed for the next round.
    pub fn arm_retry(&mut self, ticket: OperationTicket) {
        self.pending_retry = Some(ticket);
    }

    /// Returns true if a retry timer is armed.
    pub fn is_retry_pending(&self) -> bool {
        self.pending_retry.is_some()
    }

    /// Consumes the armed retry if `ticket` matches it.
    pub fn take_retry(&mut self, ticket: OperationTicket) -> bool {
        if self.pending_retry == Some(ticket) {
            self.pending_retry = None;
            true
        } else {
            false
        }
    }

    /// Ends the run.
    pub fn finish(&mut self) {
        *self = Self::default();
    }
}

/// Computes the span to remove in one eviction round.
///
/// The span runs from the earliest buffered timestamp up to the start of the
/// fetch request that covers the playback position, or the whole second
/// below the playback position when no such request is known. Right after a
/// seek into unbuffered time the entire buffer is stale and the span extends
/// to the end of the last buffered range.
///
/// Returns `None` when nothing is buffered.
pub fn eviction_range(
    buffered: &[TimeRange],
    current_time: f64,
    executed_request_start: Option<f64>,
    seek_target: Option<f64>,
) -> Option<TimeRange> {
    let first = buffered.first()?;

    let mut end = executed_request_start
        .filter(|start| start.is_finite())
        .unwrap_or_else(|| current_time.floor());

    let playing_from_buffer = buffered.iter().any(|range| range.contains(current_time));
    if !playing_from_buffer && seek_target == Some(current_time) {
        if let Some(last) = buffered.last() {
            end = last.end;
        }
    }

    Some(TimeRange::new(first.start, end))
}
