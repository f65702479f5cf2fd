//! Per-track controller state.

use std::fmt;

use super::types::{Quality, Segment, TimeRange};

/// Identifies one sink operation issued by a controller.
///
/// The generation changes on every reset, so completions for operations
/// issued before a reset can be told apart from current ones even after a
/// new sink has been bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationTicket {
    pub generation: u64,
    pub sequence: u64,
}

impl fmt::Display for OperationTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}#{}", self.generation, self.sequence)
    }
}

/// The single sink operation a track may have outstanding.
#[derive(Debug, Clone, PartialEq)]
pub enum InFlight {
    Append {
        ticket: OperationTicket,
        segment: Segment,
    },
    Remove {
        ticket: OperationTicket,
        range: TimeRange,
    },
}

impl InFlight {
    pub fn ticket(&self) -> OperationTicket {
        match self {
            InFlight::Append { ticket, .. } | InFlight::Remove { ticket, .. } => *ticket,
        }
    }
}

/// Admission phase derived from the state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPhase {
    /// Free to admit the next queued media segment.
    Idle,
    /// An initialization payload must be appended before any media.
    AwaitingInit,
    /// An append is outstanding at the sink.
    Appending,
    /// The sink rejected an append for lack of space; eviction is running.
    QuotaBlocked,
}

impl fmt::Display for AdmissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionPhase::Idle => write!(f, "idle"),
            AdmissionPhase::AwaitingInit => write!(f, "awaiting-init"),
            AdmissionPhase::Appending => write!(f, "appending"),
            AdmissionPhase::QuotaBlocked => write!(f, "quota-blocked"),
        }
    }
}

/// Mutable bookkeeping for one track.
#[derive(Debug, Clone)]
pub struct BufferState {
    /// Seconds of contiguous media ahead of the playback position
    pub buffer_level: f64,
    /// Outstanding sink operation, if any
    pub in_flight: Option<InFlight>,
    /// Set by a quota rejection, cleared once eviction freed enough media
    pub quota_exceeded: bool,
    /// Set while this track is too far ahead of the least buffered track
    pub level_outrun: bool,
    /// Last reported sufficiency; `None` until first evaluated
    pub sufficient_buffer: Option<bool>,
    /// Highest media index appended so far
    pub max_appended_index: Option<u64>,
    /// Segment count learned from the terminal fetch completion
    pub last_index: Option<u64>,
    pub buffering_complete: bool,
    pub current_quality: Quality,
    pub required_init_quality: Option<Quality>,
    /// Desired steady-state occupancy in seconds
    pub target_buffer: f64,
    /// Presentation offset last applied to the sink
    pub timestamp_offset: Option<f64>,
    /// Most recent seek destination reported by the playback clock
    pub seek_target: Option<f64>,
    generation: u64,
    next_sequence: u64,
}

impl BufferState {
    /// Creates state for a fresh track that still needs its first
    /// initialization payload.
    pub fn new(initial_quality: Quality, target_buffer: f64) -> Self {
        Self {
            buffer_level: 0.0,
            in_flight: None,
            quota_exceeded: false,
            level_outrun: false,
            sufficient_buffer: None,
            max_appended_index: None,
            last_index: None,
            buffering_complete: false,
            current_quality: initial_quality,
            required_init_quality: Some(initial_quality),
            target_buffer,
            timestamp_offset: None,
            seek_target: None,
            generation: 0,
            next_sequence: 0,
        }
    }

    /// Derives the admission phase from the flags.
    pub fn phase(&self) -> AdmissionPhase {
        if self.quota_exceeded {
            AdmissionPhase::QuotaBlocked
        } else if self.is_append_in_flight() {
            AdmissionPhase::Appending
        } else if self.required_init_quality.is_some() {
            AdmissionPhase::AwaitingInit
        } else {
            AdmissionPhase::Idle
        }
    }

    pub fn is_operation_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_append_in_flight(&self) -> bool {
        matches!(self.in_flight, Some(InFlight::Append { .. }))
    }

    pub fn awaiting_init(&self) -> bool {
        self.required_init_quality.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hands out the ticket for the next sink operation.
    pub fn issue_ticket(&mut self) -> OperationTicket {
        let ticket = OperationTicket {
            generation: self.generation,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        ticket
    }

    /// Returns true if `ticket` identifies the outstanding operation.
    pub fn is_current(&self, ticket: OperationTicket) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.ticket() == ticket)
    }

    /// Raises the max appended index; never lowers it.
    pub fn record_appended(&mut self, index: u64) {
        self.max_appended_index = Some(self.max_appended_index.map_or(index, |m| m.max(index)));
    }

    /// Discards all bookkeeping and starts a new operation generation.
    pub fn restart(&mut self, initial_quality: Quality, target_buffer: f64) {
        let generation = self.generation + 1;
        *self = Self::new(initial_quality, target_buffer);
        self.generation = generation;
    }
}
