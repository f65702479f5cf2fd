//! In-memory quota-limited media sink.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sluice_core::buffer::{BufferSink, Quality, SinkError, TimeRange};

use crate::codec::{self, SegmentHeader};

/// Gap below which neighbouring entries count as one buffered range.
const RANGE_TOLERANCE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
struct SinkEntry {
    range: TimeRange,
    bytes: u64,
}

#[derive(Debug)]
struct SinkState {
    entries: Vec<SinkEntry>,
    used_bytes: u64,
    quota_bytes: u64,
    timestamp_offset: f64,
    init_quality: Option<Quality>,
    injected_failures: VecDeque<SinkError>,
    appends: u64,
    removals: u64,
    detached: bool,
}

/// Point-in-time view of a simulated sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSnapshot {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub ranges: Vec<TimeRange>,
    pub init_quality: Option<Quality>,
    pub appends: u64,
    pub removals: u64,
    pub detached: bool,
}

/// Quota-limited sink that tracks time ranges instead of decoding media.
///
/// Media payloads must be produced by [`codec::encode_media`]; the header
/// tells the sink which span the segment covers and how much quota it
/// takes. Appends overlapping buffered media replace the overlapped part.
#[derive(Debug, Clone)]
pub struct SimulatedSink {
    state: Arc<Mutex<SinkState>>,
    latency: Duration,
}

impl SimulatedSink {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                entries: Vec::new(),
                used_bytes: 0,
                quota_bytes,
                timestamp_offset: 0.0,
                init_quality: None,
                injected_failures: VecDeque::new(),
                appends: 0,
                removals: 0,
                detached: false,
            })),
            latency: Duration::ZERO,
        }
    }

    /// Delays every async append and removal by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next append fail with `error` regardless of its content.
    pub fn inject_append_failure(&self, error: SinkError) {
        self.state.lock().injected_failures.push_back(error);
    }

    /// Applies an append synchronously.
    ///
    /// # Errors
    /// - `SinkError::QuotaExceeded` - The segment does not fit in the quota
    /// - `SinkError::AppendFailed` - Payload is not a simulated segment
    /// - `SinkError::Detached` - The sink was detached
    pub fn try_append(&self, bytes: &Bytes) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.detached {
            return Err(SinkError::Detached);
        }
        if let Some(error) = state.injected_failures.pop_front() {
            return Err(error);
        }

        let header = codec::decode(bytes).map_err(|e| SinkError::AppendFailed {
            reason: e.to_string(),
        })?;

        match header {
            SegmentHeader::Init { quality, .. } => {
                state.init_quality = Some(quality);
            }
            SegmentHeader::Media {
                start,
                duration,
                declared_size,
            } => {
                if state.init_quality.is_none() {
                    return Err(SinkError::AppendFailed {
                        reason: "media appended before any initialization segment".to_string(),
                    });
                }
                let offset = state.timestamp_offset;
                let range = TimeRange::new(start + offset, start + offset + duration);

                let freed = overlapped_bytes(&state.entries, range);
                if state.used_bytes - freed + declared_size > state.quota_bytes {
                    return Err(SinkError::QuotaExceeded);
                }
                clear_range(&mut state, range);

                let position = state
                    .entries
                    .partition_point(|entry| entry.range.start < range.start);
                state.entries.insert(
                    position,
                    SinkEntry {
                        range,
                        bytes: declared_size,
                    },
                );
                state.used_bytes += declared_size;
            }
        }
        state.appends += 1;
        Ok(())
    }

    /// Applies a removal synchronously.
    ///
    /// Returns the span actually cleared, which is empty when nothing was
    /// buffered inside `range`.
    ///
    /// # Errors
    /// - `SinkError::Detached` - The sink was detached
    pub fn try_remove(&self, range: TimeRange) -> Result<TimeRange, SinkError> {
        let mut state = self.state.lock();
        if state.detached {
            return Err(SinkError::Detached);
        }

        let overlapping: Vec<TimeRange> = state
            .entries
            .iter()
            .filter_map(|entry| intersection(entry.range, range))
            .collect();
        let cleared = match (overlapping.first(), overlapping.last()) {
            (Some(first), Some(last)) => TimeRange::new(first.start, last.end),
            _ => TimeRange::new(range.start, range.start),
        };

        clear_range(&mut state, range);
        state.removals += 1;
        Ok(cleared)
    }

    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used_bytes
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        let state = self.state.lock();
        SinkSnapshot {
            used_bytes: state.used_bytes,
            quota_bytes: state.quota_bytes,
            ranges: coalesce(&state.entries),
            init_quality: state.init_quality,
            appends: state.appends,
            removals: state.removals,
            detached: state.detached,
        }
    }
}

fn intersection(a: TimeRange, b: TimeRange) -> Option<TimeRange> {
    let start = a.start.max(b.start);
    let end = a.end.min(b.end);
    (end > start).then(|| TimeRange::new(start, end))
}

fn scaled_bytes(entry: &SinkEntry, part: TimeRange) -> u64 {
    let duration = entry.range.duration();
    if duration <= 0.0 {
        return entry.bytes;
    }
    let share = (part.duration() / duration).clamp(0.0, 1.0);
    (entry.bytes as f64 * share).round() as u64
}

fn overlapped_bytes(entries: &[SinkEntry], range: TimeRange) -> u64 {
    entries
        .iter()
        .filter_map(|entry| intersection(entry.range, range).map(|part| scaled_bytes(entry, part)))
        .sum()
}

/// Drops media inside `range`, trimming entries that straddle its edges.
fn clear_range(state: &mut SinkState, range: TimeRange) {
    let mut kept = Vec::with_capacity(state.entries.len() + 1);
    let mut used = 0u64;

    for entry in state.entries.drain(..) {
        if intersection(entry.range, range).is_none() {
            used += entry.bytes;
            kept.push(entry);
            continue;
        }
        for part in [
            TimeRange::new(entry.range.start, range.start.min(entry.range.end)),
            TimeRange::new(range.end.max(entry.range.start), entry.range.end),
        ] {
            if part.duration() > 0.0 {
                let bytes = scaled_bytes(&entry, part);
                used += bytes;
                kept.push(SinkEntry { range: part, bytes });
            }
        }
    }

    state.entries = kept;
    state.used_bytes = used;
}

fn coalesce(entries: &[SinkEntry]) -> Vec<TimeRange> {
    let mut ranges: Vec<TimeRange> = Vec::new();
    for entry in entries {
        match ranges.last_mut() {
            Some(last) if entry.range.start <= last.end + RANGE_TOLERANCE => {
                last.end = last.end.max(entry.range.end);
            }
            _ => ranges.push(entry.range),
        }
    }
    ranges
}

#[async_trait]
impl BufferSink for SimulatedSink {
    async fn append(&self, bytes: Bytes) -> Result<(), SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.try_append(&bytes)
    }

    async fn remove(&self, range: TimeRange) -> Result<TimeRange, SinkError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.try_remove(range)
    }

    fn buffered_ranges(&self) -> Vec<TimeRange> {
        coalesce(&self.state.lock().entries)
    }

    fn buffer_length(&self, at: f64) -> f64 {
        self.buffered_ranges()
            .into_iter()
            .find(|range| range.start - RANGE_TOLERANCE <= at && at < range.end)
            .map_or(0.0, |range| range.end - at)
    }

    fn timestamp_offset(&self) -> f64 {
        self.state.lock().timestamp_offset
    }

    fn set_timestamp_offset(&self, offset: f64) {
        self.state.lock().timestamp_offset = offset;
    }

    fn abort(&self) {
        tracing::trace!("Simulated sink aborted");
    }

    fn detach(&self) {
        self.state.lock().detached = true;
    }
}
