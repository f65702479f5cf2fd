//! Pending segment queue and initialization payload cache.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use super::types::{Quality, Segment};

/// FIFO of segments that arrived but have not been appended yet.
///
/// Order is arrival order. The only exception is a segment rejected by the
/// sink for lack of space, which goes back to the front so it is the first
/// thing retried once room has been made.
#[derive(Debug, Default)]
pub struct PendingQueue {
    segments: VecDeque<Segment>,
    queued_bytes: usize,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an arriving segment at the back.
    pub fn push_back(&mut self, segment: Segment) {
        self.queued_bytes += segment.len();
        self.segments.push_back(segment);
    }

    /// Re-inserts a rejected segment at the head.
    pub fn push_front(&mut self, segment: Segment) {
        self.queued_bytes += segment.len();
        self.segments.push_front(segment);
    }

    /// Removes and returns the head segment.
    pub fn pop_front(&mut self) -> Option<Segment> {
        let segment = self.segments.pop_front()?;
        self.queued_bytes = self.queued_bytes.saturating_sub(segment.len());
        Some(segment)
    }

    pub fn front(&self) -> Option<&Segment> {
        self.segments.front()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total payload bytes currently waiting.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Drops every queued segment.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.queued_bytes = 0;
    }

    /// Iterates queued segments from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}

/// Initialization payloads keyed by quality.
///
/// Each payload is fetched once and replayed on every later switch back to
/// its quality.
#[derive(Debug, Default)]
pub struct InitCache {
    payloads: HashMap<Quality, Bytes>,
}

impl InitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the payload for a quality unless one is cached already.
    ///
    /// Returns false if the quality was cached and `bytes` was ignored.
    pub fn insert(&mut self, quality: Quality, bytes: Bytes) -> bool {
        match self.payloads.entry(quality) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(bytes);
                true
            }
        }
    }

    /// Returns a cheap clone of the cached payload.
    pub fn get(&self, quality: Quality) -> Option<Bytes> {
        self.payloads.get(&quality).cloned()
    }

    pub fn contains(&self, quality: Quality) -> bool {
        self.payloads.contains_key(&quality)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn clear(&mut self) {
        self.payloads.clear();
    }
}
