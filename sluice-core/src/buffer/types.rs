//! Value types shared by the admission controller.

use std::fmt;

use bytes::Bytes;

/// Kind of media track a controller is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    Audio,
    Video,
    Text,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
            TrackKind::Text => write!(f, "text"),
        }
    }
}

impl std::str::FromStr for TrackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "audio" => Ok(TrackKind::Audio),
            "video" => Ok(TrackKind::Video),
            "text" => Ok(TrackKind::Text),
            _ => Err(format!("Invalid track kind: {s}")),
        }
    }
}

/// Representation quality level within a track.
///
/// Quality levels are opaque ordinals handed out by the representation
/// selection layer; the controller only compares them for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Quality(u32);

impl Quality {
    /// Creates a quality level from its ordinal.
    pub const fn new(level: u32) -> Self {
        Self(level)
    }

    /// Returns the quality ordinal.
    pub const fn level(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

impl From<u32> for Quality {
    fn from(level: u32) -> Self {
        Self(level)
    }
}

/// Encoded media or initialization payload waiting to enter the sink.
///
/// A segment without an index is an initialization payload for its quality.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub bytes: Bytes,
    pub quality: Quality,
    pub index: Option<u64>,
}

impl Segment {
    /// Creates a media segment at the given sequence position.
    pub fn media(quality: Quality, index: u64, bytes: Bytes) -> Self {
        Self {
            bytes,
            quality,
            index: Some(index),
        }
    }

    /// Creates an initialization payload for a quality level.
    pub fn init(quality: Quality, bytes: Bytes) -> Self {
        Self {
            bytes,
            quality,
            index: None,
        }
    }

    /// Returns true if this segment carries initialization data.
    pub fn is_init(&self) -> bool {
        self.index.is_none()
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "media#{index}@{}", self.quality),
            None => write!(f, "init@{}", self.quality),
        }
    }
}

/// Half-open span of media time in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Returns the covered duration, zero for inverted ranges.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Returns true if the range covers no time.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns true if `time` lies within `[start, end)`.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}-{:.3}", self.start, self.end)
    }
}
