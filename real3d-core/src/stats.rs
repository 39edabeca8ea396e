//! Per-frame statistics and error reporting
//!
//! Tracks cache activity and draw counts for one frame, and makes sure each
//! kind of in-frame error is logged at most once per frame.

use log::warn;
use serde::Serialize;
use std::fmt;

/// Counters for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameStats {
    /// Models decoded and uploaded this frame
    pub models_cached: u32,
    /// Lookups answered from a cache
    pub cache_hits: u32,
    pub polygons_decoded: u32,
    pub vertices_uploaded: u32,
    /// Model instances appended to display lists
    pub display_nodes: u32,
    pub draw_calls: u32,
    /// Times the caches were flushed and the frame rebuilt
    pub recaches: u32,
    pub textures_decoded: u32,
    /// Time spent between `begin_frame` and `end_frame`
    pub frame_time_ms: f32,
}

impl FrameStats {
    /// Fold another frame's counters into this one.
    pub fn accumulate(&mut self, other: &FrameStats) {
        self.models_cached += other.models_cached;
        self.cache_hits += other.cache_hits;
        self.polygons_decoded += other.polygons_decoded;
        self.vertices_uploaded += other.vertices_uploaded;
        self.display_nodes += other.display_nodes;
        self.draw_calls += other.draw_calls;
        self.recaches += other.recaches;
        self.textures_decoded += other.textures_decoded;
        self.frame_time_ms += other.frame_time_ms;
    }

    /// Fraction of model lookups that hit
    pub fn hit_rate(&self) -> f32 {
        let total = self.cache_hits + self.models_cached;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }
}

/// In-frame error classes, each reported once per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    LocalVertexOverflow,
    UnableToCacheModel,
    DisplayListFull,
    StackOverflow,
    InvalidNodePointer,
    DecodeAnomaly,
}

impl FrameError {
    #[inline]
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameError::LocalVertexOverflow => "local vertex buffer overflow",
            FrameError::UnableToCacheModel => "unable to cache model",
            FrameError::DisplayListFull => "display list is full",
            FrameError::StackOverflow => "scene graph stack overflow",
            FrameError::InvalidNodePointer => "invalid node pointer",
            FrameError::DecodeAnomaly => "decode anomaly",
        };
        f.write_str(s)
    }
}

/// Error classes already reported this frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn contains(&self, kind: FrameError) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Log `detail` unless `kind` was already reported this frame.
    /// Returns `true` if the message was logged.
    pub fn report(&mut self, kind: FrameError, detail: impl fmt::Display) -> bool {
        if self.contains(kind) {
            return false;
        }
        self.0 |= kind.bit();
        warn!("{}: {} (further errors of this kind suppressed this frame)", kind, detail);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_reported_once_per_frame() {
        let mut flags = ErrorFlags::default();
        assert!(flags.report(FrameError::DisplayListFull, "layer 0"));
        assert!(!flags.report(FrameError::DisplayListFull, "layer 1"));
        assert!(flags.report(FrameError::StackOverflow, "0x800100"));
        flags.clear();
        assert!(!flags.contains(FrameError::DisplayListFull));
        assert!(flags.report(FrameError::DisplayListFull, "layer 0"));
    }

    #[test]
    fn hit_rate() {
        let stats = FrameStats {
            models_cached: 1,
            cache_hits: 3,
            ..FrameStats::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(FrameStats::default().hit_rate(), 0.0);
    }
}
