//! Windowed audio chunking with backward overlap.

use std::sync::Arc;

/// A time-bounded slice of audio produced for bounded-memory recognition.
///
/// Samples are shared (`Arc`) so cloning a chunk never copies PCM data.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Chunk start on the source timeline (seconds).
    pub start: f64,
    /// Chunk end on the source timeline (seconds).
    pub end: f64,
    /// 16 kHz mono samples covering `[start, end)`.
    pub samples: Arc<[f32]>,
}

impl AudioChunk {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Compute the chunk windows covering a timeline of `total_ms` milliseconds.
///
/// Starting at zero, each window is `min(start + chunk_ms, total_ms)` wide;
/// the cursor then steps back by `overlap_ms` unless the window already
/// touches the end of the timeline. The result covers the whole timeline
/// with no gaps, every non-final window is exactly `chunk_ms` long, and
/// consecutive windows share exactly `overlap_ms`.
pub fn chunk_spans(total_ms: u64, chunk_ms: u64, overlap_ms: u64) -> Vec<(u64, u64)> {
    if total_ms == 0 || chunk_ms == 0 {
        return Vec::new();
    }
    // The overlap must leave forward progress, otherwise the cursor stalls.
    let overlap_ms = overlap_ms.min(chunk_ms - 1);

    let mut spans = Vec::new();
    let mut start = 0u64;
    loop {
        let end = (start + chunk_ms).min(total_ms);
        spans.push((start, end));
        if end >= total_ms {
            break;
        }
        start = end - overlap_ms;
    }
    spans
}
