//! Rolling timing of whole commit passes

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

pub struct CommitTimer {
    started: Option<Instant>,
    durations: RingBuffer<Duration>,
}

impl CommitTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            started: None,
            durations: RingBuffer::new(capacity),
        }
    }

    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Records the time since `begin`. Unmatched calls are ignored.
    pub fn end(&mut self) {
        if let Some(started) = self.started.take() {
            self.durations.push(started.elapsed());
        }
    }

    pub fn samples(&self) -> usize {
        self.durations.len()
    }

    pub fn average_ms(&self) -> f64 {
        self.durations.average().as_secs_f64() * 1000.0
    }

    pub fn range_ms(&self) -> (f64, f64) {
        let (min, max) = self.durations.min_max();
        (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0)
    }
}

impl std::fmt::Debug for CommitTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitTimer")
            .field("samples", &self.samples())
            .field("average_ms", &self.average_ms())
            .finish()
    }
}

impl Default for CommitTimer {
    fn default() -> Self {
        Self::new(64)
    }
}
