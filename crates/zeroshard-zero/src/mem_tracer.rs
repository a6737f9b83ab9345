//! Memory Tracer - Device Memory Samples at Pass Boundaries
//!
//! The collector is purely observational: it records how many device bytes
//! model data (payloads, gathered views, gradient shards) and non-model data
//! (activations) occupied at each forward and backward boundary, and keeps
//! the peaks. The optimizer reads the peaks to size the spare device margin.
//!
//! Samples cover the current iteration only; `next_iteration` drops them and
//! keeps the peaks, so a long run holds a bounded number of samples.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

use core::fmt;

use tracing::trace;

// =============================================================================
// Samples
// =============================================================================

/// Where a sample was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStage {
    /// Right after forward.
    Forward,
    /// Right after backward, before re-sharding.
    Backward,
}

impl fmt::Display for TraceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Backward => write!(f, "backward"),
        }
    }
}

/// One recorded sample, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemSample {
    /// Boundary the sample was taken at.
    pub stage: TraceStage,
    /// Device bytes held by model data.
    pub model_data: usize,
    /// Device bytes held by activations.
    pub non_model_data: usize,
}

// =============================================================================
// MemStatsCollector
// =============================================================================

/// Records device memory samples and their peaks.
#[derive(Debug, Clone, Default)]
pub struct MemStatsCollector {
    samples: Vec<MemSample>,
    iterations: usize,
    peak_model_data: usize,
    peak_non_model_data: usize,
}

impl MemStatsCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sample.
    pub fn sample(&mut self, stage: TraceStage, model_data: usize, non_model_data: usize) {
        trace!(%stage, model_data, non_model_data, "memory sample");
        self.peak_model_data = self.peak_model_data.max(model_data);
        self.peak_non_model_data = self.peak_non_model_data.max(non_model_data);
        self.samples.push(MemSample {
            stage,
            model_data,
            non_model_data,
        });
    }

    /// Returns the samples of the current iteration.
    pub fn samples(&self) -> &[MemSample] {
        &self.samples
    }

    /// Returns true once a sample has been recorded.
    pub fn has_data(&self) -> bool {
        self.iterations > 0 || !self.samples.is_empty()
    }

    /// Number of completed iterations.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Closes the current iteration: samples are dropped, peaks are kept.
    pub fn next_iteration(&mut self) {
        if !self.samples.is_empty() {
            self.iterations += 1;
            self.samples.clear();
        }
    }

    /// Peak device bytes held by model data.
    pub fn peak_model_data(&self) -> usize {
        self.peak_model_data
    }

    /// Peak device bytes held by activations.
    pub fn peak_non_model_data(&self) -> usize {
        self.peak_non_model_data
    }

    /// Bytes that may be borrowed from a device of `capacity` bytes.
    ///
    /// This is `ratio` of what the peaks leave free, or zero before the
    /// first sample.
    pub fn margin(&self, capacity: usize, ratio: f32) -> usize {
        if !self.has_data() {
            return 0;
        }
        let spare = capacity.saturating_sub(self.peak_model_data + self.peak_non_model_data);
        (spare as f64 * f64::from(ratio.clamp(0.0, 1.0))) as usize
    }

    /// Drops all samples and peaks.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_track_maximum() {
        let mut tracer = MemStatsCollector::new();
        assert!(!tracer.has_data());
        tracer.sample(TraceStage::Forward, 100, 40);
        tracer.sample(TraceStage::Backward, 80, 60);
        assert_eq!(tracer.peak_model_data(), 100);
        assert_eq!(tracer.peak_non_model_data(), 60);
        assert_eq!(tracer.samples().len(), 2);
    }

    #[test]
    fn test_next_iteration_keeps_peaks() {
        let mut tracer = MemStatsCollector::new();
        for step in 0..500 {
            tracer.sample(TraceStage::Forward, 100 + step, 10);
            tracer.sample(TraceStage::Backward, 50, 20);
            tracer.next_iteration();
        }
        assert!(tracer.samples().is_empty());
        assert!(tracer.has_data());
        assert_eq!(tracer.iterations(), 500);
        assert_eq!(tracer.peak_model_data(), 599);
        assert_eq!(tracer.margin(1000, 1.0), 1000 - 599 - 20);

        tracer.next_iteration();
        assert_eq!(tracer.iterations(), 500);
    }

    #[test]
    fn test_margin() {
        let mut tracer = MemStatsCollector::new();
        assert_eq!(tracer.margin(1000, 0.5), 0);
        tracer.sample(TraceStage::Forward, 300, 100);
        assert_eq!(tracer.margin(1000, 0.5), 300);
        assert_eq!(tracer.margin(1000, 0.0), 0);
        assert_eq!(tracer.margin(200, 1.0), 0);
        tracer.reset();
        assert!(!tracer.has_data());
    }
}
