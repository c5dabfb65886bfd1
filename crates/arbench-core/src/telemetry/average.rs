//! Incremental per-frame timing averages.

/// Running mean of per-frame inference time with and without postprocessing.
///
/// Uses `avg_n = avg_{n-1} * (n-1)/n + x_n / n`, so no history is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAverageTracker {
    count: u64,
    avg_ms: f64,
    avg_with_postproc_ms: f64,
}

impl RunningAverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame into the averages.
    pub fn record(&mut self, inference_ms: f64, with_postproc_ms: f64) {
        self.count += 1;
        self.avg_ms = incremental_mean(self.avg_ms, self.count, inference_ms);
        self.avg_with_postproc_ms =
            incremental_mean(self.avg_with_postproc_ms, self.count, with_postproc_ms);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn average_ms(&self) -> f64 {
        self.avg_ms
    }

    pub fn average_with_postproc_ms(&self) -> f64 {
        self.avg_with_postproc_ms
    }
}

fn incremental_mean(previous: f64, n: u64, sample: f64) -> f64 {
    let n = n as f64;
    previous * ((n - 1.0) / n) + sample / n
}
