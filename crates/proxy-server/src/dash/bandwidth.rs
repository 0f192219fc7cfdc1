use parking_lot::Mutex;
use std::collections::VecDeque;

pub const DEFAULT_WINDOW: usize = 5;

/// Sliding-window mean of recent segment throughput, in kbps.
pub struct BandwidthEstimator {
    samples: Mutex<VecDeque<f64>>,
    window: usize,
}

impl BandwidthEstimator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(window)),
            window,
        }
    }

    /// Add a sample, dropping the oldest once the window is full.
    /// Non-finite and negative samples are ignored.
    pub fn record(&self, kbps: f64) {
        if !kbps.is_finite() || kbps < 0.0 {
            tracing::debug!(kbps, "ignoring unusable throughput sample");
            return;
        }
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(kbps);
    }

    /// Mean of the current window, or `default_kbps` with no samples.
    pub fn estimate(&self, default_kbps: f64) -> f64 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return default_kbps;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    pub fn samples(&self) -> Vec<f64> {
        self.samples.lock().iter().copied().collect()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Throughput in kbps for `bytes` transferred over `secs`. `None` when no
/// measurable time elapsed.
pub fn throughput_kbps(bytes: usize, secs: f64) -> Option<f64> {
    (secs > 0.0).then(|| bytes as f64 * 8.0 / secs / 1000.0)
}
