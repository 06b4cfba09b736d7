use crate::models::{Metric, Sample};
use crate::quality::compute_health_score;

/// Scale used for a bar before its metric has been observed.
pub const DEFAULT_SCALE_BOUND: f64 = 100.0;

/// Count, sum and extremes of one metric over the present values only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricStats {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStatistics {
    pub download: MetricStats,
    pub upload: MetricStats,
    pub ping: MetricStats,
    pub jitter: MetricStats,
    /// Iterations recorded, including those where every metric was missing.
    pub samples: u64,
}

impl RunningStatistics {
    pub fn metric(&self, metric: Metric) -> &MetricStats {
        match metric {
            Metric::Download => &self.download,
            Metric::Upload => &self.upload,
            Metric::Ping => &self.ping,
            Metric::Jitter => &self.jitter,
        }
    }

    fn metric_mut(&mut self, metric: Metric) -> &mut MetricStats {
        match metric {
            Metric::Download => &mut self.download,
            Metric::Upload => &mut self.upload,
            Metric::Ping => &mut self.ping,
            Metric::Jitter => &mut self.jitter,
        }
    }

    /// The per-metric means as a sample; metrics never observed stay missing.
    pub fn mean_sample(&self) -> Sample {
        Sample {
            download_mbps: self.download.mean(),
            upload_mbps: self.upload.mean(),
            ping_ms: self.ping.mean(),
            jitter_ms: self.jitter.mean(),
        }
    }

    /// Health score of the session means (not the mean of iteration scores).
    pub fn final_score(&self) -> f64 {
        let means = self.mean_sample();
        match (means.download_mbps, means.upload_mbps, means.ping_ms, means.jitter_ms) {
            (Some(d), Some(u), Some(p), Some(j)) => compute_health_score(d, u, p, j),
            _ => 0.0,
        }
    }
}

/// Accumulates samples for the life of one session. Never rolls back.
#[derive(Debug, Default)]
pub struct SampleAggregator {
    stats: RunningStatistics,
}

impl SampleAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: &Sample) {
        self.stats.samples += 1;
        for metric in Metric::ALL {
            if let Some(value) = sample.get(metric).filter(|v| v.is_finite()) {
                self.stats.metric_mut(metric).push(value);
            }
        }
    }

    pub fn stats(&self) -> RunningStatistics {
        self.stats
    }

    /// Largest value seen so far for `metric`, used to normalise bar widths.
    pub fn scale_bound(&self, metric: Metric) -> f64 {
        self.stats.metric(metric).max.unwrap_or(DEFAULT_SCALE_BOUND)
    }
}
