use crate::models::Sample;

/// Computes the connection health score from 0.0 (worst) to 100.0 (best).
///
/// Latency and jitter subtract bounded penalties, throughput adds bounded
/// bonuses. Any missing metric yields 0: a partial measurement carries no
/// confidence. The result is rounded to one decimal.
pub fn health_score(sample: &Sample) -> f64 {
    match (sample.download_mbps, sample.upload_mbps, sample.ping_ms, sample.jitter_ms) {
        (Some(download), Some(upload), Some(ping), Some(jitter)) => {
            compute_health_score(download, upload, ping, jitter)
        }
        _ => 0.0,
    }
}

pub fn compute_health_score(download_mbps: f64, upload_mbps: f64, ping_ms: f64, jitter_ms: f64) -> f64 {
    const PING_PENALTY_CAP: f64 = 30.0;
    const JITTER_PENALTY_CAP: f64 = 20.0;
    const DOWNLOAD_BONUS_CAP: f64 = 30.0;
    const UPLOAD_BONUS_CAP: f64 = 20.0;

    let ping_penalty = (ping_ms / 2.0).min(PING_PENALTY_CAP);
    let jitter_penalty = (jitter_ms / 2.0).min(JITTER_PENALTY_CAP);
    let download_bonus = (download_mbps / 100.0 * DOWNLOAD_BONUS_CAP).min(DOWNLOAD_BONUS_CAP);
    let upload_bonus = (upload_mbps / 100.0 * UPLOAD_BONUS_CAP).min(UPLOAD_BONUS_CAP);

    let raw = 100.0 - ping_penalty - jitter_penalty + download_bonus + upload_bonus;
    if raw.is_nan() {
        return 0.0;
    }
    (raw.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

/// Discrete band of the health score, shared by the label and the bar colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTier {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthTier::Excellent
        } else if score >= 60.0 {
            HealthTier::Good
        } else if score >= 40.0 {
            HealthTier::Fair
        } else if score >= 20.0 {
            HealthTier::Poor
        } else {
            HealthTier::Critical
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HealthTier::Excellent => "Excellent",
            HealthTier::Good => "Good",
            HealthTier::Fair => "Fair",
            HealthTier::Poor => "Poor",
            HealthTier::Critical => "Critical",
        }
    }
}

/// Returns a human-readable health label based on the score.
pub fn health_label(score: f64) -> &'static str {
    HealthTier::from_score(score).label()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(download: f64, upload: f64, ping: f64, jitter: f64) -> Sample {
        Sample {
            download_mbps: Some(download),
            upload_mbps: Some(upload),
            ping_ms: Some(ping),
            jitter_ms: Some(jitter),
        }
    }

    #[test]
    fn perfect_connection() {
        let score = health_score(&sample(100.0, 100.0, 0.0, 0.0));
        assert!((score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn saturated_penalties_leave_half() {
        // 100 - 30 - 20 + 0 + 0
        let score = health_score(&sample(0.0, 0.0, 100.0, 100.0));
        assert!((score - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clamps_above_hundred() {
        // 100 - 10 - 2.5 + 15 + 4 = 106.5
        let score = health_score(&sample(50.0, 20.0, 20.0, 5.0));
        assert!((score - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn moderate_connection() {
        // 100 - 30 - 7.5 + 6 + 1 = 69.5
        let score = health_score(&sample(20.0, 5.0, 80.0, 15.0));
        assert!((score - 69.5).abs() < 1e-9);
    }

    #[test]
    fn rounds_to_one_decimal() {
        // 100 - 12.31 - 0.5 + 0.3 + 0.2 = 87.69
        let score = health_score(&sample(1.0, 1.0, 24.62, 1.0));
        assert!((score - 87.7).abs() < 1e-9);
    }

    #[test]
    fn missing_metric_scores_zero() {
        let mut partial = sample(500.0, 500.0, 1.0, 0.0);
        partial.jitter_ms = None;
        assert_eq!(health_score(&partial), 0.0);
        assert_eq!(health_score(&Sample::default()), 0.0);
    }

    #[test]
    fn stays_in_bounds() {
        for download in [0.0, 3.5, 50.0, 950.0] {
            for ping in [0.0, 12.0, 250.0, 10_000.0] {
                for jitter in [0.0, 4.0, 300.0] {
                    let score = compute_health_score(download, download / 4.0, ping, jitter);
                    assert!((0.0..=100.0).contains(&score), "{score} out of range");
                }
            }
        }
    }

    #[test]
    fn labels_follow_thresholds() {
        assert_eq!(health_label(100.0), "Excellent");
        assert_eq!(health_label(80.0), "Excellent");
        assert_eq!(health_label(79.9), "Good");
        assert_eq!(health_label(60.0), "Good");
        assert_eq!(health_label(40.0), "Fair");
        assert_eq!(health_label(20.0), "Poor");
        assert_eq!(health_label(19.9), "Critical");
        assert_eq!(health_label(0.0), "Critical");
    }
}
