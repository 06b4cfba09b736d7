pub mod icmp;
pub mod speedtest;

use std::net::IpAddr;
use std::time::Duration;

use speedo_common::models::{round2, Metric, Sample, TestSelector};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("{tool} is not installed or not on PATH")]
    Unavailable { tool: String },
    #[error("{tool} failed: {reason}")]
    Failure { tool: String, reason: String },
    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

impl ProbeError {
    /// Short form that fits on one line of the live display.
    pub fn brief(&self) -> String {
        match self {
            ProbeError::Unavailable { tool } => format!("{tool} not available"),
            ProbeError::Failure { tool, .. } => format!("{tool} failed"),
            ProbeError::Timeout(_) => "timed out".to_string(),
        }
    }

    /// The user-facing error for a failure that ends the run.
    pub fn into_fatal(self) -> anyhow::Error {
        match self {
            ProbeError::Unavailable { .. } => {
                anyhow::anyhow!("{self}. Install it with: pip install speedtest-cli")
            }
            other => anyhow::Error::new(other),
        }
    }
}

/// Outcome of a startup capability check. A single-shot run cannot do without
/// the capability and stops; a stress session gets the error back as a
/// warning and records the affected metric as missing.
pub fn preflight_verdict(check: Result<(), ProbeError>, stress: bool) -> anyhow::Result<Option<ProbeError>> {
    match check {
        Ok(()) => Ok(None),
        Err(e) if stress => Ok(Some(e)),
        Err(e) => Err(e.into_fatal()),
    }
}

/// Result of one probe call. The sample is always usable; `failure` carries
/// what went wrong with the speed measurement, if anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub sample: Sample,
    pub failure: Option<ProbeError>,
}

/// Source of network measurements for the session loop.
#[allow(async_fn_in_trait)]
pub trait NetworkProbe {
    async fn probe(&mut self, selector: TestSelector, ping_samples: u32, timeout: Duration) -> ProbeReport;
}

/// Probe backed by the speedtest CLI and ICMP echo against a reference host.
pub struct SystemProbe {
    speedtest: speedtest::SpeedtestCli,
    jitter_host: IpAddr,
    probe_interval: Duration,
}

impl SystemProbe {
    pub fn new(speedtest: speedtest::SpeedtestCli, jitter_host: IpAddr, probe_interval: Duration) -> Self {
        Self {
            speedtest,
            jitter_host,
            probe_interval,
        }
    }
}

impl NetworkProbe for SystemProbe {
    async fn probe(&mut self, selector: TestSelector, ping_samples: u32, timeout: Duration) -> ProbeReport {
        let mut report = ProbeReport::default();

        if selector.needs_speedtest() {
            tracing::info!(selector = %selector, "Running speed test");
            match self.speedtest.measure(selector).await {
                Ok(result) => {
                    report.sample.download_mbps = Some(result.download_mbps);
                    report.sample.upload_mbps = Some(result.upload_mbps);
                    report.sample.ping_ms = Some(result.ping_ms);
                }
                Err(e) => {
                    tracing::info!(error = %e, "Speed test failed, metrics missing for this iteration");
                    report.failure = Some(e);
                }
            }
        }

        if selector.includes(Metric::Jitter) {
            tracing::info!(host = %self.jitter_host, samples = ping_samples, "Sampling jitter");
            let host = self.jitter_host;
            let rtts = icmp::sample_rtts(ping_samples, self.probe_interval, |seq| {
                icmp::ping(host, seq, timeout)
            })
            .await;
            report.sample.jitter_ms = Some(round2(jitter_ms(&rtts)));
        }

        report.sample = report.sample.restrict_to(selector);
        report
    }
}

/// Sample standard deviation of the round-trip times; 0 with fewer than two.
pub fn jitter_ms(rtts_ms: &[f64]) -> f64 {
    let n = rtts_ms.len();
    if n < 2 {
        return 0.0;
    }
    let mean = rtts_ms.iter().sum::<f64>() / n as f64;
    let variance = rtts_ms.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_needs_two_samples() {
        assert_eq!(jitter_ms(&[]), 0.0);
        assert_eq!(jitter_ms(&[17.3]), 0.0);
    }

    #[test]
    fn jitter_is_sample_stddev() {
        // mean 14, squared deviations 16 + 0 + 16 = 32, / (3 - 1) = 16
        assert!((jitter_ms(&[10.0, 14.0, 18.0]) - 4.0).abs() < 1e-12);
        assert_eq!(jitter_ms(&[12.5, 12.5, 12.5, 12.5]), 0.0);
    }

    #[test]
    fn error_messages_name_the_tool() {
        let e = ProbeError::Unavailable {
            tool: "speedtest-cli".into(),
        };
        assert_eq!(e.to_string(), "speedtest-cli is not installed or not on PATH");
        assert_eq!(e.brief(), "speedtest-cli not available");
    }

    #[test]
    fn startup_checks_stop_single_shot_runs_only() {
        let icmp_down = || ProbeError::Failure {
            tool: "icmp".into(),
            reason: "cannot open an ICMP socket".into(),
        };

        assert!(preflight_verdict(Ok(()), false).unwrap().is_none());
        assert!(preflight_verdict(Ok(()), true).unwrap().is_none());

        let err = preflight_verdict(Err(icmp_down()), false).unwrap_err();
        assert_eq!(err.to_string(), "icmp failed: cannot open an ICMP socket");
        assert_eq!(preflight_verdict(Err(icmp_down()), true).unwrap(), Some(icmp_down()));
    }

    #[test]
    fn missing_speedtest_tool_gets_install_hint() {
        let missing = ProbeError::Unavailable {
            tool: "speedtest-cli".into(),
        };
        let err = preflight_verdict(Err(missing), false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "speedtest-cli is not installed or not on PATH. Install it with: pip install speedtest-cli"
        );
    }
}
