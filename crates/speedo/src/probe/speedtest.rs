use std::io::ErrorKind;
use std::process::Stdio;

use serde::Deserialize;
use speedo_common::models::{round2, Metric, TestSelector};
use tokio::process::Command;

use super::ProbeError;

/// Throughput and baseline latency from one speed-measurement run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: f64,
}

/// Subset of the `--json` output we consume. Throughput is in bits/s.
#[derive(Debug, Deserialize)]
struct SpeedtestJson {
    download: f64,
    upload: f64,
    ping: f64,
}

/// Wrapper around the `speedtest-cli` executable.
#[derive(Debug, Clone)]
pub struct SpeedtestCli {
    program: String,
    server: Option<String>,
}

impl SpeedtestCli {
    pub fn new(program: impl Into<String>, server: Option<String>) -> Self {
        Self {
            program: program.into(),
            server,
        }
    }

    /// Check that the tool can be executed at all.
    pub async fn check_available(&self) -> Result<(), ProbeError> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if status.success() {
            Ok(())
        } else {
            Err(ProbeError::Failure {
                tool: self.program.clone(),
                reason: format!("--version exited with {status}"),
            })
        }
    }

    fn args(&self, selector: TestSelector) -> Vec<String> {
        let mut args = vec!["--json".to_string()];
        if let Some(server) = &self.server {
            args.push("--server".to_string());
            args.push(server.clone());
        }
        if !selector.includes(Metric::Download) {
            args.push("--no-download".to_string());
        }
        if !selector.includes(Metric::Upload) {
            args.push("--no-upload".to_string());
        }
        args
    }

    /// Run one measurement. Dropping the future kills the child process.
    pub async fn measure(&self, selector: TestSelector) -> Result<SpeedResult, ProbeError> {
        let output = Command::new(&self.program)
            .args(self.args(selector))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failure {
                tool: self.program.clone(),
                reason: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        parse_output(&output.stdout).map_err(|reason| ProbeError::Failure {
            tool: self.program.clone(),
            reason,
        })
    }

    fn spawn_error(&self, e: std::io::Error) -> ProbeError {
        if e.kind() == ErrorKind::NotFound {
            ProbeError::Unavailable {
                tool: self.program.clone(),
            }
        } else {
            ProbeError::Failure {
                tool: self.program.clone(),
                reason: e.to_string(),
            }
        }
    }
}

fn parse_output(stdout: &[u8]) -> Result<SpeedResult, String> {
    let data: SpeedtestJson =
        serde_json::from_slice(stdout).map_err(|e| format!("unparseable output: {e}"))?;

    if ![data.download, data.upload, data.ping].iter().all(|v| v.is_finite() && *v >= 0.0) {
        return Err("output contains negative or non-finite values".to_string());
    }

    Ok(SpeedResult {
        download_mbps: round2(data.download / 1_000_000.0),
        upload_mbps: round2(data.upload / 1_000_000.0),
        ping_ms: round2(data.ping),
    })
}
