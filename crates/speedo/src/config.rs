use std::net::{IpAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use speedo_common::config::{
    SessionConfig, SessionMode, StressDuration, DEFAULT_JITTER_HOST, DEFAULT_LOG_DIR,
    DEFAULT_PING_SAMPLES, DEFAULT_PING_TIMEOUT_MS,
};
use speedo_common::models::TestSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TestArg {
    #[value(alias = "d")]
    Download,
    #[value(alias = "u")]
    Upload,
    #[value(alias = "p")]
    Ping,
    All,
}

impl From<TestArg> for TestSelector {
    fn from(arg: TestArg) -> Self {
        match arg {
            TestArg::Download => TestSelector::Download,
            TestArg::Upload => TestSelector::Upload,
            TestArg::Ping => TestSelector::Ping,
            TestArg::All => TestSelector::All,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "speedo", version, about = "Terminal internet speed & stress test tool")]
pub struct Args {
    /// Stress mode: L/M/H/V/E/D/Y or a number of seconds
    #[arg(short = 'S', long)]
    pub stress: Option<StressDuration>,

    /// Which test to run
    #[arg(short = 'T', long = "test", value_enum, ignore_case = true, default_value = "all")]
    pub test: TestArg,

    /// Auto-start after a delay in seconds
    #[arg(short = 'r', long = "run", default_value_t = 0)]
    pub start_delay: u64,

    /// Number of ping samples used for jitter
    #[arg(short = 'P', long = "ping", default_value_t = DEFAULT_PING_SAMPLES)]
    pub ping_samples: u32,

    /// Ping timeout in milliseconds
    #[arg(short = 'O', long = "timeout", default_value_t = DEFAULT_PING_TIMEOUT_MS)]
    pub ping_timeout_ms: u64,

    /// Speed test server id (default: best server)
    #[arg(short = 'H', long = "host")]
    pub server: Option<String>,

    /// Reference host for jitter probes
    #[arg(long, default_value = DEFAULT_JITTER_HOST)]
    pub jitter_host: String,

    /// Directory for session CSV logs
    #[arg(long, env = "SPEEDO_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,

    /// Diagnostic log level (RUST_LOG takes precedence)
    #[arg(long, env = "SPEEDO_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Speed test executable
    #[arg(long, env = "SPEEDO_SPEEDTEST_BIN", default_value = "speedtest-cli")]
    pub speedtest_bin: String,

    /// Disable coloured output
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    pub fn session_config(&self) -> Result<SessionConfig> {
        let config = SessionConfig {
            mode: SessionMode::from_stress(self.stress),
            selector: self.test.into(),
            start_delay: Duration::from_secs(self.start_delay),
            ping_samples: self.ping_samples,
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn jitter_host(&self) -> Result<IpAddr> {
        resolve_host(&self.jitter_host)
    }
}

fn resolve_host(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = (host, 0)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve jitter host '{host}'"))?
        .map(|a| a.ip())
        .collect();

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .with_context(|| format!("jitter host '{host}' has no addresses"))
}
