use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Once;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use crossterm::style::Color;
use tracing_subscriber::EnvFilter;

mod config;
mod probe;
mod render;
mod session;
mod session_log;

use config::Args;
use probe::speedtest::SpeedtestCli;
use probe::{icmp, preflight_verdict, SystemProbe};
use speedo_common::models::Metric;
use render::Renderer;
use session::{Session, SessionState, Shutdown};
use session_log::SessionLog;

const EXIT_ABORTED: u8 = 130;

static INIT: Once = Once::new();

/// Process-wide setup. Safe to call more than once; only the first call
/// installs the subscriber.
fn init_tracing(level: &str) {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
            )
            .with_writer(std::io::stderr)
            .init();
    });
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(args) {
        Ok(SessionState::Aborted) => ExitCode::from(EXIT_ABORTED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<SessionState> {
    // Configuration errors surface before anything is measured.
    let config = args.session_config()?;
    let jitter_host = args.jitter_host()?;

    let tty = std::io::stdout().is_terminal();
    let color = tty && !args.no_color;
    let mut renderer = Renderer::new(std::io::stdout(), tty, color, config.bar_width);
    renderer.banner()?;

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    let result = rt.block_on(async {
        let speedtest = SpeedtestCli::new(args.speedtest_bin.clone(), args.server.clone());

        // Both external capabilities are checked before anything is measured.
        let mut checks = Vec::new();
        if config.selector.needs_speedtest() {
            checks.push(speedtest.check_available().await);
        }
        if config.selector.includes(Metric::Jitter) {
            checks.push(icmp::check_available(jitter_host).await);
        }
        for check in checks {
            if let Some(e) = preflight_verdict(check, config.mode.is_stress())? {
                tracing::warn!(error = %e, "Startup check failed, continuing");
                renderer.notice(&format!("Warning: {e}"), Color::Yellow)?;
            }
        }

        let (shutdown_tx, shutdown) = Shutdown::new();

        // Handle Ctrl+C
        let ctrl_c = tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
        });

        let log = SessionLog::create(&args.log_dir, Local::now())?;
        let probe = SystemProbe::new(speedtest, jitter_host, config.probe_interval);

        tracing::info!(mode = ?config.mode, selector = %config.selector, "Session starting");
        let mut session = Session::new(config, probe, renderer, log);
        let report = session.run(shutdown).await;
        ctrl_c.abort();

        if report.is_err() {
            let _ = session
                .into_renderer()
                .notice("Test failed, partial results were kept in the log.", Color::Red);
        }
        report.map(|r| {
            tracing::info!(
                iterations = r.iterations,
                samples = r.statistics.samples,
                final_score = ?r.final_score,
                "Session finished"
            );
            r.state
        })
    });

    // A ping probe may still be blocked in a socket read.
    rt.shutdown_timeout(Duration::from_millis(250));
    result
}
