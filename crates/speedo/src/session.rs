use std::future::Future;
use std::io::Write;

use anyhow::Result;
use chrono::Local;
use crossterm::style::Color;
use speedo_common::config::{SessionConfig, SessionMode};
use speedo_common::models::{LogRecord, Metric, Sample};
use speedo_common::quality::health_score;
use speedo_common::stats::{RunningStatistics, SampleAggregator};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::probe::NetworkProbe;
use crate::render::Renderer;
use crate::session_log::SessionLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Cancellation signal shared between the interrupt handler and the loop.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Never resolves if the sender is
    /// dropped without triggering.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless shutdown wins the race. The future is dropped on abort,
    /// which kills a running speedtest child.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        if self.is_triggered() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.triggered() => None,
            out = fut => Some(out),
        }
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    pub iterations: u64,
    pub statistics: RunningStatistics,
    /// Present only when the session completed.
    pub final_score: Option<f64>,
}

pub struct Session<P, W: Write> {
    config: SessionConfig,
    probe: P,
    renderer: Renderer<W>,
    log: SessionLog,
    aggregator: SampleAggregator,
    state: SessionState,
    iteration: u64,
}

impl<P: NetworkProbe, W: Write> Session<P, W> {
    pub fn new(config: SessionConfig, probe: P, renderer: Renderer<W>, log: SessionLog) -> Self {
        Self {
            config,
            probe,
            renderer,
            log,
            aggregator: SampleAggregator::new(),
            state: SessionState::Idle,
            iteration: 0,
        }
    }

    pub fn into_renderer(self) -> Renderer<W> {
        self.renderer
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    /// Drive the session to completion or abort.
    ///
    /// Errors are fatal: log I/O failures, and any speed-measurement failure
    /// in single-shot mode. Stress sessions record the partial sample instead.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<SessionReport> {
        if !self.config.start_delay.is_zero() {
            self.renderer.notice(
                &format!("Starting test in {} seconds...", self.config.start_delay.as_secs()),
                Color::Yellow,
            )?;
            if shutdown.guard(tokio::time::sleep(self.config.start_delay)).await.is_none() {
                return self.abort();
            }
        }

        self.transition(SessionState::Running);
        let started = Instant::now();

        if let SessionMode::Stress { duration } = self.config.mode {
            self.renderer.notice(
                &format!("Starting stress test for {} seconds...", duration.as_secs()),
                Color::Yellow,
            )?;
        }

        loop {
            if shutdown.is_triggered() {
                return self.abort();
            }
            if let SessionMode::Stress { duration } = self.config.mode {
                if started.elapsed() >= duration {
                    break;
                }
            }

            let probe = self.probe.probe(
                self.config.selector,
                self.config.ping_samples,
                self.config.ping_timeout,
            );
            let Some(report) = shutdown.guard(probe).await else {
                return self.abort();
            };

            self.iteration += 1;
            let sample = report.sample;
            if sample.is_empty() {
                tracing::info!(iteration = self.iteration, "No metrics collected this iteration");
            }
            let score = health_score(&sample);
            self.aggregator.record(&sample);

            match self.config.mode {
                SessionMode::SingleShot => {
                    self.persist(sample, score)?;
                    if let Some(e) = report.failure {
                        return Err(e.into_fatal());
                    }
                    self.renderer.result(&sample, score)?;
                    break;
                }
                SessionMode::Stress { .. } => {
                    let bounds = (
                        self.aggregator.scale_bound(Metric::Download),
                        self.aggregator.scale_bound(Metric::Upload),
                    );
                    let clock = Local::now().format("%H:%M:%S").to_string();
                    let note = report.failure.as_ref().map(|e| format!("Speed test: {}", e.brief()));
                    self.renderer
                        .live(self.iteration, &clock, &sample, bounds, score, note.as_deref())?;
                    self.persist(sample, score)?;
                }
            }

            tracing::info!(iteration = self.iteration, score, "Iteration complete");

            if shutdown.guard(tokio::time::sleep(self.config.cooldown)).await.is_none() {
                return self.abort();
            }
        }

        self.complete()
    }

    fn persist(&mut self, sample: Sample, score: f64) -> Result<()> {
        let record = LogRecord::new(Local::now().naive_local(), sample, score);
        self.log.append(&record)
    }

    fn report(&self, final_score: Option<f64>) -> SessionReport {
        SessionReport {
            state: self.state,
            iterations: self.iteration,
            statistics: self.aggregator.stats(),
            final_score,
        }
    }

    fn complete(&mut self) -> Result<SessionReport> {
        self.transition(SessionState::Completed);
        let stats = self.aggregator.stats();
        let final_score = stats.final_score();

        if self.config.mode.is_stress() {
            let path = self.log.path().display().to_string();
            self.renderer.summary(&stats, final_score, &path)?;
        }

        tracing::info!(iterations = self.iteration, final_score, "Session completed");
        Ok(self.report(Some(final_score)))
    }

    fn abort(&mut self) -> Result<SessionReport> {
        self.transition(SessionState::Aborted);
        self.renderer.notice("\nTest aborted by user.", Color::Red)?;
        tracing::warn!(iterations = self.iteration, "Session aborted");
        Ok(self.report(None))
    }
}
