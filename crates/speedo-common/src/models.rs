use std::fmt;

use chrono::{NaiveDateTime, Timelike};

/// Placeholder written in place of a metric that was not measured.
pub const MISSING: &str = "N/A";

/// Timestamp layout used in log rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header row of every session log.
pub const CSV_HEADER: &str = "timestamp,download_mbps,upload_mbps,ping_ms,jitter_ms,ai_health_score";

// ─── Metric ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Download,
    Upload,
    Ping,
    Jitter,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Download, Metric::Upload, Metric::Ping, Metric::Jitter];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Download => "Download",
            Metric::Upload => "Upload",
            Metric::Ping => "Ping",
            Metric::Jitter => "Jitter",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Download | Metric::Upload => "Mbps",
            Metric::Ping | Metric::Jitter => "ms",
        }
    }
}

// ─── Test selector ────────────────────────────────────────

/// Restricts which sub-measurements a probe runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TestSelector {
    #[default]
    All,
    Download,
    Upload,
    Ping,
}

impl TestSelector {
    pub fn includes(self, metric: Metric) -> bool {
        match self {
            TestSelector::All => true,
            TestSelector::Download => metric == Metric::Download,
            TestSelector::Upload => metric == Metric::Upload,
            TestSelector::Ping => matches!(metric, Metric::Ping | Metric::Jitter),
        }
    }

    /// Whether the speed-measurement tool has to run at all. It reports the
    /// baseline ping too, so every selector needs it.
    pub fn needs_speedtest(self) -> bool {
        self.includes(Metric::Download) || self.includes(Metric::Upload) || self.includes(Metric::Ping)
    }
}

impl fmt::Display for TestSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestSelector::All => "all",
            TestSelector::Download => "download",
            TestSelector::Upload => "upload",
            TestSelector::Ping => "ping",
        };
        f.write_str(s)
    }
}

// ─── Sample ───────────────────────────────────────────────

/// One measurement round. `None` means the metric failed or was not requested.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub ping_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
}

impl Sample {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Download => self.download_mbps,
            Metric::Upload => self.upload_mbps,
            Metric::Ping => self.ping_ms,
            Metric::Jitter => self.jitter_ms,
        }
    }

    /// Drop every metric the selector did not ask for.
    pub fn restrict_to(self, selector: TestSelector) -> Self {
        let keep = |metric: Metric, value: Option<f64>| value.filter(|_| selector.includes(metric));
        Self {
            download_mbps: keep(Metric::Download, self.download_mbps),
            upload_mbps: keep(Metric::Upload, self.upload_mbps),
            ping_ms: keep(Metric::Ping, self.ping_ms),
            jitter_ms: keep(Metric::Jitter, self.jitter_ms),
        }
    }

    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|m| self.get(*m).is_none())
    }
}

/// Round to two decimals, the precision every measured value is reported at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ─── Log record ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: NaiveDateTime,
    pub sample: Sample,
    pub score: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RecordParseError {
    #[error("expected 6 columns, found {0}")]
    ColumnCount(usize),
    #[error("invalid timestamp '{0}'")]
    Timestamp(String),
    #[error("invalid number '{value}' in column {column}")]
    Number { column: &'static str, value: String },
}

impl LogRecord {
    /// Timestamps are kept at whole-second precision, like the log itself.
    pub fn new(timestamp: NaiveDateTime, sample: Sample, score: f64) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self { timestamp, sample, score }
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{:.1}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            csv_field(self.sample.download_mbps),
            csv_field(self.sample.upload_mbps),
            csv_field(self.sample.ping_ms),
            csv_field(self.sample.jitter_ms),
            self.score,
        )
    }

    pub fn from_csv_row(line: &str) -> Result<Self, RecordParseError> {
        let cols: Vec<&str> = line.trim_end().split(',').collect();
        if cols.len() != 6 {
            return Err(RecordParseError::ColumnCount(cols.len()));
        }

        let timestamp = NaiveDateTime::parse_from_str(cols[0], TIMESTAMP_FORMAT)
            .map_err(|_| RecordParseError::Timestamp(cols[0].to_string()))?;

        let sample = Sample {
            download_mbps: parse_field("download_mbps", cols[1])?,
            upload_mbps: parse_field("upload_mbps", cols[2])?,
            ping_ms: parse_field("ping_ms", cols[3])?,
            jitter_ms: parse_field("jitter_ms", cols[4])?,
        };
        let score = cols[5].parse().map_err(|_| RecordParseError::Number {
            column: "ai_health_score",
            value: cols[5].to_string(),
        })?;

        Ok(Self { timestamp, sample, score })
    }
}

// f64's Display is the shortest text that parses back to the same value.
fn csv_field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| MISSING.to_string())
}

fn parse_field(column: &'static str, raw: &str) -> Result<Option<f64>, RecordParseError> {
    if raw == MISSING {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| RecordParseError::Number {
        column,
        value: raw.to_string(),
    })
}
