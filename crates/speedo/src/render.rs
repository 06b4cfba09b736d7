use std::io::{self, Write};

use crossterm::cursor::MoveToPreviousLine;
use crossterm::queue;
use crossterm::style::{Color, Stylize};
use crossterm::terminal::{Clear, ClearType};
use speedo_common::models::{Metric, Sample};
use speedo_common::quality::{health_label, HealthTier};
use speedo_common::stats::RunningStatistics;

const FILLED: char = '█';
const EMPTY: char = '-';

pub const BANNER: &str = r"
 __                     _   ___
/ _\_ __   ___  ___  __| | /___\
\ \| '_ \ / _ \/ _ \/ _` |//  //
_\ \ |_) |  __/  __/ (_| / \_//
\__/ .__/ \___|\___|\__,_\___/
   |_|
";

fn fill(filled: usize, width: usize) -> String {
    let filled = filled.min(width);
    let mut bar = String::with_capacity(width * 3);
    bar.extend(std::iter::repeat(FILLED).take(filled));
    bar.extend(std::iter::repeat(EMPTY).take(width - filled));
    bar
}

/// Number of filled cells for `value` against `scale_bound`, capped at `width`.
pub fn filled_cells(value: Option<f64>, scale_bound: f64, width: usize) -> usize {
    match value {
        Some(v) if scale_bound > 0.0 && v.is_finite() && v > 0.0 => {
            ((v / scale_bound * width as f64).floor() as usize).min(width)
        }
        _ => 0,
    }
}

pub fn format_value(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "N/A".to_string())
}

/// Proportional throughput bar, e.g. `Download  |██████----| 93.47 Mbps`.
pub fn bar(label: &str, value: Option<f64>, scale_bound: f64, width: usize) -> String {
    format!(
        "{label:<9} |{}| {} Mbps",
        fill(filled_cells(value, scale_bound, width), width),
        format_value(value)
    )
}

fn tier_color(tier: HealthTier) -> Color {
    match tier {
        HealthTier::Excellent => Color::Green,
        HealthTier::Good => Color::Yellow,
        HealthTier::Fair => Color::Magenta,
        HealthTier::Poor => Color::DarkRed,
        HealthTier::Critical => Color::Red,
    }
}

/// Health score bar; coloured by tier when `color` is set.
pub fn health_bar(score: f64, width: usize, color: bool) -> String {
    let cells = fill(filled_cells(Some(score), 100.0, width), width);
    let cells = if color {
        cells.with(tier_color(HealthTier::from_score(score))).to_string()
    } else {
        cells
    };
    format!("AI Health |{cells}| {score:.1}/100")
}

/// Writes iteration blocks, the single-shot result and the final summary.
///
/// With `in_place` set, each live block overwrites the previous one; otherwise
/// blocks are appended, which is what redirected output gets.
pub struct Renderer<W: Write> {
    out: W,
    in_place: bool,
    color: bool,
    width: usize,
    drawn_lines: u16,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, in_place: bool, color: bool, width: usize) -> Self {
        Self {
            out,
            in_place,
            color,
            width,
            drawn_lines: 0,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn notice(&mut self, text: &str, color: Color) -> io::Result<()> {
        let line = self.paint(text, color);
        writeln!(self.out, "{line}")?;
        self.out.flush()
    }

    pub fn banner(&mut self) -> io::Result<()> {
        self.notice(BANNER, Color::Blue)
    }

    fn live_lines(
        &self,
        iteration: u64,
        clock: &str,
        sample: &Sample,
        bounds: (f64, f64),
        score: f64,
        note: Option<&str>,
    ) -> Vec<String> {
        vec![
            self.paint(&format!("--- Iteration {iteration} --- ({clock})"), Color::Green),
            self.paint(&bar("Download", sample.download_mbps, bounds.0, self.width), Color::Cyan),
            self.paint(&bar("Upload", sample.upload_mbps, bounds.1, self.width), Color::Cyan),
            self.paint(
                &format!(
                    "Ping: {} ms | Jitter: {} ms",
                    format_value(sample.ping_ms),
                    format_value(sample.jitter_ms)
                ),
                Color::Cyan,
            ),
            health_bar(score, self.width, self.color),
            note.map(|n| self.paint(n, Color::Red)).unwrap_or_default(),
        ]
    }

    /// Draw the live block for one stress iteration. `bounds` are the current
    /// download and upload scale bounds; `note` takes the last line, which is
    /// blank otherwise, so the block height never changes.
    pub fn live(
        &mut self,
        iteration: u64,
        clock: &str,
        sample: &Sample,
        bounds: (f64, f64),
        score: f64,
        note: Option<&str>,
    ) -> io::Result<()> {
        let lines = self.live_lines(iteration, clock, sample, bounds, score, note);

        if self.in_place && self.drawn_lines > 0 {
            queue!(self.out, MoveToPreviousLine(self.drawn_lines))?;
        }
        for line in &lines {
            if self.in_place {
                queue!(self.out, Clear(ClearType::CurrentLine))?;
            }
            writeln!(self.out, "{line}")?;
        }
        self.drawn_lines = lines.len() as u16;
        self.out.flush()
    }

    pub fn result(&mut self, sample: &Sample, score: f64) -> io::Result<()> {
        let header = self.paint("\n=== Test Result ===", Color::Green);
        writeln!(self.out, "{header}")?;
        for metric in Metric::ALL {
            let line = format!(
                "{:<9} {} {}",
                format!("{}:", metric.label()),
                format_value(sample.get(metric)),
                metric.unit()
            );
            let line = self.paint(&line, Color::Cyan);
            writeln!(self.out, "{line}")?;
        }
        writeln!(self.out, "{}", health_bar(score, self.width, self.color))?;
        self.out.flush()
    }

    pub fn summary(&mut self, stats: &RunningStatistics, final_score: f64, log_path: &str) -> io::Result<()> {
        let header = self.paint("\n=== Stress Test Summary ===", Color::Yellow);
        writeln!(self.out, "{header}")?;
        for metric in Metric::ALL {
            writeln!(self.out, "{}", summary_line(stats, metric))?;
        }
        writeln!(
            self.out,
            "\n{} ({})",
            health_bar(final_score, self.width, self.color),
            health_label(final_score)
        )?;
        let footer = self.paint(&format!("\nResults logged to: {log_path}"), Color::Magenta);
        writeln!(self.out, "{footer}")?;
        self.out.flush()
    }
}

fn summary_line(stats: &RunningStatistics, metric: Metric) -> String {
    let label = format!("{}:", metric.label());
    let unit = metric.unit();
    let m = stats.metric(metric);
    match (m.mean(), m.min, m.max) {
        (Some(mean), Some(min), Some(max)) => {
            format!("{label:<9} avg {mean:.2} {unit}, min {min:.2} {unit}, max {max:.2} {unit}")
        }
        _ => format!("{label:<9} no data"),
    }
}
