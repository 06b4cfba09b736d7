use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use speedo_common::models::{LogRecord, CSV_HEADER};

const MAX_NAME_SUFFIX: u32 = 1000;

/// Append-only CSV log for one session. Every row is flushed before
/// `append` returns.
pub struct SessionLog {
    path: PathBuf,
    file: File,
}

impl SessionLog {
    /// Create `<dir>/speedo_<start>.csv` and write the header row. Sessions
    /// started within the same second get `_1`, `_2`, ... suffixes.
    pub fn create(dir: &Path, started_at: DateTime<Local>) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;

        let stem = started_at.format("speedo_%Y-%m-%d_%H-%M-%S").to_string();
        let (path, mut file) = open_unique(dir, &stem)?;

        writeln!(file, "{CSV_HEADER}")?;
        file.sync_data()?;

        tracing::info!(path = %path.display(), "Session log created");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        writeln!(self.file, "{}", record.to_csv_row())
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .with_context(|| format!("writing to {}", self.path.display()))
    }

    /// Parse every row of a log written by [`SessionLog`].
    #[cfg(test)]
    pub fn read_records(path: &Path) -> Result<Vec<LogRecord>> {
        use std::io::{BufRead, BufReader};

        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut records = Vec::new();

        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if i == 0 || line.trim().is_empty() {
                continue;
            }
            let record = LogRecord::from_csv_row(&line)
                .with_context(|| format!("{}:{}", path.display(), i + 1))?;
            records.push(record);
        }
        Ok(records)
    }
}

fn open_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File)> {
    for n in 0..MAX_NAME_SUFFIX {
        let name = match n {
            0 => format!("{stem}.csv"),
            n => format!("{stem}_{n}.csv"),
        };
        let path = dir.join(name);
        match OpenOptions::new().append(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("opening log file {}", path.display()));
            }
        }
    }
    anyhow::bail!("no free log file name for {stem} in {}", dir.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use speedo_common::models::Sample;

    fn start() -> DateTime<Local> {
        let naive = NaiveDate::from_ymd_opt(2025, 3, 14)
            .and_then(|d| d.and_hms_opt(9, 26, 53))
            .unwrap();
        Local.from_local_datetime(&naive).earliest().unwrap()
    }

    #[test]
    fn creates_named_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::create(&dir.path().join("logs"), start()).unwrap();
        assert_eq!(
            log.path().file_name().unwrap().to_str().unwrap(),
            "speedo_2025-03-14_09-26-53.csv"
        );
        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn rows_are_visible_immediately_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SessionLog::create(dir.path(), start()).unwrap();

        let records = vec![
            LogRecord::new(
                start().naive_local(),
                Sample {
                    download_mbps: Some(93.47),
                    upload_mbps: Some(11.98),
                    ping_ms: Some(18.06),
                    jitter_ms: Some(0.73),
                },
                100.0,
            ),
            LogRecord::new(start().naive_local(), Sample::default(), 0.0),
        ];

        log.append(&records[0]).unwrap();
        // Readable before the handle is dropped.
        assert_eq!(SessionLog::read_records(log.path()).unwrap(), records[..1]);

        log.append(&records[1]).unwrap();
        let path = log.path().to_path_buf();
        drop(log);

        assert_eq!(SessionLog::read_records(&path).unwrap(), records);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("N/A,N/A,N/A,N/A,0.0\n"));
    }

    #[test]
    fn sessions_in_the_same_second_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let row = LogRecord::new(start().naive_local(), Sample::default(), 0.0);

        let mut first = SessionLog::create(dir.path(), start()).unwrap();
        first.append(&row).unwrap();
        let mut second = SessionLog::create(dir.path(), start()).unwrap();
        second.append(&row).unwrap();
        let third = SessionLog::create(dir.path(), start()).unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(
            second.path().file_name().unwrap().to_str().unwrap(),
            "speedo_2025-03-14_09-26-53_1.csv"
        );
        assert_eq!(
            third.path().file_name().unwrap().to_str().unwrap(),
            "speedo_2025-03-14_09-26-53_2.csv"
        );

        // Each file has exactly one header and parses on its own.
        for log in [&first, &second] {
            let content = fs::read_to_string(log.path()).unwrap();
            assert_eq!(content.matches(CSV_HEADER).count(), 1);
            assert_eq!(SessionLog::read_records(log.path()).unwrap(), [row.clone()]);
        }
    }
}
