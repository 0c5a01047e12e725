//! Append-only CSV log of controller samples.
use crate::data::record::{SampleRecord, HEADER};
use crate::error::AppResult;
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// File name used when no log path is given, e.g. `20211123T140500_btc_log.csv`.
pub fn default_log_path(now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("{}_btc_log.csv", now.format("%Y%m%dT%H%M%S")))
}

/// CSV file opened for appending.
///
/// The header row is written only when the file is new or empty. Every
/// record is flushed before [`append`](Self::append) returns, so a row is
/// either fully written or not at all.
pub struct CsvLog {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvLog {
    /// Open (or create) the log file.
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        tracing::info!("CSV log opened at '{}'.", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    /// Append one record and flush it to disk.
    pub fn append(&mut self, record: &SampleRecord) -> AppResult<()> {
        self.writer.write_record(record.to_row())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and close the file.
    pub fn close(mut self) -> AppResult<()> {
        self.writer.flush()?;
        tracing::info!("CSV log '{}' closed.", self.path.display());
        Ok(())
    }
}
