//! Date-partitioned CSV result log
//!
//! Layout: `<results_dir>/<DD-Mon-YYYY>/<DD-Mon-YYYY>.csv`, one file per
//! local calendar day.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::models::result::ResultRecord;

/// Date format of CSV directory and file names, e.g. `10-Jan-2021`
pub const CSV_DATE_FMT: &str = "%d-%b-%Y";

/// Append-only CSV log rotated at the local date boundary
pub struct CsvResultLog {
    results_dir: PathBuf,
    retention_period: u32,
    writer: Option<csv::Writer<fs::File>>,
    header: Vec<&'static str>,
    current_date: Option<NaiveDate>,
}

impl CsvResultLog {
    pub fn new(results_dir: impl Into<PathBuf>, retention_period: u32) -> Self {
        Self {
            results_dir: results_dir.into(),
            retention_period,
            writer: None,
            header: Vec::new(),
            current_date: None,
        }
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Takes effect at the next rotation
    pub fn set_retention_period(&mut self, days: u32) {
        self.retention_period = days;
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current_date
    }

    /// Path of the CSV file for `date`
    pub fn csv_path(&self, date: NaiveDate) -> PathBuf {
        let name = date.format(CSV_DATE_FMT).to_string();
        self.results_dir.join(&name).join(format!("{}.csv", name))
    }

    /// Append one row per record.
    ///
    /// Opens today's file on first use (writing a header if the file is new).
    /// When the date of `now` differs from the open file's date, the file is
    /// closed, old directories are pruned and a new file is opened. Records
    /// whose columns differ from the file's header are rejected before any
    /// row is written.
    pub fn append(&mut self, records: &[ResultRecord], now: NaiveDateTime) -> Result<(), DeployError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let today = now.date();

        if let Some(date) = self.current_date {
            if date != today {
                info!("Date changed from {} to {}, rotating CSV log", date, today);
                self.close()?;
                let removed = prune_old_dirs(&self.results_dir, self.retention_period, today)?;
                if !removed.is_empty() {
                    info!("Removed {} CSV directories older than {} days", removed.len(), self.retention_period);
                }
            }
        }

        let header = first.csv_header();
        if let Some(other) = records.iter().find(|r| r.csv_header() != header) {
            return Err(DeployError::ValidationError(format!(
                "Mixed CSV columns in one batch: {:?} and {:?}",
                header,
                other.csv_header()
            )));
        }

        if self.writer.is_none() {
            self.writer = Some(self.open(today, &header)?);
            self.header = header.clone();
            self.current_date = Some(today);
        } else if self.header != header {
            return Err(DeployError::ValidationError(format!(
                "CSV log for {} has columns {:?}, records have {:?}",
                today, self.header, header
            )));
        }

        if let Some(writer) = self.writer.as_mut() {
            for record in records {
                writer.write_record(record.csv_row())?;
            }
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and close the open file, if any. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<(), DeployError> {
        self.current_date = None;
        self.header.clear();
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("Closed CSV log");
        }
        Ok(())
    }

    fn open(&self, date: NaiveDate, header: &[&str]) -> Result<csv::Writer<fs::File>, DeployError> {
        let path = self.csv_path(date);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let needs_header = if path.exists() {
            match read_header(&path)? {
                Some(existing) if existing != header => {
                    return Err(DeployError::ValidationError(format!(
                        "CSV log {} has columns {:?}, records have {:?}",
                        path.display(),
                        existing,
                        header
                    )));
                }
                Some(_) => false,
                None => true,
            }
        } else {
            true
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(header)?;
            writer.flush()?;
            info!("Created CSV log at {}", path.display());
        } else {
            info!("Appending to CSV log at {}", path.display());
        }
        Ok(writer)
    }
}

impl Drop for CsvResultLog {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close CSV log: {}", e);
        }
    }
}

/// First row of an existing CSV file, if it has one
fn read_header(path: &Path) -> Result<Option<Vec<String>>, DeployError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    match reader.records().next() {
        Some(record) => Ok(Some(record?.iter().map(str::to_string).collect())),
        None => Ok(None),
    }
}

/// Delete dated directories older than `retention_period` days before `today`.
///
/// Directories are visited oldest first and the scan stops at the first one
/// inside the retention window. Entries whose names are not dates are left
/// alone.
pub fn prune_old_dirs(
    results_dir: &Path,
    retention_period: u32,
    today: NaiveDate,
) -> Result<Vec<PathBuf>, DeployError> {
    if !results_dir.exists() {
        return Ok(Vec::new());
    }

    let mut dated: Vec<(NaiveDate, PathBuf)> = fs::read_dir(results_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let date = NaiveDate::parse_from_str(name, CSV_DATE_FMT).ok()?;
            Some((date, path))
        })
        .collect();
    dated.sort_by_key(|(date, _)| *date);

    let mut removed = Vec::new();
    for (date, path) in dated {
        let age = (today - date).num_days();
        if age <= retention_period as i64 {
            break;
        }
        info!("Removing CSV directory older than {} days at {}", retention_period, path.display());
        fs::remove_dir_all(&path)?;
        removed.push(path);
    }
    Ok(removed)
}
