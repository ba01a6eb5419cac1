//! Sweep table persistence.
//!
//! One CSV file, two columns per row (commanded voltage, measured voltage),
//! no header, rows in sweep order. Under [`PersistMode::AtEnd`] the file only
//! comes into existence once the sweep has completed; under
//! [`PersistMode::Incremental`] it is created up front and every row is
//! flushed to disk the moment it is measured, so an aborted run keeps
//! everything acquired so far.

use crate::config::PersistMode;
use crate::error::AppResult;
use crate::sweep::MeasurementRecord;
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writer for the sweep table.
pub struct SweepWriter {
    path: PathBuf,
    mode: PersistMode,
    writer: Option<csv::Writer<File>>,
}

impl SweepWriter {
    /// Create a writer targeting `path` under the given persistence mode.
    /// Nothing touches the filesystem until [`SweepWriter::begin`].
    pub fn new(path: impl Into<PathBuf>, mode: PersistMode) -> Self {
        Self {
            path: path.into(),
            mode,
            writer: None,
        }
    }

    /// Target path of the table.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepare for the sweep. Incremental mode creates the file here.
    pub fn begin(&mut self) -> AppResult<()> {
        if self.mode == PersistMode::Incremental {
            self.writer = Some(open_table(&self.path)?);
            info!("Appending rows to '{}' as they arrive", self.path.display());
        }
        Ok(())
    }

    /// Record one measurement. A no-op in at-end mode; in incremental mode
    /// the row is written and flushed immediately.
    pub fn append(&mut self, record: &MeasurementRecord) -> AppResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            write_row(writer, record)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Finish the table after a completed sweep.
    ///
    /// At-end mode creates the file and writes every record now; incremental
    /// mode only needs a final flush, its rows are already on disk.
    pub fn finish(&mut self, records: &[MeasurementRecord]) -> AppResult<()> {
        match self.mode {
            PersistMode::AtEnd => {
                let mut writer = open_table(&self.path)?;
                for record in records {
                    write_row(&mut writer, record)?;
                }
                writer.flush()?;
            }
            PersistMode::Incremental => {
                if let Some(mut writer) = self.writer.take() {
                    writer.flush()?;
                }
            }
        }
        info!(
            "Wrote {} rows to '{}'",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn open_table(path: &Path) -> AppResult<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(csv::Writer::from_writer(File::create(path)?))
}

fn write_row(writer: &mut csv::Writer<File>, record: &MeasurementRecord) -> AppResult<()> {
    writer.write_record(&[
        record.commanded_v.to_string(),
        record.measured_v.to_string(),
    ])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(commanded_v: f64, measured_v: f64) -> MeasurementRecord {
        MeasurementRecord {
            commanded_v,
            measured_v,
        }
    }

    #[test]
    fn test_at_end_mode_defers_file_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cal.csv");
        let mut writer = SweepWriter::new(&path, PersistMode::AtEnd);

        writer.begin().expect("begin");
        writer.append(&record(0.0, 0.01)).expect("append");
        assert!(!path.exists(), "at-end mode must not create the file early");

        writer
            .finish(&[record(0.0, 0.01), record(1.0, 1.02)])
            .expect("finish");
        let contents = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(contents, "0,0.01\n1,1.02\n");
    }

    #[test]
    fn test_incremental_mode_flushes_each_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cal.csv");
        let mut writer = SweepWriter::new(&path, PersistMode::Incremental);

        writer.begin().expect("begin");
        writer.append(&record(0.0, 0.5)).expect("append");

        // Visible on disk before finish.
        let contents = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(contents, "0,0.5\n");
    }

    #[test]
    fn test_no_header_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cal.csv");
        let mut writer = SweepWriter::new(&path, PersistMode::AtEnd);
        writer.finish(&[record(30.0, 29.987)]).expect("finish");

        let contents = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(contents.lines().count(), 1);
        assert_eq!(contents, "30,29.987\n");
    }
}
