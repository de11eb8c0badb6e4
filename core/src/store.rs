//! Durable record storage - append-only CSV log
//!
//! The log carries a header row and one record per row, UTF-8 encoded.
//! Appends preserve the full column superset across schema changes: columns
//! new to the incoming record are added at the end, columns present only in
//! history are null-filled. The table is rewritten to a sibling temp file
//! and renamed into place so a crash never leaves a truncated log. Writers
//! are serialized through an explicit mutex.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::record::{self, MeasurementRecord};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

pub struct ResultStore {
    records_path: PathBuf,
    template_path: Option<PathBuf>,
    log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            records_path: config.records_path.clone(),
            template_path: config.template_path.clone(),
            log_path: config.log_path.clone(),
            write_lock: Mutex::new(()),
        }
    }

    /// Append one record, merging its columns into the existing superset.
    pub fn append(&self, record: &MeasurementRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (mut headers, mut rows) = self.load_table();

        for column in record::COLUMNS {
            if !headers.iter().any(|h| h == column) {
                headers.push(column.to_string());
            }
        }

        let values = record.csv_values();
        let row: Vec<String> = headers
            .iter()
            .map(|header| {
                record::COLUMNS
                    .iter()
                    .position(|c| c == header)
                    .map(|i| values[i].clone())
                    .unwrap_or_default()
            })
            .collect();
        rows.push(row);

        self.write_table(&headers, &rows)?;
        info!("appended record #{} to {:?}", rows.len(), self.records_path);
        Ok(())
    }

    /// Every record in insertion order. An absent or unreadable log falls
    /// back to the template, then to an empty table.
    pub fn read_all(&self) -> Vec<MeasurementRecord> {
        let (headers, rows) = self.load_table();
        rows.iter()
            .map(|row| MeasurementRecord::from_row(&headers, row))
            .collect()
    }

    /// Delete the record log and the application log file. Absent files
    /// are not an error.
    pub fn erase_all(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        remove_if_present(&self.records_path)?;
        remove_if_present(&self.log_path)?;
        info!("erased record log and application log");
        Ok(())
    }

    fn load_table(&self) -> (Vec<String>, Vec<Vec<String>>) {
        match read_table(&self.records_path) {
            Ok(table) => return table,
            Err(e) => {
                if self.records_path.exists() {
                    warn!(
                        "record log {:?} unreadable ({}), falling back to template",
                        self.records_path, e
                    );
                }
            }
        }

        if let Some(template) = &self.template_path {
            match read_table(template) {
                Ok(table) => return table,
                Err(e) => warn!("template {:?} unreadable: {}", template, e),
            }
        }

        let headers = record::COLUMNS.iter().map(|c| c.to_string()).collect();
        (headers, Vec::new())
    }

    fn write_table(&self, headers: &[String], rows: &[Vec<String>]) -> Result<()> {
        let tmp_path = self.records_path.with_extension("csv.tmp");

        let mut writer = csv::Writer::from_path(&tmp_path)?;
        writer.write_record(headers)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp_path, &self.records_path)?;
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let row = result?;
        rows.push(row.iter().map(str::to_string).collect());
    }

    Ok((headers, rows))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
