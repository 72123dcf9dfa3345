use crate::infra::contracts::{AuditBackend, AuditError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use toolwarden_tools::AuditEvent;

/// Append-only JSON-lines audit log. One event per line, synced per write.
pub struct FileAuditBackend {
    log_path: PathBuf,
    file: Mutex<File>,
}

impl FileAuditBackend {
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self, AuditError> {
        let log_path = log_path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            log_path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

impl AuditBackend for FileAuditBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn persist(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let json = event.to_json_line()?;
        let mut file = self.file.lock();
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

/// Read every event from a JSON-lines audit log, skipping blank lines.
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<AuditEvent>, AuditError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}
