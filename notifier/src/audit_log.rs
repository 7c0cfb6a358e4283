use crate::config::AuditLogConfig;
use crate::errors::NotifyError;
use crate::event::NotificationEvent;
use crate::metrics_defs::AUDIT_LOG_ROTATIONS;
use parking_lot::Mutex;
use shared::counter;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Append-only JSON-lines file with size based rotation.
///
/// When the live file has reached `max_bytes`, it is renamed to `<path>.1`,
/// older generations shift up by one, and anything past `max_files` is
/// deleted.
pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    // Serializes rotation and appends within the process.
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(config: &AuditLogConfig) -> Self {
        AuditLog {
            path: config.path.clone(),
            max_bytes: config.max_bytes,
            max_files: config.max_files,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of rotated generation `n` (1 is the most recent).
    pub fn generation_path(&self, n: usize) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    pub fn append(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.lock.lock();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        if self.needs_rotation()? {
            self.rotate()?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Events in the live file, oldest first. Lines that do not parse are skipped.
    pub fn read_events(&self) -> Result<Vec<NotificationEvent>, NotifyError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::debug!(error = %e, "skipping unreadable audit log line"),
            }
        }
        Ok(events)
    }

    fn needs_rotation(&self) -> io::Result<bool> {
        match fs::metadata(&self.path) {
            Ok(metadata) => Ok(metadata.len() >= self.max_bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn rotate(&self) -> io::Result<()> {
        if self.max_files == 0 {
            return fs::remove_file(&self.path);
        }

        remove_if_exists(&self.generation_path(self.max_files))?;
        for n in (1..self.max_files).rev() {
            let from = self.generation_path(n);
            if from.exists() {
                fs::rename(&from, self.generation_path(n + 1))?;
            }
        }
        fs::rename(&self.path, self.generation_path(1))?;

        counter!(AUDIT_LOG_ROTATIONS).increment(1);
        tracing::info!(path = %self.path.display(), "rotated audit log");
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
