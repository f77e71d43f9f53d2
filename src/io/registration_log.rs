//! Registration log - durable append-only store of committed registrations
//!
//! Registrations are written in JSONL format (one JSON object per line).
//! The log is the source of truth: on startup it is replayed to rebuild the
//! uniqueness index and the productivity cache.

use crate::domain::types::PackageRegistration;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Append-only JSONL writer for registrations
#[derive(Debug)]
pub struct RegistrationLog {
    file_path: PathBuf,
}

impl RegistrationLog {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "registration_log_initialized");
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Append one registration and flush it to disk before returning
    pub fn append(&self, registration: &PackageRegistration) -> std::io::Result<()> {
        let line = serde_json::to_string(registration)?;

        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&self.file_path)?;
        // A torn tail from a crash must not swallow this record on replay
        if !ends_with_newline(&mut file)? {
            warn!(file = %self.file_path.display(), "registration_log_torn_tail_terminated");
            file.write_all(b"\n")?;
        }
        writeln!(file, "{}", line)?;
        file.sync_data()?;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "registration_appended");

        Ok(())
    }

    /// Read every registration in commit order
    ///
    /// A missing file is an empty log. Malformed lines (e.g. a torn final
    /// write) are skipped with a warning.
    pub fn load(&self) -> std::io::Result<Vec<PackageRegistration>> {
        let file = match File::open(&self.file_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut registrations = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PackageRegistration>(&line) {
                Ok(registration) => registrations.push(registration),
                Err(e) => {
                    warn!(
                        file = %self.file_path.display(),
                        line = %(line_no + 1),
                        error = %e,
                        "registration_log_line_skipped"
                    );
                }
            }
        }

        info!(
            file = %self.file_path.display(),
            registrations = %registrations.len(),
            "registration_log_loaded"
        );
        Ok(registrations)
    }
}

/// True for an empty file or one whose last byte is a newline
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
