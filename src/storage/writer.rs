//! Cassette file writer

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::format::{encode_interaction, Interaction};
use crate::Result;

/// Append-only writer for a cassette file
///
/// Every append reaches stable storage before it returns.
pub struct CassetteWriter {
    file: File,
    path: PathBuf,
    interaction_count: u64,
    bytes_written: u64,
}

impl CassetteWriter {
    /// Create a fresh cassette, deleting any file already at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the old file cannot be removed or the new one created
    pub fn create(path: &Path) -> Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed previous cassette {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            interaction_count: 0,
            bytes_written: 0,
        })
    }

    /// Wrap a file that is already open for writing
    #[cfg(test)]
    pub(crate) fn from_open_file(path: &Path, file: File) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            interaction_count: 0,
            bytes_written: 0,
        }
    }

    /// Append one interaction and sync it to disk
    ///
    /// A failed write is cut back to the last complete record, so the file
    /// never holds a partial line followed by later records.
    ///
    /// # Errors
    ///
    /// Returns error if encoding, writing or syncing fails
    pub fn append(&mut self, interaction: &Interaction) -> Result<()> {
        let record = encode_interaction(interaction)?;

        if let Err(e) = self
            .file
            .write_all(&record)
            .and_then(|()| self.file.sync_data())
        {
            if let Err(rollback) = self.truncate_to_committed() {
                warn!(
                    "Could not discard partial record in {}: {}",
                    self.path.display(),
                    rollback
                );
            }
            return Err(e.into());
        }

        self.interaction_count += 1;
        self.bytes_written += record.len() as u64;

        Ok(())
    }

    /// Drop anything past the last complete record and reposition there
    fn truncate_to_committed(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.bytes_written)?;
        self.file.seek(SeekFrom::Start(self.bytes_written))?;
        Ok(())
    }

    /// Number of interactions written so far
    #[must_use]
    pub fn interaction_count(&self) -> u64 {
        self.interaction_count
    }

    /// Number of bytes written so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Cassette path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the cassette file
    ///
    /// # Errors
    ///
    /// Returns error if flush fails
    pub fn finalize(mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;

        debug!(
            "Finalized cassette {}: {} interactions, {} bytes",
            self.path.display(),
            self.interaction_count,
            self.bytes_written
        );

        Ok(())
    }
}
