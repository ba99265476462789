//! Local archive file with positional writes

use crate::error::StorageError;
use std::fs::File;
use std::path::{Path, PathBuf};

/// The local archive file being filled by concurrent range transfers.
///
/// Uses positional writes (`pwrite` on Unix, `seek_write` on Windows) which take
/// `&self`, so ranges write to their own offsets without a lock. Ranges never
/// overlap.
pub(crate) struct ArchiveFile {
    path: PathBuf,
    file: File,
}

impl ArchiveFile {
    /// Create or truncate the archive file (mode 0600 on Unix)
    pub(crate) fn create(path: &Path) -> Result<Self, StorageError> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options
            .open(path)
            .map_err(|source| StorageError::CreateFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Size the file to the object length up front
    pub(crate) fn preallocate(&self, len: u64) -> Result<(), StorageError> {
        self.file
            .set_len(len)
            .map_err(|source| self.write_error(0, source))
    }

    /// Write `buf` at `offset`
    pub(crate) fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        write_all_at(&self.file, buf, offset).map_err(|source| self.write_error(offset, source))
    }

    /// Flush file contents to disk
    pub(crate) fn sync(&self) -> Result<(), StorageError> {
        self.file
            .sync_all()
            .map_err(|source| self.write_error(0, source))
    }

    fn write_error(&self, offset: u64, source: std::io::Error) -> StorageError {
        StorageError::Write {
            path: self.path.clone(),
            offset,
            source,
        }
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < buf.len() {
        let n = file.seek_write(&buf[written..], offset + written as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "failed to write whole buffer",
            ));
        }
        written += n;
    }
    Ok(())
}
