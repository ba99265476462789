//! Build context materialization
//!
//! Unpacks the downloaded archive (gzip-compressed tar, or plain tar) into the
//! build-context directory. Extraction is all-or-nothing from the caller's
//! point of view: the first bad entry fails the whole call, though files
//! written before it stay on disk.

mod guard;

use crate::config::ExtractionConfig;
use crate::error::{Error, ExtractionError, Result, StorageError};
use flate2::read::GzDecoder;
use guard::sanitize_entry_path;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_BLOCK_SIZE: usize = 512;

/// Unpack `archive_path` into `dest_path` on the blocking thread pool
///
/// # Returns
/// * `Ok(Vec<PathBuf>)` - Paths of every entry written, in archive order
/// * `Err(Error)` - Storage error preparing the destination, or extraction error
pub async fn unpack_compressed_tar(
    archive_path: &Path,
    dest_path: &Path,
    config: &ExtractionConfig,
) -> Result<Vec<PathBuf>> {
    let archive_owned = archive_path.to_path_buf();
    let dest_owned = dest_path.to_path_buf();
    let config = config.clone();

    spawn_blocking(move || unpack_archive(&archive_owned, &dest_owned, &config))
        .await
        .map_err(|e| {
            Error::Extraction(ExtractionError::TaskPanicked(format!(
                "extraction task panicked: {}",
                e
            )))
        })?
}

/// Unpack `archive_path` into `dest_path`, creating the destination if absent
pub fn unpack_archive(
    archive_path: &Path,
    dest_path: &Path,
    config: &ExtractionConfig,
) -> Result<Vec<PathBuf>> {
    debug!(?archive_path, ?dest_path, "unpacking build context");

    std::fs::create_dir_all(dest_path).map_err(|source| StorageError::CreateDir {
        path: dest_path.to_path_buf(),
        source,
    })?;
    let dest = dest_path
        .canonicalize()
        .map_err(|source| StorageError::CreateDir {
            path: dest_path.to_path_buf(),
            source,
        })?;

    let file = File::open(archive_path).map_err(|source| ExtractionError::Open {
        archive: archive_path.to_path_buf(),
        source,
    })?;
    let archive_canonical =
        archive_path
            .canonicalize()
            .map_err(|source| ExtractionError::Open {
                archive: archive_path.to_path_buf(),
                source,
            })?;

    // A bad stream head must not cost the previous tree
    let reader = open_stream(file, archive_path)?;

    if config.clean_destination {
        clean_destination(&dest, &archive_canonical)?;
    }

    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive.set_preserve_mtime(true);

    let corrupt = |e: std::io::Error| ExtractionError::Corrupt {
        archive: archive_path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut extracted = Vec::new();
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let entry_path = entry.path().map_err(corrupt)?.into_owned();
        let relative = sanitize_entry_path(&entry_path)?;
        if relative.as_os_str().is_empty() {
            // The destination directory itself
            continue;
        }

        if entry.header().entry_type().is_hard_link() {
            if let Some(link) = entry.link_name().map_err(corrupt)? {
                sanitize_entry_path(&link)?;
            }
        }

        let target = dest.join(&relative);
        if target == archive_canonical {
            return Err(ExtractionError::UnsafePath {
                path: entry_path,
                reason: "would overwrite the archive being extracted".into(),
            }
            .into());
        }

        let unpacked = entry
            .unpack_in(&dest)
            .map_err(|e| ExtractionError::Entry {
                path: entry_path.clone(),
                reason: e.to_string(),
            })?;
        if !unpacked {
            return Err(ExtractionError::UnsafePath {
                path: entry_path,
                reason: "resolves outside the destination".into(),
            }
            .into());
        }

        debug!(path = %relative.display(), "unpacked entry");
        extracted.push(target);
    }

    info!(
        ?archive_path,
        ?dest_path,
        extracted_count = extracted.len(),
        "build context unpacked"
    );
    Ok(extracted)
}

/// Open the tar stream, wrapping `file` in a gzip decoder when it starts with
/// the gzip magic bytes.
///
/// The first tar block is read up front so a zero-length file or a broken
/// gzip header is reported before anything on disk changes.
fn open_stream(file: File, archive_path: &Path) -> Result<Box<dyn Read>> {
    let corrupt = |reason: String| ExtractionError::Corrupt {
        archive: archive_path.to_path_buf(),
        reason,
    };

    let mut reader = BufReader::new(file);
    let head = reader.fill_buf().map_err(|e| corrupt(e.to_string()))?;
    if head.is_empty() {
        return Err(corrupt("archive is empty".into()).into());
    }
    let mut stream: Box<dyn Read> = if head.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(reader))
    } else {
        debug!(?archive_path, "archive is not gzip-compressed, reading as plain tar");
        Box::new(reader)
    };

    let mut first_block = vec![0u8; TAR_BLOCK_SIZE];
    stream
        .read_exact(&mut first_block)
        .map_err(|e| corrupt(format!("unreadable first block: {e}")))?;
    Ok(Box::new(Cursor::new(first_block).chain(stream)))
}

/// Remove every entry of `dest` except `keep` and the directories containing it
fn clean_destination(dest: &Path, keep: &Path) -> std::result::Result<(), StorageError> {
    let clean_error = |path: &Path, source| StorageError::Clean {
        path: path.to_path_buf(),
        source,
    };

    for entry in std::fs::read_dir(dest).map_err(|e| clean_error(dest, e))? {
        let entry = entry.map_err(|e| clean_error(dest, e))?;
        let path = entry.path();
        if keep.starts_with(&path) {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| clean_error(&path, e))?;
        let removed = if file_type.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.map_err(|e| clean_error(&path, e))?;
        debug!(path = %path.display(), "removed stale entry");
    }
    Ok(())
}
