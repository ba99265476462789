//! Entry path validation
//!
//! Archive entry names are untrusted. A name is accepted only if, read as a
//! path relative to the destination, it never climbs above it.

use crate::error::ExtractionError;
use std::path::{Component, Path, PathBuf};

/// Reduce an entry name to a path relative to the destination.
///
/// Leading `/` and `.` components are dropped (the way GNU tar strips them);
/// any `..` component is rejected. An empty result means the entry names the
/// destination itself.
pub(crate) fn sanitize_entry_path(path: &Path) -> Result<PathBuf, ExtractionError> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir => {
                return Err(ExtractionError::UnsafePath {
                    path: path.to_path_buf(),
                    reason: "contains a parent directory component".into(),
                });
            }
            Component::Prefix(_) => {
                return Err(ExtractionError::UnsafePath {
                    path: path.to_path_buf(),
                    reason: "carries a drive or UNC prefix".into(),
                });
            }
        }
    }
    Ok(relative)
}
