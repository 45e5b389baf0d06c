use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::archive::ArchiveStore;
use crate::error::{Result, ServiceError};

/// A successfully resolved asset below the storage root.
#[derive(Debug)]
pub enum Asset {
    /// Open handle plus size, ready for streaming to the caller.
    File {
        path: PathBuf,
        file: File,
        size: u64,
    },
    /// Non-recursive listing of entry names.
    Directory { path: PathBuf, entries: Vec<String> },
}

/// Resolve `relative` against the storage root and serve it.
///
/// Containment is enforced before touching the filesystem: only plain path
/// segments are accepted, so absolute paths, parent-directory segments, and
/// drive prefixes can never resolve outside the root.
pub fn read_asset(store: &ArchiveStore, relative: &str) -> Result<Asset> {
    let target = store.root().join(sanitized(relative)?);
    let metadata = match fs::metadata(&target) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ServiceError::ComponentNotFound {
                path: relative.to_string(),
            });
        }
        Err(err) => return Err(ServiceError::io(&target, err)),
    };

    if metadata.is_dir() {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&target).map_err(|err| ServiceError::io(&target, err))? {
            let entry = entry.map_err(|err| ServiceError::io(&target, err))?;
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
        Ok(Asset::Directory {
            path: target,
            entries,
        })
    } else {
        let file = File::open(&target).map_err(|err| ServiceError::io(&target, err))?;
        debug!(path = %target.display(), size = metadata.len(), "serving asset file");
        Ok(Asset::File {
            path: target,
            file,
            size: metadata.len(),
        })
    }
}

fn sanitized(relative: &str) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ServiceError::PathEscapesRoot {
                    path: relative.to_string(),
                });
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ServiceError::ComponentNotFound {
            path: relative.to_string(),
        });
    }
    Ok(clean)
}
