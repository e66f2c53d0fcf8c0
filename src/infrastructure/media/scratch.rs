use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{info, warn};
use uuid::Uuid;

const JOB_PREFIX: &str = "job-";
const UPLOAD_PREFIX: &str = "upload-";

/// Local working area for engine input and output files.
///
/// Every job or upload gets its own directory, removed when the returned
/// `TempDir` is dropped, whichever way the owning task exits.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn create(&self, prefix: &str) -> io::Result<TempDir> {
        std::fs::create_dir_all(&self.root)?;
        tempfile::Builder::new().prefix(prefix).tempdir_in(&self.root)
    }

    pub fn job_dir(&self, video_id: Uuid) -> io::Result<TempDir> {
        self.create(&format!("{}{}-", JOB_PREFIX, video_id))
    }

    pub fn upload_dir(&self) -> io::Result<TempDir> {
        self.create(UPLOAD_PREFIX)
    }

    /// Removes job and upload directories left behind by a crashed process.
    ///
    /// Only entries untouched for `older_than` are removed, so live work of
    /// other processes sharing the root survives.
    pub fn sweep_orphans(&self, older_than: Duration) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with(JOB_PREFIX) || name.starts_with(UPLOAD_PREFIX)) {
                continue;
            }

            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_dir() {
                continue;
            }

            let age = last_activity(&entry.path(), &meta)
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }

            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove orphaned scratch dir {}: {}", name, e),
            }
        }

        if removed > 0 {
            info!(removed, "Swept orphaned scratch directories");
        }
        Ok(removed)
    }
}

/// Newest mtime of the directory and its direct entries. Writes into an
/// existing file do not touch the directory's own mtime.
fn last_activity(dir: &Path, meta: &std::fs::Metadata) -> Option<SystemTime> {
    let own = meta.modified().ok();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return own;
    };
    entries
        .flatten()
        .filter_map(|e| e.metadata().ok()?.modified().ok())
        .chain(own)
        .max()
}
