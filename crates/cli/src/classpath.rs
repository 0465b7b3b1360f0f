//! A host that materialises injected artifacts as a classpath directory.
//!
//! Each accepted artifact is written to `<dir>/<artifact>-<version>.jar`
//! (`-relocated.jar` when rules were applied). The resulting classpath, in
//! injection order, is what a JVM launched by the host would be given.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use artifacts::{CodeLoader, CodeSource, CodeUnitHandle, HostRejection};
use tracing::debug;

const LOCAL_FILE_HEADER: &[u8] = b"PK\x03\x04";
const EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";

/// [`CodeLoader`] backed by a directory of JAR files.
#[derive(Debug)]
pub struct ClasspathDirectory {
    dir: PathBuf,
    entries: Mutex<Vec<PathBuf>>,
}

impl ClasspathDirectory {
    /// Creates `dir` if needed.
    ///
    /// # Errors
    ///
    /// The I/O error from creating the directory.
    pub fn create(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Directory the JARs are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, in injection order.
    pub fn entries(&self) -> Vec<PathBuf> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The entries joined with the platform path separator.
    pub fn classpath(&self) -> String {
        std::env::join_paths(self.entries())
            .map(|joined| joined.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl CodeLoader for ClasspathDirectory {
    fn add_code_source(&self, source: CodeSource<'_>) -> Result<CodeUnitHandle, HostRejection> {
        if !(source.bytes.starts_with(LOCAL_FILE_HEADER) || source.bytes.starts_with(EMPTY_ARCHIVE)) {
            return Err(HostRejection::new("not a zip archive"));
        }
        let target = self.dir.join(source.coordinate.file_name(source.relocated));
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        std::fs::write(&target, source.bytes).map_err(|e| {
            HostRejection::new(format!("cannot write {}: {e}", target.display()))
        })?;
        debug!(coordinate = %source.coordinate, path = %target.display(), "Added to classpath");
        entries.push(target);
        Ok(CodeUnitHandle::new(entries.len() as u64))
    }
}
