//! Local Maven layouts such as `~/.m2/repository`.

use std::io::ErrorKind;
use std::path::{Component, Path};

use artifacts::{Repository, RepositoryTransport, TransportError};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Reads repository files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    /// Creates a transport. It holds no state; every call reads the disk.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RepositoryTransport for FileTransport {
    #[instrument(skip(self, repository), fields(repository = %repository.id()))]
    async fn get(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, TransportError> {
        let root = repository
            .local_root()
            .ok_or_else(|| TransportError::Unsupported {
                location: repository.base().to_string(),
            })?;
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(TransportError::Io {
                message: format!("'{path}' escapes the repository root"),
            });
        }
        let file = root.join(relative);
        match tokio::fs::read(&file).await {
            Ok(bytes) => {
                debug!(file = %file.display(), size = bytes.len(), "Read repository file");
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TransportError::NotFound),
            Err(e) => Err(TransportError::Io {
                message: format!("{}: {e}", file.display()),
            }),
        }
    }
}
