//! One transport for a mixed repository set.

use std::sync::Arc;

use artifacts::{Repository, RepositoryKind, RepositoryTransport, TransportError};
use async_trait::async_trait;

use crate::{FileTransport, HttpConfig, HttpTransport, TransportSetupError};

/// Sends each request to the transport for the repository's kind.
#[derive(Clone)]
pub struct RoutingTransport {
    http: Arc<dyn RepositoryTransport>,
    file: Arc<dyn RepositoryTransport>,
}

impl std::fmt::Debug for RoutingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTransport").finish_non_exhaustive()
    }
}

impl RoutingTransport {
    /// Routes to the given transports.
    pub fn new(http: Arc<dyn RepositoryTransport>, file: Arc<dyn RepositoryTransport>) -> Self {
        Self { http, file }
    }

    /// [`HttpTransport`] for remote repositories, [`FileTransport`] for local ones.
    ///
    /// # Errors
    ///
    /// Returns [`TransportSetupError`] if the HTTP client cannot be built.
    pub fn standard(http: &HttpConfig) -> Result<Self, TransportSetupError> {
        Ok(Self::new(
            Arc::new(HttpTransport::new(http)?),
            Arc::new(FileTransport::new()),
        ))
    }
}

#[async_trait]
impl RepositoryTransport for RoutingTransport {
    async fn get(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, TransportError> {
        match repository.kind() {
            RepositoryKind::RemoteHttp => self.http.get(repository, path).await,
            RepositoryKind::LocalFilesystem => self.file.get(repository, path).await,
        }
    }
}
