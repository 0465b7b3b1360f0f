//! Port traits: the seams between the domain and the outside world.
//!
//! The engine depends only on these traits. Infrastructure crates implement
//! them; tests implement them with in-memory fakes.
//!
//! | Port | Implemented by |
//! |------|----------------|
//! | [`RepositoryTransport`] | `repository::HttpTransport`, `repository::FileTransport`, `repository::RoutingTransport` |
//! | [`ArchiveRelocator`] | `relocator::JarRelocator` |
//! | [`CodeLoader`] | the host (the `hoist` binary ships a classpath-directory loader) |

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::{CodeUnitHandle, Coordinate, RelocationError, RelocationRule, Repository, TransportError};

/// Reads files from one kind of repository.
///
/// Implementations are stateless with respect to retries: the downloader owns
/// the retry loop and calls `get` once per attempt.
#[async_trait]
pub trait RepositoryTransport: Send + Sync {
    /// Fetches `path` (repository-relative, Maven layout) from `repository`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotFound`] if the repository does not have the file.
    /// - [`TransportError::Status`] for any other unsuccessful response.
    /// - [`TransportError::Connection`] / [`TransportError::Io`] if no response
    ///   was obtained.
    /// - [`TransportError::Unsupported`] if this transport cannot reach the
    ///   repository's kind.
    async fn get(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, TransportError>;
}

/// Rewrites package namespaces inside one archive format.
///
/// Pure and synchronous: the engine runs it on a blocking thread.
pub trait ArchiveRelocator: Send + Sync {
    /// Applies `rules` (first match wins per symbol) to `archive`.
    ///
    /// An empty rule list returns the input unchanged.
    ///
    /// # Errors
    ///
    /// [`RelocationError::UnsupportedFormat`] if the bytes are not an archive
    /// this relocator understands, [`RelocationError::CorruptArchive`] if the
    /// structure cannot be parsed.
    fn relocate(&self, archive: &[u8], rules: &[RelocationRule])
        -> Result<Vec<u8>, RelocationError>;
}

/// A finished artifact offered to the host.
#[derive(Debug, Clone, Copy)]
pub struct CodeSource<'a> {
    /// Identity of the artifact.
    pub coordinate: &'a Coordinate,
    /// Archive bytes as they should be loaded.
    pub bytes: &'a [u8],
    /// Durable on-disk copy of `bytes` in the cache, for hosts that load
    /// from files rather than memory.
    pub location: Option<&'a Path>,
    /// `true` if relocation rules were applied to `bytes`.
    pub relocated: bool,
}

/// The host declined a code source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct HostRejection {
    /// The host's explanation.
    pub reason: String,
}

impl HostRejection {
    /// Creates a rejection with the given explanation.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The host's capability to add code to its live lookup path.
///
/// The engine serialises calls, so implementations need not be re-entrant.
pub trait CodeLoader: Send + Sync {
    /// Makes `source` available to the running process.
    ///
    /// # Errors
    ///
    /// Returns [`HostRejection`] if the host cannot accept the source.
    fn add_code_source(&self, source: CodeSource<'_>) -> Result<CodeUnitHandle, HostRejection>;
}
