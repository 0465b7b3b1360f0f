//! Fetches repository files with retry, checksum verification and
//! fall-through across repositories.
//!
//! Repositories are tried strictly in priority order. Each one gets up to
//! [`RetrySchedule::attempts`] attempts with exponential back-off for
//! retryable failures; a non-retryable failure (404, unsupported repository)
//! moves on to the next repository at once. Every failure is recorded so the
//! final [`DownloadError::AllSourcesFailed`] explains each repository.
//!
//! After a successful transfer the repository's sibling checksum file is
//! consulted (`.sha256`, then `.sha1`). A mismatch counts as a failed,
//! retryable attempt, and so does a checksum file that exists but could not
//! be fetched. Only when every checksum file is absent (404) are the bytes
//! accepted unverified.

use std::sync::Arc;
use std::time::Duration;

use artifacts::{
    ArtifactDescriptor, Checksum, ChecksumAlgorithm, ChecksumMismatch, Coordinate, DownloadError,
    Repository, RepositoryId, RepositorySet, RepositoryTransport, RetryPolicy, SourceFailure,
    SourceFailureReason, TransportError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Per-repository retry budget and back-off curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Attempts per repository, including the first. Values below 1 count as 1.
    pub attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub base_delay: Duration,
    /// Upper bound for any single delay, including server-requested ones.
    pub max_delay: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetrySchedule {
    /// A schedule that never sleeps between attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Back-off after `failed_attempts` consecutive failures (1-based).
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }

    fn budget(&self) -> u32 {
        self.attempts.max(1)
    }
}

/// A file obtained from one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// The file content.
    pub bytes: Vec<u8>,
    /// The repository that served it.
    pub repository: RepositoryId,
    /// SHA-256 of `bytes`.
    pub checksum: Checksum,
    /// Published checksum the bytes were verified against, if any.
    pub verified_with: Option<ChecksumAlgorithm>,
}

enum Attempt {
    Fetched(Fetched),
    Failed(SourceFailure),
    Cancelled,
}

enum Verification {
    Verified(Option<ChecksumAlgorithm>),
    Mismatch(ChecksumMismatch),
    SidecarFailed(TransportError),
    Cancelled,
}

/// Fetches artifacts and metadata through a [`RepositoryTransport`].
pub struct Downloader {
    transport: Arc<dyn RepositoryTransport>,
    repositories: Arc<RepositorySet>,
    schedule: RetrySchedule,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("repositories", &self.repositories)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader over `repositories`.
    pub fn new(
        transport: Arc<dyn RepositoryTransport>,
        repositories: Arc<RepositorySet>,
        schedule: RetrySchedule,
    ) -> Self {
        Self {
            transport,
            repositories,
            schedule,
        }
    }

    /// The configured repositories.
    pub fn repositories(&self) -> &RepositorySet {
        &self.repositories
    }

    /// Fetches the artifact file named by `descriptor`.
    ///
    /// Honours the descriptor's repository override; an override naming an
    /// unknown repository leaves no candidates and fails with an empty
    /// failure list.
    ///
    /// # Errors
    ///
    /// [`DownloadError::AllSourcesFailed`] if no repository supplied verified
    /// bytes, [`DownloadError::Cancelled`] if `cancel` fired first.
    #[instrument(skip_all, fields(coordinate = %descriptor.coordinate()))]
    pub async fn fetch(
        &self,
        descriptor: &ArtifactDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Fetched, DownloadError> {
        let candidates = self.repositories.candidates_for(descriptor);
        let path = descriptor.coordinate().jar_path();
        let fetched = self
            .fetch_file(descriptor.coordinate(), &candidates, &path, cancel)
            .await?;
        debug!(
            repository = %fetched.repository,
            checksum = %fetched.checksum,
            verified_with = ?fetched.verified_with,
            bytes = fetched.bytes.len(),
            "Downloaded artifact"
        );
        Ok(fetched)
    }

    /// Fetches `path` from the first of `candidates` able to supply it.
    ///
    /// # Errors
    ///
    /// As for [`Downloader::fetch`]; `coordinate` only labels the error.
    pub async fn fetch_file(
        &self,
        coordinate: &Coordinate,
        candidates: &[&Repository],
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Fetched, DownloadError> {
        let mut failures = Vec::new();
        for repository in candidates {
            match self.fetch_from(repository, path, cancel).await {
                Attempt::Fetched(fetched) => return Ok(fetched),
                Attempt::Failed(failure) => {
                    debug!(%failure, path, "Repository could not supply file");
                    failures.push(failure);
                }
                Attempt::Cancelled => {
                    return Err(DownloadError::Cancelled {
                        coordinate: coordinate.clone(),
                    })
                }
            }
        }
        Err(DownloadError::AllSourcesFailed {
            coordinate: coordinate.clone(),
            failures,
        })
    }

    async fn fetch_from(
        &self,
        repository: &Repository,
        path: &str,
        cancel: &CancellationToken,
    ) -> Attempt {
        let mut attempts = 0;
        loop {
            if cancel.is_cancelled() {
                return Attempt::Cancelled;
            }
            attempts += 1;

            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Attempt::Cancelled,
                response = self.transport.get(repository, path) => response,
            };

            let (reason, policy) = match response {
                Ok(bytes) => match self.verify(repository, path, &bytes, cancel).await {
                    Verification::Verified(verified_with) => {
                        return Attempt::Fetched(Fetched {
                            checksum: Checksum::sha256(&bytes),
                            bytes,
                            repository: repository.id().clone(),
                            verified_with,
                        })
                    }
                    Verification::Mismatch(mismatch) => {
                        warn!(repository = %repository.id(), path, %mismatch, "Checksum mismatch");
                        (
                            SourceFailureReason::from(mismatch),
                            RetryPolicy::Retryable { after: None },
                        )
                    }
                    Verification::SidecarFailed(error) => {
                        let after = match error.retry_policy() {
                            RetryPolicy::Retryable { after } => after,
                            RetryPolicy::NonRetryable => None,
                        };
                        (
                            SourceFailureReason::from(error),
                            RetryPolicy::Retryable { after },
                        )
                    }
                    Verification::Cancelled => return Attempt::Cancelled,
                },
                Err(error) => {
                    let policy = error.retry_policy();
                    (SourceFailureReason::from(error), policy)
                }
            };

            let delay = match policy {
                RetryPolicy::Retryable { after } if attempts < self.schedule.budget() => after
                    .unwrap_or_else(|| self.schedule.delay_after(attempts))
                    .min(self.schedule.max_delay),
                _ => {
                    return Attempt::Failed(SourceFailure {
                        repository: repository.id().clone(),
                        attempts,
                        reason,
                    })
                }
            };

            debug!(
                repository = %repository.id(),
                path,
                attempt = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %reason,
                "Retrying"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Attempt::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn verify(
        &self,
        repository: &Repository,
        path: &str,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Verification {
        for algorithm in ChecksumAlgorithm::PREFERENCE {
            let sidecar = format!("{path}.{}", algorithm.extension());
            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => return Verification::Cancelled,
                response = self.transport.get(repository, &sidecar) => response,
            };
            let content = match response {
                Ok(content) => content,
                Err(TransportError::NotFound) => continue,
                Err(error) => {
                    warn!(repository = %repository.id(), sidecar, %error, "Checksum file unavailable");
                    return Verification::SidecarFailed(error);
                }
            };
            let Some(expected) = Checksum::parse_file(algorithm, &String::from_utf8_lossy(&content))
            else {
                warn!(repository = %repository.id(), sidecar, "Ignoring unparseable checksum file");
                continue;
            };
            return match expected.verify(bytes) {
                Ok(()) => Verification::Verified(Some(algorithm)),
                Err(mismatch) => Verification::Mismatch(mismatch),
            };
        }
        debug!(repository = %repository.id(), path, "No published checksum, accepting unverified");
        Verification::Verified(None)
    }
}
