//! Error and retry-policy types for the Hoist dependency domain.
//!
//! [`LoadError`] is the only error that aborts a whole load session; it covers
//! configuration problems detected before any work starts. Everything that can
//! go wrong for a single artifact is captured as an [`ArtifactError`] and
//! attached to that artifact's [`crate::LoadResult`], so one bad dependency never
//! takes down its siblings.
//!
//! [`RetryPolicy`] is a cross-cutting concern: transport errors produce one so
//! the downloader can decide whether to retry a repository or fall through to
//! the next one.
//!
//! All per-artifact errors are `Clone` because the cache's single-flight
//! mechanism hands the same outcome to every waiter.

use std::time::Duration;

use thiserror::Error;

use crate::{ChecksumAlgorithm, CodeUnitHandle, Coordinate, ModuleKey, RepositoryId, Version};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// ## Rules
///
/// - `Retryable`: connection failures, timeouts, 5xx and 429 responses,
///   checksum mismatches (the next transfer may be clean).
/// - `NonRetryable`: the repository does not have the file (404 and other
///   4xx), or the repository kind is not supported by the transport. The
///   downloader moves on to the next repository immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// Retrying against the same repository is pointless.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Input validation
// ---------------------------------------------------------------------------

/// A coordinate or relocation rule could not be parsed from host input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {what} '{input}': {reason}")]
pub struct InvalidInput {
    /// What was being parsed (`"coordinate"`, `"relocation rule"`, ...).
    pub what: &'static str,
    /// The offending input, verbatim.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl InvalidInput {
    pub(crate) fn coordinate(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            what: "coordinate",
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn relocation(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            what: "relocation rule",
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn repository(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            what: "repository",
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// The relocation manifest produced at build time could not be read.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest is not valid JSON of the expected record shape.
    #[error("relocation manifest is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A record carried an unusable rule or coordinate component.
    #[error("relocation manifest record {index} is invalid: {source}")]
    InvalidRecord {
        /// Zero-based position of the record in the manifest.
        index: usize,
        /// Underlying validation failure.
        #[source]
        source: InvalidInput,
    },
}

/// A POM document could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PomError {
    /// The document is not well-formed XML.
    #[error("invalid XML: {reason}")]
    Xml {
        /// Parser diagnostic.
        reason: String,
    },

    /// The root element is not `<project>`.
    #[error("root element is <{root}>, expected <project>")]
    NotAProject {
        /// The root element actually found (empty for an empty document).
        root: String,
    },
}

// ---------------------------------------------------------------------------
// Transport (port) errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::RepositoryTransport`] for one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The repository does not contain the requested path.
    #[error("not found")]
    NotFound,

    /// The repository answered with a non-success status.
    #[error("HTTP status {code}")]
    Status {
        /// Numeric status code.
        code: u16,
        /// Server-requested delay (`Retry-After`), when present.
        retry_after: Option<Duration>,
    },

    /// The request never produced a response (DNS, TLS, connect, timeout).
    #[error("transport failure: {message}")]
    Connection {
        /// Human-readable cause.
        message: String,
    },

    /// Local filesystem read failure for a filesystem repository.
    #[error("I/O failure: {message}")]
    Io {
        /// Human-readable cause.
        message: String,
    },

    /// The transport cannot serve this kind of repository.
    #[error("unsupported repository location '{location}'")]
    Unsupported {
        /// The repository base location.
        location: String,
    },
}

impl TransportError {
    /// Classifies the error for the downloader's retry loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::NotFound | Self::Unsupported { .. } => RetryPolicy::NonRetryable,
            Self::Status { code, retry_after } => {
                if *code == 429 || *code >= 500 {
                    RetryPolicy::Retryable {
                        after: *retry_after,
                    }
                } else {
                    RetryPolicy::NonRetryable
                }
            }
            Self::Connection { .. } | Self::Io { .. } => RetryPolicy::Retryable { after: None },
        }
    }
}

/// Transferred bytes did not match the repository's published checksum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{algorithm} checksum mismatch: expected {expected}, actual {actual}")]
pub struct ChecksumMismatch {
    /// Algorithm of the published checksum.
    pub algorithm: ChecksumAlgorithm,
    /// Hex digest published by the repository.
    pub expected: String,
    /// Hex digest of the bytes actually received.
    pub actual: String,
}

/// Why one repository could not supply a file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceFailureReason {
    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The transfer succeeded but the content was corrupt.
    #[error(transparent)]
    ChecksumMismatch(#[from] ChecksumMismatch),
}

/// Diagnostic record of one repository's failure to supply a file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{repository} ({attempts} attempt(s)): {reason}")]
pub struct SourceFailure {
    /// The repository that was tried.
    pub repository: RepositoryId,
    /// How many attempts were made against it.
    pub attempts: u32,
    /// The last failure observed.
    pub reason: SourceFailureReason,
}

fn join_failures(failures: &[SourceFailure]) -> String {
    if failures.is_empty() {
        return "no repository was eligible".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A non-fatal problem found while computing the transitive closure.
///
/// The resolver keeps going after every one of these; the affected node stays
/// in the closure (without expanding its children) or the affected edge is
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No repository could supply the node's metadata (POM).
    #[error("metadata unavailable for {coordinate}: {}", join_failures(.failures))]
    MetadataUnavailable {
        /// The node whose metadata is missing.
        coordinate: Coordinate,
        /// Per-repository failure reasons.
        failures: Vec<SourceFailure>,
    },

    /// The metadata was fetched but could not be parsed.
    #[error("metadata for {coordinate} is malformed: {reason}")]
    MalformedMetadata {
        /// The node whose metadata is malformed.
        coordinate: Coordinate,
        /// Parser diagnostic.
        reason: String,
    },

    /// A declared dependency has no usable version (unmanaged, uninterpolated,
    /// or a version range).
    #[error("{declared_by} declares {module} with unresolvable version {version:?}")]
    UnresolvableVersion {
        /// The node whose metadata declared the dependency.
        declared_by: Coordinate,
        /// The dependency's group and artifact.
        module: ModuleKey,
        /// The raw version text, if any was declared.
        version: Option<String>,
    },

    /// A descriptor names a repository override that is not configured.
    #[error("{coordinate} requests unknown repository '{repository}'")]
    UnknownRepository {
        /// The descriptor with the override.
        coordinate: Coordinate,
        /// The missing repository id.
        repository: RepositoryId,
    },

    /// Resolution was cancelled before this node was expanded.
    #[error("resolution of {coordinate} was cancelled")]
    Cancelled {
        /// The node that was not expanded.
        coordinate: Coordinate,
    },
}

/// Note recorded when two versions of one module were discovered.
///
/// Not an error: the policy is deterministic (highest version wins). Kept so
/// the host can audit which versions were demoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionConflict {
    /// The module (group + artifact) that had competing versions.
    pub module: ModuleKey,
    /// The version that was kept.
    pub selected: Version,
    /// The version that was dropped.
    pub demoted: Version,
}

impl std::fmt::Display for ResolutionConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: selected {} over {}",
            self.module, self.selected, self.demoted
        )
    }
}

// ---------------------------------------------------------------------------
// Per-artifact pipeline errors
// ---------------------------------------------------------------------------

/// The downloader could not obtain an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// Every eligible repository was tried and failed.
    #[error("all sources failed for {coordinate}: {}", join_failures(.failures))]
    AllSourcesFailed {
        /// The artifact being fetched.
        coordinate: Coordinate,
        /// Per-repository failure reasons, in the order tried.
        failures: Vec<SourceFailure>,
    },

    /// The fetch was cancelled at a checkpoint.
    #[error("download of {coordinate} was cancelled")]
    Cancelled {
        /// The artifact being fetched.
        coordinate: Coordinate,
    },
}

/// The relocator could not rewrite an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelocationError {
    /// The bytes are not a recognised archive format.
    #[error("unsupported archive format")]
    UnsupportedFormat,

    /// The archive, or a code unit inside it, could not be parsed.
    #[error("corrupt archive: {reason}")]
    CorruptArchive {
        /// Parser diagnostic, including the entry name where known.
        reason: String,
    },

    /// The rewritten archive could not be assembled (e.g. two entries
    /// relocated onto the same name).
    #[error("failed to write relocated archive: {reason}")]
    WriteFailed {
        /// Writer diagnostic.
        reason: String,
    },
}

/// The cache store could not persist or read an entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// An entry file could not be written or committed.
    #[error("cache write failed at {path}: {reason}")]
    WriteFailed {
        /// The path that failed.
        path: String,
        /// I/O diagnostic.
        reason: String,
    },

    /// The producer returned zero bytes; nothing is cached.
    #[error("producer returned an empty artifact for {coordinate}")]
    EmptyArtifact {
        /// The artifact being produced.
        coordinate: Coordinate,
    },
}

/// The host refused, or had already accepted, a code source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectionError {
    /// The host's code-loading capability rejected the artifact.
    #[error("host rejected {coordinate}: {reason}")]
    IncompatibleHost {
        /// The artifact offered to the host.
        coordinate: Coordinate,
        /// The host's explanation.
        reason: String,
    },

    /// An artifact with the same identity was already injected this session.
    ///
    /// Carries the handle from the first injection so callers can treat the
    /// duplicate as a no-op.
    #[error("{coordinate} is already loaded as {handle}")]
    AlreadyLoaded {
        /// The duplicate artifact.
        coordinate: Coordinate,
        /// Handle returned by the first successful injection.
        handle: CodeUnitHandle,
    },
}

/// Everything that can end one artifact's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    /// Fetching the raw bytes failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Rewriting namespaces failed.
    #[error(transparent)]
    Relocation(#[from] RelocationError),

    /// Persisting or reading the cache entry failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The host refused the artifact.
    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// The session was cancelled before this artifact finished.
    #[error("load of {coordinate} was cancelled")]
    Cancelled {
        /// The artifact that did not finish.
        coordinate: Coordinate,
    },
}

// ---------------------------------------------------------------------------
// Session-level errors
// ---------------------------------------------------------------------------

/// Errors that abort a whole load session before any artifact is processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The session configuration is unusable.
    ///
    /// Produced before resolution starts; no artifact work happens.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}
