//! Shared value types for the Hoist dependency domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. digests are lowercase hex of the
//! right length) and participate in domain computations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{
    ArtifactDescriptor, ArtifactError, CodeUnitHandle, Coordinate, LoadSessionId, RelocationRule,
    RepositoryId, ResolutionConflict, ResolutionError,
};

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Digest algorithms understood by the downloader and the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256; preferred, and the only algorithm the cache writes.
    Sha256,
    /// SHA-1; accepted from repositories that publish nothing stronger.
    Sha1,
}

impl ChecksumAlgorithm {
    /// Algorithms in the order repositories are asked for them.
    pub const PREFERENCE: [ChecksumAlgorithm; 2] = [Self::Sha256, Self::Sha1];

    /// File extension of the sibling checksum file (`sha256`, `sha1`).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
        }
    }

    fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha1 => 40,
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "SHA-256"),
            Self::Sha1 => write!(f, "SHA-1"),
        }
    }
}

/// A content digest: algorithm plus lowercase hex value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    /// Computes the digest of `bytes`.
    pub fn compute(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> Self {
        let hex = match algorithm {
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            ChecksumAlgorithm::Sha1 => hex::encode(Sha1::digest(bytes)),
        };
        Self { algorithm, hex }
    }

    /// SHA-256 of `bytes`.
    pub fn sha256(bytes: &[u8]) -> Self {
        Self::compute(ChecksumAlgorithm::Sha256, bytes)
    }

    /// Parses a checksum file as published next to an artifact.
    ///
    /// Only the first whitespace-separated token is significant; repositories
    /// commonly append the file name (`<hex>  widget-1.0.jar`). Returns `None`
    /// if that token is not hex of the algorithm's digest length.
    pub fn parse_file(algorithm: ChecksumAlgorithm, content: &str) -> Option<Self> {
        let token = content.split_whitespace().next()?.to_ascii_lowercase();
        if token.len() != algorithm.hex_len() || !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self {
            algorithm,
            hex: token,
        })
    }

    /// Algorithm.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Returns `Ok(())` if `bytes` hash to this checksum.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ChecksumMismatch`] carrying both digests otherwise.
    pub fn verify(&self, bytes: &[u8]) -> Result<(), crate::ChecksumMismatch> {
        let actual = Self::compute(self.algorithm, bytes);
        if actual.hex == self.hex {
            Ok(())
        } else {
            Err(crate::ChecksumMismatch {
                algorithm: self.algorithm,
                expected: self.hex.clone(),
                actual: actual.hex,
            })
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.extension(), self.hex)
    }
}

// ---------------------------------------------------------------------------
// Cache fingerprint
// ---------------------------------------------------------------------------

/// Bumped whenever the relocated output for the same inputs would change.
const FINGERPRINT_FORMAT: &str = "hoist-cache-v1";

/// Cache key: SHA-256 over the coordinate identity and the ordered rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of one artifact under one ordered rule list.
    ///
    /// Fields are length-prefixed so no two distinct inputs share a preimage.
    /// The version is hashed in [`crate::Version::canonical`] form, so
    /// coordinates that compare equal share an entry.
    pub fn of(coordinate: &Coordinate, rules: &[RelocationRule]) -> Self {
        let mut hasher = Sha256::new();
        let mut feed = |field: &str| {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        };
        feed(FINGERPRINT_FORMAT);
        feed(coordinate.group().as_str());
        feed(coordinate.artifact().as_str());
        feed(&coordinate.version().canonical());
        feed(coordinate.classifier().map_or("", |c| c.as_str()));
        for rule in rules {
            feed(rule.from_prefix());
            feed(rule.to_prefix());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Lowercase hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard directory name.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Resolution output
// ---------------------------------------------------------------------------

/// Where a raw archive came from, before relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOrigin {
    /// Repository that served the archive.
    pub repository: RepositoryId,
    /// SHA-256 of the archive as downloaded.
    pub checksum: Checksum,
}

/// One member of the resolved closure.
///
/// `repository` and `checksum` are filled in once the artifact has actually
/// been fetched; the resolver only knows where the metadata came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    /// The dependency, including inherited relocation rules.
    pub descriptor: ArtifactDescriptor,
    /// Repository that served the artifact (or its metadata).
    pub repository: Option<RepositoryId>,
    /// Digest of the raw downloaded bytes.
    pub checksum: Option<Checksum>,
    /// Selected versions of this artifact's direct dependencies.
    pub dependencies: Vec<Coordinate>,
}

impl ResolvedArtifact {
    /// Creates an entry with no repository, checksum or dependencies yet.
    pub fn new(descriptor: ArtifactDescriptor) -> Self {
        Self {
            descriptor,
            repository: None,
            checksum: None,
            dependencies: Vec::new(),
        }
    }

    /// Shortcut for `self.descriptor.coordinate()`.
    pub fn coordinate(&self) -> &Coordinate {
        self.descriptor.coordinate()
    }

    /// Records the repository and raw checksum of the downloaded archive.
    #[must_use]
    pub fn with_origin(mut self, origin: &ArtifactOrigin) -> Self {
        self.repository = Some(origin.repository.clone());
        self.checksum = Some(origin.checksum.clone());
        self
    }
}

// ---------------------------------------------------------------------------
// Load results
// ---------------------------------------------------------------------------

/// Pipeline stages an artifact passes through during a load session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    /// Part of the resolved closure.
    Resolved,
    /// Served from a valid cache entry.
    Cached,
    /// Fetched from a repository.
    Downloaded,
    /// Rewritten (or passed through) by the relocator.
    Relocated,
    /// Accepted by the host's code loader.
    Injected,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Resolved => "resolved",
            Self::Cached => "cached",
            Self::Downloaded => "downloaded",
            Self::Relocated => "relocated",
            Self::Injected => "injected",
        };
        write!(f, "{s}")
    }
}

/// A successfully loaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedArtifact {
    /// Coordinate actually loaded (may differ from a requested root after
    /// conflict resolution).
    pub coordinate: Coordinate,
    /// Handle returned by the host.
    pub handle: CodeUnitHandle,
    /// Stages passed, in order.
    pub stages: Vec<LoadStage>,
    /// SHA-256 of the bytes handed to the host.
    pub checksum: Checksum,
    /// Cache file backing the injected code source.
    pub location: PathBuf,
    /// Source of the archive before relocation. `None` for cache entries
    /// written without a readable record.
    pub origin: Option<ArtifactOrigin>,
}

/// An artifact whose pipeline stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedArtifact {
    /// Coordinate that failed.
    pub coordinate: Coordinate,
    /// Stages completed before the failure.
    pub completed: Vec<LoadStage>,
    /// The originating error.
    pub error: ArtifactError,
}

/// Per-artifact outcome of a load session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    /// The artifact is available to the host.
    Loaded(LoadedArtifact),
    /// The artifact is not available; see the error.
    Failed(FailedArtifact),
}

impl LoadResult {
    /// Returns `true` for [`LoadResult::Loaded`].
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    /// Host handle, on success.
    pub fn handle(&self) -> Option<CodeUnitHandle> {
        match self {
            Self::Loaded(loaded) => Some(loaded.handle),
            Self::Failed(_) => None,
        }
    }

    /// Originating error, on failure.
    pub fn error(&self) -> Option<&ArtifactError> {
        match self {
            Self::Loaded(_) => None,
            Self::Failed(failed) => Some(&failed.error),
        }
    }

    /// Coordinate this result is about.
    pub fn coordinate(&self) -> &Coordinate {
        match self {
            Self::Loaded(loaded) => &loaded.coordinate,
            Self::Failed(failed) => &failed.coordinate,
        }
    }
}

/// Everything one load session produced.
///
/// `roots` always has one entry per requested root, keyed by the coordinate
/// the host asked for.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Correlates this report with the session's tracing spans.
    pub session: LoadSessionId,
    /// Outcome per requested root.
    pub roots: BTreeMap<Coordinate, LoadResult>,
    /// Outcome per closure member (selected versions only).
    pub members: BTreeMap<Coordinate, LoadResult>,
    /// The resolved closure, dependencies first. Members that were fetched
    /// or found in the cache carry the archive's repository and raw checksum.
    pub closure: Vec<ResolvedArtifact>,
    /// Coordinates in the order they were offered to the host.
    pub injection_order: Vec<Coordinate>,
    /// Non-fatal resolution problems.
    pub resolution_errors: Vec<ResolutionError>,
    /// Version conflicts decided by "highest version wins".
    pub conflicts: Vec<ResolutionConflict>,
}

impl LoadReport {
    /// Returns `true` if every requested root loaded.
    pub fn all_roots_loaded(&self) -> bool {
        self.roots.values().all(LoadResult::is_loaded)
    }

    /// Requested roots that failed, with their errors.
    pub fn failed_roots(&self) -> impl Iterator<Item = (&Coordinate, &ArtifactError)> {
        self.roots
            .iter()
            .filter_map(|(coordinate, result)| result.error().map(|e| (coordinate, e)))
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_known_input() {
        let sum = Checksum::sha256(b"abc");
        assert_eq!(
            sum.hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(sum.verify(b"abc").is_ok());
    }

    #[test]
    fn sha1_of_known_input() {
        let sum = Checksum::compute(ChecksumAlgorithm::Sha1, b"abc");
        assert_eq!(sum.hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn checksum_file_uses_first_token() {
        let content = "A9993E364706816ABA3E25717850C26C9CD0D89D  widget-1.0.jar\n";
        let sum = Checksum::parse_file(ChecksumAlgorithm::Sha1, content).unwrap();
        assert_eq!(sum.hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert!(sum.verify(b"abc").is_ok());
    }

    #[test]
    fn checksum_file_rejects_wrong_length_or_garbage() {
        assert!(Checksum::parse_file(ChecksumAlgorithm::Sha256, "abc123").is_none());
        assert!(Checksum::parse_file(ChecksumAlgorithm::Sha1, "").is_none());
        assert!(Checksum::parse_file(ChecksumAlgorithm::Sha1, &"z".repeat(40)).is_none());
    }

    #[test]
    fn mismatch_carries_both_digests() {
        let sum = Checksum::sha256(b"expected");
        let err = sum.verify(b"actual").unwrap_err();
        assert_eq!(err.expected, sum.hex());
        assert_eq!(err.actual, Checksum::sha256(b"actual").hex());
    }

    #[test]
    fn fingerprint_depends_on_rule_order() {
        let c: Coordinate = "com.acme:widget:1.0".parse().unwrap();
        let a = RelocationRule::new("com.acme", "x.acme").unwrap();
        let b = RelocationRule::new("org.dep", "x.dep").unwrap();
        let plain = Fingerprint::of(&c, &[]);
        let ab = Fingerprint::of(&c, &[a.clone(), b.clone()]);
        let ba = Fingerprint::of(&c, &[b, a.clone()]);
        assert_ne!(plain, ab);
        assert_ne!(ab, ba);
        assert_eq!(ab, Fingerprint::of(&c, &[a, RelocationRule::new("org.dep", "x.dep").unwrap()]));
        assert_eq!(plain.as_str().len(), 64);
        assert_eq!(plain.shard(), &plain.as_str()[..2]);
    }

    #[test]
    fn equal_coordinates_share_a_fingerprint() {
        let short: Coordinate = "com.acme:widget:1.0".parse().unwrap();
        let long: Coordinate = "com.acme:widget:1.0.0".parse().unwrap();
        let next: Coordinate = "com.acme:widget:1.0.1".parse().unwrap();
        assert_eq!(short, long);
        assert_eq!(Fingerprint::of(&short, &[]), Fingerprint::of(&long, &[]));
        assert_ne!(Fingerprint::of(&short, &[]), Fingerprint::of(&next, &[]));
    }

    #[test]
    fn origin_fills_repository_and_raw_checksum() {
        let origin = ArtifactOrigin {
            repository: RepositoryId::new("central").unwrap(),
            checksum: Checksum::sha256(b"raw"),
        };
        let member = ResolvedArtifact::new(ArtifactDescriptor::new(
            "com.acme:widget:1.0".parse().unwrap(),
        ))
        .with_origin(&origin);
        assert_eq!(member.repository, Some(origin.repository.clone()));
        assert_eq!(member.checksum, Some(origin.checksum));
    }

    #[test]
    fn fingerprint_distinguishes_classifier() {
        let plain: Coordinate = "com.acme:widget:1.0".parse().unwrap();
        let classified: Coordinate = "com.acme:widget:1.0:jdk8".parse().unwrap();
        assert_ne!(Fingerprint::of(&plain, &[]), Fingerprint::of(&classified, &[]));
    }
}
