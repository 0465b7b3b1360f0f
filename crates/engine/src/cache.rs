//! Durable store of relocated artifacts, keyed by [`Fingerprint`].
//!
//! Each entry is a directory:
//!
//! ```text
//! <root>/<shard>/<fingerprint>/
//!     artifact.jar          relocated bytes
//!     entry.json            CacheEntryRecord
//!     artifact.jar.sha256   SHA-256 of artifact.jar; written last
//! <root>/metadata/<shard>/<fingerprint>/
//!     project.pom           POM as served by the repository
//!     source.json           MetadataRecord
//!     project.pom.sha256    SHA-256 of project.pom; written last
//! ```
//!
//! The checksum file is the commit marker: an entry without one is
//! incomplete and treated as a miss, and an entry whose bytes no longer match
//! it is evicted and rebuilt. Every file is written to a temporary name in the
//! entry directory and renamed into place. Metadata entries are keyed by the
//! coordinate alone and follow the same commit protocol.
//!
//! Within one process, concurrent [`CacheStore::get_or_create`] calls for the
//! same fingerprint run the producer once; the others wait and read the
//! committed entry.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use artifacts::{
    ArtifactDescriptor, ArtifactError, ArtifactOrigin, CacheError, Checksum, ChecksumAlgorithm,
    Coordinate, Fingerprint, RelocationRule, RepositoryId, Timestamp,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Relocated archive inside an entry directory.
pub const ARTIFACT_FILE: &str = "artifact.jar";
/// Commit marker holding the SHA-256 of [`ARTIFACT_FILE`].
pub const CHECKSUM_FILE: &str = "artifact.jar.sha256";
/// JSON [`CacheEntryRecord`].
pub const RECORD_FILE: &str = "entry.json";
/// Subdirectory of the root holding POM entries.
pub const METADATA_DIR: &str = "metadata";
/// POM inside a metadata entry directory.
pub const POM_FILE: &str = "project.pom";
/// Commit marker holding the SHA-256 of [`POM_FILE`].
pub const POM_CHECKSUM_FILE: &str = "project.pom.sha256";
/// JSON [`MetadataRecord`].
pub const POM_RECORD_FILE: &str = "source.json";

/// Where a [`CachedArtifact`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    /// A valid committed entry already existed.
    Hit,
    /// The producer ran and its output was committed.
    Produced,
}

/// A committed cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    /// Relocated archive bytes.
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`.
    pub checksum: Checksum,
    /// Path of the archive file.
    pub path: PathBuf,
    /// Entry key.
    pub fingerprint: Fingerprint,
    /// Hit or freshly produced.
    pub source: CacheSource,
    /// Where the raw archive came from, when recorded.
    pub origin: Option<ArtifactOrigin>,
}

/// What a [`CacheStore::get_or_create`] producer returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Produced {
    /// Relocated archive bytes to commit.
    pub bytes: Vec<u8>,
    /// The raw archive these bytes were built from.
    pub origin: ArtifactOrigin,
}

/// Metadata stored next to each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryRecord {
    /// Artifact identity.
    pub coordinate: Coordinate,
    /// Rules the archive was relocated with, in order.
    pub relocations: Vec<RelocationRule>,
    /// Entry key.
    pub fingerprint: Fingerprint,
    /// SHA-256 of the archive.
    pub checksum: Checksum,
    /// Archive size in bytes.
    pub size: u64,
    /// Repository and raw checksum of the downloaded archive.
    #[serde(default)]
    pub origin: Option<ArtifactOrigin>,
    /// When the entry was committed.
    pub created_at: Timestamp,
}

/// Metadata stored next to each cached POM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Whose POM this is.
    pub coordinate: Coordinate,
    /// Repository that served it.
    pub repository: RepositoryId,
    /// When the entry was committed.
    pub created_at: Timestamp,
}

/// A committed POM entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMetadata {
    /// POM bytes, verified against the entry's marker.
    pub bytes: Vec<u8>,
    /// Repository that originally served them.
    pub repository: RepositoryId,
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Removes a fingerprint's gate from the in-flight table once its last user
/// is done, including when the owning future is dropped.
struct InFlight<'a> {
    store: &'a CacheStore,
    fingerprint: &'a Fingerprint,
    gate: Gate,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut table = self
            .store
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let last_user = table
            .get(self.fingerprint)
            .is_some_and(|g| Arc::ptr_eq(g, &self.gate) && Arc::strong_count(&self.gate) <= 2);
        if last_user {
            table.remove(self.fingerprint);
        }
    }
}

fn write_failed(path: &Path, error: impl std::fmt::Display) -> CacheError {
    CacheError::WriteFailed {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}

/// Fingerprint-keyed artifact store rooted at one directory.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    in_flight: Mutex<HashMap<Fingerprint, Gate>>,
}

impl CacheStore {
    /// Opens a store at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the entry for `fingerprint`.
    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.shard()).join(fingerprint.as_str())
    }

    /// Directory of the POM entry for `coordinate`.
    pub fn metadata_dir(&self, coordinate: &Coordinate) -> PathBuf {
        let fingerprint = Fingerprint::of(coordinate, &[]);
        self.root
            .join(METADATA_DIR)
            .join(fingerprint.shard())
            .join(fingerprint.as_str())
    }

    /// Number of fingerprints with a producer running or waiters queued.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Reads a valid committed entry without producing one.
    pub async fn lookup(
        &self,
        coordinate: &Coordinate,
        rules: &[RelocationRule],
    ) -> Option<CachedArtifact> {
        let fingerprint = Fingerprint::of(coordinate, rules);
        self.read_committed(&fingerprint, false).await
    }

    /// Reads the metadata record of an entry.
    pub async fn record(&self, fingerprint: &Fingerprint) -> Option<CacheEntryRecord> {
        let path = self.entry_dir(fingerprint).join(RECORD_FILE);
        let json = fs::read(&path).await.ok()?;
        serde_json::from_slice(&json)
            .map_err(|e| debug!(path = %path.display(), error = %e, "Unreadable cache record"))
            .ok()
    }

    /// Reads a committed POM entry. Missing, incomplete or corrupt entries are
    /// misses; the next [`CacheStore::store_metadata`] replaces them.
    pub async fn metadata(&self, coordinate: &Coordinate) -> Option<CachedMetadata> {
        let dir = self.metadata_dir(coordinate);
        let marker = fs::read_to_string(dir.join(POM_CHECKSUM_FILE)).await.ok()?;
        let Some(expected) = Checksum::parse_file(ChecksumAlgorithm::Sha256, &marker) else {
            warn!(entry = %dir.display(), "Malformed metadata checksum file");
            return None;
        };
        let bytes = fs::read(dir.join(POM_FILE)).await.ok()?;
        if let Err(mismatch) = expected.verify(&bytes) {
            warn!(entry = %dir.display(), %mismatch, "Corrupt metadata entry");
            return None;
        }
        let record = fs::read(dir.join(POM_RECORD_FILE)).await.ok()?;
        let record: MetadataRecord = serde_json::from_slice(&record)
            .map_err(|e| debug!(entry = %dir.display(), error = %e, "Unreadable metadata record"))
            .ok()?;
        Some(CachedMetadata {
            bytes,
            repository: record.repository,
        })
    }

    /// Commits the POM of `coordinate` as served by `repository`.
    ///
    /// # Errors
    ///
    /// [`CacheError::WriteFailed`] if the entry cannot be written.
    pub async fn store_metadata(
        &self,
        coordinate: &Coordinate,
        repository: &RepositoryId,
        bytes: &[u8],
    ) -> Result<(), CacheError> {
        let dir = self.metadata_dir(coordinate);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_failed(&dir, e))?;
        remove_marker(&dir.join(POM_CHECKSUM_FILE)).await?;

        write_atomically(&dir, POM_FILE, bytes).await?;
        let record = MetadataRecord {
            coordinate: coordinate.clone(),
            repository: repository.clone(),
            created_at: Timestamp::now(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| write_failed(&dir.join(POM_RECORD_FILE), e))?;
        write_atomically(&dir, POM_RECORD_FILE, &json).await?;

        let marker = format!("{}  {POM_FILE}\n", Checksum::sha256(bytes).hex());
        write_atomically(&dir, POM_CHECKSUM_FILE, marker.as_bytes()).await?;
        debug!(%coordinate, %repository, "Cached metadata");
        Ok(())
    }

    /// Returns the entry for `descriptor` under `rules`, running `producer`
    /// to build it on a miss.
    ///
    /// The producer's output is committed before this returns, so a later
    /// call (in this process or another) is a hit.
    ///
    /// # Errors
    ///
    /// - Whatever the producer returns, unchanged; nothing is cached.
    /// - [`CacheError::EmptyArtifact`] if the producer returns no bytes.
    /// - [`CacheError::WriteFailed`] if the entry cannot be committed.
    #[instrument(
        skip_all,
        fields(coordinate = %descriptor.coordinate(), fingerprint = tracing::field::Empty)
    )]
    pub async fn get_or_create<F, Fut>(
        &self,
        descriptor: &ArtifactDescriptor,
        rules: &[RelocationRule],
        producer: F,
    ) -> Result<CachedArtifact, ArtifactError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Produced, ArtifactError>>,
    {
        let coordinate = descriptor.coordinate();
        let fingerprint = Fingerprint::of(coordinate, rules);
        tracing::Span::current().record("fingerprint", fingerprint.as_str());

        if let Some(hit) = self.read_committed(&fingerprint, false).await {
            debug!("Cache hit");
            return Ok(hit);
        }

        let gate = Arc::clone(
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(fingerprint.clone())
                .or_default(),
        );
        let in_flight = InFlight {
            store: self,
            fingerprint: &fingerprint,
            gate,
        };
        let _exclusive = in_flight.gate.lock().await;

        if let Some(hit) = self.read_committed(&fingerprint, true).await {
            debug!("Cache hit after waiting for producer");
            return Ok(hit);
        }

        let Produced { bytes, origin } = producer().await?;
        if bytes.is_empty() {
            return Err(CacheError::EmptyArtifact {
                coordinate: coordinate.clone(),
            }
            .into());
        }
        let checksum = self
            .commit(&fingerprint, coordinate, rules, &bytes, &origin)
            .await?;
        info!(bytes = bytes.len(), %checksum, repository = %origin.repository, "Cached artifact");

        Ok(CachedArtifact {
            bytes,
            checksum,
            path: self.entry_dir(&fingerprint).join(ARTIFACT_FILE),
            fingerprint: fingerprint.clone(),
            source: CacheSource::Produced,
            origin: Some(origin),
        })
    }

    /// Reads and verifies a committed entry. With `evict`, entries that fail
    /// verification are deleted; callers pass it only while holding the
    /// fingerprint's gate.
    async fn read_committed(&self, fingerprint: &Fingerprint, evict: bool) -> Option<CachedArtifact> {
        let dir = self.entry_dir(fingerprint);
        let marker = match fs::read_to_string(dir.join(CHECKSUM_FILE)).await {
            Ok(marker) => marker,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(entry = %dir.display(), error = %e, "Unreadable checksum file");
                return self.discard(&dir, evict).await;
            }
        };
        let Some(expected) = Checksum::parse_file(ChecksumAlgorithm::Sha256, &marker) else {
            warn!(entry = %dir.display(), "Malformed checksum file");
            return self.discard(&dir, evict).await;
        };
        let path = dir.join(ARTIFACT_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(entry = %dir.display(), error = %e, "Committed entry has no readable archive");
                return self.discard(&dir, evict).await;
            }
        };
        if let Err(mismatch) = expected.verify(&bytes) {
            warn!(entry = %dir.display(), %mismatch, "Corrupt cache entry");
            return self.discard(&dir, evict).await;
        }
        let origin = self.record(fingerprint).await.and_then(|r| r.origin);
        Some(CachedArtifact {
            bytes,
            checksum: expected,
            path,
            fingerprint: fingerprint.clone(),
            source: CacheSource::Hit,
            origin,
        })
    }

    async fn discard(&self, dir: &Path, evict: bool) -> Option<CachedArtifact> {
        if evict {
            match fs::remove_dir_all(dir).await {
                Ok(()) => info!(entry = %dir.display(), "Evicted cache entry"),
                Err(e) => warn!(entry = %dir.display(), error = %e, "Failed to evict cache entry"),
            }
        }
        None
    }

    async fn commit(
        &self,
        fingerprint: &Fingerprint,
        coordinate: &Coordinate,
        rules: &[RelocationRule],
        bytes: &[u8],
        origin: &ArtifactOrigin,
    ) -> Result<Checksum, CacheError> {
        let dir = self.entry_dir(fingerprint);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| write_failed(&dir, e))?;
        remove_marker(&dir.join(CHECKSUM_FILE)).await?;

        let checksum = Checksum::sha256(bytes);
        write_atomically(&dir, ARTIFACT_FILE, bytes).await?;

        let record = CacheEntryRecord {
            coordinate: coordinate.clone(),
            relocations: rules.to_vec(),
            fingerprint: fingerprint.clone(),
            checksum: checksum.clone(),
            size: bytes.len() as u64,
            origin: Some(origin.clone()),
            created_at: Timestamp::now(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| write_failed(&dir.join(RECORD_FILE), e))?;
        write_atomically(&dir, RECORD_FILE, &json).await?;

        let marker_content = format!("{}  {ARTIFACT_FILE}\n", checksum.hex());
        write_atomically(&dir, CHECKSUM_FILE, marker_content.as_bytes()).await?;
        Ok(checksum)
    }
}

/// Uncommits an entry before its files are replaced.
async fn remove_marker(marker: &Path) -> Result<(), CacheError> {
    match fs::remove_file(marker).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(write_failed(marker, e)),
    }
}

/// Writes `dir/name` through a uniquely named temporary file and a rename.
async fn write_atomically(dir: &Path, name: &str, data: &[u8]) -> Result<(), CacheError> {
    let target = dir.join(name);
    let temporary = dir.join(format!(".{name}.{}.tmp", Uuid::new_v4()));

    let written = async {
        let mut file = fs::File::create(&temporary).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&temporary, &target).await
    }
    .await;

    written.map_err(|e| {
        let _ = std::fs::remove_file(&temporary);
        write_failed(&target, e)
    })
}
