//! Core dependency domain for Hoist.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, and cross-cutting error type used by the loader. Infrastructure crates
//! implement the port traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`GroupId`, `RepositoryId`, `LoadSessionId`, etc.) |
//! | [`version`] | Maven-style [`Version`] ordering |
//! | [`coordinate`] | [`Coordinate`], [`ModuleKey`], [`ArtifactDescriptor`] |
//! | [`relocation`] | [`RelocationRule`] matching and the build-time [`RelocationManifest`] |
//! | [`repository`] | [`Repository`] and the priority-ordered [`RepositorySet`] |
//! | [`pom`] | POM parsing into runtime [`DeclaredDependency`] lists |
//! | [`types`] | Value types (`Checksum`, `Fingerprint`, `LoadResult`, `LoadReport`, etc.) |
//! | [`errors`] | Error and retry-policy types |
//! | [`ports`] | Port traits (`RepositoryTransport`, `ArchiveRelocator`, `CodeLoader`) |

pub mod coordinate;
pub mod errors;
pub mod identifiers;
pub mod pom;
pub mod ports;
pub mod relocation;
pub mod repository;
pub mod types;
pub mod version;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use coordinate::{ArtifactDescriptor, Coordinate, ModuleKey, DEFAULT_SEPARATOR};
pub use errors::{
    ArtifactError, CacheError, ChecksumMismatch, DownloadError, InjectionError, InvalidInput,
    LoadError, ManifestError, PomError, RelocationError, ResolutionConflict, ResolutionError,
    RetryPolicy, SourceFailure, SourceFailureReason, TransportError,
};
pub use identifiers::{
    ArtifactName, Classifier, CodeUnitHandle, GroupId, LoadSessionId, RepositoryId,
};
pub use pom::{DeclaredDependency, Exclusion, ProjectModel};
pub use ports::{
    ArchiveRelocator, CodeLoader, CodeSource, HostRejection, RepositoryTransport,
};
pub use relocation::{
    relocate_dotted, relocate_internal, ManifestRecord, RelocationManifest, RelocationRule,
};
pub use repository::{
    Repository, RepositoryKind, RepositorySet, MAVEN_CENTRAL_ID, MAVEN_CENTRAL_MIRRORS,
};
pub use types::{
    ArtifactOrigin, Checksum, ChecksumAlgorithm, FailedArtifact, Fingerprint, LoadReport,
    LoadResult, LoadStage, LoadedArtifact, ResolvedArtifact, Timestamp,
};
pub use version::Version;
