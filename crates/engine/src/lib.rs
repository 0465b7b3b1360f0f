//! Load engine for Hoist.
//!
//! Composes the domain ports from `artifacts` into the load pipeline:
//! resolve the transitive closure, then for every member fetch, relocate,
//! cache, and finally inject into the host.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** This crate performs file I/O for the cache store and
//! drives async work, but reaches repositories, archives and the host only
//! through the port traits. It never names a concrete transport or relocator.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`downloader`] | [`Downloader`]: priority-ordered fetch with retry, checksum verification and fall-through |
//! | [`resolver`] | [`Resolver`]: breadth-first closure with "highest version wins" |
//! | [`cache`] | [`CacheStore`]: fingerprint-keyed entries with single-flight production, plus cached POMs |
//! | [`injector`] | [`Injector`]: serialised, duplicate-aware host injection |
//! | [`orchestrator`] | [`LoadOrchestrator`] and [`LoaderConfig`]: one load session end to end |

pub mod cache;
pub mod downloader;
pub mod injector;
pub mod orchestrator;
pub mod resolver;

pub use cache::{
    CacheEntryRecord, CacheSource, CacheStore, CachedArtifact, CachedMetadata, MetadataRecord,
    Produced,
};
pub use downloader::{Downloader, Fetched, RetrySchedule};
pub use injector::Injector;
pub use orchestrator::{default_workers, LoadOrchestrator, LoaderConfig};
pub use resolver::{Resolution, Resolver};
