//! One load session, end to end.
//!
//! 1. Resolve the full closure of the requested roots.
//! 2. Run every member's pipeline (cache lookup, or fetch then relocate then
//!    commit) on a bounded worker pool.
//! 3. Once every pipeline has finished, inject the members that succeeded,
//!    one at a time, dependencies first.
//!
//! A failing member never stops its siblings; its error is attached to its
//! own [`LoadResult`]. Cancellation is checked between stages: in-flight
//! transfers stop, and nothing is injected once the token has fired.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use artifacts::{
    ArchiveRelocator, ArtifactDescriptor, ArtifactError, ArtifactOrigin, Checksum, CodeLoader,
    CodeSource, Coordinate, DownloadError, FailedArtifact, InjectionError, LoadError, LoadReport,
    LoadResult, LoadSessionId, LoadStage, LoadedArtifact, RelocationError, RelocationManifest,
    RepositorySet, RepositoryTransport, ResolvedArtifact,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::cache::{CacheSource, CacheStore, Produced};
use crate::downloader::{Downloader, RetrySchedule};
use crate::injector::Injector;
use crate::resolver::{Resolution, Resolver};

/// Upper bound for the default worker count.
const MAX_DEFAULT_WORKERS: usize = 8;

/// Default pipeline concurrency: available parallelism, at most
/// [`MAX_DEFAULT_WORKERS`].
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(4, NonZeroUsize::get)
        .min(MAX_DEFAULT_WORKERS)
}

/// Everything a [`LoadOrchestrator`] needs besides its ports.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Repositories, queried in priority order.
    pub repositories: RepositorySet,
    /// Root of the artifact cache.
    pub cache_dir: PathBuf,
    /// Maximum number of member pipelines running at once.
    pub workers: usize,
    /// Per-repository retry schedule.
    pub retry: RetrySchedule,
    /// Build-time relocation rules, merged into matching descriptors.
    pub manifest: RelocationManifest,
}

impl LoaderConfig {
    /// A configuration with default workers, retry schedule and no manifest.
    pub fn new(repositories: RepositorySet, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            repositories,
            cache_dir: cache_dir.into(),
            workers: default_workers(),
            retry: RetrySchedule::default(),
            manifest: RelocationManifest::default(),
        }
    }

    /// Sets the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySchedule) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the relocation manifest.
    #[must_use]
    pub fn with_manifest(mut self, manifest: RelocationManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    ///
    /// [`LoadError::Configuration`] for an empty repository set, zero
    /// workers, or an empty cache path.
    pub fn validate(&self) -> Result<(), LoadError> {
        let problem = if self.repositories.is_empty() {
            Some("no repositories configured")
        } else if self.workers == 0 {
            Some("workers must be at least 1")
        } else if self.cache_dir.as_os_str().is_empty() {
            Some("cache directory is empty")
        } else {
            None
        };
        match problem {
            Some(message) => Err(LoadError::Configuration {
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// A member whose relocated bytes are committed and ready to inject.
struct Prepared {
    bytes: Vec<u8>,
    checksum: Checksum,
    location: PathBuf,
    relocated: bool,
    origin: Option<ArtifactOrigin>,
    stages: Vec<LoadStage>,
}

/// Stages a member had completed when `error` stopped it.
fn completed_before(error: &ArtifactError) -> Vec<LoadStage> {
    match error {
        ArtifactError::Download(_) | ArtifactError::Cancelled { .. } => vec![LoadStage::Resolved],
        ArtifactError::Relocation(_) => vec![LoadStage::Resolved, LoadStage::Downloaded],
        ArtifactError::Cache(_) | ArtifactError::Injection(_) => vec![
            LoadStage::Resolved,
            LoadStage::Downloaded,
            LoadStage::Relocated,
        ],
    }
}

fn failed(coordinate: Coordinate, completed: Vec<LoadStage>, error: ArtifactError) -> FailedArtifact {
    FailedArtifact {
        coordinate,
        completed,
        error,
    }
}

fn cancelled(coordinate: &Coordinate) -> ArtifactError {
    ArtifactError::Cancelled {
        coordinate: coordinate.clone(),
    }
}

/// Shared handles one member pipeline needs.
#[derive(Clone)]
struct Pipeline {
    downloader: Arc<Downloader>,
    cache: Arc<CacheStore>,
    relocator: Arc<dyn ArchiveRelocator>,
}

impl Pipeline {
    async fn run(
        self,
        member: ResolvedArtifact,
        workers: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Result<Prepared, FailedArtifact> {
        let coordinate = member.coordinate().clone();
        let _permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(failed(coordinate.clone(), vec![LoadStage::Resolved], cancelled(&coordinate)));
            }
            permit = workers.acquire_owned() => permit.map_err(|_| {
                failed(coordinate.clone(), vec![LoadStage::Resolved], cancelled(&coordinate))
            })?,
        };

        let descriptor = member.descriptor;
        let rules = descriptor.relocations().to_vec();
        let producer = {
            let descriptor = descriptor.clone();
            let rules = rules.clone();
            let cancel = cancel.clone();
            let Self {
                downloader,
                relocator,
                ..
            } = self.clone();
            move || async move {
                let fetched = downloader.fetch(&descriptor, &cancel).await?;
                if cancel.is_cancelled() {
                    return Err(cancelled(descriptor.coordinate()));
                }
                let origin = ArtifactOrigin {
                    repository: fetched.repository,
                    checksum: fetched.checksum,
                };
                let raw = fetched.bytes;
                let bytes = tokio::task::spawn_blocking(move || relocator.relocate(&raw, &rules))
                    .await
                    .map_err(|e| RelocationError::WriteFailed {
                        reason: format!("relocation task failed: {e}"),
                    })??;
                Ok::<_, ArtifactError>(Produced { bytes, origin })
            }
        };

        let cached = self
            .cache
            .get_or_create(&descriptor, &rules, producer)
            .await
            .map_err(|error| {
                let error = match error {
                    ArtifactError::Download(DownloadError::Cancelled { coordinate }) => {
                        ArtifactError::Cancelled { coordinate }
                    }
                    other => other,
                };
                failed(coordinate.clone(), completed_before(&error), error)
            })?;

        let stages = match cached.source {
            CacheSource::Hit => vec![LoadStage::Resolved, LoadStage::Cached],
            CacheSource::Produced => vec![
                LoadStage::Resolved,
                LoadStage::Downloaded,
                LoadStage::Relocated,
            ],
        };
        debug!(%coordinate, source = ?cached.source, "Member ready");
        Ok(Prepared {
            bytes: cached.bytes,
            checksum: cached.checksum,
            location: cached.path,
            relocated: !rules.is_empty(),
            origin: cached.origin,
            stages,
        })
    }
}

/// Runs load sessions against one cache, repository set and host.
///
/// The injector lives as long as the orchestrator, so loading an artifact a
/// second time reuses the host handle from the first load.
pub struct LoadOrchestrator {
    pipeline: Pipeline,
    resolver: Resolver,
    injector: Injector,
    workers: usize,
}

impl std::fmt::Debug for LoadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOrchestrator")
            .field("cache", &self.pipeline.cache.root())
            .field("workers", &self.workers)
            .field("injector", &self.injector)
            .finish_non_exhaustive()
    }
}

impl LoadOrchestrator {
    /// Wires the engine to its ports.
    ///
    /// # Errors
    ///
    /// [`LoadError::Configuration`] if `config` fails
    /// [`LoaderConfig::validate`].
    pub fn new(
        config: LoaderConfig,
        transport: Arc<dyn RepositoryTransport>,
        relocator: Arc<dyn ArchiveRelocator>,
        loader: Arc<dyn CodeLoader>,
    ) -> Result<Self, LoadError> {
        config.validate()?;
        let downloader = Arc::new(Downloader::new(
            transport,
            Arc::new(config.repositories),
            config.retry,
        ));
        let cache = Arc::new(CacheStore::new(config.cache_dir));
        let resolver = Resolver::new(Arc::clone(&downloader), Arc::new(config.manifest))
            .with_metadata_cache(Arc::clone(&cache));
        Ok(Self {
            pipeline: Pipeline {
                downloader,
                cache,
                relocator,
            },
            resolver,
            injector: Injector::new(loader),
            workers: config.workers,
        })
    }

    /// The artifact cache.
    pub fn cache(&self) -> &CacheStore {
        &self.pipeline.cache
    }

    /// The host injector.
    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Resolves `roots` without fetching, relocating or injecting anything.
    pub async fn resolve(
        &self,
        roots: &[ArtifactDescriptor],
        cancel: &CancellationToken,
    ) -> Resolution {
        self.resolver.resolve(roots, cancel).await
    }

    /// Loads `roots` and their runtime closure into the host.
    ///
    /// The report has exactly one entry per requested root. A root whose
    /// module was raised to a higher version by conflict resolution reports
    /// the selected member's outcome.
    pub async fn load(&self, roots: &[ArtifactDescriptor], cancel: &CancellationToken) -> LoadReport {
        let session = LoadSessionId::new_random();
        let span = info_span!("load_session", %session, roots = roots.len());
        self.run_session(session, roots, cancel)
            .instrument(span)
            .await
    }

    async fn run_session(
        &self,
        session: LoadSessionId,
        roots: &[ArtifactDescriptor],
        cancel: &CancellationToken,
    ) -> LoadReport {
        info!("Load session started");
        let resolution = self.resolver.resolve(roots, cancel).await;
        let mut prepared = self.prepare(&resolution.closure, cancel).await;

        let closure: Vec<ResolvedArtifact> = resolution
            .closure
            .into_iter()
            .map(|member| {
                let origin = match prepared.get(member.coordinate()) {
                    Some(Ok(ready)) => ready.origin.clone(),
                    _ => None,
                };
                match origin {
                    Some(origin) => member.with_origin(&origin),
                    None => member,
                }
            })
            .collect();

        let mut members = BTreeMap::new();
        let mut injection_order = Vec::new();
        for member in &closure {
            let coordinate = member.coordinate().clone();
            let result = match prepared.remove(&coordinate) {
                Some(Ok(ready)) => self.inject(&coordinate, ready, cancel, &mut injection_order),
                Some(Err(failure)) => LoadResult::Failed(failure),
                None => LoadResult::Failed(failed(
                    coordinate.clone(),
                    vec![LoadStage::Resolved],
                    cancelled(&coordinate),
                )),
            };
            members.insert(coordinate, result);
        }

        let root_results = roots
            .iter()
            .map(|root| {
                let requested = root.coordinate().clone();
                let result = resolution
                    .roots
                    .get(&requested)
                    .and_then(|selected| members.get(selected))
                    .cloned()
                    .unwrap_or_else(|| {
                        LoadResult::Failed(failed(requested.clone(), Vec::new(), cancelled(&requested)))
                    });
                (requested, result)
            })
            .collect::<BTreeMap<_, _>>();

        let loaded = members.values().filter(|r| r.is_loaded()).count();
        info!(
            members = members.len(),
            loaded,
            failed = members.len() - loaded,
            injected = injection_order.len(),
            "Load session finished"
        );

        LoadReport {
            session,
            roots: root_results,
            members,
            closure,
            injection_order,
            resolution_errors: resolution.errors,
            conflicts: resolution.conflicts,
        }
    }

    /// Runs every member's pipeline, at most `workers` at a time.
    async fn prepare(
        &self,
        closure: &[ResolvedArtifact],
        cancel: &CancellationToken,
    ) -> HashMap<Coordinate, Result<Prepared, FailedArtifact>> {
        let workers = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for member in closure {
            let pipeline = self.pipeline.clone();
            let member = member.clone();
            let workers = Arc::clone(&workers);
            let cancel = cancel.clone();
            let span = info_span!("member", coordinate = %member.coordinate());
            tasks.spawn(
                async move {
                    let coordinate = member.coordinate().clone();
                    (coordinate, pipeline.run(member, workers, cancel).await)
                }
                .instrument(span),
            );
        }

        let mut outcomes = HashMap::with_capacity(closure.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((coordinate, outcome)) => {
                    outcomes.insert(coordinate, outcome);
                }
                Err(e) => error!(error = %e, "Member pipeline task failed"),
            }
        }
        outcomes
    }

    fn inject(
        &self,
        coordinate: &Coordinate,
        ready: Prepared,
        cancel: &CancellationToken,
        injection_order: &mut Vec<Coordinate>,
    ) -> LoadResult {
        let Prepared {
            bytes,
            checksum,
            location,
            relocated,
            origin,
            mut stages,
        } = ready;
        if cancel.is_cancelled() {
            return LoadResult::Failed(failed(coordinate.clone(), stages, cancelled(coordinate)));
        }

        let source = CodeSource {
            coordinate,
            bytes: &bytes,
            location: Some(&location),
            relocated,
        };
        match self.injector.inject(source) {
            Ok(handle) => {
                injection_order.push(coordinate.clone());
                stages.push(LoadStage::Injected);
                LoadResult::Loaded(LoadedArtifact {
                    coordinate: coordinate.clone(),
                    handle,
                    stages,
                    checksum,
                    location,
                    origin,
                })
            }
            Err(InjectionError::AlreadyLoaded { handle, .. }) => {
                debug!(%coordinate, %handle, "Reusing earlier injection");
                stages.push(LoadStage::Injected);
                LoadResult::Loaded(LoadedArtifact {
                    coordinate: coordinate.clone(),
                    handle,
                    stages,
                    checksum,
                    location,
                    origin,
                })
            }
            Err(e) => LoadResult::Failed(failed(coordinate.clone(), stages, e.into())),
        }
    }
}
