//! Transitive closure computation.
//!
//! The resolver walks POM metadata breadth-first from the roots. Each module
//! (group + artifact) appears at most once in the result: when two versions
//! meet, the higher one wins, roots included, and every such decision is
//! recorded as a [`ResolutionConflict`]. A displaced version's subtree is
//! dropped by a final reachability pass from the roots, which also yields the
//! dependency-first order used for injection.
//!
//! Nothing here is fatal. Missing or malformed metadata leaves the node in the
//! closure without children and is reported in [`Resolution::errors`].
//!
//! Relocation rules flow downward: a child inherits its parent's rules, then
//! gets any rules the relocation manifest lists for it. When two declarations
//! of one module meet, the surviving descriptor carries the union of both
//! rule lists, and once the walk ends every member carries all the rules of
//! every member that depends on it.
//!
//! With a metadata cache attached, POMs committed by an earlier session are
//! read from disk and freshly fetched ones are committed, so a restarted
//! process resolves the same closure without the network.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use artifacts::{
    ArtifactDescriptor, Coordinate, DownloadError, Exclusion, ModuleKey, ProjectModel,
    RelocationManifest, Repository, RepositoryId, ResolutionConflict, ResolutionError,
    ResolvedArtifact,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStore, CachedMetadata};
use crate::downloader::Downloader;

/// The resolved closure of one set of roots.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Selected members, each after all of its dependencies.
    pub closure: Vec<ResolvedArtifact>,
    /// Requested root coordinate to the coordinate selected for its module.
    pub roots: BTreeMap<Coordinate, Coordinate>,
    /// Non-fatal problems, in discovery order.
    pub errors: Vec<ResolutionError>,
    /// Version decisions, in discovery order.
    pub conflicts: Vec<ResolutionConflict>,
}

impl Resolution {
    /// The closure member with exactly this coordinate.
    pub fn get(&self, coordinate: &Coordinate) -> Option<&ResolvedArtifact> {
        self.closure.iter().find(|m| m.coordinate() == coordinate)
    }

    /// The member selected for a requested root.
    pub fn selected(&self, requested: &Coordinate) -> Option<&ResolvedArtifact> {
        self.roots.get(requested).and_then(|c| self.get(c))
    }
}

#[derive(Debug)]
struct Node {
    descriptor: ArtifactDescriptor,
    exclusions: Vec<Exclusion>,
    repository: Option<RepositoryId>,
    children: Vec<ModuleKey>,
}

impl Node {
    fn new(descriptor: ArtifactDescriptor, exclusions: Vec<Exclusion>) -> Self {
        Self {
            descriptor,
            exclusions,
            repository: None,
            children: Vec::new(),
        }
    }
}

/// Mutable state of one resolution.
#[derive(Default)]
struct Walk {
    nodes: HashMap<ModuleKey, Node>,
    queue: VecDeque<Coordinate>,
    errors: Vec<ResolutionError>,
    conflicts: Vec<ResolutionConflict>,
}

impl Walk {
    /// Offers a declaration of a module; queues it if it becomes the
    /// selected version.
    fn consider(&mut self, descriptor: ArtifactDescriptor, exclusions: Vec<Exclusion>) {
        let coordinate = descriptor.coordinate().clone();
        let module = coordinate.module();
        let Some(node) = self.nodes.get_mut(&module) else {
            self.queue.push_back(coordinate);
            self.nodes.insert(module, Node::new(descriptor, exclusions));
            return;
        };

        let current = node.descriptor.coordinate().version().clone();
        let incoming = coordinate.version();
        match incoming.cmp(&current) {
            std::cmp::Ordering::Equal => {
                node.descriptor = node
                    .descriptor
                    .clone()
                    .with_relocations(descriptor.relocations().to_vec());
            }
            std::cmp::Ordering::Less => {
                debug!(%module, selected = %current, demoted = %incoming, "Kept higher version");
                node.descriptor = node
                    .descriptor
                    .clone()
                    .with_relocations(descriptor.relocations().to_vec());
                self.conflicts.push(ResolutionConflict {
                    module,
                    selected: current,
                    demoted: incoming.clone(),
                });
            }
            std::cmp::Ordering::Greater => {
                debug!(%module, selected = %incoming, demoted = %current, "Replaced with higher version");
                let merged = descriptor.with_relocations(node.descriptor.relocations().to_vec());
                *node = Node::new(merged, exclusions);
                self.conflicts.push(ResolutionConflict {
                    module,
                    selected: incoming.clone(),
                    demoted: current,
                });
                self.queue.push_back(coordinate);
            }
        }
    }

    /// `true` if `coordinate` is still the selected version of its module.
    fn is_selected(&self, coordinate: &Coordinate) -> bool {
        self.nodes
            .get(&coordinate.module())
            .is_some_and(|n| n.descriptor.coordinate() == coordinate)
    }

    /// Pushes each node's rules down to its children until every child
    /// carries all of its parents' rules. Modules are visited in key order
    /// so the resulting rule lists do not depend on hash order.
    fn propagate_rules(&mut self) {
        let mut modules: Vec<ModuleKey> = self.nodes.keys().cloned().collect();
        modules.sort();
        let mut pending: VecDeque<ModuleKey> = modules.into();
        while let Some(module) = pending.pop_front() {
            let Some(node) = self.nodes.get(&module) else {
                continue;
            };
            if node.descriptor.relocations().is_empty() {
                continue;
            }
            let rules = node.descriptor.relocations().to_vec();
            for child in node.children.clone() {
                let Some(target) = self.nodes.get_mut(&child) else {
                    continue;
                };
                let before = target.descriptor.relocations().len();
                target.descriptor = target.descriptor.clone().with_relocations(rules.iter().cloned());
                if target.descriptor.relocations().len() != before {
                    debug!(parent = %module, %child, "Inherited late relocation rules");
                    pending.push_back(child);
                }
            }
        }
    }

    /// Modules reachable from `roots`, each after its dependencies.
    fn dependency_order<'a>(&'a self, roots: &'a [ModuleKey]) -> Vec<&'a ModuleKey> {
        let mut visited: HashSet<&ModuleKey> = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            if !visited.insert(root) {
                continue;
            }
            let mut stack: Vec<(&ModuleKey, usize)> = vec![(root, 0)];
            while let Some(frame) = stack.last_mut() {
                let (module, next) = *frame;
                let children = self
                    .nodes
                    .get(module)
                    .map_or(&[][..], |n| n.children.as_slice());
                match children.get(next) {
                    Some(child) => {
                        frame.1 += 1;
                        if visited.insert(child) {
                            stack.push((child, 0));
                        }
                    }
                    None => {
                        order.push(module);
                        stack.pop();
                    }
                }
            }
        }
        order
    }
}

fn merge_exclusions(inherited: &[Exclusion], declared: &[Exclusion]) -> Vec<Exclusion> {
    let mut merged = inherited.to_vec();
    for exclusion in declared {
        if !merged.contains(exclusion) {
            merged.push(exclusion.clone());
        }
    }
    merged
}

/// Computes closures by fetching POMs through a [`Downloader`].
#[derive(Debug)]
pub struct Resolver {
    downloader: Arc<Downloader>,
    manifest: Arc<RelocationManifest>,
    metadata: Option<Arc<CacheStore>>,
}

impl Resolver {
    /// Creates a resolver. `manifest` supplies extra rules per artifact.
    pub fn new(downloader: Arc<Downloader>, manifest: Arc<RelocationManifest>) -> Self {
        Self {
            downloader,
            manifest,
            metadata: None,
        }
    }

    /// Reads POMs from `cache` before the network and commits fetched ones
    /// to it.
    #[must_use]
    pub fn with_metadata_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.metadata = Some(cache);
        self
    }

    /// A cached POM served by one of `candidates`.
    async fn cached_pom(
        &self,
        coordinate: &Coordinate,
        candidates: &[&Repository],
    ) -> Option<CachedMetadata> {
        let hit = self.metadata.as_ref()?.metadata(coordinate).await?;
        if candidates.iter().any(|r| r.id() == &hit.repository) {
            debug!(%coordinate, repository = %hit.repository, "Metadata cache hit");
            Some(hit)
        } else {
            debug!(%coordinate, repository = %hit.repository, "Cached metadata from an ineligible repository");
            None
        }
    }

    fn with_manifest_rules(&self, descriptor: ArtifactDescriptor) -> ArtifactDescriptor {
        let coordinate = descriptor.coordinate();
        let rules = self
            .manifest
            .rules_for(coordinate.group(), coordinate.artifact());
        descriptor.with_relocations(rules)
    }

    /// Resolves the closure of `roots`.
    ///
    /// Cancellation stops expansion: nodes not yet expanded stay in the
    /// closure without children and get a [`ResolutionError::Cancelled`].
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub async fn resolve(
        &self,
        roots: &[ArtifactDescriptor],
        cancel: &CancellationToken,
    ) -> Resolution {
        let mut walk = Walk::default();
        let mut root_modules = Vec::with_capacity(roots.len());
        for root in roots {
            root_modules.push(root.coordinate().module());
            walk.consider(self.with_manifest_rules(root.clone()), Vec::new());
        }

        while let Some(coordinate) = walk.queue.pop_front() {
            if !walk.is_selected(&coordinate) {
                continue;
            }
            if cancel.is_cancelled() {
                walk.errors.push(ResolutionError::Cancelled { coordinate });
                continue;
            }
            self.expand(&mut walk, coordinate, cancel).await;
        }

        walk.propagate_rules();
        let order = walk.dependency_order(&root_modules);
        let closure: Vec<ResolvedArtifact> = order
            .iter()
            .filter_map(|module| walk.nodes.get(*module))
            .map(|node| ResolvedArtifact {
                descriptor: node.descriptor.clone(),
                repository: node.repository.clone(),
                checksum: None,
                dependencies: node
                    .children
                    .iter()
                    .filter_map(|child| walk.nodes.get(child))
                    .map(|child| child.descriptor.coordinate().clone())
                    .collect(),
            })
            .collect();

        let roots = roots
            .iter()
            .filter_map(|root| {
                let selected = walk.nodes.get(&root.coordinate().module())?;
                Some((
                    root.coordinate().clone(),
                    selected.descriptor.coordinate().clone(),
                ))
            })
            .collect();

        info!(
            members = closure.len(),
            pruned = walk.nodes.len() - closure.len(),
            errors = walk.errors.len(),
            conflicts = walk.conflicts.len(),
            "Resolved closure"
        );
        Resolution {
            closure,
            roots,
            errors: walk.errors,
            conflicts: walk.conflicts,
        }
    }

    async fn expand(&self, walk: &mut Walk, coordinate: Coordinate, cancel: &CancellationToken) {
        let module = coordinate.module();
        let Some(node) = walk.nodes.get(&module) else {
            return;
        };
        let descriptor = node.descriptor.clone();
        let exclusions = node.exclusions.clone();
        let repositories = self.downloader.repositories();

        if let Some(id) = descriptor.repository() {
            if repositories.get(id).is_none() {
                walk.errors.push(ResolutionError::UnknownRepository {
                    coordinate,
                    repository: id.clone(),
                });
                return;
            }
        }

        let candidates = repositories.candidates_for(&descriptor);
        let (bytes, repository, from_cache) = match self.cached_pom(&coordinate, &candidates).await {
            Some(hit) => (hit.bytes, hit.repository, true),
            None => match self
                .downloader
                .fetch_file(&coordinate, &candidates, &coordinate.pom_path(), cancel)
                .await
            {
                Ok(fetched) => (fetched.bytes, fetched.repository, false),
                Err(DownloadError::AllSourcesFailed { failures, .. }) => {
                    walk.errors.push(ResolutionError::MetadataUnavailable {
                        coordinate,
                        failures,
                    });
                    return;
                }
                Err(DownloadError::Cancelled { .. }) => {
                    walk.errors.push(ResolutionError::Cancelled { coordinate });
                    return;
                }
            },
        };
        if let Some(node) = walk.nodes.get_mut(&module) {
            node.repository = Some(repository.clone());
        }

        let model = match ProjectModel::parse(&String::from_utf8_lossy(&bytes)) {
            Ok(model) => model,
            Err(e) => {
                walk.errors.push(ResolutionError::MalformedMetadata {
                    coordinate,
                    reason: e.to_string(),
                });
                return;
            }
        };
        if let (Some(cache), false) = (&self.metadata, from_cache) {
            if let Err(e) = cache.store_metadata(&coordinate, &repository, &bytes).await {
                warn!(%coordinate, error = %e, "Failed to cache metadata");
            }
        }

        let (declared, problems) = model.runtime_dependencies(&coordinate);
        walk.errors.extend(problems);

        let mut children = Vec::with_capacity(declared.len());
        for dependency in declared {
            let child_module = dependency.coordinate.module();
            if child_module == module {
                continue;
            }
            if exclusions.iter().any(|e| e.matches(&child_module)) {
                debug!(parent = %coordinate, excluded = %child_module, "Excluded dependency");
                continue;
            }
            let child_exclusions = merge_exclusions(&exclusions, &dependency.exclusions);
            let child = self.with_manifest_rules(
                ArtifactDescriptor::new(dependency.coordinate)
                    .with_relocations(descriptor.relocations().to_vec()),
            );
            if !children.contains(&child_module) {
                children.push(child_module);
            }
            walk.consider(child, child_exclusions);
        }

        debug!(%coordinate, children = children.len(), "Expanded");
        if let Some(node) = walk.nodes.get_mut(&module) {
            node.children = children;
        }
    }
}
