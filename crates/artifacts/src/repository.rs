//! Repositories and the ordered repository set.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ArtifactDescriptor, InvalidInput, RepositoryId};

/// Id of the built-in Maven Central repository group.
pub const MAVEN_CENTRAL_ID: &str = "maven-central";

/// Public Maven Central mirrors, in the order they are tried.
pub const MAVEN_CENTRAL_MIRRORS: [&str; 3] = [
    "https://maven-central.storage.googleapis.com/maven2/",
    "https://repo1.maven.org/maven2/",
    "https://repo.maven.apache.org/maven2/",
];

/// How a repository's files are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryKind {
    /// `http://` or `https://` base URL.
    RemoteHttp,
    /// `file://` URL or a plain filesystem path (e.g. a local `~/.m2/repository`).
    LocalFilesystem,
}

/// One read-only artifact source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    id: RepositoryId,
    base: String,
    priority: i32,
    kind: RepositoryKind,
}

impl Repository {
    /// Creates a repository, inferring its kind from `base`.
    ///
    /// `base` is normalised to end in `/`. Lower `priority` values are tried
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`] if `id` or `base` is empty or `base` uses a
    /// scheme other than `http`, `https` or `file`.
    pub fn new(id: &str, base: &str, priority: i32) -> Result<Self, InvalidInput> {
        let repo_id =
            RepositoryId::new(id).ok_or_else(|| InvalidInput::repository(base, "id is empty"))?;
        let trimmed = base.trim();
        if trimmed.is_empty() {
            return Err(InvalidInput::repository(id, "base location is empty"));
        }
        let lower = trimmed.to_ascii_lowercase();
        let kind = if lower.starts_with("http://") || lower.starts_with("https://") {
            RepositoryKind::RemoteHttp
        } else if lower.starts_with("file://") || !trimmed.contains("://") {
            RepositoryKind::LocalFilesystem
        } else {
            return Err(InvalidInput::repository(
                trimmed,
                "only http, https and file locations are supported",
            ));
        };
        let mut base = trimmed.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Self {
            id: repo_id,
            base,
            priority,
            kind,
        })
    }

    /// Repository id.
    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    /// Base location, always ending in `/`.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Priority; lower is tried first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Transport kind.
    pub fn kind(&self) -> RepositoryKind {
        self.kind
    }

    /// Absolute location of a repository-relative path.
    pub fn location_of(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    /// Filesystem root for [`RepositoryKind::LocalFilesystem`] repositories.
    pub fn local_root(&self) -> Option<PathBuf> {
        match self.kind {
            RepositoryKind::LocalFilesystem => {
                let path = self
                    .base
                    .strip_prefix("file://")
                    .unwrap_or(self.base.as_str());
                Some(PathBuf::from(path))
            }
            RepositoryKind::RemoteHttp => None,
        }
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.base)
    }
}

/// Ordered list of repositories, queried in ascending priority.
///
/// Ties keep declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositorySet {
    repositories: Vec<Repository>,
}

impl RepositorySet {
    /// Builds a set from repositories in any order.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`] if two repositories share an id.
    pub fn new(repositories: Vec<Repository>) -> Result<Self, InvalidInput> {
        let mut seen = std::collections::HashSet::new();
        for repo in &repositories {
            if !seen.insert(repo.id.clone()) {
                return Err(InvalidInput::repository(
                    repo.id.as_str(),
                    "duplicate repository id",
                ));
            }
        }
        let mut repositories = repositories;
        repositories.sort_by_key(Repository::priority);
        Ok(Self { repositories })
    }

    /// The Maven Central mirrors as repositories `maven-central`,
    /// `maven-central-1`, ... at consecutive priorities from `first_priority`.
    pub fn maven_central(first_priority: i32) -> Vec<Repository> {
        MAVEN_CENTRAL_MIRRORS
            .iter()
            .enumerate()
            .filter_map(|(i, url)| {
                let id = if i == 0 {
                    MAVEN_CENTRAL_ID.to_string()
                } else {
                    format!("{MAVEN_CENTRAL_ID}-{i}")
                };
                let offset = i32::try_from(i).ok()?;
                Repository::new(&id, url, first_priority.saturating_add(offset)).ok()
            })
            .collect()
    }

    /// Returns `true` if the set has no repositories.
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Number of repositories.
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    /// Repositories in query order.
    pub fn iter(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter()
    }

    /// Looks a repository up by id.
    pub fn get(&self, id: &RepositoryId) -> Option<&Repository> {
        self.repositories.iter().find(|r| &r.id == id)
    }

    /// Repositories eligible for `descriptor`, in query order.
    ///
    /// A descriptor with a repository override is served only by that
    /// repository; an unknown override yields no candidates.
    pub fn candidates_for(&self, descriptor: &ArtifactDescriptor) -> Vec<&Repository> {
        match descriptor.repository() {
            Some(id) => self.get(id).into_iter().collect(),
            None => self.repositories.iter().collect(),
        }
    }
}
