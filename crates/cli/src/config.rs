//! Host configuration.
//!
//! Settings come from, lowest priority first:
//!
//! 1. built-in defaults;
//! 2. the TOML file (`--config`, or `hoist.toml` in the working directory);
//! 3. environment variables (`HOIST_CACHE_DIR`, `HOIST_WORKERS`);
//! 4. command-line flags.
//!
//! Relative paths in the file are resolved against the file's directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use artifacts::{
    ArtifactDescriptor, Coordinate, InvalidInput, ManifestError, RelocationManifest,
    RelocationRule, Repository, RepositoryId, RepositorySet, DEFAULT_SEPARATOR,
};
use engine::{default_workers, LoaderConfig, RetrySchedule};
use serde::Deserialize;
use thiserror::Error;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "hoist.toml";
/// Overrides the file's `cache_dir`; `--cache-dir` overrides this.
pub const CACHE_DIR_ENV: &str = "HOIST_CACHE_DIR";
/// Overrides the file's `workers`; `--workers` overrides this.
pub const WORKERS_ENV: &str = "HOIST_WORKERS";

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file named by the configuration.
    #[error("failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The relocation manifest is unusable.
    #[error("invalid relocation manifest '{path}': {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    /// A repository, coordinate or rule in the configuration is invalid.
    #[error("{origin}: {source}")]
    InvalidEntry {
        origin: String,
        #[source]
        source: InvalidInput,
    },

    /// A `[[dependency]]` names a repository that is not configured.
    #[error("{origin}: unknown repository '{repository}'")]
    UnknownRepository { origin: String, repository: String },

    /// Invalid environment variable value.
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },

    /// A value is out of range.
    #[error("invalid setting '{name}': {message}")]
    InvalidSetting { name: String, message: String },

    /// No cache directory was configured and the platform has none.
    #[error("no cache directory configured and no platform cache directory is available")]
    NoCacheDir,
}

impl ConfigError {
    fn invalid_setting(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// The on-disk TOML document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub cache_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub relocation_manifest: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub include_maven_central: bool,
    /// Stand-in for `.` in encoded coordinates and rules.
    pub separator: Option<String>,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryEntry>,
    #[serde(default, rename = "dependency")]
    pub dependencies: Vec<DependencyEntry>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            workers: None,
            relocation_manifest: None,
            include_maven_central: true,
            separator: None,
            retry: RetrySection::default(),
            repositories: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[retry]`; absent keys keep the engine's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    pub attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// One `[[repository]]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryEntry {
    pub id: String,
    pub url: String,
    pub priority: Option<i32>,
}

/// One `[[dependency]]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyEntry {
    pub coordinate: String,
    pub repository: Option<String>,
    #[serde(default)]
    pub relocations: Vec<RuleEntry>,
}

/// `{ from = "...", to = "..." }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleEntry {
    pub from: String,
    pub to: String,
}

/// Settings supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    /// Extra roots, in `group:artifact:version[:classifier]` form.
    pub coordinates: Vec<String>,
    /// Rules applied to the extra roots, as `from=to`.
    pub relocations: Vec<String>,
}

/// Everything a command needs to run.
#[derive(Debug)]
pub struct Settings {
    pub loader: LoaderConfig,
    pub roots: Vec<ArtifactDescriptor>,
}

/// A parsed config file and the directory its relative paths start from.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: FileConfig,
    pub base_dir: PathBuf,
}

impl ConfigFile {
    /// Reads `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::ReadFile`] or [`ConfigError::ParseToml`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self { config, base_dir })
    }

    /// `explicit` if given; otherwise `hoist.toml` in `cwd` if it exists;
    /// otherwise an empty configuration rooted at `cwd`.
    ///
    /// # Errors
    ///
    /// As [`ConfigFile::load`].
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = cwd.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            return Self::load(&candidate);
        }
        Ok(Self {
            config: FileConfig::default(),
            base_dir: cwd.to_path_buf(),
        })
    }

    /// Layers environment and command-line settings over the file.
    ///
    /// `env` looks up one environment variable.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`] describing the first invalid setting.
    pub fn resolve(
        &self,
        env: impl Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Settings, ConfigError> {
        let file = &self.config;
        let separator = file.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);

        let cache_dir = match (&overrides.cache_dir, env(CACHE_DIR_ENV), &file.cache_dir) {
            (Some(dir), _, _) => dir.clone(),
            (None, Some(dir), _) if !dir.trim().is_empty() => expand_home(Path::new(dir.trim())),
            (None, _, Some(dir)) => self.relative(&expand_home(dir)),
            _ => dirs::cache_dir()
                .map(|d| d.join("hoist"))
                .ok_or(ConfigError::NoCacheDir)?,
        };

        let workers = match (overrides.workers, env(WORKERS_ENV), file.workers) {
            (Some(n), _, _) => n,
            (None, Some(raw), _) => raw.trim().parse::<usize>().map_err(|e| {
                ConfigError::InvalidEnvVar {
                    name: WORKERS_ENV.to_string(),
                    message: e.to_string(),
                }
            })?,
            (None, None, Some(n)) => n,
            (None, None, None) => default_workers(),
        };
        if workers == 0 {
            return Err(ConfigError::invalid_setting("workers", "must be at least 1"));
        }

        let repositories = self.repositories()?;
        let manifest = match &file.relocation_manifest {
            Some(path) => {
                let path = self.relative(path);
                let json = std::fs::read_to_string(&path).map_err(|source| {
                    ConfigError::ReadFile {
                        path: path.clone(),
                        source,
                    }
                })?;
                RelocationManifest::from_json(&json)
                    .map_err(|source| ConfigError::Manifest { path, source })?
            }
            None => RelocationManifest::default(),
        };

        let mut roots = Vec::new();
        for (index, entry) in file.dependencies.iter().enumerate() {
            let origin = format!("dependency {}", index + 1);
            roots.push(dependency(entry, separator, &repositories, &origin)?);
        }
        let cli_rules = overrides
            .relocations
            .iter()
            .map(|raw| parse_rule_flag(raw, separator))
            .collect::<Result<Vec<_>, _>>()?;
        for raw in &overrides.coordinates {
            let coordinate = parse_coordinate(raw, separator).map_err(|source| {
                ConfigError::InvalidEntry {
                    origin: "command line".to_string(),
                    source,
                }
            })?;
            roots.push(ArtifactDescriptor::new(coordinate).with_relocations(cli_rules.clone()));
        }

        let loader = LoaderConfig::new(repositories, cache_dir)
            .with_workers(workers)
            .with_retry(file.retry.schedule()?)
            .with_manifest(manifest);
        Ok(Settings { loader, roots })
    }

    /// User repositories in declaration order, then Maven Central's mirrors.
    fn repositories(&self) -> Result<RepositorySet, ConfigError> {
        let mut repositories = Vec::new();
        let mut next_priority = 0i32;
        for (index, entry) in self.config.repositories.iter().enumerate() {
            let priority = entry
                .priority
                .unwrap_or_else(|| i32::try_from(index).unwrap_or(i32::MAX));
            next_priority = next_priority.max(priority.saturating_add(1));
            let url = self.repository_location(&entry.url);
            let repository =
                Repository::new(&entry.id, &url, priority).map_err(|source| {
                    ConfigError::InvalidEntry {
                        origin: format!("repository '{}'", entry.id),
                        source,
                    }
                })?;
            repositories.push(repository);
        }
        if self.config.include_maven_central {
            repositories.extend(RepositorySet::maven_central(next_priority));
        }
        RepositorySet::new(repositories).map_err(|source| ConfigError::InvalidEntry {
            origin: "repositories".to_string(),
            source,
        })
    }

    /// Plain relative paths are taken relative to the config file.
    fn repository_location(&self, url: &str) -> String {
        let trimmed = url.trim();
        if trimmed.contains("://") {
            return trimmed.to_string();
        }
        self.relative(&expand_home(Path::new(trimmed)))
            .display()
            .to_string()
    }

    fn relative(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl RetrySection {
    fn schedule(&self) -> Result<RetrySchedule, ConfigError> {
        let defaults = RetrySchedule::default();
        let schedule = RetrySchedule {
            attempts: self.attempts.unwrap_or(defaults.attempts),
            base_delay: self
                .base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            max_delay: self
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
        };
        if schedule.attempts == 0 {
            return Err(ConfigError::invalid_setting("retry.attempts", "must be at least 1"));
        }
        if schedule.max_delay < schedule.base_delay {
            return Err(ConfigError::invalid_setting(
                "retry.max_delay_ms",
                "must not be below retry.base_delay_ms",
            ));
        }
        Ok(schedule)
    }
}

fn dependency(
    entry: &DependencyEntry,
    separator: &str,
    repositories: &RepositorySet,
    origin: &str,
) -> Result<ArtifactDescriptor, ConfigError> {
    let invalid = |source| ConfigError::InvalidEntry {
        origin: origin.to_string(),
        source,
    };
    let coordinate = parse_coordinate(&entry.coordinate, separator).map_err(invalid)?;
    let rules = entry
        .relocations
        .iter()
        .map(|r| RelocationRule::with_separator(&r.from, &r.to, separator))
        .collect::<Result<Vec<_>, _>>()
        .map_err(invalid)?;
    let mut descriptor = ArtifactDescriptor::new(coordinate).with_relocations(rules);
    if let Some(id) = &entry.repository {
        let known = RepositoryId::new(id.as_str()).filter(|id| repositories.get(id).is_some());
        let Some(id) = known else {
            return Err(ConfigError::UnknownRepository {
                origin: origin.to_string(),
                repository: id.clone(),
            });
        };
        descriptor = descriptor.with_repository(id);
    }
    Ok(descriptor)
}

/// Separator-encoded when the group or artifact uses the separator.
fn parse_coordinate(raw: &str, separator: &str) -> Result<Coordinate, InvalidInput> {
    let mut parts = raw.trim().splitn(3, ':');
    let encoded = parts
        .by_ref()
        .take(2)
        .any(|part| part.contains(separator));
    if encoded {
        Coordinate::parse_with_separator(raw.trim(), separator)
    } else {
        raw.parse()
    }
}

/// `--relocate com.acme=shaded.acme`.
fn parse_rule_flag(raw: &str, separator: &str) -> Result<RelocationRule, ConfigError> {
    let (from, to) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::invalid_setting("--relocate", format!("'{raw}' is not FROM=TO")))?;
    RelocationRule::with_separator(from.trim(), to.trim(), separator).map_err(|source| {
        ConfigError::InvalidEntry {
            origin: "command line".to_string(),
            source,
        }
    })
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
