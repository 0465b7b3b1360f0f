//! Artifact coordinates and descriptors.
//!
//! A [`Coordinate`] is the identity of one artifact: group, artifact, version
//! and optional classifier. An [`ArtifactDescriptor`] wraps a coordinate with
//! the per-dependency settings the host declared for it (relocation rules and
//! an optional repository override).

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ArtifactName, Classifier, GroupId, InvalidInput, RelocationRule, RepositoryId, Version};

/// Separator hosts may use in place of `.` and `/` so coordinates survive
/// build-time string relocation (e.g. `com|google|guava:guava:33.0.0-jre`).
pub const DEFAULT_SEPARATOR: &str = "|";

/// Returns `true` if `value` is non-empty and only uses `[A-Za-z0-9._-]`.
fn is_valid_component(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

// ---------------------------------------------------------------------------
// Module key
// ---------------------------------------------------------------------------

/// Group + artifact: the unit at which version conflicts are decided.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleKey {
    /// Group id.
    pub group: GroupId,
    /// Artifact id.
    pub artifact: ArtifactName,
}

impl std::fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.group, self.artifact)
    }
}

// ---------------------------------------------------------------------------
// Coordinate
// ---------------------------------------------------------------------------

/// Identity of one artifact: `group:artifact:version[:classifier]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate {
    group: GroupId,
    artifact: ArtifactName,
    version: Version,
    classifier: Option<Classifier>,
}

impl Coordinate {
    /// Builds a coordinate from already-decoded components.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`] if any component is empty or contains
    /// characters outside `[A-Za-z0-9._-]`.
    pub fn new(
        group: &str,
        artifact: &str,
        version: &str,
        classifier: Option<&str>,
    ) -> Result<Self, InvalidInput> {
        let display = match classifier {
            Some(c) => format!("{group}:{artifact}:{version}:{c}"),
            None => format!("{group}:{artifact}:{version}"),
        };
        for (label, value) in [("group id", group), ("artifact id", artifact), ("version", version)] {
            if !is_valid_component(value) {
                return Err(InvalidInput::coordinate(
                    &display,
                    format!("{label} must be non-empty and use only [A-Za-z0-9._-]"),
                ));
            }
        }
        if let Some(c) = classifier {
            if !is_valid_component(c) {
                return Err(InvalidInput::coordinate(
                    &display,
                    "classifier must use only [A-Za-z0-9._-]",
                ));
            }
        }

        let invalid = || InvalidInput::coordinate(&display, "empty component");
        Ok(Self {
            group: GroupId::new(group).ok_or_else(invalid)?,
            artifact: ArtifactName::new(artifact).ok_or_else(invalid)?,
            version: Version::parse(version).ok_or_else(invalid)?,
            classifier: classifier.and_then(Classifier::new),
        })
    }

    /// Parses a separator-encoded coordinate, where `separator` stands in for
    /// `.` in the group and artifact ids.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`] if the separator is empty or itself contains
    /// `.` or `/`, if the group/artifact still contain a literal `.` or `/`,
    /// or if the decoded coordinate is invalid.
    pub fn parse_with_separator(input: &str, separator: &str) -> Result<Self, InvalidInput> {
        if separator.is_empty() || separator.contains(['.', '/']) {
            return Err(InvalidInput::coordinate(
                input,
                format!("separator '{separator}' must be non-empty and not contain '.' or '/'"),
            ));
        }
        let parts: Vec<&str> = input.split(':').collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(InvalidInput::coordinate(
                input,
                "expected group:artifact:version[:classifier]",
            ));
        }
        if parts[0].contains(['.', '/']) || parts[1].contains(['.', '/']) {
            return Err(InvalidInput::coordinate(
                input,
                format!("use the separator '{separator}' instead of '.' or '/'"),
            ));
        }
        let group = parts[0].replace(separator, ".");
        let artifact = parts[1].replace(separator, ".");
        Self::new(&group, &artifact, parts[2], parts.get(3).copied())
    }

    /// Group id.
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Artifact id.
    pub fn artifact(&self) -> &ArtifactName {
        &self.artifact
    }

    /// Version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Classifier, if any.
    pub fn classifier(&self) -> Option<&Classifier> {
        self.classifier.as_ref()
    }

    /// The module this coordinate is a version of.
    pub fn module(&self) -> ModuleKey {
        ModuleKey {
            group: self.group.clone(),
            artifact: self.artifact.clone(),
        }
    }

    /// Returns a copy of this coordinate at a different version.
    pub fn with_version(&self, version: Version) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    /// Repository-relative directory: `com/acme/widget/1.2.0`.
    pub fn directory(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group.as_str().replace('.', "/"),
            self.artifact,
            self.version
        )
    }

    /// Repository-relative path of the binary artifact.
    pub fn jar_path(&self) -> String {
        match &self.classifier {
            Some(c) => format!(
                "{}/{}-{}-{}.jar",
                self.directory(),
                self.artifact,
                self.version,
                c
            ),
            None => format!("{}/{}-{}.jar", self.directory(), self.artifact, self.version),
        }
    }

    /// Repository-relative path of the dependency metadata.
    ///
    /// Classified artifacts share the POM of their unclassified sibling.
    pub fn pom_path(&self) -> String {
        format!("{}/{}-{}.pom", self.directory(), self.artifact, self.version)
    }

    /// File name used when materialising the artifact for a host:
    /// `widget-1.2.0.jar`, or `widget-1.2.0-relocated.jar` when rewritten.
    pub fn file_name(&self, relocated: bool) -> String {
        let mut name = format!("{}-{}", self.artifact, self.version);
        if let Some(c) = &self.classifier {
            name.push('-');
            name.push_str(c.as_str());
        }
        if relocated {
            name.push_str("-relocated");
        }
        name.push_str(".jar");
        name
    }
}

impl FromStr for Coordinate {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [g, a, v] => Self::new(g, a, v, None),
            [g, a, v, c] => Self::new(g, a, v, Some(c)),
            _ => Err(InvalidInput::coordinate(
                s,
                "expected group:artifact:version[:classifier]",
            )),
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{c}")?;
        }
        Ok(())
    }
}

impl Serialize for Coordinate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Coordinate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// One declared dependency: a coordinate plus how to load it.
///
/// Identity (equality, hashing, report keys) is the coordinate alone; two
/// descriptors for the same coordinate with different rules are the same
/// dependency declared twice.
#[derive(Debug, Clone)]
pub struct ArtifactDescriptor {
    coordinate: Coordinate,
    relocations: Vec<RelocationRule>,
    repository: Option<RepositoryId>,
}

impl ArtifactDescriptor {
    /// Creates a descriptor with no relocation rules and no override.
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            relocations: Vec::new(),
            repository: None,
        }
    }

    /// Appends a relocation rule. Rules are applied in the order added.
    #[must_use]
    pub fn with_relocation(mut self, rule: RelocationRule) -> Self {
        if !self.relocations.contains(&rule) {
            self.relocations.push(rule);
        }
        self
    }

    /// Appends several relocation rules, skipping duplicates.
    #[must_use]
    pub fn with_relocations(self, rules: impl IntoIterator<Item = RelocationRule>) -> Self {
        rules.into_iter().fold(self, Self::with_relocation)
    }

    /// Restricts fetching to the named repository.
    #[must_use]
    pub fn with_repository(mut self, repository: RepositoryId) -> Self {
        self.repository = Some(repository);
        self
    }

    /// The artifact identity.
    pub fn coordinate(&self) -> &Coordinate {
        &self.coordinate
    }

    /// Ordered relocation rules.
    pub fn relocations(&self) -> &[RelocationRule] {
        &self.relocations
    }

    /// Repository override, if any.
    pub fn repository(&self) -> Option<&RepositoryId> {
        self.repository.as_ref()
    }
}

impl PartialEq for ArtifactDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.coordinate == other.coordinate
    }
}

impl Eq for ArtifactDescriptor {}

impl std::hash::Hash for ArtifactDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.coordinate.hash(state);
    }
}

impl std::fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.coordinate)
    }
}
