//! Relocation rules and the build-time relocation manifest.
//!
//! A rule moves every symbol under one package prefix to another
//! (`com.acme` → `shaded.acme`). Matching happens on package boundaries only,
//! so `com.acme` matches `com.acme.Foo` and `com.acme` itself but never
//! `com.acmesoft.Foo`.
//!
//! The same rule is applied in two spellings: dotted (`com.acme.Foo`, used in
//! service files, manifests and string constants) and internal
//! (`com/acme/Foo`, used in class files and archive entry paths).

use serde::{Deserialize, Serialize};

use crate::{ArtifactName, GroupId, InvalidInput, ManifestError};

/// One namespace rewrite: symbols starting with `from_prefix` move to `to_prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelocationRule {
    from_prefix: String,
    to_prefix: String,
}

fn normalise_prefix(raw: &str) -> String {
    raw.trim().replace('/', ".").trim_matches('.').to_string()
}

fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

impl RelocationRule {
    /// Creates a rule from dotted (or slash-separated) package prefixes.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`] if either prefix is empty, contains empty
    /// segments or non-identifier characters, or if both are identical.
    pub fn new(from: &str, to: &str) -> Result<Self, InvalidInput> {
        let display = format!("{from} -> {to}");
        let from_prefix = normalise_prefix(from);
        let to_prefix = normalise_prefix(to);
        if !is_valid_prefix(&from_prefix) || !is_valid_prefix(&to_prefix) {
            return Err(InvalidInput::relocation(
                display,
                "prefixes must be non-empty package names",
            ));
        }
        if from_prefix == to_prefix {
            return Err(InvalidInput::relocation(display, "prefixes are identical"));
        }
        Ok(Self {
            from_prefix,
            to_prefix,
        })
    }

    /// Creates a rule from separator-encoded prefixes (`com|acme`).
    ///
    /// # Errors
    ///
    /// As [`RelocationRule::new`], after decoding.
    pub fn with_separator(from: &str, to: &str, separator: &str) -> Result<Self, InvalidInput> {
        if separator.is_empty() {
            return Err(InvalidInput::relocation(
                format!("{from} -> {to}"),
                "separator must not be empty",
            ));
        }
        Self::new(&from.replace(separator, "."), &to.replace(separator, "."))
    }

    /// Source prefix in dotted form.
    pub fn from_prefix(&self) -> &str {
        &self.from_prefix
    }

    /// Target prefix in dotted form.
    pub fn to_prefix(&self) -> &str {
        &self.to_prefix
    }

    /// Source prefix in internal (slash) form.
    pub fn internal_from(&self) -> String {
        self.from_prefix.replace('.', "/")
    }

    /// Target prefix in internal (slash) form.
    pub fn internal_to(&self) -> String {
        self.to_prefix.replace('.', "/")
    }

    /// Relocates a dotted name if it falls under this rule's prefix.
    pub fn apply_dotted(&self, name: &str) -> Option<String> {
        apply(name, &self.from_prefix, &self.to_prefix, '.')
    }

    /// Relocates an internal (slash) name if it falls under this rule's prefix.
    pub fn apply_internal(&self, name: &str) -> Option<String> {
        apply(name, &self.internal_from(), &self.internal_to(), '/')
    }
}

fn apply(name: &str, from: &str, to: &str, separator: char) -> Option<String> {
    let rest = name.strip_prefix(from)?;
    if rest.is_empty() || rest.starts_with(separator) {
        Some(format!("{to}{rest}"))
    } else {
        None
    }
}

/// Relocates a dotted name with the first matching rule, if any.
pub fn relocate_dotted(rules: &[RelocationRule], name: &str) -> Option<String> {
    rules.iter().find_map(|rule| rule.apply_dotted(name))
}

/// Relocates an internal name with the first matching rule, if any.
pub fn relocate_internal(rules: &[RelocationRule], name: &str) -> Option<String> {
    rules.iter().find_map(|rule| rule.apply_internal(name))
}

impl std::fmt::Display for RelocationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from_prefix, self.to_prefix)
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// One record of the build-time relocation manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    /// Source package prefix.
    #[serde(alias = "fromPrefix")]
    pub from: String,
    /// Target package prefix.
    #[serde(alias = "toPrefix")]
    pub to: String,
    /// Group the rule applies to.
    pub group_id: String,
    /// Artifact the rule applies to.
    pub artifact_id: String,
}

#[derive(Debug, Clone)]
struct ManifestEntry {
    group: GroupId,
    artifact: ArtifactName,
    rule: RelocationRule,
}

/// Relocation rules bundled by the build-time manifest generator, keyed by
/// the artifact they apply to.
#[derive(Debug, Clone, Default)]
pub struct RelocationManifest {
    entries: Vec<ManifestEntry>,
}

impl RelocationManifest {
    /// Parses the manifest: a JSON array of
    /// `{ "from", "to", "groupId", "artifactId" }` records.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Malformed`] for JSON that does not match the
    /// record shape and [`ManifestError::InvalidRecord`] for records with an
    /// unusable rule or empty group/artifact.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let records: Vec<ManifestRecord> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    /// Builds a manifest from already-deserialised records.
    ///
    /// # Errors
    ///
    /// See [`RelocationManifest::from_json`].
    pub fn from_records(records: Vec<ManifestRecord>) -> Result<Self, ManifestError> {
        let mut entries = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let rule = RelocationRule::new(&record.from, &record.to)
                .map_err(|source| ManifestError::InvalidRecord { index, source })?;
            let missing = || ManifestError::InvalidRecord {
                index,
                source: InvalidInput::relocation(
                    format!("{}:{}", record.group_id, record.artifact_id),
                    "groupId and artifactId must be non-empty",
                ),
            };
            entries.push(ManifestEntry {
                group: GroupId::new(record.group_id.clone()).ok_or_else(missing)?,
                artifact: ArtifactName::new(record.artifact_id.clone()).ok_or_else(missing)?,
                rule,
            });
        }
        Ok(Self { entries })
    }

    /// Rules for one artifact, in manifest order.
    pub fn rules_for(&self, group: &GroupId, artifact: &ArtifactName) -> Vec<RelocationRule> {
        self.entries
            .iter()
            .filter(|e| &e.group == group && &e.artifact == artifact)
            .map(|e| e.rule.clone())
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the manifest has no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
