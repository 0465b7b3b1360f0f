//! Maven POM metadata: the subset needed to expand a dependency closure.
//!
//! Only the document itself is read. Parent POMs and imported BOMs are not
//! fetched, so values inherited from them are available only when the child
//! repeats them (the `<parent>` block's own `groupId`/`version` are honoured).
//!
//! ## Filtering
//!
//! A declared dependency contributes to the runtime closure when:
//!
//! - its scope (own, else managed) is absent, `compile` or `runtime`;
//! - it is not `<optional>true</optional>`;
//! - its type is absent, `jar` or `bundle`.
//!
//! Dependencies that pass the filter but still have no concrete version after
//! interpolation and `<dependencyManagement>` lookup are reported as
//! [`ResolutionError::UnresolvableVersion`] and skipped.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{ArtifactName, Coordinate, GroupId, ModuleKey, PomError, ResolutionError};

/// Guards against self-referential properties.
const MAX_INTERPOLATION_STEPS: usize = 32;

/// An `<exclusion>`: a module (or `*` wildcard) pruned from a dependency's subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Exclusion {
    /// Group id, or `*`.
    pub group: String,
    /// Artifact id, or `*`.
    pub artifact: String,
}

impl Exclusion {
    /// Returns `true` if this exclusion prunes `module`.
    pub fn matches(&self, module: &ModuleKey) -> bool {
        (self.group == "*" || self.group == module.group.as_str())
            && (self.artifact == "*" || self.artifact == module.artifact.as_str())
    }
}

/// A runtime dependency read from a POM, with a concrete version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredDependency {
    /// The dependency's coordinate.
    pub coordinate: Coordinate,
    /// Modules excluded from its subtree.
    pub exclusions: Vec<Exclusion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RawDependency {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    classifier: Option<String>,
    scope: Option<String>,
    optional: Option<String>,
    kind: Option<String>,
    exclusions: Vec<Exclusion>,
}

impl RawDependency {
    fn set(&mut self, field: &str, text: &str) {
        let slot = match field {
            "groupId" => &mut self.group_id,
            "artifactId" => &mut self.artifact_id,
            "version" => &mut self.version,
            "classifier" => &mut self.classifier,
            "scope" => &mut self.scope,
            "optional" => &mut self.optional,
            "type" => &mut self.kind,
            _ => return,
        };
        *slot = Some(text.to_string());
    }
}

/// The parsed `<project>` document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectModel {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    parent_group_id: Option<String>,
    parent_version: Option<String>,
    properties: BTreeMap<String, String>,
    dependencies: Vec<RawDependency>,
    managed: Vec<RawDependency>,
}

/// Parser state that only lives while reading one document.
#[derive(Default)]
struct Cursor {
    path: Vec<String>,
    dependency: Option<RawDependency>,
    exclusion: Option<Exclusion>,
}

fn segments(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

impl ProjectModel {
    /// Parses a POM document.
    ///
    /// # Errors
    ///
    /// Returns [`PomError::Xml`] for malformed XML and
    /// [`PomError::NotAProject`] when the root element is not `<project>`.
    pub fn parse(xml: &str) -> Result<Self, PomError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut model = Self::default();
        let mut cursor = Cursor::default();
        let mut saw_root = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    check_root(&mut saw_root, &cursor, &name)?;
                    cursor.path.push(name);
                    model.open(&mut cursor);
                }
                Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    check_root(&mut saw_root, &cursor, &name)?;
                    cursor.path.push(name);
                    model.open(&mut cursor);
                    model.close(&mut cursor);
                    cursor.path.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(|e| PomError::Xml {
                        reason: e.to_string(),
                    })?;
                    model.text(&mut cursor, text.trim());
                }
                Ok(Event::CData(c)) => {
                    let text = String::from_utf8_lossy(c.as_ref()).into_owned();
                    model.text(&mut cursor, text.trim());
                }
                Ok(Event::End(_)) => {
                    model.close(&mut cursor);
                    cursor.path.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(PomError::Xml {
                        reason: format!("at byte {}: {e}", reader.buffer_position()),
                    })
                }
            }
        }

        if !saw_root {
            return Err(PomError::NotAProject {
                root: String::new(),
            });
        }
        Ok(model)
    }

    fn open(&mut self, cursor: &mut Cursor) {
        match segments(&cursor.path).as_slice() {
            ["project", "dependencies", "dependency"]
            | ["project", "dependencyManagement", "dependencies", "dependency"] => {
                cursor.dependency = Some(RawDependency::default());
            }
            [.., "dependency", "exclusions", "exclusion"] if cursor.dependency.is_some() => {
                cursor.exclusion = Some(Exclusion::default());
            }
            _ => {}
        }
    }

    fn close(&mut self, cursor: &mut Cursor) {
        match segments(&cursor.path).as_slice() {
            ["project", "dependencies", "dependency"] => {
                if let Some(dep) = cursor.dependency.take() {
                    self.dependencies.push(dep);
                }
            }
            ["project", "dependencyManagement", "dependencies", "dependency"] => {
                if let Some(dep) = cursor.dependency.take() {
                    self.managed.push(dep);
                }
            }
            [.., "dependency", "exclusions", "exclusion"] => {
                if let (Some(dep), Some(exclusion)) =
                    (cursor.dependency.as_mut(), cursor.exclusion.take())
                {
                    dep.exclusions.push(exclusion);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, cursor: &mut Cursor, text: &str) {
        let owned = text.to_string();
        match segments(&cursor.path).as_slice() {
            ["project", "groupId"] => self.group_id = Some(owned),
            ["project", "artifactId"] => self.artifact_id = Some(owned),
            ["project", "version"] => self.version = Some(owned),
            ["project", "parent", "groupId"] => self.parent_group_id = Some(owned),
            ["project", "parent", "version"] => self.parent_version = Some(owned),
            ["project", "properties", key] => {
                self.properties.insert((*key).to_string(), owned);
            }
            [.., "dependency", "exclusions", "exclusion", field] => {
                if let Some(exclusion) = cursor.exclusion.as_mut() {
                    match *field {
                        "groupId" => exclusion.group = owned,
                        "artifactId" => exclusion.artifact = owned,
                        _ => {}
                    }
                }
            }
            [.., "dependency", field] => {
                if let Some(dep) = cursor.dependency.as_mut() {
                    dep.set(field, &owned);
                }
            }
            _ => {}
        }
    }

    /// Effective group id (own, else the parent's).
    pub fn group_id(&self) -> Option<String> {
        self.group_id
            .as_deref()
            .or(self.parent_group_id.as_deref())
            .map(|g| self.interpolate(g))
    }

    /// Artifact id as declared.
    pub fn artifact_id(&self) -> Option<&str> {
        self.artifact_id.as_deref()
    }

    /// Effective version (own, else the parent's).
    pub fn version(&self) -> Option<String> {
        self.version
            .as_deref()
            .or(self.parent_version.as_deref())
            .map(|v| self.interpolate(v))
    }

    /// Declared `<properties>`.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "project.version" | "pom.version" | "version" => self
                .version
                .clone()
                .or_else(|| self.parent_version.clone()),
            "project.groupId" | "pom.groupId" | "groupId" => self
                .group_id
                .clone()
                .or_else(|| self.parent_group_id.clone()),
            "project.artifactId" | "pom.artifactId" | "artifactId" => self.artifact_id.clone(),
            "project.parent.version" | "parent.version" => self.parent_version.clone(),
            "project.parent.groupId" | "parent.groupId" => self.parent_group_id.clone(),
            other => self.properties.get(other).cloned(),
        }
    }

    /// Replaces `${...}` placeholders. Unknown placeholders are left in place.
    pub fn interpolate(&self, raw: &str) -> String {
        let mut value = raw.to_string();
        let mut from = 0;
        for _ in 0..MAX_INTERPOLATION_STEPS {
            let Some(start) = value[from..].find("${").map(|i| i + from) else {
                break;
            };
            let Some(end) = value[start..].find('}').map(|i| i + start) else {
                break;
            };
            match self.lookup(&value[start + 2..end]) {
                Some(replacement) => value.replace_range(start..=end, &replacement),
                None => from = end + 1,
            }
        }
        value
    }

    fn managed_for(&self, group: &str, artifact: &str) -> Option<&RawDependency> {
        self.managed.iter().find(|m| {
            m.scope.as_deref() != Some("import")
                && m.group_id.as_deref().map(|g| self.interpolate(g)).as_deref() == Some(group)
                && m.artifact_id.as_deref().map(|a| self.interpolate(a)).as_deref()
                    == Some(artifact)
        })
    }

    /// Dependencies that belong in the runtime closure of `declared_by`.
    ///
    /// Problems with individual entries are returned alongside the usable
    /// dependencies rather than failing the whole document.
    pub fn runtime_dependencies(
        &self,
        declared_by: &Coordinate,
    ) -> (Vec<DeclaredDependency>, Vec<ResolutionError>) {
        let mut declared = Vec::new();
        let mut errors = Vec::new();

        for raw in &self.dependencies {
            let group = self.interpolate(raw.group_id.as_deref().unwrap_or_default());
            let artifact = self.interpolate(raw.artifact_id.as_deref().unwrap_or_default());
            let managed = self.managed_for(&group, &artifact);

            let scope = raw
                .scope
                .as_deref()
                .or_else(|| managed.and_then(|m| m.scope.as_deref()))
                .map(|s| self.interpolate(s));
            if !matches!(scope.as_deref(), None | Some("compile" | "runtime")) {
                continue;
            }
            let optional = raw
                .optional
                .as_deref()
                .or_else(|| managed.and_then(|m| m.optional.as_deref()))
                .map(|o| self.interpolate(o));
            if optional.as_deref() == Some("true") {
                continue;
            }
            let kind = raw.kind.as_deref().map(|k| self.interpolate(k));
            if !matches!(kind.as_deref(), None | Some("jar" | "bundle")) {
                continue;
            }

            let (Some(group_id), Some(artifact_name)) =
                (GroupId::new(group.as_str()), ArtifactName::new(artifact.as_str()))
            else {
                errors.push(ResolutionError::MalformedMetadata {
                    coordinate: declared_by.clone(),
                    reason: "dependency without groupId or artifactId".to_string(),
                });
                continue;
            };

            let version = raw
                .version
                .as_deref()
                .or_else(|| managed.and_then(|m| m.version.as_deref()))
                .map(|v| self.interpolate(v));
            let version = match version {
                Some(v) if is_concrete(&v) => v,
                other => {
                    errors.push(ResolutionError::UnresolvableVersion {
                        declared_by: declared_by.clone(),
                        module: ModuleKey {
                            group: group_id,
                            artifact: artifact_name,
                        },
                        version: other,
                    });
                    continue;
                }
            };

            let classifier = raw
                .classifier
                .as_deref()
                .map(|c| self.interpolate(c))
                .filter(|c| !c.is_empty());
            match Coordinate::new(&group, &artifact, &version, classifier.as_deref()) {
                Ok(coordinate) => declared.push(DeclaredDependency {
                    coordinate,
                    exclusions: raw.exclusions.clone(),
                }),
                Err(e) => errors.push(ResolutionError::MalformedMetadata {
                    coordinate: declared_by.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        (declared, errors)
    }
}

fn check_root(saw_root: &mut bool, cursor: &Cursor, name: &str) -> Result<(), PomError> {
    if cursor.path.is_empty() {
        if *saw_root || name != "project" {
            return Err(PomError::NotAProject {
                root: name.to_string(),
            });
        }
        *saw_root = true;
    }
    Ok(())
}

fn is_concrete(version: &str) -> bool {
    !version.is_empty()
        && !version.contains("${")
        && !version.starts_with('[')
        && !version.starts_with('(')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Coordinate {
        "com.acme:app:1.0".parse().unwrap()
    }

    fn coords(deps: &[DeclaredDependency]) -> Vec<String> {
        deps.iter().map(|d| d.coordinate.to_string()).collect()
    }

    const POM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <parent>
    <groupId>com.acme</groupId>
    <artifactId>acme-parent</artifactId>
    <version>7</version>
  </parent>
  <artifactId>app</artifactId>
  <version>1.0</version>
  <properties>
    <slf4j.version>2.0.9</slf4j.version>
    <codec.version>${project.version}.1</codec.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>org.managed</groupId>
        <artifactId>lib</artifactId>
        <version>3.1</version>
        <scope>runtime</scope>
      </dependency>
      <dependency>
        <groupId>com.acme</groupId>
        <artifactId>bom</artifactId>
        <version>1</version>
        <type>pom</type>
        <scope>import</scope>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
      <version>${slf4j.version}</version>
      <exclusions>
        <exclusion>
          <groupId>org.unwanted</groupId>
          <artifactId>*</artifactId>
        </exclusion>
      </exclusions>
    </dependency>
    <dependency>
      <groupId>${project.groupId}</groupId>
      <artifactId>codec</artifactId>
      <version>${codec.version}</version>
      <classifier>jdk8</classifier>
    </dependency>
    <dependency>
      <groupId>org.managed</groupId>
      <artifactId>lib</artifactId>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <scope>test</scope>
    </dependency>
    <dependency>
      <groupId>javax.servlet</groupId>
      <artifactId>servlet-api</artifactId>
      <version>2.5</version>
      <scope>provided</scope>
    </dependency>
    <dependency>
      <groupId>org.optional</groupId>
      <artifactId>extra</artifactId>
      <version>1.0</version>
      <optional>true</optional>
    </dependency>
    <dependency>
      <groupId>org.docs</groupId>
      <artifactId>docs</artifactId>
      <version>1.0</version>
      <type>zip</type>
    </dependency>
  </dependencies>
  <build>
    <plugins>
      <plugin>
        <artifactId>maven-shade-plugin</artifactId>
        <dependencies>
          <dependency>
            <groupId>org.plugin</groupId>
            <artifactId>only-at-build</artifactId>
            <version>1.0</version>
          </dependency>
        </dependencies>
      </plugin>
    </plugins>
  </build>
</project>"#;

    #[test]
    fn keeps_only_runtime_dependencies() {
        let model = ProjectModel::parse(POM).unwrap();
        let (deps, errors) = model.runtime_dependencies(&owner());
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            coords(&deps),
            vec![
                "org.slf4j:slf4j-api:2.0.9",
                "com.acme:codec:1.0.1:jdk8",
                "org.managed:lib:3.1",
            ]
        );
    }

    #[test]
    fn carries_exclusions() {
        let model = ProjectModel::parse(POM).unwrap();
        let (deps, _) = model.runtime_dependencies(&owner());
        let unwanted = ModuleKey {
            group: GroupId::new("org.unwanted").unwrap(),
            artifact: ArtifactName::new("anything").unwrap(),
        };
        assert_eq!(deps[0].exclusions.len(), 1);
        assert!(deps[0].exclusions[0].matches(&unwanted));
        assert!(deps[1].exclusions.is_empty());
    }

    #[test]
    fn inherits_group_from_parent_block() {
        let model = ProjectModel::parse(POM).unwrap();
        assert_eq!(model.group_id().as_deref(), Some("com.acme"));
        assert_eq!(model.version().as_deref(), Some("1.0"));
        assert_eq!(model.artifact_id(), Some("app"));
    }

    #[test]
    fn unresolvable_versions_are_reported_not_fatal() {
        let xml = r#"<project>
          <groupId>g</groupId><artifactId>a</artifactId><version>1</version>
          <dependencies>
            <dependency><groupId>x</groupId><artifactId>missing</artifactId></dependency>
            <dependency><groupId>x</groupId><artifactId>prop</artifactId><version>${nope}</version></dependency>
            <dependency><groupId>x</groupId><artifactId>range</artifactId><version>[1.0,2.0)</version></dependency>
            <dependency><groupId>x</groupId><artifactId>ok</artifactId><version>1.0</version></dependency>
          </dependencies>
        </project>"#;
        let model = ProjectModel::parse(xml).unwrap();
        let (deps, errors) = model.runtime_dependencies(&owner());
        assert_eq!(coords(&deps), vec!["x:ok:1.0"]);
        assert_eq!(errors.len(), 3);
        assert!(matches!(
            &errors[1],
            ResolutionError::UnresolvableVersion { version: Some(v), .. } if v == "${nope}"
        ));
    }

    #[test]
    fn self_referential_property_terminates() {
        let xml = r#"<project>
          <properties><loop>${loop}</loop></properties>
        </project>"#;
        let model = ProjectModel::parse(xml).unwrap();
        assert_eq!(model.interpolate("${loop}"), "${loop}");
    }

    #[test]
    fn rejects_non_project_and_malformed_documents() {
        assert!(matches!(
            ProjectModel::parse("<settings/>"),
            Err(PomError::NotAProject { .. })
        ));
        assert!(matches!(
            ProjectModel::parse(""),
            Err(PomError::NotAProject { .. })
        ));
        assert!(matches!(
            ProjectModel::parse("<project><version>1</project>"),
            Err(PomError::Xml { .. })
        ));
    }

    #[test]
    fn empty_project_has_no_dependencies() {
        let model = ProjectModel::parse("<project/>").unwrap();
        let (deps, errors) = model.runtime_dependencies(&owner());
        assert!(deps.is_empty() && errors.is_empty());
    }
}
