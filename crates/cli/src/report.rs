//! Command output.

use std::io::{self, Write};

use artifacts::{LoadReport, LoadResult, LoadStage, ResolvedArtifact};
use engine::Resolution;
use serde::Serialize;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One line per artifact.
    Text,
    /// A single pretty-printed JSON document.
    Json,
}

#[derive(Debug, Serialize)]
struct Outcome {
    coordinate: String,
    loaded: bool,
    stages: Vec<LoadStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    handle: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&LoadResult> for Outcome {
    fn from(result: &LoadResult) -> Self {
        match result {
            LoadResult::Loaded(loaded) => Self {
                coordinate: loaded.coordinate.to_string(),
                loaded: true,
                stages: loaded.stages.clone(),
                handle: Some(loaded.handle.as_u64()),
                location: Some(loaded.location.display().to_string()),
                repository: loaded.origin.as_ref().map(|o| o.repository.to_string()),
                source_checksum: loaded.origin.as_ref().map(|o| o.checksum.to_string()),
                error: None,
            },
            LoadResult::Failed(failed) => Self {
                coordinate: failed.coordinate.to_string(),
                loaded: false,
                stages: failed.completed.clone(),
                handle: None,
                location: None,
                repository: None,
                source_checksum: None,
                error: Some(failed.error.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct RootOutcome {
    requested: String,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Serialize)]
struct LoadSummary {
    session: String,
    roots: Vec<RootOutcome>,
    members: Vec<Outcome>,
    injection_order: Vec<String>,
    conflicts: Vec<String>,
    resolution_errors: Vec<String>,
}

impl From<&LoadReport> for LoadSummary {
    fn from(report: &LoadReport) -> Self {
        Self {
            session: report.session.to_string(),
            roots: report
                .roots
                .iter()
                .map(|(requested, result)| RootOutcome {
                    requested: requested.to_string(),
                    outcome: result.into(),
                })
                .collect(),
            members: report.members.values().map(Outcome::from).collect(),
            injection_order: report.injection_order.iter().map(ToString::to_string).collect(),
            conflicts: report.conflicts.iter().map(ToString::to_string).collect(),
            resolution_errors: report
                .resolution_errors
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Member {
    coordinate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
    relocations: Vec<String>,
    dependencies: Vec<String>,
}

impl From<&ResolvedArtifact> for Member {
    fn from(member: &ResolvedArtifact) -> Self {
        Self {
            coordinate: member.coordinate().to_string(),
            repository: member.repository.as_ref().map(ToString::to_string),
            relocations: member
                .descriptor
                .relocations()
                .iter()
                .map(ToString::to_string)
                .collect(),
            dependencies: member.dependencies.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResolutionSummary {
    closure: Vec<Member>,
    roots: Vec<(String, String)>,
    conflicts: Vec<String>,
    errors: Vec<String>,
}

/// Writes a load session's outcome.
pub fn write_load(out: &mut impl Write, report: &LoadReport, format: OutputFormat) -> io::Result<()> {
    let summary = LoadSummary::from(report);
    if format == OutputFormat::Json {
        serde_json::to_writer_pretty(&mut *out, &summary)?;
        return writeln!(out);
    }

    writeln!(out, "session {}", summary.session)?;
    for root in &summary.roots {
        let outcome = &root.outcome;
        let selected = if outcome.coordinate == root.requested {
            String::new()
        } else {
            format!(" (as {})", outcome.coordinate)
        };
        let origin = outcome
            .repository
            .as_deref()
            .map(|repository| format!(" from {repository}"))
            .unwrap_or_default();
        match &outcome.error {
            None => writeln!(
                out,
                "  loaded  {}{selected}{origin} [{}]",
                root.requested,
                stage_list(&outcome.stages)
            )?,
            Some(error) => writeln!(
                out,
                "  FAILED  {}{selected} after [{}]: {error}",
                root.requested,
                stage_list(&outcome.stages)
            )?,
        }
    }
    let dependencies = summary
        .members
        .iter()
        .filter(|m| !summary.roots.iter().any(|r| r.outcome.coordinate == m.coordinate));
    for member in dependencies.filter(|m| !m.loaded) {
        writeln!(
            out,
            "  FAILED  {} (dependency): {}",
            member.coordinate,
            member.error.as_deref().unwrap_or_default()
        )?;
    }
    write_notes(out, &summary.conflicts, &summary.resolution_errors)?;
    writeln!(
        out,
        "{} of {} members loaded, {} newly injected",
        summary.members.iter().filter(|m| m.loaded).count(),
        summary.members.len(),
        summary.injection_order.len()
    )
}

/// Writes a resolved closure.
pub fn write_resolution(
    out: &mut impl Write,
    resolution: &Resolution,
    format: OutputFormat,
) -> io::Result<()> {
    let summary = ResolutionSummary {
        closure: resolution.closure.iter().map(Member::from).collect(),
        roots: resolution
            .roots
            .iter()
            .map(|(requested, selected)| (requested.to_string(), selected.to_string()))
            .collect(),
        conflicts: resolution.conflicts.iter().map(ToString::to_string).collect(),
        errors: resolution.errors.iter().map(ToString::to_string).collect(),
    };
    if format == OutputFormat::Json {
        serde_json::to_writer_pretty(&mut *out, &summary)?;
        return writeln!(out);
    }

    for member in &summary.closure {
        write!(out, "{}", member.coordinate)?;
        if let Some(repository) = &member.repository {
            write!(out, " from {repository}")?;
        }
        if !member.relocations.is_empty() {
            write!(out, " relocating {}", member.relocations.join(", "))?;
        }
        writeln!(out)?;
    }
    write_notes(out, &summary.conflicts, &summary.errors)
}

fn write_notes(out: &mut impl Write, conflicts: &[String], errors: &[String]) -> io::Result<()> {
    for conflict in conflicts {
        writeln!(out, "conflict: {conflict}")?;
    }
    for error in errors {
        writeln!(out, "warning: {error}")?;
    }
    Ok(())
}

fn stage_list(stages: &[LoadStage]) -> String {
    stages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" > ")
}
