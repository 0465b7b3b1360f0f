//! Zip-level traversal: decides what happens to each JAR entry.

use std::io::{Cursor, Read, Write};

use artifacts::{RelocationError, RelocationRule};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::remap::Remapper;
use crate::{class_file, text, SymbolTable};

const LOCAL_FILE_HEADER: &[u8] = b"PK\x03\x04";
const EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    Class,
    Service,
    Manifest,
    Signature,
    Resource,
}

impl EntryKind {
    fn of(name: &str, is_dir: bool) -> Self {
        if is_dir {
            return Self::Directory;
        }
        if name.eq_ignore_ascii_case("META-INF/MANIFEST.MF") {
            return Self::Manifest;
        }
        if let Some(file) = name.strip_prefix("META-INF/") {
            if file.strip_prefix("services/").is_some_and(|s| !s.is_empty()) {
                return Self::Service;
            }
            let upper = file.to_ascii_uppercase();
            if !file.contains('/')
                && [".SF", ".RSA", ".DSA", ".EC"]
                    .iter()
                    .any(|ext| upper.ends_with(ext))
            {
                return Self::Signature;
            }
        }
        if name.ends_with(".class") {
            return Self::Class;
        }
        Self::Resource
    }

    fn needs_content(self) -> bool {
        matches!(self, Self::Class | Self::Service | Self::Manifest)
    }
}

/// Counts reported at debug level after each relocation.
#[derive(Debug, Default)]
struct Summary {
    renamed: usize,
    rewritten: usize,
    dropped: usize,
}

fn check_format(bytes: &[u8]) -> Result<(), RelocationError> {
    if bytes.starts_with(LOCAL_FILE_HEADER) || bytes.starts_with(EMPTY_ARCHIVE) {
        Ok(())
    } else {
        Err(RelocationError::UnsupportedFormat)
    }
}

fn corrupt(e: impl std::fmt::Display) -> RelocationError {
    RelocationError::CorruptArchive {
        reason: e.to_string(),
    }
}

fn write_failed(e: impl std::fmt::Display) -> RelocationError {
    RelocationError::WriteFailed {
        reason: e.to_string(),
    }
}

fn options(method: CompressionMethod) -> SimpleFileOptions {
    let method = if method == CompressionMethod::Stored {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(zip::DateTime::default())
}

struct Entry {
    name: String,
    kind: EntryKind,
    method: CompressionMethod,
    content: Option<Vec<u8>>,
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, index: usize) -> Result<Entry, RelocationError> {
    let mut file = archive.by_index(index).map_err(corrupt)?;
    let name = file.name().to_string();
    let kind = EntryKind::of(&name, file.is_dir());
    let content = if kind.needs_content() {
        let mut buf = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut buf)
            .map_err(|e| corrupt(format!("{name}: {e}")))?;
        Some(buf)
    } else {
        None
    };
    Ok(Entry {
        name,
        kind,
        method: file.compression(),
        content,
    })
}

/// Rewrites a JAR. `rules` must be non-empty.
pub(crate) fn relocate_jar(bytes: &[u8], rules: &[RelocationRule]) -> Result<Vec<u8>, RelocationError> {
    check_format(bytes)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
    let remapper = Remapper::new(rules);
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(bytes.len())));
    let mut summary = Summary::default();

    for index in 0..archive.len() {
        let entry = read_entry(&mut archive, index)?;
        if entry.kind == EntryKind::Signature {
            debug!(entry = %entry.name, "Dropping signature file invalidated by relocation");
            summary.dropped += 1;
            continue;
        }

        let new_name = remapper.entry_name(&entry.name);
        let new_content = match (entry.kind, entry.content.as_deref()) {
            (EntryKind::Class, Some(data)) => class_file::rewrite(data, &remapper)
                .map_err(|e| corrupt(format!("{}: {e}", entry.name)))?,
            (EntryKind::Service, Some(data)) => text::rewrite_service_file(data, &remapper),
            (EntryKind::Manifest, Some(data)) => text::rewrite_manifest(data, &remapper),
            _ => None,
        };
        if new_name.is_some() {
            summary.renamed += 1;
        }

        match (new_content, new_name) {
            (Some(data), name) => {
                summary.rewritten += 1;
                let target = name.unwrap_or(entry.name);
                writer
                    .start_file(target, options(entry.method))
                    .map_err(write_failed)?;
                writer.write_all(&data).map_err(write_failed)?;
            }
            (None, Some(name)) => {
                let raw = archive.by_index_raw(index).map_err(corrupt)?;
                writer.raw_copy_file_rename(raw, name).map_err(write_failed)?;
            }
            (None, None) => {
                let raw = archive.by_index_raw(index).map_err(corrupt)?;
                writer.raw_copy_file(raw).map_err(write_failed)?;
            }
        }
    }

    let output = writer.finish().map_err(write_failed)?.into_inner();
    debug!(
        entries = archive.len(),
        renamed = summary.renamed,
        rewritten = summary.rewritten,
        dropped = summary.dropped,
        "Relocated archive"
    );
    Ok(output)
}

/// Lists every symbol name in a JAR.
pub(crate) fn inspect_jar(bytes: &[u8]) -> Result<SymbolTable, RelocationError> {
    check_format(bytes)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(corrupt)?;
    let mut table = SymbolTable::default();

    for index in 0..archive.len() {
        let entry = read_entry(&mut archive, index)?;
        match (entry.kind, entry.content.as_deref()) {
            (EntryKind::Class, Some(data)) => {
                let constants = class_file::utf8_constants(data)
                    .map_err(|e| corrupt(format!("{}: {e}", entry.name)))?;
                table.constants.extend(constants);
            }
            (EntryKind::Service, Some(data)) => {
                if let Some(service) = entry.name.strip_prefix("META-INF/services/") {
                    table.services.push(service.to_string());
                }
                table.services.extend(text::service_providers(data));
            }
            (EntryKind::Manifest, Some(data)) => {
                table.manifest_classes.extend(text::manifest_classes(data));
            }
            _ => {}
        }
        table.entries.push(entry.name);
    }
    Ok(table)
}
