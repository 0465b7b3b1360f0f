//! JAR relocation for Hoist.
//!
//! [`JarRelocator`] implements [`artifacts::ArchiveRelocator`] for zip-based
//! Java archives. Given ordered [`RelocationRule`]s it moves every symbol under
//! a rule's source package to its target package, rewriting:
//!
//! - entry paths (`com/acme/Foo.class`, multi-release
//!   `META-INF/versions/<n>/...`);
//! - class-file constant pools (class names, descriptors, generic signatures,
//!   and string literals naming a relocated class);
//! - `META-INF/services/` file names and provider lines;
//! - class-valued `META-INF/MANIFEST.MF` attributes.
//!
//! Jar signature files are dropped, since any rewrite invalidates them.
//! Entries that do not change are copied without recompression, and rewritten
//! entries use a fixed timestamp, so the same input and rules always produce
//! the same bytes.
//!
//! [`JarRelocator::inspect`] lists every symbol name in an archive, which is
//! how relocation is verified.

use artifacts::{ArchiveRelocator, RelocationError, RelocationRule};
use tracing::instrument;

mod archive;
mod class_file;
mod remap;
mod text;

/// Every name an archive exposes, grouped by where it was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    /// Archive entry paths.
    pub entries: Vec<String>,
    /// UTF-8 constants from every class file.
    pub constants: Vec<String>,
    /// Service interface names and their registered providers.
    pub services: Vec<String>,
    /// Class-valued manifest attribute values.
    pub manifest_classes: Vec<String>,
}

impl SymbolTable {
    /// All names, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .chain(&self.constants)
            .chain(&self.services)
            .chain(&self.manifest_classes)
            .map(String::as_str)
    }

    /// Names that refer to `package` (dotted) or anything under it, in either
    /// dotted or internal spelling.
    pub fn references(&self, package: &str) -> Vec<&str> {
        let dotted = format!("{package}.");
        let internal = format!("{}/", package.replace('.', "/"));
        let descriptor = format!("L{internal}");
        let versioned = |s: &str| {
            s.strip_prefix("META-INF/versions/")
                .and_then(|rest| rest.split_once('/'))
                .is_some_and(|(_, path)| path.starts_with(&internal))
        };
        self.iter()
            .filter(|s| {
                *s == package
                    || s.starts_with(&dotted)
                    || s.starts_with(&internal)
                    || s.contains(&descriptor)
                    || s.strip_prefix("META-INF/services/")
                        .is_some_and(|service| service.starts_with(&dotted))
                    || versioned(*s)
            })
            .collect()
    }
}

/// Relocates zip-based Java archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct JarRelocator;

impl JarRelocator {
    /// Creates a relocator.
    pub fn new() -> Self {
        Self
    }

    /// Lists every symbol name in `archive`.
    ///
    /// # Errors
    ///
    /// [`RelocationError::UnsupportedFormat`] for non-zip input and
    /// [`RelocationError::CorruptArchive`] if the archive or one of its class
    /// files cannot be parsed.
    pub fn inspect(&self, archive: &[u8]) -> Result<SymbolTable, RelocationError> {
        archive::inspect_jar(archive)
    }
}

impl ArchiveRelocator for JarRelocator {
    #[instrument(skip_all, fields(bytes = archive.len(), rules = rules.len()))]
    fn relocate(
        &self,
        archive: &[u8],
        rules: &[RelocationRule],
    ) -> Result<Vec<u8>, RelocationError> {
        if rules.is_empty() {
            return Ok(archive.to_vec());
        }
        archive::relocate_jar(archive, rules)
    }
}
