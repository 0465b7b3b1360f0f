//! Name remapping in the three spellings found inside a JAR.

use artifacts::{relocate_dotted, RelocationRule};

/// Characters that may precede the `L` of a class type inside a descriptor or
/// generic signature.
const DESCRIPTOR_BOUNDARY: &[u8] = b"();[<>:^+-*";

const SERVICES_DIR: &str = "META-INF/services/";
const VERSIONS_DIR: &str = "META-INF/versions/";

/// Rules pre-expanded into both dotted and internal form.
pub(crate) struct Remapper<'r> {
    rules: &'r [RelocationRule],
    internal: Vec<(String, String)>,
}

impl<'r> Remapper<'r> {
    pub(crate) fn new(rules: &'r [RelocationRule]) -> Self {
        let internal = rules
            .iter()
            .map(|r| (r.internal_from(), r.internal_to()))
            .collect();
        Self { rules, internal }
    }

    /// `com.acme.Foo` style names.
    pub(crate) fn dotted(&self, name: &str) -> Option<String> {
        relocate_dotted(self.rules, name)
    }

    /// `com/acme/Foo.class` style paths; the prefix must be followed by `/`.
    pub(crate) fn internal_path(&self, path: &str) -> Option<String> {
        self.internal.iter().find_map(|(from, to)| {
            let rest = path.strip_prefix(from.as_str())?;
            rest.starts_with('/').then(|| format!("{to}{rest}"))
        })
    }

    /// New name for an archive entry, if it moves.
    pub(crate) fn entry_name(&self, name: &str) -> Option<String> {
        if let Some(service) = name.strip_prefix(SERVICES_DIR) {
            return self
                .dotted(service)
                .map(|relocated| format!("{SERVICES_DIR}{relocated}"));
        }
        if let Some(versioned) = name.strip_prefix(VERSIONS_DIR) {
            let (release, path) = versioned.split_once('/')?;
            return self
                .internal_path(path)
                .map(|relocated| format!("{VERSIONS_DIR}{release}/{relocated}"));
        }
        self.internal_path(name)
    }

    /// Rewrites one class-file UTF-8 constant.
    ///
    /// A constant that is itself a dotted name under a rule is relocated as a
    /// whole (string literals such as `Class.forName` arguments). Otherwise
    /// every internal name starting at a descriptor boundary is relocated, so
    /// `com/acme/Foo`, `[Lcom/acme/Foo;`, `(Lcom/acme/A;)Lcom/acme/B;` and
    /// `Ljava/util/List<Lcom/acme/Foo;>;` are all covered.
    pub(crate) fn constant(&self, value: &str) -> Option<String> {
        if let Some(dotted) = self.dotted(value) {
            return Some(dotted);
        }

        let bytes = value.as_bytes();
        let mut out = String::new();
        let mut copied = 0;
        let mut i = 0;
        while i < bytes.len() {
            if at_name_start(bytes, i) {
                if let Some((from, to)) = self.internal_match(&value[i..]) {
                    out.push_str(&value[copied..i]);
                    out.push_str(to);
                    i += from.len();
                    copied = i;
                    continue;
                }
            }
            i += 1;
        }
        if copied == 0 {
            return None;
        }
        out.push_str(&value[copied..]);
        Some(out)
    }

    /// A rule prefix at the start of `rest`, ending at `/` or at the end of
    /// the value (a bare package name such as a `CONSTANT_Package` entry).
    fn internal_match(&self, rest: &str) -> Option<(&str, &str)> {
        self.internal.iter().find_map(|(from, to)| {
            let tail = rest.strip_prefix(from.as_str())?;
            (tail.is_empty() || tail.starts_with('/'))
                .then_some((from.as_str(), to.as_str()))
        })
    }
}

/// `i` starts a class name: the start of the value, or just after an `L`
/// that itself sits on a descriptor boundary.
fn at_name_start(bytes: &[u8], i: usize) -> bool {
    if i == 0 {
        return true;
    }
    if bytes[i - 1] != b'L' {
        return false;
    }
    i == 1 || DESCRIPTOR_BOUNDARY.contains(&bytes[i - 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<RelocationRule> {
        vec![
            RelocationRule::new("com.acme.core", "lib.core").unwrap(),
            RelocationRule::new("com.acme", "shaded.acme").unwrap(),
        ]
    }

    #[test]
    fn rewrites_every_class_in_a_method_descriptor() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert_eq!(
            remap
                .constant("(Lcom/acme/A;Ljava/lang/String;[Lcom/acme/core/B;)Lcom/acme/C;")
                .as_deref(),
            Some("(Lshaded/acme/A;Ljava/lang/String;[Llib/core/B;)Lshaded/acme/C;")
        );
    }

    #[test]
    fn rewrites_generic_signatures() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert_eq!(
            remap
                .constant("<T:Lcom/acme/Base;>Ljava/util/List<+Lcom/acme/Item;>;")
                .as_deref(),
            Some("<T:Lshaded/acme/Base;>Ljava/util/List<+Lshaded/acme/Item;>;")
        );
    }

    #[test]
    fn rewrites_bare_internal_names_and_dotted_literals() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert_eq!(
            remap.constant("com/acme/Foo$Inner").as_deref(),
            Some("shaded/acme/Foo$Inner")
        );
        assert_eq!(
            remap.constant("com.acme.plugin.Impl").as_deref(),
            Some("shaded.acme.plugin.Impl")
        );
    }

    #[test]
    fn rewrites_bare_package_names() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert_eq!(remap.constant("com/acme").as_deref(), Some("shaded/acme"));
        assert_eq!(remap.constant("com/acme/core").as_deref(), Some("lib/core"));
        assert_eq!(remap.constant("com/acmesoft"), None);
    }

    #[test]
    fn leaves_lookalikes_alone() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert_eq!(remap.constant("Lcom/acmesoft/Foo;"), None);
        assert_eq!(remap.constant("XLcom/acme/Foo;"), None);
        assert_eq!(remap.constant("hello com.acme.Foo"), None);
        assert_eq!(remap.constant("toString"), None);
    }

    #[test]
    fn entry_names_cover_services_and_versioned_classes() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert_eq!(
            remap.entry_name("com/acme/Foo.class").as_deref(),
            Some("shaded/acme/Foo.class")
        );
        assert_eq!(remap.entry_name("com/acme/").as_deref(), Some("shaded/acme/"));
        assert_eq!(
            remap.entry_name("META-INF/services/com.acme.Spi").as_deref(),
            Some("META-INF/services/shaded.acme.Spi")
        );
        assert_eq!(
            remap.entry_name("META-INF/versions/11/com/acme/Foo.class").as_deref(),
            Some("META-INF/versions/11/shaded/acme/Foo.class")
        );
        assert_eq!(remap.entry_name("META-INF/MANIFEST.MF"), None);
        assert_eq!(remap.entry_name("org/other/Bar.class"), None);
    }
}
