//! Text metadata that names classes: service registrations and the manifest.

use crate::remap::Remapper;

/// Manifest main-section attributes whose value is a class name.
const CLASS_ATTRIBUTES: [&str; 4] = [
    "Main-Class",
    "Premain-Class",
    "Agent-Class",
    "Launcher-Agent-Class",
];

/// Manifest line length limit, including the leading space of continuations.
const MANIFEST_LINE_BYTES: usize = 72;

// ---------------------------------------------------------------------------
// META-INF/services
// ---------------------------------------------------------------------------

/// Provider name on a service-file line, without comment or padding.
fn provider_of(line: &str) -> &str {
    let body = match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    };
    body.trim()
}

/// Relocates each provider line. Returns `None` when nothing matched.
pub(crate) fn rewrite_service_file(data: &[u8], remapper: &Remapper<'_>) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(data).ok()?;
    let mut out = String::with_capacity(text.len());
    let mut changed = false;

    for line in text.split_inclusive('\n') {
        let provider = provider_of(line);
        let relocated = if provider.is_empty() {
            None
        } else {
            remapper.dotted(provider)
        };
        match (relocated, line.find(provider)) {
            (Some(new), Some(start)) => {
                out.push_str(&line[..start]);
                out.push_str(&new);
                out.push_str(&line[start + provider.len()..]);
                changed = true;
            }
            _ => out.push_str(line),
        }
    }

    changed.then(|| out.into_bytes())
}

/// Provider class names listed in a service file.
pub(crate) fn service_providers(data: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(data)
        .lines()
        .map(provider_of)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// META-INF/MANIFEST.MF
// ---------------------------------------------------------------------------

/// One header after joining continuation lines; `start..end` is its
/// original byte span including line breaks.
struct LogicalLine {
    text: String,
    start: usize,
    end: usize,
}

fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let mut lines: Vec<LogicalLine> = Vec::new();
    let mut offset = 0;
    for physical in text.split_inclusive('\n') {
        let content = physical.trim_end_matches(['\r', '\n']);
        let end = offset + physical.len();
        match (content.strip_prefix(' '), lines.last_mut()) {
            (Some(continuation), Some(last)) => {
                last.text.push_str(continuation);
                last.end = end;
            }
            _ => lines.push(LogicalLine {
                text: content.to_string(),
                start: offset,
                end,
            }),
        }
        offset = end;
    }
    lines
}

fn class_attribute(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    CLASS_ATTRIBUTES
        .iter()
        .any(|attr| attr.eq_ignore_ascii_case(key.trim()))
        .then(|| (key, value.trim()))
}

/// Splits `line` into manifest-legal physical lines.
fn wrap(line: &str, newline: &str) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut rest = line;
    let mut limit = MANIFEST_LINE_BYTES;
    loop {
        let mut cut = rest.len().min(limit);
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        out.push_str(&rest[..cut]);
        out.push_str(newline);
        rest = &rest[cut..];
        if rest.is_empty() || cut == 0 {
            break;
        }
        out.push(' ');
        limit = MANIFEST_LINE_BYTES - 1;
    }
    out
}

/// Relocates class-valued manifest attributes. Returns `None` when nothing
/// matched; untouched headers keep their original bytes.
pub(crate) fn rewrite_manifest(data: &[u8], remapper: &Remapper<'_>) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(data).ok()?;
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let mut out = String::with_capacity(text.len());
    let mut changed = false;

    for line in logical_lines(text) {
        let relocated = class_attribute(&line.text)
            .and_then(|(key, value)| remapper.dotted(value).map(|new| format!("{key}: {new}")));
        match relocated {
            Some(header) => {
                out.push_str(&wrap(&header, newline));
                changed = true;
            }
            None => out.push_str(&text[line.start..line.end]),
        }
    }

    changed.then(|| out.into_bytes())
}

/// Values of the class-valued manifest attributes.
pub(crate) fn manifest_classes(data: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(data);
    logical_lines(&text)
        .iter()
        .filter_map(|line| class_attribute(&line.text).map(|(_, value)| value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use artifacts::RelocationRule;

    use super::*;

    fn rules() -> Vec<RelocationRule> {
        vec![RelocationRule::new("com.acme", "shaded.acme").unwrap()]
    }

    #[test]
    fn service_file_keeps_comments_and_unmatched_lines() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        let input = "# providers\ncom.acme.FastCodec  # preferred\norg.other.Codec\n\n";
        let output = rewrite_service_file(input.as_bytes(), &remap).unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "# providers\nshaded.acme.FastCodec  # preferred\norg.other.Codec\n\n"
        );
    }

    #[test]
    fn service_file_without_matches_is_untouched() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert!(rewrite_service_file(b"org.other.Codec\n", &remap).is_none());
        assert_eq!(
            service_providers(b"# c\norg.other.Codec # x\n"),
            vec!["org.other.Codec"]
        );
    }

    #[test]
    fn manifest_rewrites_class_attributes_only() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        let input = "Manifest-Version: 1.0\r\nMain-Class: com.acme.cli.Main\r\nImplementation-Title: com.acme\r\n\r\n";
        let output = String::from_utf8(rewrite_manifest(input.as_bytes(), &remap).unwrap()).unwrap();
        assert_eq!(
            output,
            "Manifest-Version: 1.0\r\nMain-Class: shaded.acme.cli.Main\r\nImplementation-Title: com.acme\r\n\r\n"
        );
    }

    #[test]
    fn manifest_joins_continuations_and_rewraps() {
        let rules = vec![RelocationRule::new(
            "com.acme",
            "a.very.long.relocation.prefix.that.pushes.the.header.past.the.limit",
        )
        .unwrap()];
        let remap = Remapper::new(&rules);
        let input = "Manifest-Version: 1.0\nPremain-Class: com.acme.agent.Instrumentation\n Agent\n";
        let output = String::from_utf8(rewrite_manifest(input.as_bytes(), &remap).unwrap()).unwrap();
        for physical in output.lines() {
            assert!(physical.len() <= MANIFEST_LINE_BYTES, "{physical:?}");
        }
        assert_eq!(
            manifest_classes(output.as_bytes()),
            vec![
                "a.very.long.relocation.prefix.that.pushes.the.header.past.the.limit.agent.InstrumentationAgent"
            ]
        );
    }

    #[test]
    fn manifest_without_class_attributes_is_untouched() {
        let rules = rules();
        let remap = Remapper::new(&rules);
        assert!(rewrite_manifest(b"Manifest-Version: 1.0\n", &remap).is_none());
    }
}
