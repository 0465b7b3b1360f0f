//! End-to-end JAR relocation: build archives in memory, relocate, inspect.

use std::io::{Cursor, Read, Write};

use artifacts::{ArchiveRelocator, RelocationError, RelocationRule};
use relocator::JarRelocator;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn utf8(s: &str) -> Vec<u8> {
    let mut v = vec![1];
    v.extend_from_slice(&(s.len() as u16).to_be_bytes());
    v.extend_from_slice(s.as_bytes());
    v
}

/// A structurally valid class file naming `this_name`, extending
/// `java/lang/Object`, with `strings` as extra UTF-8 constants.
fn class_file(this_name: &str, strings: &[&str]) -> Vec<u8> {
    let mut pool = vec![
        utf8(this_name),
        vec![7, 0, 1],
        utf8("java/lang/Object"),
        vec![7, 0, 3],
    ];
    pool.extend(strings.iter().map(|s| utf8(s)));
    let count = 1 + pool.len() as u16;

    let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
    out.extend_from_slice(&count.to_be_bytes());
    for entry in pool {
        out.extend_from_slice(&entry);
    }
    out.extend_from_slice(&[0, 0x21, 0, 2, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
    out
}

fn jar(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, deflated).unwrap();
        } else {
            writer.start_file(*name, deflated).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

fn read(archive: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).unwrap();
    let mut file = zip.by_name(name).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).unwrap();
    Some(buf)
}

fn sample_jar() -> Vec<u8> {
    jar(&[
        (
            "META-INF/MANIFEST.MF",
            b"Manifest-Version: 1.0\nMain-Class: com.acme.Main\n\n".to_vec(),
        ),
        ("META-INF/SIGNER.SF", b"Signature-Version: 1.0\n".to_vec()),
        ("META-INF/SIGNER.RSA", vec![0x30, 0x82]),
        ("com/", Vec::new()),
        ("com/acme/", Vec::new()),
        (
            "com/acme/Main.class",
            class_file(
                "com/acme/Main",
                &[
                    "com/acme/Helper",
                    "(Lcom/acme/Helper;[Lorg/other/Dep;)V",
                    "Ljava/util/List<Lcom/acme/Helper;>;",
                    "com.acme.Plugin",
                    "org/other/Dep",
                    "main",
                ],
            ),
        ),
        (
            "com/acme/Helper.class",
            class_file("com/acme/Helper", &["()Lcom/acme/Main;"]),
        ),
        ("com/acme/messages.properties", b"greeting=hello\n".to_vec()),
        (
            "META-INF/services/com.acme.Spi",
            b"# registered\ncom.acme.SpiImpl\n".to_vec(),
        ),
        ("org/other/Dep.class", class_file("org/other/Dep", &[])),
        (
            "com/acmesoft/Thing.class",
            class_file("com/acmesoft/Thing", &["Lcom/acmesoft/Thing;"]),
        ),
    ])
}

fn shade_acme() -> Vec<RelocationRule> {
    vec![RelocationRule::new("com.acme", "shaded.acme").unwrap()]
}

#[test]
fn relocated_archive_has_no_unrelocated_references() {
    let relocator = JarRelocator::new();
    let before = relocator.inspect(&sample_jar()).unwrap();
    assert!(!before.references("com.acme").is_empty());

    let output = relocator.relocate(&sample_jar(), &shade_acme()).unwrap();
    let after = relocator.inspect(&output).unwrap();

    assert!(
        after.references("com.acme").is_empty(),
        "leftover references: {:?}",
        after.references("com.acme")
    );
    assert!(after.entries.contains(&"shaded/acme/Main.class".to_string()));
    assert!(after.entries.contains(&"shaded/acme/messages.properties".to_string()));
    assert!(after.constants.contains(&"(Lshaded/acme/Helper;[Lorg/other/Dep;)V".to_string()));
    assert!(after.constants.contains(&"Ljava/util/List<Lshaded/acme/Helper;>;".to_string()));
    assert!(after.constants.contains(&"shaded.acme.Plugin".to_string()));
    assert_eq!(after.manifest_classes, vec!["shaded.acme.Main"]);
    assert_eq!(after.services, vec!["shaded.acme.Spi", "shaded.acme.SpiImpl"]);
}

#[test]
fn names_outside_the_rule_are_unchanged() {
    let relocator = JarRelocator::new();
    let output = relocator.relocate(&sample_jar(), &shade_acme()).unwrap();
    let after = relocator.inspect(&output).unwrap();

    assert!(after.entries.contains(&"org/other/Dep.class".to_string()));
    assert!(after.entries.contains(&"com/".to_string()));
    assert!(after.entries.contains(&"com/acmesoft/Thing.class".to_string()));
    assert!(after.constants.contains(&"Lcom/acmesoft/Thing;".to_string()));
    assert!(after.constants.contains(&"main".to_string()));
    assert_eq!(
        read(&output, "org/other/Dep.class"),
        read(&sample_jar(), "org/other/Dep.class")
    );
    assert_eq!(
        read(&output, "shaded/acme/messages.properties").as_deref(),
        Some(b"greeting=hello\n".as_slice())
    );
}

#[test]
fn signature_files_are_dropped() {
    let output = JarRelocator::new()
        .relocate(&sample_jar(), &shade_acme())
        .unwrap();
    assert!(read(&output, "META-INF/SIGNER.SF").is_none());
    assert!(read(&output, "META-INF/SIGNER.RSA").is_none());
    assert!(read(&output, "META-INF/MANIFEST.MF").is_some());
}

#[test]
fn first_matching_rule_wins() {
    let rules = vec![
        RelocationRule::new("com.acme.Helper", "never.used").unwrap(),
        RelocationRule::new("com.acme", "first.acme").unwrap(),
        RelocationRule::new("com.acme", "second.acme").unwrap(),
    ];
    let output = JarRelocator::new().relocate(&sample_jar(), &rules).unwrap();
    let after = JarRelocator::new().inspect(&output).unwrap();
    assert!(after.entries.contains(&"first/acme/Main.class".to_string()));
    assert!(after.entries.contains(&"first/acme/Helper.class".to_string()));
    assert!(after.references("second.acme").is_empty());
}

#[test]
fn relocation_is_deterministic() {
    let relocator = JarRelocator::new();
    let input = sample_jar();
    let first = relocator.relocate(&input, &shade_acme()).unwrap();
    let second = relocator.relocate(&input, &shade_acme()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_rules_pass_input_through() {
    let input = sample_jar();
    let output = JarRelocator::new().relocate(&input, &[]).unwrap();
    assert_eq!(output, input);

    let opaque = b"not a jar at all".to_vec();
    assert_eq!(JarRelocator::new().relocate(&opaque, &[]), Ok(opaque));
}

#[test]
fn rejects_non_archives() {
    let result = JarRelocator::new().relocate(b"not a jar at all", &shade_acme());
    assert_eq!(result, Err(RelocationError::UnsupportedFormat));
}

#[test]
fn reports_corrupt_archives() {
    let mut truncated = sample_jar();
    truncated.truncate(40);
    assert!(matches!(
        JarRelocator::new().relocate(&truncated, &shade_acme()),
        Err(RelocationError::CorruptArchive { .. })
    ));
}

#[test]
fn reports_corrupt_class_files() {
    let input = jar(&[("com/acme/Broken.class", b"\xCA\xFE\xBA\xBE\x00".to_vec())]);
    let err = JarRelocator::new()
        .relocate(&input, &shade_acme())
        .unwrap_err();
    match err {
        RelocationError::CorruptArchive { reason } => {
            assert!(reason.contains("com/acme/Broken.class"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn colliding_entries_fail_to_write() {
    let input = jar(&[
        ("com/acme/Foo.class", class_file("com/acme/Foo", &[])),
        ("shaded/acme/Foo.class", class_file("shaded/acme/Foo", &[])),
    ]);
    assert!(matches!(
        JarRelocator::new().relocate(&input, &shade_acme()),
        Err(RelocationError::WriteFailed { .. })
    ));
}
