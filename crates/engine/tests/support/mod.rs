//! In-memory repositories, hosts and archives shared by the engine tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use artifacts::{
    Checksum, CodeLoader, CodeSource, CodeUnitHandle, Coordinate, HostRejection, Repository,
    RepositorySet, RepositoryTransport, TransportError,
};
use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub fn coordinate(text: &str) -> Coordinate {
    text.parse().unwrap()
}

/// Repositories `ids[0]`, `ids[1]`, ... at ascending priority.
pub fn repositories(ids: &[&str]) -> RepositorySet {
    RepositorySet::new(
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                Repository::new(id, &format!("https://{id}.example/maven2"), i as i32).unwrap()
            })
            .collect(),
    )
    .unwrap()
}

/// Files keyed by `(repository id, path)`; anything else is 404.
#[derive(Default)]
pub struct MemoryTransport {
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, repository: &str, path: &str, bytes: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap()
            .insert((repository.to_string(), path.to_string()), bytes.into());
    }

    /// Publishes a JAR with its `.sha256` file.
    pub fn publish_jar(&self, repository: &str, coordinate: &str, bytes: Vec<u8>) {
        let path = self::coordinate(coordinate).jar_path();
        self.put(
            repository,
            &format!("{path}.sha256"),
            Checksum::sha256(&bytes).hex().to_string(),
        );
        self.put(repository, &path, bytes);
    }

    /// Publishes a POM declaring `dependencies` (`g:a:v`) at compile scope.
    pub fn publish_pom(&self, repository: &str, coordinate: &str, dependencies: &[&str]) {
        self.publish_pom_xml(repository, coordinate, &pom(coordinate, dependencies));
    }

    pub fn publish_pom_xml(&self, repository: &str, coordinate: &str, xml: &str) {
        self.put(repository, &self::coordinate(coordinate).pom_path(), xml);
    }

    /// Publishes a POM and a JAR containing one class under `package`.
    pub fn publish(&self, repository: &str, coordinate: &str, package: &str, dependencies: &[&str]) {
        self.publish_pom(repository, coordinate, dependencies);
        let artifact = self::coordinate(coordinate).artifact().as_str().replace('-', "_");
        self.publish_jar(
            repository,
            coordinate,
            jar_with_class(&format!("{}/{artifact}/Entry", package.replace('.', "/"))),
        );
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    /// Requests whose path ends with `suffix`.
    pub fn requests_ending_with(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.ends_with(suffix))
            .count()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl RepositoryTransport for MemoryTransport {
    async fn get(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().unwrap().push(path.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connection {
                message: "network unreachable".into(),
            });
        }
        self.files
            .lock()
            .unwrap()
            .get(&(repository.id().to_string(), path.to_string()))
            .cloned()
            .ok_or(TransportError::NotFound)
    }
}

/// A host that records what it was given and can refuse chosen artifacts.
#[derive(Default)]
pub struct RecordingLoader {
    next: AtomicU64,
    accepted: Mutex<Vec<(Coordinate, Vec<u8>)>>,
    refuse: Mutex<HashSet<String>>,
}

impl RecordingLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, artifact: &str) {
        self.refuse.lock().unwrap().insert(artifact.to_string());
    }

    pub fn accepted(&self) -> Vec<Coordinate> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn bytes_of(&self, coordinate: &Coordinate) -> Option<Vec<u8>> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c == coordinate)
            .map(|(_, b)| b.clone())
    }
}

impl CodeLoader for RecordingLoader {
    fn add_code_source(&self, source: CodeSource<'_>) -> Result<CodeUnitHandle, HostRejection> {
        if self
            .refuse
            .lock()
            .unwrap()
            .contains(source.coordinate.artifact().as_str())
        {
            return Err(HostRejection::new("class version not supported"));
        }
        assert!(source.location.is_some_and(|p| p.exists()));
        self.accepted
            .lock()
            .unwrap()
            .push((source.coordinate.clone(), source.bytes.to_vec()));
        Ok(CodeUnitHandle::new(self.next.fetch_add(1, Ordering::SeqCst)))
    }
}

/// A POM for `coordinate` declaring `dependencies` (`g:a:v`).
pub fn pom(coordinate: &str, dependencies: &[&str]) -> String {
    let own = self::coordinate(coordinate);
    let deps: String = dependencies
        .iter()
        .map(|d| {
            let d = self::coordinate(d);
            format!(
                "<dependency><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version></dependency>",
                d.group(),
                d.artifact(),
                d.version()
            )
        })
        .collect();
    format!(
        "<project><modelVersion>4.0.0</modelVersion><groupId>{}</groupId><artifactId>{}</artifactId><version>{}</version><dependencies>{deps}</dependencies></project>",
        own.group(),
        own.artifact(),
        own.version()
    )
}

fn utf8(s: &str) -> Vec<u8> {
    let mut v = vec![1];
    v.extend_from_slice(&(s.len() as u16).to_be_bytes());
    v.extend_from_slice(s.as_bytes());
    v
}

/// A minimal class file named `internal_name` extending `java/lang/Object`.
pub fn class_file(internal_name: &str) -> Vec<u8> {
    let pool = [
        utf8(internal_name),
        vec![7, 0, 1],
        utf8("java/lang/Object"),
        vec![7, 0, 3],
    ];
    let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
    out.extend_from_slice(&(1 + pool.len() as u16).to_be_bytes());
    for entry in pool {
        out.extend_from_slice(&entry);
    }
    out.extend_from_slice(&[0, 0x21, 0, 2, 0, 4, 0, 0, 0, 0, 0, 0, 0, 0]);
    out
}

/// A JAR holding a single class.
pub fn jar_with_class(internal_name: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().last_modified_time(zip::DateTime::default());
    writer
        .start_file(format!("{internal_name}.class"), options)
        .unwrap();
    writer.write_all(&class_file(internal_name)).unwrap();
    writer.finish().unwrap().into_inner()
}
