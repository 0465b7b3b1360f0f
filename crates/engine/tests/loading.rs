//! Whole load sessions: resolve, fetch, relocate, cache, inject.

mod support;

use std::sync::Arc;

use artifacts::{
    ArchiveRelocator, ArtifactDescriptor, ArtifactError, Checksum, DownloadError, InjectionError,
    LoadError, LoadReport, LoadResult, LoadStage, RelocationError, RelocationRule, RepositorySet,
};
use engine::{LoadOrchestrator, LoaderConfig, RetrySchedule};
use relocator::JarRelocator;
use support::{coordinate, repositories, MemoryTransport, RecordingLoader};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    cache: TempDir,
    transport: Arc<MemoryTransport>,
    loader: Arc<RecordingLoader>,
}

impl Harness {
    fn new() -> Self {
        Self {
            cache: TempDir::new().unwrap(),
            transport: MemoryTransport::new(),
            loader: RecordingLoader::new(),
        }
    }

    fn orchestrator(&self) -> LoadOrchestrator {
        let config = LoaderConfig::new(repositories(&["central"]), self.cache.path())
            .with_workers(4)
            .with_retry(RetrySchedule::immediate(2));
        LoadOrchestrator::new(
            config,
            self.transport.clone(),
            Arc::new(JarRelocator::new()),
            self.loader.clone(),
        )
        .unwrap()
    }
}

fn shaded(text: &str) -> ArtifactDescriptor {
    ArtifactDescriptor::new(coordinate(text))
        .with_relocation(RelocationRule::new("com.acme", "hoisted.acme").unwrap())
}

async fn load(orchestrator: &LoadOrchestrator, roots: &[ArtifactDescriptor]) -> LoadReport {
    orchestrator.load(roots, &CancellationToken::new()).await
}

fn stages(result: &LoadResult) -> Vec<LoadStage> {
    match result {
        LoadResult::Loaded(loaded) => loaded.stages.clone(),
        LoadResult::Failed(failed) => failed.completed.clone(),
    }
}

#[tokio::test]
async fn loads_relocated_closure_dependencies_first() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &["acme:util:1.0"]);
    harness
        .transport
        .publish("central", "acme:util:1.0", "com.acme", &[]);

    let report = load(&harness.orchestrator(), &[shaded("acme:app:1.0")]).await;

    assert!(report.all_roots_loaded(), "{:?}", report.roots);
    assert_eq!(report.members.len(), 2);
    assert_eq!(
        harness.loader.accepted(),
        vec![coordinate("acme:util:1.0"), coordinate("acme:app:1.0")]
    );
    assert_eq!(report.injection_order, harness.loader.accepted());

    let root = &report.roots[&coordinate("acme:app:1.0")];
    assert_eq!(
        stages(root),
        vec![
            LoadStage::Resolved,
            LoadStage::Downloaded,
            LoadStage::Relocated,
            LoadStage::Injected
        ]
    );

    let relocator = JarRelocator::new();
    for member in harness.loader.accepted() {
        let bytes = harness.loader.bytes_of(&member).unwrap();
        let symbols = relocator.inspect(&bytes).unwrap();
        assert!(symbols.references("com.acme").is_empty(), "{member}");
        assert!(!symbols.references("hoisted.acme").is_empty(), "{member}");
    }
}

#[tokio::test]
async fn second_process_is_served_from_cache_without_network() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &["acme:util:1.0"]);
    harness
        .transport
        .publish("central", "acme:util:1.0", "com.acme", &[]);
    let first = load(&harness.orchestrator(), &[shaded("acme:app:1.0")]).await;
    assert!(first.all_roots_loaded());
    assert_eq!(first.members.len(), 2);

    harness.transport.go_offline();
    let requests_before_restart = harness.transport.request_count();
    let restarted = Harness {
        cache: harness.cache,
        transport: harness.transport.clone(),
        loader: RecordingLoader::new(),
    };
    let second = load(&restarted.orchestrator(), &[shaded("acme:app:1.0")]).await;

    assert_eq!(
        restarted.transport.request_count(),
        requests_before_restart
    );
    assert!(second.resolution_errors.is_empty(), "{:?}", second.resolution_errors);
    assert_eq!(second.members.len(), 2);
    assert_eq!(
        restarted.loader.accepted(),
        vec![coordinate("acme:util:1.0"), coordinate("acme:app:1.0")]
    );
    for member in second.members.values() {
        assert_eq!(
            stages(member),
            vec![LoadStage::Resolved, LoadStage::Cached, LoadStage::Injected]
        );
    }
    for member in restarted.loader.accepted() {
        assert_eq!(
            restarted.loader.bytes_of(&member),
            harness.loader.bytes_of(&member)
        );
    }
}

#[tokio::test]
async fn report_records_where_each_archive_came_from() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &[]);
    let raw = support::jar_with_class("com/acme/app/Entry");
    let app = coordinate("acme:app:1.0");

    let fresh = load(&harness.orchestrator(), &[shaded("acme:app:1.0")]).await;
    let cached = load(&harness.orchestrator(), &[shaded("acme:app:1.0")]).await;

    for report in [&fresh, &cached] {
        let LoadResult::Loaded(loaded) = &report.roots[&app] else {
            panic!("load failed: {:?}", report.roots);
        };
        let origin = loaded.origin.as_ref().unwrap();
        assert_eq!(origin.repository.as_str(), "central");
        assert_eq!(origin.checksum, Checksum::sha256(&raw));
        assert_ne!(loaded.checksum, origin.checksum);

        let member = report.closure.iter().find(|m| m.coordinate() == &app).unwrap();
        assert_eq!(member.checksum.as_ref(), Some(&origin.checksum));
        assert_eq!(member.repository.as_ref(), Some(&origin.repository));
    }
    assert!(stages(&cached.roots[&app]).contains(&LoadStage::Cached));
}

#[tokio::test]
async fn late_rules_reach_dependencies_expanded_earlier() {
    let harness = Harness::new();
    let transport = &harness.transport;
    transport.publish("central", "g:x:1.0", "com.x", &["g:p:1.0"]);
    transport.publish("central", "g:z:1.0", "com.z", &["g:y:1.0"]);
    transport.publish("central", "g:p:1.0", "com.p", &["g:q:1.0"]);
    transport.publish("central", "g:q:1.0", "com.q", &["g:y:1.0"]);
    transport.publish("central", "g:y:1.0", "com.y", &["g:w:1.0"]);
    transport.publish("central", "g:w:1.0", "com.dep", &[]);
    let rule = RelocationRule::new("com.dep", "shaded.dep").unwrap();

    let report = load(
        &harness.orchestrator(),
        &[
            ArtifactDescriptor::new(coordinate("g:x:1.0")).with_relocation(rule.clone()),
            ArtifactDescriptor::new(coordinate("g:z:1.0")),
        ],
    )
    .await;

    assert!(report.all_roots_loaded(), "{:?}", report.roots);
    let rules_of = |c: &str| {
        report
            .closure
            .iter()
            .find(|m| m.coordinate() == &coordinate(c))
            .unwrap()
            .descriptor
            .relocations()
            .to_vec()
    };
    assert_eq!(rules_of("g:y:1.0"), vec![rule.clone()]);
    assert_eq!(rules_of("g:w:1.0"), vec![rule]);
    assert!(rules_of("g:z:1.0").is_empty());

    let w = harness.loader.bytes_of(&coordinate("g:w:1.0")).unwrap();
    let symbols = JarRelocator::new().inspect(&w).unwrap();
    assert!(symbols.references("com.dep").is_empty());
    assert!(!symbols.references("shaded.dep").is_empty());
}

#[tokio::test]
async fn one_missing_artifact_does_not_affect_its_siblings() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:good:1.0", "com.acme", &[]);

    let report = load(
        &harness.orchestrator(),
        &[shaded("acme:good:1.0"), shaded("acme:missing:1.0")],
    )
    .await;

    assert!(report.roots[&coordinate("acme:good:1.0")].is_loaded());
    let missing = &report.roots[&coordinate("acme:missing:1.0")];
    assert!(matches!(
        missing.error(),
        Some(ArtifactError::Download(DownloadError::AllSourcesFailed { .. }))
    ));
    assert_eq!(stages(missing), vec![LoadStage::Resolved]);
    assert!(!report.all_roots_loaded());
    assert_eq!(report.failed_roots().count(), 1);
}

#[tokio::test]
async fn loading_twice_reuses_the_first_handle() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &[]);
    let orchestrator = harness.orchestrator();

    let first = load(&orchestrator, &[shaded("acme:app:1.0")]).await;
    let second = load(&orchestrator, &[shaded("acme:app:1.0")]).await;

    let app = coordinate("acme:app:1.0");
    assert_eq!(first.roots[&app].handle(), second.roots[&app].handle());
    assert!(second.roots[&app].is_loaded());
    assert!(second.injection_order.is_empty());
    assert_eq!(harness.loader.accepted(), vec![app]);
    assert_ne!(first.session, second.session);
}

#[tokio::test]
async fn requested_root_reports_the_selected_version() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &["lib:x:2.0"]);
    harness.transport.publish("central", "lib:x:1.0", "org.x", &[]);
    harness.transport.publish("central", "lib:x:2.0", "org.x", &[]);

    let report = load(
        &harness.orchestrator(),
        &[
            ArtifactDescriptor::new(coordinate("lib:x:1.0")),
            ArtifactDescriptor::new(coordinate("acme:app:1.0")),
        ],
    )
    .await;

    let root = &report.roots[&coordinate("lib:x:1.0")];
    assert!(root.is_loaded());
    assert_eq!(root.coordinate(), &coordinate("lib:x:2.0"));
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(harness.transport.requests_ending_with("x-1.0.jar"), 0);
}

#[tokio::test]
async fn host_rejection_fails_only_that_artifact() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &["acme:legacy:1.0"]);
    harness
        .transport
        .publish("central", "acme:legacy:1.0", "com.acme", &[]);
    harness.loader.refuse("legacy");

    let report = load(&harness.orchestrator(), &[shaded("acme:app:1.0")]).await;

    assert!(report.roots[&coordinate("acme:app:1.0")].is_loaded());
    let legacy = &report.members[&coordinate("acme:legacy:1.0")];
    assert!(matches!(
        legacy.error(),
        Some(ArtifactError::Injection(InjectionError::IncompatibleHost { .. }))
    ));
    assert_eq!(
        stages(legacy),
        vec![LoadStage::Resolved, LoadStage::Downloaded, LoadStage::Relocated]
    );
}

#[tokio::test]
async fn non_archive_bytes_fail_relocation() {
    let harness = Harness::new();
    harness.transport.publish_pom("central", "acme:odd:1.0", &[]);
    harness
        .transport
        .publish_jar("central", "acme:odd:1.0", b"definitely not a zip".to_vec());

    let report = load(&harness.orchestrator(), &[shaded("acme:odd:1.0")]).await;

    let odd = &report.roots[&coordinate("acme:odd:1.0")];
    assert_eq!(
        odd.error(),
        Some(&ArtifactError::Relocation(RelocationError::UnsupportedFormat))
    );
    assert_eq!(stages(odd), vec![LoadStage::Resolved, LoadStage::Downloaded]);
    assert!(harness.loader.accepted().is_empty());
}

#[tokio::test]
async fn cancelled_session_injects_nothing() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &[]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = harness
        .orchestrator()
        .load(&[shaded("acme:app:1.0")], &cancel)
        .await;

    let root = &report.roots[&coordinate("acme:app:1.0")];
    assert!(matches!(root.error(), Some(ArtifactError::Cancelled { .. })));
    assert!(harness.loader.accepted().is_empty());
    assert_eq!(harness.transport.request_count(), 0);
}

#[tokio::test]
async fn different_rules_get_their_own_cache_entry() {
    let harness = Harness::new();
    harness
        .transport
        .publish("central", "acme:app:1.0", "com.acme", &[]);
    let app = coordinate("acme:app:1.0");
    let shaded_report = load(&harness.orchestrator(), &[shaded("acme:app:1.0")]).await;

    let plain_report = load(
        &harness.orchestrator(),
        &[ArtifactDescriptor::new(app.clone())],
    )
    .await;

    let LoadResult::Loaded(plain) = &plain_report.roots[&app] else {
        panic!("plain load failed: {:?}", plain_report.roots);
    };
    let LoadResult::Loaded(relocated) = &shaded_report.roots[&app] else {
        panic!("shaded load failed: {:?}", shaded_report.roots);
    };
    assert!(plain.stages.contains(&LoadStage::Downloaded));
    assert_ne!(plain.checksum, relocated.checksum);
    assert_ne!(plain.location, relocated.location);

    let original = support::jar_with_class("com/acme/app/Entry");
    let passthrough = JarRelocator::new().relocate(&original, &[]).unwrap();
    assert_eq!(std::fs::read(&plain.location).unwrap(), passthrough);
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let cache = TempDir::new().unwrap();
    let build = |config: LoaderConfig| {
        LoadOrchestrator::new(
            config,
            MemoryTransport::new(),
            Arc::new(JarRelocator::new()),
            RecordingLoader::new(),
        )
    };

    let no_repositories = build(LoaderConfig::new(RepositorySet::default(), cache.path()));
    assert!(matches!(
        no_repositories,
        Err(LoadError::Configuration { .. })
    ));

    let no_workers = build(LoaderConfig::new(repositories(&["central"]), cache.path()).with_workers(0));
    assert!(matches!(no_workers, Err(LoadError::Configuration { .. })));
}
