// ItemIntegrationService suite.
//
// The in-memory backend keeps its lookup and its write as separate steps
// with latency in between, so any window between "check" and "save" is
// wide open. Invariants exercised:
// - Double check: N concurrent saves of one content yield exactly one
//   success; everyone else sees a duplicate.
// - Independence: concurrent saves of distinct contents all succeed and do
//   not serialize.
// - Faults: backend errors surface as errors, never as duplicates, and the
//   registry is left clean.
use keyed_section::service::{InMemoryBackend, Item, ItemBackend, ItemIntegrationService};
use keyed_section::{BackendError, Error, RegistryConfig, ServiceConfig};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn slow_backend() -> InMemoryBackend {
    InMemoryBackend::with_latency(Duration::from_millis(5), Duration::from_millis(40))
}

#[test]
fn concurrent_same_content_saves_exactly_once() {
    init_tracing();
    const THREADS: usize = 12;

    let svc = ItemIntegrationService::new(slow_backend());
    let barrier = Barrier::new(THREADS);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    svc.save_item("same").unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let successes: Vec<_> = results.iter().filter(|r| r.success).collect();
    assert_eq!(successes.len(), 1);
    assert_eq!(successes[0].message, "Item with content same saved with id 1");
    for r in results.iter().filter(|r| !r.success) {
        assert_eq!(r.message, "Duplicate item received with content same.");
    }
    assert_eq!(svc.get_all_items().unwrap().len(), 1);
    assert_eq!(svc.pending_sections(), 0);
}

#[test]
fn concurrent_mixed_contents_save_each_once() {
    init_tracing();
    let svc = ItemIntegrationService::new(slow_backend());
    let contents = ["a", "b", "c"];
    let barrier = Barrier::new(contents.len() * 4);

    thread::scope(|s| {
        for c in contents.iter().cycle().take(contents.len() * 4) {
            let svc = &svc;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                svc.save_item(c).unwrap();
            });
        }
    });

    let items = svc.get_all_items().unwrap();
    let saved: BTreeSet<_> = items.iter().map(|i| i.content.as_str()).collect();
    assert_eq!(items.len(), contents.len());
    assert_eq!(saved, contents.into_iter().collect());
    let ids: BTreeSet<_> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, (1..=3).collect());
}

#[test]
fn distinct_contents_do_not_serialize() {
    init_tracing();
    const SAVE: Duration = Duration::from_millis(200);
    const THREADS: usize = 6;

    let svc = ItemIntegrationService::new(InMemoryBackend::with_latency(Duration::ZERO, SAVE));
    let barrier = Barrier::new(THREADS);
    let started = Instant::now();

    thread::scope(|s| {
        for i in 0..THREADS {
            let svc = &svc;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                assert!(svc.save_item(&format!("item-{i}")).unwrap().success);
            });
        }
    });

    // Serialized, six saves would take 1.2s.
    assert!(started.elapsed() < SAVE * 3, "took {:?}", started.elapsed());
    assert_eq!(svc.get_all_items().unwrap().len(), THREADS);
}

#[test]
fn shared_backend_between_services_is_visible() {
    let backend = Arc::new(InMemoryBackend::new());
    let svc = ItemIntegrationService::new(Arc::clone(&backend));
    assert!(svc.save_item("x").unwrap().success);
    assert_eq!(
        backend.get_all_items().unwrap(),
        vec![Item {
            id: 1,
            content: "x".into()
        }]
    );
    assert!(!svc.save_item("x").unwrap().success);
}

/// Backend whose writes fail until told otherwise, counting each call.
struct FlakyBackend {
    inner: InMemoryBackend,
    failing: std::sync::atomic::AtomicBool,
    finds: AtomicUsize,
    saves: AtomicUsize,
}

impl FlakyBackend {
    fn failing() -> Self {
        Self {
            inner: InMemoryBackend::new(),
            failing: true.into(),
            finds: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
        }
    }
}

impl ItemBackend for FlakyBackend {
    fn find_items_with_content(&self, content: &str) -> Result<Vec<Item>, BackendError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find_items_with_content(content)
    }

    fn save_item(&self, content: &str) -> Result<Item, BackendError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::WriteFailed("disk full".into()));
        }
        self.inner.save_item(content)
    }

    fn get_all_items(&self) -> Result<Vec<Item>, BackendError> {
        Err(BackendError::Unavailable("maintenance".into()))
    }
}

#[test]
fn backend_fault_propagates_and_registry_is_clean() {
    init_tracing();
    let svc = ItemIntegrationService::new(FlakyBackend::failing());

    let err = svc.save_item("doomed").unwrap_err();
    match err {
        Error::Backend(BackendError::WriteFailed(msg)) => assert_eq!(msg, "disk full"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(svc.pending_sections(), 0);
    // Pre-check and re-check both ran before the write was attempted.
    assert_eq!(svc.backend().finds.load(Ordering::SeqCst), 2);
    assert_eq!(svc.backend().saves.load(Ordering::SeqCst), 1);

    // A failed write is not remembered as a duplicate.
    svc.backend().failing.store(false, Ordering::SeqCst);
    assert!(svc.save_item("doomed").unwrap().success);

    assert!(matches!(
        svc.get_all_items(),
        Err(Error::Backend(BackendError::Unavailable(_)))
    ));
}

#[test]
fn duplicate_found_by_precheck_never_locks() {
    let svc = ItemIntegrationService::new(FlakyBackend::failing());
    svc.backend().failing.store(false, Ordering::SeqCst);
    assert!(svc.save_item("once").unwrap().success);
    let finds_before = svc.backend().finds.load(Ordering::SeqCst);

    let dup = svc.save_item("once").unwrap();
    assert!(!dup.success);
    // Only the lock-free pre-check ran.
    assert_eq!(svc.backend().finds.load(Ordering::SeqCst), finds_before + 1);
    assert_eq!(svc.backend().saves.load(Ordering::SeqCst), 1);
}

#[test]
fn configured_wait_timeout_surfaces_as_error() {
    init_tracing();
    let config = ServiceConfig {
        registry: RegistryConfig::default().with_wait_timeout(Duration::from_millis(20)),
    };
    let svc = ItemIntegrationService::with_config(
        InMemoryBackend::with_latency(Duration::ZERO, Duration::from_millis(300)),
        config,
    )
    .unwrap();
    let barrier = Barrier::new(2);

    let (first, second) = thread::scope(|s| {
        let first = s.spawn(|| {
            barrier.wait();
            svc.save_item("slow")
        });
        let second = s.spawn(|| {
            barrier.wait();
            // Let the first caller get into the section and start its save.
            thread::sleep(Duration::from_millis(60));
            svc.save_item("slow")
        });
        (first.join().unwrap(), second.join().unwrap())
    });

    assert!(first.unwrap().success);
    assert!(matches!(second, Err(Error::Timeout(_))));
    assert_eq!(svc.pending_sections(), 0);
    assert_eq!(svc.get_all_items().unwrap().len(), 1);
}

#[test]
fn service_config_loads_from_json() {
    let config: ServiceConfig =
        serde_json::from_str(r#"{ "registry": { "shard_count": 3, "wait_timeout_ms": 1500 } }"#)
            .unwrap();
    assert_eq!(config.registry.shard_count, 3);
    assert_eq!(config.registry.wait_timeout(), Some(Duration::from_millis(1500)));

    let svc = ItemIntegrationService::with_config(InMemoryBackend::new(), config).unwrap();
    assert!(svc.save_item("cfg").unwrap().success);

    let bad: ServiceConfig =
        serde_json::from_str(r#"{ "registry": { "shard_count": 0 } }"#).unwrap();
    assert!(matches!(
        ItemIntegrationService::with_config(InMemoryBackend::new(), bad),
        Err(Error::Config(_))
    ));
}
