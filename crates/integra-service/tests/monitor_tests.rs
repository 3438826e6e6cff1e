//! Integration tests for the monitor loop.
//!
//!  1. Passes never overlap (periodic vs change-triggered)
//!  2. A change notification verifies only the affected object
//!  3. Failed re-arm falls back to periodic checks with one warning
//!  4. Objects that cannot be watched are reported once, registry objects
//!     are never watched
//!  5. Shutdown joins both loops and releases every watch
//!  6. Every full pass re-reads the object list: accepted edits take effect,
//!     an unreadable list skips the pass, a changed list re-arms the watches

use integra_core::{
    Host, MemoryHive, MemorySink, ObjectKind, ObjectRegistry, ObjectStore, ReportSink, Severity,
};
use integra_service::monitor::{Monitor, MonitorPhase, PassObserver, PassScope};
use integra_service::notifier::{ChangeEvent, ChangeNotifier, NotifyError, NullNotifier};
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;

const KEY: &str = "HKEY_LOCAL_MACHINE\\SOFTWARE\\Integra\\Monitor";
const GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CountingObserver {
    active: AtomicUsize,
    max_active: AtomicUsize,
    scopes: Mutex<Vec<PassScope>>,
    full_passes: Mutex<Vec<usize>>,
}

impl CountingObserver {
    /// Findings of every completed full pass, oldest first.
    fn full_passes(&self) -> Vec<usize> {
        self.full_passes.lock().clone()
    }
}

impl PassObserver for CountingObserver {
    fn pass_started(&self, _scope: PassScope) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        // widen the window in which an overlapping pass would be seen
        std::thread::sleep(Duration::from_millis(5));
    }

    fn pass_finished(&self, scope: PassScope, findings: usize) {
        if scope == PassScope::All {
            self.full_passes.lock().push(findings);
        }
        self.scopes.lock().push(scope);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct ManualNotifier {
    log: Arc<Mutex<Vec<String>>>,
    fail_rearm: bool,
}

impl ChangeNotifier for ManualNotifier {
    fn arm(&mut self, slot: usize, _path: &Path) -> Result<(), NotifyError> {
        self.log.lock().push(format!("arm {slot}"));
        Ok(())
    }

    fn disarm(&mut self, slot: usize) {
        self.log.lock().push(format!("disarm {slot}"));
    }

    fn rearm(&mut self, slot: usize, path: &Path) -> Result<(), NotifyError> {
        if self.fail_rearm {
            return Err(NotifyError::Unsupported(path.display().to_string()));
        }
        self.disarm(slot);
        self.arm(slot, path)
    }
}

struct Fixture {
    dir: TempDir,
    files: Vec<std::path::PathBuf>,
    host: Host<MemoryHive>,
    registry: ObjectRegistry,
}

/// Two file objects followed by one registry object.
fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let hive = MemoryHive::new();
    hive.set_value(KEY, "Enabled", 4, &[1, 0, 0, 0]).unwrap();
    let host = Host::new(hive);

    let mut registry = ObjectRegistry::new();
    let mut files = Vec::new();
    for name in ["first", "second"] {
        let root = dir.path().join(name);
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), name.as_bytes()).unwrap();
        registry
            .add(&host, name, ObjectKind::FileTree, &root.display().to_string())
            .unwrap();
        files.push(root);
    }
    registry.add(&host, "reg", ObjectKind::RegistryTree, KEY).unwrap();

    Fixture {
        dir,
        files,
        host,
        registry,
    }
}

/// Saves the fixture's object list next to it.
fn saved(fx: &Fixture) -> ObjectStore {
    let store = ObjectStore::new(fx.dir.path().join("objects.json"));
    store.save(&fx.registry).unwrap();
    store
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn passes_never_overlap() {
    let fx = fixture();
    let observer = Arc::new(CountingObserver::default());
    let sink = Arc::new(MemorySink::new());
    let mut monitor = Monitor::new(
        fx.host.clone(),
        fx.registry.clone(),
        sink.clone(),
        Duration::from_millis(20),
    )
    .with_observer(observer.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    monitor
        .start(Box::new(ManualNotifier::default()), rx)
        .unwrap();

    let sender = tokio::spawn(async move {
        for i in 0..40 {
            let _ = tx.send(ChangeEvent {
                slot: i % 2,
                rearm: false,
            });
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        tx
    });
    let _tx = sender.await.unwrap();

    wait_for("both kinds of pass", || {
        let scopes = observer.scopes.lock();
        scopes.iter().filter(|s| **s == PassScope::All).count() >= 2
            && scopes.iter().any(|s| matches!(s, PassScope::Object(_)))
    })
    .await;

    assert!(monitor.shutdown(GRACE).await);
    assert_eq!(observer.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(sink.problems(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn change_verifies_only_the_affected_object() {
    let fx = fixture();
    let observer = Arc::new(CountingObserver::default());
    let sink = Arc::new(MemorySink::new());
    let mut monitor = Monitor::new(
        fx.host.clone(),
        fx.registry.clone(),
        sink.clone(),
        Duration::from_secs(3600),
    )
    .with_observer(observer.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    monitor
        .start(Box::new(ManualNotifier::default()), rx)
        .unwrap();
    wait_for("initial periodic pass", || !observer.scopes.lock().is_empty()).await;

    fs::write(fx.files[1].join("a.txt"), b"tampered").unwrap();
    tx.send(ChangeEvent {
        slot: 1,
        rearm: false,
    })
    .unwrap();

    wait_for("change-triggered pass", || {
        observer.scopes.lock().contains(&PassScope::Object(1))
    })
    .await;
    assert!(monitor.shutdown(GRACE).await);

    let errors: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|(s, _)| *s == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].1.contains("[second]"));
    assert!(errors[0].1.contains("digest mismatch"));
    assert!(!observer.scopes.lock().contains(&PassScope::Object(0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_rearm_warns_once() {
    let fx = fixture();
    let observer = Arc::new(CountingObserver::default());
    let sink = Arc::new(MemorySink::new());
    let notifier = ManualNotifier {
        fail_rearm: true,
        ..ManualNotifier::default()
    };
    let log = notifier.log.clone();
    let mut monitor = Monitor::new(
        fx.host.clone(),
        fx.registry.clone(),
        sink.clone(),
        Duration::from_secs(3600),
    )
    .with_observer(observer.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    monitor.start(Box::new(notifier), rx).unwrap();

    for _ in 0..2 {
        tx.send(ChangeEvent {
            slot: 0,
            rearm: true,
        })
        .unwrap();
        wait_for("change-triggered pass", || {
            observer.scopes.lock().contains(&PassScope::Object(0))
        })
        .await;
    }
    wait_for("fallback warning", || sink.count(Severity::Warning) >= 1).await;
    assert!(monitor.shutdown(GRACE).await);

    let warnings: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|(s, m)| *s == Severity::Warning && m.contains("periodic checks only"))
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].1.contains("[first]"));

    // slot 0 was released after the failure, slot 1 at shutdown
    let log = log.lock();
    assert_eq!(log.iter().filter(|l| *l == "disarm 0").count(), 1);
    assert_eq!(log.last().map(String::as_str), Some("disarm 1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unwatchable_objects_fall_back_to_periodic() {
    let fx = fixture();
    let sink = Arc::new(MemorySink::new());
    let mut monitor = Monitor::new(
        fx.host.clone(),
        fx.registry.clone(),
        sink.clone(),
        Duration::from_secs(3600),
    );

    let (_tx, rx) = mpsc::unbounded_channel();
    monitor.start(Box::new(NullNotifier), rx).unwrap();
    wait_for("arm warnings", || sink.count(Severity::Warning) >= 2).await;
    assert!(monitor.shutdown(GRACE).await);

    let warned: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|(s, _)| *s == Severity::Warning)
        .map(|(_, m)| m)
        .collect();
    assert_eq!(warned.len(), 2);
    assert!(warned.iter().all(|m| !m.contains("[reg]")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_releases_watches() {
    let fx = fixture();
    let notifier = ManualNotifier::default();
    let log = notifier.log.clone();
    let mut monitor = Monitor::new(
        fx.host.clone(),
        fx.registry.clone(),
        Arc::new(MemorySink::new()),
        Duration::from_secs(3600),
    );
    assert_eq!(monitor.phase(), MonitorPhase::Idle);

    let (_tx, rx) = mpsc::unbounded_channel();
    monitor.start(Box::new(notifier), rx).unwrap();
    assert_eq!(monitor.phase(), MonitorPhase::Running);
    assert!(monitor
        .start(Box::new(ManualNotifier::default()), mpsc::unbounded_channel().1)
        .is_err());

    wait_for("watches armed", || log.lock().len() == 2).await;
    assert!(monitor.shutdown(GRACE).await);
    assert_eq!(monitor.phase(), MonitorPhase::Stopped);

    let mut log = log.lock().clone();
    log.sort();
    assert_eq!(log, vec!["arm 0", "arm 1", "disarm 0", "disarm 1"]);
}

#[test]
fn check_once_runs_a_single_pass_without_tasks() {
    let fx = fixture();
    fs::remove_dir_all(&fx.files[0]).unwrap();

    let sink = Arc::new(MemorySink::new());
    let monitor = Monitor::new(
        fx.host.clone(),
        fx.registry.clone(),
        sink.clone() as Arc<dyn ReportSink>,
        Duration::from_secs(3600),
    );
    let reports = monitor.check_once();

    assert_eq!(monitor.phase(), MonitorPhase::Idle);
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].findings().count(), 1);
    assert!(reports[1].is_clean());
    assert!(reports[2].is_clean());
    assert_eq!(sink.count(Severity::Error), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepted_update_takes_effect_without_restart() {
    let fx = fixture();
    let store = saved(&fx);
    let observer = Arc::new(CountingObserver::default());
    let sink = Arc::new(MemorySink::new());
    let mut monitor = Monitor::from_store(
        fx.host.clone(),
        store.clone(),
        sink.clone(),
        Duration::from_millis(20),
    )
    .unwrap()
    .with_observer(observer.clone());

    let (_tx, rx) = mpsc::unbounded_channel();
    monitor
        .start(Box::new(ManualNotifier::default()), rx)
        .unwrap();

    fs::write(fx.files[0].join("a.txt"), b"edited").unwrap();
    wait_for("mismatch reported", || {
        observer.full_passes().iter().any(|findings| *findings > 0)
    })
    .await;

    // what `integra update first` does
    let mut registry = store.load().unwrap();
    registry.update(&fx.host, "first").unwrap();
    store.save(&registry).unwrap();

    // the pass running during the save may still see the old list
    let seen = observer.full_passes().len();
    wait_for("two passes after the update", || {
        observer.full_passes().len() >= seen + 2
    })
    .await;
    assert!(monitor.shutdown(GRACE).await);

    let passes = observer.full_passes();
    assert!(passes[seen + 1..].iter().all(|findings| *findings == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_object_list_skips_the_pass() {
    let fx = fixture();
    let store = saved(&fx);
    let observer = Arc::new(CountingObserver::default());
    let sink = Arc::new(MemorySink::new());
    let mut monitor = Monitor::from_store(
        fx.host.clone(),
        store.clone(),
        sink.clone(),
        Duration::from_millis(20),
    )
    .unwrap()
    .with_observer(observer.clone());

    let (_tx, rx) = mpsc::unbounded_channel();
    monitor
        .start(Box::new(ManualNotifier::default()), rx)
        .unwrap();
    wait_for("first pass", || !observer.full_passes().is_empty()).await;

    fs::write(store.path(), b"[{").unwrap();
    let skipped = |sink: &MemorySink| {
        sink.entries()
            .iter()
            .filter(|(s, m)| *s == Severity::Error && m.contains("object list unavailable"))
            .count()
    };
    wait_for("skipped passes", || skipped(sink.as_ref()) >= 2).await;

    store.save(&fx.registry).unwrap();
    let seen = observer.full_passes().len();
    wait_for("passes resume", || observer.full_passes().len() >= seen + 2).await;
    assert!(monitor.shutdown(GRACE).await);

    // a skipped pass verifies nothing, so it produces no node findings
    let errors: Vec<_> = sink
        .entries()
        .into_iter()
        .filter(|(s, _)| *s == Severity::Error)
        .collect();
    assert!(errors.len() >= 2);
    assert!(errors.iter().all(|(_, m)| m.contains("pass skipped")));
    assert!(observer.full_passes().iter().all(|findings| *findings == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn changed_object_list_rearms_watches() {
    let fx = fixture();
    let store = saved(&fx);
    let notifier = ManualNotifier::default();
    let log = notifier.log.clone();
    let mut monitor = Monitor::from_store(
        fx.host.clone(),
        store.clone(),
        Arc::new(MemorySink::new()),
        Duration::from_millis(20),
    )
    .unwrap();

    let (_tx, rx) = mpsc::unbounded_channel();
    monitor.start(Box::new(notifier), rx).unwrap();
    wait_for("watches armed", || log.lock().len() == 2).await;

    let mut registry = store.load().unwrap();
    registry.remove("first").unwrap();
    store.save(&registry).unwrap();

    // "second" moves to slot 0 and is the only file object left
    wait_for("watches re-armed", || log.lock().len() == 5).await;
    assert!(monitor.shutdown(GRACE).await);
    assert_eq!(monitor.state().registry().len(), 2);

    let log = log.lock().clone();
    assert_eq!(
        log,
        vec!["arm 0", "arm 1", "disarm 0", "disarm 1", "arm 0", "disarm 0"]
    );
}
