//! Monitor Loop: a periodic pass over every object plus a change-reaction
//! pass for file objects.
//!
//! Both activities share [`MonitorState`]. Every verification, whatever
//! triggered it, runs under `pass_lock`, so at most one pass executes at a
//! time. Each full pass reads the object list afresh; a list that cannot be
//! read is reported and that pass is skipped. Cancellation is cooperative:
//! both loops wait on the stop signal at every suspension point and
//! `shutdown` joins them with a bounded timeout.

use anyhow::{bail, Result};
use integra_core::{
    verify_all, Host, ObjectKind, ObjectRegistry, ObjectReport, ObjectStore, RegistryHive,
    ReportSink, Severity,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::notifier::{ChangeEvent, ChangeNotifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// What a single pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassScope {
    All,
    Object(usize),
}

/// Instrumentation hook called inside the pass lock.
pub trait PassObserver: Send + Sync {
    fn pass_started(&self, scope: PassScope);
    fn pass_finished(&self, scope: PassScope, findings: usize);
}

/// Produces the current object list at the start of every full pass.
pub type ObjectLoader = Arc<dyn Fn() -> integra_core::Result<ObjectRegistry> + Send + Sync>;

/// A file object the change-reaction loop keeps a watch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub slot: usize,
    pub name: String,
    pub path: PathBuf,
}

fn watch_targets(registry: &ObjectRegistry) -> Vec<WatchTarget> {
    registry
        .objects()
        .iter()
        .enumerate()
        .filter(|(_, object)| object.kind == ObjectKind::FileTree)
        .map(|(slot, object)| WatchTarget {
            slot,
            name: object.name.clone(),
            path: PathBuf::from(&object.base_path),
        })
        .collect()
}

/// Everything both loops share: the pass lock, the stop signal and the
/// handle on the object list last read.
pub struct MonitorState<H> {
    host: Host<H>,
    loader: ObjectLoader,
    registry: RwLock<Arc<ObjectRegistry>>,
    targets: watch::Sender<Vec<WatchTarget>>,
    stop: watch::Sender<bool>,
    sink: Arc<dyn ReportSink>,
    pass_lock: Mutex<()>,
    phase: Mutex<MonitorPhase>,
    observer: Option<Arc<dyn PassObserver>>,
}

impl<H: RegistryHive> MonitorState<H> {
    /// Runs one verification pass under the pass lock. A full pass reloads
    /// the object list first; a single-object pass uses the list as last read.
    pub fn run_pass(&self, scope: PassScope) -> Vec<ObjectReport> {
        let _pass = self.pass_lock.lock();
        if let Some(observer) = &self.observer {
            observer.pass_started(scope);
        }

        let registry = match scope {
            PassScope::All => self.reload(),
            PassScope::Object(_) => Some(self.registry()),
        };
        let reports = match &registry {
            Some(registry) => {
                let objects = registry.objects();
                let selected = match scope {
                    PassScope::All => objects,
                    PassScope::Object(slot) => objects.get(slot..=slot).unwrap_or(&[]),
                };
                verify_all(&self.host, selected, self.sink.as_ref())
            }
            None => Vec::new(),
        };

        if let Some(observer) = &self.observer {
            let findings = reports.iter().map(|r| r.findings().count()).sum();
            observer.pass_finished(scope, findings);
        }
        reports
    }

    /// The object list as last read.
    pub fn registry(&self) -> Arc<ObjectRegistry> {
        self.registry.read().clone()
    }

    fn reload(&self) -> Option<Arc<ObjectRegistry>> {
        match (self.loader)() {
            Ok(registry) => {
                let registry = Arc::new(registry);
                let targets = watch_targets(&registry);
                self.targets.send_if_modified(|current| {
                    if *current == targets {
                        return false;
                    }
                    *current = targets;
                    true
                });
                *self.registry.write() = registry.clone();
                Some(registry)
            }
            Err(e) => {
                self.sink.report(
                    Severity::Error,
                    &format!("object list unavailable, pass skipped: {e}"),
                );
                None
            }
        }
    }

    fn set_phase(&self, phase: MonitorPhase) {
        *self.phase.lock() = phase;
        debug!(?phase, "monitor phase");
    }
}

pub struct Monitor<H> {
    state: Arc<MonitorState<H>>,
    interval: Duration,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl<H> Monitor<H>
where
    H: RegistryHive + Send + Sync + 'static,
{
    /// A monitor over a fixed object list.
    pub fn new(
        host: Host<H>,
        registry: ObjectRegistry,
        sink: Arc<dyn ReportSink>,
        interval: Duration,
    ) -> Self {
        let fixed = registry.clone();
        let loader: ObjectLoader =
            Arc::new(move || -> integra_core::Result<ObjectRegistry> { Ok(fixed.clone()) });
        Self::with_loader(host, loader, registry, sink, interval)
    }

    /// A monitor that re-reads `store` at the start of every full pass, so
    /// objects added, updated or removed while it runs are picked up. The
    /// first read happens here and its failure is returned.
    pub fn from_store(
        host: Host<H>,
        store: ObjectStore,
        sink: Arc<dyn ReportSink>,
        interval: Duration,
    ) -> integra_core::Result<Self> {
        let registry = store.load()?;
        let loader: ObjectLoader = Arc::new(move || store.load());
        Ok(Self::with_loader(host, loader, registry, sink, interval))
    }

    /// `initial` is used until the first full pass calls `loader`.
    pub fn with_loader(
        host: Host<H>,
        loader: ObjectLoader,
        initial: ObjectRegistry,
        sink: Arc<dyn ReportSink>,
        interval: Duration,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let (targets, _) = watch::channel(watch_targets(&initial));
        Self {
            state: Arc::new(MonitorState {
                host,
                loader,
                registry: RwLock::new(Arc::new(initial)),
                targets,
                stop,
                sink,
                pass_lock: Mutex::new(()),
                phase: Mutex::new(MonitorPhase::Idle),
                observer: None,
            }),
            interval,
            tasks: Vec::new(),
        }
    }

    /// Only takes effect before `start`.
    pub fn with_observer(mut self, observer: Arc<dyn PassObserver>) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.observer = Some(observer);
        }
        self
    }

    pub fn phase(&self) -> MonitorPhase {
        *self.state.phase.lock()
    }

    pub fn state(&self) -> &Arc<MonitorState<H>> {
        &self.state
    }

    /// One synchronous pass over every object. Starts no tasks.
    pub fn check_once(&self) -> Vec<ObjectReport> {
        self.state.run_pass(PassScope::All)
    }

    /// Spawns the periodic and change-reaction loops on the current runtime.
    pub fn start(
        &mut self,
        notifier: Box<dyn ChangeNotifier>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> Result<()> {
        if self.phase() != MonitorPhase::Idle {
            bail!("monitor already started");
        }
        self.state.set_phase(MonitorPhase::Running);
        info!(
            objects = self.state.registry().len(),
            interval_secs = self.interval.as_secs(),
            "monitor started"
        );

        let periodic = tokio::spawn(periodic_loop(self.state.clone(), self.interval));
        let changes = tokio::spawn(change_loop(self.state.clone(), notifier, events));
        self.tasks.push(("periodic", periodic));
        self.tasks.push(("change-reaction", changes));
        Ok(())
    }

    /// Signals both loops to stop and waits up to `grace` for each. A loop
    /// that does not finish in time is reported, never killed. Returns
    /// whether every loop finished.
    pub async fn shutdown(&mut self, grace: Duration) -> bool {
        self.state.set_phase(MonitorPhase::Stopping);
        self.state.stop.send_replace(true);

        let mut clean = true;
        for (name, handle) in self.tasks.drain(..) {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => debug!(task = name, "task joined"),
                Ok(Err(e)) => {
                    clean = false;
                    self.state
                        .sink
                        .report(Severity::Error, &format!("{name} loop failed: {e}"));
                }
                Err(_) => {
                    clean = false;
                    self.state.sink.report(
                        Severity::Warning,
                        &format!("{name} loop did not stop within {grace:?}; left detached"),
                    );
                }
            }
        }

        self.state.set_phase(MonitorPhase::Stopped);
        info!(clean, "monitor stopped");
        clean
    }
}

/// Waits for the stop signal. Returns `true` when the loop should exit.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) -> bool {
    match stop_rx.changed().await {
        Ok(()) => *stop_rx.borrow(),
        Err(_) => true,
    }
}

async fn run_pass_blocking<H>(state: &Arc<MonitorState<H>>, scope: PassScope)
where
    H: RegistryHive + Send + Sync + 'static,
{
    let state = state.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || state.run_pass(scope)).await {
        warn!(error = %e, ?scope, "verification pass did not complete");
    }
}

async fn periodic_loop<H>(state: Arc<MonitorState<H>>, interval: Duration)
where
    H: RegistryHive + Send + Sync + 'static,
{
    let mut stop_rx = state.stop.subscribe();
    info!(interval_secs = interval.as_secs(), "periodic loop started");
    loop {
        if *stop_rx.borrow() {
            break;
        }
        run_pass_blocking(&state, PassScope::All).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            stop = stop_requested(&mut stop_rx) => {
                if stop {
                    break;
                }
            }
        }
    }
    info!("periodic loop stopped");
}

async fn change_loop<H>(
    state: Arc<MonitorState<H>>,
    mut notifier: Box<dyn ChangeNotifier>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
) where
    H: RegistryHive + Send + Sync + 'static,
{
    let mut stop_rx = state.stop.subscribe();
    let mut targets_rx = state.targets.subscribe();
    let mut armed = BTreeMap::new();
    let initial = targets_rx.borrow_and_update().clone();
    arm_all(&state, notifier.as_mut(), &mut armed, initial);
    info!(watched = armed.len(), "change-reaction loop started");

    'outer: loop {
        let first = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            changed = targets_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let targets = targets_rx.borrow_and_update().clone();
                info!(objects = targets.len(), "object list changed; re-arming watches");
                disarm_all(notifier.as_mut(), &mut armed);
                arm_all(&state, notifier.as_mut(), &mut armed, targets);
                continue;
            }
            stop = stop_requested(&mut stop_rx) => {
                if stop {
                    break;
                }
                continue;
            }
        };

        // Notifications that queued up during the last pass collapse into
        // one verification per object.
        let mut pending = BTreeMap::new();
        pending.insert(first.slot, first.rearm);
        while let Ok(event) = events.try_recv() {
            *pending.entry(event.slot).or_insert(false) |= event.rearm;
        }

        for (slot, rearm) in pending {
            if *stop_rx.borrow() {
                break 'outer;
            }
            let Some(target) = armed.get(&slot).cloned() else {
                continue;
            };
            debug!(slot, object = %target.name, "change notification");
            run_pass_blocking(&state, PassScope::Object(slot)).await;

            if rearm {
                if let Err(e) = notifier.rearm(slot, &target.path) {
                    notifier.disarm(slot);
                    armed.remove(&slot);
                    fallback_warning(&state, &target.name, &e.to_string());
                }
            }
        }
    }

    disarm_all(notifier.as_mut(), &mut armed);
    info!("change-reaction loop stopped");
}

fn arm_all<H>(
    state: &MonitorState<H>,
    notifier: &mut dyn ChangeNotifier,
    armed: &mut BTreeMap<usize, WatchTarget>,
    targets: Vec<WatchTarget>,
) {
    for target in targets {
        match notifier.arm(target.slot, &target.path) {
            Ok(()) => {
                armed.insert(target.slot, target);
            }
            Err(e) => fallback_warning(state, &target.name, &e.to_string()),
        }
    }
}

fn disarm_all(notifier: &mut dyn ChangeNotifier, armed: &mut BTreeMap<usize, WatchTarget>) {
    for slot in std::mem::take(armed).into_keys() {
        notifier.disarm(slot);
    }
}

fn fallback_warning<H>(state: &MonitorState<H>, name: &str, reason: &str) {
    state.sink.report(
        Severity::Warning,
        &format!("[{name}] change notifications unavailable, periodic checks only: {reason}"),
    );
}
