//! Watches hotfolder input paths, pairs PDF/XML arrivals, and runs the
//! worker pool that drives the document pipeline (component I).
//!
//! A bounded channel feeds a semaphore-gated pool of
//! `tokio::spawn`ed executions, plus a `CancellationToken` observed at
//! stage boundaries for cooperative shutdown.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{HotfolderConfig, HotfolderId, Settings};
use crate::counters::CounterStore;
use crate::db::ExportDriver;
use crate::error::{ErrorKind, PipelineError};
use crate::pipeline::{self, DocumentPair, Pipeline, PipelineOutcome};
use crate::tooling::ToolResolver;

type Fingerprint = (HotfolderId, String);

/// One unit of work handed from a watcher to the worker pool: a fully
/// paired (or deliberately solo) document plus the hotfolder config that
/// produced it.
struct WorkItem {
    config: Arc<HotfolderConfig>,
    pair: DocumentPair,
    fingerprint: Fingerprint,
}

/// A running filesystem watcher for one input path, plus the task reading
/// its debounced event stream.
struct WatchHandle {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    reader: tokio::task::JoinHandle<()>,
}

struct Inner {
    settings: Settings,
    counters: Arc<CounterStore>,
    resolver: ToolResolver,
    scratch_root: PathBuf,
    db_driver: Option<Arc<dyn ExportDriver>>,
    cancel: CancellationToken,
    queue_tx: mpsc::Sender<WorkItem>,
    semaphore: Arc<Semaphore>,
    /// Fingerprints currently being stability-checked, paired, queued, or
    /// executed. Guarantees at most one pipeline per `(hotfolder_id,
    /// basename)` is active at any instant and lets
    /// later filesystem events for the same key be coalesced.
    inflight: StdMutex<HashSet<Fingerprint>>,
    /// Watchers keyed by canonicalised input path, plus the current config
    /// snapshot, both owned exclusively by the supervisor.
    watched: AsyncMutex<HashMap<PathBuf, WatchHandle>>,
    configs: AsyncMutex<Vec<HotfolderConfig>>,
    /// Every candidate-tracking and pipeline-execution task spawned so far,
    /// awaited on `stop()` so shutdown only returns once the queue has
    /// drained and every worker is idle. A plain `std::sync::Mutex`, not
    /// the async one: `track()` must register a future into the set
    /// synchronously, in the same call that spawns it, so `stop()` can
    /// never observe a future that's been "spawned" but not yet inserted.
    tasks: StdMutex<JoinSet<()>>,
}

/// Owns the in-memory list of hotfolder configs and the worker pool
///.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Construct a supervisor with no watched paths yet. Call
    /// [`Supervisor::set_configs`] to start watching — the same call is
    /// used both for the initial start-up reconciliation and for every
    /// subsequent configuration change.
    pub fn new(
        settings: Settings,
        counters: Arc<CounterStore>,
        resolver: ToolResolver,
        scratch_root: PathBuf,
        db_driver: Option<Arc<dyn ExportDriver>>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(settings.queue_capacity);
        let semaphore = Arc::new(Semaphore::new(settings.worker_pool_size.max(1)));
        let cancel = CancellationToken::new();

        let inner = Arc::new(Inner {
            settings,
            counters,
            resolver,
            scratch_root,
            db_driver,
            cancel,
            queue_tx,
            semaphore,
            inflight: StdMutex::new(HashSet::new()),
            watched: AsyncMutex::new(HashMap::new()),
            configs: AsyncMutex::new(Vec::new()),
            tasks: StdMutex::new(JoinSet::new()),
        });

        let supervisor = Self { inner };
        supervisor.spawn_dispatcher(queue_rx);
        supervisor.spawn_stale_workspace_sweep();
        supervisor
    }

    /// Human-readable status, in the literal format the GUI collaborator
    /// expects verbatim: `"<active> von <total> Hotfoldern
    /// aktiv"`.
    pub async fn status(&self) -> String {
        let configs = self.inner.configs.lock().await;
        let active = configs.iter().filter(|c| c.enabled).count();
        format!("{active} von {} Hotfoldern aktiv", configs.len())
    }

    /// Replace the in-memory config list and reconcile watchers: new
    /// enabled input paths gain a watcher (and a start-up scan of whatever
    /// is already sitting there), removed ones lose theirs, and in-flight
    /// work for paths that remain untouched continues uninterrupted
    ///.
    pub async fn set_configs(&self, configs: Vec<HotfolderConfig>) {
        let wanted: HashMap<PathBuf, Arc<HotfolderConfig>> = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| (c.input_path.clone(), Arc::new(c.clone())))
            .collect();

        *self.inner.configs.lock().await = configs;

        let mut watched = self.inner.watched.lock().await;

        let stale: Vec<PathBuf> = watched
            .keys()
            .filter(|path| !wanted.contains_key(*path))
            .cloned()
            .collect();
        for path in stale {
            if let Some(handle) = watched.remove(&path) {
                handle.reader.abort();
                info!(path = %path.display(), "stopped watching input path");
            }
        }

        for (path, config) in wanted {
            if watched.contains_key(&path) {
                continue;
            }
            match self.start_watch(Arc::clone(&config)) {
                Ok(handle) => {
                    info!(hotfolder_id = %config.id, path = %path.display(), "watching input path");
                    watched.insert(path.clone(), handle);
                    self.scan_existing(config);
                }
                Err(e) => {
                    warn!(hotfolder_id = %config.id, "failed to watch {}: {e}", path.display());
                }
            }
        }
    }

    /// Cooperative shutdown: stop accepting new filesystem work, let the
    /// queue drain, and return once every worker is idle.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();

        let mut watched = self.inner.watched.lock().await;
        for (_, handle) in watched.drain() {
            handle.reader.abort();
        }
        drop(watched);

        // Swap the live set out under the lock rather than holding the lock
        // across the drain loop's `.await` points (a `std::sync::Mutex`
        // guard can't be held across an await anyway). Anything tracked
        // after this point lands in the fresh, empty set and races past
        // this `stop()` call, but everything tracked before it — including
        // anything registered concurrently with this swap, since `track()`
        // takes the same lock to insert — is captured here and fully
        // drained before `stop()` returns.
        let mut tasks = {
            let mut guard = self.inner.tasks.lock().unwrap();
            std::mem::replace(&mut *guard, JoinSet::new())
        };
        while tasks.join_next().await.is_some() {}
    }

    // ── Watching ─────────────────────────────────────────────────────

    fn start_watch(&self, config: Arc<HotfolderConfig>) -> notify::Result<WatchHandle> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(Duration::from_millis(250), tx)?;
        debouncer
            .watcher()
            .watch(&config.input_path, RecursiveMode::Recursive)?;

        let supervisor = self.clone();
        let reader = tokio::task::spawn_blocking(move || {
            for result in rx {
                match result {
                    Ok(events) => {
                        for event in events {
                            if event.kind != DebouncedEventKind::Any {
                                continue;
                            }
                            if !is_pdf(&event.path) {
                                continue;
                            }
                            let worker = supervisor.clone();
                            let config = Arc::clone(&config);
                            let path = event.path.clone();
                            supervisor.track(async move {
                                worker.handle_candidate(config, path).await;
                            });
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            warn!("filesystem watch error: {e}");
                        }
                    }
                }
            }
        });

        Ok(WatchHandle {
            _debouncer: debouncer,
            reader,
        })
    }

    /// Start-up reconciliation: treat every pre-existing PDF in
    /// `config.input_path` as a freshly arrived candidate.
    fn scan_existing(&self, config: Arc<HotfolderConfig>) {
        let Ok(entries) = std::fs::read_dir(&config.input_path) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_pdf(&path) {
                let supervisor = self.clone();
                let config = Arc::clone(&config);
                self.track(async move {
                    supervisor.handle_candidate(config, path).await;
                });
            }
        }
    }

    /// Spawn `fut` as a tracked background task so `stop()` can wait for
    /// it. Registration into the `JoinSet` happens synchronously, in this
    /// call, rather than via a detached task that locks and inserts later —
    /// otherwise `stop()` could acquire the lock and drain the set in the
    /// window between "caller observed `track()` return" and "the future
    /// actually landed in the set", returning before that work completes.
    fn track(&self, fut: impl std::future::Future<Output = ()> + Send + 'static) {
        self.inner.tasks.lock().unwrap().spawn(fut);
    }

    // ── Candidate lifecycle: stabilise → pair → enqueue ─────────────

    async fn handle_candidate(&self, config: Arc<HotfolderConfig>, pdf_path: PathBuf) {
        let Some(basename) = pdf_path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };
        let fingerprint: Fingerprint = (config.id.clone(), basename);

        {
            let mut inflight = self.inner.inflight.lock().unwrap();
            if !inflight.insert(fingerprint.clone()) {
                debug!(hotfolder_id = %config.id, "duplicate event for {} coalesced", pdf_path.display());
                return;
            }
        }

        if !self.wait_until_stable(&pdf_path).await {
            self.release(&fingerprint);
            return;
        }

        let arrival_time = SystemTime::now();

        if config.process_pairs {
            match self.wait_for_pair(&pdf_path).await {
                Some(xml_path) => {
                    self.enqueue(WorkItem {
                        config,
                        pair: DocumentPair {
                            pdf_path,
                            xml_path: Some(xml_path),
                            arrival_time,
                        },
                        fingerprint,
                    })
                    .await;
                }
                None => {
                    warn!(hotfolder_id = %config.id, "no XML sidecar arrived for {} within pairing timeout", pdf_path.display());
                    let pair = DocumentPair {
                        pdf_path,
                        xml_path: None,
                        arrival_time,
                    };
                    let error = PipelineError::new(ErrorKind::UnpairedInput, "no matching XML sidecar arrived within the pairing timeout");
                    pipeline::bucket_failure(&config, &self.inner.counters, &pair, &pair, &error).await;
                    self.release(&fingerprint);
                }
            }
        } else {
            self.enqueue(WorkItem {
                config,
                pair: DocumentPair {
                    pdf_path,
                    xml_path: find_matching_xml(&pdf_path),
                    arrival_time,
                },
                fingerprint,
            })
            .await;
        }
    }

    /// Poll `(len, modified)` until unchanged for `stability_window_ms`,
    /// or until the file disappears or shutdown is requested.
    async fn wait_until_stable(&self, path: &Path) -> bool {
        let window = Duration::from_millis(self.inner.settings.stability_window_ms);
        let poll = Duration::from_millis(200).min(window);
        let mut last: Option<(u64, SystemTime)> = None;
        let mut stable_since: Option<SystemTime> = None;

        loop {
            if self.inner.cancel.is_cancelled() {
                return false;
            }
            let Ok(metadata) = std::fs::metadata(path) else {
                return false;
            };
            let Ok(modified) = metadata.modified() else {
                return false;
            };
            let sample = (metadata.len(), modified);

            let now = SystemTime::now();
            match last {
                Some(prev) if prev == sample => {
                    let since = stable_since.get_or_insert(now);
                    if now.duration_since(*since).unwrap_or_default() >= window {
                        return true;
                    }
                }
                _ => {
                    stable_since = None;
                }
            }
            last = Some(sample);

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.inner.cancel.cancelled() => return false,
            }
        }
    }

    /// Wait for a same-basename XML sidecar to appear and stabilise, up to
    /// `pairing_timeout_ms`.
    async fn wait_for_pair(&self, pdf_path: &Path) -> Option<PathBuf> {
        let deadline = SystemTime::now() + Duration::from_millis(self.inner.settings.pairing_timeout_ms);
        let poll = Duration::from_millis(200);

        loop {
            if let Some(xml_path) = find_matching_xml(pdf_path) {
                if self.wait_until_stable(&xml_path).await {
                    return Some(xml_path);
                }
            }
            if SystemTime::now() >= deadline || self.inner.cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.inner.cancel.cancelled() => return None,
            }
        }
    }

    /// Send a fully paired candidate to the worker pool. Blocks (applying
    /// back-pressure) if the bounded queue is full.
    async fn enqueue(&self, item: WorkItem) {
        if self.inner.queue_tx.send(item).await.is_err() {
            warn!("work queue closed, dropping candidate");
        }
    }

    fn release(&self, fingerprint: &Fingerprint) {
        self.inner.inflight.lock().unwrap().remove(fingerprint);
    }

    // ── Worker pool ──────────────────────────────────────────────────

    fn spawn_dispatcher(&self, mut queue_rx: mpsc::Receiver<WorkItem>) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            while let Some(item) = queue_rx.recv().await {
                if supervisor.inner.cancel.is_cancelled() {
                    supervisor.release(&item.fingerprint);
                    continue;
                }

                let permit = match Arc::clone(&supervisor.inner.semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let worker = supervisor.clone();
                supervisor.track(async move {
                    let _permit = permit;
                    worker.run_one(item).await;
                });
            }
        });
    }

    /// Periodically remove workspace directories orphaned by a killed
    /// process — belt-and-braces recovery alongside `Workspace`'s own
    /// `Drop` cleanup.
    fn spawn_stale_workspace_sweep(&self) {
        const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
        const MAX_WORKSPACE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

        let scratch_root = self.inner.scratch_root.clone();
        let cancel = self.inner.cancel.clone();
        self.track(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                    _ = cancel.cancelled() => return,
                }
                let root = scratch_root.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    pipeline::cleanup_stale_workspaces(&root, MAX_WORKSPACE_AGE)
                })
                .await;
            }
        });
    }

    async fn run_one(&self, item: WorkItem) {
        let WorkItem { config, pair, fingerprint } = item;

        let pipeline = Pipeline {
            config: &config,
            counters: &self.inner.counters,
            resolver: &self.inner.resolver,
            scratch_root: &self.inner.scratch_root,
            db_driver: self.inner.db_driver.as_deref(),
        };

        match pipeline.run(pair).await {
            PipelineOutcome::Done { exports } => {
                info!(hotfolder_id = %config.id, "pipeline completed, {} export(s)", exports.len());
            }
            PipelineOutcome::Failed { error } => {
                warn!(hotfolder_id = %config.id, kind = %error.kind, "pipeline failed: {}", error.message);
            }
        }

        self.release(&fingerprint);
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Find a same-basename XML sidecar next to `pdf_path`, if one exists.
fn find_matching_xml(pdf_path: &Path) -> Option<PathBuf> {
    let candidate = pdf_path.with_extension("xml");
    if candidate.exists() {
        return Some(candidate);
    }
    let upper = pdf_path.with_extension("XML");
    if upper.exists() {
        return Some(upper);
    }
    None
}
