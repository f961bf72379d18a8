//! Concurrent, resumable generation over the job store.
//!
//! Every selected item becomes a task up front. A semaphore bounds how many
//! are inside the backend at once and a mutex around the store serializes
//! commits, so the durable file is rewritten exactly once per finished item.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use kanjigen_backend::Backend;
use kanjigen_extract::Extractor;
use kanjigen_shared::{
    AppConfig, BackendKind, ItemState, KanjigenError, Record, Result, WorkItem,
};
use kanjigen_storage::JobStore;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use crate::prompt::PromptTemplate;
use crate::retry::{AttemptOutcome, FailureKind, RetryController, RetryPolicy};

// ---------------------------------------------------------------------------
// Options and summary
// ---------------------------------------------------------------------------

/// Knobs for one dispatcher run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Maximum number of items inside the backend at once (at least 1).
    pub concurrency: usize,
    /// Per-invocation deadline.
    pub timeout: Duration,
    /// Extra attempts per item after the first.
    pub max_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Process at most this many pending items.
    pub limit: Option<usize>,
    /// Reset failed items to pending before selecting work.
    pub requeue_failed: bool,
    /// Reject records that fail the downstream shape check.
    pub validate_shape: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            timeout: Duration::from_secs(180),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            limit: None,
            requeue_failed: false,
            validate_shape: false,
        }
    }
}

impl RunOptions {
    /// Options from the `[defaults]` section and the backend's timeout.
    pub fn from_config(config: &AppConfig, backend: BackendKind) -> Self {
        let defaults = &config.defaults;
        Self {
            concurrency: defaults.concurrency,
            timeout: config.timeout_for(backend),
            max_retries: defaults.max_retries,
            retry_delay: Duration::from_millis(defaults.retry_delay_ms),
            limit: None,
            requeue_failed: defaults.requeue_failed,
            validate_shape: defaults.validate_shape,
        }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: self.retry_delay,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items that reached the backend.
    pub attempted: usize,
    /// Items committed as completed in this run.
    pub completed: usize,
    /// Items committed as failed in this run.
    pub failed: usize,
    /// Selected items that were never attempted (run aborted).
    pub skipped: usize,
    /// Items whose commit could not be persisted.
    pub commit_errors: usize,
    /// Failed items reset to pending before the run.
    pub requeued: usize,
    /// Completed items in the store after the run.
    pub store_completed: usize,
    /// Items in the store.
    pub store_total: usize,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for dispatcher runs.
pub trait DispatchProgress: Send + Sync {
    /// Work was selected; `total` items will be dispatched.
    fn started(&self, total: usize);
    /// Item number `idx` (1-based) passed the admission gate.
    fn item_started(&self, id: &str, idx: usize, total: usize);
    /// An item was committed; `done` items have finished so far.
    fn item_finished(&self, id: &str, ok: bool, done: usize, total: usize);
    /// The run is over.
    fn finished(&self, summary: &RunSummary);
}

/// No-op dispatch progress.
pub struct SilentProgress;

impl DispatchProgress for SilentProgress {
    fn started(&self, _total: usize) {}
    fn item_started(&self, _id: &str, _idx: usize, _total: usize) {}
    fn item_finished(&self, _id: &str, _ok: bool, _done: usize, _total: usize) {}
    fn finished(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// How one task ended.
enum TaskOutcome {
    Completed,
    Failed,
    Skipped,
    CommitError,
    Fatal(String),
}

/// Drives the retry controller over every pending item of a store.
pub struct Dispatcher {
    extractor: Extractor,
    prompts: PromptTemplate,
}

impl Dispatcher {
    pub fn new(extractor: Extractor, prompts: PromptTemplate) -> Self {
        Self { extractor, prompts }
    }

    /// Process pending items until every one is committed or the backend
    /// proves unavailable.
    ///
    /// Returns [`KanjigenError::BackendUnavailable`] if the backend executable
    /// is missing. Items not yet attempted at that point stay pending.
    #[instrument(skip_all, fields(backend = backend.name(), concurrency = options.concurrency))]
    pub async fn run<B: Backend + 'static>(
        self,
        store: Arc<Mutex<JobStore>>,
        backend: Arc<B>,
        options: &RunOptions,
        progress: Arc<dyn DispatchProgress>,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        let work = {
            let mut guard = store.lock().await;
            if options.requeue_failed {
                summary.requeued = guard.requeue_failed()?;
            }
            let mut pending = guard.pending_items();
            if let Some(limit) = options.limit {
                pending.truncate(limit);
            }
            pending
        };

        let total = work.len();
        if total == 0 {
            info!("nothing pending");
            fill_store_counts(&mut summary, &store).await;
            summary.elapsed = start.elapsed();
            progress.finished(&summary);
            return Ok(summary);
        }

        info!(total, timeout_s = options.timeout.as_secs(), max_retries = options.max_retries, "starting run");
        progress.started(total);

        let controller = Arc::new(RetryController::new(self.extractor, options.policy()));
        let prompts = Arc::new(self.prompts);
        let gate = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let abort = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        for item in work {
            let ctx = TaskContext {
                store: store.clone(),
                backend: backend.clone(),
                controller: controller.clone(),
                prompts: prompts.clone(),
                progress: progress.clone(),
                gate: gate.clone(),
                abort: abort.clone(),
                done: done.clone(),
                started: started.clone(),
                timeout: options.timeout,
                validate_shape: options.validate_shape,
                total,
            };
            handles.push(tokio::spawn(ctx.process(item)));
        }

        let mut fatal = None;
        for handle in handles {
            match handle.await {
                Ok(TaskOutcome::Completed) => {
                    summary.attempted += 1;
                    summary.completed += 1;
                }
                Ok(TaskOutcome::Failed) => {
                    summary.attempted += 1;
                    summary.failed += 1;
                }
                Ok(TaskOutcome::CommitError) => {
                    summary.attempted += 1;
                    summary.commit_errors += 1;
                }
                Ok(TaskOutcome::Skipped) => summary.skipped += 1,
                Ok(TaskOutcome::Fatal(message)) => {
                    summary.attempted += 1;
                    fatal.get_or_insert(message);
                }
                Err(e) => {
                    error!(error = %e, "dispatch task panicked");
                    summary.skipped += 1;
                }
            }
        }

        fill_store_counts(&mut summary, &store).await;
        summary.elapsed = start.elapsed();
        progress.finished(&summary);

        info!(
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            commit_errors = summary.commit_errors,
            store_completed = summary.store_completed,
            store_total = summary.store_total,
            elapsed_ms = summary.elapsed.as_millis(),
            "run finished"
        );

        match fatal {
            Some(message) => Err(KanjigenError::BackendUnavailable(message)),
            None => Ok(summary),
        }
    }

    /// Generate a single item regardless of its current status.
    ///
    /// Retries follow `options.max_retries`; the CLI passes 0. The new state
    /// is committed and returned.
    #[instrument(skip_all, fields(id = %id, backend = backend.name()))]
    pub async fn run_one<B: Backend>(
        self,
        store: &mut JobStore,
        backend: &B,
        id: &str,
        options: &RunOptions,
    ) -> Result<WorkItem> {
        let item = store
            .get(id)
            .ok_or_else(|| KanjigenError::UnknownItem(id.to_string()))?;
        info!(group = item.group, status = %item.state.status(), timeout_s = options.timeout.as_secs(), "generating single item");

        let controller = RetryController::new(self.extractor, options.policy());
        let prompt = self.prompts.render(&item);
        let outcome = controller.run(&item, backend, &prompt, options.timeout).await;
        if outcome.is_fatal() {
            return Err(KanjigenError::BackendUnavailable(outcome.error));
        }

        let state = settle(&item, outcome, options.validate_shape);
        store.commit(id, state)?;
        store
            .get(id)
            .ok_or_else(|| KanjigenError::UnknownItem(id.to_string()))
    }
}

async fn fill_store_counts(summary: &mut RunSummary, store: &Mutex<JobStore>) {
    let guard = store.lock().await;
    summary.store_completed = guard.meta().completed;
    summary.store_total = guard.meta().total;
}

/// Everything a spawned task needs, owned.
struct TaskContext<B> {
    store: Arc<Mutex<JobStore>>,
    backend: Arc<B>,
    controller: Arc<RetryController>,
    prompts: Arc<PromptTemplate>,
    progress: Arc<dyn DispatchProgress>,
    gate: Arc<Semaphore>,
    abort: Arc<AtomicBool>,
    done: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
    timeout: Duration,
    validate_shape: bool,
    total: usize,
}

impl<B: Backend + 'static> TaskContext<B> {
    async fn process(self, item: WorkItem) -> TaskOutcome {
        // A closed gate means the run was aborted.
        let Ok(_permit) = self.gate.acquire().await else {
            return TaskOutcome::Skipped;
        };
        if self.abort.load(Ordering::SeqCst) {
            return TaskOutcome::Skipped;
        }

        let idx = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        self.progress.item_started(&item.id, idx, self.total);
        debug!(id = %item.id, group = item.group, idx, total = self.total, "generating");

        let prompt = self.prompts.render(&item);
        let outcome = self
            .controller
            .run(&item, self.backend.as_ref(), &prompt, self.timeout)
            .await;

        if outcome.is_fatal() {
            if !self.abort.swap(true, Ordering::SeqCst) {
                error!(id = %item.id, error = %outcome.error, "backend unavailable, aborting run");
            }
            self.gate.close();
            return TaskOutcome::Fatal(outcome.error);
        }

        let state = settle(&item, outcome, self.validate_shape);
        let ok = state.is_completed();
        if let ItemState::Failed { last_error } = &state {
            warn!(id = %item.id, error = %last_error, "item failed");
        }

        let committed = {
            let mut store = self.store.lock().await;
            store.commit(&item.id, state)
        };

        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        match committed {
            Ok(()) => {
                self.progress.item_finished(&item.id, ok, done, self.total);
                if ok {
                    info!(id = %item.id, done, total = self.total, "item completed");
                    TaskOutcome::Completed
                } else {
                    TaskOutcome::Failed
                }
            }
            Err(e) => {
                error!(id = %item.id, error = %e, "failed to persist item");
                self.progress.item_finished(&item.id, false, done, self.total);
                TaskOutcome::CommitError
            }
        }
    }
}

/// Final state for an item given the retry outcome.
fn settle(item: &WorkItem, outcome: AttemptOutcome, validate_shape: bool) -> ItemState {
    let Some(record) = outcome.record else {
        return ItemState::Failed {
            last_error: outcome.error,
        };
    };

    let checked = validate_identity(item, &record).and_then(|()| {
        if validate_shape {
            kanjigen_render::validate_record(&record).map_err(|e| e.to_string())
        } else {
            Ok(())
        }
    });

    match checked {
        Ok(()) => ItemState::Completed { payload: record },
        Err(message) => ItemState::Failed {
            last_error: format!("{}: {message}", FailureKind::ValidationMismatch),
        },
    }
}

/// A record must describe the item it was generated for.
///
/// `kanji`, when present, must equal the item id. `grade`, when present and
/// numeric, must equal the item group.
pub fn validate_identity(item: &WorkItem, record: &Record) -> std::result::Result<(), String> {
    match record.get("kanji") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if s.trim() == item.id => {}
        Some(other) => {
            return Err(format!("expected kanji {}, got {other}", item.id));
        }
    }

    if let Some(grade) = record.get("grade").and_then(Value::as_u64) {
        if grade != u64::from(item.group) {
            return Err(format!("expected grade {}, got {grade}", item.group));
        }
    }

    Ok(())
}
