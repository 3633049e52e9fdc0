use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use cdc_sink_config::shared::WorkerConfig;
use metrics::{counter, histogram};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info};

use crate::bail;
use crate::concurrency::memory_quota::MemoryQuota;
use crate::concurrency::shutdown::{ShutdownRx, wait_for_shutdown};
use crate::engine::{EventIterator, SortEngine};
use crate::error::{ErrorKind, SinkResult};
use crate::failpoints::{
    TABLE_SINK_WORKER_BEFORE_EMIT, TABLE_SINK_WORKER_BEFORE_RESOLVED_TS, sink_fail_point,
};
use crate::metrics::{
    CDC_SINK_EMITTED_ROWS_TOTAL, CDC_SINK_FLUSHED_BYTES_TOTAL, CDC_SINK_FLUSHES_TOTAL,
    CDC_SINK_RESOLVED_TS_PUBLISHED_TOTAL, CDC_SINK_TASK_DURATION_SECONDS,
    CDC_SINK_TASK_EARLY_STOPS_TOTAL, CDC_SINK_TASKS_COMPLETED_TOTAL, CDC_SINK_WORKER_ABORTS_TOTAL,
    ERROR_COMPONENT_LABEL, FLUSH_REASON_LABEL, RESOLVED_MODE_LABEL, TABLE_ID_LABEL,
    WORKER_ID_LABEL,
};
use crate::redo::RedoLogManager;
use crate::sink::TableSink;
use crate::types::{PolymorphicEvent, Position, ResolvedTs, SizeHint, TableId, Ts};
use crate::workers::base::WorkerHandle;
use crate::workers::task::{TableSinkTask, TaskQueue};

/// Identifier of a worker inside its pool.
pub type TableSinkWorkerId = usize;

/// Internal state of [`TableSinkWorkerState`].
#[derive(Debug)]
pub struct TableSinkWorkerStateInner {
    worker_id: TableSinkWorkerId,
    /// Table of the task currently being processed.
    current_table_id: Option<TableId>,
    tasks_completed: u64,
}

impl TableSinkWorkerStateInner {
    pub fn worker_id(&self) -> TableSinkWorkerId {
        self.worker_id
    }

    pub fn current_table_id(&self) -> Option<TableId> {
        self.current_table_id
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }
}

/// Shared view of what a table sink worker is doing.
#[derive(Debug, Clone)]
pub struct TableSinkWorkerState {
    inner: Arc<Mutex<TableSinkWorkerStateInner>>,
}

impl TableSinkWorkerState {
    fn new(worker_id: TableSinkWorkerId) -> Self {
        let inner = TableSinkWorkerStateInner {
            worker_id,
            current_table_id: None,
            tasks_completed: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the table of the task in progress, if any.
    pub async fn current_table_id(&self) -> Option<TableId> {
        self.inner.lock().await.current_table_id
    }

    /// Returns the number of tasks completed successfully.
    pub async fn tasks_completed(&self) -> u64 {
        self.inner.lock().await.tasks_completed
    }

    /// Returns the worker id.
    pub async fn worker_id(&self) -> TableSinkWorkerId {
        self.inner.lock().await.worker_id
    }

    async fn task_started(&self, table_id: TableId) {
        self.inner.lock().await.current_table_id = Some(table_id);
    }

    async fn task_finished(&self, completed: bool) {
        let mut inner = self.inner.lock().await;
        inner.current_table_id = None;
        if completed {
            inner.tasks_completed += 1;
        }
    }
}

/// Handle of a table sink worker spawned with [`TableSinkWorker::spawn`].
#[derive(Debug)]
pub struct TableSinkWorkerHandle {
    state: TableSinkWorkerState,
    handle: Option<JoinHandle<SinkResult<()>>>,
}

impl WorkerHandle<TableSinkWorkerState> for TableSinkWorkerHandle {
    fn state(&self) -> TableSinkWorkerState {
        self.state.clone()
    }

    async fn wait(mut self) -> SinkResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await??;

        Ok(())
    }
}

/// Point of the stream reached by the last flush.
#[derive(Debug, Clone, Copy)]
struct FlushPoint {
    commit_ts: Ts,
    /// Whether the flush ended on a transaction boundary.
    txn_complete: bool,
}

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy)]
enum FlushReason {
    TxnBoundary,
    BatchSize,
}

impl FlushReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::TxnBoundary => "txn_boundary",
            Self::BatchSize => "batch_size",
        }
    }
}

/// How the read loop of a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOutcome {
    Exhausted,
    QuotaExceeded,
}

/// Bookkeeping of a task in progress.
#[derive(Debug)]
struct TaskProgress {
    /// Bytes acquired from the quota and not yet spent on events.
    available_mem: u64,
    /// Events read but not flushed yet.
    events: Vec<PolymorphicEvent>,
    /// Bytes of `events`.
    buffered_bytes: u64,
    /// Bytes flushed since the last published resolved ts.
    pending_size: u64,
    last_position: Option<Position>,
    /// Set when something was flushed after the last published resolved ts.
    unpublished: Option<FlushPoint>,
    /// Last point published to the sink by this task.
    published: Option<FlushPoint>,
}

impl TaskProgress {
    fn new(available_mem: u64) -> Self {
        Self {
            available_mem,
            events: Vec::new(),
            buffered_bytes: 0,
            pending_size: 0,
            last_position: None,
            unpublished: None,
            published: None,
        }
    }

    /// Bytes held for the task that were never flushed.
    fn unspent_bytes(&self) -> u64 {
        self.available_mem.saturating_add(self.buffered_bytes)
    }
}

/// Worker moving events from the sort engine into table sinks.
///
/// A worker processes one [`TableSinkTask`] at a time. For each task it reads the table's events
/// up to the barrier, flushes them to the sink at every transaction boundary (and every
/// `batch_size` events when transactions may be split), and advances the sink's resolved ts
/// once enough bytes were flushed. Memory is force-acquired from the shared [`MemoryQuota`] as
/// events are read, and the task stops early at a transaction boundary when the quota is
/// exceeded. Whatever was acquired but not flushed is refunded before the task completes.
#[derive(Debug)]
pub struct TableSinkWorker<E, R> {
    worker_id: TableSinkWorkerId,
    config: WorkerConfig,
    sort_engine: E,
    redo_log_manager: R,
    memory_quota: Arc<MemoryQuota>,
    shutdown_rx: ShutdownRx,
    state: TableSinkWorkerState,
}

impl<E, R> TableSinkWorker<E, R> {
    /// Creates a new table sink worker.
    pub fn new(
        worker_id: TableSinkWorkerId,
        config: WorkerConfig,
        sort_engine: E,
        redo_log_manager: R,
        memory_quota: Arc<MemoryQuota>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            worker_id,
            config,
            sort_engine,
            redo_log_manager,
            memory_quota,
            shutdown_rx,
            state: TableSinkWorkerState::new(worker_id),
        }
    }

    pub fn worker_id(&self) -> TableSinkWorkerId {
        self.worker_id
    }

    /// Returns a shared view of the worker state.
    pub fn state(&self) -> TableSinkWorkerState {
        self.state.clone()
    }
}

impl<E, R> TableSinkWorker<E, R>
where
    E: SortEngine + Send + Sync + 'static,
    R: RedoLogManager + Send + Sync + 'static,
{
    /// Spawns [`TableSinkWorker::run`] on the runtime and returns a handle for monitoring.
    pub fn spawn<S>(self, task_queue: TaskQueue<S>) -> TableSinkWorkerHandle
    where
        S: TableSink + Send + Sync + 'static,
    {
        let state = self.state.clone();
        let handle = tokio::spawn(self.run(task_queue));

        TableSinkWorkerHandle {
            state,
            handle: Some(handle),
        }
    }

    /// Processes tasks from `task_queue` until shutdown is requested.
    ///
    /// Shutdown is only observed while waiting for the next task, a task in progress always runs
    /// to its end. The loop also ends when the queue is closed. Any task failure aborts the
    /// worker and is returned.
    pub async fn run<S>(mut self, task_queue: TaskQueue<S>) -> SinkResult<()>
    where
        S: TableSink + Send + Sync + 'static,
    {
        info!(
            worker_id = self.worker_id,
            split_txn = self.config.split_txn,
            redo_enabled = self.redo_log_manager.enabled(),
            "starting table sink worker"
        );

        loop {
            let task = tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    info!(worker_id = self.worker_id, "table sink worker stopped due to shutdown");

                    return Ok(());
                }

                task = task_queue.recv() => task,
            };

            let Some(task) = task else {
                info!(worker_id = self.worker_id, "task queue closed, stopping table sink worker");

                return Ok(());
            };

            let table_id = task.table_id();
            let task_span = tracing::info_span!(
                "table_sink_task",
                worker_id = self.worker_id,
                table_id = %table_id
            );

            self.state.task_started(table_id).await;
            let result = self.handle_task(task).instrument(task_span).await;
            self.state.task_finished(result.is_ok()).await;

            if let Err(err) = result {
                let component = err.kind().component().as_str();
                error!(
                    worker_id = self.worker_id,
                    %table_id,
                    component,
                    error = %err,
                    "table sink task failed, aborting worker"
                );
                counter!(
                    CDC_SINK_WORKER_ABORTS_TOTAL,
                    WORKER_ID_LABEL => self.worker_id.to_string(),
                    ERROR_COMPONENT_LABEL => component
                )
                .increment(1);

                return Err(err);
            }
        }
    }

    async fn handle_task<S>(&self, task: TableSinkTask<S>) -> SinkResult<()>
    where
        S: TableSink + Send + Sync + 'static,
    {
        let started_at = Instant::now();
        let parts = task.into_parts();
        let table_id = parts.table_id;
        let table_sink = parts.table_sink;

        if table_sink.table_id() != table_id {
            bail!(
                ErrorKind::InvalidState,
                "Task and table sink disagree on the table",
                "Task of table {} carries the table sink of table {}",
                table_id,
                table_sink.table_id()
            );
        }

        let barrier_ts = parts.barrier_ts.load(Ordering::Acquire);
        if barrier_ts == 0 {
            debug!(lower_bound = %parts.lower_bound, "no barrier yet, completing task immediately");

            complete_task(parts.completion_tx, parts.lower_bound);
            self.record_task_completed(table_id, started_at);

            return Ok(());
        }

        let upper_bound = Position::upper_bound_for_barrier(barrier_ts);
        debug!(
            lower_bound = %parts.lower_bound,
            %upper_bound,
            barrier_ts,
            "starting table sink task"
        );

        let grant_bytes = self.memory_quota.default_grant_bytes();
        self.memory_quota.force_acquire(table_id, grant_bytes);

        let mut progress = TaskProgress::new(grant_bytes);
        let mut iterator = self
            .sort_engine
            .fetch_by_table(table_id, parts.lower_bound, upper_bound);

        let outcome = match self
            .drain(table_id, &table_sink, &mut iterator, &mut progress)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.memory_quota
                    .refund(table_id, progress.unspent_bytes());

                return Err(err);
            }
        };

        // Flushed bytes must be accounted for before the table goes back to the dispatcher.
        if let Err(err) = self
            .publish_pending(table_id, &table_sink, &mut progress)
            .await
        {
            self.memory_quota
                .refund(table_id, progress.unspent_bytes());

            return Err(err);
        }

        // The next task of the table starts with a new transaction.
        if self.config.split_txn
            && progress
                .published
                .is_some_and(|flush_point| flush_point.txn_complete)
        {
            self.memory_quota.reset_batch_id(table_id);
        }

        let refund_bytes = progress.unspent_bytes();
        self.memory_quota.refund(table_id, refund_bytes);

        iterator.close().await?;

        let last_position = progress.last_position.unwrap_or(parts.lower_bound);
        if outcome == DrainOutcome::QuotaExceeded {
            info!(%last_position, "memory quota exceeded, table sink task stopped early");
            counter!(
                CDC_SINK_TASK_EARLY_STOPS_TOTAL,
                WORKER_ID_LABEL => self.worker_id.to_string()
            )
            .increment(1);
        }

        debug!(
            %last_position,
            refund_bytes,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "table sink task completed"
        );

        complete_task(parts.completion_tx, last_position);
        self.record_task_completed(table_id, started_at);

        Ok(())
    }

    /// Reads events until the cursor is exhausted or the quota is exceeded at a transaction
    /// boundary.
    async fn drain<S, I>(
        &self,
        table_id: TableId,
        table_sink: &S,
        iterator: &mut I,
        progress: &mut TaskProgress,
    ) -> SinkResult<DrainOutcome>
    where
        S: TableSink + Send + Sync + 'static,
        I: EventIterator,
    {
        let grant_bytes = self.memory_quota.default_grant_bytes();

        while let Some((event, position)) = iterator.next().await? {
            let commit_ts = event.commit_ts;
            let size = event.size_hint() as u64;

            while progress.available_mem < size {
                self.memory_quota.force_acquire(table_id, grant_bytes);
                progress.available_mem += grant_bytes;
            }
            progress.available_mem -= size;
            progress.events.push(event);
            progress.buffered_bytes += size;

            if position.is_valid() {
                progress.last_position = Some(position);

                self.flush(table_id, table_sink, progress, FlushReason::TxnBoundary)
                    .await?;
                progress.unpublished = Some(FlushPoint {
                    commit_ts,
                    txn_complete: true,
                });

                if progress.pending_size >= self.config.max_update_interval_bytes {
                    self.publish_pending(table_id, table_sink, progress).await?;
                }

                if self.memory_quota.is_exceed() {
                    self.publish_pending(table_id, table_sink, progress).await?;

                    return Ok(DrainOutcome::QuotaExceeded);
                }

                continue;
            }

            if self.config.split_txn && progress.events.len() as u64 >= self.config.batch_size {
                self.flush(table_id, table_sink, progress, FlushReason::BatchSize)
                    .await?;
                progress.unpublished = Some(FlushPoint {
                    commit_ts,
                    txn_complete: false,
                });

                if progress.pending_size >= self.config.max_update_interval_bytes {
                    self.publish_pending(table_id, table_sink, progress).await?;
                }
            }
        }

        Ok(DrainOutcome::Exhausted)
    }

    /// Flushes the buffered events and adds their bytes to the pending size.
    async fn flush<S>(
        &self,
        table_id: TableId,
        table_sink: &S,
        progress: &mut TaskProgress,
        reason: FlushReason,
    ) -> SinkResult<()>
    where
        S: TableSink + Send + Sync + 'static,
    {
        let events = std::mem::take(&mut progress.events);
        let size = emit_events_to_table_sink(table_sink, events).await?;

        progress.buffered_bytes = progress.buffered_bytes.saturating_sub(size);
        progress.pending_size += size;

        counter!(
            CDC_SINK_FLUSHES_TOTAL,
            TABLE_ID_LABEL => table_id.to_string(),
            FLUSH_REASON_LABEL => reason.as_str()
        )
        .increment(1);

        Ok(())
    }

    /// Publishes the resolved ts of the last flush, if it was not published yet.
    async fn publish_pending<S>(
        &self,
        table_id: TableId,
        table_sink: &S,
        progress: &mut TaskProgress,
    ) -> SinkResult<()>
    where
        S: TableSink + Send + Sync + 'static,
    {
        let Some(flush_point) = progress.unpublished.take() else {
            return Ok(());
        };

        self.update_table_sink_resolved_ts(
            table_id,
            table_sink,
            flush_point,
            progress.published,
            progress.pending_size,
        )
        .await?;
        progress.published = Some(flush_point);
        progress.pending_size = 0;

        Ok(())
    }

    /// Records `size` flushed bytes against the quota and advances the sink's resolved ts.
    ///
    /// With transaction splitting every resolved ts is in batch mode. Batch ids keep increasing
    /// within a commit ts and restart once the published commit ts moves past `previous`.
    async fn update_table_sink_resolved_ts<S>(
        &self,
        table_id: TableId,
        table_sink: &S,
        flush_point: FlushPoint,
        previous: Option<FlushPoint>,
        size: u64,
    ) -> SinkResult<ResolvedTs>
    where
        S: TableSink + Send + Sync + 'static,
    {
        sink_fail_point(TABLE_SINK_WORKER_BEFORE_RESOLVED_TS)?;

        let resolved_ts = if self.config.split_txn {
            if previous.is_some_and(|previous| previous.commit_ts != flush_point.commit_ts) {
                self.memory_quota.reset_batch_id(table_id);
            }

            ResolvedTs::new_batch(
                flush_point.commit_ts,
                self.memory_quota.allocate_batch_id(table_id),
            )
        } else {
            ResolvedTs::new(flush_point.commit_ts)
        };

        self.memory_quota.record(table_id, resolved_ts, size);
        table_sink.update_resolved_ts(resolved_ts).await?;

        debug!(%resolved_ts, size, "published resolved ts");
        counter!(
            CDC_SINK_RESOLVED_TS_PUBLISHED_TOTAL,
            TABLE_ID_LABEL => table_id.to_string(),
            RESOLVED_MODE_LABEL => resolved_ts.mode_name()
        )
        .increment(1);

        Ok(resolved_ts)
    }

    fn record_task_completed(&self, table_id: TableId, started_at: Instant) {
        counter!(
            CDC_SINK_TASKS_COMPLETED_TOTAL,
            WORKER_ID_LABEL => self.worker_id.to_string()
        )
        .increment(1);
        histogram!(
            CDC_SINK_TASK_DURATION_SECONDS,
            TABLE_ID_LABEL => table_id.to_string()
        )
        .record(started_at.elapsed().as_secs_f64());
    }
}

/// Verifies and splits `events` through the table sink, then emits the resulting rows.
///
/// Returns the approximate bytes of the flushed events.
pub async fn emit_events_to_table_sink<S>(
    table_sink: &S,
    events: Vec<PolymorphicEvent>,
) -> SinkResult<u64>
where
    S: TableSink + Send + Sync,
{
    sink_fail_point(TABLE_SINK_WORKER_BEFORE_EMIT)?;

    let mut rows = Vec::with_capacity(events.len());
    let mut size = 0u64;
    for event in events {
        size += event.size_hint() as u64;
        rows.extend(table_sink.verify_and_try_split_event(event)?);
    }

    let row_count = rows.len() as u64;
    table_sink.emit_row_changed_events(rows).await?;

    let table_id = table_sink.table_id().to_string();
    counter!(CDC_SINK_FLUSHED_BYTES_TOTAL, TABLE_ID_LABEL => table_id.clone()).increment(size);
    counter!(CDC_SINK_EMITTED_ROWS_TOTAL, TABLE_ID_LABEL => table_id).increment(row_count);

    Ok(size)
}

fn complete_task(completion_tx: oneshot::Sender<Position>, last_position: Position) {
    if completion_tx.send(last_position).is_err() {
        debug!(%last_position, "task completion receiver dropped");
    }
}
