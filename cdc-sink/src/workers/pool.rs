use std::collections::HashMap;
use std::sync::Arc;

use cdc_sink_config::shared::SinkManagerConfig;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{Instrument, debug, error, info};

use crate::concurrency::memory_quota::MemoryQuota;
use crate::concurrency::shutdown::ShutdownRx;
use crate::engine::SortEngine;
use crate::error::{ErrorKind, SinkError, SinkResult};
use crate::redo::RedoLogManager;
use crate::sink::TableSink;
use crate::sink_error;
use crate::workers::table_sink::{TableSinkWorker, TableSinkWorkerId, TableSinkWorkerState};
use crate::workers::task::TaskQueue;

type WorkerJoinSet = JoinSet<(TableSinkWorkerId, SinkResult<()>)>;

/// A worker tracked by the pool until it finishes.
#[derive(Debug)]
struct PoolWorker {
    state: TableSinkWorkerState,
    abort_handle: AbortHandle,
}

/// Internal state for [`TableSinkWorkerPool`].
#[derive(Debug)]
struct TableSinkWorkerPoolInner {
    /// Workers that did not finish yet, indexed by worker id.
    active: HashMap<TableSinkWorkerId, PoolWorker>,
    /// Worker tasks not yet handed to [`TableSinkWorkerPool::wait_all`].
    join_set: WorkerJoinSet,
}

/// Fixed set of table sink workers sharing one task queue.
///
/// The pool only spawns, supervises and joins workers. Deciding which table gets a task and
/// when is left to whoever feeds the queue.
#[derive(Debug, Clone)]
pub struct TableSinkWorkerPool {
    inner: Arc<Mutex<TableSinkWorkerPoolInner>>,
}

impl TableSinkWorkerPool {
    /// Creates a new empty pool.
    pub fn new() -> Self {
        let inner = TableSinkWorkerPoolInner {
            active: HashMap::new(),
            join_set: JoinSet::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Creates a pool running `config.worker_count` workers on `task_queue`.
    ///
    /// Fails without spawning anything when `config` does not validate.
    pub async fn start<E, R, S>(
        config: &SinkManagerConfig,
        sort_engine: E,
        redo_log_manager: R,
        memory_quota: Arc<MemoryQuota>,
        task_queue: TaskQueue<S>,
        shutdown_rx: ShutdownRx,
    ) -> SinkResult<Self>
    where
        E: SortEngine + Clone + Send + Sync + 'static,
        R: RedoLogManager + Clone + Send + Sync + 'static,
        S: TableSink + Send + Sync + 'static,
    {
        config.validate().map_err(|err| {
            sink_error!(ErrorKind::ConfigError, "Invalid sink manager configuration"; source = err)
        })?;

        let pool = Self::new();

        for worker_id in 0..usize::from(config.worker_count) {
            let worker = TableSinkWorker::new(
                worker_id,
                config.worker.clone(),
                sort_engine.clone(),
                redo_log_manager.clone(),
                memory_quota.clone(),
                shutdown_rx.clone(),
            );

            pool.spawn(worker, task_queue.clone()).await;
        }

        info!(worker_count = config.worker_count, "started table sink worker pool");

        Ok(pool)
    }

    /// Spawns `worker` on `task_queue` and tracks it in the pool.
    pub async fn spawn<E, R, S>(&self, worker: TableSinkWorker<E, R>, task_queue: TaskQueue<S>)
    where
        E: SortEngine + Send + Sync + 'static,
        R: RedoLogManager + Send + Sync + 'static,
        S: TableSink + Send + Sync + 'static,
    {
        let worker_id = worker.worker_id();
        let state = worker.state();
        let worker_span = tracing::info_span!("table_sink_worker", worker_id);

        let mut inner = self.inner.lock().await;
        let abort_handle = inner.join_set.spawn(
            async move {
                let result = worker.run(task_queue).await;
                (worker_id, result)
            }
            .instrument(worker_span.or_current()),
        );
        inner.active.insert(
            worker_id,
            PoolWorker {
                state,
                abort_handle,
            },
        );

        debug!(worker_id, "spawned table sink worker in pool");
    }

    /// Returns the states of the workers that are still running.
    pub async fn active_worker_states(&self) -> Vec<TableSinkWorkerState> {
        let inner = self.inner.lock().await;
        inner
            .active
            .values()
            .map(|worker| worker.state.clone())
            .collect()
    }

    /// Returns the number of workers that are still running.
    pub async fn active_worker_count(&self) -> usize {
        self.inner.lock().await.active.len()
    }

    /// Waits for all workers to finish.
    ///
    /// Errors of every failed worker are collected and returned together. The pool lock is only
    /// held between joins, so the pool can be queried and aborted while this waits. Dropping the
    /// returned future aborts the workers it was waiting for.
    pub async fn wait_all(&self) -> SinkResult<()> {
        let mut errors = Vec::new();

        loop {
            // Workers spawned while waiting land in a fresh set and are joined on the next round.
            let mut join_set = {
                let mut inner = self.inner.lock().await;
                std::mem::take(&mut inner.join_set)
            };
            if join_set.is_empty() {
                break;
            }

            while let Some(result) = join_set.join_next().await {
                match result {
                    Ok((worker_id, worker_result)) => {
                        self.inner.lock().await.active.remove(&worker_id);

                        if let Err(err) = worker_result {
                            error!(worker_id, error = %err, "table sink worker completed with error");
                            errors.push(err);
                        }
                    }
                    Err(join_err) => {
                        self.remove_finished_workers().await;

                        if join_err.is_cancelled() {
                            debug!("table sink worker task was cancelled");
                        } else {
                            errors.push(SinkError::from(join_err));
                        }
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Aborts every worker still running.
    ///
    /// Tasks in progress are dropped, so their completions report an abort.
    pub async fn abort_all(&self) {
        let inner = self.inner.lock().await;
        for (worker_id, worker) in &inner.active {
            debug!(worker_id, "aborting table sink worker");
            worker.abort_handle.abort();
        }
    }

    async fn remove_finished_workers(&self) {
        self.inner
            .lock()
            .await
            .active
            .retain(|_, worker| !worker.abort_handle.is_finished());
    }
}

impl Default for TableSinkWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
