use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::types::{Position, TableId, Ts};

/// Unit of work handed to a table sink worker.
///
/// A task moves the events of one table from `lower_bound` up to the current barrier into the
/// table's sink. The barrier is shared with the dispatcher, which may advance it at any time, and
/// is read once when the task starts.
#[derive(Debug)]
pub struct TableSinkTask<S> {
    table_id: TableId,
    lower_bound: Position,
    barrier_ts: Arc<AtomicU64>,
    table_sink: S,
    completion_tx: oneshot::Sender<Position>,
}

impl<S> TableSinkTask<S> {
    /// Creates a new task together with the handle that observes its completion.
    pub fn new(
        table_id: TableId,
        lower_bound: Position,
        barrier_ts: Arc<AtomicU64>,
        table_sink: S,
    ) -> (Self, TaskCompletion) {
        let (completion_tx, completion_rx) = oneshot::channel();

        let task = Self {
            table_id,
            lower_bound,
            barrier_ts,
            table_sink,
            completion_tx,
        };

        (task, TaskCompletion { completion_rx })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn lower_bound(&self) -> Position {
        self.lower_bound
    }

    /// Splits the task into the parts a worker consumes.
    pub(crate) fn into_parts(self) -> TaskParts<S> {
        TaskParts {
            table_id: self.table_id,
            lower_bound: self.lower_bound,
            barrier_ts: self.barrier_ts,
            table_sink: self.table_sink,
            completion_tx: self.completion_tx,
        }
    }
}

/// Owned contents of a [`TableSinkTask`].
#[derive(Debug)]
pub(crate) struct TaskParts<S> {
    pub(crate) table_id: TableId,
    pub(crate) lower_bound: Position,
    pub(crate) barrier_ts: Arc<AtomicU64>,
    pub(crate) table_sink: S,
    pub(crate) completion_tx: oneshot::Sender<Position>,
}

/// Receiving side of a task completion.
///
/// Completion is delivered exactly once, and only when the task succeeds. An aborted task drops
/// its sender, which [`TaskCompletion::last_position`] reports as `None`.
#[derive(Debug)]
pub struct TaskCompletion {
    completion_rx: oneshot::Receiver<Position>,
}

impl TaskCompletion {
    /// Waits for the task to finish and returns the last position written.
    ///
    /// Returns `None` if the task was aborted.
    pub async fn last_position(self) -> Option<Position> {
        self.completion_rx.await.ok()
    }

    /// Returns the last position written if the task already finished successfully.
    pub fn try_last_position(&mut self) -> Option<Position> {
        self.completion_rx.try_recv().ok()
    }
}

/// Creates a shared barrier timestamp for the tasks of one table.
pub fn create_barrier_ts(barrier_ts: Ts) -> Arc<AtomicU64> {
    Arc::new(AtomicU64::new(barrier_ts))
}

/// Producer side of the task queue.
pub type TaskSender<S> = mpsc::Sender<TableSinkTask<S>>;

/// Consumer side of the task queue, shared by all workers of a pool.
///
/// Each task is received by exactly one worker.
#[derive(Debug)]
pub struct TaskQueue<S> {
    receiver: Arc<Mutex<mpsc::Receiver<TableSinkTask<S>>>>,
}

impl<S> TaskQueue<S> {
    /// Waits for the next task.
    ///
    /// Returns `None` once every [`TaskSender`] is dropped and the queue is drained. The future
    /// is cancel safe.
    pub async fn recv(&self) -> Option<TableSinkTask<S>> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }
}

impl<S> Clone for TaskQueue<S> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

/// Creates a bounded task queue.
pub fn create_task_queue<S>(capacity: usize) -> (TaskSender<S>, TaskQueue<S>) {
    let (tx, rx) = mpsc::channel(capacity);

    let queue = TaskQueue {
        receiver: Arc::new(Mutex::new(rx)),
    };

    (tx, queue)
}
