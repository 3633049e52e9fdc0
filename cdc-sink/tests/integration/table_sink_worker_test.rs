use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cdc_sink::concurrency::memory_quota::MemoryQuota;
use cdc_sink::concurrency::shutdown::{ShutdownRx, create_shutdown_channel};
use cdc_sink::engine::memory::MemorySortEngine;
use cdc_sink::error::{ErrorKind, SinkResult};
use cdc_sink::metrics::{
    CDC_SINK_FLUSHED_BYTES_TOTAL, CDC_SINK_MEMORY_QUOTA_FORCE_ACQUIRES_TOTAL,
    CDC_SINK_MEMORY_QUOTA_USAGE_BYTES, CDC_SINK_TASKS_COMPLETED_TOTAL,
    CDC_SINK_WORKER_ABORTS_TOTAL,
};
use cdc_sink::redo::NoopRedoLogManager;
use cdc_sink::sink::TableSink;
use cdc_sink::sink::memory::MemoryTableSink;
use cdc_sink::test_utils::event::{insert_event, key_update_row, transaction};
use cdc_sink::test_utils::sort_engine::{SortEngineFaults, TestSortEngineWrapper};
use cdc_sink::test_utils::test_table_sink_wrapper::{
    TableSinkCall, TableSinkFaults, TestTableSinkWrapper,
};
use cdc_sink::test_utils::worker::{memory_quota, worker_config};
use cdc_sink::types::{PolymorphicEvent, Position, ResolvedTs, TableId};
use cdc_sink::workers::base::WorkerHandle;
use cdc_sink::workers::table_sink::{TableSinkWorker, emit_events_to_table_sink};
use cdc_sink::workers::task::{TableSinkTask, create_barrier_ts, create_task_queue};
use cdc_sink_config::shared::WorkerConfig;
use cdc_sink_telemetry::metrics::init_metrics_handle;
use cdc_sink_telemetry::tracing::init_test_tracing;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const TABLE: TableId = TableId(1);
const LARGE_INTERVAL: u64 = 256 * 1024 * 1024;

type TestEngine = TestSortEngineWrapper<MemorySortEngine>;
type TestSink = TestTableSinkWrapper<MemoryTableSink>;

fn new_worker(
    engine: &TestEngine,
    memory_quota: &Arc<MemoryQuota>,
    config: WorkerConfig,
    shutdown_rx: ShutdownRx,
) -> TableSinkWorker<TestEngine, NoopRedoLogManager> {
    TableSinkWorker::new(
        0,
        config,
        engine.clone(),
        NoopRedoLogManager,
        memory_quota.clone(),
        shutdown_rx,
    )
}

fn new_sink() -> TestSink {
    TestTableSinkWrapper::wrap(MemoryTableSink::new(TABLE))
}

async fn new_engine(events: Vec<PolymorphicEvent>) -> TestEngine {
    let engine = TestSortEngineWrapper::wrap(MemorySortEngine::new());
    engine.inner().add_events(events).await;
    engine
}

/// Runs `worker` until every task in `tasks` was processed.
async fn run_tasks<S>(
    worker: TableSinkWorker<TestEngine, NoopRedoLogManager>,
    tasks: Vec<TableSinkTask<S>>,
) -> SinkResult<()>
where
    S: TableSink + Send + Sync + 'static,
{
    let (task_tx, task_queue) = create_task_queue(tasks.len().max(1));
    for task in tasks {
        task_tx.send(task).await.unwrap();
    }
    drop(task_tx);

    worker.run(task_queue).await
}

#[tokio::test(flavor = "multi_thread")]
async fn single_small_transaction_is_flushed_and_published_once() {
    init_test_tracing();

    let engine = new_engine(transaction(TABLE, 10, 5, 3, 100)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );
    let state = worker.state();

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(10, 5)));
    assert_eq!(sink.emit_count().await, 1);
    assert_eq!(sink.emitted_rows().await.len(), 3);
    assert_eq!(sink.resolved_ts_updates().await, vec![ResolvedTs::new(10)]);
    assert_eq!(engine.closes(), 1);
    assert_eq!(state.tasks_completed().await, 1);
    assert_eq!(state.current_table_id().await, None);

    // Flushed bytes stay acquired until the sink side releases them.
    assert_eq!(memory_quota.usage(), 300);
    assert_eq!(memory_quota.release(TABLE, ResolvedTs::new(10)), 300);
    assert_eq!(memory_quota.usage(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn task_without_completed_transaction_completes_with_lower_bound() {
    init_test_tracing();

    // The only transaction commits after the barrier.
    let engine = new_engine(transaction(TABLE, 30, 25, 2, 100)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let lower_bound = Position::new(5, 4);
    let (task, completion) =
        TableSinkTask::new(TABLE, lower_bound, create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(lower_bound));
    assert_eq!(
        engine.fetches(),
        vec![(TABLE, lower_bound, Position::new(19, 20))]
    );
    assert_eq!(engine.events_read(), 0);
    assert_eq!(engine.closes(), 1);
    assert!(sink.calls().await.is_empty());
    assert_eq!(memory_quota.usage(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_barrier_completes_without_fetching() {
    init_test_tracing();

    let engine = new_engine(transaction(TABLE, 10, 5, 2, 100)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(0), new_sink());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::default()));
    assert!(engine.fetches().is_empty());
    assert_eq!(memory_quota.usage(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn exceeded_quota_stops_task_after_transaction_boundary() {
    init_test_tracing();

    let mut events = transaction(TABLE, 10, 5, 3, 200);
    events.extend(transaction(TABLE, 20, 15, 3, 200));
    let engine = new_engine(events).await;
    // The third event needs a second grant, which brings usage to the ceiling.
    let memory_quota = memory_quota(1000, 500);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(100), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(10, 5)));
    assert_eq!(sink.resolved_ts_updates().await, vec![ResolvedTs::new(10)]);
    assert_eq!(sink.emitted_rows().await.len(), 3);
    // No read happens after the boundary that exceeded the quota.
    assert_eq!(engine.next_calls(), 3);
    assert_eq!(engine.events_read(), 3);
    assert_eq!(engine.closes(), 1);
    // Everything but the recorded bytes was refunded.
    assert_eq!(memory_quota.usage(), 600);
    assert_eq!(memory_quota.release(TABLE, ResolvedTs::new(10)), 600);
}

#[tokio::test(flavor = "multi_thread")]
async fn event_larger_than_grant_acquires_enough_memory() {
    init_test_tracing();
    let metrics_handle = init_metrics_handle().unwrap();

    let table_id = TableId::new(88);
    let engine = new_engine(vec![insert_event(table_id, 10, 5, 350)]).await;
    let memory_quota = memory_quota(1024 * 1024, 100);
    let sink = TestTableSinkWrapper::wrap(MemoryTableSink::new(table_id));
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(table_id, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(10, 5)));
    assert_eq!(sink.emitted_rows().await.len(), 1);
    // The initial grant plus three more cover 350 bytes, the unused 50 bytes went back.
    let rendered = metrics_handle.render();
    assert!(rendered.contains(&format!(
        "{CDC_SINK_MEMORY_QUOTA_FORCE_ACQUIRES_TOTAL}{{table_id=\"88\"}} 4\n"
    )));
    assert_eq!(memory_quota.usage(), 350);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_grant_unit_still_makes_progress() {
    init_test_tracing();
    let metrics_handle = init_metrics_handle().unwrap();

    let table_id = TableId::new(89);
    let engine = new_engine(vec![insert_event(table_id, 10, 5, 3)]).await;
    let memory_quota = memory_quota(1024 * 1024, 0);
    let sink = TestTableSinkWrapper::wrap(MemoryTableSink::new(table_id));
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(table_id, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(10, 5)));
    assert_eq!(sink.resolved_ts_updates().await, vec![ResolvedTs::new(10)]);
    // One byte per grant, starting with the first one taken by the task.
    let rendered = metrics_handle.render();
    assert!(rendered.contains(&format!(
        "{CDC_SINK_MEMORY_QUOTA_FORCE_ACQUIRES_TOTAL}{{table_id=\"89\"}} 3\n"
    )));
    assert_eq!(memory_quota.usage(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_splitting_flushes_only_at_transaction_boundaries() {
    init_test_tracing();

    let engine = new_engine(transaction(TABLE, 10, 5, 10, 10)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(&engine, &memory_quota, worker_config(false, 3, 1), shutdown_rx);

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(10, 5)));
    assert_eq!(sink.emit_count().await, 1);
    assert_eq!(sink.emitted_rows().await.len(), 10);
    assert_eq!(sink.resolved_ts_updates().await, vec![ResolvedTs::new(10)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn enabled_splitting_publishes_increasing_batch_ids() {
    init_test_tracing();

    let mut events = transaction(TABLE, 10, 5, 10, 10);
    events.extend(transaction(TABLE, 20, 15, 4, 10));
    let engine = new_engine(events).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(30), sink.clone());
    let worker = new_worker(&engine, &memory_quota, worker_config(true, 3, 1), shutdown_rx);

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(20, 15)));
    // Ten events in batches of three need four flushes, four events need two.
    assert_eq!(sink.emit_count().await, 6);
    assert_eq!(
        sink.resolved_ts_updates().await,
        vec![
            ResolvedTs::new_batch(10, 1),
            ResolvedTs::new_batch(10, 2),
            ResolvedTs::new_batch(10, 3),
            ResolvedTs::new_batch(10, 4),
            ResolvedTs::new_batch(20, 1),
            ResolvedTs::new_batch(20, 2),
        ]
    );
    assert_eq!(sink.emitted_rows().await.len(), 14);
    assert_eq!(memory_quota.usage(), 140);
    assert_eq!(memory_quota.release(TABLE, ResolvedTs::new(20)), 140);
}

#[tokio::test(flavor = "multi_thread")]
async fn enabled_splitting_publishes_transaction_boundary_in_batch_mode() {
    init_test_tracing();

    let engine = new_engine(transaction(TABLE, 10, 5, 4, 10)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(&engine, &memory_quota, worker_config(true, 100, 1), shutdown_rx);

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(10, 5)));
    assert_eq!(sink.emit_count().await, 1);
    assert_eq!(
        sink.resolved_ts_updates().await,
        vec![ResolvedTs::new_batch(10, 1)]
    );
    // Numbering restarts for the next task of the table.
    assert_eq!(memory_quota.allocate_batch_id(TABLE), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn enabled_splitting_keeps_batch_ids_increasing_across_tasks() {
    init_test_tracing();

    let mut events = Vec::new();
    for commit_ts in [10, 20] {
        events.extend(transaction(TABLE, commit_ts, commit_ts - 5, 3, 10));
    }
    let engine = new_engine(events).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let barrier_ts = create_barrier_ts(15);
    let (first_task, _first_completion) =
        TableSinkTask::new(TABLE, Position::default(), barrier_ts.clone(), sink.clone());
    let (second_task, second_completion) =
        TableSinkTask::new(TABLE, Position::new(10, 6), create_barrier_ts(25), sink.clone());
    let worker = new_worker(&engine, &memory_quota, worker_config(true, 2, 1), shutdown_rx);

    run_tasks(worker, vec![first_task, second_task]).await.unwrap();

    assert_eq!(
        second_completion.last_position().await,
        Some(Position::new(20, 15))
    );
    let updates = sink.resolved_ts_updates().await;
    assert_eq!(
        updates,
        vec![
            ResolvedTs::new_batch(10, 1),
            ResolvedTs::new_batch(10, 2),
            ResolvedTs::new_batch(20, 1),
            ResolvedTs::new_batch(20, 2),
        ]
    );
    assert!(updates.is_sorted());
}

#[tokio::test(flavor = "multi_thread")]
async fn flushed_bytes_are_published_when_task_ends() {
    init_test_tracing();

    let mut events = transaction(TABLE, 10, 5, 5, 10);
    events.extend(transaction(TABLE, 20, 15, 5, 10));
    let engine = new_engine(events).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, _completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(30), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(true, 2, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();

    // Splitting still flushes early, but the interval is never reached before the end.
    assert_eq!(sink.emit_count().await, 6);
    assert_eq!(
        sink.resolved_ts_updates().await,
        vec![ResolvedTs::new_batch(20, 1)]
    );
    assert_eq!(memory_quota.release(TABLE, ResolvedTs::new(20)), 100);
    assert_eq!(memory_quota.usage(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_are_flushed_before_covering_resolved_ts() {
    init_test_tracing();

    let mut events = Vec::new();
    for commit_ts in [10, 20, 30, 40, 50] {
        events.extend(transaction(TABLE, commit_ts, commit_ts - 5, 4, 10));
    }
    let engine = new_engine(events).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, _completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(100), sink.clone());
    let worker = new_worker(&engine, &memory_quota, worker_config(true, 3, 25), shutdown_rx);

    run_tasks(worker, vec![task]).await.unwrap();

    let calls = sink.calls().await;
    let mut emitted_per_commit: BTreeMap<u64, usize> = BTreeMap::new();
    let mut last_resolved_ts = None;
    for call in calls {
        match call {
            TableSinkCall::Emit(rows) => {
                for row in rows {
                    *emitted_per_commit.entry(row.commit_ts).or_default() += 1;
                }
            }
            TableSinkCall::UpdateResolvedTs(resolved_ts) => {
                assert!(last_resolved_ts <= Some(resolved_ts));
                last_resolved_ts = Some(resolved_ts);

                // Fully covered transactions are fully emitted.
                let covered_up_to = if resolved_ts.is_batch_mode() {
                    resolved_ts.ts - 1
                } else {
                    resolved_ts.ts
                };
                for (commit_ts, count) in emitted_per_commit.range(..=covered_up_to) {
                    assert_eq!(*count, 4, "transaction {commit_ts} published before its rows");
                }
                assert!(emitted_per_commit.contains_key(&resolved_ts.ts));
            }
        }
    }

    // The boundary of the last transaction follows its mid-transaction flush.
    assert_eq!(last_resolved_ts, Some(ResolvedTs::new_batch(50, 2)));
}

#[tokio::test(flavor = "multi_thread")]
async fn consecutive_tasks_advance_without_rereading() {
    init_test_tracing();

    let mut events = Vec::new();
    for commit_ts in [10, 20, 30, 40] {
        events.extend(transaction(TABLE, commit_ts, commit_ts - 5, 2, 10));
    }
    let engine = new_engine(events).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let (task_tx, task_queue) = create_task_queue(4);

    let handle = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    )
    .spawn(task_queue);

    let barrier_ts = create_barrier_ts(25);
    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), barrier_ts.clone(), sink.clone());
    task_tx.send(task).await.unwrap();
    let first_position = completion.last_position().await.unwrap();
    assert_eq!(first_position, Position::new(20, 15));

    barrier_ts.store(45, Ordering::Release);
    let (task, completion) =
        TableSinkTask::new(TABLE, first_position.next(), barrier_ts, sink.clone());
    task_tx.send(task).await.unwrap();
    assert_eq!(completion.last_position().await, Some(Position::new(40, 35)));

    shutdown_tx.shutdown();
    handle.wait().await.unwrap();

    let commit_ts_of_rows = sink
        .emitted_rows()
        .await
        .iter()
        .map(|row| row.commit_ts)
        .collect::<Vec<_>>();
    assert_eq!(commit_ts_of_rows, vec![10, 10, 20, 20, 30, 30, 40, 40]);
    assert_eq!(
        sink.resolved_ts_updates().await,
        vec![ResolvedTs::new(20), ResolvedTs::new(40)]
    );
    assert_eq!(engine.fetches()[1].1, Position::new(20, 16));
}

#[tokio::test(flavor = "multi_thread")]
async fn acquired_memory_is_either_recorded_or_refunded() {
    init_test_tracing();

    let mut rng = StdRng::seed_from_u64(42);
    let mut events = Vec::new();
    let mut total_bytes = 0u64;
    for txn in 1..=20u64 {
        let len = rng.gen_range(1..8);
        for index in 0..len {
            let size = rng.gen_range(1..400usize);
            total_bytes += size as u64;

            let mut event = insert_event(TABLE, txn * 10, txn * 10 - 5, size);
            event.row.columns[0].value = Some(format!("{txn}-{index}"));
            events.push(event);
        }
    }
    let engine = new_engine(events).await;
    let memory_quota = memory_quota(u64::MAX, 128);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(1000), sink.clone());
    let worker = new_worker(&engine, &memory_quota, worker_config(true, 3, 512), shutdown_rx);

    run_tasks(worker, vec![task]).await.unwrap();

    assert_eq!(completion.last_position().await, Some(Position::new(200, 195)));
    assert_eq!(memory_quota.usage(), total_bytes);
    assert_eq!(
        memory_quota.release(TABLE, ResolvedTs::new(200)),
        total_bytes
    );
    assert_eq!(memory_quota.usage(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn releasing_every_published_resolved_ts_frees_all_memory() {
    init_test_tracing();

    let mut events = transaction(TABLE, 10, 5, 5, 20);
    events.extend(transaction(TABLE, 20, 15, 2, 20));
    let engine = new_engine(events).await;
    let memory_quota = memory_quota(1024 * 1024, 64);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, _completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(30), sink.clone());
    let worker = new_worker(&engine, &memory_quota, worker_config(true, 2, 1), shutdown_rx);

    run_tasks(worker, vec![task]).await.unwrap();

    // Acts as the downstream flusher confirming each watermark in order.
    let mut freed = 0;
    for resolved_ts in sink.resolved_ts_updates().await {
        freed += memory_quota.release(TABLE, resolved_ts);
    }

    assert_eq!(freed, 140);
    assert_eq!(memory_quota.table_usage(TABLE), 0);
    assert_eq!(memory_quota.usage(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_while_idle_leaves_queued_tasks_untouched() {
    init_test_tracing();

    let engine = new_engine(transaction(TABLE, 10, 5, 2, 10)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let (task_tx, task_queue) = create_task_queue(4);

    let (task, mut completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), new_sink());
    task_tx.send(task).await.unwrap();
    shutdown_tx.shutdown();

    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );
    let state = worker.state();
    worker.run(task_queue.clone()).await.unwrap();

    assert_eq!(state.tasks_completed().await, 0);
    assert!(engine.fetches().is_empty());
    assert_eq!(completion.try_last_position(), None);
    assert!(task_queue.recv().await.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_worker_waiting_for_tasks() {
    init_test_tracing();

    let engine = new_engine(Vec::new()).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let (_task_tx, task_queue) = create_task_queue::<TestSink>(4);

    let handle = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    )
    .spawn(task_queue);

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.shutdown();

    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_failure_aborts_worker_and_refunds_memory() {
    init_test_tracing();

    let engine = TestSortEngineWrapper::wrap_with_faults(
        MemorySortEngine::new(),
        SortEngineFaults {
            fail_after_events: Some(1),
            ..Default::default()
        },
    );
    engine
        .inner()
        .add_events(transaction(TABLE, 10, 5, 3, 100))
        .await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    let err = run_tasks(worker, vec![task]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SortEngineFetchFailed);
    assert_eq!(completion.last_position().await, None);
    assert_eq!(engine.closes(), 0);
    assert!(sink.calls().await.is_empty());
    assert_eq!(memory_quota.usage(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn verification_failure_aborts_worker() {
    init_test_tracing();
    let metrics_handle = init_metrics_handle().unwrap();

    let engine = new_engine(transaction(TABLE, 10, 5, 3, 100)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = TestTableSinkWrapper::wrap_with_faults(
        MemoryTableSink::new(TABLE),
        TableSinkFaults {
            fail_verify_after: Some(1),
            ..Default::default()
        },
    );
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    let err = run_tasks(worker, vec![task]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(completion.last_position().await, None);
    assert_eq!(sink.emit_count().await, 0);
    assert_eq!(engine.closes(), 0);
    assert_eq!(memory_quota.usage(), 0);
    assert!(metrics_handle.render().lines().any(|line| {
        line.starts_with(CDC_SINK_WORKER_ABORTS_TOTAL) && line.contains("component=\"table_sink\"")
    }));
}

#[tokio::test(flavor = "multi_thread")]
async fn close_failure_aborts_worker_after_publishing() {
    init_test_tracing();

    let engine = TestSortEngineWrapper::wrap_with_faults(
        MemorySortEngine::new(),
        SortEngineFaults {
            fail_on_close: true,
            ..Default::default()
        },
    );
    engine
        .inner()
        .add_events(transaction(TABLE, 10, 5, 3, 100))
        .await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = new_sink();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    let err = run_tasks(worker, vec![task]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SortEngineCloseFailed);
    assert_eq!(completion.last_position().await, None);
    assert_eq!(sink.resolved_ts_updates().await, vec![ResolvedTs::new(10)]);
    assert_eq!(memory_quota.usage(), 300);
}

#[tokio::test(flavor = "multi_thread")]
async fn resolved_ts_regression_aborts_worker() {
    init_test_tracing();

    let engine = new_engine(transaction(TABLE, 10, 5, 3, 100)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let table_sink = MemoryTableSink::new(TABLE);
    table_sink
        .update_resolved_ts(ResolvedTs::new(100))
        .await
        .unwrap();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), table_sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    let err = run_tasks(worker, vec![task]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TableSinkResolvedTsRegressed);
    assert_eq!(completion.last_position().await, None);
    assert_eq!(table_sink.resolved_ts().await, Some(ResolvedTs::new(100)));
}

#[tokio::test(flavor = "multi_thread")]
async fn key_updates_are_split_by_the_table_sink() {
    init_test_tracing();

    let engine = new_engine(vec![PolymorphicEvent::new(key_update_row(
        TABLE, 10, 5, 1, 2,
    ))])
    .await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let sink = TestTableSinkWrapper::wrap(
        MemoryTableSink::new(TABLE).with_split_key_updates(true),
    );
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, _completion) =
        TableSinkTask::new(TABLE, Position::default(), create_barrier_ts(20), sink.clone());
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();

    let rows = sink.inner().rows().await;
    assert_eq!(rows.len(), 2);
    assert!(rows[0].columns.is_empty());
    assert!(rows[1].pre_columns.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn emit_returns_flushed_bytes() {
    init_test_tracing();

    let sink = new_sink();

    let size = emit_events_to_table_sink(&sink, transaction(TABLE, 10, 5, 4, 25))
        .await
        .unwrap();

    assert_eq!(size, 100);
    assert_eq!(sink.verify_calls(), 4);
    assert_eq!(sink.emitted_rows().await.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn task_progress_is_exported_as_metrics() {
    init_test_tracing();
    let metrics_handle = init_metrics_handle().unwrap();

    let table_id = TableId::new(77);
    let engine = new_engine(transaction(table_id, 10, 5, 3, 100)).await;
    let memory_quota = memory_quota(1024 * 1024, 1024);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (task, completion) = TableSinkTask::new(
        table_id,
        Position::default(),
        create_barrier_ts(20),
        TestTableSinkWrapper::wrap(MemoryTableSink::new(table_id)),
    );
    let worker = new_worker(
        &engine,
        &memory_quota,
        worker_config(false, 256, LARGE_INTERVAL),
        shutdown_rx,
    );

    run_tasks(worker, vec![task]).await.unwrap();
    assert!(completion.last_position().await.is_some());

    let rendered = metrics_handle.render();
    assert!(rendered.contains(CDC_SINK_TASKS_COMPLETED_TOTAL));
    assert!(rendered.contains(CDC_SINK_MEMORY_QUOTA_USAGE_BYTES));
    assert!(rendered.contains(&format!("{CDC_SINK_FLUSHED_BYTES_TOTAL}{{table_id=\"77\"}} 300")));
}
