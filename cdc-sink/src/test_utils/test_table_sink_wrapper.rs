use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Notify, RwLock};

use crate::bail;
use crate::error::{ErrorKind, SinkResult};
use crate::sink::TableSink;
use crate::test_utils::notify::TimedNotify;
use crate::types::{PolymorphicEvent, ResolvedTs, RowChangedEvent, TableId};

/// A successful call made on a [`TestTableSinkWrapper`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSinkCall {
    Emit(Vec<RowChangedEvent>),
    UpdateResolvedTs(ResolvedTs),
}

/// Failures injected by [`TestTableSinkWrapper`].
#[derive(Debug, Clone, Default)]
pub struct TableSinkFaults {
    /// Rejects every verification once this many events were verified.
    pub fail_verify_after: Option<u64>,
    /// Fails every emit.
    pub fail_emit: bool,
}

type CallCondition = Box<dyn Fn(&[TableSinkCall]) -> bool + Send + Sync>;

struct Inner {
    calls: Vec<TableSinkCall>,
    conditions: Vec<(CallCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let calls = &self.calls;
        self.conditions.retain(|(condition, notify)| {
            let should_retain = !condition(calls);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// Test wrapper for [`TableSink`] implementations that records all calls in order.
///
/// The ordered call log lets tests check how emits and resolved timestamp updates interleave,
/// and [`TableSinkFaults`] turns verifications or emits into errors.
#[derive(Clone)]
pub struct TestTableSinkWrapper<T> {
    wrapped_sink: T,
    faults: TableSinkFaults,
    verify_calls: Arc<AtomicU64>,
    inner: Arc<RwLock<Inner>>,
}

impl<T: fmt::Debug> fmt::Debug for TestTableSinkWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestTableSinkWrapper")
            .field("wrapped_sink", &self.wrapped_sink)
            .field("faults", &self.faults)
            .field("verify_calls", &self.verify_calls)
            .finish()
    }
}

impl<T> TestTableSinkWrapper<T> {
    /// Wraps `sink` without injecting failures.
    pub fn wrap(sink: T) -> Self {
        Self::wrap_with_faults(sink, TableSinkFaults::default())
    }

    /// Wraps `sink` and injects `faults`.
    pub fn wrap_with_faults(sink: T, faults: TableSinkFaults) -> Self {
        let inner = Inner {
            calls: Vec::new(),
            conditions: Vec::new(),
        };

        Self {
            wrapped_sink: sink,
            faults,
            verify_calls: Arc::new(AtomicU64::new(0)),
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Returns the wrapped sink.
    pub fn inner(&self) -> &T {
        &self.wrapped_sink
    }

    /// Returns every successful call in the order it happened.
    pub async fn calls(&self) -> Vec<TableSinkCall> {
        self.inner.read().await.calls.clone()
    }

    /// Returns the rows of every successful emit, in order.
    pub async fn emitted_rows(&self) -> Vec<RowChangedEvent> {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                TableSinkCall::Emit(rows) => Some(rows.clone()),
                TableSinkCall::UpdateResolvedTs(_) => None,
            })
            .flatten()
            .collect()
    }

    /// Returns the number of successful emits.
    pub async fn emit_count(&self) -> usize {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter(|call| matches!(call, TableSinkCall::Emit(_)))
            .count()
    }

    /// Returns every resolved timestamp accepted by the sink, in order.
    pub async fn resolved_ts_updates(&self) -> Vec<ResolvedTs> {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                TableSinkCall::UpdateResolvedTs(resolved_ts) => Some(*resolved_ts),
                TableSinkCall::Emit(_) => None,
            })
            .collect()
    }

    /// Returns how many events went through verification.
    pub fn verify_calls(&self) -> u64 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    /// Registers a notification that fires once the call log matches `condition`.
    pub async fn notify_on_calls<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[TableSinkCall]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner.conditions.push((Box::new(condition), notify.clone()));

        // The condition may already hold.
        inner.check_conditions();

        TimedNotify::new(notify)
    }

    /// Registers a notification that fires once `resolved_ts` or a later one is accepted.
    pub async fn wait_for_resolved_ts(&self, resolved_ts: ResolvedTs) -> TimedNotify {
        self.notify_on_calls(move |calls| {
            calls.iter().any(|call| {
                matches!(call, TableSinkCall::UpdateResolvedTs(accepted) if *accepted >= resolved_ts)
            })
        })
        .await
    }

    async fn record_call(&self, call: TableSinkCall) {
        let mut inner = self.inner.write().await;
        inner.calls.push(call);
        inner.check_conditions();
    }
}

impl<T> TableSink for TestTableSinkWrapper<T>
where
    T: TableSink + Send + Sync,
{
    fn table_id(&self) -> TableId {
        self.wrapped_sink.table_id()
    }

    fn verify_and_try_split_event(
        &self,
        event: PolymorphicEvent,
    ) -> SinkResult<Vec<RowChangedEvent>> {
        let verified = self.verify_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(limit) = self.faults.fail_verify_after
            && verified >= limit
        {
            bail!(
                ErrorKind::ValidationError,
                "Injected verification failure",
                "Verification fails after {} events",
                limit
            );
        }

        self.wrapped_sink.verify_and_try_split_event(event)
    }

    async fn emit_row_changed_events(&self, rows: Vec<RowChangedEvent>) -> SinkResult<()> {
        if self.faults.fail_emit {
            bail!(ErrorKind::TableSinkError, "Injected emit failure");
        }

        self.wrapped_sink
            .emit_row_changed_events(rows.clone())
            .await?;
        self.record_call(TableSinkCall::Emit(rows)).await;

        Ok(())
    }

    async fn update_resolved_ts(&self, resolved_ts: ResolvedTs) -> SinkResult<()> {
        self.wrapped_sink.update_resolved_ts(resolved_ts).await?;
        self.record_call(TableSinkCall::UpdateResolvedTs(resolved_ts))
            .await;

        Ok(())
    }
}
