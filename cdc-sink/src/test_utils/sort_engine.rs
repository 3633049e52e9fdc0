use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::bail;
use crate::engine::{EventIterator, SortEngine};
use crate::error::{ErrorKind, SinkResult};
use crate::types::{PolymorphicEvent, Position, TableId};

/// Failures injected by [`TestSortEngineWrapper`].
#[derive(Debug, Clone, Default)]
pub struct SortEngineFaults {
    /// Fails every read once this many events were yielded across all cursors.
    pub fail_after_events: Option<u64>,
    /// Fails every cursor close.
    pub fail_on_close: bool,
}

#[derive(Debug, Default)]
struct Counters {
    next_calls: AtomicU64,
    events_read: AtomicU64,
    closes: AtomicU64,
    fetches: Mutex<Vec<(TableId, Position, Position)>>,
}

/// Test wrapper for [`SortEngine`] implementations that counts cursor activity.
///
/// Every fetch range, read and close is recorded so tests can assert how a worker used the
/// engine, and [`SortEngineFaults`] turns reads or closes into errors.
#[derive(Debug, Clone)]
pub struct TestSortEngineWrapper<E> {
    wrapped_engine: E,
    faults: SortEngineFaults,
    counters: Arc<Counters>,
}

impl<E> TestSortEngineWrapper<E> {
    /// Wraps `engine` without injecting failures.
    pub fn wrap(engine: E) -> Self {
        Self::wrap_with_faults(engine, SortEngineFaults::default())
    }

    /// Wraps `engine` and injects `faults`.
    pub fn wrap_with_faults(engine: E, faults: SortEngineFaults) -> Self {
        Self {
            wrapped_engine: engine,
            faults,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Returns the wrapped engine.
    pub fn inner(&self) -> &E {
        &self.wrapped_engine
    }

    /// Returns every `(table_id, lower, upper)` range fetched so far.
    pub fn fetches(&self) -> Vec<(TableId, Position, Position)> {
        self.counters
            .fetches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns how many times `next` was called on any cursor, exhausting calls included.
    pub fn next_calls(&self) -> u64 {
        self.counters.next_calls.load(Ordering::SeqCst)
    }

    /// Returns how many events were yielded by all cursors.
    pub fn events_read(&self) -> u64 {
        self.counters.events_read.load(Ordering::SeqCst)
    }

    /// Returns how many cursors were closed.
    pub fn closes(&self) -> u64 {
        self.counters.closes.load(Ordering::SeqCst)
    }
}

impl<E> SortEngine for TestSortEngineWrapper<E>
where
    E: SortEngine,
{
    type Iterator = TestEventIterator<E::Iterator>;

    fn fetch_by_table(
        &self,
        table_id: TableId,
        lower: Position,
        upper: Position,
    ) -> Self::Iterator {
        self.counters
            .fetches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((table_id, lower, upper));

        TestEventIterator {
            wrapped_iterator: self.wrapped_engine.fetch_by_table(table_id, lower, upper),
            faults: self.faults.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// Cursor returned by [`TestSortEngineWrapper::fetch_by_table`].
#[derive(Debug)]
pub struct TestEventIterator<I> {
    wrapped_iterator: I,
    faults: SortEngineFaults,
    counters: Arc<Counters>,
}

impl<I> EventIterator for TestEventIterator<I>
where
    I: EventIterator,
{
    async fn next(&mut self) -> SinkResult<Option<(PolymorphicEvent, Position)>> {
        self.counters.next_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(limit) = self.faults.fail_after_events
            && self.counters.events_read.load(Ordering::SeqCst) >= limit
        {
            bail!(
                ErrorKind::SortEngineFetchFailed,
                "Injected sort engine read failure",
                "Reads fail after {} events",
                limit
            );
        }

        let result = self.wrapped_iterator.next().await?;
        if result.is_some() {
            self.counters.events_read.fetch_add(1, Ordering::SeqCst);
        }

        Ok(result)
    }

    async fn close(self) -> SinkResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.wrapped_iterator.close().await?;

        if self.faults.fail_on_close {
            bail!(
                ErrorKind::SortEngineCloseFailed,
                "Injected sort engine close failure"
            );
        }

        Ok(())
    }
}
