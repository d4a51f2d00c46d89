use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use curriculum_storage::{
    Aggregate, AggregateStore, Filter, RemoteError, RemoteRow, RemoteStore, SqliteRemote, Subscription, Table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
    SaveAggregate,
    DeleteAggregate,
}

struct Fault {
    op: Op,
    table: Table,
    error: RemoteError,
    /// `None` fails every matching call.
    remaining: Option<usize>,
}

/// Pauses one remote call until the test releases it.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
}

impl Gate {
    /// Wait until the held call has reached the remote.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// A [`SqliteRemote`] wrapper that records calls and injects failures.
pub struct FaultyRemote {
    inner: Arc<SqliteRemote>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<(Op, Table)>>,
    holds: Mutex<Vec<(Op, Table, Arc<Gate>)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl FaultyRemote {
    pub fn new(inner: Arc<SqliteRemote>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            holds: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &Arc<SqliteRemote> {
        &self.inner
    }

    /// Fail the next `times` calls of `op` on `table`.
    pub fn fail(&self, op: Op, table: Table, error: RemoteError, times: usize) {
        lock(&self.faults).push(Fault {
            op,
            table,
            error,
            remaining: Some(times),
        });
    }

    /// Fail every call of `op` on `table` until cleared.
    pub fn fail_always(&self, op: Op, table: Table, error: RemoteError) {
        lock(&self.faults).push(Fault {
            op,
            table,
            error,
            remaining: None,
        });
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Hold the next call of `op` on `table` until the returned gate is released.
    pub fn hold(&self, op: Op, table: Table) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        lock(&self.holds).push((op, table, gate.clone()));
        gate
    }

    pub fn calls(&self) -> Vec<(Op, Table)> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: Op, table: Table) -> usize {
        lock(&self.calls).iter().filter(|c| **c == (op, table)).count()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    async fn intercept(&self, op: Op, table: Table) -> Result<(), RemoteError> {
        lock(&self.calls).push((op, table));

        let gate = {
            let mut holds = lock(&self.holds);
            holds
                .iter()
                .position(|(o, t, _)| (*o, *t) == (op, table))
                .map(|index| holds.remove(index).2)
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.released.notified().await;
        }

        let mut faults = lock(&self.faults);
        let Some(index) = faults.iter().position(|f| f.op == op && f.table == table) else {
            return Ok(());
        };
        let fault = &mut faults[index];
        let error = fault.error.clone();
        let exhausted = match fault.remaining.as_mut() {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if exhausted {
            faults.remove(index);
        }
        debug!(?op, %table, %error, "injected remote failure");
        Err(error)
    }
}

#[async_trait]
impl RemoteStore for FaultyRemote {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<RemoteRow>, RemoteError> {
        self.intercept(Op::Select, table).await?;
        self.inner.select(table, filter).await
    }

    async fn insert(&self, table: Table, rows: &[RemoteRow]) -> Result<(), RemoteError> {
        self.intercept(Op::Insert, table).await?;
        self.inner.insert(table, rows).await
    }

    async fn upsert(&self, table: Table, rows: &[RemoteRow]) -> Result<(), RemoteError> {
        self.intercept(Op::Upsert, table).await?;
        self.inner.upsert(table, rows).await
    }

    async fn update(&self, table: Table, patch: &RemoteRow, filter: &Filter) -> Result<u64, RemoteError> {
        self.intercept(Op::Update, table).await?;
        self.inner.update(table, patch, filter).await
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, RemoteError> {
        self.intercept(Op::Delete, table).await?;
        self.inner.delete(table, filter).await
    }

    fn subscribe(&self, tables: &[Table]) -> Subscription {
        self.inner.subscribe(tables)
    }
}

#[async_trait]
impl AggregateStore for FaultyRemote {
    async fn save_aggregate_atomically(&self, aggregate: &Aggregate) -> Result<String, RemoteError> {
        self.intercept(Op::SaveAggregate, aggregate.table).await?;
        self.inner.save_aggregate_atomically(aggregate).await
    }

    async fn delete_aggregate(
        &self,
        table: Table,
        child_table: Table,
        parent_column: &'static str,
        id: &str,
    ) -> Result<(), RemoteError> {
        self.intercept(Op::DeleteAggregate, table).await?;
        self.inner.delete_aggregate(table, child_table, parent_column, id).await
    }
}
