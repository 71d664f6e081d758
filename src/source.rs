//! Reconciliation controller: owns the current snapshot and serializes updates
use crate::applier;
use crate::config::DiffConfig;
use crate::diff_engine::diff_with_config;
use crate::errors::TableError;
use crate::types::{Patch, Row, RowIndex, Table};
use crate::view::{DataSource, TableView};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Cloneable handle for queueing tables onto a [`TableSource`].
///
/// Any thread may push; only the owner of the source applies, in FIFO order,
/// on its next `set_table` or `flush`.
#[derive(Clone)]
pub struct TableUpdates {
    queue: Arc<Mutex<VecDeque<Table>>>,
    max_pending: Option<usize>,
}

impl TableUpdates {
    fn new(max_pending: Option<usize>) -> Self {
        TableUpdates {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_pending,
        }
    }

    pub fn push(&self, table: Table) -> Result<(), TableError> {
        let mut queue = self.lock();
        if let Some(max) = self.max_pending {
            if queue.len() >= max {
                log::warn!("TableUpdates: queue full ({} pending), rejecting table", queue.len());
                return Err(TableError::ConcurrentApplyRejected {
                    pending: queue.len(),
                });
            }
        }
        queue.push_back(table);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn pop(&self) -> Option<Table> {
        self.lock().pop_front()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Table>> {
        // A panicking pusher cannot leave the deque half-written.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct TableSource {
    id: Uuid,
    table: Table,
    config: DiffConfig,
    updates: TableUpdates,
    revision: u64,
}

impl TableSource {
    pub fn new(table: Table) -> Self {
        Self::build(table, DiffConfig::default())
    }

    pub fn with_config(table: Table, config: DiffConfig) -> Result<Self, TableError> {
        config.validate()?;
        Ok(Self::build(table, config))
    }

    fn build(table: Table, config: DiffConfig) -> Self {
        TableSource {
            id: Uuid::new_v4(),
            table,
            updates: TableUpdates::new(config.max_pending),
            config,
            revision: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The snapshot the view currently shows.
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Number of non-empty patches applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn updates(&self) -> TableUpdates {
        self.updates.clone()
    }

    /// Diff of the held snapshot against `new`, without applying it.
    pub fn diff_to(&self, new: &Table) -> Result<Patch, TableError> {
        diff_with_config(&self.table, new, &self.config)
    }

    /// Queues `table` behind anything already pending, then drains the queue
    /// into `view`. Returns how many tables were reconciled.
    pub fn set_table<V>(&mut self, table: Table, view: &mut V) -> Result<usize, TableError>
    where
        V: TableView + ?Sized,
    {
        self.updates.push(table)?;
        self.flush(view)
    }

    /// Reconciles every queued table in order. Stops at the first failure;
    /// the failed table is dropped and later ones stay queued.
    pub fn flush<V>(&mut self, view: &mut V) -> Result<usize, TableError>
    where
        V: TableView + ?Sized,
    {
        let mut applied = 0;
        while self.apply_next(view)? {
            applied += 1;
        }
        Ok(applied)
    }

    /// Reconciles the oldest queued table, if there is one.
    pub fn apply_next<V>(&mut self, view: &mut V) -> Result<bool, TableError>
    where
        V: TableView + ?Sized,
    {
        match self.updates.pop() {
            Some(next) => {
                self.reconcile(next, view)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Applies a hand-built patch against the held snapshot.
    pub fn apply_patch<V>(&mut self, patch: Patch, view: &mut V) -> Result<(), TableError>
    where
        V: TableView + ?Sized,
    {
        self.commit(patch, view).map(|_| ())
    }

    fn reconcile<V>(&mut self, next: Table, view: &mut V) -> Result<(), TableError>
    where
        V: TableView + ?Sized,
    {
        let patch = self.diff_to(&next).inspect_err(|err| {
            log::warn!("TableSource {}: diff failed: {}", self.id, err);
        })?;
        let table = self.commit(patch, view)?;
        debug_assert_eq!(table, &next, "folded snapshot diverged from the target table");
        Ok(())
    }

    fn commit<V>(&mut self, patch: Patch, view: &mut V) -> Result<&Table, TableError>
    where
        V: TableView + ?Sized,
    {
        if patch.is_empty() {
            log::debug!("TableSource {}: nothing to apply at revision {}", self.id, self.revision);
            return Ok(&self.table);
        }
        self.table = applier::apply(patch, view, &self.table)?;
        self.revision += 1;
        log::debug!(
            "TableSource {}: now at revision {} with {} sections",
            self.id,
            self.revision,
            self.table.section_count()
        );
        Ok(&self.table)
    }
}

impl DataSource for TableSource {
    fn section_count(&self) -> usize {
        self.table.section_count()
    }

    fn row_count(&self, section: usize) -> Option<usize> {
        self.table.row_count(section)
    }

    fn row_at(&self, coord: RowIndex) -> Option<&Row> {
        self.table.row_at(coord)
    }
}
