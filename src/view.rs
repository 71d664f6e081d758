//! Capability sets exchanged with the rendering surface
use crate::types::{Row, RowIndex, Table};
use serde::Serialize;
use std::collections::BTreeSet;

/// Batched structural edits a stateful table widget must support.
///
/// Deletes and reloads are addressed in pre-batch coordinates, inserts in
/// post-batch coordinates. Every index argument is an unordered set; the
/// widget reconciles index shifts inside one batch on its own.
pub trait TableView {
    fn begin_updates(&mut self);
    fn end_updates(&mut self);

    fn insert_sections(&mut self, indices: &BTreeSet<usize>);
    fn reload_sections(&mut self, indices: &BTreeSet<usize>);
    fn delete_sections(&mut self, indices: &BTreeSet<usize>);

    fn insert_rows(&mut self, coords: &BTreeSet<RowIndex>);
    fn reload_rows(&mut self, coords: &BTreeSet<RowIndex>);
    fn delete_rows(&mut self, coords: &BTreeSet<RowIndex>);
}

/// Read side the rendering surface calls back into.
pub trait DataSource {
    fn section_count(&self) -> usize;
    fn row_count(&self, section: usize) -> Option<usize>;
    fn row_at(&self, coord: RowIndex) -> Option<&Row>;
}

impl DataSource for Table {
    fn section_count(&self) -> usize {
        Table::section_count(self)
    }

    fn row_count(&self, section: usize) -> Option<usize> {
        Table::row_count(self, section)
    }

    fn row_at(&self, coord: RowIndex) -> Option<&Row> {
        Table::row_at(self, coord)
    }
}

/// One call received by a [`TableView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "indices", rename_all = "snake_case")]
pub enum ViewOp {
    BeginUpdates,
    EndUpdates,
    InsertSections(BTreeSet<usize>),
    ReloadSections(BTreeSet<usize>),
    DeleteSections(BTreeSet<usize>),
    InsertRows(BTreeSet<RowIndex>),
    ReloadRows(BTreeSet<RowIndex>),
    DeleteRows(BTreeSet<RowIndex>),
}

/// A view that only remembers what it was told, in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingView {
    ops: Vec<ViewOp>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[ViewOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<ViewOp> {
        std::mem::take(&mut self.ops)
    }
}

impl TableView for RecordingView {
    fn begin_updates(&mut self) {
        self.ops.push(ViewOp::BeginUpdates);
    }

    fn end_updates(&mut self) {
        self.ops.push(ViewOp::EndUpdates);
    }

    fn insert_sections(&mut self, indices: &BTreeSet<usize>) {
        self.ops.push(ViewOp::InsertSections(indices.clone()));
    }

    fn reload_sections(&mut self, indices: &BTreeSet<usize>) {
        self.ops.push(ViewOp::ReloadSections(indices.clone()));
    }

    fn delete_sections(&mut self, indices: &BTreeSet<usize>) {
        self.ops.push(ViewOp::DeleteSections(indices.clone()));
    }

    fn insert_rows(&mut self, coords: &BTreeSet<RowIndex>) {
        self.ops.push(ViewOp::InsertRows(coords.clone()));
    }

    fn reload_rows(&mut self, coords: &BTreeSet<RowIndex>) {
        self.ops.push(ViewOp::ReloadRows(coords.clone()));
    }

    fn delete_rows(&mut self, coords: &BTreeSet<RowIndex>) {
        self.ops.push(ViewOp::DeleteRows(coords.clone()));
    }
}
