//! Python module entry point
use crate::config::DiffConfig;
use crate::converters::{config_from_py, patch_to_py, table_from_py, table_to_py};
use crate::diff_engine::diff_with_config;
use crate::source::{TableSource, TableUpdates};
use crate::types::RowIndex;
use crate::view::{DataSource, RecordingView, TableView, ViewOp};
use pyo3::prelude::*;
use pyo3::types::PyList;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

/// Forwards batched edits to a Python object exposing the `TableView` method
/// names. Row coordinates cross over as `(section, row)` tuples.
///
/// The first Python exception is kept and raised once the batch is closed;
/// later edits of the same batch are skipped.
struct PyTableView<'py> {
    view: Bound<'py, PyAny>,
    error: Option<PyErr>,
}

impl<'py> PyTableView<'py> {
    fn new(view: Bound<'py, PyAny>) -> Self {
        PyTableView { view, error: None }
    }

    fn record(&mut self, method: &str, result: PyResult<Bound<'py, PyAny>>) {
        if let Err(err) = result {
            log::error!("TableSource: view.{}() raised: {}", method, err);
            if self.error.is_none() {
                self.error = Some(err);
            }
        }
    }

    fn call0(&mut self, method: &str) {
        let result = self.view.call_method0(method);
        self.record(method, result);
    }

    fn call_sections(&mut self, method: &str, indices: &BTreeSet<usize>) {
        if self.error.is_some() {
            return;
        }
        let result = PyList::new(self.view.py(), indices.iter().copied())
            .and_then(|list| self.view.call_method1(method, (list,)));
        self.record(method, result);
    }

    fn call_rows(&mut self, method: &str, coords: &BTreeSet<RowIndex>) {
        if self.error.is_some() {
            return;
        }
        let result = PyList::new(self.view.py(), coords.iter().map(|c| (c.section, c.row)))
            .and_then(|list| self.view.call_method1(method, (list,)));
        self.record(method, result);
    }

    /// Plays a recorded batch onto the Python view.
    fn replay(mut self, ops: &[ViewOp]) -> PyResult<()> {
        for op in ops {
            match op {
                ViewOp::BeginUpdates => self.begin_updates(),
                ViewOp::EndUpdates => self.end_updates(),
                ViewOp::InsertSections(indices) => self.insert_sections(indices),
                ViewOp::ReloadSections(indices) => self.reload_sections(indices),
                ViewOp::DeleteSections(indices) => self.delete_sections(indices),
                ViewOp::InsertRows(coords) => self.insert_rows(coords),
                ViewOp::ReloadRows(coords) => self.reload_rows(coords),
                ViewOp::DeleteRows(coords) => self.delete_rows(coords),
            }
        }
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl TableView for PyTableView<'_> {
    fn begin_updates(&mut self) {
        self.call0("begin_updates");
    }

    fn end_updates(&mut self) {
        // Always closes the batch, even after a failed edit.
        self.call0("end_updates");
    }

    fn insert_sections(&mut self, indices: &BTreeSet<usize>) {
        self.call_sections("insert_sections", indices);
    }

    fn reload_sections(&mut self, indices: &BTreeSet<usize>) {
        self.call_sections("reload_sections", indices);
    }

    fn delete_sections(&mut self, indices: &BTreeSet<usize>) {
        self.call_sections("delete_sections", indices);
    }

    fn insert_rows(&mut self, coords: &BTreeSet<RowIndex>) {
        self.call_rows("insert_rows", coords);
    }

    fn reload_rows(&mut self, coords: &BTreeSet<RowIndex>) {
        self.call_rows("reload_rows", coords);
    }

    fn delete_rows(&mut self, coords: &BTreeSet<RowIndex>) {
        self.call_rows("delete_rows", coords);
    }
}

/// Bound to the thread that created it, like the view it drives.
///
/// Each batch is computed against a `RecordingView` and only replayed onto the
/// Python view after the snapshot has been swapped, so view callbacks may read
/// `row_count`/`row_at` and see the post-batch table. A `set_table` issued from
/// inside a callback is queued and applied once the running batch is done.
#[pyclass(name = "TableSource", unsendable)]
pub struct PyTableSource {
    inner: RefCell<TableSource>,
    updates: TableUpdates,
    in_flight: Cell<bool>,
}

impl PyTableSource {
    fn drain(&self, view: &Bound<'_, PyAny>) -> PyResult<usize> {
        let mut applied = 0;
        loop {
            let mut recorder = RecordingView::new();
            if !self.inner.borrow_mut().apply_next(&mut recorder)? {
                return Ok(applied);
            }
            applied += 1;
            PyTableView::new(view.clone()).replay(recorder.ops())?;
        }
    }
}

#[pymethods]
impl PyTableSource {
    #[new]
    #[pyo3(signature = (table, config=None))]
    fn new(py: Python<'_>, table: &Bound<'_, PyAny>, config: Option<&Bound<'_, PyAny>>) -> PyResult<Self> {
        let table = table_from_py(py, table)?;
        let config = match config {
            Some(config) => config_from_py(py, config)?,
            None => DiffConfig::default(),
        };
        let source = TableSource::with_config(table, config)?;
        log::info!(
            "TableSource {}: initialized with {} sections",
            source.id(),
            source.section_count()
        );
        Ok(PyTableSource {
            updates: source.updates(),
            inner: RefCell::new(source),
            in_flight: Cell::new(false),
        })
    }

    /// Reconciles `view` to `table`; returns how many queued tables were
    /// applied by this call (0 when it was queued behind a running batch).
    fn set_table(&self, py: Python<'_>, table: &Bound<'_, PyAny>, view: &Bound<'_, PyAny>) -> PyResult<usize> {
        let table = table_from_py(py, table)?;
        self.updates.push(table)?;
        if self.in_flight.get() {
            log::debug!("TableSource: batch in flight, {} tables queued", self.updates.len());
            return Ok(0);
        }
        self.flush(view)
    }

    /// Applies everything queued so far.
    fn flush(&self, view: &Bound<'_, PyAny>) -> PyResult<usize> {
        if self.in_flight.replace(true) {
            return Ok(0);
        }
        let result = self.drain(view);
        self.in_flight.set(false);
        result
    }

    fn diff<'py>(&self, py: Python<'py>, table: &Bound<'py, PyAny>) -> PyResult<Bound<'py, PyAny>> {
        let table = table_from_py(py, table)?;
        let patch = self.inner.borrow().diff_to(&table)?;
        patch_to_py(py, &patch)
    }

    fn table<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        table_to_py(py, self.inner.borrow().table())
    }

    fn revision(&self) -> u64 {
        self.inner.borrow().revision()
    }

    fn pending(&self) -> usize {
        self.updates.len()
    }

    fn section_count(&self) -> usize {
        self.inner.borrow().section_count()
    }

    fn row_count(&self, section: usize) -> Option<usize> {
        self.inner.borrow().row_count(section)
    }

    /// `(id, height)` of the row at `(section, row)`, or `None`.
    fn row_at(&self, section: usize, row: usize) -> Option<(String, f64)> {
        self.inner
            .borrow()
            .row_at(RowIndex::new(section, row))
            .map(|r| (r.id.clone(), r.height))
    }
}

/// Patch between two tables as a plain dict.
#[pyfunction(name = "diff")]
#[pyo3(signature = (old, new, config=None))]
fn py_diff<'py>(
    py: Python<'py>,
    old: &Bound<'py, PyAny>,
    new: &Bound<'py, PyAny>,
    config: Option<&Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyAny>> {
    let old = table_from_py(py, old)?;
    let new = table_from_py(py, new)?;
    let config = match config {
        Some(config) => config_from_py(py, config)?,
        None => DiffConfig::default(),
    };
    let patch = diff_with_config(&old, &new, &config)?;
    patch_to_py(py, &patch)
}

#[pymodule]
fn table_reconciler(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTableSource>()?;
    m.add_function(wrap_pyfunction!(py_diff, m)?)?;
    Ok(())
}
