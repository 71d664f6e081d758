//! Patch application: one ordered view batch plus the matching snapshot fold
use crate::errors::{IndexTarget, TableError};
use crate::types::*;
use crate::view::TableView;
use std::collections::{BTreeMap, BTreeSet};

/// Applies `patch` to `view` and returns the snapshot the view now shows.
///
/// The patch is validated and folded into `snapshot` before the first view
/// call, so a rejected patch leaves both the view and the snapshot untouched.
/// An empty patch makes no view calls at all.
pub fn apply<V>(patch: Patch, view: &mut V, snapshot: &Table) -> Result<Table, TableError>
where
    V: TableView + ?Sized,
{
    if patch.is_empty() {
        return Ok(snapshot.clone());
    }

    let summary = patch.to_string();
    let batch = Batch::new(&patch);
    let table = fold_owned(patch, snapshot).inspect_err(|err| {
        log::warn!("PatchApplier: rejected patch ({}): {}", summary, err);
    })?;

    batch.issue(view);
    log::debug!(
        "PatchApplier: applied {} ({} -> {} sections)",
        summary,
        snapshot.section_count(),
        table.section_count()
    );
    Ok(table)
}

/// Folds `patch` into `snapshot` without any view.
pub fn fold(patch: &Patch, snapshot: &Table) -> Result<Table, TableError> {
    fold_owned(patch.clone(), snapshot)
}

/// Index sets for the six view calls, in the order they are issued.
struct Batch {
    delete_sections: BTreeSet<usize>,
    reload_sections: BTreeSet<usize>,
    insert_sections: BTreeSet<usize>,
    delete_rows: BTreeSet<RowIndex>,
    reload_rows: BTreeSet<RowIndex>,
    insert_rows: BTreeSet<RowIndex>,
}

impl Batch {
    fn new(patch: &Patch) -> Self {
        Batch {
            delete_sections: patch.sections.deleted.clone(),
            reload_sections: patch.sections.updated_keys(),
            insert_sections: patch.sections.added_keys(),
            delete_rows: patch.rows.deleted.clone(),
            reload_rows: patch.rows.updated_keys(),
            insert_rows: patch.rows.added_keys(),
        }
    }

    // Section edits go first so that no row coordinate points into a section
    // that is still about to be removed or inserted.
    fn issue<V: TableView + ?Sized>(&self, view: &mut V) {
        view.begin_updates();
        if !self.delete_sections.is_empty() {
            view.delete_sections(&self.delete_sections);
        }
        if !self.reload_sections.is_empty() {
            view.reload_sections(&self.reload_sections);
        }
        if !self.insert_sections.is_empty() {
            view.insert_sections(&self.insert_sections);
        }
        if !self.delete_rows.is_empty() {
            view.delete_rows(&self.delete_rows);
        }
        if !self.reload_rows.is_empty() {
            view.reload_rows(&self.reload_rows);
        }
        if !self.insert_rows.is_empty() {
            view.insert_rows(&self.insert_rows);
        }
        view.end_updates();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Kept(usize),
    Reloaded(usize),
    Inserted,
}

struct Slot {
    origin: Origin,
    section: Section,
}

/// Row edits aimed at one surviving section.
#[derive(Default)]
struct RowEdits {
    deleted: BTreeSet<usize>,
    updated: BTreeMap<usize, Row>,
    added: BTreeMap<usize, Row>,
}

fn fold_owned(patch: Patch, snapshot: &Table) -> Result<Table, TableError> {
    let Patch { sections, rows } = patch;
    let old_len = snapshot.section_count();

    for &index in &sections.deleted {
        if index >= old_len {
            return Err(TableError::out_of_range(IndexTarget::Section, index, old_len));
        }
    }
    for &index in sections.updated.keys() {
        if index >= old_len {
            return Err(TableError::out_of_range(IndexTarget::Section, index, old_len));
        }
        if sections.deleted.contains(&index) {
            return Err(TableError::malformed(format!(
                "section {index} is both updated and deleted"
            )));
        }
    }
    // Disjoint by value, although `added` is read in post-batch indices.
    for &index in sections.added.keys() {
        if sections.deleted.contains(&index) || sections.updated.contains_key(&index) {
            return Err(TableError::malformed(format!(
                "section {index} is both added and deleted or updated"
            )));
        }
    }
    let new_len = old_len - sections.deleted.len() + sections.added.len();
    if let Some(&index) = sections.added.keys().next_back() {
        if index >= new_len {
            return Err(TableError::out_of_range(IndexTarget::InsertedSection, index, new_len));
        }
    }

    let mut reloads = sections.updated;
    let mut slots = Vec::with_capacity(new_len);
    for (index, section) in snapshot.sections().iter().enumerate() {
        if sections.deleted.contains(&index) {
            continue;
        }
        let slot = match reloads.remove(&index) {
            Some(section) => Slot {
                origin: Origin::Reloaded(index),
                section,
            },
            None => Slot {
                origin: Origin::Kept(index),
                section: section.clone(),
            },
        };
        slots.push(slot);
    }
    // Ascending, distinct and below new_len, so every position is reachable.
    for (index, section) in sections.added {
        slots.insert(
            index,
            Slot {
                origin: Origin::Inserted,
                section,
            },
        );
    }

    let mut edits = collect_row_edits(rows, snapshot, &sections.deleted, &slots)?;
    for (new_index, slot) in slots.iter_mut().enumerate() {
        if let Origin::Kept(old_index) = slot.origin {
            if let Some(section_edits) = edits.remove(&old_index) {
                let section = std::mem::take(&mut slot.section);
                slot.section = apply_row_edits(section, section_edits, new_index)?;
            }
        }
    }

    Ok(slots.into_iter().map(|slot| slot.section).collect())
}

/// Validates row coordinates and groups them by the old index of the section
/// they edit.
fn collect_row_edits(
    rows: RowChanges,
    snapshot: &Table,
    deleted_sections: &BTreeSet<usize>,
    slots: &[Slot],
) -> Result<BTreeMap<usize, RowEdits>, TableError> {
    let reloaded: BTreeSet<usize> = slots
        .iter()
        .filter_map(|slot| match slot.origin {
            Origin::Reloaded(index) => Some(index),
            _ => None,
        })
        .collect();
    let check_old = |coord: RowIndex| -> Result<(), TableError> {
        let Some(section) = snapshot.section(coord.section) else {
            return Err(TableError::out_of_range(
                IndexTarget::Row,
                coord,
                snapshot.section_count(),
            ));
        };
        if deleted_sections.contains(&coord.section) {
            return Err(TableError::malformed(format!(
                "row {coord} lies in deleted section {}",
                coord.section
            )));
        }
        if reloaded.contains(&coord.section) {
            return Err(TableError::malformed(format!(
                "row {coord} lies in reloaded section {}",
                coord.section
            )));
        }
        if coord.row >= section.len() {
            return Err(TableError::out_of_range(IndexTarget::Row, coord, section.len()));
        }
        Ok(())
    };

    if let Some(coord) = rows
        .added
        .keys()
        .find(|&coord| rows.deleted.contains(coord) || rows.updated.contains_key(coord))
    {
        return Err(TableError::malformed(format!(
            "row {coord} is both added and deleted or updated"
        )));
    }

    let mut edits: BTreeMap<usize, RowEdits> = BTreeMap::new();
    for coord in rows.deleted {
        check_old(coord)?;
        if rows.updated.contains_key(&coord) {
            return Err(TableError::malformed(format!(
                "row {coord} is both updated and deleted"
            )));
        }
        edits.entry(coord.section).or_default().deleted.insert(coord.row);
    }
    for (coord, row) in rows.updated {
        check_old(coord)?;
        edits.entry(coord.section).or_default().updated.insert(coord.row, row);
    }
    for (coord, row) in rows.added {
        let Some(slot) = slots.get(coord.section) else {
            return Err(TableError::out_of_range(
                IndexTarget::InsertedRow,
                coord,
                slots.len(),
            ));
        };
        let Origin::Kept(old_index) = slot.origin else {
            return Err(TableError::malformed(format!(
                "row {coord} is inserted into a section that is itself inserted or reloaded"
            )));
        };
        edits.entry(old_index).or_default().added.insert(coord.row, row);
    }
    Ok(edits)
}

fn apply_row_edits(section: Section, edits: RowEdits, new_index: usize) -> Result<Section, TableError> {
    let RowEdits {
        deleted,
        mut updated,
        added,
    } = edits;

    let mut rows: Vec<Row> = section
        .into_rows()
        .into_iter()
        .enumerate()
        .filter(|(row, _)| !deleted.contains(row))
        .map(|(row, current)| updated.remove(&row).unwrap_or(current))
        .collect();

    for (row, inserted) in added {
        if row > rows.len() {
            return Err(TableError::out_of_range(
                IndexTarget::InsertedRow,
                RowIndex::new(new_index, row),
                rows.len(),
            ));
        }
        rows.insert(row, inserted);
    }
    Ok(Section::new(rows))
}
