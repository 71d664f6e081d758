//! Two-level table diff: identity-anchored sections, id-keyed rows
use crate::config::DiffConfig;
use crate::errors::{Side, TableError};
use crate::types::*;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Range;

/// Rows of one section keyed by id, in display order.
type RowsById<'a> = IndexMap<&'a str, &'a Row>;

/// Computes the patch that turns `old` into `new` with the default config.
pub fn diff(old: &Table, new: &Table) -> Result<Patch, TableError> {
    DiffEngine::new(old, new, &DiffConfig::default()).run()
}

pub fn diff_with_config(old: &Table, new: &Table, config: &DiffConfig) -> Result<Patch, TableError> {
    DiffEngine::new(old, new, config).run()
}

/// Old/new section correspondence before any row is looked at.
#[derive(Debug, Default)]
struct Matching {
    pairs: Vec<(usize, usize)>,
    deleted: BTreeSet<usize>,
    added: BTreeSet<usize>,
}

/// Outcome for one matched pair whose sections differ.
enum PairDiff {
    Rows(RowChanges),
    Reload(&'static str),
}

pub struct DiffEngine<'a> {
    old: &'a Table,
    new: &'a Table,
    config: &'a DiffConfig,
}

impl<'a> DiffEngine<'a> {
    pub fn new(old: &'a Table, new: &'a Table, config: &'a DiffConfig) -> Self {
        DiffEngine { old, new, config }
    }

    pub fn run(self) -> Result<Patch, TableError> {
        let old_rows = index_sections(self.old, Side::Old)?;
        let new_rows = index_sections(self.new, Side::New)?;

        let anchors = self.anchor_sections();
        let matching = self.match_sections(&anchors, &new_rows);
        let mut patch = self.build_patch(&matching, &old_rows, &new_rows);

        if let Some(index) = section_overlap(&patch) {
            log::debug!(
                "DiffEngine: section index {} is both added and removed, pairing by position",
                index
            );
            patch = self.build_patch(&self.match_by_position(), &old_rows, &new_rows);
        }

        log::debug!(
            "DiffEngine: {} old / {} new sections, {} anchored -> {}",
            self.old.section_count(),
            self.new.section_count(),
            anchors.len(),
            patch
        );
        Ok(patch)
    }

    /// Pairs sections whose row-id sequences are identical, keeping only the
    /// largest set of pairs that does not cross (sections cannot move).
    fn anchor_sections(&self) -> Vec<(usize, usize)> {
        let mut old_by_key: HashMap<Vec<&str>, VecDeque<usize>> = HashMap::new();
        for (i, section) in self.old.sections().iter().enumerate() {
            old_by_key.entry(section.ids().collect()).or_default().push_back(i);
        }

        let mut candidates = Vec::new();
        for (n, section) in self.new.sections().iter().enumerate() {
            let key: Vec<&str> = section.ids().collect();
            if let Some(o) = old_by_key.get_mut(&key).and_then(VecDeque::pop_front) {
                candidates.push((o, n));
            }
        }
        candidates.sort_unstable();

        let new_positions: Vec<usize> = candidates.iter().map(|&(_, n)| n).collect();
        longest_increasing_subsequence(&new_positions)
            .into_iter()
            .map(|i| candidates[i])
            .collect()
    }

    /// Walks the gaps around the anchors and pairs up what is left in each
    /// gap. Matched pairs come out in order, anchors included.
    fn match_sections(&self, anchors: &[(usize, usize)], new_rows: &[RowsById<'_>]) -> Matching {
        let mut matching = Matching::default();
        let (mut o, mut n) = (0, 0);

        for &(anchor_old, anchor_new) in anchors {
            self.fill_gap(o..anchor_old, n..anchor_new, new_rows, &mut matching);
            log::trace!("DiffEngine: section {} anchored to {}", anchor_old, anchor_new);
            matching.pairs.push((anchor_old, anchor_new));
            o = anchor_old + 1;
            n = anchor_new + 1;
        }
        self.fill_gap(
            o..self.old.section_count(),
            n..self.new.section_count(),
            new_rows,
            &mut matching,
        );

        matching
    }

    /// Inside a gap, an old section first pairs with the earliest remaining
    /// new section that shares a row id with it. Sections between those pairs
    /// fall back to positional pairing.
    fn fill_gap(
        &self,
        old_gap: Range<usize>,
        new_gap: Range<usize>,
        new_rows: &[RowsById<'_>],
        matching: &mut Matching,
    ) {
        let mut sections_by_row: HashMap<&str, Vec<usize>> = HashMap::new();
        for n in new_gap.clone() {
            for &id in new_rows[n].keys() {
                sections_by_row.entry(id).or_default().push(n);
            }
        }

        let (mut o, mut n) = (old_gap.start, new_gap.start);
        for candidate in old_gap.clone() {
            let partner = self.old.sections()[candidate]
                .ids()
                .filter_map(|id| sections_by_row.get(id))
                .filter_map(|sections| sections.get(sections.partition_point(|&s| s < n)).copied())
                .min();
            if let Some(partner) = partner {
                pair_by_position(o..candidate, n..partner, matching);
                log::trace!("DiffEngine: section {} shares rows with {}", candidate, partner);
                matching.pairs.push((candidate, partner));
                o = candidate + 1;
                n = partner + 1;
            }
        }
        pair_by_position(o..old_gap.end, n..new_gap.end, matching);
    }

    /// Old section `k` against new section `k`; the longer tail is deleted or
    /// added. Section indices of the resulting patch never overlap.
    fn match_by_position(&self) -> Matching {
        let mut matching = Matching::default();
        pair_by_position(
            0..self.old.section_count(),
            0..self.new.section_count(),
            &mut matching,
        );
        matching
    }

    fn build_patch(&self, matching: &Matching, old_rows: &[RowsById<'_>], new_rows: &[RowsById<'_>]) -> Patch {
        let mut patch = Patch::default();
        patch.sections.deleted = matching.deleted.clone();
        for &n in &matching.added {
            patch.sections.added.insert(n, self.new.sections()[n].clone());
        }

        let mut edited = Vec::new();
        for &(o, n) in &matching.pairs {
            match self.diff_section_pair(o, n, &old_rows[o], &new_rows[n]) {
                None => {}
                Some(PairDiff::Reload(reason)) => {
                    log::trace!("DiffEngine: reloading section {} ({})", o, reason);
                    patch.sections.updated.insert(o, self.new.sections()[n].clone());
                }
                Some(PairDiff::Rows(rows)) => edited.push((o, n, rows)),
            }
        }

        // A row insert may not share its (section, row) value with any row
        // delete or reload, even one from another pair.
        let old_coords: BTreeSet<RowIndex> = edited
            .iter()
            .flat_map(|(_, _, rows)| rows.deleted.iter().chain(rows.updated.keys()).copied())
            .collect();
        for (o, n, rows) in edited {
            if let Some(coord) = rows.added.keys().find(|c| old_coords.contains(*c)) {
                log::trace!("DiffEngine: reloading section {} (row index {} collides)", o, coord);
                patch.sections.updated.insert(o, self.new.sections()[n].clone());
            } else {
                patch.rows.added.extend(rows.added);
                patch.rows.updated.extend(rows.updated);
                patch.rows.deleted.extend(rows.deleted);
            }
        }
        patch
    }

    /// Row-level diff of one matched pair, or a whole-section reload when the
    /// row edits cannot (or should not) express the change. `None` when the
    /// sections are equal.
    fn diff_section_pair(
        &self,
        o: usize,
        n: usize,
        old_rows: &RowsById<'_>,
        new_rows: &RowsById<'_>,
    ) -> Option<PairDiff> {
        let old = &self.old.sections()[o];
        let new = &self.new.sections()[n];
        if old == new {
            return None;
        }

        let mut rows = RowChanges::default();
        let mut last_shared: Option<usize> = None;
        let mut shared = 0;
        let mut reordered = false;

        for (i, (_, &old_row)) in old_rows.iter().enumerate() {
            match new_rows.get_full(old_row.id.as_str()) {
                Some((j, _, &new_row)) => {
                    shared += 1;
                    if last_shared.is_some_and(|prev| j < prev) {
                        reordered = true;
                    }
                    last_shared = Some(j);
                    if new_row != old_row {
                        rows.updated.insert(RowIndex::new(o, i), new_row.clone());
                    }
                }
                None => {
                    rows.deleted.insert(RowIndex::new(o, i));
                }
            }
        }
        for (j, (id, &new_row)) in new_rows.iter().enumerate() {
            if !old_rows.contains_key(id) {
                rows.added.insert(RowIndex::new(n, j), new_row.clone());
            }
        }

        let outcome = if reordered {
            PairDiff::Reload("rows reordered")
        } else if shared == 0 && !old.is_empty() && !new.is_empty() {
            PairDiff::Reload("no shared rows")
        } else if self.exceeds_reload_ratio(old.len(), &rows) {
            PairDiff::Reload("change ratio exceeded")
        } else {
            PairDiff::Rows(rows)
        };
        Some(outcome)
    }

    fn exceeds_reload_ratio(&self, old_len: usize, rows: &RowChanges) -> bool {
        let touched = old_len + rows.added.len();
        if touched == 0 {
            return false;
        }
        rows.len() as f64 / touched as f64 > self.config.section_reload_ratio
    }
}

/// Leftover old sections become deletes, leftover new sections inserts.
fn pair_by_position(old_gap: Range<usize>, new_gap: Range<usize>, matching: &mut Matching) {
    let paired = old_gap.len().min(new_gap.len());
    for k in 0..paired {
        log::trace!(
            "DiffEngine: section {} paired with {} by position",
            old_gap.start + k,
            new_gap.start + k
        );
        matching.pairs.push((old_gap.start + k, new_gap.start + k));
    }
    matching.deleted.extend(old_gap.start + paired..old_gap.end);
    matching.added.extend(new_gap.start + paired..new_gap.end);
}

/// First added section index that is also deleted or reloaded.
fn section_overlap(patch: &Patch) -> Option<usize> {
    patch
        .sections
        .added
        .keys()
        .find(|&&index| patch.sections.deleted.contains(&index) || patch.sections.updated.contains_key(&index))
        .copied()
}

/// Builds the id index of every section, failing on the first duplicate id.
fn index_sections(table: &Table, side: Side) -> Result<Vec<RowsById<'_>>, TableError> {
    table
        .sections()
        .iter()
        .enumerate()
        .map(|(section_idx, section)| {
            let mut by_id = IndexMap::with_capacity(section.len());
            for row in section.rows() {
                if by_id.insert(row.id.as_str(), row).is_some() {
                    return Err(TableError::AmbiguousRowId {
                        side,
                        section: section_idx,
                        id: row.id.clone(),
                    });
                }
            }
            Ok(by_id)
        })
        .collect()
}

/// O(n log n) strictly increasing subsequence. Returns positions into `seq`.
fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    if seq.is_empty() {
        return Vec::new();
    }

    let mut predecessors = vec![0; seq.len()];
    let mut tails = vec![0; seq.len()];
    let mut length = 0;

    for (i, &value) in seq.iter().enumerate() {
        let mut low = 0;
        let mut high = length;
        while low < high {
            let mid = low + (high - low) / 2;
            if seq[tails[mid]] < value {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        if low > 0 {
            predecessors[i] = tails[low - 1];
        }
        tails[low] = i;
        if low == length {
            length += 1;
        }
    }

    let mut lis = Vec::with_capacity(length);
    let mut k = tails[length - 1];
    for _ in 0..length {
        lis.push(k);
        k = predecessors[k];
    }
    lis.reverse();
    lis
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};

    fn ri(section: usize, row: usize) -> RowIndex {
        RowIndex::new(section, row)
    }

    #[test]
    fn removing_outer_sections_reports_section_deletes_only() {
        let old = Table::from_ids(&[&["1", "2"], &["3", "4", "5"], &["6", "7"]]);
        let new = Table::from_ids(&[&["3", "4", "5"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.deleted, BTreeSet::from([0, 2]));
        assert!(patch.sections.added.is_empty());
        assert!(patch.sections.updated.is_empty());
        assert!(patch.rows.is_empty());
    }

    #[test]
    fn swapped_row_is_a_delete_and_an_insert() {
        let old = Table::from_ids(&[&["1", "2", "3"]]);
        let new = Table::from_ids(&[&["1", "3", "4"]]);

        let patch = diff(&old, &new).unwrap();
        assert!(patch.sections.is_empty());
        assert_eq!(patch.rows.deleted, BTreeSet::from([ri(0, 1)]));
        assert_eq!(
            patch.rows.added,
            BTreeMap::from([(ri(0, 2), Row::new("4", DEFAULT_ROW_HEIGHT))])
        );
        assert!(patch.rows.updated.is_empty());
    }

    #[test]
    fn height_change_is_a_row_update() {
        let old = Table::from_ids(&[&["1", "2"], &["3"]]);
        let new = Table::new(vec![
            Section::new(vec![Row::new("1", 44.0), Row::new("2", 60.0)]),
            Section::new(vec![Row::new("3", 44.0)]),
        ]);

        let patch = diff(&old, &new).unwrap();
        assert!(patch.sections.is_empty());
        assert_eq!(patch.rows.updated, BTreeMap::from([(ri(0, 1), Row::new("2", 60.0))]));
        assert!(patch.rows.added.is_empty());
        assert!(patch.rows.deleted.is_empty());
    }

    #[test]
    fn identical_tables_give_an_empty_patch() {
        let table = Table::from_ids(&[&["1", "2"], &[], &["3"]]);
        assert!(diff(&table, &table.clone()).unwrap().is_empty());
        assert!(diff(&Table::default(), &Table::default()).unwrap().is_empty());
    }

    #[test]
    fn empty_old_table_adds_every_section() {
        let new = Table::from_ids(&[&["1"], &["2", "3"]]);
        let patch = diff(&Table::default(), &new).unwrap();
        assert_eq!(patch.sections.added_keys(), BTreeSet::from([0, 1]));
        assert!(patch.rows.is_empty());
    }

    #[test]
    fn empty_new_table_deletes_every_section() {
        let old = Table::from_ids(&[&["1"], &["2", "3"]]);
        let patch = diff(&old, &Table::default()).unwrap();
        assert_eq!(patch.sections.deleted, BTreeSet::from([0, 1]));
        assert!(patch.rows.is_empty());
    }

    #[test]
    fn emptied_section_keeps_the_section_and_deletes_rows() {
        let old = Table::from_ids(&[&["1", "2"]]);
        let new = Table::from_ids(&[&[]]);

        let patch = diff(&old, &new).unwrap();
        assert!(patch.sections.is_empty());
        assert_eq!(patch.rows.deleted, BTreeSet::from([ri(0, 0), ri(0, 1)]));
    }

    #[test]
    fn reordered_rows_reload_the_section() {
        let old = Table::from_ids(&[&["1", "2", "3"], &["4"]]);
        let new = Table::from_ids(&[&["3", "1", "2"], &["4"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.updated_keys(), BTreeSet::from([0]));
        assert!(patch.rows.is_empty());
    }

    #[test]
    fn sections_without_shared_rows_reload() {
        let old = Table::from_ids(&[&["1", "2"]]);
        let new = Table::from_ids(&[&["3", "4"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.updated_keys(), BTreeSet::from([0]));
        assert!(patch.rows.is_empty());
    }

    #[test]
    fn reload_ratio_switches_to_section_reload() {
        let old = Table::from_ids(&[&["1", "2", "3", "4"]]);
        let new = Table::from_ids(&[&["5", "6", "1", "2"]]);

        let row_level = diff(&old, &new).unwrap();
        assert!(row_level.sections.is_empty());
        assert_eq!(row_level.rows.len(), 4);

        let config = DiffConfig {
            section_reload_ratio: 0.5,
            ..DiffConfig::default()
        };
        let coarse = diff_with_config(&old, &new, &config).unwrap();
        assert_eq!(coarse.sections.updated_keys(), BTreeSet::from([0]));
        assert!(coarse.rows.is_empty());
    }

    #[test]
    fn crossing_sections_become_delete_and_insert() {
        let old = Table::from_ids(&[&["a"], &["b"]]);
        let new = Table::from_ids(&[&["b"], &["a"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.deleted, BTreeSet::from([0]));
        assert_eq!(patch.sections.added_keys(), BTreeSet::from([1]));
        assert!(patch.sections.updated.is_empty());
    }

    #[test]
    fn inserted_section_between_anchors() {
        let old = Table::from_ids(&[&["1"], &["3"]]);
        let new = Table::from_ids(&[&["1"], &["2"], &["3"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.added_keys(), BTreeSet::from([1]));
        assert!(patch.sections.deleted.is_empty());
        assert!(patch.rows.is_empty());
    }

    #[test]
    fn row_edits_use_old_and_new_section_indices() {
        let old = Table::from_ids(&[&["0"], &["1", "2"]]);
        let new = Table::from_ids(&[&["1", "2", "3"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.deleted, BTreeSet::from([0]));
        // old section 1 and new section 0 are the same section
        assert_eq!(patch.rows.added_keys(), BTreeSet::from([ri(0, 2)]));
    }

    #[test]
    fn gap_pairing_prefers_sections_sharing_rows() {
        let old = Table::from_ids(&[&["1"]]);
        let new = Table::from_ids(&[&["2"], &["1", "3"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.added_keys(), BTreeSet::from([0]));
        assert_eq!(patch.rows.added_keys(), BTreeSet::from([ri(1, 1)]));
        assert!(patch.sections.deleted.is_empty());
        assert!(patch.sections.updated.is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let old = Table::from_ids(&[&["1"], &["2", "2"]]);
        let err = diff(&old, &Table::default()).unwrap_err();
        match err {
            TableError::AmbiguousRowId { side, section, id } => {
                assert_eq!(side, Side::Old);
                assert_eq!(section, 1);
                assert_eq!(id, "2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_ids_in_new_table_are_rejected() {
        let old = Table::from_ids(&[&["1"]]);
        let new = Table::from_ids(&[&["1", "3", "1"]]);
        let err = diff(&old, &new).unwrap_err();
        assert!(matches!(
            err,
            TableError::AmbiguousRowId {
                side: Side::New,
                section: 0,
                ..
            }
        ));
    }

    #[test]
    fn replaced_row_at_same_index_reloads_the_section() {
        let old = Table::from_ids(&[&["1", "2", "3"]]);
        let new = Table::from_ids(&[&["1", "4", "3"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.updated_keys(), BTreeSet::from([0]));
        assert!(patch.rows.is_empty());
        assert_eq!(old.apply(&patch).unwrap(), new);
    }

    #[test]
    fn insert_over_an_updated_row_index_reloads_the_section() {
        let old = Table::from_ids(&[&["1", "2"]]);
        let new = Table::new(vec![Section::new(vec![
            Row::new("1", 44.0),
            Row::new("3", 44.0),
            Row::new("2", 60.0),
        ])]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.updated_keys(), BTreeSet::from([0]));
        assert!(patch.rows.is_empty());
    }

    #[test]
    fn row_insert_colliding_with_another_pairs_delete_reloads_the_inserter() {
        let old = Table::from_ids(&[&["z"], &["a", "b"], &["c", "d"]]);
        let new = Table::from_ids(&[&["a"], &["c", "f"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.deleted, BTreeSet::from([0]));
        assert_eq!(patch.sections.updated_keys(), BTreeSet::from([2]));
        assert_eq!(patch.rows.deleted, BTreeSet::from([ri(1, 1)]));
        assert!(patch.rows.added.is_empty());
        assert_eq!(old.apply(&patch).unwrap(), new);
    }

    #[test]
    fn overlapping_section_indices_fall_back_to_positional_pairing() {
        let old = Table::from_ids(&[&["a"], &["b"], &["c"]]);
        let new = Table::from_ids(&[&["c"], &["y"], &["z"]]);

        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.updated_keys(), BTreeSet::from([0, 1, 2]));
        assert!(patch.sections.added.is_empty());
        assert!(patch.sections.deleted.is_empty());
        assert!(patch.rows.is_empty());
        assert_eq!(old.apply(&patch).unwrap(), new);
    }

    #[test]
    fn nan_height_still_equals_itself() {
        let table = Table::new(vec![Section::new(vec![Row::new("1", f64::NAN)])]);
        assert!(diff(&table, &table.clone()).unwrap().is_empty());

        let finite = Table::from_ids(&[&["1"]]);
        let patch = diff(&table, &finite).unwrap();
        assert_eq!(patch.rows.updated_keys(), BTreeSet::from([ri(0, 0)]));
    }

    #[test]
    fn same_id_in_different_sections_is_fine() {
        let old = Table::from_ids(&[&["1"], &["1"]]);
        let new = Table::from_ids(&[&["1"]]);
        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch.sections.deleted, BTreeSet::from([1]));
    }

    #[test]
    fn diff_is_deterministic() {
        let old = Table::from_ids(&[&["1", "2"], &["3"], &[], &["4", "5"]]);
        let new = Table::from_ids(&[&[], &["5", "4"], &["1"], &["3", "6"]]);
        let first = diff(&old, &new).unwrap();
        for _ in 0..8 {
            assert_eq!(diff(&old, &new).unwrap(), first);
        }
    }

    #[test]
    fn lis_picks_longest_run() {
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[3, 0, 1, 4, 2]), vec![1, 2, 4]);
        assert_eq!(longest_increasing_subsequence(&[2, 1, 0]).len(), 1);
    }
}
