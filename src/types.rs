//! Snapshot and patch value types
use crate::errors::TableError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Row height used by [`Table::from_ids`].
pub const DEFAULT_ROW_HEIGHT: f64 = 44.0;

/// A single row: stable identity plus display attributes.
///
/// Heights compare with [`f64::total_cmp`], so a row always equals itself,
/// NaN height included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub height: f64,
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.height.total_cmp(&other.height).is_eq()
    }
}

impl Eq for Row {}

impl Row {
    pub fn new(id: impl Into<String>, height: f64) -> Self {
        Row {
            id: id.into(),
            height,
        }
    }
}

/// Ordered run of rows. Equality is order-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Section {
    rows: Vec<Row>,
}

impl Section {
    pub fn new(rows: Vec<Row>) -> Self {
        Section { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&Row> {
        self.rows.get(row)
    }

    /// Row ids in display order. Two sections with the same id sequence are
    /// treated as the same section by the diff engine.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(|r| r.id.as_str())
    }

    pub(crate) fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl FromIterator<Row> for Section {
    fn from_iter<I: IntoIterator<Item = Row>>(iter: I) -> Self {
        Section::new(iter.into_iter().collect())
    }
}

/// Immutable point-in-time state of the presented table.
///
/// A new snapshot is only ever produced by construction or by folding a
/// [`Patch`] into an existing one; nothing mutates a `Table` in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table {
    sections: Vec<Section>,
}

impl Table {
    pub fn new(sections: Vec<Section>) -> Self {
        Table { sections }
    }

    /// Builds a table from bare row ids, every row at [`DEFAULT_ROW_HEIGHT`].
    pub fn from_ids(sections: &[&[&str]]) -> Self {
        sections
            .iter()
            .map(|ids| {
                ids.iter()
                    .map(|id| Row::new(*id, DEFAULT_ROW_HEIGHT))
                    .collect::<Section>()
            })
            .collect()
    }

    pub fn from_json(json: &str) -> Result<Self, TableError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn row_count(&self, section: usize) -> Option<usize> {
        self.sections.get(section).map(Section::len)
    }

    pub fn row_at(&self, index: RowIndex) -> Option<&Row> {
        self.sections.get(index.section)?.get(index.row)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Folds `patch` into this snapshot without touching any view.
    pub fn apply(&self, patch: &Patch) -> Result<Table, TableError> {
        crate::applier::fold(patch, self)
    }
}

impl FromIterator<Section> for Table {
    fn from_iter<I: IntoIterator<Item = Section>>(iter: I) -> Self {
        Table::new(iter.into_iter().collect())
    }
}

/// `(section, row)` coordinate, meaningful only against one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowIndex {
    pub section: usize,
    pub row: usize,
}

impl RowIndex {
    pub fn new(section: usize, row: usize) -> Self {
        RowIndex { section, row }
    }
}

impl fmt::Display for RowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.section, self.row)
    }
}

/// Added/updated/deleted triad for one level of the table.
///
/// `deleted` and `updated` are keyed by old-snapshot coordinates, `added` by
/// new-snapshot coordinates. Added and updated entries carry the content that
/// ends up in the new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize, V: Serialize",
    deserialize = "K: Deserialize<'de> + Ord, V: Deserialize<'de>"
))]
pub struct Changes<K, V> {
    #[serde(default, with = "entries", skip_serializing_if = "BTreeMap::is_empty")]
    pub added: BTreeMap<K, V>,
    #[serde(default, with = "entries", skip_serializing_if = "BTreeMap::is_empty")]
    pub updated: BTreeMap<K, V>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deleted: BTreeSet<K>,
}

impl<K, V> Default for Changes<K, V> {
    fn default() -> Self {
        Changes {
            added: BTreeMap::new(),
            updated: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Copy, V> Changes<K, V> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    pub fn added_keys(&self) -> BTreeSet<K> {
        self.added.keys().copied().collect()
    }

    pub fn updated_keys(&self) -> BTreeSet<K> {
        self.updated.keys().copied().collect()
    }
}

pub type SectionChanges = Changes<usize, Section>;
pub type RowChanges = Changes<RowIndex, Row>;

/// Structural difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default, skip_serializing_if = "Changes::is_empty")]
    pub sections: SectionChanges,
    #[serde(default, skip_serializing_if = "Changes::is_empty")]
    pub rows: RowChanges,
}

impl Patch {
    /// True when applying the patch is a no-op for both view and snapshot.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.rows.is_empty()
    }

    pub fn to_json(&self) -> Result<String, TableError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TableError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sections +{} ~{} -{}, rows +{} ~{} -{}",
            self.sections.added.len(),
            self.sections.updated.len(),
            self.sections.deleted.len(),
            self.rows.added.len(),
            self.rows.updated.len(),
            self.rows.deleted.len(),
        )
    }
}

/// Keyed maps travel as `[key, value]` pairs so struct keys survive JSON.
mod entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        let pairs = Vec::<(K, V)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn row_equality_covers_id_and_height() {
        assert_eq!(Row::new("a", 44.0), Row::new("a", 44.0));
        assert_ne!(Row::new("a", 44.0), Row::new("a", 60.0));
        assert_ne!(Row::new("a", 44.0), Row::new("b", 44.0));
    }

    #[test]
    fn nan_height_row_equals_itself() {
        let row = Row::new("a", f64::NAN);
        assert_eq!(row, row.clone());
        assert_ne!(row, Row::new("a", 44.0));
    }

    #[test]
    fn section_equality_is_order_sensitive() {
        let ab = Table::from_ids(&[&["a", "b"]]);
        let ba = Table::from_ids(&[&["b", "a"]]);
        assert_ne!(ab.sections()[0], ba.sections()[0]);
    }

    #[test]
    fn lookups_answer_from_the_snapshot() {
        let table = Table::from_ids(&[&["1", "2"], &["3"]]);
        assert_eq!(table.section_count(), 2);
        assert_eq!(table.row_count(0), Some(2));
        assert_eq!(table.row_count(2), None);
        assert_eq!(table.row_at(RowIndex::new(1, 0)).map(|r| r.id.as_str()), Some("3"));
        assert!(table.row_at(RowIndex::new(1, 1)).is_none());
    }

    #[test]
    fn empty_patch_serializes_to_empty_object() {
        assert_eq!(Patch::default().to_json().unwrap(), "{}");
    }

    #[test]
    fn patch_json_keeps_row_keys() {
        let mut patch = Patch::default();
        patch.sections.deleted.insert(2);
        patch.rows.updated.insert(RowIndex::new(0, 1), Row::new("2", 60.0));

        let json = patch.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"sections":{"deleted":[2]},"rows":{"updated":[[{"section":0,"row":1},{"id":"2","height":60.0}]]}}"#
        );
        assert_eq!(Patch::from_json(&json).unwrap(), patch);
    }

    #[test]
    fn table_reads_nested_json() {
        let table = Table::from_json(r#"[[{"id":"1","height":44.0}],[]]"#).unwrap();
        assert_eq!(table.section_count(), 2);
        assert_eq!(table.row_count(1), Some(0));
    }
}
