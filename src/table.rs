//! The project table: one row per sequence or tree node.
//!
//! # Columns
//! Every table has the same eight columns, in this order:
//! `uid`, `description`, `id`, `label`, `sequence`, `type`, `parent`,
//! `branch_length`. Only `uid` is required; every other cell may be empty.
//!
//! # Merging
//! Tree results are folded into an existing table with [`Table::combine`],
//! keyed on `uid`:
//! ```text
//! current:  A(seq)  B(seq)  C(seq)
//! tree:     A(leaf) B(leaf) C(leaf) n1(node) r(root)
//! result:   A(seq+leaf) B(seq+leaf) C(seq+leaf) n1 r
//! ```

use crate::error::{ProjectError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Column names in declared order.
pub const COLUMNS: [&str; 8] = [
    "uid",
    "description",
    "id",
    "label",
    "sequence",
    "type",
    "parent",
    "branch_length",
];

/// Kind of row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Root,
    #[serde(alias = "internal")]
    Node,
    Leaf,
    /// Alternative ancestral sequence attached to a reconstructed node
    Altall,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Root => "root",
            NodeType::Node => "node",
            NodeType::Leaf => "leaf",
            NodeType::Altall => "altall",
        }
    }

    /// Root, internal node or leaf: rows that are part of the tree topology.
    pub fn is_tree_node(self) -> bool {
        !matches!(self, NodeType::Altall)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "root" => Ok(NodeType::Root),
            "node" | "internal" => Ok(NodeType::Node),
            "leaf" => Ok(NodeType::Leaf),
            "altall" => Ok(NodeType::Altall),
            other => Err(format!("unknown node type '{other}'")),
        }
    }
}

/// Typed name of one of the eight columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Uid,
    Description,
    Id,
    Label,
    Sequence,
    Type,
    Parent,
    BranchLength,
}

impl Column {
    pub const ALL: [Column; 8] = [
        Column::Uid,
        Column::Description,
        Column::Id,
        Column::Label,
        Column::Sequence,
        Column::Type,
        Column::Parent,
        Column::BranchLength,
    ];

    pub fn name(self) -> &'static str {
        COLUMNS[self as usize]
    }

    /// Parse a column name, failing with `UnknownColumn` outside the fixed set.
    pub fn parse(name: &str) -> Result<Self> {
        Column::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| ProjectError::UnknownColumn(name.to_string()))
    }
}

/// One table row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    pub uid: String,
    pub description: Option<String>,
    pub id: Option<String>,
    pub label: Option<String>,
    pub sequence: Option<String>,
    #[serde(rename = "type")]
    pub node_type: Option<NodeType>,
    pub parent: Option<String>,
    pub branch_length: Option<f64>,
}

impl Record {
    pub fn new(uid: impl Into<String>) -> Self {
        Record {
            uid: uid.into(),
            ..Default::default()
        }
    }

    /// Render one cell as text.
    pub fn get(&self, column: Column) -> Option<String> {
        match column {
            Column::Uid => Some(self.uid.clone()),
            Column::Description => self.description.clone(),
            Column::Id => self.id.clone(),
            Column::Label => self.label.clone(),
            Column::Sequence => self.sequence.clone(),
            Column::Type => self.node_type.map(|t| t.as_str().to_string()),
            Column::Parent => self.parent.clone(),
            Column::BranchLength => self.branch_length.map(|b| b.to_string()),
        }
    }

    /// Write one cell from text. `uid` cannot be cleared.
    pub fn set(&mut self, column: Column, value: Option<String>) -> Result<()> {
        match column {
            Column::Uid => {
                self.uid = value.ok_or_else(|| {
                    ProjectError::invalid_option("uid", "uid cannot be empty")
                })?
            }
            Column::Description => self.description = value,
            Column::Id => self.id = value,
            Column::Label => self.label = value,
            Column::Sequence => self.sequence = value,
            Column::Type => {
                self.node_type = value
                    .map(|v| v.parse::<NodeType>())
                    .transpose()
                    .map_err(|e| ProjectError::invalid_option("type", e))?
            }
            Column::Parent => self.parent = value,
            Column::BranchLength => {
                self.branch_length = value
                    .map(|v| v.trim().parse::<f64>())
                    .transpose()
                    .map_err(|e| ProjectError::invalid_option("branch_length", e.to_string()))?
            }
        }
        Ok(())
    }

    /// Take every non-null field of `other`; keep our value where `other` is null.
    fn fill_from(&mut self, other: &Record) {
        fn take<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }
        take(&mut self.description, &other.description);
        take(&mut self.id, &other.id);
        take(&mut self.label, &other.label);
        take(&mut self.sequence, &other.sequence);
        take(&mut self.node_type, &other.node_type);
        take(&mut self.parent, &other.parent);
        take(&mut self.branch_length, &other.branch_length);
    }

    pub fn is_type(&self, node_type: NodeType) -> bool {
        self.node_type == Some(node_type)
    }
}

/// The in-memory table of sequence and tree records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    rows: Vec<Record>,
}

impl Table {
    /// An empty table with the declared columns.
    pub fn new() -> Self {
        Table { rows: Vec::new() }
    }

    pub fn from_records(rows: Vec<Record>) -> Self {
        Table { rows }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.rows
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.rows
    }

    pub fn into_records(self) -> Vec<Record> {
        self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter()
    }

    pub fn push(&mut self, record: Record) {
        self.rows.push(record);
    }

    pub fn retain(&mut self, keep: impl FnMut(&Record) -> bool) {
        self.rows.retain(keep);
    }

    pub fn get(&self, uid: &str) -> Option<&Record> {
        self.rows.iter().find(|r| r.uid == uid)
    }

    pub fn count_type(&self, node_type: NodeType) -> usize {
        self.rows.iter().filter(|r| r.is_type(node_type)).count()
    }

    /// Fail with `DuplicateIdentifier` on the first repeated uid.
    pub fn check_unique_uids(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.rows.len());
        for row in &self.rows {
            if !seen.insert(row.uid.as_str()) {
                return Err(ProjectError::DuplicateIdentifier {
                    uid: row.uid.clone(),
                });
            }
        }
        Ok(())
    }

    /// `(name, sequence)` pairs for every row with a non-empty sequence.
    ///
    /// The name comes from `name_column`, falling back to `uid` when that
    /// cell is empty.
    pub fn alignment(&self, name_column: Column, sequence_column: Column) -> Vec<(String, String)> {
        self.rows
            .iter()
            .filter_map(|row| {
                let sequence = row.get(sequence_column).filter(|s| !s.is_empty())?;
                let name = row
                    .get(name_column)
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| row.uid.clone());
                Some((name, sequence))
            })
            .collect()
    }

    /// Merge `other` into a copy of this table, keyed on `uid`.
    ///
    /// Rows of `self` keep their order. A row whose uid matches a row of
    /// `other` takes every non-null field of that row. Rows of `other`
    /// without a match are appended in their original order.
    pub fn combine(&self, other: &Table) -> Result<Table> {
        self.check_unique_uids()?;
        other.check_unique_uids()?;

        let other_index: HashMap<&str, usize> = other
            .rows
            .iter()
            .enumerate()
            .map(|(idx, row)| (row.uid.as_str(), idx))
            .collect();

        let mut used = vec![false; other.rows.len()];
        let mut rows = Vec::with_capacity(self.rows.len() + other.rows.len());

        for row in &self.rows {
            let mut merged = row.clone();
            if let Some(&idx) = other_index.get(row.uid.as_str()) {
                merged.fill_from(&other.rows[idx]);
                used[idx] = true;
            }
            rows.push(merged);
        }

        rows.extend(
            other
                .rows
                .iter()
                .zip(used)
                .filter(|(_, used)| !used)
                .map(|(row, _)| row.clone()),
        );

        Ok(Table { rows })
    }
}

impl FromIterator<Record> for Table {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Table {
            rows: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(uid: &str, sequence: &str) -> Record {
        Record {
            id: Some(uid.to_string()),
            sequence: Some(sequence.to_string()),
            description: Some(format!("{uid} description")),
            ..Record::new(uid)
        }
    }

    fn leaf(uid: &str, parent: &str, length: f64) -> Record {
        Record {
            id: Some(uid.to_string()),
            node_type: Some(NodeType::Leaf),
            parent: Some(parent.to_string()),
            branch_length: Some(length),
            ..Record::new(uid)
        }
    }

    #[test]
    fn test_new_table_has_declared_columns() {
        let table = Table::new();
        assert!(table.is_empty());
        assert_eq!(
            table.columns(),
            &["uid", "description", "id", "label", "sequence", "type", "parent", "branch_length"]
        );
    }

    #[test]
    fn test_column_parse() {
        assert_eq!(Column::parse("branch_length").unwrap(), Column::BranchLength);
        assert_eq!(Column::parse("uid").unwrap().name(), "uid");
        assert!(matches!(
            Column::parse("taxon"),
            Err(ProjectError::UnknownColumn(name)) if name == "taxon"
        ));
    }

    #[test]
    fn test_record_get_set() {
        let mut record = Record::new("A");
        record.set(Column::Type, Some("internal".into())).unwrap();
        record.set(Column::BranchLength, Some("0.25".into())).unwrap();
        assert_eq!(record.node_type, Some(NodeType::Node));
        assert_eq!(record.get(Column::BranchLength).as_deref(), Some("0.25"));
        assert!(record.set(Column::BranchLength, Some("long".into())).is_err());
        assert!(record.set(Column::Uid, None).is_err());
    }

    #[test]
    fn test_combine_fills_tree_fields_and_appends_new_rows() {
        let current = Table::from_records(vec![seq("A", "MKV"), seq("B", "MKI"), seq("X", "MKL")]);
        let tree = Table::from_records(vec![
            Record {
                node_type: Some(NodeType::Root),
                ..Record::new("r")
            },
            leaf("A", "r", 0.1),
            leaf("B", "r", 0.2),
        ]);

        let merged = current.combine(&tree).unwrap();
        assert_eq!(merged.len(), 4);

        let a = merged.get("A").unwrap();
        assert_eq!(a.sequence.as_deref(), Some("MKV"));
        assert_eq!(a.description.as_deref(), Some("A description"));
        assert_eq!(a.node_type, Some(NodeType::Leaf));
        assert_eq!(a.parent.as_deref(), Some("r"));
        assert_eq!(a.branch_length, Some(0.1));

        // Unmatched rows are preserved unchanged
        assert_eq!(merged.get("X").unwrap(), &seq("X", "MKL"));

        // Existing rows first, then unmatched tree rows
        let uids: Vec<&str> = merged.iter().map(|r| r.uid.as_str()).collect();
        assert_eq!(uids, ["A", "B", "X", "r"]);
    }

    #[test]
    fn test_combine_rejects_duplicate_uids() {
        let current = Table::from_records(vec![seq("A", "MK"), seq("A", "MV")]);
        let err = current.combine(&Table::new()).unwrap_err();
        assert!(matches!(err, ProjectError::DuplicateIdentifier { uid } if uid == "A"));
    }

    #[test]
    fn test_alignment_falls_back_to_uid() {
        let mut anonymous = seq("u1", "MKV");
        anonymous.id = None;
        let mut empty = seq("u2", "");
        empty.id = Some("named".into());
        let table = Table::from_records(vec![seq("A", "MKI"), anonymous, empty, Record::new("n1")]);

        let alignment = table.alignment(Column::Id, Column::Sequence);
        assert_eq!(
            alignment,
            vec![("A".to_string(), "MKI".to_string()), ("u1".to_string(), "MKV".to_string())]
        );
    }
}
