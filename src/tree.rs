//! Conversion between Newick trees and table rows.
//!
//! Parsed trees become one row per node in preorder (root first). Every row
//! gets a freshly generated uid; the `parent` column holds the parent's uid
//! and `branch_length` the length of the edge leading into the node.
//!
//! ```text
//!        r            uid  type  parent  id
//!       / \           r    root  -       -
//!      A   n1         A    leaf  r       A
//!          / \        n1   node  r       -
//!         B   C       B    leaf  n1      B
//!                     C    leaf  n1      C
//! ```

use crate::error::{ProjectError, Result};
use crate::table::{NodeType, Record, Table};
use itertools::Itertools;
use phylotree::tree::Tree as PhyloTree;
use rand::Rng;
use std::collections::HashMap;

const UID_LENGTH: usize = 10;
const UID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A random 10-character alphanumeric uid.
pub fn random_uid() -> String {
    let mut rng = rand::thread_rng();
    (0..UID_LENGTH)
        .map(|_| UID_ALPHABET[rng.gen_range(0..UID_ALPHABET.len())] as char)
        .collect()
}

/// Parse a Newick string into table rows.
pub fn newick_to_table(newick: &str) -> Result<Table> {
    let tree = PhyloTree::from_newick(newick)
        .map_err(|e| ProjectError::invalid_tree(format!("could not parse Newick: {e}")))?;
    tree_to_table(&tree)
}

/// Flatten a parsed tree into rows, preorder from the root.
pub fn tree_to_table(tree: &PhyloTree) -> Result<Table> {
    let root_id = tree
        .get_root()
        .map_err(|e| ProjectError::invalid_tree(e.to_string()))?;

    let mut rows = Vec::new();
    // (node id, parent uid)
    let mut stack: Vec<(usize, Option<String>)> = vec![(root_id, None)];

    while let Some((node_id, parent_uid)) = stack.pop() {
        let node = tree
            .get(&node_id)
            .map_err(|e| ProjectError::invalid_tree(e.to_string()))?;
        let name = node.name.clone().filter(|n| !n.is_empty());

        let mut record = Record::new(random_uid());
        record.parent = parent_uid;
        record.branch_length = node.parent_edge;
        if node.children.is_empty() {
            record.node_type = Some(NodeType::Leaf);
            record.id = name;
        } else {
            record.node_type = Some(if node_id == root_id {
                NodeType::Root
            } else {
                NodeType::Node
            });
            record.label = name;
        }

        // Reverse so the leftmost child is visited first
        for &child_id in node.children.iter().rev() {
            stack.push((child_id, Some(record.uid.clone())));
        }
        rows.push(record);
    }

    Ok(Table::from_records(rows))
}

/// Overwrite the uid of every leaf row with its display id.
///
/// Leaves of a freshly parsed tree carry generated uids; this aligns them
/// with the sequence rows they were computed from. Leaves without an id keep
/// their uid.
pub fn realign_leaf_ids(table: &mut Table) {
    for row in table.records_mut() {
        if row.is_type(NodeType::Leaf) {
            if let Some(id) = row.id.clone() {
                row.uid = id;
            }
        }
    }
}

/// Topology view over the tree rows of a table.
pub struct TableTree<'a> {
    rows: HashMap<&'a str, &'a Record>,
    children: HashMap<&'a str, Vec<&'a str>>,
    root: &'a str,
}

impl<'a> TableTree<'a> {
    /// Index the `root`/`node`/`leaf` rows of `table`.
    ///
    /// The root is the row typed `root`, or else the only tree row without a
    /// parent.
    pub fn new(table: &'a Table) -> Result<Self> {
        let tree_rows: Vec<&'a Record> = table
            .iter()
            .filter(|r| r.node_type.is_some_and(NodeType::is_tree_node))
            .collect();
        if tree_rows.is_empty() {
            return Err(ProjectError::invalid_tree("table contains no tree nodes"));
        }

        let rows: HashMap<&'a str, &'a Record> = tree_rows
            .iter()
            .copied()
            .map(|r| (r.uid.as_str(), r))
            .collect();

        let root: &'a str = match tree_rows
            .iter()
            .copied()
            .filter(|r| r.is_type(NodeType::Root))
            .at_most_one()
        {
            Ok(Some(root)) => root.uid.as_str(),
            Ok(None) => {
                let orphans: Vec<&'a str> = tree_rows
                    .iter()
                    .copied()
                    .filter(|r| r.parent.as_deref().is_none_or(|p| !rows.contains_key(p)))
                    .map(|r| r.uid.as_str())
                    .collect();
                match orphans.as_slice() {
                    [single] => *single,
                    _ => {
                        return Err(ProjectError::invalid_tree(format!(
                            "expected one root, found {} parentless nodes",
                            orphans.len()
                        )));
                    }
                }
            }
            Err(_) => return Err(ProjectError::invalid_tree("more than one root row")),
        };

        let mut children: HashMap<&'a str, Vec<&'a str>> = HashMap::new();
        for row in tree_rows.iter().copied() {
            if row.uid == root {
                continue;
            }
            let parent = row.parent.as_deref().ok_or_else(|| {
                ProjectError::invalid_tree(format!("node '{}' has no parent", row.uid))
            })?;
            if !rows.contains_key(parent) {
                return Err(ProjectError::invalid_tree(format!(
                    "node '{}' refers to missing parent '{parent}'",
                    row.uid
                )));
            }
            children.entry(parent).or_default().push(row.uid.as_str());
        }

        Ok(TableTree { rows, children, root })
    }

    pub fn root(&self) -> &'a str {
        self.root
    }

    pub fn record(&self, uid: &str) -> Option<&'a Record> {
        self.rows.get(uid).copied()
    }

    pub fn children(&self, uid: &str) -> &[&'a str] {
        self.children.get(uid).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_leaf(&self, uid: &str) -> bool {
        self.children(uid).is_empty()
    }

    /// Uids in preorder; fails on cycles or nodes unreachable from the root.
    pub fn preorder(&self) -> Result<Vec<&'a str>> {
        let mut order = Vec::with_capacity(self.rows.len());
        let mut stack = vec![self.root];
        while let Some(uid) = stack.pop() {
            if order.len() >= self.rows.len() {
                return Err(ProjectError::invalid_tree("cycle in parent references"));
            }
            order.push(uid);
            stack.extend(self.children(uid).iter().rev());
        }
        if order.len() != self.rows.len() {
            return Err(ProjectError::invalid_tree(format!(
                "{} nodes are not connected to root '{}'",
                self.rows.len() - order.len(),
                self.root
            )));
        }
        Ok(order)
    }

    /// Write the topology as Newick, naming leaves with `leaf_name`.
    ///
    /// Internal labels are omitted; branch lengths are kept where present.
    pub fn to_newick(&self, leaf_name: impl Fn(&Record) -> Option<String>) -> Result<String> {
        self.preorder()?;
        let mut out = String::new();
        self.write_node(self.root, &leaf_name, &mut out)?;
        out.push(';');
        Ok(out)
    }

    fn write_node(
        &self,
        uid: &str,
        leaf_name: &impl Fn(&Record) -> Option<String>,
        out: &mut String,
    ) -> Result<()> {
        let record = self.rows[uid];
        let children = self.children(uid);
        if children.is_empty() {
            let name = leaf_name(record).filter(|n| !n.is_empty()).ok_or_else(|| {
                ProjectError::invalid_tree(format!("leaf '{uid}' has no name"))
            })?;
            out.push_str(&name);
        } else {
            out.push('(');
            for (k, child) in children.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                self.write_node(child, leaf_name, out)?;
            }
            out.push(')');
        }
        if uid != self.root {
            if let Some(length) = record.branch_length {
                out.push_str(&format!(":{length}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_uid_shape() {
        let uid = random_uid();
        assert_eq!(uid.len(), 10);
        assert!(uid.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_uid(), random_uid());
    }

    /// ```text
    ///        r
    ///       / \
    ///      A   n1 (0.05)
    ///          / \
    ///         B   C
    /// ```
    #[test]
    fn test_newick_to_table_preorder() {
        let table = newick_to_table("(A:0.1,(B:0.2,C:0.3)90:0.05);").unwrap();
        assert_eq!(table.len(), 5);

        let types: Vec<NodeType> = table.iter().map(|r| r.node_type.unwrap()).collect();
        assert_eq!(
            types,
            [NodeType::Root, NodeType::Leaf, NodeType::Node, NodeType::Leaf, NodeType::Leaf]
        );

        let rows = table.records();
        let root = &rows[0];
        assert!(root.parent.is_none());
        assert_eq!(rows[1].id.as_deref(), Some("A"));
        assert_eq!(rows[1].parent.as_deref(), Some(root.uid.as_str()));
        assert_eq!(rows[1].branch_length, Some(0.1));
        assert_eq!(rows[2].label.as_deref(), Some("90"));
        assert_eq!(rows[2].branch_length, Some(0.05));
        assert_eq!(rows[3].parent.as_deref(), Some(rows[2].uid.as_str()));
        assert_eq!(rows[4].id.as_deref(), Some("C"));
        table.check_unique_uids().unwrap();
    }

    #[test]
    fn test_realign_leaf_ids() {
        let mut table = newick_to_table("(A:0.1,(B:0.2,C:0.3):0.05);").unwrap();
        let internal_before: Vec<String> = table
            .iter()
            .filter(|r| !r.is_type(NodeType::Leaf))
            .map(|r| r.uid.clone())
            .collect();

        realign_leaf_ids(&mut table);

        for row in table.iter().filter(|r| r.is_type(NodeType::Leaf)) {
            assert_eq!(Some(&row.uid), row.id.as_ref());
        }
        let internal_after: Vec<String> = table
            .iter()
            .filter(|r| !r.is_type(NodeType::Leaf))
            .map(|r| r.uid.clone())
            .collect();
        assert_eq!(internal_before, internal_after);
    }

    #[test]
    fn test_table_tree_round_trip_to_newick() {
        let mut table = newick_to_table("(A:0.1,(B:0.2,C:0.3):0.05);").unwrap();
        realign_leaf_ids(&mut table);
        let tree = TableTree::new(&table).unwrap();
        assert_eq!(tree.preorder().unwrap().len(), 5);
        let newick = tree.to_newick(|r| r.id.clone()).unwrap();
        assert_eq!(newick, "(A:0.1,(B:0.2,C:0.3):0.05);");
    }

    #[test]
    fn test_table_tree_ignores_sequence_rows_and_finds_orphan_root() {
        let table = Table::from_records(vec![
            Record {
                sequence: Some("MKV".into()),
                ..Record::new("unplaced")
            },
            Record {
                node_type: Some(NodeType::Node),
                ..Record::new("top")
            },
            Record {
                node_type: Some(NodeType::Leaf),
                parent: Some("top".into()),
                id: Some("A".into()),
                ..Record::new("A")
            },
            Record {
                node_type: Some(NodeType::Leaf),
                parent: Some("top".into()),
                id: Some("B".into()),
                ..Record::new("B")
            },
        ]);
        let tree = TableTree::new(&table).unwrap();
        assert_eq!(tree.root(), "top");
        assert_eq!(tree.children("top"), ["A", "B"]);
        assert_eq!(tree.to_newick(|r| r.id.clone()).unwrap(), "(A,B);");
    }

    #[test]
    fn test_table_tree_rejects_missing_structure() {
        let sequences = Table::from_records(vec![Record::new("A"), Record::new("B")]);
        assert!(matches!(
            TableTree::new(&sequences),
            Err(ProjectError::InvalidTree { .. })
        ));

        let dangling = Table::from_records(vec![
            Record {
                node_type: Some(NodeType::Root),
                ..Record::new("r")
            },
            Record {
                node_type: Some(NodeType::Leaf),
                parent: Some("gone".into()),
                ..Record::new("A")
            },
        ]);
        assert!(TableTree::new(&dangling).is_err());
    }

    #[test]
    fn test_to_newick_requires_leaf_names() {
        let table = newick_to_table("(A,B);").unwrap();
        let tree = TableTree::new(&table).unwrap();
        assert!(tree.to_newick(|r| r.label.clone()).is_err());
    }
}
