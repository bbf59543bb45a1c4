//! Leaf-set bitsets for matching nodes across two trees by clade.
//!
//! # Overview
//! External tools renumber internal nodes, so the only stable way to find
//! "the same node" in their output is the set of leaves below it. Each
//! internal node is summarised as a [`LeafSet`] with one bit per leaf.
//!
//! # Why taxon NAMES, sorted
//! Node ids differ between our table and a tool's tree. Leaf names do not.
//! Leaves are sorted alphabetically by name so identical taxa always map to
//! the same bit positions in both trees.
//!
//! # Re-rooting
//! A tool may unroot or re-root the tree it was given. A node whose clade is
//! {A,B} in our tree can then show up as the complement {C,D,E}. Matching
//! tries exact clades first and only then complements.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// A compact bitset over leaf indices.
///
/// Stored as `u64` words; each word holds 64 leaf indices.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LeafSet(pub Vec<u64>);

impl LeafSet {
    /// All bits cleared. `words` is `num_leaves.div_ceil(64)`.
    pub fn zeros(words: usize) -> Self {
        LeafSet(vec![0u64; words])
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;
        let bit = idx & 63;
        self.0[word] |= 1u64 << bit;
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        (self.0[idx >> 6] & (1u64 << (idx & 63))) != 0
    }

    /// Union in place.
    #[inline]
    pub fn or_assign(&mut self, other: &LeafSet) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Flip the first `num_leaves` bits, keeping the padding bits clear.
    pub fn complement(&self, num_leaves: usize) -> LeafSet {
        let mut out = LeafSet::zeros(self.0.len());
        for i in 0..num_leaves {
            if !self.contains(i) {
                out.set(i);
            }
        }
        out
    }
}

/// Maps leaf names to bit positions, alphabetically.
#[derive(Debug, Clone)]
pub struct LeafIndex {
    positions: HashMap<String, usize>,
    words: usize,
}

impl LeafIndex {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        let words = names.len().div_ceil(64).max(1);
        let positions = names.into_iter().enumerate().map(|(i, n)| (n, i)).collect();
        LeafIndex { positions, words }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn empty_set(&self) -> LeafSet {
        LeafSet::zeros(self.words)
    }
}

/// Compute the leaf set of every node below `root` via DFS.
///
/// - **Leaf** (no children): a single bit, looked up by `leaf_name`
/// - **Internal**: OR of all child sets
///
/// Fails with the offending leaf key when a leaf is unnamed or its name is
/// not in `index`.
pub fn clade_sets<K, C, N>(
    root: K,
    children: C,
    leaf_name: N,
    index: &LeafIndex,
) -> Result<HashMap<K, LeafSet>, K>
where
    K: Copy + Eq + Hash,
    C: Fn(K) -> Vec<K>,
    N: Fn(K) -> Option<String>,
{
    let mut cache = HashMap::new();
    compute(root, &children, &leaf_name, index, &mut cache)?;
    Ok(cache)
}

fn compute<K, C, N>(
    node: K,
    children: &C,
    leaf_name: &N,
    index: &LeafIndex,
    cache: &mut HashMap<K, LeafSet>,
) -> Result<LeafSet, K>
where
    K: Copy + Eq + Hash,
    C: Fn(K) -> Vec<K>,
    N: Fn(K) -> Option<String>,
{
    if let Some(set) = cache.get(&node) {
        return Ok(set.clone());
    }

    let kids = children(node);
    let mut set = index.empty_set();
    if kids.is_empty() {
        let position = leaf_name(node)
            .and_then(|name| index.position(&name))
            .ok_or(node)?;
        set.set(position);
    } else {
        for child in kids {
            let child_set = compute(child, children, leaf_name, index, cache)?;
            set.or_assign(&child_set);
        }
    }

    cache.insert(node, set.clone());
    Ok(set)
}

/// Pair up nodes of two trees that cover the same leaves.
///
/// Exact clade matches are taken first. Nodes left over are matched through
/// the complement of their clade, provided the partner node was not already
/// claimed by an exact match.
pub fn match_clades<A, B>(
    ours: &HashMap<A, LeafSet>,
    theirs: &HashMap<B, LeafSet>,
    num_leaves: usize,
) -> HashMap<A, B>
where
    A: Copy + Eq + Hash,
    B: Copy + Eq + Hash,
{
    let by_set: HashMap<&LeafSet, B> = theirs.iter().map(|(k, set)| (set, *k)).collect();

    let mut matched = HashMap::with_capacity(ours.len());
    let mut claimed: HashSet<B> = HashSet::new();
    for (node, set) in ours {
        if let Some(&partner) = by_set.get(set) {
            matched.insert(*node, partner);
            claimed.insert(partner);
        }
    }

    for (node, set) in ours {
        if matched.contains_key(node) {
            continue;
        }
        let complement = set.complement(num_leaves);
        if let Some(&partner) = by_set.get(&complement) {
            if claimed.insert(partner) {
                matched.insert(*node, partner);
            }
        }
    }

    matched
}
