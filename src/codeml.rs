//! Marginal ancestral reconstruction with PAML `codeml`.
//!
//! # Run layout
//! ```text
//! <dir>/ancestors/alignment.phy   leaf sequences (relaxed PHYLIP)
//! <dir>/ancestors/tree.newick     the table's tree, leaves named by id column
//! <dir>/ancestors/codeml.ctl      control file
//! <dir>/ancestors/rst             written by codeml, parsed here
//! ```
//!
//! # Reading `rst`
//! Two parts of `rst` are used:
//! - the tree "with node labels for Rod Page's TreeView", which gives PAML's
//!   node numbers (`(1_A, 2_B, (3_C, 4_D) 6 ) 5 ;`),
//! - one "Prob distribution at node N, by site" block per internal node, with
//!   the posterior of every state at every site.
//!
//! PAML renumbers (and may unroot) the tree, so its internal nodes are mapped
//! back onto table rows by clade, see [`crate::clade`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use phylotree::tree::Tree as PhyloTree;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::clade::{LeafIndex, LeafSet, clade_sets, match_clades};
use crate::error::{ProjectError, Result};
use crate::io::write_phylip;
use crate::phyml::run_tool;
use crate::reconstruction::{ReconstructionParams, ReconstructionRequest, Reconstructor};
use crate::table::{Column, NodeType, Record, Table};
use crate::tree::TableTree;

pub const ANCESTORS_DIR: &str = "ancestors";
const ALIGNMENT_FILE: &str = "alignment.phy";
const TREE_FILE: &str = "tree.newick";
const CONTROL_FILE: &str = "codeml.ctl";
const OUTPUT_FILE: &str = "results.txt";
const RST_FILE: &str = "rst";

const TREEVIEW_HEADER: &str = "tree with node labels for Rod Page's TreeView";
const NODE_HEADER: &str = "Prob distribution at node ";

/// Amino-acid marginal reconstruction, branch lengths fixed to the input tree.
const CONTROL_DEFAULTS: &[(&str, &str)] = &[
    ("noisy", "9"),
    ("verbose", "2"),
    ("runmode", "0"),
    ("seqtype", "2"),
    ("clock", "0"),
    ("aaDist", "0"),
    ("model", "3"),
    ("Mgene", "0"),
    ("fix_alpha", "0"),
    ("alpha", "0.5"),
    ("Malpha", "0"),
    ("ncatG", "4"),
    ("getSE", "0"),
    ("RateAncestor", "1"),
    ("Small_Diff", ".5e-6"),
    ("cleandata", "0"),
    ("method", "1"),
    ("fix_blength", "1"),
];

static STATE_PROB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z*\-])\(\s*([0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\)").expect("valid regex")
});

/// Posterior of each state at one site, most likely first.
type SiteDistribution = Vec<(char, f64)>;

/// The parts of a `codeml` rst file used for reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Rst {
    /// Newick with PAML node numbers, whitespace removed
    pub tree: String,
    /// Per internal node number, one distribution per site
    pub nodes: BTreeMap<usize, Vec<SiteDistribution>>,
}

/// Maximum-likelihood and altall sequences of one ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub ml: String,
    pub altall: String,
}

impl Rst {
    pub fn parse(text: &str) -> std::result::Result<Rst, String> {
        let mut lines = text.lines();
        let mut tree = None;
        let mut nodes: BTreeMap<usize, Vec<SiteDistribution>> = BTreeMap::new();
        let mut current: Option<usize> = None;

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.starts_with(TREEVIEW_HEADER) {
                let newick = lines
                    .by_ref()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .ok_or("missing TreeView tree")?;
                tree = Some(newick.split_whitespace().collect::<String>());
                current = None;
            } else if let Some(rest) = trimmed.strip_prefix(NODE_HEADER) {
                let number = rest
                    .split(',')
                    .next()
                    .and_then(|n| n.trim().parse::<usize>().ok())
                    .ok_or_else(|| format!("bad node header '{trimmed}'"))?;
                nodes.entry(number).or_default();
                current = Some(number);
            } else if let Some(node) = current {
                match trimmed.chars().next() {
                    Some(c) if c.is_ascii_digit() => {
                        if let Some(site) = parse_site(trimmed) {
                            nodes.entry(node).or_default().push(site);
                        }
                    }
                    Some(c) if c.is_alphabetic() && !trimmed.starts_with("site") => current = None,
                    _ => {}
                }
            }
        }

        let tree = tree.ok_or("no TreeView tree in rst")?;
        Ok(Rst { tree, nodes })
    }

    /// ML and altall sequences for every node.
    ///
    /// The altall sequence takes the runner-up state wherever its posterior
    /// is at least `cutoff`.
    pub fn ancestors(&self, cutoff: f64) -> BTreeMap<usize, Ancestor> {
        self.nodes
            .iter()
            .map(|(&node, sites)| {
                let mut ml = String::with_capacity(sites.len());
                let mut altall = String::with_capacity(sites.len());
                for site in sites {
                    let best = site[0].0;
                    ml.push(best);
                    let alternative = site
                        .get(1)
                        .filter(|(_, p)| *p >= cutoff)
                        .map(|(c, _)| *c)
                        .unwrap_or(best);
                    altall.push(alternative);
                }
                (node, Ancestor { ml, altall })
            })
            .collect()
    }

    /// Clade of every internal PAML node, keyed by PAML node number.
    pub fn internal_clades(&self, index: &LeafIndex) -> std::result::Result<HashMap<usize, LeafSet>, String> {
        let tree = PhyloTree::from_newick(&self.tree).map_err(|e| format!("TreeView tree: {e}"))?;
        let root = tree.get_root().map_err(|e| e.to_string())?;

        let children = |id: usize| tree.get(&id).map(|n| n.children.clone()).unwrap_or_default();
        let name = |id: usize| tree.get(&id).ok().and_then(|n| n.name.clone());
        let leaf_name = |id: usize| {
            name(id).and_then(|n| n.split_once('_').map(|(_, taxon)| taxon.to_string()))
        };

        let sets = clade_sets(root, children, leaf_name, index)
            .map_err(|id| format!("TreeView leaf {:?} not in alignment", name(id)))?;

        sets.into_iter()
            .filter(|(id, _)| !children(*id).is_empty())
            .map(|(id, set)| {
                let number = name(id)
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| format!("unnumbered internal node {:?}", name(id)))?;
                Ok((number, set))
            })
            .collect()
    }
}

fn parse_site(line: &str) -> Option<SiteDistribution> {
    let (_, states) = line.split_once(':')?;
    let mut site: SiteDistribution = STATE_PROB
        .captures_iter(states)
        .filter_map(|cap| {
            let state = cap[1].chars().next()?;
            let prob = cap[2].parse::<f64>().ok()?;
            Some((state, prob))
        })
        .collect();
    if site.is_empty() {
        return None;
    }
    site.sort_by(|a, b| b.1.total_cmp(&a.1));
    Some(site)
}

/// Runs PAML `codeml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codeml {
    pub executable: PathBuf,
    /// Directory holding `<rate_file>.dat`; codeml's working directory if unset
    pub rate_dir: Option<PathBuf>,
}

impl Default for Codeml {
    fn default() -> Self {
        Codeml {
            executable: PathBuf::from("codeml"),
            rate_dir: None,
        }
    }
}

impl Codeml {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Codeml {
            executable: executable.into(),
            rate_dir: None,
        }
    }

    fn rate_file(&self, rate: &str) -> String {
        let file = if rate.ends_with(".dat") {
            rate.to_string()
        } else {
            format!("{rate}.dat")
        };
        match &self.rate_dir {
            Some(dir) if Path::new(&file).is_relative() => dir.join(file).display().to_string(),
            _ => file,
        }
    }

    /// Control file entries: file names, defaults, then `params.extra`
    /// (which replaces entries with the same key).
    pub fn control_entries(&self, params: &ReconstructionParams) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = vec![
            ("seqfile".into(), ALIGNMENT_FILE.into()),
            ("treefile".into(), TREE_FILE.into()),
            ("outfile".into(), OUTPUT_FILE.into()),
            ("aaRatefile".into(), self.rate_file(&params.rate_file)),
        ];
        entries.extend(CONTROL_DEFAULTS.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        for (key, value) in &params.extra {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => entries.push((key.clone(), value.clone())),
            }
        }
        entries
    }

    /// Write alignment, tree and control file into `workdir`.
    fn prepare(&self, base: &Table, params: &ReconstructionParams, workdir: &Path) -> Result<()> {
        let id_column = Column::parse(&params.id_column)?;
        let sequence_column = Column::parse(&params.sequence_column)?;
        let tree = TableTree::new(base).map_err(|e| ProjectError::reconstruction(e.to_string()))?;

        let alignment = leaf_alignment(&tree, id_column, sequence_column)?;
        let newick = tree
            .to_newick(|r| r.get(id_column))
            .map_err(|e| ProjectError::reconstruction(e.to_string()))?;

        fs::create_dir_all(workdir)?;
        write_phylip(workdir.join(ALIGNMENT_FILE), &alignment)?;
        fs::write(workdir.join(TREE_FILE), format!("{newick}\n"))?;
        fs::write(workdir.join(CONTROL_FILE), render_control(&self.control_entries(params)))?;
        info!(
            "Prepared codeml run for {} leaves in {}",
            alignment.len(),
            workdir.display()
        );
        Ok(())
    }
}

impl Reconstructor for Codeml {
    fn reconstruct(&self, request: &ReconstructionRequest<'_>) -> Result<Table> {
        let params = request.params;
        let base = without_altall(request.table);
        let workdir = request.working_dir.join(ANCESTORS_DIR);

        self.prepare(&base, params, &workdir)?;

        let executable = self.executable.display().to_string();
        info!("Running {executable} {CONTROL_FILE} in {}", workdir.display());
        let output = run_tool(
            Command::new(&self.executable).arg(CONTROL_FILE).current_dir(&workdir),
            &executable,
        )?;
        debug!("{executable} stdout:\n{}", String::from_utf8_lossy(&output.stdout));

        let rst_path = workdir.join(RST_FILE);
        let text = fs::read_to_string(&rst_path).map_err(|e| {
            ProjectError::reconstruction(format!("could not read {}: {e}", rst_path.display()))
        })?;
        let rst = Rst::parse(&text).map_err(ProjectError::reconstruction)?;
        apply_ancestors(&base, &rst, params)
    }
}

fn render_control(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{key:>14} = {value}\n"))
        .collect()
}

fn without_altall(table: &Table) -> Table {
    let mut base = table.clone();
    base.retain(|r| !r.is_type(NodeType::Altall));
    base
}

/// `(name, sequence)` of every leaf, in preorder.
fn leaf_alignment(tree: &TableTree<'_>, id_column: Column, sequence_column: Column) -> Result<Vec<(String, String)>> {
    let mut seen = HashSet::new();
    let mut alignment = Vec::new();
    for uid in tree.preorder()? {
        if !tree.is_leaf(uid) {
            continue;
        }
        let record = tree.record(uid).ok_or_else(|| ProjectError::reconstruction(format!("no row for '{uid}'")))?;
        let name = record.get(id_column).filter(|n| !n.is_empty()).ok_or_else(|| {
            ProjectError::reconstruction(format!("leaf '{uid}' has no {}", id_column.name()))
        })?;
        let sequence = record.get(sequence_column).filter(|s| !s.is_empty()).ok_or_else(|| {
            ProjectError::reconstruction(format!("leaf '{name}' has no {}", sequence_column.name()))
        })?;
        if name.chars().any(char::is_whitespace) {
            return Err(ProjectError::reconstruction(format!("leaf name '{name}' contains whitespace")));
        }
        if !seen.insert(name.clone()) {
            return Err(ProjectError::reconstruction(format!("leaf name '{name}' is not unique")));
        }
        alignment.push((name, sequence));
    }
    if alignment.is_empty() {
        return Err(ProjectError::reconstruction("tree has no leaves"));
    }
    Ok(alignment)
}

/// Fold reconstructed ancestors back into `base`.
///
/// Matched internal rows get the ML sequence; each also gains an `altall`
/// row carrying the alternative sequence.
pub fn apply_ancestors(base: &Table, rst: &Rst, params: &ReconstructionParams) -> Result<Table> {
    let id_column = Column::parse(&params.id_column)?;
    let sequence_column = Column::parse(&params.sequence_column)?;
    let tree = TableTree::new(base).map_err(|e| ProjectError::reconstruction(e.to_string()))?;
    let order = tree.preorder()?;

    let alignment = leaf_alignment(&tree, id_column, sequence_column)?;
    let index = LeafIndex::new(alignment.iter().map(|(name, _)| name.clone()));

    let ours = clade_sets(
        tree.root(),
        |uid| tree.children(uid).to_vec(),
        |uid| tree.record(uid).and_then(|r| r.get(id_column)),
        &index,
    )
    .map_err(|uid| ProjectError::reconstruction(format!("leaf '{uid}' missing from alignment")))?;
    let ours_internal: HashMap<&str, LeafSet> = ours
        .into_iter()
        .filter(|(uid, _)| !tree.is_leaf(uid))
        .collect();

    let theirs = rst.internal_clades(&index).map_err(ProjectError::reconstruction)?;
    let matched = match_clades(&ours_internal, &theirs, index.len());
    let ancestors = rst.ancestors(params.altall_cutoff);

    let mut ml_by_uid: HashMap<&str, &str> = HashMap::new();
    let mut altall_rows = Vec::new();
    for uid in order.iter().copied().filter(|uid| !tree.is_leaf(uid)) {
        let Some(ancestor) = matched.get(uid).and_then(|n| ancestors.get(n)) else {
            warn!("No reconstructed sequence for internal node '{uid}'");
            continue;
        };
        let mut altall = Record {
            description: Some(format!(
                "altall reconstruction of {uid} (cutoff {})",
                params.altall_cutoff
            )),
            id: tree.record(uid).and_then(|r| r.id.clone()),
            label: Some("altall".to_string()),
            node_type: Some(NodeType::Altall),
            ..Record::new(format!("{uid}_altall"))
        };
        altall.set(sequence_column, Some(ancestor.altall.clone()))?;
        altall_rows.push(altall);
        ml_by_uid.insert(uid, ancestor.ml.as_str());
    }

    let mut result = base.clone();
    for row in result.records_mut() {
        if let Some(ml) = ml_by_uid.get(row.uid.as_str()) {
            row.set(sequence_column, Some(ml.to_string()))?;
        }
    }
    for altall in altall_rows {
        result.push(altall);
    }

    info!(
        "Reconstructed {} of {} internal nodes",
        result.count_type(NodeType::Altall),
        ours_internal.len()
    );
    result.check_unique_uids()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{newick_to_table, realign_leaf_ids};

    const RST: &str = "\
Supplemental results for CODEML (seqf: alignment.phy  treef: tree.newick)

tree with node labels for Rod Page's TreeView
(1_A, 2_B, (3_C, 4_D) 6 ) 5 ;

Prob distribution at node 5, by site

   site   Freq   Data

    1      1   MMMM:  M(0.950) L(0.050)
    2      1   KKRR:  K(0.700) R(0.300)

Prob distribution at node 6, by site

   site   Freq   Data

    1      1   MMMM:  L(0.010) M(0.990)
    2      1   KKRR:  R(0.900) K(0.100)

Summary of changes along branches.
Check root for directions of change.
";

    fn sequences_on_tree() -> Table {
        let mut table = newick_to_table("((A:0.1,B:0.2):0.05,(C:0.1,D:0.3):0.05);").unwrap();
        realign_leaf_ids(&mut table);
        for row in table.records_mut() {
            if let Some(id) = row.id.clone() {
                let residues = if id == "A" || id == "B" { "MK" } else { "MR" };
                row.sequence = Some(residues.to_string());
            }
        }
        table
    }

    #[test]
    fn test_parse_rst() {
        let rst = Rst::parse(RST).unwrap();
        assert_eq!(rst.tree, "(1_A,2_B,(3_C,4_D)6)5;");
        assert_eq!(rst.nodes.len(), 2);
        assert_eq!(rst.nodes[&6][0], vec![('M', 0.990), ('L', 0.010)]);
    }

    #[test]
    fn test_parse_rst_requires_tree() {
        assert!(Rst::parse("Prob distribution at node 5, by site\n").is_err());
    }

    #[test]
    fn test_ancestors_cutoff() {
        let rst = Rst::parse(RST).unwrap();
        let ancestors = rst.ancestors(0.2);
        assert_eq!(ancestors[&5], Ancestor { ml: "MK".into(), altall: "MR".into() });
        assert_eq!(ancestors[&6], Ancestor { ml: "MR".into(), altall: "MR".into() });

        let strict = rst.ancestors(0.5);
        assert_eq!(strict[&5].altall, "MK");
    }

    #[test]
    fn test_internal_clades() {
        let rst = Rst::parse(RST).unwrap();
        let index = LeafIndex::new(["A", "B", "C", "D"]);
        let clades = rst.internal_clades(&index).unwrap();
        assert_eq!(clades.len(), 2);
        assert_eq!(clades[&5].0[0], 0b1111);
        assert_eq!(clades[&6].0[0], 0b1100);
    }

    #[test]
    fn test_apply_ancestors() {
        let table = sequences_on_tree();
        let params = ReconstructionParams::default();
        let rst = Rst::parse(RST).unwrap();

        let result = apply_ancestors(&table, &rst, &params).unwrap();

        // 7 tree rows + altall rows for the root and the {C,D} node
        assert_eq!(result.len(), 9);
        assert_eq!(result.count_type(NodeType::Altall), 2);

        let root = result.iter().find(|r| r.is_type(NodeType::Root)).unwrap();
        assert_eq!(root.sequence.as_deref(), Some("MK"));
        let root_altall = result.get(&format!("{}_altall", root.uid)).unwrap();
        assert_eq!(root_altall.sequence.as_deref(), Some("MR"));
        assert_eq!(root_altall.parent, None);

        // ((A,B)x,...) was merged into the root by PAML and gets no sequence
        let x = result
            .iter()
            .find(|r| r.is_type(NodeType::Node) && r.sequence.is_none())
            .unwrap();
        assert!(result.get(&format!("{}_altall", x.uid)).is_none());

        // Leaves untouched
        assert_eq!(result.get("C").unwrap().sequence.as_deref(), Some("MR"));
    }

    #[test]
    fn test_apply_ancestors_replaces_old_altall_rows() {
        let table = sequences_on_tree();
        let params = ReconstructionParams::default();
        let rst = Rst::parse(RST).unwrap();

        let once = apply_ancestors(&table, &rst, &params).unwrap();
        let twice = apply_ancestors(&without_altall(&once), &rst, &params).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reconstruct_rejects_leaf_names_with_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = sequences_on_tree();
        for row in table.records_mut() {
            if row.id.as_deref() == Some("A") {
                row.id = Some("Homo sapiens".into());
            }
        }
        let params = ReconstructionParams {
            id_column: "id".into(),
            ..ReconstructionParams::default()
        };
        let err = Codeml::new(dir.path().join("no-such-codeml"))
            .reconstruct(&ReconstructionRequest {
                table: &table,
                params: &params,
                working_dir: dir.path(),
            })
            .unwrap_err();
        assert!(matches!(err, ProjectError::Reconstruction { .. }));
        assert!(!dir.path().join(ANCESTORS_DIR).join(ALIGNMENT_FILE).exists());
    }

    #[test]
    fn test_control_entries_overrides() {
        let codeml = Codeml {
            rate_dir: Some(PathBuf::from("/opt/paml/dat")),
            ..Codeml::default()
        };
        let mut params = ReconstructionParams::default();
        params.extra.insert("cleandata".into(), "1".into());
        params.extra.insert("ndata".into(), "1".into());

        let entries = codeml.control_entries(&params);
        let get = |key: &str| entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        assert_eq!(get("aaRatefile"), Some("/opt/paml/dat/lg.dat"));
        assert_eq!(get("cleandata"), Some("1"));
        assert_eq!(entries.last().unwrap().0, "ndata");

        let rendered = render_control(&entries);
        assert!(rendered.contains("       seqfile = alignment.phy\n"));
    }

    #[test]
    fn test_reconstruct_rejects_table_without_tree() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::from_records(vec![Record {
            sequence: Some("MK".into()),
            ..Record::new("A")
        }]);
        let params = ReconstructionParams::default();
        let err = Codeml::default()
            .reconstruct(&ReconstructionRequest {
                table: &table,
                params: &params,
                working_dir: dir.path(),
            })
            .unwrap_err();
        assert!(matches!(err, ProjectError::Reconstruction { .. }));
    }

    #[test]
    fn test_reconstruct_reports_missing_codeml() {
        let dir = tempfile::tempdir().unwrap();
        let table = sequences_on_tree();
        let params = ReconstructionParams::default();
        let err = Codeml::new(dir.path().join("no-such-codeml"))
            .reconstruct(&ReconstructionRequest {
                table: &table,
                params: &params,
                working_dir: dir.path(),
            })
            .unwrap_err();
        assert!(matches!(err, ProjectError::ToolNotAvailable { .. }));

        // Inputs were written before the tool was started
        let workdir = dir.path().join(ANCESTORS_DIR);
        let tree = fs::read_to_string(workdir.join(TREE_FILE)).unwrap();
        assert_eq!(tree.trim(), "((A:0.1,B:0.2):0.05,(C:0.1,D:0.3):0.05);");
        assert!(workdir.join(CONTROL_FILE).exists());
    }
}
