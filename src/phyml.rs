//! Tree inference through PhyML.
//!
//! The project writes `compute_tree.phy` into its directory, hands it to a
//! [`TreeInference`] implementation, and then looks for the tree the tool
//! wrote next to it:
//! ```text
//! <dir>/compute_tree.phy                 input alignment (relaxed PHYLIP)
//! <dir>/compute_tree.phy_phyml_tree      output tree (Newick)
//! <dir>/compute_tree.phy_phyml_tree.txt  output tree, older PhyML releases
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ProjectError, Result};
use crate::io::remove_if_exists;

pub const TREE_INPUT_FILE: &str = "compute_tree.phy";
const TREE_OUTPUT_SUFFIX: &str = "_phyml_tree";
const LEGACY_OUTPUT_EXTENSION: &str = ".txt";

/// Residue alphabet of the alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    #[default]
    Aa,
    Nt,
}

impl Datatype {
    pub fn as_str(self) -> &'static str {
        match self {
            Datatype::Aa => "aa",
            Datatype::Nt => "nt",
        }
    }
}

/// How equilibrium frequencies are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequencies {
    /// Counted from the alignment
    #[default]
    Empirical,
    /// Taken from the substitution model (or estimated by ML for nucleotides)
    Model,
}

impl Frequencies {
    pub fn flag(self) -> &'static str {
        match self {
            Frequencies::Empirical => "e",
            Frequencies::Model => "m",
        }
    }
}

/// Options for one tree computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeOptions {
    /// Column naming each sequence in the alignment (falls back to `uid`)
    pub id_column: String,
    /// Column holding the sequences
    pub sequence_column: String,
    pub datatype: Datatype,
    /// Bootstrap replicates; `-1` disables bootstrapping
    pub bootstrap: i64,
    /// Substitution model
    pub model: String,
    pub frequencies: Frequencies,
    /// Raw tool options; an entry here wins over the named fields above
    pub extra: BTreeMap<String, String>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        TreeOptions {
            id_column: "id".to_string(),
            sequence_column: "sequence".to_string(),
            datatype: Datatype::Aa,
            bootstrap: -1,
            model: "LG".to_string(),
            frequencies: Frequencies::Empirical,
            extra: BTreeMap::new(),
        }
    }
}

impl TreeOptions {
    /// Named options in fixed order, then the remaining overrides sorted by key.
    pub fn option_list(&self, input: &Path) -> Vec<(String, String)> {
        let mut options: Vec<(String, String)> = vec![
            ("input".into(), input.display().to_string()),
            ("datatype".into(), self.datatype.as_str().into()),
            ("bootstrap".into(), self.bootstrap.to_string()),
            ("model".into(), self.model.clone()),
            ("frequencies".into(), self.frequencies.flag().into()),
        ];
        for (key, value) in &self.extra {
            match options.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => options.push((key.clone(), value.clone())),
            }
        }
        options
    }
}

/// Translate option names to PhyML's command line.
///
/// `input`, `datatype`, `bootstrap`, `model` and `frequencies` use PhyML's
/// short flags. Other one-letter keys become `-k`, longer keys `--key`;
/// an empty value produces a bare flag.
pub fn phyml_arguments(options: &[(String, String)]) -> Vec<String> {
    let mut args = Vec::with_capacity(options.len() * 2);
    for (key, value) in options {
        let flag = match key.as_str() {
            "input" => "-i".to_string(),
            "datatype" => "-d".to_string(),
            "bootstrap" => "-b".to_string(),
            "model" => "-m".to_string(),
            "frequencies" => "-f".to_string(),
            k if k.chars().count() == 1 => format!("-{k}"),
            k => format!("--{k}"),
        };
        args.push(flag);
        if !value.is_empty() {
            args.push(value.clone());
        }
    }
    args
}

/// Where the tool writes its tree for `input`.
pub fn tree_output_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_os_string();
    name.push(TREE_OUTPUT_SUFFIX);
    PathBuf::from(name)
}

fn legacy_output_path(primary: &Path) -> PathBuf {
    let mut name = primary.as_os_str().to_os_string();
    name.push(LEGACY_OUTPUT_EXTENSION);
    PathBuf::from(name)
}

/// Find the output tree for `input`, accepting the `.txt` variant.
pub fn locate_tree_output(input: &Path) -> Result<PathBuf> {
    let primary = tree_output_path(input);
    if primary.exists() {
        return Ok(primary);
    }
    let fallback = legacy_output_path(&primary);
    if fallback.exists() {
        debug!("Using legacy tree output name {}", fallback.display());
        return Ok(fallback);
    }
    Err(ProjectError::OutputNotFound { primary, fallback })
}

/// Remove tree outputs left by an earlier run.
pub fn clear_tree_outputs(input: &Path) -> Result<()> {
    let primary = tree_output_path(input);
    for path in [legacy_output_path(&primary), primary] {
        if remove_if_exists(&path)? {
            debug!("Removed stale tree output {}", path.display());
        }
    }
    Ok(())
}

/// Everything a tree tool needs for one run.
#[derive(Debug, Clone, Copy)]
pub struct TreeInvocation<'a> {
    /// Project directory; outputs are expected next to `input`
    pub directory: &'a Path,
    pub input: &'a Path,
    pub options: &'a TreeOptions,
}

/// An external tree-inference program.
///
/// Implementations block until the tree for `invocation.input` has been
/// written (see [`tree_output_path`]).
pub trait TreeInference {
    fn infer(&self, invocation: &TreeInvocation<'_>) -> Result<()>;
}

/// Runs the PhyML executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phyml {
    pub executable: PathBuf,
}

impl Phyml {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Phyml {
            executable: executable.into(),
        }
    }
}

impl Default for Phyml {
    fn default() -> Self {
        Phyml::new("phyml")
    }
}

impl fmt::Display for Phyml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.executable.display())
    }
}

impl TreeInference for Phyml {
    fn infer(&self, invocation: &TreeInvocation<'_>) -> Result<()> {
        let args = phyml_arguments(&invocation.options.option_list(invocation.input));
        let executable = self.to_string();
        info!("Running {executable} {}", args.iter().join(" "));

        let output = run_tool(Command::new(&self.executable).args(&args), &executable)?;
        debug!("{executable} stdout:\n{}", String::from_utf8_lossy(&output.stdout));
        Ok(())
    }
}

/// Run a prepared command to completion.
///
/// Spawn failures become `ToolNotAvailable`; a non-zero exit becomes
/// `ToolFailed` with the captured stderr.
pub(crate) fn run_tool(command: &mut Command, executable: &str) -> Result<std::process::Output> {
    let output = command.output().map_err(|e| ProjectError::ToolNotAvailable {
        executable: executable.to_string(),
        message: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(ProjectError::ToolFailed {
            executable: executable.to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
