//! Ancestral sequence reconstruction seam.
//!
//! The project hands its table to a [`Reconstructor`] and replaces the table
//! with whatever comes back. [`crate::codeml::Codeml`] is the PAML-backed
//! implementation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::Table;

/// Parameters for one reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionParams {
    /// Column naming the leaves
    pub id_column: String,
    /// Column holding leaf sequences; reconstructed sequences are written here
    pub sequence_column: String,
    /// Minimum posterior for the runner-up state to enter the altall sequence
    pub altall_cutoff: f64,
    /// Amino-acid rate matrix, e.g. `lg`, `wag`, `jones`
    pub rate_file: String,
    /// Tool-specific options
    pub extra: BTreeMap<String, String>,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        ReconstructionParams {
            id_column: "uid".to_string(),
            sequence_column: "sequence".to_string(),
            altall_cutoff: 0.2,
            rate_file: "lg".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

/// Input of one reconstruction run.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructionRequest<'a> {
    /// Table with a resolved tree (`parent` and `branch_length` populated)
    pub table: &'a Table,
    pub params: &'a ReconstructionParams,
    /// Scratch space owned by the project
    pub working_dir: &'a Path,
}

/// An external ancestral reconstruction routine.
///
/// Returns the complete replacement table; preconditions on the tree are the
/// implementation's to check.
pub trait Reconstructor {
    fn reconstruct(&self, request: &ReconstructionRequest<'_>) -> Result<Table>;
}
