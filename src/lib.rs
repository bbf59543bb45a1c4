//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `error`: `ProjectError` and the crate `Result` alias.
//! - `table`: the fixed-column record table and its merge-by-uid.
//! - `io`: FASTA / Newick / CSV / PHYLIP readers and writers (gzip-aware).
//! - `tree`: Newick tree ⇄ table rows.
//! - `clade`: leaf-set bitsets for matching nodes across trees.
//! - `schema`: schema name → parser registry.
//! - `phyml`: tree inference options, command line and output location.
//! - `reconstruction`: ancestral reconstruction parameters and trait.
//! - `codeml`: PAML codeml reconstructor.
//! - `snapshot`: versioned single-file project state.
//! - `config`: tool executables and default options.
//! - `project`: the `Project` lifecycle.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod error;
pub mod table;
pub mod io;
pub mod tree;
pub mod clade;
pub mod schema;
pub mod phyml;
pub mod reconstruction;
pub mod codeml;
pub mod snapshot;
pub mod config;
pub mod project;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types
pub use error::{ProjectError, Result};
pub use table::{Column, NodeType, Record, Table};
pub use schema::{ReadOptions, SchemaRegistry, TableParser};
pub use phyml::{Datatype, Frequencies, Phyml, TreeInference, TreeOptions};
pub use reconstruction::{ReconstructionParams, Reconstructor};
pub use codeml::Codeml;
pub use config::ProjectConfig;
pub use project::Project;
