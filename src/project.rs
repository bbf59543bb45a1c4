//! The project: one working directory plus one table.
//!
//! Typical flow:
//! ```text
//! create ─▶ read_data ─▶ compute_tree ─▶ compute_reconstruction ─▶ save_snapshot
//!                                                                      │
//!                              load_snapshot ◀─────────────────────────┘
//! ```
//! `read_data` and `compute_reconstruction` replace the table wholesale;
//! `compute_tree` merges the inferred tree into it by uid.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ProjectError, Result};
use crate::io::{check_phylip_names, read_newick, write_phylip, write_table_csv};
use crate::phyml::{TREE_INPUT_FILE, TreeInference, TreeInvocation, TreeOptions, clear_tree_outputs, locate_tree_output};
use crate::reconstruction::{ReconstructionParams, ReconstructionRequest, Reconstructor};
use crate::schema::{ReadOptions, SchemaRegistry};
use crate::snapshot::{ProjectSnapshot, SNAPSHOT_FILE_NAME};
use crate::table::{Column, NodeType, Table};
use crate::tree::realign_leaf_ids;

#[derive(Debug)]
pub struct Project {
    directory: PathBuf,
    table: Table,
    registry: SchemaRegistry,
}

impl Project {
    /// Create a project rooted at `directory`.
    ///
    /// An existing directory is only accepted with `overwrite`; its files are
    /// left in place.
    pub fn create<P: AsRef<Path>>(directory: P, overwrite: bool) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if directory.exists() && !overwrite {
            return Err(ProjectError::AlreadyExists { path: directory });
        }
        fs::create_dir_all(&directory)?;
        info!("Created project in {}", directory.display());
        Ok(Project {
            directory,
            table: Table::new(),
            registry: SchemaRegistry::with_defaults(),
        })
    }

    /// Restore a project from a snapshot written by [`Project::save_snapshot`].
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (directory, table) = ProjectSnapshot::read(path.as_ref())?.into_parts();
        info!(
            "Loaded {} rows for {} from {}",
            table.len(),
            directory.display(),
            path.as_ref().display()
        );
        Ok(Project {
            directory,
            table,
            registry: SchemaRegistry::with_defaults(),
        })
    }

    /// Write directory and table to `path`, replacing any existing file.
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ProjectSnapshot::new(&self.directory, &self.table).write(path.as_ref())?;
        debug!("Saved {} rows to {}", self.table.len(), path.as_ref().display());
        Ok(())
    }

    /// `<directory>/project.json`
    pub fn snapshot_path(&self) -> PathBuf {
        self.directory.join(SNAPSHOT_FILE_NAME)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// Parsers available to [`Project::read_data`].
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    /// Replace the table with the contents of `path` parsed as `schema`.
    pub fn read_data<P: AsRef<Path>>(&mut self, path: P, schema: &str, options: &ReadOptions) -> Result<()> {
        let path = path.as_ref();
        let table = self.registry.parse(schema, path, options)?;
        info!("Read {} rows from {} as {schema}", table.len(), path.display());
        self.table = table;
        Ok(())
    }

    /// Infer a tree from the table's sequences and merge it into the table.
    ///
    /// Leaves of the inferred tree take their `id` as uid, so they land on
    /// the sequence rows they came from. Sequence names must be free of
    /// whitespace.
    ///
    /// Internal rows of an earlier run are kept, so a second call leaves two
    /// roots in the table; reload the sequences with `read_data` before
    /// recomputing the tree.
    pub fn compute_tree(&mut self, tool: &dyn TreeInference, options: &TreeOptions) -> Result<()> {
        let id_column = Column::parse(&options.id_column)?;
        let sequence_column = Column::parse(&options.sequence_column)?;
        let alignment = self.table.alignment(id_column, sequence_column);
        if alignment.is_empty() {
            return Err(ProjectError::EmptyInput);
        }
        check_phylip_names(&alignment, &options.id_column)?;

        let input = self.directory.join(TREE_INPUT_FILE);
        write_phylip(&input, &alignment)?;
        clear_tree_outputs(&input)?;
        info!("Computing tree for {} sequences", alignment.len());

        tool.infer(&TreeInvocation {
            directory: &self.directory,
            input: &input,
            options,
        })?;

        let output = locate_tree_output(&input)?;
        let mut tree_table = read_newick(&output)?;
        realign_leaf_ids(&mut tree_table);
        self.table = self.table.combine(&tree_table)?;
        info!(
            "Merged tree from {}: {} leaves, {} rows",
            output.display(),
            tree_table.count_type(NodeType::Leaf),
            self.table.len()
        );
        Ok(())
    }

    /// Replace the table with the reconstructor's result.
    pub fn compute_reconstruction(
        &mut self,
        reconstructor: &dyn Reconstructor,
        params: &ReconstructionParams,
    ) -> Result<()> {
        let table = reconstructor.reconstruct(&ReconstructionRequest {
            table: &self.table,
            params,
            working_dir: &self.directory,
        })?;
        info!("Reconstruction returned {} rows", table.len());
        self.table = table;
        Ok(())
    }

    /// Write the table as CSV; `.gz` paths are compressed.
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_table_csv(path.as_ref(), &self.table)?;
        info!("Exported {} rows to {}", self.table.len(), path.as_ref().display());
        Ok(())
    }
}
