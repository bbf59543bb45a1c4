//! Python binding layer for phylogenetics projects.
//!
//! Exposes [`Project`] as the `PhylogeneticsProject` class; the external
//! tools are the configured PhyML and codeml executables.

use pyo3::exceptions::{PyFileExistsError, PyFileNotFoundError, PyIOError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::codeml::Codeml;
use crate::error::ProjectError;
use crate::phyml::{Datatype, Frequencies, Phyml, TreeOptions};
use crate::project::Project;
use crate::reconstruction::ReconstructionParams;
use crate::schema::ReadOptions;
use crate::table::{COLUMNS, Column};

impl From<ProjectError> for PyErr {
    fn from(err: ProjectError) -> PyErr {
        let message = err.to_string();
        match err {
            ProjectError::Io(_) => PyIOError::new_err(message),
            ProjectError::AlreadyExists { .. } => PyFileExistsError::new_err(message),
            ProjectError::OutputNotFound { .. } => PyFileNotFoundError::new_err(message),
            ProjectError::ToolNotAvailable { .. }
            | ProjectError::ToolFailed { .. }
            | ProjectError::Reconstruction { .. } => PyRuntimeError::new_err(message),
            _ => PyValueError::new_err(message),
        }
    }
}

/// Stringify every `**kwargs` value.
fn string_options(kwargs: Option<&Bound<'_, PyDict>>) -> PyResult<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    if let Some(kwargs) = kwargs {
        for (key, value) in kwargs.iter() {
            options.insert(key.extract::<String>()?, value.str()?.to_string());
        }
    }
    Ok(options)
}

fn parse_datatype(value: &str) -> PyResult<Datatype> {
    match value.to_ascii_lowercase().as_str() {
        "aa" => Ok(Datatype::Aa),
        "nt" => Ok(Datatype::Nt),
        other => Err(PyValueError::new_err(format!(
            "datatype must be 'aa' or 'nt', got '{other}'"
        ))),
    }
}

fn parse_frequencies(value: &str) -> PyResult<Frequencies> {
    match value.to_ascii_lowercase().as_str() {
        "empirical" | "e" => Ok(Frequencies::Empirical),
        "model" | "m" => Ok(Frequencies::Model),
        other => Err(PyValueError::new_err(format!(
            "frequencies must be 'empirical' or 'model', got '{other}'"
        ))),
    }
}

/// A project directory plus its sequence/tree table.
///
/// Args:
///     project_dir: Directory holding the project's working files
///     overwrite: Accept an existing directory (default: False)
///
/// Raises:
///     FileExistsError: If the directory exists and overwrite is False
#[pyclass(name = "PhylogeneticsProject")]
pub struct PyProject {
    inner: Project,
}

#[pymethods]
impl PyProject {
    #[new]
    #[pyo3(signature = (project_dir, overwrite=false))]
    fn new(project_dir: PathBuf, overwrite: bool) -> PyResult<Self> {
        Ok(PyProject {
            inner: Project::create(project_dir, overwrite)?,
        })
    }

    /// Restore a project saved with `save_snapshot`.
    #[staticmethod]
    fn load_snapshot(path: PathBuf) -> PyResult<Self> {
        Ok(PyProject {
            inner: Project::load_snapshot(path)?,
        })
    }

    /// Write the project to one file (`.gz` compresses).
    fn save_snapshot(&self, path: PathBuf) -> PyResult<()> {
        Ok(self.inner.save_snapshot(path)?)
    }

    /// Replace the table with `path` parsed as `schema`.
    ///
    /// Args:
    ///     path: Input file
    ///     schema: One of fasta, newick, phylip, csv, tsv
    ///     **options: Parser options, e.g. delimiter=";"
    #[pyo3(signature = (path, schema, **options))]
    fn read_data(&mut self, path: PathBuf, schema: &str, options: Option<&Bound<'_, PyDict>>) -> PyResult<()> {
        let options: ReadOptions = string_options(options)?;
        Ok(self.inner.read_data(path, schema, &options)?)
    }

    /// Infer a tree with PhyML and merge it into the table.
    ///
    /// Extra keyword arguments are passed to PhyML and win over the named
    /// ones.
    #[pyo3(signature = (
        id_col="id", sequence_col="sequence", datatype="aa", bootstrap=-1,
        model="LG", frequencies="empirical", phyml="phyml", **options
    ))]
    #[allow(clippy::too_many_arguments)]
    fn compute_tree(
        &mut self,
        id_col: &str,
        sequence_col: &str,
        datatype: &str,
        bootstrap: i64,
        model: &str,
        frequencies: &str,
        phyml: PathBuf,
        options: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<()> {
        let options = TreeOptions {
            id_column: id_col.to_string(),
            sequence_column: sequence_col.to_string(),
            datatype: parse_datatype(datatype)?,
            bootstrap,
            model: model.to_string(),
            frequencies: parse_frequencies(frequencies)?,
            extra: string_options(options)?,
        };
        Ok(self.inner.compute_tree(&Phyml::new(phyml), &options)?)
    }

    /// Reconstruct ancestral sequences with PAML codeml.
    ///
    /// Extra keyword arguments become codeml control entries.
    #[pyo3(signature = (
        id_col="uid", sequence_col="sequence", altall_cutoff=0.2, rate_file="lg",
        codeml="codeml", rate_dir=None, **options
    ))]
    #[allow(clippy::too_many_arguments)]
    fn compute_reconstruction(
        &mut self,
        id_col: &str,
        sequence_col: &str,
        altall_cutoff: f64,
        rate_file: &str,
        codeml: PathBuf,
        rate_dir: Option<PathBuf>,
        options: Option<&Bound<'_, PyDict>>,
    ) -> PyResult<()> {
        let params = ReconstructionParams {
            id_column: id_col.to_string(),
            sequence_column: sequence_col.to_string(),
            altall_cutoff,
            rate_file: rate_file.to_string(),
            extra: string_options(options)?,
        };
        let reconstructor = Codeml {
            executable: codeml,
            rate_dir,
        };
        Ok(self.inner.compute_reconstruction(&reconstructor, &params)?)
    }

    /// Write the table as CSV (`.gz` compresses).
    fn export_csv(&self, path: PathBuf) -> PyResult<()> {
        Ok(self.inner.export_csv(path)?)
    }

    #[getter]
    fn directory(&self) -> PathBuf {
        self.inner.directory().to_path_buf()
    }

    /// Column names in table order.
    fn columns(&self) -> Vec<&'static str> {
        COLUMNS.to_vec()
    }

    /// Every row as a dict keyed by column name.
    fn rows<'py>(&self, py: Python<'py>) -> PyResult<Vec<Bound<'py, PyDict>>> {
        self.inner
            .table()
            .iter()
            .map(|record| {
                let dict = PyDict::new(py);
                for column in Column::ALL {
                    match column {
                        Column::BranchLength => dict.set_item(column.name(), record.branch_length)?,
                        _ => dict.set_item(column.name(), record.get(column))?,
                    }
                }
                Ok(dict)
            })
            .collect()
    }

    fn __len__(&self) -> usize {
        self.inner.table().len()
    }

    fn __repr__(&self) -> String {
        format!(
            "PhylogeneticsProject('{}', rows={})",
            self.inner.directory().display(),
            self.inner.table().len()
        )
    }
}

/// Python module definition
#[pymodule]
fn phylo_project(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyProject>()?;
    Ok(())
}
