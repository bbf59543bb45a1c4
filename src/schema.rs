//! Schema name → table parser dispatch.
//!
//! Every input format is a [`TableParser`] registered under a name in a
//! [`SchemaRegistry`]. The built-in set is enumerated once, in
//! [`SchemaRegistry::with_defaults`]; callers can register more.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{ProjectError, Result};
use crate::io;
use crate::table::Table;

/// Free-form parser options, e.g. `delimiter=;`.
pub type ReadOptions = BTreeMap<String, String>;

/// Anything that can turn a file into a table.
pub trait TableParser: Send + Sync {
    fn parse(&self, path: &Path, options: &ReadOptions) -> Result<Table>;
}

impl<F> TableParser for F
where
    F: Fn(&Path, &ReadOptions) -> Result<Table> + Send + Sync,
{
    fn parse(&self, path: &Path, options: &ReadOptions) -> Result<Table> {
        self(path, options)
    }
}

fn reject_options(options: &ReadOptions, allowed: &[&str]) -> Result<()> {
    match options.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(ProjectError::invalid_option(
            key.as_str(),
            format!("not understood (accepted: {})", allowed.join(", ")),
        )),
        None => Ok(()),
    }
}

struct Fasta;

impl TableParser for Fasta {
    fn parse(&self, path: &Path, options: &ReadOptions) -> Result<Table> {
        reject_options(options, &[])?;
        io::read_fasta(path)
    }
}

struct Newick;

impl TableParser for Newick {
    fn parse(&self, path: &Path, options: &ReadOptions) -> Result<Table> {
        reject_options(options, &[])?;
        io::read_newick(path)
    }
}

struct Phylip;

impl TableParser for Phylip {
    fn parse(&self, path: &Path, options: &ReadOptions) -> Result<Table> {
        reject_options(options, &[])?;
        io::read_phylip(path)
    }
}

struct Delimited {
    default_delimiter: u8,
}

impl TableParser for Delimited {
    fn parse(&self, path: &Path, options: &ReadOptions) -> Result<Table> {
        reject_options(options, &["delimiter"])?;
        let delimiter = match options.get("delimiter").map(String::as_str) {
            None => self.default_delimiter,
            Some("\\t") | Some("tab") => b'\t',
            Some(d) if d.len() == 1 => d.as_bytes()[0],
            Some(d) => {
                return Err(ProjectError::invalid_option(
                    "delimiter",
                    format!("expected a single character, got '{d}'"),
                ));
            }
        };
        io::read_csv(path, delimiter)
    }
}

/// Explicit mapping from schema name to parser.
pub struct SchemaRegistry {
    parsers: BTreeMap<String, Box<dyn TableParser>>,
}

impl SchemaRegistry {
    /// A registry without any schema.
    pub fn empty() -> Self {
        SchemaRegistry {
            parsers: BTreeMap::new(),
        }
    }

    /// `fasta`, `newick`, `phylip`, `csv` and `tsv`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("fasta", Fasta);
        registry.register("newick", Newick);
        registry.register("phylip", Phylip);
        registry.register("csv", Delimited { default_delimiter: b',' });
        registry.register("tsv", Delimited { default_delimiter: b'\t' });
        registry
    }

    /// Register (or replace) the parser for `schema`. Names are case-insensitive.
    pub fn register(&mut self, schema: &str, parser: impl TableParser + 'static) {
        self.parsers.insert(schema.to_ascii_lowercase(), Box::new(parser));
    }

    pub fn schemas(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }

    pub fn get(&self, schema: &str) -> Result<&dyn TableParser> {
        self.parsers
            .get(&schema.to_ascii_lowercase())
            .map(|p| p.as_ref())
            .ok_or_else(|| ProjectError::UnsupportedSchema {
                schema: schema.to_string(),
                known: self.schemas().join(", "),
            })
    }

    /// Look up `schema` and parse `path` with it.
    pub fn parse(&self, schema: &str, path: &Path, options: &ReadOptions) -> Result<Table> {
        self.get(schema)?.parse(path, options)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.parsers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Record;
    use std::fs;

    #[test]
    fn test_default_schemas() {
        let registry = SchemaRegistry::with_defaults();
        assert_eq!(registry.schemas(), ["csv", "fasta", "newick", "phylip", "tsv"]);
    }

    #[test]
    fn test_unknown_schema() {
        let registry = SchemaRegistry::with_defaults();
        let err = registry
            .parse("genbank", Path::new("x.gb"), &ReadOptions::new())
            .unwrap_err();
        match err {
            ProjectError::UnsupportedSchema { schema, known } => {
                assert_eq!(schema, "genbank");
                assert!(known.contains("fasta"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seqs.fa");
        fs::write(&path, ">A\nMKV\n").unwrap();
        let registry = SchemaRegistry::with_defaults();
        let table = registry.parse("FASTA", &path, &ReadOptions::new()).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_register_closure() {
        let mut registry = SchemaRegistry::empty();
        registry.register("stub", |_: &Path, _: &ReadOptions| -> Result<Table> {
            Ok(Table::from_records(vec![Record::new("only")]))
        });
        let table = registry.parse("stub", Path::new("ignored"), &ReadOptions::new()).unwrap();
        assert_eq!(table.records()[0].uid, "only");
    }

    #[test]
    fn test_delimiter_option() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.txt");
        fs::write(&path, "uid;sequence\nA;MKV\n").unwrap();
        let registry = SchemaRegistry::with_defaults();

        let options = ReadOptions::from([("delimiter".to_string(), ";".to_string())]);
        let table = registry.parse("csv", &path, &options).unwrap();
        assert_eq!(table.get("A").unwrap().sequence.as_deref(), Some("MKV"));

        let bad = ReadOptions::from([("delimiter".to_string(), ";;".to_string())]);
        assert!(matches!(
            registry.parse("csv", &path, &bad),
            Err(ProjectError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let registry = SchemaRegistry::with_defaults();
        let options = ReadOptions::from([("alphabet".to_string(), "protein".to_string())]);
        let err = registry
            .parse("fasta", Path::new("missing.fa"), &options)
            .unwrap_err();
        assert!(matches!(err, ProjectError::InvalidOption { key, .. } if key == "alphabet"));
    }
}
