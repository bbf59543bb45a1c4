//! Tool locations and default option records.
//!
//! Read from a JSON file; every field may be omitted:
//! ```text
//! {
//!   "phyml": "/opt/phyml/bin/phyml",
//!   "codeml": "codeml",
//!   "rate_dir": "/opt/paml/dat",
//!   "tree": { "model": "WAG", "bootstrap": 100 },
//!   "reconstruction": { "altall_cutoff": 0.3 }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codeml::Codeml;
use crate::error::{ProjectError, Result};
use crate::phyml::{Phyml, TreeOptions};
use crate::reconstruction::ReconstructionParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// PhyML executable
    pub phyml: PathBuf,
    /// PAML codeml executable
    pub codeml: PathBuf,
    /// Directory holding the `.dat` rate matrices
    pub rate_dir: Option<PathBuf>,
    pub tree: TreeOptions,
    pub reconstruction: ReconstructionParams,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            phyml: PathBuf::from("phyml"),
            codeml: PathBuf::from("codeml"),
            rate_dir: None,
            tree: TreeOptions::default(),
            reconstruction: ReconstructionParams::default(),
        }
    }
}

impl ProjectConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let text = fs::read_to_string(p)
            .map_err(|e| ProjectError::config(format!("cannot read {}: {e}", p.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| ProjectError::config(format!("{}: {e}", p.display())))
    }

    pub fn phyml_runner(&self) -> Phyml {
        Phyml::new(&self.phyml)
    }

    pub fn codeml_runner(&self) -> Codeml {
        Codeml {
            executable: self.codeml.clone(),
            rate_dir: self.rate_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phyml::Datatype;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"phyml": "/opt/phyml", "tree": {"datatype": "nt", "bootstrap": 100}}"#,
        )
        .unwrap();

        let config = ProjectConfig::from_json_file(&path).unwrap();
        assert_eq!(config.phyml_runner(), Phyml::new("/opt/phyml"));
        assert_eq!(config.codeml, PathBuf::from("codeml"));
        assert_eq!(config.tree.datatype, Datatype::Nt);
        assert_eq!(config.tree.bootstrap, 100);
        assert_eq!(config.tree.model, "LG");
        assert_eq!(config.reconstruction, ReconstructionParams::default());
    }

    #[test]
    fn test_rate_dir_reaches_codeml() {
        let config = ProjectConfig {
            rate_dir: Some(PathBuf::from("/opt/paml/dat")),
            ..ProjectConfig::default()
        };
        let codeml = config.codeml_runner();
        assert_eq!(codeml.rate_dir.as_deref(), Some(Path::new("/opt/paml/dat")));
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"phyml": 3}"#).unwrap();
        assert!(matches!(
            ProjectConfig::from_json_file(&path),
            Err(ProjectError::Config { .. })
        ));
        assert!(matches!(
            ProjectConfig::from_json_file(dir.path().join("missing.json")),
            Err(ProjectError::Config { .. })
        ));
    }
}
