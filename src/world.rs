//! Ties together the variable environment, the target and configuration
//! registries, and the set of build files that produced them. Built once at
//! startup by walking the project tree; read-only from then on.

use std::path::{Path, PathBuf};

use crate::env::Environment;
use crate::model::{ConfigurationRegistry, TargetRegistry};
use crate::parser;
use crate::system::{self, Error};

/// Everything derived from parsing a project's build files.
pub struct World {
    pub env: Environment,
    pub targets: TargetRegistry,
    pub configurations: ConfigurationRegistry,
    /// Every `.pake` file discovered under `root`, in the order they were
    /// parsed. A build is stale if any of these is newer than its outputs,
    /// since editing any one of them can change what a target evaluates to.
    pub build_files: Vec<PathBuf>,
    pub root: PathBuf,
}

impl World {
    /// Discover and parse every build file under `root`.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let build_files = system::discover_build_files(root)?;

        let mut env = Environment::new();
        let mut targets = TargetRegistry::new();
        let mut configurations = ConfigurationRegistry::new();

        for file in &build_files {
            system::verboseln!("Parsing", "{}", file.display());
            parser::parse_file(file, &mut env, &mut targets, &mut configurations)?;
        }

        Ok(World {
            env,
            targets,
            configurations,
            build_files,
            root: root.to_path_buf(),
        })
    }
}
