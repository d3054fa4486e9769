//! The target and configuration model: typed objects produced by the parser
//! and frozen once parsing completes. `Target`/`Configuration` only carry
//! raw `Variable`s — evaluation always goes back through the `Environment`
//! for the owning scope, so these structs stay plain data.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::env::{Fragment, Variable};
use crate::system::Error;

/// Fields shared by every target variant.
#[derive(Debug, Clone)]
pub struct CommonFields {
    pub name: String,
    /// The module (build-file scope) that declared this target.
    pub scope: String,
    /// Directory of the build file that declared this target; relative
    /// paths in the target (sources, resources, hook artefacts...) are
    /// resolved against it.
    pub root_path: PathBuf,
    pub depends_on: Variable,
    pub run_before: Variable,
    pub run_after: Variable,
    pub artefacts: Variable,
    pub prerequisites: Variable,
    pub resources: Variable,
    pub visible_in: Variable,
}

/// Fields shared by the two compileable target kinds.
#[derive(Debug, Clone, Default)]
pub struct CxxFields {
    pub sources: Variable,
    pub include_dirs: Variable,
    pub compiler_flags: Variable,
}

#[derive(Debug, Clone)]
pub enum TargetKind {
    Application {
        cxx: CxxFields,
        link_with: Variable,
        library_dirs: Variable,
    },
    StaticLibrary {
        cxx: CxxFields,
    },
    Phony,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub common: CommonFields,
    pub kind: TargetKind,
}

/// Insertion-ordered, name-unique collection of targets. Populated
/// exclusively during parsing; read concurrently by the orchestrator.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    order: Vec<String>,
    targets: HashMap<String, Target>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate target names are a hard error (normative redesign, see
    /// the design notes: earlier drafts warned and overwrote).
    pub fn add(&mut self, target: Target) -> Result<(), Error> {
        let name = target.common.name.clone();
        if self.targets.contains_key(&name) {
            return Err(Error::DuplicateTarget(name));
        }
        self.order.push(name.clone());
        self.targets.insert(name, target);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Target, Error> {
        self.targets
            .get(name)
            .ok_or_else(|| Error::UnknownTarget(name.to_string()))
    }

    /// Target names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub const DEFAULT_CONFIGURATION: &str = "__default";

#[derive(Debug, Clone)]
pub struct Configuration {
    pub name: String,
    pub compiler: Variable,
    pub compiler_flags: Variable,
    pub linker_flags: Variable,
    pub application_suffix: Variable,
    pub archiver: Variable,
    /// `(value, name)` pairs promoted into the `__configuration` scope when
    /// this configuration is selected.
    pub export: Vec<(Fragment, String)>,
}

impl Configuration {
    /// Every configuration, including user-defined ones, starts from these
    /// defaults; a `configuration` directive only overrides the keys it
    /// names (mirrors the reference implementation's `Configuration.__init__`).
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compiler: Variable::literal("c++"),
            compiler_flags: Variable::literal("-I."),
            linker_flags: Variable::literal("-L."),
            application_suffix: Variable::literal(""),
            archiver: Variable::literal("ar"),
            export: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ConfigurationRegistry {
    configurations: HashMap<String, Configuration>,
}

impl Default for ConfigurationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationRegistry {
    pub fn new() -> Self {
        let mut configurations = HashMap::new();
        configurations.insert(
            DEFAULT_CONFIGURATION.to_string(),
            Configuration::with_defaults(DEFAULT_CONFIGURATION),
        );
        Self { configurations }
    }

    pub fn add(&mut self, configuration: Configuration) {
        self.configurations
            .insert(configuration.name.clone(), configuration);
    }

    pub fn get(&self, name: &str) -> Result<&Configuration, Error> {
        self.configurations
            .get(name)
            .ok_or_else(|| Error::UnknownConfiguration(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_always_present() {
        let registry = ConfigurationRegistry::new();
        let default = registry.get(DEFAULT_CONFIGURATION).unwrap();
        assert_eq!(default.name, DEFAULT_CONFIGURATION);
    }

    #[test]
    fn test_unknown_configuration_is_error() {
        let registry = ConfigurationRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(Error::UnknownConfiguration(_))
        ));
    }

    #[test]
    fn test_duplicate_target_name_is_fatal() {
        let mut registry = TargetRegistry::new();
        let make = |name: &str| Target {
            common: CommonFields {
                name: name.to_string(),
                scope: "m".to_string(),
                root_path: PathBuf::new(),
                depends_on: Variable::empty(),
                run_before: Variable::empty(),
                run_after: Variable::empty(),
                artefacts: Variable::empty(),
                prerequisites: Variable::empty(),
                resources: Variable::empty(),
                visible_in: Variable::empty(),
            },
            kind: TargetKind::Phony,
        };
        registry.add(make("hello")).unwrap();
        let err = registry.add(make("hello")).unwrap_err();
        assert!(matches!(err, Error::DuplicateTarget(n) if n == "hello"));
    }

    #[test]
    fn test_target_names_preserve_declaration_order() {
        let mut registry = TargetRegistry::new();
        for name in ["c", "a", "b"] {
            registry
                .add(Target {
                    common: CommonFields {
                        name: name.to_string(),
                        scope: "m".to_string(),
                        root_path: PathBuf::new(),
                        depends_on: Variable::empty(),
                        run_before: Variable::empty(),
                        run_after: Variable::empty(),
                        artefacts: Variable::empty(),
                        prerequisites: Variable::empty(),
                        resources: Variable::empty(),
                        visible_in: Variable::empty(),
                    },
                    kind: TargetKind::Phony,
                })
                .unwrap();
        }
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["c", "a", "b"]);
    }
}
