//! The incremental build orchestrator: walks the target dependency graph,
//! fans compilation out across a bounded thread pool, and sequences
//! archiving/linking/hooks on the controller thread so command-line ordering
//! stays deterministic.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{Target, TargetKind, DEFAULT_CONFIGURATION};
use crate::system::{self, Error, Executer};
use crate::toolchain::ToolchainDriver;
use crate::world::World;

pub struct BuildOptions {
    pub configuration: String,
    pub jobs: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            configuration: DEFAULT_CONFIGURATION.to_string(),
            jobs: 1,
        }
    }
}

/// Drives one build: owns the loaded `World`, the resolved toolchain for the
/// selected configuration, and the compile pool. Targets are visited
/// depth-first, memoised in `built`, with `in_progress` catching cycles.
pub struct Controller {
    world: Arc<World>,
    toolchain: Arc<ToolchainDriver>,
    executer: Executer,
    configuration_name: String,
    built: HashSet<String>,
    in_progress: HashSet<String>,
}

impl Controller {
    pub fn new(mut world: World, options: &BuildOptions) -> Result<Self, Error> {
        let configuration = world.configurations.get(&options.configuration)?.clone();
        let build_dir = world
            .root
            .join(system::BUILD_ROOT)
            .join(&options.configuration);
        system::ensure_directory(&build_dir)?;

        let build_dir_for_env = build_dir.display().to_string();
        world.env.apply_configuration(
            &options.configuration,
            &configuration.export,
            move |_scope| build_dir_for_env.clone(),
        );

        let toolchain = ToolchainDriver::new(&world.env, &configuration, build_dir)?;

        Ok(Self {
            world: Arc::new(world),
            toolchain: Arc::new(toolchain),
            executer: Executer::new(options.jobs),
            configuration_name: options.configuration.clone(),
            built: HashSet::new(),
            in_progress: HashSet::new(),
        })
    }

    /// Build every target visible in the selected configuration, skipping
    /// (with a hint, not an error) any that aren't.
    pub fn build_all(&mut self) -> Result<(), Error> {
        let names: Vec<String> = self.world.targets.names().map(|s| s.to_string()).collect();
        for name in names {
            let target = self.world.targets.get(&name)?;
            if !self.is_visible(target)? {
                system::hintln!("Skipped", "{name} (not visible in `{}`)", self.configuration_name);
                continue;
            }
            self.build(&name)?;
        }
        Ok(())
    }

    pub fn build(&mut self, name: &str) -> Result<(), Error> {
        if self.built.contains(name) {
            return Ok(());
        }
        if self.in_progress.contains(name) {
            return Err(Error::DependencyCycle(name.to_string()));
        }

        let target = self.world.targets.get(name)?.clone();
        if !self.is_visible(&target)? {
            return Err(Error::TargetNotVisible(
                name.to_string(),
                self.configuration_name.clone(),
            ));
        }

        self.in_progress.insert(name.to_string());

        let depends_on = self.world.env.eval(&target.common.scope, &target.common.depends_on)?;
        for dep in &depends_on {
            self.build(dep)?;
        }

        self.run_hooks(&target, &target.common.run_before)?;

        match &target.kind {
            TargetKind::Phony => {
                let artefacts = self.world.env.eval(&target.common.scope, &target.common.artefacts)?;
                let prerequisites = self.world.env.eval(&target.common.scope, &target.common.prerequisites)?;
                if artefacts.is_empty() && prerequisites.is_empty() {
                    system::verboseln!("Phony", "{name}");
                }
            }
            TargetKind::StaticLibrary { cxx } => {
                let objects = self.compile_sources(&target, cxx)?;
                self.toolchain.archive_if_stale(&target.common.root_path, &objects, name)?;
            }
            TargetKind::Application {
                cxx,
                link_with,
                library_dirs,
            } => {
                let objects = self.compile_sources(&target, cxx)?;
                let link_with = self.world.env.eval(&target.common.scope, link_with)?;
                let library_dirs = self.world.env.eval(&target.common.scope, library_dirs)?;
                self.toolchain.link_if_stale(
                    &target.common.root_path,
                    &objects,
                    &link_with,
                    &library_dirs,
                    name,
                )?;
            }
        }

        self.run_hooks(&target, &target.common.run_after)?;
        self.copy_resources(&target)?;

        self.in_progress.remove(name);
        self.built.insert(name.to_string());
        Ok(())
    }

    fn is_visible(&self, target: &Target) -> Result<bool, Error> {
        let visible_in = self
            .world
            .env
            .eval(&target.common.scope, &target.common.visible_in)?;
        Ok(visible_in.is_empty() || visible_in.iter().any(|c| c == &self.configuration_name))
    }

    /// Compile every source of `cxx` in parallel, short-circuiting queued and
    /// in-flight work as soon as one compile fails. Results are collected by
    /// declaration-order index (not completion order), since archive/link
    /// invocation order must stay deterministic.
    fn compile_sources(
        &self,
        target: &Target,
        cxx: &crate::model::CxxFields,
    ) -> Result<Vec<PathBuf>, Error> {
        let scope = &target.common.scope;
        let sources = self.world.env.eval(scope, &cxx.sources)?;
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let include_dirs = self.world.env.eval(scope, &cxx.include_dirs)?;
        let extra_flags = self.world.env.eval(scope, &cxx.compiler_flags)?;

        let failed = Arc::new(AtomicBool::new(false));
        let root = target.common.root_path.clone();
        let build_files = self.world.build_files.clone();
        let target_name = target.common.name.clone();

        let tasks: Vec<_> = sources
            .iter()
            .map(|source| {
                let toolchain = Arc::clone(&self.toolchain);
                let failed = Arc::clone(&failed);
                let root = root.clone();
                let source = PathBuf::from(source);
                let include_dirs = include_dirs.clone();
                let extra_flags = extra_flags.clone();
                let build_files = build_files.clone();
                let target_name = target_name.clone();
                self.executer.execute(move || {
                    if failed.load(Ordering::SeqCst) {
                        return None;
                    }
                    match toolchain.compile_if_stale(&root, &target_name, &source, &include_dirs, &extra_flags, &build_files) {
                        Ok(object) => Some(object),
                        Err(e) => {
                            e.print();
                            failed.store(true, Ordering::SeqCst);
                            None
                        }
                    }
                })
            })
            .collect();

        let mut objects = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Some(object) = task.wait() {
                objects.push(object);
            }
        }

        if failed.load(Ordering::SeqCst) {
            return Err(Error::CompileError(target.common.name.clone()));
        }
        Ok(objects)
    }

    /// Run `hooks` (either `run_before` or `run_after`), gated on staleness
    /// when both `artefacts` and `prerequisites` are non-empty: otherwise
    /// hooks run unconditionally every build.
    fn run_hooks(&self, target: &Target, hooks: &crate::env::Variable) -> Result<(), Error> {
        let scope = &target.common.scope;
        let commands = self.world.env.eval(scope, hooks)?;
        if commands.is_empty() {
            return Ok(());
        }

        let artefacts = self.world.env.eval(scope, &target.common.artefacts)?;
        let prerequisites = self.world.env.eval(scope, &target.common.prerequisites)?;
        if !artefacts.is_empty() && !prerequisites.is_empty() {
            let artefacts_abs: Vec<PathBuf> = artefacts
                .iter()
                .map(|a| target.common.root_path.join(a))
                .collect();
            let prerequisites_abs: Vec<PathBuf> = prerequisites
                .iter()
                .map(|p| target.common.root_path.join(p))
                .collect();
            let mut any_stale = false;
            for artefact in &artefacts_abs {
                if system::is_any_newer_than(&prerequisites_abs, artefact)? {
                    any_stale = true;
                    break;
                }
            }
            if !any_stale {
                system::verboseln!("UpToDate", "hooks for {}", target.common.name);
                return Ok(());
            }
        }

        self.world.env.pollute_environment(scope)?;

        for command in commands {
            system::infoln!("Running", "{command}");
            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .current_dir(&target.common.root_path)
                .status()
                .map_err(|e| Error::SpawnChild(command.clone(), e))?;
            if !status.success() {
                return Err(Error::HookError(command, status));
            }
        }
        Ok(())
    }

    fn copy_resources(&self, target: &Target) -> Result<(), Error> {
        let resources = self
            .world
            .env
            .eval(&target.common.scope, &target.common.resources)?;
        if resources.is_empty() {
            return Ok(());
        }
        let dest_dir = self.toolchain.bin_dir();
        system::ensure_directory(&dest_dir)?;
        for resource in resources {
            let src = target.common.root_path.join(&resource);
            copy_resource(&src, &dest_dir)?;
        }
        Ok(())
    }
}

/// Copy a resource (file or directory, recursively) into `dest_dir`,
/// preserving its basename. There's no bundled `rsync`-equivalent crate in
/// this stack, so directories are walked by hand.
fn copy_resource(src: &Path, dest_dir: &Path) -> Result<(), Error> {
    let name = src
        .file_name()
        .ok_or_else(|| Error::InvalidPath(src.display().to_string(), std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing file name")))?;
    let dest = dest_dir.join(name);

    if src.is_dir() {
        system::ensure_directory(&dest)?;
        for entry in walkdir::WalkDir::new(src).min_depth(1) {
            let entry = entry.map_err(|e| {
                Error::ReadFile(src.display().to_string(), std::io::Error::new(std::io::ErrorKind::Other, e))
            })?;
            let relative = entry.path().strip_prefix(src).unwrap();
            let target_path = dest.join(relative);
            if entry.file_type().is_dir() {
                system::ensure_directory(&target_path)?;
            } else {
                if let Some(parent) = target_path.parent() {
                    system::ensure_directory(parent)?;
                }
                std::fs::copy(entry.path(), &target_path)
                    .map_err(|e| Error::WriteFile(target_path.display().to_string(), e))?;
            }
        }
    } else {
        std::fs::copy(src, &dest).map_err(|e| Error::WriteFile(dest.display().to_string(), e))?;
    }
    Ok(())
}

/// Remove build output. `configuration: None` clears the whole build root;
/// `Some(name)` clears only that configuration's subdirectory.
pub fn clean(root: &Path, configuration: Option<&str>) -> Result<(), Error> {
    let build_root = root.join(system::BUILD_ROOT);
    match configuration {
        Some(name) => system::remove_directory(build_root.join(name)),
        None => system::remove_directory(build_root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Environment, Variable};
    use crate::model::{CommonFields, ConfigurationRegistry, TargetRegistry};

    fn empty_common(name: &str, root_path: PathBuf) -> CommonFields {
        CommonFields {
            name: name.to_string(),
            scope: "m".to_string(),
            root_path,
            depends_on: Variable::empty(),
            run_before: Variable::empty(),
            run_after: Variable::empty(),
            artefacts: Variable::empty(),
            prerequisites: Variable::empty(),
            resources: Variable::empty(),
            visible_in: Variable::empty(),
        }
    }

    fn make_world(root: &Path) -> World {
        let mut env = Environment::new();
        env.ensure_scope("m");
        let mut targets = TargetRegistry::new();
        targets
            .add(Target {
                common: empty_common("a", root.to_path_buf()),
                kind: TargetKind::Phony,
            })
            .unwrap();
        let mut b_common = empty_common("b", root.to_path_buf());
        b_common.depends_on = Variable::literal("a");
        targets
            .add(Target {
                common: b_common,
                kind: TargetKind::Phony,
            })
            .unwrap();

        World {
            env,
            targets,
            configurations: ConfigurationRegistry::new(),
            build_files: Vec::new(),
            root: root.to_path_buf(),
        }
    }

    #[test]
    fn test_build_all_resolves_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let world = make_world(dir.path());
        let options = BuildOptions::default();
        let mut controller = Controller::new(world, &options).unwrap();
        controller.build_all().unwrap();
        assert!(controller.built.contains("a"));
        assert!(controller.built.contains("b"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::new();
        env.ensure_scope("m");
        let mut targets = TargetRegistry::new();
        let mut common = empty_common("a", dir.path().to_path_buf());
        common.depends_on = Variable::literal("a");
        targets
            .add(Target {
                common,
                kind: TargetKind::Phony,
            })
            .unwrap();
        let world = World {
            env,
            targets,
            configurations: ConfigurationRegistry::new(),
            build_files: Vec::new(),
            root: dir.path().to_path_buf(),
        };
        let options = BuildOptions::default();
        let mut controller = Controller::new(world, &options).unwrap();
        let err = controller.build("a").unwrap_err();
        assert!(matches!(err, Error::DependencyCycle(n) if n == "a"));
    }

    #[test]
    fn test_invisible_target_is_fatal_when_built_directly() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::new();
        env.ensure_scope("m");
        let mut targets = TargetRegistry::new();
        let mut common = empty_common("a", dir.path().to_path_buf());
        common.visible_in = Variable::literal("release");
        targets
            .add(Target {
                common,
                kind: TargetKind::Phony,
            })
            .unwrap();
        let world = World {
            env,
            targets,
            configurations: ConfigurationRegistry::new(),
            build_files: Vec::new(),
            root: dir.path().to_path_buf(),
        };
        let options = BuildOptions::default();
        let mut controller = Controller::new(world, &options).unwrap();
        let err = controller.build("a").unwrap_err();
        assert!(matches!(err, Error::TargetNotVisible(n, c) if n == "a" && c == DEFAULT_CONFIGURATION));
    }

    #[test]
    fn test_clean_removes_only_selected_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let build_root = dir.path().join(system::BUILD_ROOT);
        std::fs::create_dir_all(build_root.join("debug")).unwrap();
        std::fs::create_dir_all(build_root.join("release")).unwrap();
        clean(dir.path(), Some("debug")).unwrap();
        assert!(!build_root.join("debug").exists());
        assert!(build_root.join("release").exists());
    }

    #[test]
    fn test_clean_all_removes_build_root() {
        let dir = tempfile::tempdir().unwrap();
        let build_root = dir.path().join(system::BUILD_ROOT);
        std::fs::create_dir_all(build_root.join("debug")).unwrap();
        clean(dir.path(), None).unwrap();
        assert!(!build_root.exists());
    }

    #[test]
    fn test_copy_resource_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("data.txt");
        std::fs::write(&src, "hello").unwrap();
        let dest_dir = dir.path().join("out");
        std::fs::create_dir_all(&dest_dir).unwrap();
        copy_resource(&src, &dest_dir).unwrap();
        assert_eq!(std::fs::read_to_string(dest_dir.join("data.txt")).unwrap(), "hello");
    }
}
