//! Drives the actual compiler/archiver/linker subprocesses and decides, via
//! mtime comparisons, whether each step can be skipped. Every subprocess is
//! invoked with an explicit argv (never a shell-joined string) and with its
//! working directory set to the project root, so concurrent compiles never
//! fight over a process-wide current directory.

use std::path::{Path, PathBuf};

use itertools::Itertools;

use crate::env::{Environment, CONFIGURATION_SCOPE};
use crate::model::Configuration;
use crate::system::{self, ChildBuilder, Error};

/// Resolved, evaluated toolchain commands for one configuration. Built once
/// per build and shared (read-only) across the compile pool.
#[derive(Debug)]
pub struct ToolchainDriver {
    compiler: Vec<String>,
    compiler_flags: Vec<String>,
    linker_flags: Vec<String>,
    archiver: Vec<String>,
    application_suffix: String,
    build_dir: PathBuf,
}

fn split_argv<'a>(parts: &'a [String], what: &str) -> Result<(&'a str, &'a [String]), Error> {
    parts
        .split_first()
        .map(|(first, rest)| (first.as_str(), rest))
        .ok_or_else(|| Error::CompileError(format!("no {what} configured")))
}

impl ToolchainDriver {
    pub fn new(
        env: &Environment,
        configuration: &Configuration,
        build_dir: PathBuf,
    ) -> Result<Self, Error> {
        Ok(Self {
            compiler: env.eval(CONFIGURATION_SCOPE, &configuration.compiler)?,
            compiler_flags: env.eval(CONFIGURATION_SCOPE, &configuration.compiler_flags)?,
            linker_flags: env.eval(CONFIGURATION_SCOPE, &configuration.linker_flags)?,
            archiver: env.eval(CONFIGURATION_SCOPE, &configuration.archiver)?,
            application_suffix: env
                .eval(CONFIGURATION_SCOPE, &configuration.application_suffix)?
                .join(""),
            build_dir,
        })
    }

    /// Per-target scratch directory for object files and include caches.
    fn cache_dir(&self, target_name: &str) -> PathBuf {
        self.build_dir.join(format!("build.{target_name}"))
    }

    fn lib_dir(&self) -> PathBuf {
        self.build_dir.clone()
    }

    /// Directory applications (and copied resources) land in.
    pub fn bin_dir(&self) -> PathBuf {
        self.build_dir.clone()
    }

    /// `source`'s path is preserved verbatim (including subdirectories)
    /// under the target's cache directory, with `.o` appended.
    pub fn object_path(&self, target_name: &str, source: &Path) -> PathBuf {
        let mut path = self.cache_dir(target_name).join(source);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".o");
        path.set_file_name(name);
        path
    }

    fn include_cache_path(&self, target_name: &str, source: &Path) -> PathBuf {
        let mut path = self.cache_dir(target_name).join(source);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".includes");
        path.set_file_name(name);
        path
    }

    pub fn static_library_path(&self, target_name: &str) -> PathBuf {
        self.lib_dir().join(format!("lib{target_name}.a"))
    }

    pub fn application_path(&self, target_name: &str) -> PathBuf {
        self.bin_dir()
            .join(format!("{target_name}{}", self.application_suffix))
    }

    /// Ask the compiler to list a source's transitive headers (`-M`), the
    /// plain substitute for a full dependency-file parser: the corpus's
    /// `check_phase.rs` already shells out for similar discovery work.
    fn scan_includes(
        &self,
        root: &Path,
        source: &Path,
        include_dirs: &[String],
    ) -> Result<Vec<PathBuf>, Error> {
        let (prog, rest) = split_argv(&self.compiler, "compiler")?;

        let mut args: Vec<String> = rest.to_vec();
        args.extend(self.compiler_flags.iter().cloned());
        for dir in include_dirs {
            args.push(format!("-I{dir}"));
        }
        args.push("-M".to_string());
        args.push(source.display().to_string());

        let mut child = ChildBuilder::new(prog)
            .args(&args)
            .current_dir(root)
            .piped()
            .spawn()?;

        let mut text = String::new();
        for chunk in child.take_output() {
            match chunk {
                system::TermOut::Stdout(line) => {
                    text.push_str(&line);
                    text.push(' ');
                }
                system::TermOut::Stderr(line) => system::verboseln!("Scan", "{line}"),
            }
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::CompileError(source.display().to_string()));
        }

        let includes = text
            .split_whitespace()
            .skip(2)
            .filter(|tok| *tok != "\\")
            .unique()
            .map(PathBuf::from)
            .collect();
        Ok(includes)
    }

    fn read_include_cache(&self, path: &Path) -> Result<Vec<PathBuf>, Error> {
        let content = system::read_file(path)?;
        let names: Vec<String> = serde_json::from_str(&content)
            .map_err(|e| Error::ParseJson(path.display().to_string(), e))?;
        Ok(names.into_iter().map(PathBuf::from).collect())
    }

    fn write_include_cache(&self, path: &Path, includes: &[PathBuf]) -> Result<(), Error> {
        let names: Vec<String> = includes
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let json = serde_json::to_string(&names)
            .map_err(|e| Error::SerializeJson(path.display().to_string(), e))?;
        system::write_file(path, json)
    }

    /// Headers included by `source`, from the on-disk cache when it's fresher
    /// than the source itself, otherwise freshly rescanned. The cache is
    /// plain `serde_json` rather than the original tool's binary format,
    /// since this crate already leans on `serde_json` for its own error
    /// reporting (see `Error::ParseJson`/`SerializeJson`).
    fn fetch_includes(
        &self,
        root: &Path,
        target_name: &str,
        source: &Path,
        include_dirs: &[String],
    ) -> Result<Vec<PathBuf>, Error> {
        let cache_path = self.include_cache_path(target_name, source);
        let source_abs = root.join(source);
        let source_time = system::get_modified_time(&source_abs)?;

        if cache_path.exists() {
            if let Ok(system::UpToDate::Yes) = system::is_up_to_date(&cache_path, source_time) {
                if let Ok(cached) = self.read_include_cache(&cache_path) {
                    return Ok(cached);
                }
            }
        }

        let includes = self.scan_includes(root, source, include_dirs)?;
        if let Some(parent) = cache_path.parent() {
            system::ensure_directory(parent)?;
        }
        self.write_include_cache(&cache_path, &includes)?;
        Ok(includes)
    }

    /// Compile `source` to an object file if it, any of its transitively
    /// discovered headers, or any build file in the tree is newer than the
    /// existing object. Returns the object's path either way.
    #[allow(clippy::too_many_arguments)]
    pub fn compile_if_stale(
        &self,
        root: &Path,
        target_name: &str,
        source: &Path,
        include_dirs: &[String],
        extra_flags: &[String],
        build_files: &[PathBuf],
    ) -> Result<PathBuf, Error> {
        let object = self.object_path(target_name, source);
        if let Some(parent) = object.parent() {
            system::ensure_directory(parent)?;
        }

        let source_abs = root.join(source);
        let includes = self.fetch_includes(root, target_name, source, include_dirs)?;

        let mut prerequisites: Vec<PathBuf> =
            Vec::with_capacity(includes.len() + build_files.len() + 1);
        prerequisites.push(source_abs);
        for include in &includes {
            prerequisites.push(if include.is_absolute() {
                include.clone()
            } else {
                root.join(include)
            });
        }
        prerequisites.extend(build_files.iter().cloned());

        if !system::is_any_newer_than(&prerequisites, &object)? {
            system::verboseln!("UpToDate", "{}", source.display());
            return Ok(object);
        }

        system::infoln!("Compiling", "{}", source.display());

        let (prog, rest) = split_argv(&self.compiler, "compiler")?;
        let mut args: Vec<String> = rest.to_vec();
        args.extend(self.compiler_flags.iter().cloned());
        args.extend(extra_flags.iter().cloned());
        for dir in include_dirs {
            args.push(format!("-I{dir}"));
        }
        args.push("-c".to_string());
        args.push(source.display().to_string());
        args.push("-o".to_string());
        args.push(object.display().to_string());

        let mut child = ChildBuilder::new(prog)
            .args(&args)
            .current_dir(root)
            .piped()
            .spawn()?;
        child.dump(Some("Compiling"), Some("Warn"), 1);
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::CompileError(source.display().to_string()));
        }
        Ok(object)
    }

    /// Archive `objects` into `lib<name>.a` if any object is newer than the
    /// existing archive.
    pub fn archive_if_stale(
        &self,
        root: &Path,
        objects: &[PathBuf],
        target_name: &str,
    ) -> Result<PathBuf, Error> {
        let lib_path = self.static_library_path(target_name);
        system::ensure_directory(self.lib_dir())?;

        if !system::is_any_newer_than(objects, &lib_path)? {
            system::verboseln!("UpToDate", "{}", lib_path.display());
            return Ok(lib_path);
        }

        system::infoln!("Archiving", "{}", lib_path.display());
        system::remove_file(&lib_path)?;

        let (prog, rest) = split_argv(&self.archiver, "archiver")?;
        let mut args: Vec<String> = rest.to_vec();
        args.push("rcs".to_string());
        args.push(lib_path.display().to_string());
        args.extend(objects.iter().map(|o| o.display().to_string()));

        let mut child = ChildBuilder::new(prog)
            .args(&args)
            .current_dir(root)
            .piped()
            .spawn()?;
        child.dump(Some("Archiving"), Some("Warn"), 1);
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::ArchiveError(target_name.to_string()));
        }
        Ok(lib_path)
    }

    /// Link `objects` (plus any in-tree static libraries named in
    /// `link_with`) into an application if any is newer than the existing
    /// binary. Linking is driven through the compiler, matching the
    /// configuration model: there is no separate linker binary, only
    /// `linker_flags` layered on top of the compiler invocation.
    pub fn link_if_stale(
        &self,
        root: &Path,
        objects: &[PathBuf],
        link_with: &[String],
        library_dirs: &[String],
        target_name: &str,
    ) -> Result<PathBuf, Error> {
        let app_path = self.application_path(target_name);
        system::ensure_directory(self.bin_dir())?;

        let mut prerequisites = objects.to_vec();
        for lib in link_with {
            let candidate = self.static_library_path(lib);
            if candidate.exists() {
                prerequisites.push(candidate);
            }
        }

        if !system::is_any_newer_than(&prerequisites, &app_path)? {
            system::verboseln!("UpToDate", "{}", app_path.display());
            return Ok(app_path);
        }

        system::infoln!("Linking", "{}", app_path.display());

        let (prog, rest) = split_argv(&self.compiler, "compiler")?;
        let mut args: Vec<String> = rest.to_vec();
        args.extend(objects.iter().map(|o| o.display().to_string()));
        args.push("-o".to_string());
        args.push(app_path.display().to_string());
        args.extend(self.linker_flags.iter().cloned());
        args.push(format!("-L{}", self.build_dir.display()));
        for dir in library_dirs {
            args.push(format!("-L{dir}"));
        }
        for lib in link_with {
            args.push(format!("-l{lib}"));
        }

        let mut child = ChildBuilder::new(prog)
            .args(&args)
            .current_dir(root)
            .piped()
            .spawn()?;
        child.dump(Some("Linking"), Some("Warn"), 1);
        let status = child.wait()?;
        if !status.success() {
            return Err(Error::LinkError(target_name.to_string()));
        }
        Ok(app_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Fragment;
    use crate::model::Configuration;

    fn driver(env: &Environment, build_dir: PathBuf) -> ToolchainDriver {
        let configuration = Configuration::with_defaults("__default");
        ToolchainDriver::new(env, &configuration, build_dir).unwrap()
    }

    #[test]
    fn test_object_path_preserves_nested_source_layout() {
        let mut env = Environment::new();
        env.apply_configuration("__default", &[], |_| String::new());
        let toolchain = driver(&env, PathBuf::from("/tmp/build"));
        let object = toolchain.object_path("hello", Path::new("src/foo/bar.cpp"));
        assert_eq!(
            object,
            PathBuf::from("/tmp/build/build.hello/src/foo/bar.cpp.o")
        );
    }

    #[test]
    fn test_application_path_uses_suffix() {
        let mut env = Environment::new();
        env.apply_configuration("__default", &[], |_| String::new());
        env.set(
            CONFIGURATION_SCOPE,
            "application_suffix",
            Fragment::Literal(".exe".into()),
        );
        let mut configuration = Configuration::with_defaults("__default");
        configuration.application_suffix = crate::env::Variable::literal("${application_suffix}");
        let toolchain =
            ToolchainDriver::new(&env, &configuration, PathBuf::from("/tmp/build")).unwrap();
        let path = toolchain.application_path("hello");
        assert_eq!(path, PathBuf::from("/tmp/build/hello.exe"));
    }

    #[test]
    fn test_static_library_path_format() {
        let mut env = Environment::new();
        env.apply_configuration("__default", &[], |_| String::new());
        let toolchain = driver(&env, PathBuf::from("/tmp/build"));
        assert_eq!(
            toolchain.static_library_path("util"),
            PathBuf::from("/tmp/build/libutil.a")
        );
    }

    #[test]
    fn test_split_argv_rejects_empty() {
        let err = split_argv(&[], "compiler").unwrap_err();
        assert!(matches!(err, Error::CompileError(_)));
    }
}
