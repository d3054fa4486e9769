//! Build-file discovery
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::system::Error;

/// The extension recognised for build files.
pub const BUILD_FILE_EXT: &str = "pake";

/// The name of the build root directory, relative to the project directory.
pub const BUILD_ROOT: &str = "__build";

/// Walk `root` and collect every build file, skipping anything under the build root.
///
/// Matches the eager, whole-tree discovery the reference implementation performs once at
/// startup: every `.pake` file anywhere under the working directory is a module.
pub fn discover_build_files(root: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_entry(|e| {
        if e.file_type().is_dir() {
            e.file_name() != BUILD_ROOT
        } else {
            true
        }
    }) {
        let entry = entry.map_err(|e| {
            Error::ReadFile(
                root.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::Other, e),
            )
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|x| x.to_str()) == Some(BUILD_FILE_EXT)
        {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
