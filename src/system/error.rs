//! Error types

use std::process::ExitStatus;

use crate::system;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // fs
    #[error("Cannot find `{0}`")]
    NotFound(String),
    #[error("Invalid path `{0}`: {1}")]
    InvalidPath(String, std::io::Error),
    #[error("Cannot read file `{0}`: {1}")]
    ReadFile(String, std::io::Error),
    #[error("Cannot write file `{0}`: {1}")]
    WriteFile(String, std::io::Error),
    #[error("Cannot remove file `{0}`: {1}")]
    RemoveFile(String, std::io::Error),
    #[error("Cannot create directory `{0}`: {1}")]
    CreateDirectory(String, std::io::Error),
    #[error("Cannot remove directory `{0}`: {1}")]
    RemoveDirectory(String, std::io::Error),
    #[error("Cannot set modified time for file `{0}`: {1}")]
    SetModifiedTime(String, std::io::Error),

    // process
    #[error("error spawning `{0}`: {1}")]
    SpawnChild(String, std::io::Error),
    #[error("error executing `{0}`: {1}")]
    WaitForChild(String, std::io::Error),

    // build files: lexing and parsing
    #[error("{0}:{1}:{2}: {3}")]
    LexError(String, usize, usize, String),
    #[error("{0}:{1}:{2}: {3}")]
    ParseError(String, usize, usize, String),

    // variable environment
    #[error("no such scope: `{0}`")]
    UnknownScope(String),
    #[error("no such variable `{1}` in scope `{0}`")]
    UnknownVariable(String, String),

    // targets and configurations
    #[error("no such target: `{0}`")]
    UnknownTarget(String),
    #[error("target `{0}` is already defined")]
    DuplicateTarget(String),
    #[error("target `{0}` is not visible in configuration `{1}`")]
    TargetNotVisible(String, String),
    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),
    #[error("no such configuration: `{0}`")]
    UnknownConfiguration(String),

    // toolchain
    #[error("one or more object files failed to compile in target `{0}`. Please check the errors above.")]
    CompileError(String),
    #[error("archiving `{0}` failed")]
    ArchiveError(String),
    #[error("linking `{0}` failed")]
    LinkError(String),
    #[error("hook command `{0}` exited with status `{1}`")]
    HookError(String, ExitStatus),

    #[error("Cannot parse build file cache `{0}`: {1}")]
    ParseJson(String, serde_json::Error),
    #[error("Cannot serialize build file cache `{0}`: {1}")]
    SerializeJson(String, serde_json::Error),
}

impl Error {
    pub fn print(&self) {
        system::errorln!("Fatal", "{}", self);
    }
}
