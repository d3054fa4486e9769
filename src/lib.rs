//! Command-line entry point: parses arguments, loads the project's build
//! files into a `World`, and hands off to the orchestrator.

use std::path::Path;

use clap::{Parser, Subcommand};

pub mod build;
pub mod env;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod system;
pub mod toolchain;
pub mod world;

use crate::build::BuildOptions;
use crate::system::{Error, PathExt};
use crate::world::World;

/// A declarative, parallel build tool for C/C++ projects described by
/// `.pake` files.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Project root (where the `.pake` files live).
    #[clap(short('C'), long, default_value = ".")]
    pub dir: String,

    /// Targets to build. With none given and `--all` absent, prints a
    /// summary of discovered targets and configurations instead of building.
    pub targets: Vec<String>,

    /// Build every target visible in the selected configuration.
    #[clap(short, long)]
    pub all: bool,

    /// Configuration to build with.
    #[clap(short, long, default_value = "__default")]
    pub config: String,

    /// Number of compile jobs to run in parallel.
    #[clap(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Print verbose output, including up-to-date checks and subprocess commands.
    #[clap(short, long)]
    pub verbose: bool,

    /// Suppress non-error status output.
    #[clap(short, long)]
    pub quiet: bool,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Remove build output.
    Clean {
        /// Remove output for every configuration, not just the selected one.
        #[clap(short, long)]
        all: bool,
    },
}

impl Cli {
    pub fn run(&self) -> Result<(), Error> {
        if self.verbose || std::env::var("DEBUG").is_ok() {
            system::enable_verbose();
        }
        if self.quiet {
            system::enable_quiet();
        }

        let root = Path::new(&self.dir).canonicalize2()?;

        match &self.command {
            Some(Command::Clean { all }) => {
                let configuration = if *all { None } else { Some(self.config.as_str()) };
                build::clean(&root, configuration)
            }
            None => self.build(&root),
        }
    }

    fn build(&self, root: &Path) -> Result<(), Error> {
        let world = World::load(root)?;

        if self.targets.is_empty() && !self.all {
            print_summary(&world);
            return Ok(());
        }

        let options = BuildOptions {
            configuration: self.config.clone(),
            jobs: self.jobs,
        };
        let mut controller = build::Controller::new(world, &options)?;

        if self.all {
            controller.build_all()
        } else {
            for target in &self.targets {
                controller.build(target)?;
            }
            Ok(())
        }
    }
}

fn print_summary(world: &World) {
    system::infoln!("Targets", "{}", world.targets.names().collect::<Vec<_>>().join(", "));
    system::infoln!(
        "Configurations",
        "{}",
        world.configurations.names().collect::<Vec<_>>().join(", ")
    );
    system::hintln!("Hint", "pass target names, or --all, to build");
}
