//! CLI command definitions using clap.
//!
//! - run: drive a project's build loop in the foreground
//! - status: show a project's persisted loop status
//! - limit: print the iteration budget for a backlog size

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use speclooper::domain::{Project, ProjectId};

/// Speclooper - runs an agent over a project's backlog until the work is done
#[derive(Parser, Debug)]
#[command(name = "speclooper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the build loop for a project until it completes, fails or is stopped
    Run {
        /// Project directory
        project_dir: PathBuf,

        /// Project ID (defaults to the directory name)
        #[arg(long)]
        id: Option<String>,

        /// Override the computed iteration budget
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,
    },

    /// Show the loop status of a project
    Status {
        /// Project directory
        project_dir: PathBuf,

        /// Project ID (defaults to the directory name)
        #[arg(long)]
        id: Option<String>,
    },

    /// Print the iteration budget for a number of incomplete stories
    Limit {
        incomplete: u32,

        /// Stories added since the backlog was counted
        #[arg(short, long, default_value_t = 0)]
        added: u32,
    },
}

/// Resolve the project a command targets
pub fn project_for(project_dir: &Path, id: Option<&str>) -> Project {
    match id {
        Some(id) => Project::new(ProjectId::new(id), project_dir),
        None => {
            // Resolve "." and friends so the ID is the real directory name.
            let root = project_dir.canonicalize().unwrap_or_else(|_| project_dir.to_path_buf());
            Project::from_root(root)
        }
    }
}
