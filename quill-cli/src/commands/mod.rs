//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipelines;
mod run;
mod status;

use anyhow::Result;
use clap::Subcommand;
use quill_engine::Config;
use std::path::PathBuf;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List the built-in pipelines and their stages
    Pipelines,
    /// Launch a pipeline and follow it to the end
    Run {
        /// Name of a built-in pipeline
        #[arg(long, required_unless_present = "definition")]
        pipeline: Option<String>,

        /// Load the pipeline definition from a JSON file instead
        #[arg(long)]
        definition: Option<PathBuf>,

        /// Launch payload, as JSON
        #[arg(long, default_value = "{}")]
        input: String,

        /// Project id to start with (generated when absent)
        #[arg(long)]
        project: Option<String>,

        /// Save the session here after every completed stage
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Continue a saved session from its first unfinished stage
    Resume {
        /// Session file written by `run`
        #[arg(long)]
        state_file: PathBuf,

        /// Built-in pipeline to use instead of the one named in the session
        #[arg(long)]
        pipeline: Option<String>,

        /// Load the pipeline definition from a JSON file instead
        #[arg(long)]
        definition: Option<PathBuf>,
    },
    /// Show the status of a remote task
    Status {
        /// Task id returned by a stage-start call
        task_id: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipelines => pipelines::list_pipelines(),
        Commands::Run {
            pipeline,
            definition,
            input,
            project,
            state_file,
        } => {
            let options = run::RunOptions {
                pipeline,
                definition,
                input,
                project,
                state_file,
            };
            run::handle_run(options, config).await
        }
        Commands::Resume {
            state_file,
            pipeline,
            definition,
        } => run::handle_resume(&state_file, pipeline, definition, config).await,
        Commands::Status { task_id } => status::show_status(&task_id, config).await,
    }
}
