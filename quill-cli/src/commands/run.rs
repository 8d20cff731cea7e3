//! Run and resume handlers
//!
//! Both drive a [`Sequencer`] until the pipeline completes or errors,
//! rendering every change and saving the session after each completed stage.

use anyhow::{Context, Result, bail};
use colored::*;
use quill_core::domain::pipeline::PipelineState;
use quill_core::domain::stage::PipelineDefinition;
use quill_engine::scheduler::Change;
use quill_engine::{HttpTaskRepository, OrchestratorError, ProjectSeed, Sequencer, session};
use quill_engine::{Config, TaskRepository};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::render;

/// Arguments of the `run` command
pub struct RunOptions {
    pub pipeline: Option<String>,
    pub definition: Option<PathBuf>,
    pub input: String,
    pub project: Option<String>,
    pub state_file: Option<PathBuf>,
}

/// Launch a pipeline and follow it until it completes or errors
pub async fn handle_run(options: RunOptions, config: &Config) -> Result<()> {
    let definition = load_definition(options.pipeline.as_deref(), options.definition.as_deref())?;
    let input: serde_json::Value =
        serde_json::from_str(&options.input).context("--input is not valid JSON")?;

    let mut seed = ProjectSeed::new(input);
    if let Some(project) = options.project {
        seed = seed.with_project(project);
    }

    let mut sequencer = new_sequencer(config)?;
    sequencer.launch(Arc::new(definition), seed).await?;

    drive(
        &mut sequencer,
        options.state_file.as_deref(),
        tokio::signal::ctrl_c(),
    )
    .await
}

/// Resume a saved session from its first stage without a result
pub async fn handle_resume(
    state_file: &Path,
    pipeline: Option<String>,
    definition: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let persisted = session::load(state_file).await?;
    let name = pipeline.unwrap_or_else(|| persisted.pipeline.clone());
    let definition = load_definition(Some(&name), definition.as_deref())?;

    info!(
        "Resuming '{}' for project {} ({} completed stage(s))",
        definition.name,
        persisted.project_id,
        persisted.results.len()
    );

    let mut sequencer = new_sequencer(config)?;
    sequencer.resume(Arc::new(definition), persisted).await?;

    if sequencer.store().state() == PipelineState::Completed {
        println!("{}", "Every stage already has a result.".yellow());
        return Ok(());
    }

    drive(&mut sequencer, Some(state_file), tokio::signal::ctrl_c()).await
}

fn new_sequencer(config: &Config) -> Result<Sequencer> {
    let repository: Arc<dyn TaskRepository> = Arc::new(HttpTaskRepository::from_config(config)?);
    Ok(Sequencer::new(repository, config))
}

/// A definition file wins over a built-in name
fn load_definition(name: Option<&str>, file: Option<&Path>) -> Result<PipelineDefinition> {
    if let Some(path) = file {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(PipelineDefinition::from_json(&source)?);
    }

    match name {
        Some(name) => Ok(PipelineDefinition::builtin(name)?),
        None => bail!("either --pipeline or --definition is required"),
    }
}

/// Follows the pipeline until it stops or `interrupt` resolves
///
/// `interrupt` lives for the whole loop so a signal delivered between two
/// changes is still observed.
async fn drive<F>(sequencer: &mut Sequencer, state_file: Option<&Path>, interrupt: F) -> Result<()>
where
    F: Future,
{
    tokio::pin!(interrupt);

    if let Some(snapshot) = sequencer.store().snapshot() {
        render::print_snapshot(&snapshot);
        println!();
    }

    loop {
        let next = tokio::select! {
            change = sequencer.next_change() => Some(change),
            _ = &mut interrupt => None,
        };

        let Some(change) = next else {
            // Polling stops before the instance is discarded
            sequencer.reset();
            println!("{}", "Interrupted; pipeline reset.".yellow());
            bail!("interrupted");
        };

        match change? {
            None => break,
            Some(Change::Ignored) => {}
            Some(Change::Progress) => println!("{}", render::progress_line(sequencer.store())),
            Some(Change::Advanced { completed, .. }) => {
                println!("  {} {} completed", "✓".green(), completed.bold());
                save(sequencer, state_file).await;
                if sequencer.store().state() == PipelineState::Running {
                    println!("{}", render::progress_line(sequencer.store()));
                }
            }
            Some(Change::Failed(failure)) => {
                println!(
                    "  {} {} failed: {}",
                    "✗".red(),
                    failure.stage_id.bold(),
                    failure.reason.to_string().red()
                );
            }
        }
    }

    println!();
    if let Some(snapshot) = sequencer.store().snapshot() {
        render::print_snapshot(&snapshot);
    }

    match sequencer.store().state() {
        PipelineState::Completed => {
            print_results(sequencer);
            Ok(())
        }
        PipelineState::Errored => {
            save(sequencer, state_file).await;
            if let Some(path) = state_file {
                println!(
                    "{}",
                    format!("Retry with: quill resume --state-file {}", path.display()).dimmed()
                );
            }
            let err = sequencer
                .store()
                .failure()
                .map(OrchestratorError::from)
                .unwrap_or_else(|| OrchestratorError::InvalidState("pipeline errored".into()));
            Err(err.into())
        }
        state => bail!("pipeline stopped in state {}", state),
    }
}

async fn save(sequencer: &Sequencer, state_file: Option<&Path>) {
    let (Some(path), Some(persisted)) = (state_file, sequencer.store().to_persisted()) else {
        return;
    };

    if let Err(e) = session::save(path, &persisted).await {
        warn!("Failed to save session: {}", e);
    }
}

fn print_results(sequencer: &Sequencer) {
    let Some(results) = sequencer.store().results() else {
        return;
    };

    println!("\n{}", "Results:".bold());
    for (stage_id, result) in results {
        let text = serde_json::to_string(result).unwrap_or_else(|_| result.to_string());
        let text = if text.chars().count() > 100 {
            format!("{}...", text.chars().take(100).collect::<String>())
        } else {
            text
        };
        println!("  {} = {}", stage_id.cyan(), text);
    }
}
