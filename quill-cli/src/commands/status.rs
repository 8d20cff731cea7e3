//! Task status lookup

use anyhow::{Context, Result};
use colored::*;
use quill_engine::{Config, HttpTaskRepository};

use crate::render::colorize_task_status;

/// Fetch a task status once and print it
pub async fn show_status(task_id: &str, config: &Config) -> Result<()> {
    // Same client setup as a pipeline run, request timeout included
    let repository = HttpTaskRepository::from_config(config)?;
    let status = repository
        .client()
        .task_status(task_id)
        .await
        .with_context(|| format!("Failed to fetch status of task {}", task_id))?;

    println!("{}", "Task Details:".bold());
    println!("  ID:       {}", task_id.cyan());
    println!("  Status:   {}", colorize_task_status(status.status));
    if status.total > 0 {
        println!("  Progress: {}/{}", status.current, status.total);
    }
    if !status.message.is_empty() {
        println!("  Message:  {}", status.message);
    }

    if let Some(result) = &status.result {
        println!("\n{}", "Result:".bold());
        match serde_json::to_string_pretty(result) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{:?}", result),
        }
    }

    if let Some(error) = &status.error {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }

    Ok(())
}
