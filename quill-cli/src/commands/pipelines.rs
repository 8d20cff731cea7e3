//! Pipeline listing

use anyhow::Result;
use colored::*;
use quill_core::domain::stage::{BUILTIN_PIPELINES, PipelineDefinition, StageInput};

/// Print every built-in pipeline with its stages
pub fn list_pipelines() -> Result<()> {
    println!(
        "{}",
        format!("{} built-in pipeline(s):", BUILTIN_PIPELINES.len()).bold()
    );
    println!();

    for name in BUILTIN_PIPELINES {
        let definition = PipelineDefinition::builtin(name)?;
        print_definition(&definition);
    }

    Ok(())
}

fn print_definition(definition: &PipelineDefinition) {
    println!(
        "  {} {} {}",
        "▸".cyan(),
        definition.name.bold(),
        format!("(/api/{})", definition.domain).dimmed()
    );

    for stage in &definition.stages {
        let source = match &stage.input {
            StageInput::Launch => "launch input".to_string(),
            StageInput::Stage(id) => format!("result of {}", id),
        };
        println!(
            "    {}. {:<12} {}  {}",
            stage.position + 1,
            stage.id.cyan(),
            stage.title,
            format!("<- {}", source).dimmed()
        );
    }
    println!();
}
