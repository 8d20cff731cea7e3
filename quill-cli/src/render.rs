//! Terminal rendering of pipeline state

use colored::*;
use quill_core::domain::pipeline::PipelineState;
use quill_core::domain::task::TaskStatus;
use quill_engine::OrchestrationStore;
use quill_engine::store::{PipelineSnapshot, StageStatus};

const BAR_WIDTH: usize = 30;

/// Print the stage list with per-stage status
pub fn print_snapshot(snapshot: &PipelineSnapshot) {
    println!(
        "{} {} {}",
        "Pipeline".bold(),
        snapshot.pipeline.cyan(),
        format!("(project {})", snapshot.project_id).dimmed()
    );
    println!("{}", "─".repeat(80).dimmed());

    let total = snapshot.stages.len();
    for view in &snapshot.stages {
        let marker = match view.status {
            StageStatus::Completed => "✓".green(),
            StageStatus::Failed => "✗".red(),
            StageStatus::Active => "▸".cyan(),
            StageStatus::Pending => "·".dimmed(),
        };
        println!(
            "  {} [{}/{}] {:<12} {}",
            marker,
            view.stage.position + 1,
            total,
            view.stage.id,
            view.stage.title.dimmed()
        );
        if let Some(error) = &view.error {
            println!("      {}", error.red());
        }
    }

    println!("{}", "─".repeat(80).dimmed());
    println!(
        "  State: {}   {}",
        colorize_state(snapshot.state),
        format_progress(snapshot.progress)
    );
}

/// One-line progress report for the active stage
pub fn progress_line(store: &OrchestrationStore) -> String {
    let Some(stage) = store.current_stage() else {
        return format_progress(store.overall_progress());
    };
    let total = store.instance().map(|i| i.definition.len()).unwrap_or(0);

    let mut line = format!(
        "{} [{}/{}] {} {}",
        "▸".cyan(),
        stage.position + 1,
        total,
        stage.id.bold(),
        format_progress(store.overall_progress())
    );

    if let Some(record) = store.active_record() {
        line.push_str(&format!("  {}", colorize_task_status(record.status)));
        if record.total > 0 {
            line.push_str(&format!(" {}/{}", record.current, record.total));
        }
        if !record.message.is_empty() {
            line.push_str(&format!("  {}", record.message.dimmed()));
        }
    }

    if let Some(minutes) = store.eta_minutes() {
        line.push_str(&format!("  {}", format_eta(minutes).dimmed()));
    }

    line
}

pub fn colorize_state(state: PipelineState) -> ColoredString {
    let s = state.to_string();
    match state {
        PipelineState::Idle => s.dimmed(),
        PipelineState::AwaitingStart => s.yellow(),
        PipelineState::Running => s.cyan(),
        PipelineState::Completed => s.green(),
        PipelineState::Errored => s.red(),
    }
}

pub fn colorize_task_status(status: TaskStatus) -> ColoredString {
    let s = format!("{:?}", status).to_lowercase();
    match status {
        TaskStatus::Pending => s.yellow(),
        TaskStatus::Running => s.cyan(),
        TaskStatus::Success => s.green(),
        TaskStatus::Failure => s.red(),
    }
}

fn format_progress(percent: f64) -> String {
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).round() as usize;
    let filled = filled.min(BAR_WIDTH);
    format!(
        "[{}{}] {:>5.1}%",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        percent
    )
}

fn format_eta(minutes: f64) -> String {
    if minutes < 1.0 {
        format!("~{}s left", (minutes * 60.0).round() as u64)
    } else {
        format!("~{:.1} min left", minutes)
    }
}
