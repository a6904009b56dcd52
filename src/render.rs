//! Plain-text rendering of a dashboard snapshot for the terminal.

use chrono::{DateTime, Utc};

use alva_core::{ActivityEvent, StepStatus, Task, TaskStep, ThoughtEvent, ThoughtType};
use alva_state::format::{clock_time, duration_minutes, duration_ms, relative_time};
use alva_state::{DashboardSnapshot, DerivedState, StepTree};

const ACTIVITY_ROWS: usize = 10;
const THOUGHT_ROWS: usize = 8;
const BAR_WIDTH: usize = 20;

pub fn dashboard(snapshot: &DashboardSnapshot, now: DateTime<Utc>) -> String {
    if snapshot.loading {
        return "Loading dashboard...\n".to_string();
    }
    let derived = snapshot.derive(now);
    let mut lines = header(&derived, now);

    lines.push(String::new());
    lines.extend(focus(snapshot));
    lines.push(String::new());
    lines.extend(pipeline(snapshot));
    lines.push(String::new());
    lines.extend(activity(snapshot.collections.activities(), now));

    if !snapshot.stale_feeds.is_empty() {
        let names: Vec<&str> = snapshot.stale_feeds.iter().map(|t| t.as_str()).collect();
        lines.push(String::new());
        lines.push(format!("! not live: {}", names.join(", ")));
    }
    if !snapshot.pending.is_empty() {
        lines.push(format!(
            "... waiting on {} create(s), {} delete(s)",
            snapshot.pending.creates().len(),
            snapshot.pending.deletes().len()
        ));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn header(derived: &DerivedState<'_>, now: DateTime<Utc>) -> Vec<String> {
    let last = derived
        .last_active
        .map_or_else(|| "never".to_string(), |at| relative_time(at, now));
    let stats = &derived.stats;
    let mut remaining = String::new();
    if stats.estimated_minutes_remaining > 0 {
        remaining = format!(" · ~{} left", duration_minutes(stats.estimated_minutes_remaining));
    }
    vec![
        format!("Alva [{}] · last active {last}", derived.status),
        format!(
            "{} in progress · {} pending · {} done{remaining}",
            stats.in_progress, stats.pending, stats.completed
        ),
    ]
}

fn focus(snapshot: &DashboardSnapshot) -> Vec<String> {
    let Some(task) = snapshot.focus_task() else {
        return vec!["NOW  nothing in progress".to_string()];
    };
    let tree = snapshot.step_tree(&task.id);
    let mut lines = vec![format!("NOW  {}", task.title)];
    if !tree.is_empty() {
        lines.push(format!(
            "     {} {}% ({}/{} steps)",
            progress_bar(tree.progress_percent()),
            tree.progress_percent(),
            tree.completed,
            tree.total
        ));
        lines.extend(step_lines(&tree));
    }

    let thoughts = snapshot.focus_thoughts();
    if !thoughts.is_empty() {
        lines.push("     thoughts:".to_string());
        let skip = thoughts.len().saturating_sub(THOUGHT_ROWS);
        lines.extend(thoughts.iter().skip(skip).map(|t| thought_line(t)));
    }
    lines
}

fn step_lines(tree: &StepTree<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    for milestone in &tree.milestones {
        lines.push(format!("     {} {}", step_marker(milestone.step), milestone.step.title));
        for sub in &milestone.substeps {
            lines.push(format!("         {} {}", step_marker(sub), sub.title));
        }
    }
    for orphan in &tree.orphans {
        lines.push(format!("     {} {}", step_marker(orphan), orphan.title));
    }
    lines
}

fn step_marker(step: &TaskStep) -> &'static str {
    match step.status {
        StepStatus::Completed => "[x]",
        StepStatus::InProgress => "[>]",
        StepStatus::Skipped => "[-]",
        StepStatus::Pending => "[ ]",
    }
}

fn thought_line(thought: &ThoughtEvent) -> String {
    let mut line = format!(
        "       {} {:<9} {}",
        clock_time(thought.created_at),
        thought_label(thought.thought_type),
        thought.content
    );
    match (&thought.tool_used, thought.duration_ms) {
        (Some(tool), Some(ms)) => line.push_str(&format!(" ({tool}, {})", duration_ms(ms))),
        (Some(tool), None) => line.push_str(&format!(" ({tool})")),
        (None, Some(ms)) => line.push_str(&format!(" ({})", duration_ms(ms))),
        (None, None) => {}
    }
    line
}

fn thought_label(kind: ThoughtType) -> &'static str {
    match kind {
        ThoughtType::Thinking => "thinking",
        ThoughtType::Planning => "planning",
        ThoughtType::Executing => "executing",
        ThoughtType::ToolCall => "tool",
        ThoughtType::Result => "result",
        ThoughtType::Decision => "decision",
        ThoughtType::Error => "error",
    }
}

fn pipeline(snapshot: &DashboardSnapshot) -> Vec<String> {
    let pipeline = snapshot.pipeline();
    if pipeline.is_empty() {
        return vec!["TASKS  none yet".to_string()];
    }
    let mut lines = vec!["TASKS".to_string()];
    let groups = [
        ("in progress", &pipeline.in_progress),
        ("pending", &pipeline.pending),
        ("recently completed", &pipeline.recently_completed),
    ];
    for (label, tasks) in groups {
        if tasks.is_empty() {
            continue;
        }
        lines.push(format!("  {label}"));
        lines.extend(tasks.iter().map(|t| task_line(t)));
    }
    lines
}

fn task_line(task: &Task) -> String {
    let mut line = format!("    p{} {}", task.priority, task.title);
    if let Some(minutes) = task.estimated_minutes {
        line.push_str(&format!(" (~{})", duration_minutes(minutes)));
    }
    line.push_str(&format!("  [{}]", task.id));
    line
}

fn activity(activities: &[ActivityEvent], now: DateTime<Utc>) -> Vec<String> {
    if activities.is_empty() {
        return vec!["ACTIVITY  nothing yet".to_string()];
    }
    let mut lines = vec!["ACTIVITY".to_string()];
    lines.extend(activities.iter().take(ACTIVITY_ROWS).map(|a| {
        format!(
            "  {} {:<14} {}  ({})",
            clock_time(a.created_at),
            a.action,
            a.summary,
            relative_time(a.created_at, now)
        )
    }));
    lines
}

fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100)) * BAR_WIDTH / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}
