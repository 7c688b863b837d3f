//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::domain::models::{RunResultRecord, RunStatus};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({ "error": format!("{err:#}") });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
    }
    std::process::exit(1)
}

/// Truncate a string to a maximum length, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Passed => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Pending => Color::Yellow,
    }
}

fn colors_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none() && console::colors_enabled()
}

/// Table of persisted results, one row per run.
pub fn results_table(records: &[RunResultRecord]) -> String {
    let use_colors = colors_enabled();
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(
        ["Team", "Leader", "Status", "Score", "Fixes", "Retries", "Time (s)", "Branch", "PR"]
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
    );

    for record in records {
        let status = Cell::new(record.final_status.to_string());
        let status = if use_colors {
            status.fg(status_color(record.final_status))
        } else {
            status
        };
        table.add_row(vec![
            Cell::new(&record.team_name),
            Cell::new(&record.leader_name),
            status,
            Cell::new(record.final_score),
            Cell::new(record.fixes_applied.len()),
            Cell::new(record.retry_count),
            Cell::new(format!("{:.1}", record.total_time)),
            Cell::new(truncate(&record.branch_name, 40)),
            Cell::new(record.pr_url.as_deref().unwrap_or("-")),
        ]);
    }

    table.to_string()
}

/// Human breakdown of one finished run.
pub fn run_summary(record: &RunResultRecord) -> String {
    let status = if colors_enabled() {
        match record.final_status {
            RunStatus::Passed => console::style(record.final_status.to_string()).green().bold(),
            _ => console::style(record.final_status.to_string()).red().bold(),
        }
        .to_string()
    } else {
        record.final_status.to_string()
    };

    let mut lines = vec![
        format!("Run {} for {} ({})", record.run_id, record.team_name, record.repo_url),
        format!("Status:             {status}"),
        format!("Branch:             {}", record.branch_name),
        format!("Iterations used:    {}", record.retry_count),
        format!("Total time:         {:.1}s", record.total_time),
        String::new(),
        format!("Base score:         {}", record.base_score),
        format!("Speed bonus:        +{}", record.speed_bonus),
        format!("Efficiency penalty: -{}", record.efficiency_penalty),
        format!("Final score:        {}", record.final_score),
    ];
    if let Some(url) = &record.pr_url {
        lines.push(format!("Pull request:       {url}"));
    }
    if !record.fixes_applied.is_empty() {
        lines.push(String::new());
        lines.push(format!("Fixes applied ({}):", record.fixes_applied.len()));
        for fix in &record.fixes_applied {
            lines.push(format!(
                "  - {}:{} [{}] {}",
                fix.path,
                fix.line,
                fix.bug_type,
                truncate(&fix.description, 80)
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer branch name", 10), "a longe...");
        assert_eq!(truncate("ééééééé", 5), "éé...");
    }
}
