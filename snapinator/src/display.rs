use std::collections::BTreeMap;

use chrono::{DateTime, Local, Utc};
use snapinator_config::Settings;
use snapinator_models::{
    core::Task,
    runs::{RunState, RunStatus},
};
use snapinator_scheduler::{CronSchedule, RunOwner};

pub fn print_task(task: &Task) {
    println!("  url:      {}", task.url);
    println!("  schedule: {}", task.cron_schedule);
    println!("  output:   {}", task.output_path);
    println!(
        "  size:     {}x{}{}",
        task.width,
        task.height,
        if task.full_page { " (full page)" } else { "" }
    );
    println!("  enabled:  {}", task.enabled);
}

pub fn print_settings(settings: &Settings) {
    println!("  output directory: {}", settings.output_directory);
    println!(
        "  default size:     {}x{}",
        settings.default_width, settings.default_height
    );
    println!(
        "  window:           {}x{}",
        settings.window_width, settings.window_height
    );
    println!("  dark mode:        {}", yes_no(settings.dark_mode));
}

pub fn render_owner(owner: Option<&RunOwner>) {
    match owner {
        Some(owner) => println!(
            "Run state held by snapinator {} (pid {}), last heartbeat {}",
            owner.role,
            owner.pid,
            human_time(Some(owner.heartbeat_at))
        ),
        None => println!("No snapinator daemon is running."),
    }
}

pub fn render_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks configured.");
        return;
    }

    let headers = ["id", "enabled", "schedule", "size", "url", "output"];
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|task| {
            vec![
                task.id.clone(),
                yes_no(task.enabled),
                task.cron_schedule.clone(),
                format!("{}x{}", task.width, task.height),
                truncate_cell(&task.url, 48),
                truncate_cell(&task.output_path, 32),
            ]
        })
        .collect();
    print_table(&headers, &rows);
}

pub fn render_status(tasks: &[Task], states: &BTreeMap<String, RunState>) {
    if tasks.is_empty() {
        println!("No tasks configured.");
        return;
    }

    let headers = ["id", "status", "last run", "next run", "runs", "last error"];
    let idle = RunState::default();
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|task| {
            let state = states.get(&task.id).unwrap_or(&idle);
            vec![
                task.id.clone(),
                status_label(task, state),
                human_time(state.last_run_at),
                if task.enabled {
                    human_time(state.next_run_at)
                } else {
                    "-".to_string()
                },
                state.history.len().to_string(),
                state
                    .last_error
                    .as_deref()
                    .map(|err| truncate_cell(err, 48))
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&headers, &rows);
}

pub fn render_task_status(task: &Task, state: &RunState) {
    println!("Task {}", task.id);
    print_task(task);
    println!("  status:   {}", status_label(task, state));
    println!("  last run: {}", human_time(state.last_run_at));
    println!("  next run: {}", human_time(state.next_run_at));
    if let Some(err) = &state.last_error {
        println!("  error:    {}", err);
    }
    if state.history.is_empty() {
        return;
    }

    println!();
    let headers = ["started", "trigger", "status", "took", "result"];
    let rows: Vec<Vec<String>> = state
        .history
        .iter()
        .rev()
        .map(|record| {
            vec![
                human_time(Some(record.started_at)),
                record.trigger.to_string(),
                record.status.to_string(),
                format!("{:.1}s", record.duration_ms() as f64 / 1000.0),
                record
                    .artifact
                    .as_deref()
                    .or(record.error.as_deref())
                    .map(|value| truncate_cell(value, 60))
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&headers, &rows);
}

pub fn render_upcoming(schedule: &CronSchedule, upcoming: &[DateTime<Local>]) {
    println!("Next triggers for '{}':", schedule);
    for instant in upcoming {
        println!("  {}", instant.format("%Y-%m-%d %H:%M:%S %a"));
    }
}

pub fn status_label(task: &Task, state: &RunState) -> String {
    match (task.enabled, state.status) {
        (false, RunStatus::Running) => "running (disabled)".to_string(),
        (false, _) => "disabled".to_string(),
        (true, status) => status.to_string(),
    }
}

fn yes_no(value: bool) -> String {
    let label = if value { "yes" } else { "no" };
    label.to_string()
}

fn truncate_cell(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    let mut out: String = value.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|v| v.len()).collect();
    for row in rows {
        for (idx, value) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(value.chars().count());
        }
    }

    print_border('╔', '╦', '╗', &widths);
    print_row(
        &headers.iter().map(|v| (*v).to_string()).collect::<Vec<_>>(),
        &widths,
    );
    print_border('╠', '╬', '╣', &widths);
    for row in rows {
        print_row(row, &widths);
    }
    print_border('╚', '╩', '╝', &widths);
}

fn print_border(left: char, middle: char, right: char, widths: &[usize]) {
    print!("{}", left);
    for (idx, width) in widths.iter().enumerate() {
        print!("{}", "═".repeat(*width + 2));
        if idx + 1 == widths.len() {
            print!("{}", right);
        } else {
            print!("{}", middle);
        }
    }
    println!();
}

fn print_row(values: &[String], widths: &[usize]) {
    print!("║");
    for (idx, value) in values.iter().enumerate() {
        let padding = widths[idx].saturating_sub(value.chars().count());
        print!(" {}{} ║", value, " ".repeat(padding));
    }
    println!();
}

fn human_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_cells_are_truncated() {
        assert_eq!(truncate_cell("short", 10), "short");
        assert_eq!(truncate_cell("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn disabled_tasks_say_so() {
        let task = Task {
            id: "t".into(),
            url: "https://example.com".into(),
            cron_schedule: "0 * * * *".into(),
            output_path: "/tmp".into(),
            width: 1,
            height: 1,
            full_page: true,
            enabled: false,
            extra: Default::default(),
        };
        let mut state = RunState::default();
        state.status = RunStatus::Failed;
        assert_eq!(status_label(&task, &state), "disabled");
        assert_eq!(human_time(None), "-");
    }
}
