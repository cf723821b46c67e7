use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use snapinator_config::EngineConfig;

#[derive(Debug, Parser)]
#[command(name = "snapinator", about = "Scheduled screenshots of web pages")]
pub struct Cli {
    /// Config document (defaults to the platform config directory).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log file (defaults to snapinator.log beside the config when running the daemon).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler until Ctrl+C.
    Run {
        #[command(flatten)]
        engine: EngineConfig,
    },
    /// Add a capture task.
    Add(AddArgs),
    /// Change fields of an existing task.
    Update(UpdateArgs),
    Remove { id: String },
    Enable { id: String },
    Disable { id: String },
    /// Show all tasks.
    List,
    /// Show run state as last recorded by the daemon.
    Status { id: Option<String> },
    /// Show global settings, or change the defaults used by new tasks.
    Settings(SettingsArgs),
    /// Capture a task once, right now (through the daemon when it is running).
    Capture {
        id: String,
        #[command(flatten)]
        engine: EngineConfig,
    },
    /// Preview upcoming trigger times of a cron expression.
    Next {
        expression: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}

/// Schedules offered by the desktop app's dropdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    EveryMinute,
    Hourly,
    Daily,
    Weekly,
}

impl Preset {
    pub fn expression(self) -> &'static str {
        match self {
            Preset::EveryMinute => "* * * * *",
            Preset::Hourly => "0 * * * *",
            Preset::Daily => "0 0 * * *",
            Preset::Weekly => "0 0 * * 0",
        }
    }
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Cron expression (5 fields, or 6 with leading seconds).
    #[arg(long, conflicts_with_all = ["preset", "at"])]
    pub cron: Option<String>,

    #[arg(long, value_enum, conflicts_with = "at")]
    pub preset: Option<Preset>,

    /// Every day at HH:MM local time.
    #[arg(long, value_parser = parse_time_of_day)]
    pub at: Option<(u32, u32)>,
}

impl ScheduleArgs {
    pub fn expression(&self) -> Option<String> {
        if let Some(cron) = &self.cron {
            return Some(cron.clone());
        }
        if let Some(preset) = self.preset {
            return Some(preset.expression().to_string());
        }
        self.at.map(|(hour, minute)| format!("{minute} {hour} * * *"))
    }
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[arg(long)]
    pub url: String,

    // Hourly when no schedule flag is given.
    #[command(flatten)]
    pub schedule: ScheduleArgs,

    /// Output directory (defaults to the configured output directory).
    #[arg(long)]
    pub output: Option<String>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    /// Capture only the viewport instead of the whole page.
    #[arg(long, default_value_t = false)]
    pub viewport_only: bool,

    /// Add the task without scheduling it.
    #[arg(long, default_value_t = false)]
    pub disabled: bool,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pub id: String,

    #[arg(long)]
    pub url: Option<String>,

    #[command(flatten)]
    pub schedule: ScheduleArgs,

    #[arg(long)]
    pub output: Option<String>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long)]
    pub full_page: Option<bool>,
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    /// Output directory for tasks added without `--output`.
    #[arg(long)]
    pub output_dir: Option<String>,

    #[arg(long)]
    pub default_width: Option<u32>,

    #[arg(long)]
    pub default_height: Option<u32>,
}

impl SettingsArgs {
    pub fn is_empty(&self) -> bool {
        self.output_dir.is_none() && self.default_width.is_none() && self.default_height.is_none()
    }
}

fn parse_time_of_day(value: &str) -> Result<(u32, u32), String> {
    let (hour, minute) = value
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got '{value}'"))?;
    let hour: u32 = hour.trim().parse().map_err(|_| format!("invalid hour '{hour}'"))?;
    let minute: u32 = minute
        .trim()
        .parse()
        .map_err(|_| format!("invalid minute '{minute}'"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{value} is not a time of day"));
    }
    Ok((hour, minute))
}
