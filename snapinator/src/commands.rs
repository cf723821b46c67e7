use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Local, Utc};
use log::{error, info, warn};
use snapinator_capture::{CaptureExecutor, CaptureOptions, WebDriverBackend};
use snapinator_config::{EngineConfig, paths};
use snapinator_models::{
    core::TaskSpec,
    errors::{RuntimeError, SendableError, codes},
    runs::{RunOutcome, RunStatus, RunTrigger},
};
use snapinator_scheduler::{
    Admission, CronSchedule, OwnerRole, RegistryError, RequestInbox, RunCoordinator, RunSnapshot,
    Scheduler, SchedulerState, TaskRegistry, coordinator::HEARTBEAT_INTERVAL, scheduler_loop,
};
use tokio::{sync::Notify, time};

use crate::{
    cli::{AddArgs, Preset, SettingsArgs, UpdateArgs},
    display,
};

fn open_registry(config: &Path) -> Result<TaskRegistry, SendableError> {
    Ok(TaskRegistry::open(config)?)
}

/// Maps a missing task to the coded error the CLI reports.
fn lookup_error(err: RegistryError) -> SendableError {
    match err {
        RegistryError::NotFound { id } => {
            RuntimeError::new(codes::TASK_NOT_FOUND, format!("no task with id {id}")).boxed()
        }
        other => Box::new(other),
    }
}

/// The run-state snapshot as last written. Runs of an owner whose lease ran
/// out are shown as interrupted; the file itself is left alone.
fn recorded_run_state(config: &Path, now: DateTime<Utc>) -> RunSnapshot {
    let path = paths::run_state_path(config);
    let mut snapshot = match RunSnapshot::load(&path) {
        Ok(snapshot) => snapshot.unwrap_or_default(),
        Err(err) => {
            warn!("Ignoring run state snapshot: {}", err);
            RunSnapshot::default()
        }
    };
    snapshot.settle(now);
    snapshot
}

fn busy_error(task_id: &str) -> SendableError {
    RuntimeError::new(
        codes::CAPTURE_BUSY,
        format!("task {task_id} is already being captured"),
    )
    .boxed()
}

/// Refuses to start a second process writing the same run state.
fn ensure_unowned(config: &Path, now: DateTime<Utc>) -> Result<(), SendableError> {
    match recorded_run_state(config, now).live_owner(now) {
        Some(owner) => Err(RuntimeError::new(
            codes::DAEMON_RUNNING,
            format!(
                "run state is held by snapinator {} (pid {}) until {}",
                owner.role, owner.pid, owner.lease_expires_at
            ),
        )
        .boxed()),
        None => Ok(()),
    }
}

/// Where a manual capture runs.
#[derive(Debug, PartialEq)]
enum ManualRoute {
    /// No live process owns the run state; capture here.
    Local,
    /// Handed to the running daemon through its request inbox.
    Queued(PathBuf),
}

fn route_manual_capture(
    config: &Path,
    task_id: &str,
    now: DateTime<Utc>,
) -> Result<ManualRoute, SendableError> {
    let snapshot = recorded_run_state(config, now);
    let Some(owner) = snapshot.live_owner(now) else {
        return Ok(ManualRoute::Local);
    };
    if snapshot
        .tasks
        .get(task_id)
        .is_some_and(|state| state.status == RunStatus::Running)
    {
        return Err(busy_error(task_id));
    }

    match owner.role {
        OwnerRole::Daemon => {
            let inbox = RequestInbox::new(paths::capture_requests_dir(config));
            Ok(ManualRoute::Queued(inbox.submit(task_id)?))
        }
        OwnerRole::Capture => Err(RuntimeError::new(
            codes::CAPTURE_BUSY,
            format!(
                "another snapinator capture (pid {}) is recording runs; try again when it finishes",
                owner.pid
            ),
        )
        .boxed()),
    }
}

fn build_executor(engine: &EngineConfig) -> Result<CaptureExecutor, SendableError> {
    let backend = WebDriverBackend::new(&engine.webdriver_url, engine.browser)?;
    Ok(CaptureExecutor::new(
        Arc::new(backend),
        CaptureOptions::from(engine),
    ))
}

pub async fn run_daemon(config: &Path, engine: EngineConfig) -> Result<(), SendableError> {
    ensure_unowned(config, Utc::now())?;

    info!("Open task registry");
    let registry = Arc::new(open_registry(config)?);
    let coordinator = Arc::new(
        RunCoordinator::with_snapshot(paths::run_state_path(config), engine.history_limit)
            .owned_by(OwnerRole::Daemon),
    );

    let requests = RequestInbox::new(paths::capture_requests_dir(config));
    let stale = requests.drain();
    if !stale.is_empty() {
        warn!("Discarding {} capture request(s) left from a previous run", stale.len());
    }

    info!("Connect capture backend at {}", engine.webdriver_url);
    let state = Arc::new(SchedulerState {
        registry,
        coordinator,
        executor: build_executor(&engine)?,
        tick_interval: engine.tick_interval(),
        max_concurrent_captures: engine.max_concurrent_captures,
        requests: Some(requests),
    });

    info!("Initialize scheduler");
    let (scheduler, commands) = Scheduler::new(state);
    let notify = Arc::new(Notify::new());
    let scheduler_task = tokio::spawn(scheduler_loop(scheduler, commands, notify.clone()));

    info!("Initialization complete!");
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal. Shutting down...");
    notify.notify_waiters();

    match scheduler_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("Scheduler stopped with an error: {}", err),
        Err(err) => error!("Error while shutting down: {:?}", err),
    }

    info!("Application shutdown complete.");
    Ok(())
}

pub fn add_task(config: &Path, args: AddArgs) -> Result<(), SendableError> {
    let registry = open_registry(config)?;
    let cron = args
        .schedule
        .expression()
        .unwrap_or_else(|| Preset::Hourly.expression().to_string());

    let spec = TaskSpec {
        url: args.url,
        cron_schedule: cron,
        output_path: args.output,
        width: args.width,
        height: args.height,
        full_page: !args.viewport_only,
        enabled: !args.disabled,
    };
    let task = registry.add(spec)?;
    println!("Added task {}", task.id);
    display::print_task(&task);
    Ok(())
}

pub fn update_task(config: &Path, args: UpdateArgs) -> Result<(), SendableError> {
    let registry = open_registry(config)?;
    let current = registry.get(&args.id).map_err(lookup_error)?;

    let mut spec = TaskSpec::from(&current);
    let mut changed = false;
    if let Some(url) = args.url {
        spec.url = url;
        changed = true;
    }
    if let Some(cron) = args.schedule.expression() {
        spec.cron_schedule = cron;
        changed = true;
    }
    if let Some(output) = args.output {
        spec.output_path = Some(output);
        changed = true;
    }
    if let Some(width) = args.width {
        spec.width = Some(width);
        changed = true;
    }
    if let Some(height) = args.height {
        spec.height = Some(height);
        changed = true;
    }
    if let Some(full_page) = args.full_page {
        spec.full_page = full_page;
        changed = true;
    }
    if !changed {
        return Err(RuntimeError::new(
            codes::TASK_NO_CHANGES,
            "nothing to update; pass at least one field",
        )
        .boxed());
    }

    let task = registry.update(&args.id, spec).map_err(lookup_error)?;
    println!("Updated task {}", task.id);
    display::print_task(&task);
    Ok(())
}

pub fn remove_task(config: &Path, id: &str) -> Result<(), SendableError> {
    let task = open_registry(config)?.remove(id).map_err(lookup_error)?;
    println!("Removed task {} ({})", task.id, task.url);
    Ok(())
}

pub fn set_enabled(config: &Path, id: &str, enabled: bool) -> Result<(), SendableError> {
    let task = open_registry(config)?
        .set_enabled(id, enabled)
        .map_err(lookup_error)?;
    let verb = if task.enabled { "Enabled" } else { "Disabled" };
    println!("{} task {}", verb, task.id);
    Ok(())
}

pub fn list_tasks(config: &Path) -> Result<(), SendableError> {
    let tasks = open_registry(config)?.list();
    display::render_tasks(&tasks);
    Ok(())
}

pub fn show_status(config: &Path, id: Option<&str>) -> Result<(), SendableError> {
    let registry = open_registry(config)?;
    let now = Utc::now();
    let snapshot = recorded_run_state(config, now);
    display::render_owner(snapshot.live_owner(now));
    match id {
        Some(id) => {
            let task = registry.get(id).map_err(lookup_error)?;
            let state = snapshot.tasks.get(id).cloned().unwrap_or_default();
            display::render_task_status(&task, &state);
        }
        None => display::render_status(&registry.list(), &snapshot.tasks),
    }
    Ok(())
}

pub fn change_settings(config: &Path, args: SettingsArgs) -> Result<(), SendableError> {
    let registry = open_registry(config)?;
    if args.is_empty() {
        display::print_settings(&registry.settings());
        return Ok(());
    }

    let mut settings = registry.settings();
    if let Some(output_dir) = args.output_dir {
        if output_dir.trim().is_empty() {
            return Err(RuntimeError::new(
                codes::SETTINGS_INVALID,
                "output directory must not be empty",
            )
            .boxed());
        }
        settings.output_directory = output_dir;
    }
    if let Some(width) = args.default_width {
        settings.default_width = width;
    }
    if let Some(height) = args.default_height {
        settings.default_height = height;
    }

    registry.update_settings(settings)?;
    println!("Updated settings");
    display::print_settings(&registry.settings());
    Ok(())
}

/// Captures one task immediately.
///
/// While a daemon holds the run state the request is queued for it, so the
/// daemon's per-task gate applies. Otherwise the capture runs here under a
/// lease of its own.
pub async fn capture_once(config: &Path, id: &str, engine: EngineConfig) -> Result<(), SendableError> {
    let registry = open_registry(config)?;
    let task = registry.get(id).map_err(lookup_error)?;

    if let ManualRoute::Queued(request) = route_manual_capture(config, &task.id, Utc::now())? {
        println!("Queued capture of task {} for the running daemon ({})", task.id, request.display());
        println!("Follow it with `snapinator status {}`.", task.id);
        return Ok(());
    }

    let executor = build_executor(&engine)?;
    let coordinator = Arc::new(
        RunCoordinator::with_snapshot(paths::run_state_path(config), engine.history_limit)
            .owned_by(OwnerRole::Capture),
    );
    let Admission::Admitted(guard) = coordinator.try_start(&task.id, RunTrigger::Manual) else {
        return Err(busy_error(&task.id));
    };
    coordinator.persist();

    let capture = executor.capture(&task, Local::now());
    tokio::pin!(capture);
    let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
    let result = loop {
        tokio::select! {
            result = &mut capture => break result,
            _ = heartbeat.tick() => {
                coordinator.heartbeat();
            }
        }
    };

    let reported = match result {
        Ok(artifact) => {
            println!("Saved {} ({} bytes)", artifact.path.display(), artifact.size_bytes);
            guard.finish(RunOutcome::Succeeded {
                artifact: artifact.path.display().to_string(),
            });
            Ok(())
        }
        Err(err) => {
            guard.finish(RunOutcome::failed(err.to_string()));
            Err(RuntimeError::new(codes::CAPTURE_FAILED, err.to_string()).boxed())
        }
    };
    coordinator.release();
    reported
}

pub fn preview_next(expression: &str, count: usize) -> Result<(), SendableError> {
    let schedule = CronSchedule::parse(expression)?;
    let upcoming = schedule.upcoming(&Local::now(), count)?;
    display::render_upcoming(&schedule, &upcoming);
    Ok(())
}
