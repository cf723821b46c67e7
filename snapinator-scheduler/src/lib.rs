pub mod coordinator;
mod errors;
pub mod registry;
pub mod requests;
pub mod schedule;
pub mod workers;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local, Utc};
use log::{debug, error, info, warn};
use snapinator_capture::CaptureExecutor;
use snapinator_models::{core::Task, errors::SendableError, runs::RunTrigger};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        Notify,
    },
    time::{self, MissedTickBehavior},
};

pub use coordinator::{Admission, OwnerRole, RunCoordinator, RunGuard, RunOwner, RunSnapshot};
pub use errors::{DispatchError, RegistryError, ScheduleError};
pub use registry::TaskRegistry;
pub use requests::{CaptureRequest, RequestInbox};
pub use schedule::CronSchedule;
pub use workers::CaptureCommand;

/// Everything the loop and its handles share.
pub struct SchedulerState {
    pub registry: Arc<TaskRegistry>,
    pub coordinator: Arc<RunCoordinator>,
    pub executor: CaptureExecutor,
    pub tick_interval: Duration,
    pub max_concurrent_captures: usize,
    /// Manual capture requests from other processes, drained every tick.
    pub requests: Option<RequestInbox>,
}

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub dispatched: usize,
    pub busy: usize,
}

struct PlannedTrigger {
    schedule: CronSchedule,
    next: DateTime<Local>,
}

/// Tracks the next trigger of every enabled task and dispatches due ones.
pub struct Scheduler {
    state: Arc<SchedulerState>,
    planned: HashMap<String, PlannedTrigger>,
    /// Tasks whose schedule failed to parse, with the expression already reported.
    rejected: HashMap<String, String>,
    known: HashSet<String>,
    dispatch: UnboundedSender<CaptureCommand>,
}

impl Scheduler {
    pub fn new(state: Arc<SchedulerState>) -> (Scheduler, UnboundedReceiver<CaptureCommand>) {
        let (dispatch, commands) = mpsc::unbounded_channel();
        let known = state.coordinator.snapshot().into_keys().collect();
        let scheduler = Scheduler {
            state,
            planned: HashMap::new(),
            rejected: HashMap::new(),
            known,
            dispatch,
        };
        (scheduler, commands)
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: Arc::clone(&self.state),
            dispatch: self.dispatch.clone(),
        }
    }

    /// Dispatches every enabled task whose trigger is at or before `now`.
    ///
    /// A task seen for the first time (or with a changed schedule) is planned
    /// from `now` and never fires for instants before that. Missed and busy
    /// occurrences are dropped; the next trigger is always computed from `now`.
    pub fn tick(&mut self, now: DateTime<Local>) -> TickReport {
        let mut report = TickReport::default();
        let tasks = self.state.registry.list();
        let coordinator = &self.state.coordinator;

        let current: HashSet<String> = tasks.iter().map(|task| task.id.clone()).collect();
        for gone in self.known.difference(&current) {
            coordinator.forget(gone);
        }
        let mut changed = self.known != current;
        self.known = current;

        let enabled: HashSet<&str> = tasks
            .iter()
            .filter(|task| task.enabled)
            .map(|task| task.id.as_str())
            .collect();
        self.planned.retain(|id, _| {
            let keep = enabled.contains(id.as_str());
            if !keep {
                debug!("Task {} no longer scheduled", id);
                coordinator.set_next_run(id, None);
                changed = true;
            }
            keep
        });
        self.rejected.retain(|id, _| enabled.contains(id.as_str()));

        for task in tasks.iter().filter(|task| task.enabled) {
            let (seeded, plan) = match plan_for(&mut self.planned, &mut self.rejected, task, now) {
                Some(planned) => planned,
                None => continue,
            };
            changed |= seeded;
            if seeded {
                coordinator.set_next_run(&task.id, Some(plan.next.with_timezone(&Utc)));
            }
            if plan.next > now {
                continue;
            }

            report.due += 1;
            match dispatch(&self.state, &self.dispatch, task, plan.next, RunTrigger::Scheduled) {
                Ok(()) => report.dispatched += 1,
                Err(DispatchError::Busy { .. }) => {
                    info!("Task {} is still running; skipping trigger at {}", task.id, plan.next);
                    report.busy += 1;
                }
                Err(err) => error!("Unable to dispatch task {}: {}", task.id, err),
            }
            changed = true;

            match plan.schedule.next_trigger(&now) {
                Ok(next) => {
                    plan.next = next;
                    coordinator.set_next_run(&task.id, Some(next.with_timezone(&Utc)));
                }
                Err(err) => {
                    warn!("Task {} has no further triggers: {}", task.id, err);
                    self.planned.remove(&task.id);
                    self.rejected.insert(task.id.clone(), task.cron_schedule.clone());
                    coordinator.set_next_run(&task.id, None);
                }
            }
        }

        if changed {
            coordinator.persist();
        }
        report
    }
}

/// Returns the task's plan, seeding it from `now` when the task is new or its
/// schedule changed. The flag is true when the plan was (re)seeded.
fn plan_for<'a>(
    planned: &'a mut HashMap<String, PlannedTrigger>,
    rejected: &mut HashMap<String, String>,
    task: &Task,
    now: DateTime<Local>,
) -> Option<(bool, &'a mut PlannedTrigger)> {
    let expression = task.cron_schedule.trim();
    if planned
        .get(&task.id)
        .is_some_and(|plan| plan.schedule.expression() != expression)
    {
        planned.remove(&task.id);
    }

    let mut seeded = false;
    if !planned.contains_key(&task.id) {
        if rejected.get(&task.id).is_some_and(|seen| seen == &task.cron_schedule) {
            return None;
        }
        let seed = CronSchedule::parse(expression).and_then(|schedule| {
            let next = schedule.next_trigger(&now)?;
            Ok(PlannedTrigger { schedule, next })
        });
        match seed {
            Ok(plan) => {
                debug!("Task {} planned for {}", task.id, plan.next);
                rejected.remove(&task.id);
                planned.insert(task.id.clone(), plan);
                seeded = true;
            }
            Err(err) => {
                warn!("Skipping task {}: {}", task.id, err);
                rejected.insert(task.id.clone(), task.cron_schedule.clone());
                return None;
            }
        }
    }

    planned.get_mut(&task.id).map(|plan| (seeded, plan))
}

fn dispatch(
    state: &SchedulerState,
    sender: &UnboundedSender<CaptureCommand>,
    task: &Task,
    at: DateTime<Local>,
    trigger: RunTrigger,
) -> Result<(), DispatchError> {
    match state.coordinator.try_start(&task.id, trigger) {
        Admission::Busy => Err(DispatchError::Busy {
            task_id: task.id.clone(),
        }),
        // A failed send drops the command, and with it the guard, failing the run.
        Admission::Admitted(guard) => sender
            .send(CaptureCommand {
                task: task.clone(),
                at,
                guard,
            })
            .map_err(|_| DispatchError::Closed),
    }
}

/// Entry point for collaborators (UI, CLI) that need to act on a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Arc<SchedulerState>,
    dispatch: UnboundedSender<CaptureCommand>,
}

impl SchedulerHandle {
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Captures `task_id` immediately, unless a run of it is already in flight.
    pub fn capture_now(&self, task_id: &str) -> Result<(), DispatchError> {
        let task = self.state.registry.get(task_id)?;
        dispatch(
            &self.state,
            &self.dispatch,
            &task,
            Local::now(),
            RunTrigger::Manual,
        )?;
        info!("Manual capture of task {} dispatched", task_id);
        Ok(())
    }
}

/// Dispatches queued manual captures through the same gate as `capture_now`.
fn serve_requests(handle: &SchedulerHandle, inbox: &RequestInbox) {
    let mut dispatched = false;
    for request in inbox.drain() {
        match handle.capture_now(&request.task_id) {
            Ok(()) => dispatched = true,
            Err(DispatchError::Busy { .. }) => info!(
                "Task {} is still running; dropping capture request from pid {}",
                request.task_id, request.requested_by
            ),
            Err(err) => warn!(
                "Ignoring capture request for task {}: {}",
                request.task_id, err
            ),
        }
    }
    if dispatched {
        handle.state.coordinator.persist();
    }
}

/// Ticks `scheduler` until `notify` fires, feeding admitted runs to the worker pool.
///
/// On shutdown in-flight captures are aborted and recorded as failed.
pub async fn scheduler_loop(
    mut scheduler: Scheduler,
    commands: UnboundedReceiver<CaptureCommand>,
    notify: Arc<Notify>,
) -> Result<(), SendableError> {
    let state = Arc::clone(&scheduler.state);
    let stop_workers = Arc::new(Notify::new());
    let workers = tokio::spawn(workers::run_capture_workers(
        state.executor.clone(),
        commands,
        state.max_concurrent_captures,
        Arc::clone(&stop_workers),
    ));

    let handle = scheduler.handle();
    let shutdown = notify.notified();
    tokio::pin!(shutdown);
    let mut ticks = time::interval(state.tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Scheduler received shutdown signal.");
                break;
            }
            _ = ticks.tick() => {
                let start = Instant::now();
                if let Err(err) = state.registry.refresh_if_changed() {
                    error!("Unable to reload tasks: {}", err);
                }
                let report = scheduler.tick(Local::now());
                if report.due > 0 {
                    info!(
                        "Dispatched {} of {} due task(s), {} busy",
                        report.dispatched, report.due, report.busy
                    );
                }
                if let Some(inbox) = &state.requests {
                    serve_requests(&handle, inbox);
                }
                state.coordinator.heartbeat();
                debug!("Scheduler tick took {} seconds", start.elapsed().as_secs_f64());
            }
        }
    }

    stop_workers.notify_one();
    drop(handle);
    drop(scheduler);
    workers.await?;
    state.coordinator.persist();
    state.coordinator.release();
    info!("Scheduler stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use snapinator_capture::{CaptureBackend, CaptureError, CaptureOptions, RenderRequest};
    use snapinator_models::{
        core::TaskSpec,
        runs::{RunOutcome, RunStatus},
    };

    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nimage";

    struct PngBackend;

    #[async_trait]
    impl CaptureBackend for PngBackend {
        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
            Ok(PNG.to_vec())
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl CaptureBackend for HangingBackend {
        async fn render(&self, _request: &RenderRequest) -> Result<Vec<u8>, CaptureError> {
            time::sleep(Duration::from_secs(3600)).await;
            Ok(PNG.to_vec())
        }
    }

    fn options(attempt_budget: Duration) -> CaptureOptions {
        CaptureOptions {
            load_timeout: attempt_budget,
            settle_delay: Duration::ZERO,
            max_attempts: 1,
            retry_backoff: Duration::ZERO,
            screenshot_grace: Duration::ZERO,
        }
    }

    fn state_at(
        config: &Path,
        backend: Arc<dyn CaptureBackend>,
        options: CaptureOptions,
    ) -> Arc<SchedulerState> {
        Arc::new(SchedulerState {
            registry: Arc::new(TaskRegistry::open(config).unwrap()),
            coordinator: Arc::new(RunCoordinator::new(coordinator::DEFAULT_HISTORY_LIMIT)),
            executor: CaptureExecutor::new(backend, options),
            tick_interval: Duration::from_millis(20),
            max_concurrent_captures: 2,
            requests: None,
        })
    }

    fn fixture() -> (tempfile::TempDir, Arc<SchedulerState>) {
        let dir = tempfile::tempdir().unwrap();
        let state = state_at(
            &dir.path().join("config.json"),
            Arc::new(PngBackend),
            options(Duration::from_secs(5)),
        );
        (dir, state)
    }

    fn add_task(state: &SchedulerState, dir: &Path, cron: &str) -> Task {
        let mut spec = TaskSpec::new("https://example.com", cron);
        spec.output_path = Some(dir.join("shots").to_string_lossy().into_owned());
        state.registry.add(spec).unwrap()
    }

    fn local(hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 7, hour, minute, second).unwrap()
    }

    fn next_run(state: &SchedulerState, task: &Task) -> Option<DateTime<Utc>> {
        state.coordinator.state(&task.id).next_run_at
    }

    fn succeed(command: CaptureCommand) {
        command.guard.finish(RunOutcome::Succeeded {
            artifact: "/tmp/shot.png".into(),
        });
    }

    #[test]
    fn first_sight_plans_from_now_and_fires_on_the_trigger() {
        let (dir, state) = fixture();
        let (mut scheduler, mut commands) = Scheduler::new(state.clone());
        let task = add_task(&state, dir.path(), "*/5 * * * *");

        assert_eq!(scheduler.tick(local(12, 0, 30)).dispatched, 0);
        assert_eq!(next_run(&state, &task), Some(local(12, 5, 0).with_timezone(&Utc)));
        assert_eq!(scheduler.tick(local(12, 4, 59)).due, 0);

        let report = scheduler.tick(local(12, 5, 0));
        assert_eq!(report.dispatched, 1);
        let command = commands.try_recv().unwrap();
        assert_eq!(command.task.id, task.id);
        assert_eq!(command.at, local(12, 5, 0));
        assert_eq!(next_run(&state, &task), Some(local(12, 10, 0).with_timezone(&Utc)));
        assert_eq!(state.coordinator.state(&task.id).status, RunStatus::Running);
    }

    #[test]
    fn busy_trigger_is_dropped_not_queued() {
        let (dir, state) = fixture();
        let (mut scheduler, mut commands) = Scheduler::new(state.clone());
        let task = add_task(&state, dir.path(), "*/5 * * * *");

        scheduler.tick(local(12, 0, 30));
        scheduler.tick(local(12, 5, 0));
        let in_flight = commands.try_recv().unwrap();

        let report = scheduler.tick(local(12, 10, 0));
        assert_eq!(report, TickReport { due: 1, dispatched: 0, busy: 1 });
        assert!(commands.try_recv().is_err());
        assert_eq!(next_run(&state, &task), Some(local(12, 15, 0).with_timezone(&Utc)));

        succeed(in_flight);
        assert_eq!(scheduler.tick(local(12, 14, 59)).dispatched, 0);
        assert_eq!(scheduler.tick(local(12, 15, 0)).dispatched, 1);
        assert_eq!(state.coordinator.state(&task.id).history.len(), 1);
    }

    #[test]
    fn late_tick_does_not_replay_missed_triggers() {
        let (dir, state) = fixture();
        let (mut scheduler, mut commands) = Scheduler::new(state.clone());
        add_task(&state, dir.path(), "* * * * *");

        scheduler.tick(local(12, 0, 0));
        let report = scheduler.tick(local(12, 10, 30));
        assert_eq!(report.dispatched, 1);
        succeed(commands.try_recv().unwrap());
        assert_eq!(scheduler.tick(local(12, 10, 31)).due, 0);
        assert_eq!(scheduler.tick(local(12, 11, 0)).dispatched, 1);
    }

    #[test]
    fn disabled_task_is_not_dispatched_and_resumes_without_catch_up() {
        let (dir, state) = fixture();
        let (mut scheduler, mut commands) = Scheduler::new(state.clone());
        let task = add_task(&state, dir.path(), "*/5 * * * *");

        scheduler.tick(local(12, 0, 30));
        scheduler.tick(local(12, 5, 0));
        succeed(commands.try_recv().unwrap());

        state.registry.set_enabled(&task.id, false).unwrap();
        assert_eq!(scheduler.tick(local(12, 10, 0)).due, 0);
        assert_eq!(scheduler.tick(local(12, 15, 0)).due, 0);
        assert_eq!(next_run(&state, &task), None);

        state.registry.set_enabled(&task.id, true).unwrap();
        assert_eq!(scheduler.tick(local(12, 21, 0)).due, 0);
        assert_eq!(next_run(&state, &task), Some(local(12, 25, 0).with_timezone(&Utc)));
        assert_eq!(scheduler.tick(local(12, 25, 0)).dispatched, 1);
    }

    #[test]
    fn schedule_change_replans_from_now() {
        let (dir, state) = fixture();
        let (mut scheduler, _commands) = Scheduler::new(state.clone());
        let task = add_task(&state, dir.path(), "0 * * * *");

        scheduler.tick(local(12, 0, 30));
        assert_eq!(next_run(&state, &task), Some(local(13, 0, 0).with_timezone(&Utc)));

        let mut spec = TaskSpec::from(&task);
        spec.cron_schedule = "*/10 * * * *".into();
        state.registry.update(&task.id, spec).unwrap();
        scheduler.tick(local(12, 1, 0));
        assert_eq!(next_run(&state, &task), Some(local(12, 10, 0).with_timezone(&Utc)));
    }

    #[test]
    fn removed_task_state_is_forgotten() {
        let (dir, state) = fixture();
        let (mut scheduler, mut commands) = Scheduler::new(state.clone());
        let task = add_task(&state, dir.path(), "* * * * *");

        scheduler.tick(local(12, 0, 0));
        scheduler.tick(local(12, 1, 0));
        succeed(commands.try_recv().unwrap());
        assert!(state.coordinator.snapshot().contains_key(&task.id));

        state.registry.remove(&task.id).unwrap();
        scheduler.tick(local(12, 1, 30));
        assert!(!state.coordinator.snapshot().contains_key(&task.id));
    }

    #[test]
    fn unparseable_persisted_schedule_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.json");
        fs::write(
            &config,
            json!({
                "tasks": [
                    {"id": "broken", "url": "https://example.com", "cron_schedule": "0 25 * * *", "output_path": "/tmp"},
                    {"id": "fine", "url": "https://example.com", "cron_schedule": "* * * * *", "output_path": "/tmp"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let state = state_at(&config, Arc::new(PngBackend), options(Duration::from_secs(5)));
        let (mut scheduler, mut commands) = Scheduler::new(state.clone());

        scheduler.tick(local(12, 0, 0));
        let report = scheduler.tick(local(12, 1, 0));

        assert_eq!(report.dispatched, 1);
        assert_eq!(commands.try_recv().unwrap().task.id, "fine");
        assert_eq!(state.coordinator.state("broken").next_run_at, None);
    }

    #[test]
    fn capture_now_is_rejected_while_a_run_is_in_flight() {
        let (dir, state) = fixture();
        let (scheduler, mut commands) = Scheduler::new(state.clone());
        let handle = scheduler.handle();
        let task = add_task(&state, dir.path(), "0 0 1 1 *");

        handle.capture_now(&task.id).unwrap();
        let command = commands.try_recv().unwrap();
        assert_eq!(command.task.id, task.id);

        assert!(matches!(
            handle.capture_now(&task.id),
            Err(DispatchError::Busy { .. })
        ));
        assert!(matches!(
            handle.capture_now("missing"),
            Err(DispatchError::Registry(RegistryError::NotFound { .. }))
        ));

        succeed(command);
        let record = state.coordinator.state(&task.id);
        assert_eq!(record.last_record().unwrap().trigger, RunTrigger::Manual);
    }

    async fn wait_for(state: &SchedulerState, task: &Task, done: impl Fn(&SchedulerState) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(state) {
            assert!(Instant::now() < deadline, "timed out waiting on task {}", task.id);
            time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn loop_captures_due_tasks_and_records_success() {
        let (dir, state) = fixture();
        let task = add_task(&state, dir.path(), "* * * * * *");
        let (scheduler, commands) = Scheduler::new(state.clone());
        let notify = Arc::new(Notify::new());
        let running = tokio::spawn(scheduler_loop(scheduler, commands, notify.clone()));

        wait_for(&state, &task, |state| {
            state.coordinator.state(&task.id).status == RunStatus::Succeeded
        })
        .await;
        notify.notify_waiters();
        running.await.unwrap().unwrap();

        let run = state.coordinator.state(&task.id);
        let artifact = run.last_record().unwrap().artifact.clone().unwrap();
        assert_eq!(fs::read(artifact).unwrap(), PNG);
        assert!(run.last_error.is_none());
    }

    #[tokio::test]
    async fn timed_out_capture_fails_the_run_but_keeps_the_task_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_at(
            &dir.path().join("config.json"),
            Arc::new(HangingBackend),
            options(Duration::from_millis(100)),
        );
        let task = add_task(&state, dir.path(), "* * * * * *");
        let (scheduler, commands) = Scheduler::new(state.clone());
        let notify = Arc::new(Notify::new());
        let running = tokio::spawn(scheduler_loop(scheduler, commands, notify.clone()));

        wait_for(&state, &task, |state| {
            state.coordinator.state(&task.id).status == RunStatus::Failed
        })
        .await;
        notify.notify_waiters();
        running.await.unwrap().unwrap();

        let run = state.coordinator.state(&task.id);
        assert!(run.last_error.unwrap().contains("timed out"));
        assert!(state.registry.get(&task.id).unwrap().enabled);
        let shots = dir.path().join("shots");
        assert_eq!(fs::read_dir(shots).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn queued_requests_are_captured_as_manual_runs() {
        let dir = tempfile::tempdir().unwrap();
        let runs = dir.path().join("runs.json");
        let inbox_dir = dir.path().join("requests");
        let state = Arc::new(SchedulerState {
            registry: Arc::new(TaskRegistry::open(&dir.path().join("config.json")).unwrap()),
            coordinator: Arc::new(
                RunCoordinator::with_snapshot(&runs, coordinator::DEFAULT_HISTORY_LIMIT)
                    .owned_by(OwnerRole::Daemon),
            ),
            executor: CaptureExecutor::new(Arc::new(PngBackend), options(Duration::from_secs(5))),
            tick_interval: Duration::from_millis(20),
            max_concurrent_captures: 2,
            requests: Some(RequestInbox::new(&inbox_dir)),
        });
        let task = add_task(&state, dir.path(), "0 0 1 1 *");
        RequestInbox::new(&inbox_dir).submit(&task.id).unwrap();
        RequestInbox::new(&inbox_dir).submit("missing").unwrap();

        let (scheduler, commands) = Scheduler::new(state.clone());
        let notify = Arc::new(Notify::new());
        let running = tokio::spawn(scheduler_loop(scheduler, commands, notify.clone()));

        wait_for(&state, &task, |state| {
            state.coordinator.state(&task.id).status == RunStatus::Succeeded
        })
        .await;
        let leased = RunSnapshot::load(&runs).unwrap().unwrap();
        assert_eq!(leased.owner.map(|owner| owner.role), Some(OwnerRole::Daemon));

        notify.notify_waiters();
        running.await.unwrap().unwrap();

        let record = state.coordinator.state(&task.id);
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.last_record().unwrap().trigger, RunTrigger::Manual);
        assert_eq!(fs::read_dir(&inbox_dir).unwrap().count(), 0);
        let released = RunSnapshot::load(&runs).unwrap().unwrap();
        assert!(released.owner.is_none());
        assert_eq!(released.tasks[&task.id].status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_captures_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_at(
            &dir.path().join("config.json"),
            Arc::new(HangingBackend),
            options(Duration::from_secs(600)),
        );
        let task = add_task(&state, dir.path(), "* * * * * *");
        let (scheduler, commands) = Scheduler::new(state.clone());
        let notify = Arc::new(Notify::new());
        let running = tokio::spawn(scheduler_loop(scheduler, commands, notify.clone()));

        wait_for(&state, &task, |state| state.coordinator.is_running(&task.id)).await;
        notify.notify_waiters();
        running.await.unwrap().unwrap();

        let run = state.coordinator.state(&task.id);
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.last_error.is_some());
        assert!(!state.coordinator.is_running(&task.id));
    }
}
