use std::sync::Arc;

use chrono::{DateTime, Local};
use log::{debug, error, info};
use snapinator_capture::CaptureExecutor;
use snapinator_models::{core::Task, runs::RunOutcome};
use tokio::{
    sync::{mpsc::UnboundedReceiver, Notify, Semaphore},
    task::{JoinError, JoinSet},
};

use crate::coordinator::RunGuard;

/// An admitted run handed from the scheduler to the worker pool.
pub struct CaptureCommand {
    pub task: Task,
    pub at: DateTime<Local>,
    pub guard: RunGuard,
}

/// Runs admitted captures, at most `max_concurrent` at a time, until the channel
/// closes or `shutdown` is signalled. In-flight captures are aborted on exit and
/// their guards record the failure.
pub async fn run_capture_workers(
    executor: CaptureExecutor,
    mut commands: UnboundedReceiver<CaptureCommand>,
    max_concurrent: usize,
    shutdown: Arc<Notify>,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("Capture workers shutting down.");
                break;
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                report(joined);
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("Capture channel closed.");
                    break;
                };
                let executor = executor.clone();
                let permits = Arc::clone(&permits);
                running.spawn(async move {
                    // A closed semaphore drops the command, failing its run.
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };
                    execute(&executor, command).await;
                });
            }
        }
    }

    if !running.is_empty() {
        info!("Aborting {} in-flight capture(s).", running.len());
    }
    running.abort_all();
    while let Some(joined) = running.join_next().await {
        report(joined);
    }
}

async fn execute(executor: &CaptureExecutor, command: CaptureCommand) {
    let CaptureCommand { task, at, guard } = command;
    let outcome = match executor.capture(&task, at).await {
        Ok(artifact) => RunOutcome::Succeeded {
            artifact: artifact.path.display().to_string(),
        },
        Err(err) => {
            error!("Capture for task {} failed: {}", task.id, err);
            RunOutcome::failed(err.to_string())
        }
    };
    guard.finish(outcome);
}

fn report(joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(err) if err.is_panic() => error!("Capture worker panicked: {}", err),
        Err(err) => debug!("Capture worker ended: {}", err),
    }
}
