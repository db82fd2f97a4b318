use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::plan::execution_list::ExecutionUnit;
use crate::runner::display::format_unit_start;
use crate::runner::unit::{UnitOutcome, UnitRunner};

/// Run-wide interrupt signal. Cloned into every unit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel on Ctrl-C; a second Ctrl-C exits the process with status
    /// 130. The listener lives on a background thread with its own
    /// single-threaded runtime.
    pub fn listen_for_interrupt(&self) {
        let token = self.clone();
        let spawned = thread::Builder::new()
            .name("interrupt".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!(error = %e, "interrupt handler unavailable");
                        return;
                    }
                };
                runtime.block_on(async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        return;
                    }
                    warn!("interrupt received, stopping execution (press Ctrl-C again to exit now)");
                    token.cancel();
                    if tokio::signal::ctrl_c().await.is_ok() {
                        error!("second interrupt received, exiting without a report");
                        std::process::exit(130);
                    }
                });
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not start interrupt listener");
        }
    }
}

/// Run-wide failure flag. Only ever goes from unset to set.
#[derive(Debug, Clone, Default)]
pub struct FailureFlag(Arc<AtomicBool>);

impl FailureFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to a unit at the worker level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Ran(UnitOutcome),
    /// The worker died outside of test code.
    Crashed,
}

/// Counts collected by [`dispatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub finished: usize,
    pub interrupted: usize,
    pub crashed: usize,
    /// Units never started because the run was interrupted.
    pub not_started: usize,
}

/// Run `units` with at most `workers` running at once. Every unit gets a
/// fresh thread and context; outcomes are collected over a channel.
/// Ordering between units is not guaranteed when `workers > 1`.
pub fn dispatch(runner: &UnitRunner, units: &[ExecutionUnit], workers: usize) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    if units.is_empty() {
        return summary;
    }
    let workers = workers.max(1);
    debug!(units = units.len(), workers, "dispatching");

    if workers == 1 {
        for (index, unit) in units.iter().enumerate() {
            if runner.cancel.is_cancelled() {
                break;
            }
            info!("{}", format_unit_start(unit, index + 1, units.len()));
            record(runner, &mut summary, run_isolated(runner, unit));
        }
    } else {
        run_pool(runner, units, workers, &mut summary);
    }

    let started = summary.finished + summary.interrupted + summary.crashed;
    summary.not_started = units.len() - started;
    if runner.cancel.is_cancelled() {
        runner.failed.mark();
    }
    summary
}

fn run_pool(
    runner: &UnitRunner,
    units: &[ExecutionUnit],
    workers: usize,
    summary: &mut DispatchSummary,
) {
    let (tx, rx) = mpsc::channel::<WorkerOutcome>();
    thread::scope(|scope| {
        let mut queue = units.iter().enumerate();
        let mut in_flight = 0usize;
        loop {
            while in_flight < workers && !runner.cancel.is_cancelled() {
                let Some((index, unit)) = queue.next() else {
                    break;
                };
                info!("{}", format_unit_start(unit, index + 1, units.len()));
                let tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("unit-{index}"))
                    .spawn_scoped(scope, move || {
                        let _ = tx.send(run_isolated(runner, unit));
                    });
                match spawned {
                    Ok(_) => in_flight += 1,
                    Err(e) => {
                        error!(test = %unit.test_name, error = %e, "could not start worker");
                        record(runner, summary, WorkerOutcome::Crashed);
                    }
                }
            }
            if in_flight == 0 {
                break;
            }
            match rx.recv() {
                Ok(outcome) => {
                    in_flight -= 1;
                    record(runner, summary, outcome);
                }
                Err(_) => break,
            }
        }
    });
}

/// Run one unit, containing any panic that escapes the unit runner.
fn run_isolated(runner: &UnitRunner, unit: &ExecutionUnit) -> WorkerOutcome {
    match catch_unwind(AssertUnwindSafe(|| runner.run(unit))) {
        Ok(outcome) => WorkerOutcome::Ran(outcome),
        Err(_) => {
            error!(test = %unit.test_name, "worker crashed");
            WorkerOutcome::Crashed
        }
    }
}

fn record(runner: &UnitRunner, summary: &mut DispatchSummary, outcome: WorkerOutcome) {
    match outcome {
        WorkerOutcome::Ran(UnitOutcome::Finished(_)) => summary.finished += 1,
        WorkerOutcome::Ran(UnitOutcome::Interrupted) => summary.interrupted += 1,
        WorkerOutcome::Crashed => {
            summary.crashed += 1;
            runner.failed.mark();
        }
    }
}
