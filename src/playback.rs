//! Replay of a solution plan against a baseline puzzle, stepped manually or
//! auto-played on a timer.
//!
//! Auto-play is one sequential task holding at most one pending sleep, not a
//! batch of independently scheduled callbacks. Together with the run
//! generation counter this makes cancellation race-free: `cancel()` bumps the
//! generation under the same lock every scheduled step checks before it
//! mutates anything, so no step can land after `cancel()` returns.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::model::{Bottle, PuzzleState, SolutionPlan};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlaybackPhase {
    Stopped,
    /// A plan is loaded and positioned; waiting for manual `step()` calls.
    ManualReady,
    AutoPlaying,
}

/// Timing of an auto-play run. The defaults are the original frontend's
/// constants: 1.5 s between successive move starts, then a 1 s settle after
/// the last move before the run reports itself stopped.
#[derive(Copy, Clone, Debug)]
pub struct PlaybackConfig {
    pub step_delay: Duration,
    pub settle_delay: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(1500),
            settle_delay: Duration::from_millis(1000),
        }
    }
}

struct RunState {
    baseline: Vec<Bottle>,
    plan: SolutionPlan,
    step_index: usize,
    phase: PlaybackPhase,
    /// Bumped on every begin/play/cancel/clear. A scheduled step belonging
    /// to an older generation must not fire.
    run_id: u64,
    /// False until the first `begin`; guards cancel-before-begin from
    /// resetting the puzzle to an empty baseline.
    loaded: bool,
}

pub struct PlaybackController {
    puzzle: Arc<Mutex<PuzzleState>>,
    run: Arc<Mutex<RunState>>,
    task: Option<JoinHandle<()>>,
    config: PlaybackConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PlaybackController {
    pub fn new(puzzle: Arc<Mutex<PuzzleState>>, config: PlaybackConfig) -> Self {
        Self {
            puzzle,
            run: Arc::new(Mutex::new(RunState {
                baseline: Vec::new(),
                plan: Vec::new(),
                step_index: 0,
                phase: PlaybackPhase::Stopped,
                run_id: 0,
                loaded: false,
            })),
            task: None,
            config,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        lock(&self.run).phase
    }

    pub fn step_index(&self) -> usize {
        lock(&self.run).step_index
    }

    /// Load a plan against its baseline: the puzzle is reset to the
    /// baseline, the cursor to zero, and the controller waits in
    /// `ManualReady`. Any prior run is cancelled first.
    pub fn begin(&mut self, baseline: Vec<Bottle>, plan: SolutionPlan) {
        self.abort_task();
        let mut run = lock(&self.run);
        run.run_id += 1;
        run.step_index = 0;
        run.phase = PlaybackPhase::ManualReady;
        run.loaded = true;
        run.plan = plan;
        run.baseline = baseline;
        lock(&self.puzzle).reset_bottles(run.baseline.clone());
    }

    /// Apply the next plan move to the running state. No-op once the plan is
    /// exhausted or while auto-play owns the cursor.
    pub fn step(&mut self) {
        let mut run = lock(&self.run);
        if run.phase != PlaybackPhase::ManualReady {
            return;
        }
        apply_due_move(&mut run, &self.puzzle);
        if run.step_index >= run.plan.len() {
            run.phase = PlaybackPhase::Stopped;
        }
    }

    /// Auto-play the remaining moves from the current cursor: each move is
    /// applied to the then-current running state, with `step_delay` between
    /// successive move starts and `settle_delay` after the last one.
    pub fn play_all(&mut self) {
        self.abort_task();
        let id = {
            let mut run = lock(&self.run);
            if !run.loaded || run.step_index >= run.plan.len() {
                return;
            }
            run.run_id += 1;
            run.phase = PlaybackPhase::AutoPlaying;
            run.run_id
        };
        let puzzle = Arc::clone(&self.puzzle);
        let run = Arc::clone(&self.run);
        let config = self.config;
        self.task = Some(tokio::spawn(drive(puzzle, run, config, id)));
    }

    /// Return to the baseline from any state. Guaranteed race-free: once
    /// this returns, no previously scheduled step mutates the puzzle.
    pub fn cancel(&mut self) {
        self.abort_task();
        let mut run = lock(&self.run);
        run.run_id += 1;
        run.phase = PlaybackPhase::Stopped;
        run.step_index = 0;
        if run.loaded {
            lock(&self.puzzle).reset_bottles(run.baseline.clone());
        }
    }

    /// Apply a puzzle mutation that must be atomic with run invalidation.
    /// The run lock is held across the edit (run, then puzzle, the same
    /// order every scheduled step takes), so a due auto-play move can never
    /// land between the mutation and the run being dropped. If the closure
    /// reports a change the run is gone by the time this returns; the
    /// baseline is stale at that point, so it is dropped rather than
    /// restored. A refused edit leaves the run running.
    pub(crate) fn apply_edit(&mut self, f: impl FnOnce(&mut PuzzleState) -> bool) -> bool {
        let changed = {
            let mut run = lock(&self.run);
            let changed = {
                let mut puzzle = lock(&self.puzzle);
                f(&mut puzzle)
            };
            if changed {
                run.run_id += 1;
                run.phase = PlaybackPhase::Stopped;
                run.step_index = 0;
                run.loaded = false;
                run.plan.clear();
                run.baseline.clear();
            }
            changed
        };
        if changed {
            self.abort_task();
        }
        changed
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Apply `plan[step_index]` and advance the cursor. A due move that fails
/// `can_pour` (which cannot happen for a correct plan against its own
/// baseline) is skipped, not raised: there is no user-visible representation
/// for a mid-sequence failure.
fn apply_due_move(run: &mut RunState, puzzle: &Mutex<PuzzleState>) {
    let Some(&mv) = run.plan.get(run.step_index) else {
        return;
    };
    let applied = lock(puzzle).apply_pour(mv.from, mv.to);
    if !applied {
        tracing::warn!(
            step = run.step_index,
            from = mv.from,
            to = mv.to,
            "scheduled move is not pourable, skipping"
        );
    }
    run.step_index += 1;
}

/// The single timer chain behind `play_all`. Lock order is run, then puzzle,
/// same as every other mutation path.
async fn drive(
    puzzle: Arc<Mutex<PuzzleState>>,
    run: Arc<Mutex<RunState>>,
    config: PlaybackConfig,
    id: u64,
) {
    loop {
        let more = {
            let mut run = lock(&run);
            if run.run_id != id || run.phase != PlaybackPhase::AutoPlaying {
                return;
            }
            apply_due_move(&mut run, &puzzle);
            run.step_index < run.plan.len()
        };
        if !more {
            tokio::time::sleep(config.settle_delay).await;
            let mut run = lock(&run);
            if run.run_id == id && run.phase == PlaybackPhase::AutoPlaying {
                run.phase = PlaybackPhase::Stopped;
            }
            return;
        }
        tokio::time::sleep(config.step_delay).await;
    }
}
