//! Interactive game session: single owner of the puzzle state, tying the
//! selection machine, the editor operations, the solver client and the
//! playback controller together. The presentation layer feeds it discrete
//! events (clicks, solve requests) and re-renders from [`GameSession::snapshot`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use crate::model::{Bottle, Color, PuzzleState, Selection};
use crate::persist::{self, ImportError, PuzzleDoc};
use crate::playback::{PlaybackConfig, PlaybackController, PlaybackPhase};
use crate::solver::{Solution, SolveError, SolverClient};

/// Units dealt per color when randomizing, the classic water-sort fill.
const UNITS_PER_COLOR: usize = 4;

/// The randomizer deals from at most twelve palette colors, matching the
/// original generator (the thirteenth color only enters hand-built puzzles).
const MAX_RANDOM_COLORS: usize = 12;

pub struct GameSession {
    state: Arc<Mutex<PuzzleState>>,
    playback: PlaybackController,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GameSession {
    pub fn new(initial: PuzzleState) -> Self {
        Self::with_config(initial, PlaybackConfig::default())
    }

    pub fn with_config(initial: PuzzleState, config: PlaybackConfig) -> Self {
        let state = Arc::new(Mutex::new(initial));
        let playback = PlaybackController::new(Arc::clone(&state), config);
        Self { state, playback }
    }

    /// Read-only copy of the current state for rendering.
    pub fn snapshot(&self) -> PuzzleState {
        lock(&self.state).clone()
    }

    // ----- selection machine -----

    /// The single driving event of the two-phase selection machine.
    ///
    /// Idle + non-empty bottle arms it; Idle + empty bottle does nothing;
    /// clicking the armed bottle deselects; clicking any other bottle
    /// attempts the pour and always returns to Idle, so an invalid target
    /// silently deselects without touching the bottles.
    pub fn bottle_clicked(&mut self, index: usize) {
        self.playback.apply_edit(|state| match state.selection() {
            Selection::Idle => {
                if state.bottles().get(index).is_some_and(|b| !b.is_empty()) {
                    state.set_selection(Selection::Armed(index));
                }
                false
            }
            Selection::Armed(src) if src == index => {
                state.set_selection(Selection::Idle);
                false
            }
            Selection::Armed(src) => {
                let poured = state.apply_pour(src, index);
                if poured {
                    // a user pour is a content change outside playback
                    state.mark_edited();
                } else {
                    state.set_selection(Selection::Idle);
                }
                poured
            }
        });
    }

    // ----- editor -----

    /// Push one unit of `color` onto a bottle. Refused at capacity.
    pub fn add_water(&mut self, index: usize, color: Color) -> bool {
        self.edit(|bottles| {
            let Some(bottle) = bottles.get_mut(index) else {
                return false;
            };
            if bottle.is_full() {
                return false;
            }
            bottle.waters.push(color);
            true
        })
    }

    pub fn remove_top_water(&mut self, index: usize) -> bool {
        self.edit(|bottles| {
            bottles
                .get_mut(index)
                .is_some_and(|b| b.waters.pop().is_some())
        })
    }

    pub fn clear_bottle(&mut self, index: usize) -> bool {
        self.edit(|bottles| {
            let Some(bottle) = bottles.get_mut(index) else {
                return false;
            };
            let had_water = !bottle.is_empty();
            bottle.waters.clear();
            had_water
        })
    }

    /// Change a bottle's capacity; contents above the new capacity are cut.
    pub fn set_capacity(&mut self, index: usize, capacity: usize) -> bool {
        if capacity == 0 {
            return false;
        }
        self.edit(|bottles| {
            let Some(bottle) = bottles.get_mut(index) else {
                return false;
            };
            bottle.capacity = capacity;
            bottle.waters.truncate(capacity);
            true
        })
    }

    pub fn add_bottle(&mut self, capacity: usize) -> bool {
        if capacity == 0 {
            return false;
        }
        self.edit(|bottles| {
            bottles.push(Bottle::empty(capacity));
            true
        })
    }

    /// Remove a bottle. A puzzle keeps at least two bottles.
    pub fn remove_bottle(&mut self, index: usize) -> bool {
        self.edit(|bottles| {
            if bottles.len() <= 2 || index >= bottles.len() {
                return false;
            }
            bottles.remove(index);
            true
        })
    }

    pub fn clear_all(&mut self) -> bool {
        self.edit(|bottles| {
            let had_water = bottles.iter().any(|b| !b.is_empty());
            for bottle in bottles.iter_mut() {
                bottle.waters.clear();
            }
            had_water
        })
    }

    /// Constrained random fill: empty everything, then deal out at most
    /// [`UNITS_PER_COLOR`] units of each chosen color (drawn from at most
    /// [`MAX_RANDOM_COLORS`] colors) into all but the last two bottles,
    /// which stay empty as working room.
    pub fn randomize(&mut self) -> bool {
        self.randomize_with(&mut rand::rng())
    }

    pub fn randomize_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        self.edit(|bottles| {
            if bottles.len() < 3 {
                return false;
            }
            for bottle in bottles.iter_mut() {
                bottle.waters.clear();
            }
            let fill_bottles = bottles.len() - 2;
            let units: usize = bottles[..fill_bottles].iter().map(|b| b.capacity).sum();
            let num_colors = MAX_RANDOM_COLORS.min(units / UNITS_PER_COLOR);
            if num_colors == 0 {
                return false;
            }
            let mut counts = vec![0usize; num_colors];
            for i in 0..fill_bottles {
                for _ in 0..bottles[i].capacity {
                    let available: Vec<usize> = (0..num_colors)
                        .filter(|&c| counts[c] < UNITS_PER_COLOR)
                        .collect();
                    let Some(&pick) = available.get(rng.random_range(0..available.len().max(1)))
                    else {
                        break;
                    };
                    bottles[i].waters.push(Color::ALL[pick]);
                    counts[pick] += 1;
                }
            }
            true
        })
    }

    /// Run `f` over the bottles; if it reports a change, invalidate the
    /// installed plan, reset the selection, and drop any playback run whose
    /// baseline just went stale. The controller keeps the whole thing
    /// atomic: no scheduled auto-play step can land between the mutation
    /// and the run invalidation.
    fn edit(&mut self, f: impl FnOnce(&mut Vec<Bottle>) -> bool) -> bool {
        self.playback.apply_edit(|state| {
            let changed = f(state.bottles_mut());
            if changed {
                state.mark_edited();
            }
            changed
        })
    }

    // ----- solving -----

    /// Ask the external solver for a plan for the current bottles. On
    /// success the plan is installed and the step count returned. A response
    /// that arrives after the puzzle was edited no longer matches any live
    /// baseline and is discarded as [`SolveError::Stale`].
    pub async fn solve(&mut self, client: &SolverClient) -> Result<usize, SolveError> {
        let (doc, revision) = {
            let state = lock(&self.state);
            (PuzzleDoc::from_state(&state), state.revision())
        };
        // the request itself is not abortable; nothing blocks on it
        let solution = client.solve(&doc).await?;
        self.install_solution(revision, solution)
    }

    fn install_solution(
        &mut self,
        requested_at: u64,
        solution: Solution,
    ) -> Result<usize, SolveError> {
        let mut state = lock(&self.state);
        if state.revision() != requested_at {
            tracing::warn!(
                requested_at,
                now = state.revision(),
                "puzzle edited during solve, discarding response"
            );
            return Err(SolveError::Stale);
        }
        state.install_plan(solution.plan);
        Ok(solution.steps)
    }

    // ----- playback -----

    /// Load the installed plan into the playback controller with the
    /// current bottles as baseline. (Stale responses never install, so the
    /// current bottles are exactly the state the plan was computed for.)
    pub fn start_playback(&mut self) -> bool {
        let Some((baseline, plan)) = ({
            let state = lock(&self.state);
            state
                .plan()
                .map(|plan| (state.bottles().to_vec(), plan.clone()))
        }) else {
            return false;
        };
        self.playback.begin(baseline, plan);
        true
    }

    pub fn step_playback(&mut self) {
        self.playback.step();
    }

    pub fn play_all(&mut self) {
        self.playback.play_all();
    }

    pub fn cancel_playback(&mut self) {
        self.playback.cancel();
    }

    pub fn playback_phase(&self) -> PlaybackPhase {
        self.playback.phase()
    }

    pub fn playback_step(&self) -> usize {
        self.playback.step_index()
    }

    // ----- persistence -----

    pub fn export_json(&self) -> serde_json::Result<String> {
        persist::to_json(&lock(&self.state))
    }

    /// Replace the puzzle with an imported document. On any validation
    /// failure the previous state stays installed untouched.
    pub fn import_json(&mut self, json: &str) -> Result<(), ImportError> {
        let mut imported = persist::from_json(json)?;
        self.playback.apply_edit(move |state| {
            imported.set_revision(state.revision() + 1);
            *state = imported;
            true
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Move;
    use Color::{Blue, Red};

    fn session() -> GameSession {
        GameSession::new(PuzzleState::new(vec![
            Bottle::new(4, vec![Blue, Red, Red]),
            Bottle::new(4, vec![Red]),
            Bottle::empty(4),
        ]))
    }

    fn solution(plan: Vec<Move>) -> Solution {
        let steps = plan.len();
        Solution { plan, steps }
    }

    mod selection {
        use super::*;

        #[test]
        fn clicking_a_non_empty_bottle_arms_it() {
            let mut s = session();
            s.bottle_clicked(0);
            assert_eq!(s.snapshot().selection(), Selection::Armed(0));
        }

        #[test]
        fn clicking_an_empty_bottle_while_idle_does_nothing() {
            let mut s = session();
            s.bottle_clicked(2);
            assert_eq!(s.snapshot().selection(), Selection::Idle);
        }

        #[test]
        fn clicking_the_armed_bottle_deselects() {
            let mut s = session();
            s.bottle_clicked(0);
            s.bottle_clicked(0);
            assert_eq!(s.snapshot().selection(), Selection::Idle);
        }

        #[test]
        fn clicking_a_valid_target_pours_and_returns_to_idle() {
            let mut s = session();
            s.bottle_clicked(0);
            s.bottle_clicked(1);
            let snap = s.snapshot();
            assert_eq!(snap.selection(), Selection::Idle);
            assert_eq!(snap.bottles()[1].waters, vec![Red, Red, Red]);
            assert_eq!(snap.bottles()[0].waters, vec![Blue]);
        }

        #[test]
        fn an_invalid_target_silently_deselects_without_mutating() {
            let mut s = GameSession::new(PuzzleState::new(vec![
                Bottle::new(4, vec![Red]),
                Bottle::new(4, vec![Blue]),
            ]));
            let before = s.snapshot();
            s.bottle_clicked(0);
            s.bottle_clicked(1); // red over blue is not pourable
            let after = s.snapshot();
            assert_eq!(after.selection(), Selection::Idle);
            assert_eq!(after.bottles(), before.bottles());
        }

        #[test]
        fn a_user_pour_invalidates_the_installed_plan() {
            let mut s = session();
            let rev = s.snapshot().revision();
            s.install_solution(rev, solution(vec![Move { from: 0, to: 1 }]))
                .unwrap();
            assert!(s.snapshot().plan().is_some());
            s.bottle_clicked(0);
            s.bottle_clicked(1);
            assert!(s.snapshot().plan().is_none());
        }
    }

    mod editor {
        use super::*;

        #[test]
        fn add_water_respects_capacity() {
            let mut s = session();
            assert!(s.add_water(2, Red));
            assert!(s.add_water(1, Red));
            assert!(s.add_water(1, Red));
            assert!(s.add_water(1, Red));
            assert!(!s.add_water(1, Red)); // full now
            assert_eq!(s.snapshot().bottles()[1].waters.len(), 4);
        }

        #[test]
        fn set_capacity_truncates_overflowing_contents() {
            let mut s = session();
            assert!(s.set_capacity(0, 2));
            let snap = s.snapshot();
            assert_eq!(snap.bottles()[0].capacity, 2);
            assert_eq!(snap.bottles()[0].waters, vec![Blue, Red]);
        }

        #[test]
        fn zero_capacity_is_refused() {
            let mut s = session();
            assert!(!s.set_capacity(0, 0));
            assert!(!s.add_bottle(0));
        }

        #[test]
        fn a_puzzle_keeps_at_least_two_bottles() {
            let mut s = session();
            assert!(s.remove_bottle(2));
            assert!(!s.remove_bottle(0));
            assert_eq!(s.snapshot().bottles().len(), 2);
        }

        #[test]
        fn edits_invalidate_the_plan_and_reset_the_selection() {
            let mut s = session();
            let rev = s.snapshot().revision();
            s.install_solution(rev, solution(vec![Move { from: 0, to: 1 }]))
                .unwrap();
            s.bottle_clicked(0); // armed
            assert!(s.remove_top_water(0));
            let snap = s.snapshot();
            assert!(snap.plan().is_none());
            assert_eq!(snap.selection(), Selection::Idle);
        }

        #[test]
        fn a_refused_edit_changes_nothing() {
            let mut s = session();
            let before = s.snapshot();
            assert!(!s.remove_top_water(2)); // already empty
            assert!(!s.add_water(9, Red)); // no such bottle
            let after = s.snapshot();
            assert_eq!(after.bottles(), before.bottles());
            assert_eq!(after.revision(), before.revision());
        }

        #[test]
        fn randomize_deals_bounded_color_counts_and_leaves_working_room() {
            let mut s = GameSession::new(PuzzleState::new(vec![
                Bottle::empty(4),
                Bottle::empty(4),
                Bottle::empty(4),
                Bottle::empty(4),
                Bottle::empty(4),
                Bottle::empty(4),
            ]));
            use rand::SeedableRng;
            let mut rng = rand::rngs::StdRng::seed_from_u64(7);
            assert!(s.randomize_with(&mut rng));
            let snap = s.snapshot();
            let bottles = snap.bottles();
            assert!(bottles[4].is_empty());
            assert!(bottles[5].is_empty());
            let mut counts = std::collections::HashMap::new();
            for bottle in bottles {
                assert!(bottle.waters.len() <= bottle.capacity);
                for &c in &bottle.waters {
                    *counts.entry(c).or_insert(0usize) += 1;
                }
            }
            assert!(counts.values().all(|&n| n <= UNITS_PER_COLOR));
            // 4 bottles x capacity 4, 4 units per color: everything fits
            assert_eq!(counts.values().sum::<usize>(), 16);
        }

        #[test]
        fn randomize_never_deals_more_than_twelve_colors() {
            // 15 fillable bottles would admit 15 colors without the cap
            let mut s = GameSession::new(PuzzleState::new(vec![Bottle::empty(4); 17]));
            use rand::SeedableRng;
            let mut rng = rand::rngs::StdRng::seed_from_u64(11);
            assert!(s.randomize_with(&mut rng));
            let snap = s.snapshot();
            let dealt: std::collections::HashSet<_> = snap
                .bottles()
                .iter()
                .flat_map(|b| b.waters.iter().copied())
                .collect();
            assert!(dealt.len() <= MAX_RANDOM_COLORS);
            assert_eq!(
                snap.bottles()
                    .iter()
                    .map(|b| b.waters.len())
                    .sum::<usize>(),
                MAX_RANDOM_COLORS * UNITS_PER_COLOR
            );
        }
    }

    mod solving {
        use super::*;

        #[test]
        fn a_fresh_response_installs_the_plan() {
            let mut s = session();
            let rev = s.snapshot().revision();
            let steps = s
                .install_solution(rev, solution(vec![Move { from: 0, to: 1 }]))
                .unwrap();
            assert_eq!(steps, 1);
            assert_eq!(
                s.snapshot().plan(),
                Some(&vec![Move { from: 0, to: 1 }])
            );
        }

        #[test]
        fn a_stale_response_is_discarded() {
            let mut s = session();
            let rev = s.snapshot().revision();
            assert!(s.add_water(2, Blue)); // edit lands after the "request"
            let result = s.install_solution(rev, solution(vec![Move { from: 0, to: 1 }]));
            assert!(matches!(result, Err(SolveError::Stale)));
            assert!(s.snapshot().plan().is_none());
        }
    }

    mod playback_glue {
        use super::*;

        #[test]
        fn start_playback_needs_an_installed_plan() {
            let mut s = session();
            assert!(!s.start_playback());
        }

        #[tokio::test]
        async fn stepping_an_installed_plan_replays_it() {
            let mut s = session();
            let rev = s.snapshot().revision();
            s.install_solution(
                rev,
                solution(vec![Move { from: 0, to: 1 }, Move { from: 0, to: 2 }]),
            )
            .unwrap();
            assert!(s.start_playback());
            assert_eq!(s.playback_phase(), PlaybackPhase::ManualReady);
            s.step_playback();
            s.step_playback();
            assert_eq!(s.playback_phase(), PlaybackPhase::Stopped);
            let snap = s.snapshot();
            assert_eq!(snap.bottles()[1].waters, vec![Red, Red, Red]);
            assert_eq!(snap.bottles()[2].waters, vec![Blue]);
        }

        #[tokio::test]
        async fn cancelling_returns_to_the_solve_baseline() {
            let mut s = session();
            let baseline = s.snapshot().bottles().to_vec();
            let rev = s.snapshot().revision();
            s.install_solution(
                rev,
                solution(vec![Move { from: 0, to: 1 }, Move { from: 0, to: 2 }]),
            )
            .unwrap();
            s.start_playback();
            s.step_playback();
            s.cancel_playback();
            assert_eq!(s.snapshot().bottles(), baseline);
            assert_eq!(s.playback_step(), 0);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn no_auto_play_step_lands_on_edited_bottles() {
            use std::time::Duration;

            // shuttle a single red around three bottles so every plan move
            // stays pourable however many have already fired
            let mut s = GameSession::with_config(
                PuzzleState::new(vec![
                    Bottle::new(4, vec![Red]),
                    Bottle::empty(4),
                    Bottle::empty(4),
                ]),
                PlaybackConfig {
                    step_delay: Duration::from_millis(20),
                    settle_delay: Duration::from_millis(20),
                },
            );
            let rev = s.snapshot().revision();
            let shuttle: Vec<Move> = [[0, 1], [1, 2], [2, 0]]
                .into_iter()
                .cycle()
                .take(30)
                .map(Move::from)
                .collect();
            s.install_solution(rev, solution(shuttle)).unwrap();
            assert!(s.start_playback());
            s.play_all();
            tokio::time::sleep(Duration::from_millis(30)).await;

            // the edit returns with the run already dead: the bottles it
            // leaves behind are final, no due step fires on top of them
            assert!(s.add_water(0, Blue));
            let frozen = s.snapshot();
            assert_eq!(s.playback_phase(), PlaybackPhase::Stopped);
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(s.snapshot().bottles(), frozen.bottles());
        }

        #[tokio::test]
        async fn an_edit_mid_playback_drops_the_run() {
            let mut s = session();
            let rev = s.snapshot().revision();
            s.install_solution(
                rev,
                solution(vec![Move { from: 0, to: 1 }, Move { from: 0, to: 2 }]),
            )
            .unwrap();
            s.start_playback();
            s.step_playback();
            assert!(s.add_water(2, Blue));
            assert_eq!(s.playback_phase(), PlaybackPhase::Stopped);
            // the stale baseline is gone: stepping does nothing further
            let frozen = s.snapshot();
            s.step_playback();
            assert_eq!(s.snapshot().bottles(), frozen.bottles());
        }
    }

    mod persistence_glue {
        use super::*;

        #[test]
        fn export_import_round_trips() {
            let mut s = session();
            let json = s.export_json().unwrap();
            let bottles = s.snapshot().bottles().to_vec();
            assert!(s.clear_all());
            s.import_json(&json).unwrap();
            assert_eq!(s.snapshot().bottles(), bottles);
        }

        #[test]
        fn a_bad_import_leaves_the_previous_state_installed() {
            let mut s = session();
            let before = s.snapshot();
            assert!(s
                .import_json(r#"{"bottles":[{"capacity":1,"waters":["Do","Do"]}]}"#)
                .is_err());
            assert_eq!(s.snapshot().bottles(), before.bottles());
        }

        #[test]
        fn import_still_outdates_an_in_flight_solve() {
            let mut s = session();
            let rev = s.snapshot().revision();
            s.import_json(r#"{"bottles":[{"capacity":4,"waters":["Do"]},{"capacity":4,"waters":[]}]}"#)
                .unwrap();
            let result = s.install_solution(rev, solution(vec![Move { from: 0, to: 1 }]));
            assert!(matches!(result, Err(SolveError::Stale)));
        }
    }
}
