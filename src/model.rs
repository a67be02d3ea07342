use serde::{Deserialize, Serialize};

/// Liquid colors. The serde names are the wire tokens the solver service and
/// the puzzle file format use; saved puzzles round-trip through them
/// unchanged. Only equality matters, there is no ordering between colors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    #[serde(rename = "XanhLaNhat")]
    LightGreen,
    #[serde(rename = "XanhBlueNhat")]
    LightBlue,
    #[serde(rename = "XanhLa")]
    Green,
    #[serde(rename = "Xam")]
    Gray,
    #[serde(rename = "Tim")]
    Purple,
    #[serde(rename = "Hong")]
    Pink,
    #[serde(rename = "Do")]
    Red,
    #[serde(rename = "XanhBlue")]
    Blue,
    #[serde(rename = "Nau")]
    Brown,
    #[serde(rename = "XanhCyan")]
    Cyan,
    #[serde(rename = "Cam")]
    Orange,
    #[serde(rename = "Vang")]
    Yellow,
    #[serde(rename = "XanhNavy")]
    Navy,
}

impl Color {
    pub const ALL: [Color; 13] = [
        Color::LightGreen,
        Color::LightBlue,
        Color::Green,
        Color::Gray,
        Color::Purple,
        Color::Pink,
        Color::Red,
        Color::Blue,
        Color::Brown,
        Color::Cyan,
        Color::Orange,
        Color::Yellow,
        Color::Navy,
    ];
}

/// One bottle: fixed capacity, bottom-to-top ordered contents. The last
/// element of `waters` is the top of the bottle; only the top is ever read
/// or mutated by a pour. Invariant: `waters.len() <= capacity`.
///
/// The serde shape is exactly the wire/persistence format:
/// `{ "capacity": n, "waters": ["Do", ...] }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottle {
    pub capacity: usize,
    pub waters: Vec<Color>,
}

impl Bottle {
    pub fn empty(capacity: usize) -> Self {
        Self {
            capacity,
            waters: Vec::with_capacity(capacity),
        }
    }

    pub fn new(capacity: usize, waters: Vec<Color>) -> Self {
        Self { capacity, waters }
    }

    pub fn is_empty(&self) -> bool {
        self.waters.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.waters.len() >= self.capacity
    }

    pub fn free_space(&self) -> usize {
        self.capacity - self.waters.len().min(self.capacity)
    }

    pub fn top(&self) -> Option<Color> {
        self.waters.last().copied()
    }

    /// Length of the contiguous same-color run at the top.
    pub fn top_run_len(&self) -> usize {
        let Some(top) = self.top() else { return 0 };
        self.waters.iter().rev().take_while(|&&c| c == top).count()
    }
}

/// A single pour from one bottle index to another. On the wire this is the
/// two-element array `[from, to]` the solver emits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

impl From<[usize; 2]> for Move {
    fn from([from, to]: [usize; 2]) -> Self {
        Self { from, to }
    }
}

impl From<Move> for [usize; 2] {
    fn from(m: Move) -> Self {
        [m.from, m.to]
    }
}

/// Ordered move list computed by the external solver, consumed strictly in
/// order against the exact baseline it was computed for.
pub type SolutionPlan = Vec<Move>;

/// Two-phase click selection state. The tagged form rules out an armed index
/// silently outliving the bottle it points at: structural edits reset it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    Idle,
    Armed(usize),
}

/// The whole puzzle: all bottles (index = stable bottle id), the selection
/// cursor, and the currently installed solution plan, if any.
///
/// Bottles are only ever mutated through [`PuzzleState::apply_pour`] or the
/// editor operations on the session; `revision` counts every content change
/// made outside playback, which is what invalidates an installed plan and
/// lets an in-flight solve detect that its baseline is gone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PuzzleState {
    bottles: Vec<Bottle>,
    selection: Selection,
    plan: Option<SolutionPlan>,
    revision: u64,
}

impl PuzzleState {
    pub fn new(bottles: Vec<Bottle>) -> Self {
        Self {
            bottles,
            selection: Selection::Idle,
            plan: None,
            revision: 0,
        }
    }

    pub fn bottles(&self) -> &[Bottle] {
        &self.bottles
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn plan(&self) -> Option<&SolutionPlan> {
        self.plan.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether pouring `from` into `to` is legal. Pure and O(1): never true
    /// for a self-pour, an out-of-range index, an empty source or a full
    /// destination; an empty destination accepts any color, otherwise the
    /// two top colors must match.
    pub fn can_pour(&self, from: usize, to: usize) -> bool {
        if from == to {
            return false;
        }
        let (Some(src), Some(dst)) = (self.bottles.get(from), self.bottles.get(to)) else {
            return false;
        };
        if src.is_empty() || dst.is_full() {
            return false;
        }
        match dst.top() {
            None => true,
            Some(dst_top) => src.top() == Some(dst_top),
        }
    }

    /// Maximal same-color transfer of the source's top run into `to`,
    /// bounded by the destination's free space. A run longer than the free
    /// space pours partially and leaves the remainder behind. Strict no-op
    /// (returns false, nothing mutated) when [`Self::can_pour`] is false.
    ///
    /// Clears the selection on success. Does not touch the installed plan;
    /// whether a pour invalidates it depends on the caller (a user pour
    /// does, a playback pour must not).
    pub fn apply_pour(&mut self, from: usize, to: usize) -> bool {
        if !self.can_pour(from, to) {
            return false;
        }
        let Some(color) = self.bottles[from].top() else {
            return false;
        };
        let amount = self.bottles[from]
            .top_run_len()
            .min(self.bottles[to].free_space());
        for _ in 0..amount {
            self.bottles[from].waters.pop();
            self.bottles[to].waters.push(color);
        }
        self.selection = Selection::Idle;
        tracing::debug!(from, to, amount, "poured");
        true
    }

    pub(crate) fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }

    pub(crate) fn bottles_mut(&mut self) -> &mut Vec<Bottle> {
        &mut self.bottles
    }

    pub(crate) fn install_plan(&mut self, plan: SolutionPlan) {
        self.plan = Some(plan);
    }

    /// Record a content mutation made outside playback: the installed plan
    /// is only valid for the exact baseline it was computed against, so it
    /// is dropped, and the revision moves so an in-flight solve can notice.
    pub(crate) fn mark_edited(&mut self) {
        self.revision += 1;
        self.plan = None;
        self.selection = Selection::Idle;
    }

    /// Keep the revision monotonic across wholesale state replacement
    /// (import installs a fresh state but an in-flight solve still compares
    /// against the old counter).
    pub(crate) fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    /// Replace the bottles wholesale during playback (begin/cancel reset to
    /// the baseline). Playback-internal, so the revision does not move.
    pub(crate) fn reset_bottles(&mut self, bottles: Vec<Bottle>) {
        self.bottles = bottles;
        self.selection = Selection::Idle;
    }
}
