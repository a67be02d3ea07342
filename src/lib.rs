//! Water-sort puzzle engine.
//!
//! The crate owns the canonical puzzle data model and everything with real
//! state-machine behavior around it:
//!
//! - [`model`] - colors, bottles, the puzzle state and the pour engine
//!   (validity predicate + maximal same-color transfer)
//! - [`session`] - the interactive session: two-phase click selection,
//!   editor operations, solve orchestration
//! - [`playback`] - cancellable manual/auto replay of a solution plan
//! - [`solver`] - HTTP client for the external solve service
//! - [`persist`] - JSON import/export, byte-compatible with the solve
//!   request body
//!
//! Rendering is an external collaborator: it feeds events into
//! [`session::GameSession`] and re-renders from state snapshots. The solver's
//! search lives behind the HTTP contract and is not implemented here.

pub mod model;
pub mod persist;
pub mod playback;
pub mod session;
pub mod solver;

pub use model::{Bottle, Color, Move, PuzzleState, Selection, SolutionPlan};
pub use persist::{ImportError, PuzzleDoc};
pub use playback::{PlaybackConfig, PlaybackController, PlaybackPhase};
pub use session::GameSession;
pub use solver::{Solution, SolveError, SolverClient};
