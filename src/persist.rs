//! JSON import/export of puzzle documents.
//!
//! The persisted shape is exactly the solve request body
//! (`{ "bottles": [{ "capacity": n, "waters": [...] }, ...] }`), so a saved
//! puzzle round-trips byte-compatibly through import and can be submitted to
//! the solver as-is. Import validates the core invariant before anything is
//! installed; on rejection the caller keeps its previous state.

use serde::{Deserialize, Serialize};

use crate::model::{Bottle, PuzzleState};

/// The puzzle reduced to its persistable fields: bottles only, in array
/// order. Selection and any installed plan are UI-session state and are
/// deliberately not part of the document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleDoc {
    pub bottles: Vec<Bottle>,
}

impl PuzzleDoc {
    pub fn from_state(state: &PuzzleState) -> Self {
        Self {
            bottles: state.bottles().to_vec(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// Malformed JSON, wrong shape, or an unknown color token.
    #[error("invalid puzzle document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bottle {index} holds {len} units but its capacity is {capacity}")]
    Overfilled {
        index: usize,
        len: usize,
        capacity: usize,
    },
    #[error("bottle {index} has zero capacity")]
    ZeroCapacity { index: usize },
}

/// Check the invariants serde cannot express.
pub(crate) fn validate(doc: &PuzzleDoc) -> Result<(), ImportError> {
    for (index, bottle) in doc.bottles.iter().enumerate() {
        if bottle.capacity == 0 {
            return Err(ImportError::ZeroCapacity { index });
        }
        if bottle.waters.len() > bottle.capacity {
            return Err(ImportError::Overfilled {
                index,
                len: bottle.waters.len(),
                capacity: bottle.capacity,
            });
        }
    }
    Ok(())
}

pub fn to_json(state: &PuzzleState) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&PuzzleDoc::from_state(state))
}

pub fn from_json(json: &str) -> Result<PuzzleState, ImportError> {
    let doc: PuzzleDoc = serde_json::from_str(json)?;
    validate(&doc)?;
    Ok(PuzzleState::new(doc.bottles))
}
