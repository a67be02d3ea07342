//! Client for the external solve service.
//!
//! The solver itself is an opaque collaborator reached over HTTP: we POST the
//! puzzle document to `/api/solve/` and get back either a move plan with a
//! step count or a structured error. Search internals live entirely on the
//! other side of this contract.

use std::time::Duration;

use serde::Deserialize;

use crate::model::SolutionPlan;
use crate::persist::PuzzleDoc;

/// Default service location, matching the original deployment.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

const SOLVE_PATH: &str = "/api/solve/";

const CONNECT_TIMEOUT_SECS: u64 = 5;
// The backend gives itself 30 s to search before answering 408; leave room
// for that plus transfer.
const REQUEST_TIMEOUT_SECS: u64 = 35;

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// Local precondition: there is no water to sort.
    #[error("nothing to solve: every bottle is empty")]
    EmptyPuzzle,
    /// Local precondition: no bottle has room to receive a pour.
    #[error("no free bottle space to pour into")]
    NoFreeSpace,
    /// The solver answered that no solution exists for this puzzle.
    #[error("solver found no solution: {0}")]
    Infeasible(String),
    /// Any other non-success answer (bad request, timeout, server error).
    #[error("solver rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    /// The service could not be reached at all.
    #[error("solver unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    /// A success status with a body we cannot make sense of.
    #[error("malformed solver response: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The puzzle was edited while the request was in flight; the response
    /// no longer matches any live baseline and was discarded.
    #[error("puzzle was edited while solving; stale plan discarded")]
    Stale,
}

/// A successful solve: the plan to replay, in order, and its length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    pub plan: SolutionPlan,
    pub steps: usize,
}

#[derive(Deserialize)]
struct SuccessBody {
    plan: SolutionPlan,
    steps: Option<usize>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct SolverClient {
    base_url: String,
    http: reqwest::Client,
}

impl SolverClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("failed to build solver HTTP client with timeouts: {e}");
                reqwest::Client::new()
            });
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, http }
    }

    /// Heuristic sufficiency check run before any request goes out. Not a
    /// solvability proof; it only rules out puzzles the solver cannot do
    /// anything with at all.
    pub fn check_preconditions(doc: &PuzzleDoc) -> Result<(), SolveError> {
        if doc.bottles.iter().all(|b| b.is_empty()) {
            return Err(SolveError::EmptyPuzzle);
        }
        if doc.bottles.iter().all(|b| b.is_full()) {
            return Err(SolveError::NoFreeSpace);
        }
        Ok(())
    }

    /// Submit the puzzle and wait for the solver's answer. The request is
    /// not abortable in flight; staleness against later edits is the
    /// caller's concern (see the session).
    pub async fn solve(&self, doc: &PuzzleDoc) -> Result<Solution, SolveError> {
        Self::check_preconditions(doc)?;
        let url = format!("{}{SOLVE_PATH}", self.base_url);
        tracing::info!(bottles = doc.bottles.len(), %url, "requesting solve");
        let response = self.http.post(&url).json(doc).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            let solution = parse_success(&body)?;
            tracing::info!(steps = solution.steps, "solver returned a plan");
            Ok(solution)
        } else {
            Err(classify_failure(status.as_u16(), &body))
        }
    }
}

impl Default for SolverClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

fn parse_success(body: &str) -> Result<Solution, SolveError> {
    let parsed: SuccessBody = serde_json::from_str(body)?;
    let steps = parsed.steps.unwrap_or(parsed.plan.len());
    Ok(Solution {
        plan: parsed.plan,
        steps,
    })
}

fn classify_failure(status: u16, body: &str) -> SolveError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());
    // 404 is the backend's "No solution found"
    if status == 404 {
        SolveError::Infeasible(message)
    } else {
        SolveError::Rejected { status, message }
    }
}
