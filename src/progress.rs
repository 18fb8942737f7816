//! Per-run progress tracking.
//!
//! Every pipeline run gets its own [`ProgressHandle`], registered in a shared
//! [`ProgressBoard`] under a [`RunId`]. Progress is an integer percentage that
//! only moves forward and always ends at 100, whether the run succeeds or
//! fails.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Finished runs kept for querying by default
const DEFAULT_RETAINED_RUNS: usize = 64;

/// Pipeline stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Sampling,
    EmotionInference,
    FeatureExtraction,
    DeceptionScoring,
    Done,
}

impl RunStage {
    /// Percentage range the stage reports into
    #[must_use]
    pub fn range(self) -> (u8, u8) {
        match self {
            Self::Idle => (0, 0),
            Self::Sampling => (5, 20),
            Self::EmotionInference => (20, 50),
            Self::FeatureExtraction => (50, 90),
            Self::DeceptionScoring => (90, 100),
            Self::Done => (100, 100),
        }
    }
}

/// Identifier of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[derive(Debug)]
struct RunState {
    percent: AtomicU8,
    stage: Mutex<RunStage>,
}

impl RunState {
    fn new() -> Self {
        Self {
            percent: AtomicU8::new(0),
            stage: Mutex::new(RunStage::Idle),
        }
    }

    fn stage_lock(&self) -> MutexGuard<'_, RunStage> {
        // A poisoned stage is still a valid enum value
        self.stage.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Point-in-time view of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub run: RunId,
    pub percent: u8,
    pub stage: RunStage,
}

/// Writer side of one run's progress
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    id: RunId,
    state: Arc<RunState>,
}

impl ProgressHandle {
    /// Handle not registered on any board, for callers that do not report progress
    #[must_use]
    pub fn detached() -> Self {
        Self {
            id: RunId(0),
            state: Arc::new(RunState::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Current percentage
    #[must_use]
    pub fn percent(&self) -> u8 {
        self.state.percent.load(Ordering::SeqCst)
    }

    /// Current stage
    #[must_use]
    pub fn stage(&self) -> RunStage {
        *self.state.stage_lock()
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            run: self.id,
            percent: self.percent(),
            stage: self.stage(),
        }
    }

    /// Raise progress to `percent`; lower values are ignored
    pub fn advance(&self, percent: u8) {
        self.state.percent.fetch_max(percent.min(100), Ordering::SeqCst);
    }

    /// Enter `stage` and move to the start of its range
    pub fn enter(&self, stage: RunStage) {
        *self.state.stage_lock() = stage;
        self.advance(stage.range().0);
        log::debug!("{} entered {:?}", self.id, stage);
    }

    /// Report `done` of `total` units within the current stage
    #[allow(clippy::cast_possible_truncation)]
    pub fn report(&self, done: usize, total: usize) {
        let (start, end) = self.stage().range();
        if total == 0 {
            return;
        }
        let span = usize::from(end - start);
        let offset = (span * done.min(total)) / total;
        self.advance(start + offset as u8);
    }

    /// Force progress to 100; the stage becomes `Done` on success and `Idle` on failure
    pub fn finish(&self, succeeded: bool) {
        *self.state.stage_lock() = if succeeded { RunStage::Done } else { RunStage::Idle };
        self.advance(100);
    }

    /// Guard that finishes the run when dropped, as failed unless marked otherwise
    #[must_use]
    pub fn completion_guard(&self) -> CompletionGuard<'_> {
        CompletionGuard {
            handle: self,
            succeeded: false,
        }
    }
}

/// Forces a run to 100% on every exit path
#[derive(Debug)]
pub struct CompletionGuard<'a> {
    handle: &'a ProgressHandle,
    succeeded: bool,
}

impl CompletionGuard<'_> {
    /// Mark the run successful before the guard drops
    pub fn succeed(&mut self) {
        self.succeeded = true;
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.handle.finish(self.succeeded);
    }
}

/// Registry of run handles shared between the pipeline and progress readers
#[derive(Debug)]
pub struct ProgressBoard {
    next_id: AtomicU64,
    runs: Mutex<BTreeMap<RunId, Arc<RunState>>>,
    retained: usize,
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_RUNS)
    }
}

impl ProgressBoard {
    /// Board remembering at most `retained` runs
    #[must_use]
    pub fn new(retained: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            runs: Mutex::new(BTreeMap::new()),
            retained: retained.max(1),
        }
    }

    fn runs(&self) -> MutexGuard<'_, BTreeMap<RunId, Arc<RunState>>> {
        self.runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a new run at 0%
    pub fn start_run(&self) -> ProgressHandle {
        let id = RunId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let state = Arc::new(RunState::new());
        let mut runs = self.runs();
        runs.insert(id, Arc::clone(&state));
        while runs.len() > self.retained {
            runs.pop_first();
        }
        ProgressHandle { id, state }
    }

    /// Progress of a specific run, `None` if unknown or evicted
    #[must_use]
    pub fn progress(&self, id: RunId) -> Option<ProgressSnapshot> {
        let state = Arc::clone(self.runs().get(&id)?);
        Some(ProgressHandle { id, state }.snapshot())
    }

    /// Progress of the most recently started run
    #[must_use]
    pub fn latest(&self) -> Option<ProgressSnapshot> {
        let id = *self.runs().keys().next_back()?;
        self.progress(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let handle = ProgressHandle::detached();
        handle.advance(40);
        handle.advance(10);
        assert_eq!(handle.percent(), 40);
        handle.advance(250);
        assert_eq!(handle.percent(), 100);
    }

    #[test]
    fn test_stage_reporting_maps_into_range() {
        let handle = ProgressHandle::detached();
        handle.enter(RunStage::Sampling);
        assert_eq!(handle.percent(), 5);
        handle.report(150, 300);
        assert_eq!(handle.percent(), 12);

        handle.enter(RunStage::FeatureExtraction);
        assert_eq!(handle.percent(), 50);
        handle.report(300, 300);
        assert_eq!(handle.percent(), 90);
        handle.report(1, 0);
        assert_eq!(handle.percent(), 90);
    }

    #[test]
    fn test_guard_forces_completion_on_failure() {
        let handle = ProgressHandle::detached();
        {
            let _guard = handle.completion_guard();
            handle.enter(RunStage::EmotionInference);
        }
        assert_eq!(handle.percent(), 100);
        assert_eq!(handle.stage(), RunStage::Idle);

        let handle = ProgressHandle::detached();
        {
            let mut guard = handle.completion_guard();
            guard.succeed();
        }
        assert_eq!(handle.stage(), RunStage::Done);
    }

    #[test]
    fn test_board_tracks_runs_independently() {
        let board = ProgressBoard::default();
        let first = board.start_run();
        let second = board.start_run();
        first.advance(30);
        second.advance(70);

        assert_eq!(board.progress(first.id()).map(|s| s.percent), Some(30));
        assert_eq!(board.progress(first.id()), Some(first.snapshot()));
        assert_eq!(board.latest().map(|s| (s.run, s.percent)), Some((second.id(), 70)));
    }

    #[test]
    fn test_board_evicts_oldest_runs() {
        let board = ProgressBoard::new(2);
        let first = board.start_run();
        let _second = board.start_run();
        let third = board.start_run();
        assert!(board.progress(first.id()).is_none());
        assert!(board.progress(third.id()).is_some());
    }
}
