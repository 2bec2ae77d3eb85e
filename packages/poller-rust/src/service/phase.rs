//! Poll-cycle phase tracking.
//!
//! Uses `ArcSwap` so observers can read the current phase without locking
//! while the poll task transitions it.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Phase of the poll state machine.
///
/// Cycle: Idle -> Fetching -> Diffing -> Notifying -> Idle. Any failure
/// returns straight to Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Waiting for the next tick, or no connection.
    Idle,
    /// Counting and fetching documents from the store.
    Fetching,
    /// Normalizing and diffing the fetched batch.
    Diffing,
    /// Handing the change-set to the sink.
    Notifying,
}

impl fmt::Display for PollPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollPhase::Idle => "idle",
            PollPhase::Fetching => "fetching",
            PollPhase::Diffing => "diffing",
            PollPhase::Notifying => "notifying",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free holder of the current [`PollPhase`].
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: Arc<ArcSwap<PollPhase>>,
}

impl PhaseTracker {
    /// Creates a tracker in the `Idle` phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Arc::new(ArcSwap::from_pointee(PollPhase::Idle)),
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> PollPhase {
        **self.phase.load()
    }

    /// Transitions to `phase`.
    pub fn set(&self, phase: PollPhase) {
        self.phase.store(Arc::new(phase));
    }

    /// Enters `phase` and returns a guard that resets to `Idle` when dropped,
    /// including on early return through `?`.
    #[must_use]
    pub fn enter(&self, phase: PollPhase) -> PhaseGuard {
        self.set(phase);
        PhaseGuard {
            tracker: self.clone(),
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Resets the tracker to `Idle` on drop.
#[derive(Debug)]
pub struct PhaseGuard {
    tracker: PhaseTracker,
}

impl PhaseGuard {
    /// Moves to the next phase of the same cycle.
    pub fn advance(&self, phase: PollPhase) {
        self.tracker.set(phase);
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.tracker.set(PollPhase::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        assert_eq!(PhaseTracker::new().phase(), PollPhase::Idle);
    }

    #[test]
    fn guard_walks_cycle_and_resets() {
        let tracker = PhaseTracker::new();
        let observer = tracker.clone();
        {
            let guard = tracker.enter(PollPhase::Fetching);
            assert_eq!(observer.phase(), PollPhase::Fetching);
            guard.advance(PollPhase::Diffing);
            assert_eq!(observer.phase(), PollPhase::Diffing);
            guard.advance(PollPhase::Notifying);
            assert_eq!(observer.phase(), PollPhase::Notifying);
        }
        assert_eq!(observer.phase(), PollPhase::Idle);
    }

    #[test]
    fn guard_resets_on_early_exit() {
        fn failing(tracker: &PhaseTracker) -> Result<(), ()> {
            let _guard = tracker.enter(PollPhase::Fetching);
            let fetched: Result<(), ()> = Err(());
            fetched?;
            Ok(())
        }
        let tracker = PhaseTracker::new();
        assert!(failing(&tracker).is_err());
        assert_eq!(tracker.phase(), PollPhase::Idle);
    }

    #[test]
    fn display_names() {
        assert_eq!(PollPhase::Notifying.to_string(), "notifying");
    }
}
