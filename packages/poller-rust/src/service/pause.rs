use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide pause flag, shared by handle.
///
/// Every clone observes the same flag. While paused, views skip their fetch
/// and diff; database and collection existence checks keep running.
#[derive(Debug, Clone, Default)]
pub struct PauseSwitch {
    paused: Arc<AtomicBool>,
}

impl PauseSwitch {
    /// Creates an unpaused switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether polling is currently paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Sets the flag.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Flips the flag and returns the new value.
    pub fn toggle(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::Relaxed)
    }
}
