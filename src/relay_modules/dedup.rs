use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Repeats of the same alert key closer together than this are dropped.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct LastAlert {
    key: String,
    received_at: Instant,
}

/// Debounce filter shared by all pipeline workers.
///
/// The state always holds the most recently received alert, whether or not
/// that alert was itself a duplicate, so a steady stream of repeats keeps
/// being suppressed.
#[derive(Debug)]
pub struct Deduplicator {
    window: Duration,
    last: Mutex<Option<LastAlert>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::with_window(DEBOUNCE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Checks `key` against the previous alert and records it, as one step.
    pub fn is_duplicate(&self, key: &str, now: Instant) -> bool {
        // A poisoned lock only means another worker panicked mid-update; the
        // stored pair is still a valid value.
        let mut last_guard = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let duplicate = match last_guard.as_ref() {
            Some(last) => {
                last.key == key && now.saturating_duration_since(last.received_at) < self.window
            }
            None => false,
        };

        *last_guard = Some(LastAlert {
            key: key.to_string(),
            received_at: now,
        });

        duplicate
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}
