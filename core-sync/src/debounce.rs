//! Trailing-edge debouncing of change events
//!
//! Pure bookkeeping: callers supply the current instant, so the logic is
//! testable without sleeping. Every observation of a path pushes its
//! deadline to `now + window`; the path is due once it has been quiet for a
//! whole window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// A burst of changes that has settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledChange {
    pub path: PathBuf,
    /// Provider timestamp of the latest event in the burst (Unix millis)
    pub last_observed_at: i64,
    /// Events folded into this change
    pub events: u32,
}

#[derive(Debug)]
struct Burst {
    deadline: Instant,
    last_observed_at: i64,
    events: u32,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    bursts: HashMap<PathBuf, Burst>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            bursts: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event for `path`. Returns `true` if it started a new burst.
    pub fn observe(&mut self, path: PathBuf, observed_at: i64, now: Instant) -> bool {
        let deadline = now + self.window;
        match self.bursts.get_mut(&path) {
            Some(burst) => {
                burst.deadline = deadline;
                burst.last_observed_at = burst.last_observed_at.max(observed_at);
                burst.events += 1;
                false
            }
            None => {
                self.bursts.insert(
                    path,
                    Burst {
                        deadline,
                        last_observed_at: observed_at,
                        events: 1,
                    },
                );
                true
            }
        }
    }

    /// Drop a pending burst, e.g. because the path was deleted
    pub fn cancel(&mut self, path: &Path) -> bool {
        self.bursts.remove(path).is_some()
    }

    /// Earliest deadline among pending bursts
    pub fn next_deadline(&self) -> Option<Instant> {
        self.bursts.values().map(|b| b.deadline).min()
    }

    /// Remove and return every burst whose deadline has passed, oldest first
    pub fn drain_due(&mut self, now: Instant) -> Vec<SettledChange> {
        let due: Vec<PathBuf> = self
            .bursts
            .iter()
            .filter(|(_, burst)| burst.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        let mut settled: Vec<(Instant, SettledChange)> = due
            .into_iter()
            .filter_map(|path| {
                let burst = self.bursts.remove(&path)?;
                Some((
                    burst.deadline,
                    SettledChange {
                        path,
                        last_observed_at: burst.last_observed_at,
                        events: burst.events,
                    },
                ))
            })
            .collect();
        settled.sort_by_key(|(deadline, _)| *deadline);
        settled.into_iter().map(|(_, change)| change).collect()
    }

    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }
}
