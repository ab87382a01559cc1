//! Per-kind health report written by the runners.

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::ResourceKind;

/// Lifecycle state of the watcher of one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherState {
    /// Registered, the first watcher has not been built yet.
    Starting,
    /// A watcher is live and being stepped.
    Running,
    /// The factory failed `attempt - 1` times in a row and is being called again.
    Recreating { attempt: u32 },
    /// The runner gave up; this kind is no longer watched.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherHealth {
    pub state: WatcherState,
    /// Number of watchers built so far.
    pub generation: u64,
    /// Number of failed watchers that were discarded.
    pub recycles: u64,
    /// Successful steps over all generations.
    pub steps: u64,
    pub last_error: Option<String>,
}

impl Default for WatcherHealth {
    fn default() -> Self {
        Self {
            state: WatcherState::Starting,
            generation: 0,
            recycles: 0,
            steps: 0,
            last_error: None,
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => f.write_str("starting"),
            Self::Running => f.write_str("running"),
            Self::Recreating { attempt } => write!(f, "recreating (attempt {attempt})"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

impl fmt::Display for WatcherHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, generation {}, {} recycles, {} steps",
            self.state, self.generation, self.recycles, self.steps
        )?;
        if let Some(err) = &self.last_error {
            write!(f, ", last error: {err}")?;
        }
        Ok(())
    }
}

/// Shared health registry. Clones refer to the same records.
#[derive(Debug, Clone, Default)]
pub struct Health {
    records: Arc<Mutex<BTreeMap<ResourceKind, WatcherHealth>>>,
}

impl Health {
    pub fn get(&self, kind: ResourceKind) -> Option<WatcherHealth> {
        self.records.lock().get(&kind).cloned()
    }

    pub fn snapshot(&self) -> Vec<(ResourceKind, WatcherHealth)> {
        self.records
            .lock()
            .iter()
            .map(|(kind, health)| (*kind, health.clone()))
            .collect()
    }

    /// `true` unless some registered kind has failed permanently.
    pub fn is_healthy(&self) -> bool {
        !self
            .records
            .lock()
            .values()
            .any(|health| matches!(health.state, WatcherState::Failed { .. }))
    }

    /// One line per kind, as printed by the `status` command.
    pub fn report(&self) -> String {
        self.snapshot()
            .into_iter()
            .map(|(kind, health)| format!("{kind}: {health}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub(crate) fn update(&self, kind: ResourceKind, f: impl FnOnce(&mut WatcherHealth)) {
        f(self.records.lock().entry(kind).or_default());
    }
}
