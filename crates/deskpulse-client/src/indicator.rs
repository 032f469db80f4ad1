//! Combined "background work in progress" badge.

use tokio::sync::watch;

use deskpulse_core::{Error, Result};

use crate::tracker::TrackerState;

/// Number of job kinds with active work.
pub fn active_count(import: &TrackerState, analysis: &TrackerState) -> usize {
    usize::from(import.is_active()) + usize::from(analysis.is_active())
}

/// Reduces the import and analysis trackers to one count. Holds no state
/// of its own beyond the two subscriptions.
pub struct ActiveWorkIndicator {
    import: watch::Receiver<TrackerState>,
    analysis: watch::Receiver<TrackerState>,
}

impl ActiveWorkIndicator {
    pub fn new(
        import: watch::Receiver<TrackerState>,
        analysis: watch::Receiver<TrackerState>,
    ) -> Self {
        Self { import, analysis }
    }

    pub fn count(&self) -> usize {
        active_count(&self.import.borrow(), &self.analysis.borrow())
    }

    /// Badge text, `None` when nothing is active.
    pub fn badge(&self) -> Option<String> {
        match self.count() {
            0 => None,
            n => Some(n.to_string()),
        }
    }

    /// Wait until either tracker publishes, then return the new count.
    pub async fn changed(&mut self) -> Result<usize> {
        let changed = tokio::select! {
            r = self.import.changed() => r,
            r = self.analysis.changed() => r,
        };
        changed.map_err(|_| Error::Internal("progress tracker dropped".to_string()))?;
        Ok(self.count())
    }
}
