//! Processor liveness, published through a watch channel.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Last heartbeat of the processor loop.
///
/// Beats are independent of job activity: an idle processor still beats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Heartbeat {
    pub beats: u64,
    pub at: Option<DateTime<Utc>>,
}

impl Heartbeat {
    pub(crate) fn beat(&mut self, now: DateTime<Utc>) {
        self.beats += 1;
        self.at = Some(now);
    }

    /// Time since the last beat, `None` before the first one.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.at.map(|at| now - at)
    }
}
