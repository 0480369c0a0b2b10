use std::collections::BTreeMap;
use std::sync::Mutex;
use chrono::NaiveDate;
use tokio::task::JoinHandle;

use crate::session::types::ActivitySummary;

/// How many days of summaries are kept in memory.
pub const SUMMARY_RETENTION_DAYS: usize = 7;

/// The latest activity summary per day, as synchronized from the device.
#[derive(Default)]
pub struct DailySummaryCache {
    days: Mutex<BTreeMap<NaiveDate, ActivitySummary>>,
}

impl DailySummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activity_summary(&self, date: NaiveDate) -> Option<ActivitySummary> {
        self.days.lock().expect("Failed to lock summary cache").get(&date).copied()
    }

    /// Stores a summary. Step counts of a day only grow, so a stale summary never
    /// overwrites a newer one.
    pub fn record(&self, summary: ActivitySummary) {
        let mut days = self.days.lock().expect("Failed to lock summary cache");

        let entry = days.entry(summary.date).or_insert(summary);
        if summary.steps > entry.steps {
            *entry = summary;
        }

        while days.len() > SUMMARY_RETENTION_DAYS {
            days.pop_first();
        }
    }
}

/// Guard for a running telemetry poll. The poll stops when the guard is dropped.
#[derive(Debug)]
pub struct TelemetryPoll {
    handle: JoinHandle<()>,
}

impl TelemetryPoll {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        TelemetryPoll { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for TelemetryPoll {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
