use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Notification severity; the numeric rank orders `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info = 1,
    Warning = 2,
    Critical = 3,
}

impl Severity {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert derived from one machine row. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Same as `machine_id`; one record per machine.
    pub id: String,
    pub machine_id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

/// The published notification list. Readers always see a whole state.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NotificationFeedState {
    pub records: Vec<NotificationRecord>,
    pub count: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

impl NotificationFeedState {
    pub fn new(records: Vec<NotificationRecord>, updated_at: DateTime<Utc>) -> Self {
        Self {
            count: records.len(),
            records,
            updated_at: Some(updated_at),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered most severe first; ties keep snapshot order.
    pub fn by_severity(&self) -> Vec<NotificationRecord> {
        let mut sorted = self.records.clone();
        sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
        sorted
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        self.records
            .iter()
            .fold(SeverityCounts::default(), |mut counts, record| {
                match record.severity {
                    Severity::Critical => counts.critical += 1,
                    Severity::Warning => counts.warning += 1,
                    Severity::Info => counts.info += 1,
                }
                counts
            })
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.records.iter().map(|r| r.severity).max()
    }
}
