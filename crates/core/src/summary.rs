use serde::{Deserialize, Serialize};

use crate::service::OutputDetails;

/// One finished output. Lives independently of the task that produced it:
/// tasks are cleared on a timer, summaries stay until the user removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub primary_name: String,
    pub secondary_name: String,
    pub download_url: String,
}

impl From<OutputDetails> for SummaryEntry {
    fn from(details: OutputDetails) -> Self {
        Self {
            primary_name: details.video1,
            secondary_name: details.video2,
            download_url: details.out_video,
        }
    }
}

/// Append-only list of finished outputs, individual removal allowed.
#[derive(Debug, Default)]
pub struct SummaryList {
    entries: Vec<SummaryEntry>,
}

impl SummaryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: SummaryEntry) {
        self.entries.push(entry);
    }

    pub fn remove(&mut self, index: usize) -> Option<SummaryEntry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    pub fn clear_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SummaryEntry] {
        &self.entries
    }

    /// Bulk close/download controls are shown only with two or more visible
    /// entries. Re-check after every insert and removal.
    pub fn bulk_controls_visible(&self) -> bool {
        self.entries.len() >= 2
    }

    /// Download URLs in list order, one independent download per entry.
    pub fn download_targets(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.download_url.as_str()).collect()
    }
}
