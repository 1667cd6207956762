use std::collections::HashSet;
use std::sync::Arc;

use plume_core::{Record, RecordId, Timestamp, ToShort as _};
use tracing::trace;

use crate::filter::FilterConfig;

const LOG_TARGET: &str = "plume::store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// The store becomes exactly the admitted part of the input
    Replace,
    /// Records not already present are inserted at their sort position
    Append,
}

/// Deduplicated records, newest first
///
/// Records with equal `created_at` stay in admission order. The order is
/// restored inside every [`NoteStore::merge`], so no caller ever sees a
/// partially sorted store.
#[derive(Debug, Default)]
pub struct NoteStore {
    records: Vec<Arc<Record>>,
    ids: HashSet<RecordId>,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `incoming` and return the records actually admitted, in input
    /// order
    ///
    /// Every record passes through `filter`; duplicates (within the input or
    /// against the store) are admitted once.
    pub fn merge<I, R>(&mut self, incoming: I, mode: MergeMode, filter: &FilterConfig) -> Vec<Arc<Record>>
    where
        I: IntoIterator<Item = R>,
        R: Into<Arc<Record>>,
    {
        if mode == MergeMode::Replace {
            self.clear();
        }

        let mut admitted = vec![];
        for record in incoming {
            let record: Arc<Record> = record.into();

            if self.ids.contains(&record.id) {
                trace!(target: LOG_TARGET, id = %record.id.to_short(), "Skipping duplicate");
                continue;
            }
            if !filter.admits(&record) {
                trace!(target: LOG_TARGET, id = %record.id.to_short(), "Skipping filtered out");
                continue;
            }

            self.ids.insert(record.id);
            match mode {
                MergeMode::Replace => self.records.push(record.clone()),
                MergeMode::Append => self.insert_sorted(record.clone()),
            }
            admitted.push(record);
        }

        if mode == MergeMode::Replace {
            // stable: equal timestamps keep input order
            self.records
                .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }

        admitted
    }

    fn insert_sorted(&mut self, record: Arc<Record>) {
        let pos = self
            .records
            .partition_point(|existing| record.created_at <= existing.created_at);
        self.records.insert(pos, record);
    }

    pub fn records(&self) -> &[Arc<Record>] {
        &self.records
    }

    /// Stored records passing `filter`, without touching the store
    pub fn visible(&self, filter: &FilterConfig) -> Vec<Arc<Record>> {
        self.records
            .iter()
            .filter(|r| filter.admits(r))
            .cloned()
            .collect()
    }

    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.records.first().map(|r| r.created_at)
    }

    pub fn oldest_timestamp(&self) -> Option<Timestamp> {
        self.records.last().map(|r| r.created_at)
    }

    /// Number of records sharing [`Self::oldest_timestamp`]
    pub fn oldest_count(&self) -> usize {
        let Some(oldest) = self.oldest_timestamp() else {
            return 0;
        };
        self.records
            .iter()
            .rev()
            .take_while(|r| r.created_at == oldest)
            .count()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Arc<Record>> {
        if !self.ids.contains(id) {
            return None;
        }
        self.records.iter().find(|r| r.id == *id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests;
