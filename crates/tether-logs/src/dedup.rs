use crate::line::LogLine;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Bounded, ordered, duplicate-free log buffer.
///
/// `ids` always mirrors the ids in `lines`; eviction removes from both in
/// the same step.
#[derive(Debug, Clone)]
pub struct LogDeduplicator {
    lines: VecDeque<LogLine>,
    ids: HashSet<String>,
    capacity: usize,
    system_counter: u64,
    duplicates: u64,
    evicted: u64,
}

impl Default for LogDeduplicator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl LogDeduplicator {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
            system_counter: 0,
            duplicates: 0,
            evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn id_count(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Returns false when a line with the same id is already buffered.
    pub fn insert(&mut self, line: LogLine) -> bool {
        if !self.ids.insert(line.id.clone()) {
            self.duplicates += 1;
            return false;
        }
        self.lines.push_back(line);
        while self.lines.len() > self.capacity {
            if let Some(oldest) = self.lines.pop_front() {
                self.ids.remove(&oldest.id);
                self.evicted += 1;
            }
        }
        true
    }

    pub fn insert_raw(&mut self, raw: &str, received_at: DateTime<Utc>) -> bool {
        match LogLine::parse(raw, received_at) {
            Some(line) => self.insert(line),
            None => false,
        }
    }

    /// Appends a locally generated notice. Never deduplicated against
    /// earlier notices with the same text.
    pub fn push_system(&mut self, message: &str, at: DateTime<Utc>) -> String {
        self.system_counter += 1;
        let line = LogLine::system(self.system_counter, message, at);
        let id = line.id.clone();
        self.insert(line);
        id
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.ids.clear();
    }
}
