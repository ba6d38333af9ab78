use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;

pub const DEFAULT_TRANSCRIPT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    User,
    AgentStatus,
    AgentAnswer,
    ToolCall,
    ToolResult,
    FileOp,
    GitOp,
    BuildProgress,
    DeployDone,
    Plan,
    Walkthrough,
    Error,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::AgentStatus => "agent_status",
            Self::AgentAnswer => "agent_answer",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::FileOp => "file_op",
            Self::GitOp => "git_op",
            Self::BuildProgress => "build_progress",
            Self::DeployDone => "deploy_done",
            Self::Plan => "plan",
            Self::Walkthrough => "walkthrough",
            Self::Error => "error",
        }
    }

    /// Only one entry of these kinds stays expanded at a time.
    pub fn is_collapsible_tool(self) -> bool {
        matches!(self, Self::ToolCall | Self::ToolResult)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    Tool {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    ToolResult {
        name: String,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },
    File {
        operation: String,
        path: String,
    },
    Git {
        operation: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
    },
    Build {
        stage: String,
        progress: f64,
    },
    Deploy {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Plan {
        #[serde(skip_serializing_if = "Option::is_none")]
        plan_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        markdown: Option<String>,
    },
    Walkthrough {
        #[serde(skip_serializing_if = "Option::is_none")]
        walkthrough_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TranscriptEntry {
    pub seq: u64,
    pub kind: EntryKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<EntryPayload>,
    pub collapsed: bool,
    pub created_at: DateTime<Utc>,
}

/// Ordered, bounded transcript.
///
/// Entries are kept sorted by `seq` (creation order), so lookups by seq are a
/// binary search and the two tracked entries (the open thinking placeholder
/// and the single expanded tool entry) are plain seq handles.
#[derive(Debug, Clone)]
pub struct Transcript {
    entries: VecDeque<TranscriptEntry>,
    next_seq: u64,
    capacity: usize,
    open_placeholder: Option<u64>,
    expanded_tool: Option<u64>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRANSCRIPT_CAPACITY)
    }
}

impl Transcript {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            open_placeholder: None,
            expanded_tool: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.back()
    }

    pub fn get(&self, seq: u64) -> Option<&TranscriptEntry> {
        self.position(seq).map(|index| &self.entries[index])
    }

    pub fn open_placeholder(&self) -> Option<&TranscriptEntry> {
        self.open_placeholder.and_then(|seq| self.get(seq))
    }

    pub fn has_open_placeholder(&self) -> bool {
        self.open_placeholder.is_some()
    }

    pub fn push(
        &mut self,
        kind: EntryKind,
        text: impl Into<String>,
        payload: Option<EntryPayload>,
        created_at: DateTime<Utc>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        if kind.is_collapsible_tool() {
            if let Some(previous) = self.expanded_tool.take() {
                if let Some(index) = self.position(previous) {
                    self.entries[index].collapsed = true;
                }
            }
            self.expanded_tool = Some(seq);
        }

        self.entries.push_back(TranscriptEntry {
            seq,
            kind,
            text: text.into(),
            payload,
            collapsed: false,
            created_at,
        });

        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.forget(evicted.seq);
            }
        }
        seq
    }

    /// Appends a thinking placeholder unless one is already open.
    pub fn open_placeholder_with(
        &mut self,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Option<u64> {
        if self.open_placeholder.is_some() {
            return None;
        }
        let seq = self.push(EntryKind::AgentStatus, text, None, created_at);
        self.open_placeholder = Some(seq);
        Some(seq)
    }

    /// Keeps the placeholder in history but stops treating it as open.
    pub fn resolve_placeholder(&mut self) -> Option<u64> {
        self.open_placeholder.take()
    }

    pub fn remove_placeholder(&mut self) -> Option<TranscriptEntry> {
        let seq = self.open_placeholder.take()?;
        self.remove(seq)
    }

    pub fn remove(&mut self, seq: u64) -> Option<TranscriptEntry> {
        let index = self.position(seq)?;
        let removed = self.entries.remove(index)?;
        self.forget(seq);
        Some(removed)
    }

    fn forget(&mut self, seq: u64) {
        if self.open_placeholder == Some(seq) {
            self.open_placeholder = None;
        }
        if self.expanded_tool == Some(seq) {
            self.expanded_tool = None;
        }
    }

    fn position(&self, seq: u64) -> Option<usize> {
        self.entries
            .binary_search_by_key(&seq, |entry| entry.seq)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000, 0).single().expect("valid timestamp")
    }

    fn tool(name: &str) -> Option<EntryPayload> {
        Some(EntryPayload::Tool {
            name: name.to_string(),
            input: None,
        })
    }

    #[test]
    fn only_newest_tool_entry_is_expanded() {
        let mut transcript = Transcript::default();
        let first = transcript.push(EntryKind::ToolCall, "read", tool("read_file"), ts());
        let note = transcript.push(EntryKind::FileOp, "edit a.rs", None, ts());
        let second = transcript.push(EntryKind::ToolResult, "ok", None, ts());
        let third = transcript.push(EntryKind::ToolCall, "write", tool("write_file"), ts());

        assert!(transcript.get(first).expect("first").collapsed);
        assert!(!transcript.get(note).expect("note").collapsed);
        assert!(transcript.get(second).expect("second").collapsed);
        assert!(!transcript.get(third).expect("third").collapsed);
        let expanded = transcript
            .entries()
            .filter(|entry| entry.kind.is_collapsible_tool() && !entry.collapsed)
            .count();
        assert_eq!(expanded, 1);
    }

    #[test]
    fn placeholder_is_idempotent_and_removable() {
        let mut transcript = Transcript::default();
        assert!(transcript.open_placeholder_with("Thinking", ts()).is_some());
        assert!(transcript.open_placeholder_with("Planning", ts()).is_none());
        assert_eq!(transcript.len(), 1);

        let removed = transcript.remove_placeholder().expect("placeholder");
        assert_eq!(removed.text, "Thinking");
        assert!(transcript.is_empty());
        assert!(transcript.remove_placeholder().is_none());
    }

    #[test]
    fn resolved_placeholder_stays_visible() {
        let mut transcript = Transcript::default();
        let seq = transcript
            .open_placeholder_with("Thinking", ts())
            .expect("open");
        assert_eq!(transcript.resolve_placeholder(), Some(seq));
        assert!(!transcript.has_open_placeholder());
        assert!(transcript.get(seq).is_some());
        assert!(transcript.open_placeholder_with("Thinking again", ts()).is_some());
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn capacity_evicts_oldest_and_clears_handles() {
        let mut transcript = Transcript::with_capacity(3);
        transcript.open_placeholder_with("Thinking", ts());
        for index in 0..3 {
            transcript.push(EntryKind::AgentStatus, format!("step {index}"), None, ts());
        }
        assert_eq!(transcript.len(), 3);
        assert!(!transcript.has_open_placeholder());
        let texts = transcript
            .entries()
            .map(|entry| entry.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["step 0", "step 1", "step 2"]);
    }

    #[test]
    fn removal_keeps_seq_lookup_consistent() {
        let mut transcript = Transcript::default();
        let a = transcript.push(EntryKind::User, "a", None, ts());
        let b = transcript.push(EntryKind::AgentStatus, "b", None, ts());
        let c = transcript.push(EntryKind::AgentAnswer, "c", None, ts());
        assert!(transcript.remove(b).is_some());
        assert_eq!(transcript.get(a).map(|entry| entry.text.as_str()), Some("a"));
        assert_eq!(transcript.get(c).map(|entry| entry.text.as_str()), Some("c"));
        assert!(transcript.get(b).is_none());
    }
}
