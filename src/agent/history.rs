//! Bounded per-task history
//!
//! Each entry pairs the observation a decision was made on with the proposal and its
//! outcome. The oldest entries fall off once the limit is reached.

use std::collections::VecDeque;

use serde::Serialize;

use crate::agent::action::ExecutionResult;
use crate::core::{ActionProposal, Observation};

/// One observe/decide/act cycle
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub observation: Observation,
    pub proposal: ActionProposal,
    pub result: ExecutionResult,
}

impl HistoryEntry {
    pub fn new(
        observation: Observation,
        proposal: ActionProposal,
        result: ExecutionResult,
    ) -> Self {
        Self {
            observation,
            proposal,
            result,
        }
    }

    /// Single prompt line: what was tried on which page and what happened
    pub fn summary_line(&self) -> String {
        let outcome = if self.result.success { "ok" } else { "FAILED" };
        format!(
            "{} @ {} -> {}: {}",
            self.proposal.describe(),
            self.observation.url,
            outcome,
            self.result.message
        )
    }
}

/// FIFO-bounded history that stops accepting entries once frozen
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    max_length: usize,
    frozen: bool,
}

impl History {
    pub fn new(max_length: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_length),
            max_length,
            frozen: false,
        }
    }

    /// Append an entry, pruning the oldest past the limit
    ///
    /// Returns `false` if the history is frozen and the entry was dropped.
    pub fn record(&mut self, entry: HistoryEntry) -> bool {
        if self.frozen {
            return false;
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.max_length {
            self.entries.pop_front();
        }
        true
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Numbered lines for the prompt, oldest first
    pub fn format_for_prompt(&self) -> String {
        let mut output = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            output.push_str(&format!("{}. {}\n", i + 1, entry.summary_line()));
        }
        output
    }
}
