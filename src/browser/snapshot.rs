//! Snapshot parsing for agent-browser output
//!
//! Parses the accessibility tree JSON printed by `agent-browser snapshot -i --json`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::ElementRef;

/// Parsed snapshot from agent-browser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<SnapshotData>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Snapshot data content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    /// Raw accessibility tree
    #[serde(default)]
    pub snapshot: String,
    /// Element refs mapped to their info
    #[serde(default)]
    pub refs: HashMap<String, Element>,
}

/// An element in the snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl Snapshot {
    pub fn count_elements(&self) -> usize {
        self.data.as_ref().map(|d| d.refs.len()).unwrap_or(0)
    }

    /// Elements as [`ElementRef`]s, ordered by ref number (e1, e2, ..., e10)
    pub fn to_elements(&self) -> Vec<ElementRef> {
        let Some(data) = &self.data else {
            return Vec::new();
        };

        let mut elements: Vec<ElementRef> = data
            .refs
            .iter()
            .map(|(id, el)| ElementRef {
                id: id.trim_start_matches('@').to_string(),
                role: el.role.clone(),
                name: el.name.clone(),
                value: el.value.clone(),
            })
            .collect();

        elements.sort_by_key(|el| (ref_number(&el.id), el.id.clone()));
        elements
    }

    /// Accessibility tree cut to `max_chars` characters
    pub fn summary(&self, max_chars: usize) -> String {
        let tree = self.data.as_ref().map(|d| d.snapshot.as_str()).unwrap_or("");
        truncate_chars(tree, max_chars)
    }
}

fn ref_number(id: &str) -> u64 {
    id.trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .unwrap_or(u64::MAX)
}

/// Cut to `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = r#"{
        "success": true,
        "data": {
            "snapshot": "- heading \"Example Domain\" [ref=e1]\n- link \"More information...\" [ref=e10]\n- textbox \"Search\" [ref=e2]",
            "refs": {
                "e10": {"role": "link", "name": "More information..."},
                "e2": {"role": "textbox", "name": "Search", "value": "rust"},
                "e1": {"role": "heading", "name": "Example Domain"}
            }
        }
    }"#;

    #[test]
    fn test_parse_and_order_elements() {
        let snapshot: Snapshot = serde_json::from_str(RAW).unwrap();
        assert!(snapshot.success);
        assert_eq!(snapshot.count_elements(), 3);

        let ids: Vec<String> = snapshot.to_elements().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e1", "e2", "e10"]);

        let search = &snapshot.to_elements()[1];
        assert!(search.is_input());
        assert_eq!(search.value.as_deref(), Some("rust"));
    }

    #[test]
    fn test_summary_truncation() {
        let snapshot: Snapshot = serde_json::from_str(RAW).unwrap();
        let short = snapshot.summary(9);
        assert_eq!(short, "- heading\n[truncated]");
        assert!(snapshot.summary(10_000).ends_with("[ref=e2]"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé\n[truncated]");
        assert_eq!(truncate_chars("hi", 2), "hi");
    }

    #[test]
    fn test_failed_snapshot() {
        let snapshot: Snapshot =
            serde_json::from_str(r#"{"success": false, "error": "no page"}"#).unwrap();
        assert!(snapshot.to_elements().is_empty());
        assert_eq!(snapshot.error.as_deref(), Some("no page"));
    }
}
