//! Prompt assembly for the decide step
//!
//! A [`Prompt`] is everything one task knows at decision time. It only ever carries that
//! task's own history.

use crate::agent::action::ACTION_KINDS;
use crate::agent::history::History;
use crate::core::{Message, Observation};

/// Reply schema the model must follow
const RESPONSE_SCHEMA: &str = r#"Respond with exactly one JSON object and nothing else:
{"action": "<kind>", "target": "<element ref, url or direction>", "value": "<text, amount or summary>", "submit": false, "reasoning": "<why>", "progress": 40}

Fields:
- action (required): one of KINDS
- reasoning (required): one sentence explaining the choice
- target: element ref like "e5" for click/type, a URL for navigate, up/down/left/right for scroll
- value: text to type, pixels to scroll, seconds to wait, the question for ask_user, or the result for finish
- submit: true to press Enter after typing
- progress: your estimate of how far along the goal is, 0-100"#;

const RULES: &str = r#"Rules:
1. Use the [eN] element refs from the page state. Never invent refs.
2. One action per reply. You will see the new page state after it runs.
3. If an action failed, look at the history and try something different.
4. Use ask_user only when the goal cannot be reached without information from the user.
5. When the goal is reached, use finish and put the answer in value."#;

/// Decision context handed to a [`LanguageModel`](crate::llm::LanguageModel)
#[derive(Debug, Clone, Copy)]
pub struct Prompt<'a> {
    pub role: &'a str,
    pub goal: &'a str,
    pub history: &'a History,
    pub observation: &'a Observation,
    /// Set when the previous reply was rejected
    pub correction: Option<&'a str>,
}

impl<'a> Prompt<'a> {
    pub fn new(
        role: &'a str,
        goal: &'a str,
        history: &'a History,
        observation: &'a Observation,
    ) -> Self {
        Self {
            role,
            goal,
            history,
            observation,
            correction: None,
        }
    }

    pub fn with_correction(mut self, correction: Option<&'a str>) -> Self {
        self.correction = correction;
        self
    }

    pub fn system_message(&self) -> String {
        let role = if self.role.trim().is_empty() {
            "web browsing assistant"
        } else {
            self.role.trim()
        };
        format!(
            "You are acting as: {}. Your goal is: {}.\n\
             You control a real web browser one action at a time.\n\n{}\n\n{}",
            role,
            self.goal.trim(),
            RESPONSE_SCHEMA.replace("KINDS", &ACTION_KINDS.join(", ")),
            RULES
        )
    }

    pub fn user_message(&self) -> String {
        let obs = self.observation;
        let mut content = String::new();

        if !self.history.is_empty() {
            content.push_str("## Previous steps\n");
            content.push_str(&self.history.format_for_prompt());
            content.push('\n');
        }

        content.push_str("## Current page\n");
        content.push_str(&format!("URL: {}\nTitle: {}\n", obs.url, obs.title));
        if !obs.elements.is_empty() {
            content.push_str("\nElements:\n");
            content.push_str(&obs.format_elements());
        }
        if !obs.summary.is_empty() {
            content.push_str("\nPage:\n");
            content.push_str(&obs.summary);
            content.push('\n');
        }

        if let Some(correction) = self.correction {
            content.push_str("\n## Correction\n");
            content.push_str(correction);
            content.push('\n');
        }

        content.push_str("\nWhat is the next action?");
        content
    }

    /// Render as a system + user message pair
    pub fn to_messages(&self) -> Vec<Message> {
        vec![
            Message::system(self.system_message()),
            Message::user(self.user_message()),
        ]
    }
}
