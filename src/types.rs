use serde::{Deserialize, Serialize};

/// Maximum number of perceive-plan-verify-act cycles per command.
pub const MAX_STEPS_PER_COMMAND: usize = 5;

/// Generated element ids are truncated to this many characters.
pub const ELEMENT_ID_MAX_CHARS: usize = 50;

/// The intent mapper always asks for this many alternative suggestions.
pub const SUGGESTED_STEP_COUNT: usize = 4;

/// Attribute written onto live elements so later actions can re-locate them.
pub const AGENT_ID_ATTRIBUTE: &str = "data-agent-id";

/// One interactive element found on the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveElement {
    pub element_id: String,
    pub role: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
}

/// Structured snapshot of the current page. Rebuilt fresh on every step,
/// never mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldModel {
    pub title: String,
    pub headings: Vec<String>,
    pub links: Vec<Link>,
    pub interactive_elements: Vec<InteractiveElement>,
    /// Base64-encoded PNG carried forward from the last executed action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl WorldModel {
    /// CSS locator for an element id, or None when the id is not part of
    /// this extraction. The mapping is rebuilt every step and never cached.
    pub fn locator(&self, element_id: &str) -> Option<String> {
        self.interactive_elements
            .iter()
            .find(|el| el.element_id == element_id)
            .map(|el| {
                let escaped = el.element_id.replace('\\', "\\\\").replace('"', "\\\"");
                format!("[{AGENT_ID_ATTRIBUTE}=\"{escaped}\"]")
            })
    }

    /// The world model as prompt text, with the screenshot stripped so it
    /// can be attached separately as an image input.
    pub fn to_prompt_json(&self) -> String {
        let mut copy = self.clone();
        copy.screenshot = None;
        serde_json::to_string_pretty(&copy).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Semantic re-labeling of the world model produced by the intent mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMap {
    pub user_intent: String,
    pub actionable_elements: Vec<ActionableElement>,
    pub next_best_action: String,
    pub suggested_next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionableElement {
    pub original_element_id: String,
    pub element_id: String,
    pub role: String,
    pub name: String,
    pub reasoning: String,
}

impl IntentMap {
    /// The semantic alias assigned to a generated element id, if any.
    pub fn alias_for(&self, original_element_id: &str) -> Option<&str> {
        self.actionable_elements
            .iter()
            .find(|el| el.original_element_id == original_element_id)
            .map(|el| el.element_id.as_str())
    }
}

/// One tool invocation selected by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ActionProposal {
    Navigate {
        url: String,
    },
    Click {
        #[serde(rename = "elementId")]
        element_id: String,
    },
    Type {
        #[serde(rename = "elementId")]
        element_id: String,
        text: String,
    },
    Answer {
        response: String,
    },
}

impl ActionProposal {
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Answer { .. } => "answer",
        }
    }

    /// Short human-readable form used in history entries and prompts.
    pub fn describe(&self) -> String {
        match self {
            Self::Navigate { url } => format!("navigate to {url}"),
            Self::Click { element_id } => format!("click {element_id}"),
            Self::Type { element_id, text } => format!("type \"{text}\" into {element_id}"),
            Self::Answer { .. } => "answer the user".to_string(),
        }
    }
}

/// Overseer verdict on a proposed action. Advisory gate, not a hard
/// security boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub is_valid: bool,
    pub reasoning: String,
}

/// What the executor observed after performing an action.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub message: String,
    pub screenshot: Option<String>,
    pub navigation_occurred: bool,
}

/// Append-only record of what happened during one command. Entry order
/// reflects real-world action order, including blocked attempts.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    pub fn record_accepted(&mut self, proposal: &ActionProposal, message: &str) {
        self.entries
            .push(format!("Did {}: {message}", proposal.describe()));
    }

    pub fn record_blocked(&mut self, proposal: &ActionProposal, reason: &str) {
        self.entries
            .push(format!("Blocked {}: {reason}", proposal.describe()));
    }

    pub fn record_text(&mut self, text: &str) {
        self.entries.push(format!("Model said: {text}"));
    }

    pub fn record_failure(&mut self, message: &str) {
        self.entries.push(format!("Action failed: {message}"));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn joined(&self) -> String {
        self.entries.join("\n")
    }

    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }
}

/// Remote browser session owned by the external provider. The core only
/// holds the id and connect URL for the duration of a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    AnsweredDone,
    MaxStepsReached,
    Failed,
}

/// Result of one `run_command` invocation. Always carries a message.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub final_response: String,
    pub intent_map: Option<IntentMap>,
    pub history: Vec<String>,
    pub termination: Termination,
}
