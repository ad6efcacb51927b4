use serde_json::json;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::model::{ChatMessage, ChatRequest, ModelClient, ToolCall, ToolSpec};
use crate::types::{ActionProposal, History, IntentMap, WorldModel};

const SYSTEM_PROMPT: &str = "You are an expert web automation assistant. You control a real \
browser one action at a time. Pick exactly one tool call for the next action: navigate to a \
URL, click an interactive element, type into an input, or answer the user when the task is \
complete or cannot be completed. Only use elementIds that appear in the intent map. Keep \
actions minimal; do not over-navigate.";

/// What one planning step produced: zero or more tool proposals plus any
/// free text the model emitted alongside them.
#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub proposals: Vec<ActionProposal>,
    pub text: Option<String>,
}

/// The fixed action vocabulary offered to the model.
fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "navigate",
            description: "Navigates the browser to a new URL.",
            parameters: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["url"],
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to navigate to, e.g. https://www.example.com."
                    }
                }
            }),
        },
        ToolSpec {
            name: "click",
            description: "Clicks a specific interactive element on the page, such as a button \
                          or a link. The element must be present in the world model.",
            parameters: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["elementId"],
                "properties": {
                    "elementId": {
                        "type": "string",
                        "description": "The ID of the element to click, one of the elementIds from the intent map."
                    }
                }
            }),
        },
        ToolSpec {
            name: "type",
            description: "Types text into a specific input field, such as a textbox or \
                          textarea. The element must be present in the world model.",
            parameters: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["elementId", "text"],
                "properties": {
                    "elementId": {
                        "type": "string",
                        "description": "The ID of the input element to type into."
                    },
                    "text": {
                        "type": "string",
                        "description": "The text to type into the input field."
                    }
                }
            }),
        },
        ToolSpec {
            name: "answer",
            description: "Provides the final answer to the user when the task is complete, \
                          the query is a question, or the task cannot be completed.",
            parameters: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["response"],
                "properties": {
                    "response": {
                        "type": "string",
                        "description": "The final response, confirmation, or answer for the user."
                    }
                }
            }),
        },
    ]
}

/// Match a raw tool call against the action vocabulary. The error string is
/// fed verbatim into the repair pass.
pub fn match_tool_call(call: &ToolCall) -> Result<ActionProposal, String> {
    let args: serde_json::Value = serde_json::from_str(&call.arguments)
        .map_err(|e| format!("arguments are not valid JSON: {e}"))?;

    let mut tagged = args;
    if !tagged.is_object() {
        return Err("arguments must be a JSON object".to_string());
    }
    match call.name.as_str() {
        "navigate" | "click" | "type" | "answer" => {
            tagged["action"] = serde_json::Value::String(call.name.clone());
        }
        other => {
            return Err(format!(
                "unknown tool `{other}`; expected one of navigate, click, type, answer"
            ));
        }
    }

    serde_json::from_value(tagged).map_err(|e| format!("invalid arguments for `{}`: {e}", call.name))
}

fn planning_message(
    goal: &str,
    history: &History,
    world_model: &WorldModel,
    intent_map: &IntentMap,
    current_url: &str,
) -> ChatMessage {
    let history_text = if history.is_empty() {
        "(nothing yet)".to_string()
    } else {
        history.joined()
    };

    let text = format!(
        "Current URL: {current_url}\n\
         Goal: {goal}\n\n\
         What has happened so far:\n{history_text}\n\n\
         Intent map for the current page:\n{}\n\n\
         Page title: {}\n\n\
         Choose the single next action that best advances the goal.",
        serde_json::to_string_pretty(intent_map).unwrap_or_else(|_| "{}".to_string()),
        world_model.title,
    );
    ChatMessage::user(text)
}

/// One repair attempt for a tool call that failed validation: the original
/// call and the validation error are appended to the conversation and the
/// model is asked to re-emit a valid call. Returns None when the retry also
/// fails to produce a valid call.
async fn repair_tool_call(
    model: &dyn ModelClient,
    mut conversation: Vec<ChatMessage>,
    failed: &ToolCall,
    error: &str,
) -> Result<Option<ActionProposal>, AgentError> {
    conversation.push(ChatMessage::assistant(format!(
        "Tool call: {}({})",
        failed.name, failed.arguments
    )));
    conversation.push(ChatMessage::user(format!(
        "That tool call was invalid: {error}. Re-emit exactly one valid tool call using only \
         the available tools."
    )));

    let response = model
        .chat(ChatRequest {
            messages: conversation,
            tools: tool_specs(),
            response_schema: None,
        })
        .await
        .map_err(AgentError::from)?;

    let Some(call) = response.tool_calls.first() else {
        return Ok(None);
    };
    match match_tool_call(call) {
        Ok(proposal) => Ok(Some(proposal)),
        Err(second_error) => {
            warn!(tool = %call.name, error = %second_error, "repair attempt also invalid");
            Ok(None)
        }
    }
}

/// Ask the model for the next action. Invalid tool calls get exactly one
/// repair pass for the step; when no valid call results, the proposals list
/// stays empty and the raw text stands as the step's output.
pub async fn plan_action(
    model: &dyn ModelClient,
    goal: &str,
    history: &History,
    world_model: &WorldModel,
    intent_map: &IntentMap,
    current_url: &str,
) -> Result<PlanOutcome, AgentError> {
    let conversation = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        planning_message(goal, history, world_model, intent_map, current_url),
    ];

    let response = model
        .chat(ChatRequest {
            messages: conversation.clone(),
            tools: tool_specs(),
            response_schema: None,
        })
        .await
        .map_err(AgentError::from)?;

    let mut proposals = Vec::new();
    let mut repair_spent = false;

    for call in &response.tool_calls {
        match match_tool_call(call) {
            Ok(proposal) => proposals.push(proposal),
            Err(error) if !repair_spent => {
                repair_spent = true;
                debug!(tool = %call.name, %error, "tool call invalid, attempting repair");
                if let Some(proposal) =
                    repair_tool_call(model, conversation.clone(), call, &error).await?
                {
                    proposals.push(proposal);
                }
            }
            Err(error) => {
                warn!(tool = %call.name, %error, "dropping invalid tool call, repair already spent");
            }
        }
    }

    Ok(PlanOutcome {
        proposals,
        text: response.text.filter(|t| !t.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatResponse;
    use crate::model::testing::{ScriptedModel, tool_response};

    fn empty_intent_map() -> IntentMap {
        IntentMap {
            user_intent: "go to example.com".to_string(),
            actionable_elements: vec![],
            next_best_action: "navigate there".to_string(),
            suggested_next_steps: vec![],
        }
    }

    #[test]
    fn matches_every_tool_in_the_vocabulary() {
        let cases = [
            ("navigate", r#"{"url":"example.com"}"#),
            ("click", r#"{"elementId":"search-bar"}"#),
            ("type", r#"{"elementId":"search-bar","text":"rust"}"#),
            ("answer", r#"{"response":"done"}"#),
        ];
        for (name, args) in cases {
            let call = ToolCall {
                name: name.to_string(),
                arguments: args.to_string(),
            };
            let proposal = match_tool_call(&call).unwrap();
            assert_eq!(proposal.tool_name(), name);
        }
    }

    #[test]
    fn unknown_tool_name_is_rejected() {
        let call = ToolCall {
            name: "scroll".to_string(),
            arguments: "{}".to_string(),
        };
        let err = match_tool_call(&call).unwrap_err();
        assert!(err.contains("unknown tool `scroll`"));
    }

    #[test]
    fn missing_arguments_are_rejected() {
        let call = ToolCall {
            name: "type".to_string(),
            arguments: r#"{"elementId":"search-bar"}"#.to_string(),
        };
        assert!(match_tool_call(&call).is_err());
    }

    #[tokio::test]
    async fn goal_scenario_emits_navigate() {
        let model = ScriptedModel::new(vec![tool_response("navigate", r#"{"url":"example.com"}"#)]);
        let plan = plan_action(
            &model,
            "go to example.com",
            &History::default(),
            &WorldModel::default(),
            &empty_intent_map(),
            "about:blank",
        )
        .await
        .unwrap();
        assert_eq!(
            plan.proposals,
            vec![ActionProposal::Navigate {
                url: "example.com".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn invalid_call_is_repaired_once() {
        let model = ScriptedModel::new(vec![
            tool_response("goToUrl", r#"{"url":"example.com"}"#),
            tool_response("navigate", r#"{"url":"example.com"}"#),
        ]);
        let plan = plan_action(
            &model,
            "go to example.com",
            &History::default(),
            &WorldModel::default(),
            &empty_intent_map(),
            "about:blank",
        )
        .await
        .unwrap();
        assert_eq!(plan.proposals.len(), 1);
        assert_eq!(plan.proposals[0].tool_name(), "navigate");
    }

    #[tokio::test]
    async fn failed_repair_yields_zero_proposals_and_raw_text() {
        let model = ScriptedModel::new(vec![
            ChatResponse {
                text: Some("I will scroll the page".to_string()),
                tool_calls: vec![ToolCall {
                    name: "scroll".to_string(),
                    arguments: "{}".to_string(),
                }],
            },
            tool_response("scroll", "{}"),
        ]);
        let plan = plan_action(
            &model,
            "goal",
            &History::default(),
            &WorldModel::default(),
            &empty_intent_map(),
            "about:blank",
        )
        .await
        .unwrap();
        assert!(plan.proposals.is_empty());
        assert_eq!(plan.text.as_deref(), Some("I will scroll the page"));
    }

    #[tokio::test]
    async fn zero_tool_calls_is_no_action() {
        let model = ScriptedModel::new(vec![ChatResponse {
            text: Some("Nothing to do yet".to_string()),
            tool_calls: vec![],
        }]);
        let plan = plan_action(
            &model,
            "goal",
            &History::default(),
            &WorldModel::default(),
            &empty_intent_map(),
            "about:blank",
        )
        .await
        .unwrap();
        assert!(plan.proposals.is_empty());
        assert_eq!(plan.text.as_deref(), Some("Nothing to do yet"));
    }

    #[tokio::test]
    async fn model_failure_is_a_planning_error() {
        let model = ScriptedModel::new(vec![]);
        let err = plan_action(
            &model,
            "goal",
            &History::default(),
            &WorldModel::default(),
            &empty_intent_map(),
            "about:blank",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Planning(_)));
    }
}
