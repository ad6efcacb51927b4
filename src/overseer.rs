use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::AgentError;
use crate::model::{ChatMessage, ModelClient, generate_object};
use crate::types::{ActionProposal, IntentMap, SUGGESTED_STEP_COUNT, VerificationResult, WorldModel};

fn intent_map_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["userIntent", "actionableElements", "nextBestAction", "suggestedNextSteps"],
        "properties": {
            "userIntent": {
                "type": "string",
                "description": "A summary of the user's likely goal."
            },
            "actionableElements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["originalElementId", "elementId", "role", "name", "reasoning"],
                    "properties": {
                        "originalElementId": {
                            "type": "string",
                            "description": "The original element ID from the world model."
                        },
                        "elementId": {
                            "type": "string",
                            "description": "A descriptive ID for the element, e.g. 'search-bar', 'submit-button'."
                        },
                        "role": { "type": "string" },
                        "name": { "type": "string" },
                        "reasoning": {
                            "type": "string",
                            "description": "Why this element is relevant to the user's intent."
                        }
                    }
                }
            },
            "nextBestAction": {
                "type": "string",
                "description": "The suggested next action for the agent."
            },
            "suggestedNextSteps": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Exactly four suggested next steps for the user."
            }
        }
    })
}

fn verification_schema() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["isValid", "reasoning"],
        "properties": {
            "isValid": { "type": "boolean" },
            "reasoning": { "type": "string" }
        }
    })
}

/// Infer the user's intent from the goal and the current world model.
/// The screenshot is split out of the world model and attached as an image
/// input when present. Schema-invalid or failed calls surface as a
/// planning error; there is no silent retry.
pub async fn map_intent(
    model: &dyn ModelClient,
    goal: &str,
    world_model: &WorldModel,
) -> Result<IntentMap, AgentError> {
    let prompt = format!(
        "You are an overseer agent. Analyze the user's prompt, the screenshot of the page \
         (if attached), and the current state of the web page (the \"world model\") to \
         determine the user's likely intent and suggest the next best action.\n\n\
         User Prompt: {goal}\n\
         World Model:\n{}\n\n\
         Create an intent map with a summary of the user's intent, the full list of \
         actionable elements, a suggested next best action, and exactly {SUGGESTED_STEP_COUNT} \
         suggested next steps for the user. For each actionable element, provide a \
         descriptive elementId that reflects its function, e.g. 'search-bar' or \
         'submit-button', and include the originalElementId from the world model.",
        world_model.to_prompt_json(),
    );

    let message = match &world_model.screenshot {
        Some(png) => ChatMessage::user_with_image(prompt, png),
        None => ChatMessage::user(prompt),
    };

    let mut intent_map: IntentMap =
        generate_object(model, vec![message], "intent_map", intent_map_schema())
            .await
            .map_err(AgentError::from)?;

    intent_map.suggested_next_steps.truncate(SUGGESTED_STEP_COUNT);

    info!(
        intent = %intent_map.user_intent,
        elements = intent_map.actionable_elements.len(),
        "intent map built"
    );
    Ok(intent_map)
}

/// Ask the overseer whether a proposed action serves the mapped intent.
/// Stateless: the intent map is passed explicitly, never through shared
/// agent state. `Answer` proposals are never sent here; the loop lets them
/// terminate directly.
pub async fn verify_action(
    model: &dyn ModelClient,
    intent_map: &IntentMap,
    proposal: &ActionProposal,
) -> Result<VerificationResult, AgentError> {
    let prompt = format!(
        "You are an overseer agent. Verify whether the action proposed by the browser \
         automation agent is in line with the user's intent.\n\n\
         Intent Map:\n{}\n\n\
         Proposed Action:\n{}\n\n\
         Does this action align with the user's intent and the suggested next best action?",
        serde_json::to_string_pretty(intent_map).unwrap_or_else(|_| "{}".to_string()),
        serde_json::to_string_pretty(proposal).unwrap_or_else(|_| "{}".to_string()),
    );

    let verdict: VerificationResult = generate_object(
        model,
        vec![ChatMessage::user(prompt)],
        "verification",
        verification_schema(),
    )
    .await
    .map_err(AgentError::from)?;

    debug!(
        tool = proposal.tool_name(),
        is_valid = verdict.is_valid,
        "action verified"
    );
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{ScriptedModel, object_response};

    #[tokio::test]
    async fn map_intent_parses_schema_response_and_caps_suggestions() {
        let payload = serde_json::json!({
            "userIntent": "find rust docs",
            "actionableElements": [{
                "originalElementId": "a-docs",
                "elementId": "docs-link",
                "role": "a",
                "name": "Docs",
                "reasoning": "leads to documentation"
            }],
            "nextBestAction": "click the docs link",
            "suggestedNextSteps": ["one", "two", "three", "four", "five", "six"]
        });
        let model = ScriptedModel::new(vec![object_response(&payload.to_string())]);

        let map = map_intent(&model, "find rust docs", &WorldModel::default())
            .await
            .unwrap();
        assert_eq!(map.user_intent, "find rust docs");
        assert_eq!(map.actionable_elements[0].element_id, "docs-link");
        assert_eq!(map.suggested_next_steps.len(), SUGGESTED_STEP_COUNT);
    }

    #[tokio::test]
    async fn map_intent_schema_violation_is_a_planning_error() {
        let model = ScriptedModel::new(vec![object_response("{\"wrong\": true}")]);
        let err = map_intent(&model, "goal", &WorldModel::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Planning(_)));
    }

    #[tokio::test]
    async fn verify_action_returns_the_verdict() {
        let model = ScriptedModel::new(vec![object_response(
            "{\"isValid\": false, \"reasoning\": \"wrong button\"}",
        )]);
        let map = IntentMap {
            user_intent: "log in".to_string(),
            actionable_elements: vec![],
            next_best_action: "click login".to_string(),
            suggested_next_steps: vec![],
        };
        let verdict = verify_action(
            &model,
            &map,
            &ActionProposal::Click {
                element_id: "signup-button".to_string(),
            },
        )
        .await
        .unwrap();
        assert!(!verdict.is_valid);
        assert_eq!(verdict.reasoning, "wrong button");
    }
}
