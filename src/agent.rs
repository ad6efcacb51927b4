use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{AgentError, ExecutionError};
use crate::model::ModelClient;
use crate::overseer;
use crate::planner;
use crate::server::AgentEvent;
use crate::types::{
    ActionOutcome, ActionProposal, CommandOutcome, History, IntentMap, Termination, WorldModel,
};

/// The loop's view of the browser: perceive the page, execute one action.
/// The live page handle behind an implementation is exclusively owned by
/// the command's loop for its duration.
#[async_trait]
pub trait Driver: Send {
    /// Rebuild the world model, carrying forward the last screenshot and
    /// the previous intent map's aliases.
    async fn perceive(
        &mut self,
        previous_screenshot: Option<String>,
        intent_map: Option<&IntentMap>,
    ) -> anyhow::Result<WorldModel>;

    async fn execute(&mut self, proposal: &ActionProposal)
    -> Result<ActionOutcome, ExecutionError>;

    fn current_url(&self) -> String;
}

fn failed(
    session_id: &str,
    events: &broadcast::Sender<AgentEvent>,
    mut history: History,
    intent_map: Option<IntentMap>,
    error: AgentError,
) -> CommandOutcome {
    let message = error.to_string();
    history.record_failure(&message);
    let _ = events.send(AgentEvent::TaskError {
        session_id: session_id.to_string(),
        message: message.clone(),
    });
    CommandOutcome {
        final_response: message,
        intent_map,
        history: history.into_entries(),
        termination: Termination::Failed,
    }
}

/// Run one command to a terminal state: perceive, map intent, plan, verify,
/// act, within a fixed step budget. All proposals of a step are processed
/// in order, short-circuiting on `answer`. Always resolves with a message.
pub async fn run_command(
    goal: &str,
    session_id: &str,
    driver: &mut dyn Driver,
    model: &dyn ModelClient,
    max_steps: usize,
    events: &broadcast::Sender<AgentEvent>,
) -> CommandOutcome {
    let mut history = History::default();
    let mut screenshot: Option<String> = None;
    let mut intent_map: Option<IntentMap> = None;
    let mut last_text: Option<String> = None;

    for step in 1..=max_steps {
        let _ = events.send(AgentEvent::Thinking {
            session_id: session_id.to_string(),
        });

        let world = match driver.perceive(screenshot.clone(), intent_map.as_ref()).await {
            Ok(world) => world,
            Err(e) => {
                return failed(
                    session_id,
                    events,
                    history,
                    intent_map,
                    AgentError::planning(format!("could not read the page: {e:#}")),
                );
            }
        };

        let mapped = match overseer::map_intent(model, goal, &world).await {
            Ok(mapped) => mapped,
            Err(e) => return failed(session_id, events, history, intent_map, e),
        };
        intent_map = Some(mapped.clone());

        let plan = match planner::plan_action(
            model,
            goal,
            &history,
            &world,
            &mapped,
            &driver.current_url(),
        )
        .await
        {
            Ok(plan) => plan,
            Err(e) => return failed(session_id, events, history, intent_map, e),
        };

        if let Some(text) = &plan.text {
            last_text = Some(text.clone());
        }

        if plan.proposals.is_empty() {
            // No action this step; the raw text is the step's output.
            if let Some(text) = &plan.text {
                history.record_text(text);
            }
            info!(step, "no action proposed, advancing");
            continue;
        }

        for proposal in &plan.proposals {
            if let ActionProposal::Answer { response } = proposal {
                let _ = events.send(AgentEvent::TaskComplete {
                    session_id: session_id.to_string(),
                    summary: response.clone(),
                });
                return CommandOutcome {
                    final_response: response.clone(),
                    intent_map,
                    history: history.into_entries(),
                    termination: Termination::AnsweredDone,
                };
            }

            let verdict = match overseer::verify_action(model, &mapped, proposal).await {
                Ok(verdict) => verdict,
                Err(e) => return failed(session_id, events, history, intent_map, e),
            };

            if !verdict.is_valid {
                warn!(step, tool = proposal.tool_name(), reason = %verdict.reasoning, "action blocked");
                history.record_blocked(proposal, &verdict.reasoning);
                let _ = events.send(AgentEvent::StepBlocked {
                    session_id: session_id.to_string(),
                    reason: verdict.reasoning.clone(),
                });
                continue;
            }

            match driver.execute(proposal).await {
                Ok(outcome) => {
                    info!(step, message = %outcome.message, "action executed");
                    history.record_accepted(proposal, &outcome.message);
                    if outcome.screenshot.is_some() {
                        screenshot = outcome.screenshot;
                    }
                    let _ = events.send(AgentEvent::Step {
                        session_id: session_id.to_string(),
                        number: step,
                        description: outcome.message,
                    });
                }
                Err(e) => {
                    warn!(step, "action failed: {e}");
                    history.record_failure(&e.to_string());
                    let _ = events.send(AgentEvent::StepError {
                        session_id: session_id.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    let final_response = last_text
        .unwrap_or_else(|| format!("Stopped after {max_steps} steps without a final answer."));
    let _ = events.send(AgentEvent::TaskComplete {
        session_id: session_id.to_string(),
        summary: final_response.clone(),
    });
    CommandOutcome {
        final_response,
        intent_map,
        history: history.into_entries(),
        termination: Termination::MaxStepsReached,
    }
}
