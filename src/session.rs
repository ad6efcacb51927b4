use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, Tab};
use serde_json::{Value, json};
use tracing::info;

use crate::agent::Driver;
use crate::config::Config;
use crate::error::{AgentError, ExecutionError};
use crate::executor;
use crate::types::{ActionOutcome, ActionProposal, IntentMap, Session, WorldModel};
use crate::world;

/// Client for the external session-provisioning service. The provider owns
/// session lifecycles; the core only passes ids and connect URLs around.
#[derive(Clone)]
pub struct SessionClient {
    http: reqwest::Client,
    api_key: String,
    project_id: String,
    base_url: String,
}

impl SessionClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.session_api_key.clone(),
            project_id: config.session_project_id.clone(),
            base_url: config.session_api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<Value, AgentError> {
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| AgentError::session(format!("bad provider response: {e}")))?;
        if !status.is_success() {
            let message = payload["error"]
                .as_str()
                .or_else(|| payload["message"].as_str())
                .unwrap_or("unknown provider error");
            return Err(AgentError::session(format!("{status}: {message}")));
        }
        Ok(payload)
    }

    pub async fn create_session(&self) -> Result<Session, AgentError> {
        let response = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .header("X-BB-API-Key", &self.api_key)
            .json(&json!({ "projectId": self.project_id }))
            .send()
            .await
            .map_err(|e| AgentError::session(e.to_string()))?;
        let payload = Self::check(response).await?;
        let session: Session = serde_json::from_value(payload)
            .map_err(|e| AgentError::session(format!("unexpected session shape: {e}")))?;
        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, AgentError> {
        let response = self
            .http
            .get(format!("{}/sessions/{id}", self.base_url))
            .header("X-BB-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| AgentError::session(e.to_string()))?;
        let payload = Self::check(response).await?;
        serde_json::from_value(payload)
            .map_err(|e| AgentError::session(format!("unexpected session shape: {e}")))
    }

    /// Provider live-view URL; opaque to the core, pass-through only.
    pub async fn debug_url(&self, id: &str) -> Result<String, AgentError> {
        let response = self
            .http
            .get(format!("{}/sessions/{id}/debug", self.base_url))
            .header("X-BB-API-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| AgentError::session(e.to_string()))?;
        let payload = Self::check(response).await?;
        payload["debuggerFullscreenUrl"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::session("provider returned no debug URL"))
    }

    pub async fn end_session(&self, id: &str) -> Result<(), AgentError> {
        let response = self
            .http
            .post(format!("{}/sessions/{id}", self.base_url))
            .header("X-BB-API-Key", &self.api_key)
            .json(&json!({
                "projectId": self.project_id,
                "status": "REQUEST_RELEASE",
            }))
            .send()
            .await
            .map_err(|e| AgentError::session(e.to_string()))?;
        Self::check(response).await?;
        info!(session_id = %id, "session released");
        Ok(())
    }
}

/// A live connection to one remote browser session. Exclusively owned by a
/// single command's loop for its duration.
pub struct BrowserSession {
    browser: Arc<Browser>,
    tab: Arc<Tab>,
    /// Last extraction; the (element id -> locator) mapping lives in here
    /// and is rebuilt on every perceive.
    world: Option<WorldModel>,
}

impl BrowserSession {
    /// Attach to the remote browser over its connect URL. Blocking; call
    /// under `spawn_blocking`.
    pub fn attach(connect_url: &str) -> Result<Self> {
        let browser = Browser::connect(connect_url.to_string())
            .context("could not connect to the remote browser")?;

        let tab = {
            let tabs = browser.get_tabs().lock().unwrap().clone();
            match tabs.into_iter().next() {
                Some(tab) => tab,
                None => browser.new_tab().context("could not open a tab")?,
            }
        };
        tab.set_default_timeout(executor::NAVIGATION_TIMEOUT);

        info!("attached to remote browser");
        Ok(Self {
            browser: Arc::new(browser),
            tab,
            world: None,
        })
    }

    fn locator(&self, action: &'static str, element_id: &str) -> Result<String, ExecutionError> {
        self.world
            .as_ref()
            .and_then(|world| world.locator(element_id))
            .ok_or_else(|| ExecutionError::element_not_found(action, element_id))
    }
}

#[async_trait]
impl Driver for BrowserSession {
    async fn perceive(
        &mut self,
        previous_screenshot: Option<String>,
        intent_map: Option<&IntentMap>,
    ) -> Result<WorldModel> {
        let tab = self.tab.clone();
        let intent_map = intent_map.cloned();

        let world = tokio::task::spawn_blocking(move || {
            world::build_world_model(&tab, previous_screenshot, intent_map.as_ref())
        })
        .await
        .map_err(|e| anyhow::anyhow!("browser task panicked: {e}"))??;

        self.world = Some(world.clone());
        Ok(world)
    }

    async fn execute(
        &mut self,
        proposal: &ActionProposal,
    ) -> Result<ActionOutcome, ExecutionError> {
        match proposal {
            ActionProposal::Navigate { url } => {
                let tab = self.tab.clone();
                let url = url.clone();
                let target = url.clone();
                tokio::task::spawn_blocking(move || executor::navigate(&tab, &url))
                    .await
                    .map_err(|e| {
                        ExecutionError::new("navigate", target, format!("browser task panicked: {e}"))
                    })?
            }
            ActionProposal::Click { element_id } => {
                let selector = self.locator("click", element_id)?;
                let browser = self.browser.clone();
                let tab = self.tab.clone();
                let id = element_id.clone();
                let target = element_id.clone();

                let result = tokio::task::spawn_blocking(move || {
                    executor::click(&browser, &tab, &selector, &id)
                })
                .await
                .map_err(|e| {
                    ExecutionError::new("click", target, format!("browser task panicked: {e}"))
                })??;

                if let Some(tab) = result.new_tab {
                    self.tab = tab;
                }
                Ok(result.outcome)
            }
            ActionProposal::Type { element_id, text } => {
                let selector = self.locator("type", element_id)?;
                let tab = self.tab.clone();
                let id = element_id.clone();
                let target = element_id.clone();
                let text = text.clone();

                tokio::task::spawn_blocking(move || {
                    executor::type_text(&tab, &selector, &id, &text)
                })
                .await
                .map_err(|e| {
                    ExecutionError::new("type", target, format!("browser task panicked: {e}"))
                })?
            }
            // The loop short-circuits answers before execution; nothing to
            // do against the browser if one slips through.
            ActionProposal::Answer { response } => Ok(ActionOutcome {
                message: response.clone(),
                screenshot: None,
                navigation_occurred: false,
            }),
        }
    }

    fn current_url(&self) -> String {
        self.tab.get_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_deserializes_provider_payload() {
        let payload = json!({
            "id": "sess-1",
            "connectUrl": "wss://connect.example/devtools/browser/abc",
            "status": "RUNNING",
            "projectId": "ignored-extra-field"
        });
        let session: Session = serde_json::from_value(payload).unwrap();
        assert_eq!(session.id, "sess-1");
        assert_eq!(
            session.connect_url.as_deref(),
            Some("wss://connect.example/devtools/browser/abc")
        );
    }
}
