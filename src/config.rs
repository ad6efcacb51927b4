use anyhow::{Context, Result};

use crate::types::MAX_STEPS_PER_COMMAND;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_SESSION_API_URL: &str = "https://api.browserbase.com/v1";

/// Process-wide configuration, read once at startup from the environment
/// (`.env` honored via dotenvy).
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub model: String,
    pub session_api_key: String,
    pub session_project_id: String,
    pub session_api_url: String,
    pub max_steps: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let openai_api_key =
            std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY not set in environment")?;
        let session_api_key = std::env::var("BROWSERBASE_API_KEY")
            .context("BROWSERBASE_API_KEY not set in environment")?;
        let session_project_id = std::env::var("BROWSERBASE_PROJECT_ID")
            .context("BROWSERBASE_PROJECT_ID not set in environment")?;

        Ok(Self {
            openai_api_key,
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            session_api_key,
            session_project_id,
            session_api_url: std::env::var("SESSION_API_URL")
                .unwrap_or_else(|_| DEFAULT_SESSION_API_URL.to_string()),
            max_steps: MAX_STEPS_PER_COMMAND,
        })
    }
}
