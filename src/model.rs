use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("malformed model response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A message in the conversation sent to the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// User message with an attached screenshot (base64 PNG).
    pub fn user_with_image(text: impl Into<String>, png_base64: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/png;base64,{png_base64}"),
                    },
                },
            ]),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Text(text.into()),
        }
    }
}

/// A tool the model may call, in OpenAI function-tool shape.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// One tool call emitted by the model. `arguments` is kept as the raw JSON
/// string so argument validation failures can be fed back into the repair
/// pass verbatim.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    /// When set, the response is constrained to this JSON schema
    /// (structured outputs); the schema name comes first.
    pub response_schema: Option<(&'static str, Value)>,
}

/// Stateless request/response access to the language-model service. The
/// planner and the overseer each make independent calls through this seam.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ModelError>;
}

/// OpenAI-compatible chat-completions client.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn build_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": 0.2,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }

        if let Some((name, schema)) = &request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true },
            });
        }

        body
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        let body = self.build_body(&request);

        let response = self
            .client
            .post(COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error")
                .to_string();
            return Err(ModelError::Api { status, message });
        }

        debug!(%status, "model call completed");
        parse_chat_response(&payload)
    }
}

/// Pull text and tool calls out of a chat-completions payload.
pub fn parse_chat_response(payload: &Value) -> Result<ChatResponse, ModelError> {
    let message = payload["choices"][0]
        .get("message")
        .ok_or_else(|| ModelError::Malformed(format!("no choices in response: {payload}")))?;

    let text = message["content"].as_str().map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let name = call["function"]["name"]
                .as_str()
                .ok_or_else(|| ModelError::Malformed("tool call without a name".to_string()))?
                .to_string();
            let arguments = call["function"]["arguments"]
                .as_str()
                .unwrap_or("{}")
                .to_string();
            tool_calls.push(ToolCall { name, arguments });
        }
    }

    Ok(ChatResponse { text, tool_calls })
}

/// Schema-constrained object generation on top of a plain chat call.
pub async fn generate_object<T: DeserializeOwned>(
    model: &dyn ModelClient,
    messages: Vec<ChatMessage>,
    schema_name: &'static str,
    schema: Value,
) -> Result<T, ModelError> {
    let response = model
        .chat(ChatRequest {
            messages,
            tools: Vec::new(),
            response_schema: Some((schema_name, schema)),
        })
        .await?;

    let text = response
        .text
        .ok_or_else(|| ModelError::Malformed(format!("{schema_name}: no content returned")))?;

    serde_json::from_str(&text)
        .map_err(|e| ModelError::Malformed(format!("{schema_name}: {e} in `{text}`")))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned responses in order; errors once the script runs out,
    /// which doubles as a model-service failure in tests.
    pub(crate) struct ScriptedModel {
        responses: Mutex<Vec<ChatResponse>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ModelError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ModelError::Malformed("script exhausted".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    pub(crate) fn object_response(json: &str) -> ChatResponse {
        ChatResponse {
            text: Some(json.to_string()),
            tool_calls: Vec::new(),
        }
    }

    pub(crate) fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            text: Some(text.to_string()),
            tool_calls: Vec::new(),
        }
    }

    pub(crate) fn tool_response(name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            text: None,
            tool_calls: vec![ToolCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_only_response() {
        let payload = json!({
            "choices": [{ "message": { "content": "hello", "tool_calls": null } }]
        });
        let response = parse_chat_response(&payload).unwrap();
        assert_eq!(response.text.as_deref(), Some("hello"));
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn parses_tool_calls_with_raw_arguments() {
        let payload = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "navigate", "arguments": "{\"url\":\"example.com\"}" }
                }]
            }}]
        });
        let response = parse_chat_response(&payload).unwrap();
        assert!(response.text.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "navigate");
        assert_eq!(response.tool_calls[0].arguments, "{\"url\":\"example.com\"}");
    }

    #[test]
    fn missing_choices_is_malformed() {
        let payload = json!({ "error": { "message": "nope" } });
        assert!(matches!(
            parse_chat_response(&payload),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn image_messages_serialize_as_content_parts() {
        let message = ChatMessage::user_with_image("look at this", "QUJD");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(
            value["content"][1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }
}
