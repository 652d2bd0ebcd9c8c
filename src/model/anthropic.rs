//! Messages API client.
//!
//! Sends the whole transcript with every request and converts the reply's
//! content blocks into [`Block`]s. Unknown block kinds are skipped.
//!
//! # Configuration
//!
//! - `SHOTTER_MODEL_ENDPOINT`: API endpoint URL
//! - `SHOTTER_MODEL`: Model name
//! - `SHOTTER_MAX_TOKENS`: Max tokens in a reply
//! - `SHOTTER_MODEL_CONNECT_TIMEOUT` / `SHOTTER_MODEL_READ_TIMEOUT`: transport timeouts (seconds)
//! - `ANTHROPIC_API_KEY`: API key

use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{Block, Invocation, ModelChannel, ModelError, ModelReply, ModelResult, Turn};
use crate::capability::{ToolContent, ToolDeclaration};
use crate::config;

/// API revision header value
const API_VERSION: &str = "2023-06-01";

/// Configuration for the Messages API client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Maximum tokens in a reply
    pub max_tokens: u32,
    /// Timeout for establishing the connection (seconds)
    pub connect_timeout: u64,
    /// Timeout for reading the response (seconds)
    pub read_timeout: u64,
    pub api_key: Option<String>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.model.endpoint.clone(),
            model: cfg.model.model.clone(),
            max_tokens: cfg.model.max_tokens,
            connect_timeout: cfg.model.connect_timeout,
            read_timeout: cfg.model.read_timeout,
            api_key: config::api_key(),
        }
    }
}

impl AnthropicConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn read_timeout(mut self, seconds: u64) -> Self {
        self.read_timeout = seconds;
        self
    }
}

/// Blocking Messages API client
pub struct AnthropicClient {
    config: AnthropicConfig,
    agent: ureq::Agent,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(config.connect_timeout))
            .timeout_read(Duration::from_secs(config.read_timeout))
            .build();
        Self { config, agent }
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn request_body(&self, system: &str, transcript: &[Turn], tools: &[ToolDeclaration]) -> Value {
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "tools": tools,
            "messages": transcript.iter().map(render_turn).collect::<Vec<_>>(),
        })
    }
}

impl ModelChannel for AnthropicClient {
    fn respond(
        &mut self,
        system: &str,
        transcript: &[Turn],
        tools: &[ToolDeclaration],
    ) -> ModelResult<ModelReply> {
        let api_key = self.config.api_key.as_deref().ok_or(ModelError::MissingApiKey)?;
        let body = self.request_body(system, transcript, tools);

        debug!(turns = transcript.len(), model = %self.config.model, "sending model request");

        let response = self
            .agent
            .post(&self.config.endpoint)
            .set("x-api-key", api_key)
            .set("anthropic-version", API_VERSION)
            .set("content-type", "application/json")
            .send_json(body);

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(ModelError::Api { status, body });
            }
            Err(e) => return Err(ModelError::Transport(e.to_string())),
        };

        let json: Value = response
            .into_json()
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        debug!(stop_reason = ?json["stop_reason"].as_str(), "model replied");
        parse_reply(&json)
    }
}

fn render_turn(turn: &Turn) -> Value {
    let content: Vec<Value> = turn.content.iter().map(render_block).collect();
    json!({ "role": turn.role.as_str(), "content": content })
}

fn render_block(block: &Block) -> Value {
    match block {
        Block::Text(text) => json!({ "type": "text", "text": text }),
        Block::Invocation(inv) => json!({
            "type": "tool_use",
            "id": inv.id,
            "name": inv.name,
            "input": inv.input,
        }),
        Block::Result(result) => {
            let content: Vec<Value> = result.content.iter().map(render_tool_content).collect();
            json!({
                "type": "tool_result",
                "tool_use_id": result.invocation_id,
                "content": content,
                "is_error": result.is_error,
            })
        }
    }
}

fn render_tool_content(content: &ToolContent) -> Value {
    match content {
        ToolContent::Text { text } => json!({ "type": "text", "text": text }),
        ToolContent::Image { data, .. } => json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": content.image_media_type(),
                "data": data,
            },
        }),
    }
}

/// Convert a Messages API response into a [`ModelReply`]
pub fn parse_reply(json: &Value) -> ModelResult<ModelReply> {
    let blocks = json["content"]
        .as_array()
        .ok_or_else(|| ModelError::InvalidResponse("response has no content array".into()))?;

    let mut content = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                content.push(Block::Text(block["text"].as_str().unwrap_or("").to_string()))
            }
            Some("tool_use") => {
                let id = block["id"].as_str().ok_or_else(|| {
                    ModelError::InvalidResponse("tool_use block without id".into())
                })?;
                let name = block["name"].as_str().ok_or_else(|| {
                    ModelError::InvalidResponse("tool_use block without name".into())
                })?;
                content.push(Block::Invocation(Invocation {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                }));
            }
            _ => {}
        }
    }

    Ok(ModelReply::from_content(content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::simulator_tools;
    use crate::model::InvocationResult;
    use pretty_assertions::assert_eq;

    fn client_for(server: &mockito::Server) -> AnthropicClient {
        AnthropicClient::new(
            AnthropicConfig::new(format!("{}/v1/messages", server.url()))
                .model("test-model")
                .max_tokens(256)
                .api_key("test-key"),
        )
    }

    #[test]
    fn test_config_builder() {
        let config = AnthropicConfig::new("http://localhost:9999")
            .model("m")
            .max_tokens(10)
            .read_timeout(5);
        assert_eq!(config.endpoint, "http://localhost:9999");
        assert_eq!(config.model, "m");
        assert_eq!(config.max_tokens, 10);
        assert_eq!(config.read_timeout, 5);
    }

    #[test]
    fn test_respond_parses_tool_use() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                  "content": [
                    {"type": "text", "text": "Looking at the screen"},
                    {"type": "tool_use", "id": "toolu_1", "name": "ui_view", "input": {}}
                  ],
                  "stop_reason": "tool_use"
                }"#,
            )
            .create();

        let mut client = client_for(&server);
        let reply = client
            .respond("system", &[Turn::user_text("go")], &simulator_tools())
            .unwrap();

        mock.assert();
        match reply {
            ModelReply::ActionsRequested { invocations, .. } => {
                assert_eq!(invocations.len(), 1);
                assert_eq!(invocations[0].name, "ui_view");
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_respond_maps_api_errors() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/v1/messages")
            .with_status(529)
            .with_body("overloaded")
            .create();

        let mut client = client_for(&server);
        let err = client.respond("system", &[], &[]).unwrap_err();
        match err {
            ModelError::Api { status, body } => {
                assert_eq!(status, 529);
                assert_eq!(body, "overloaded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = AnthropicConfig::new("http://127.0.0.1:9");
        config.api_key = None;
        let mut client = AnthropicClient::new(config);
        assert!(matches!(
            client.respond("system", &[], &[]),
            Err(ModelError::MissingApiKey)
        ));
    }

    #[test]
    fn test_render_tool_result_with_image() {
        let block = Block::Result(InvocationResult {
            invocation_id: "toolu_9".into(),
            content: vec![ToolContent::Image {
                data: "AAAA".into(),
                media_type: None,
            }],
            is_error: false,
        });

        assert_eq!(
            render_block(&block),
            json!({
                "type": "tool_result",
                "tool_use_id": "toolu_9",
                "content": [{
                    "type": "image",
                    "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}
                }],
                "is_error": false
            })
        );
    }

    #[test]
    fn test_parse_reply_skips_unknown_blocks() {
        let reply = parse_reply(&json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "done"}
            ]
        }))
        .unwrap();
        assert_eq!(
            reply,
            ModelReply::NoActionRequested {
                content: vec![Block::Text("done".into())]
            }
        );
        assert!(parse_reply(&json!({"error": "x"})).is_err());
    }
}
