//! Model access for the assistant.
//!
//! [`Model`] is the seam between the conversation loop and the language
//! model: one call classifies a user line into an action decision, the
//! other runs a plain completion for the natural-language fallback.
//! [`OllamaClient`] implements it against a local Ollama server's chat API
//! and also carries the startup preflight that verifies the service and
//! the model are actually available before the first prompt.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::actions::ActionRequest;

/// One message in a chat exchange.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// Builds a message with the given role.
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// A tool descriptor advertised to the model.
#[derive(Clone, Debug, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    kind: String,
    function: ToolFunction,
}

/// Name, description, and JSON schema of one advertised tool.
#[derive(Clone, Debug, Serialize)]
pub struct ToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl ToolSpec {
    /// Builds a function-typed tool descriptor.
    ///
    /// # Arguments
    /// * `name` - Wire name the model uses to invoke the tool
    /// * `description` - What the tool does, phrased for the model
    /// * `parameters` - JSON schema of the tool arguments
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: ToolFunction {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }

    /// Returns the advertised tool name.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// One completed action within the current turn: what ran and what it said.
///
/// # Details
/// Exchanges are replayed to the model as `tool` role messages when a turn
/// asks it to decide again. The log lives for a single turn only.
#[derive(Clone, Debug)]
pub struct ToolExchange {
    pub action: String,
    pub result: String,
}

/// What the model decided to do with a user line.
#[derive(Clone, Debug)]
pub enum Decision {
    /// The model invoked a tool through the structured tool-call channel.
    ToolCall(ActionRequest),
    /// The model replied with text, expected to be one JSON action request.
    Text(String),
}

impl Decision {
    /// Converts the decision into a dispatchable request.
    ///
    /// # Errors
    /// Returns an error when a text decision does not decode as an action
    /// request; the error carries the offending reply for the log.
    pub fn into_request(self) -> Result<ActionRequest> {
        match self {
            Decision::ToolCall(request) => Ok(request),
            Decision::Text(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Model reply was not a valid action request: {raw}")),
        }
    }
}

/// Language model operations the assistant needs.
///
/// # Details
/// One implementation talks to a live Ollama server; tests substitute a
/// scripted fake. The conversation loop only sees this trait.
#[async_trait]
pub trait Model: Send + Sync {
    /// Asks the model to pick an action for one user line.
    ///
    /// # Arguments
    /// * `system_prompt` - Instruction teaching the decision format
    /// * `user_line` - The raw console line
    /// * `scratchpad` - Actions already run this turn, oldest first
    /// * `tools` - Tool descriptors the model may invoke
    ///
    /// # Errors
    /// Returns an error when the service cannot be reached or its response
    /// cannot be decoded. Transport failures here are fatal to the session.
    async fn decide(
        &self,
        system_prompt: &str,
        user_line: &str,
        scratchpad: &[ToolExchange],
        tools: &[ToolSpec],
    ) -> Result<Decision>;

    /// Runs a plain completion with no tools attached.
    async fn answer(&self, prompt: &str) -> Result<String>;
}

/// Chat request body for the Ollama `/api/chat` endpoint.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec>>,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Chat response envelope from Ollama.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

/// Assistant message returned by Ollama, with either text or tool calls.
#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

/// One structured tool invocation in a chat response.
#[derive(Clone, Debug, Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Clone, Debug, Deserialize)]
struct ToolCallFunction {
    name: String,
    /// Argument object; Ollama sends JSON here, not an encoded string.
    #[serde(default)]
    arguments: Value,
}

/// Model list returned by the Ollama `/api/tags` endpoint.
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelTag {
    name: String,
}

/// Client for a local Ollama server.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Creates a client for the given server and model.
    ///
    /// # Arguments
    /// * `base_url` - Server root, e.g. `http://localhost:11434`
    /// * `model` - Model tag used for every request
    /// * `timeout` - Per-request timeout covering classification and
    ///   completion calls; local models can be slow on first load
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build the HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    /// Verifies the service responds and the model is installed.
    ///
    /// # Details
    /// Runs once at startup, before the first prompt. A missing model is
    /// downloaded with the `ollama` CLI.
    ///
    /// # Errors
    /// Returns an error when the service is unreachable, the model list
    /// cannot be read, or the download fails.
    pub async fn ensure_ready(&self) -> Result<()> {
        info!("Checking the Ollama service at {}", self.base_url);
        if !self.health_check().await {
            bail!(
                "Ollama service is not reachable at {}. Start it with 'ollama serve' and try again.",
                self.base_url
            );
        }
        info!("✓ Ollama service is running");
        if !self.has_model().await? {
            self.pull_model()?;
        }
        info!("✓ Model {} is ready", self.model);
        Ok(())
    }

    /// Returns whether the service answers on its model listing endpoint.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Lists the model tags installed on the server.
    async fn installed_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query {url}"))?;
        let parsed: OllamaTagsResponse = response
            .json()
            .await
            .context("Failed to parse the Ollama model list")?;
        Ok(parsed.models.into_iter().map(|tag| tag.name).collect())
    }

    /// Returns whether the configured model is installed.
    ///
    /// # Details
    /// A bare tag like `llama3.2` matches its `:latest` alias.
    async fn has_model(&self) -> Result<bool> {
        let models = self.installed_models().await?;
        Ok(models.iter().any(|name| {
            name == &self.model
                || name
                    .strip_suffix(":latest")
                    .is_some_and(|base| base == self.model)
        }))
    }

    /// Downloads the configured model with the Ollama CLI.
    fn pull_model(&self) -> Result<()> {
        info!("Model {} not found locally, downloading", self.model);
        let status = std::process::Command::new("ollama")
            .args(["pull", &self.model])
            .status()
            .context("Failed to run 'ollama pull'; is the Ollama CLI installed?")?;
        if !status.success() {
            bail!("'ollama pull {}' exited with {}", self.model, status);
        }
        Ok(())
    }

    /// Sends one chat request and returns the assistant message.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolSpec>>,
    ) -> Result<ResponseMessage> {
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            tools,
            options: ChatOptions { temperature: 0.0 },
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama returned {status}: {body}");
        }
        let parsed: OllamaChatResponse = response
            .json()
            .await
            .context("Failed to parse the Ollama chat response")?;
        Ok(parsed.message)
    }
}

#[async_trait]
impl Model for OllamaClient {
    async fn decide(
        &self,
        system_prompt: &str,
        user_line: &str,
        scratchpad: &[ToolExchange],
        tools: &[ToolSpec],
    ) -> Result<Decision> {
        let mut messages = vec![
            ChatMessage::new("system", system_prompt),
            ChatMessage::new("user", user_line),
        ];
        for exchange in scratchpad {
            messages.push(ChatMessage::new(
                "tool",
                format!("{}: {}", exchange.action, exchange.result),
            ));
        }

        let reply = self.chat(messages, Some(tools.to_vec())).await?;
        if let Some(call) = reply.tool_calls.into_iter().next() {
            debug!("model invoked '{}' via tool call", call.function.name);
            return Ok(Decision::ToolCall(ActionRequest {
                name: call.function.name,
                parameters: value_to_parameters(call.function.arguments),
                message: None,
            }));
        }
        Ok(Decision::Text(reply.content))
    }

    async fn answer(&self, prompt: &str) -> Result<String> {
        let messages = vec![ChatMessage::new("user", prompt)];
        let reply = self.chat(messages, None).await?;
        Ok(reply.content)
    }
}

/// Flattens a tool-call argument object into string parameters.
///
/// # Details
/// String values pass through unchanged; anything else keeps its JSON
/// rendering. Non-object arguments yield an empty map.
fn value_to_parameters(arguments: Value) -> HashMap<String, String> {
    let Value::Object(map) = arguments else {
        return HashMap::new();
    };
    map.into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}
