/*
 * @file assistant.rs
 * @brief Implementation of the ledi conversation runtime
 * @author Kevin Thomas
 * @date 2025
 *
 * MIT License
 *
 * Copyright (c) 2025 Kevin Thomas
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

//! Conversation loop orchestration module.

use std::io::{self, Write};
use std::time::{Duration, Instant};
use std::{env, fs};

use anyhow::Result;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info, warn};

use crate::actions;
use crate::ai::{Decision, Model, OllamaClient, ToolExchange, ToolSpec};
use crate::lights::{self, LightBank};

/// Path to the JSON configuration file that holds runtime defaults.
const CONFIG_PATH: &str = "config.json";

/// Words that end the conversation. Matching is case-insensitive and
/// whole-line, so "exit please" stays in the conversation.
const EXIT_KEYWORDS: [&str; 3] = ["exit", "quit", "esci"];

/// Banner printed once when the loop starts.
const BANNER: &str = "Conversation started. Type 'exit' to quit.";

/// Console prompt printed before each user line.
const INPUT_PROMPT: &str = "You: ";

/// Farewell printed when the loop ends.
const FAREWELL: &str = "Conversation over.";

/// Strongly typed representation of `config.json`.
#[derive(Clone, Deserialize)]
struct AppConfig {
    #[serde(default = "fallback_ollama_model")]
    default_ollama_model: String,
    #[serde(default = "fallback_ollama_url")]
    default_ollama_url: String,
    #[serde(default = "fallback_gpio_chip")]
    default_gpio_chip: String,
    #[serde(default = "fallback_red_line")]
    red_line_offset: u32,
    #[serde(default = "fallback_blue_line")]
    blue_line_offset: u32,
    #[serde(default = "fallback_request_timeout")]
    request_timeout_secs: u64,
}

/// Provides default configuration values when config.json is missing or invalid.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_ollama_model: fallback_ollama_model(),
            default_ollama_url: fallback_ollama_url(),
            default_gpio_chip: fallback_gpio_chip(),
            red_line_offset: fallback_red_line(),
            blue_line_offset: fallback_blue_line(),
            request_timeout_secs: fallback_request_timeout(),
        }
    }
}

/// Runs the interactive light assistant loop until the user exits.
///
/// The loop reads one console line at a time, asks the local model to pick
/// an action for it, runs that action against the lights, and prints the
/// result together with the time the turn took.
///
/// # Returns
/// `Ok(())` when the user types an exit keyword or input reaches EOF.
///
/// # Errors
/// Returns an error if the startup preflight fails or the model service
/// becomes unreachable mid-session.
pub async fn run_assistant() -> Result<()> {
    AssistantRuntime::new().await?.run_loop().await
}

/// Runtime container that owns the model client and the light state.
///
/// # Details
/// Holds the model behind the [`Model`] seam, the light bank, and the tool
/// descriptors advertised on every classification request. Conversation
/// state does not live here: each turn starts fresh.
struct AssistantRuntime {
    model: Box<dyn Model>,
    lights: LightBank,
    tools: Vec<ToolSpec>,
}

/// Implementation of the conversation runtime methods.
///
/// # Details
/// Provides methods for initializing the runtime, running the console loop,
/// and processing a single turn from user line to printed reply.
impl AssistantRuntime {
    /// Creates a new runtime from configuration.
    ///
    /// # Details
    /// Loads `config.json`, applies environment overrides, verifies the
    /// Ollama service and model with a preflight, and opens the GPIO lines
    /// (or the simulated fallback) with both lights OFF.
    ///
    /// # Returns
    /// A ready-to-run [`AssistantRuntime`].
    ///
    /// # Errors
    /// Propagates preflight and HTTP client construction failures.
    async fn new() -> Result<Self> {
        let config = load_app_config();
        let client = OllamaClient::new(
            ollama_url(&config),
            ollama_model(&config),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        client.ensure_ready().await?;
        let driver = lights::open_driver(
            &gpio_chip(&config),
            config.red_line_offset,
            config.blue_line_offset,
        );
        Ok(Self {
            model: Box::new(client),
            lights: LightBank::new(driver),
            tools: actions::tool_specs(),
        })
    }

    /// Builds a runtime from pre-constructed parts.
    #[cfg(test)]
    fn with_parts(model: Box<dyn Model>, lights: LightBank) -> Self {
        Self {
            model,
            lights,
            tools: actions::tool_specs(),
        }
    }

    /// Continuously runs the assistant until an exit keyword is typed.
    ///
    /// # Returns
    /// `Ok(())` once the user exits.
    ///
    /// # Errors
    /// Bubbles up fatal errors from the underlying turn processing.
    async fn run_loop(mut self) -> Result<()> {
        println!("{BANNER}");
        println!();
        let mut input = BufReader::new(tokio::io::stdin()).lines();
        while self.process_iteration(&mut input).await? {}
        println!("{FAREWELL}");
        Ok(())
    }

    /// Executes one prompt-classify-dispatch-report iteration.
    ///
    /// # Returns
    /// * `Ok(true)` to keep looping, `Ok(false)` to exit gracefully.
    ///
    /// # Errors
    /// Surfaces fatal issues: console I/O failures and classification
    /// transport failures.
    async fn process_iteration(&mut self, input: &mut Lines<BufReader<Stdin>>) -> Result<bool> {
        print!("{INPUT_PROMPT}");
        io::stdout().flush()?;
        let Some(line) = input.next_line().await? else {
            // EOF counts as an exit request.
            return Ok(false);
        };
        let line = line.trim();
        if line.is_empty() {
            return Ok(true);
        }
        if is_exit_command(line) {
            return Ok(false);
        }
        let report = self.process_turn(line).await?;
        println!("Assistant: {}", report.reply);
        println!("(Response time: {:.2} seconds)", report.elapsed.as_secs_f64());
        println!();
        Ok(true)
    }

    /// Runs one turn: classification, dispatch, and the reply to print.
    ///
    /// # Details
    /// Decision-parse and dispatch failures are folded into an error reply
    /// so the conversation continues. A transport failure during
    /// classification propagates instead and ends the session.
    ///
    /// # Parameters
    /// * `line` - The trimmed, non-empty user line.
    ///
    /// # Errors
    /// Returns an error when the model cannot be reached for classification.
    async fn process_turn(&mut self, line: &str) -> Result<TurnReport> {
        let mut turn = Turn::start();
        let decision = self
            .model
            .decide(actions::SYSTEM_PROMPT, line, turn.scratchpad(), &self.tools)
            .await?;
        log_decision(&decision);
        let reply = match self.run_decision(decision, &mut turn).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!("turn failed: {:#}", err);
                format!("Tool execution or output parsing failed: {err:#}")
            }
        };
        Ok(turn.finish(reply))
    }

    /// Resolves a decision into an action, runs it, and records the exchange.
    ///
    /// # Errors
    /// Returns an error when the decision does not decode as an action
    /// request or the action handler fails.
    async fn run_decision(&mut self, decision: Decision, turn: &mut Turn) -> Result<String> {
        let request = decision.into_request()?;
        let reply = actions::dispatch(&request, &mut self.lights, self.model.as_ref()).await?;
        turn.record(request.name, reply.clone());
        Ok(reply)
    }
}

/// Logs what the model decided before it runs.
fn log_decision(decision: &Decision) {
    match decision {
        Decision::ToolCall(request) => info!("model tool call: {}", request.name),
        Decision::Text(raw) => info!("raw model decision: {}", raw),
    }
}

/// Per-turn working state.
///
/// # Details
/// Carries the scratchpad of actions completed within the turn and the
/// clock for the response-time report. Every turn starts with an empty
/// scratchpad; nothing carries over between turns.
struct Turn {
    scratchpad: Vec<ToolExchange>,
    started: Instant,
}

impl Turn {
    /// Starts a fresh turn with an empty scratchpad.
    fn start() -> Self {
        Self {
            scratchpad: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Actions completed so far this turn, oldest first.
    fn scratchpad(&self) -> &[ToolExchange] {
        &self.scratchpad
    }

    /// Appends one completed action and its result text.
    fn record(&mut self, action: impl Into<String>, result: impl Into<String>) {
        self.scratchpad.push(ToolExchange {
            action: action.into(),
            result: result.into(),
        });
    }

    /// Closes the turn with the reply the user will see.
    fn finish(self, reply: String) -> TurnReport {
        TurnReport {
            reply,
            elapsed: self.started.elapsed(),
        }
    }
}

/// What one completed turn hands back to the loop.
struct TurnReport {
    reply: String,
    elapsed: Duration,
}

/// Determines whether the user asked to end the conversation.
///
/// # Details
/// Trims surrounding whitespace and lowercases the line before comparing
/// against the exit keywords. Only a whole-line match exits.
///
/// # Arguments
/// * `line` - The raw console line.
///
/// # Returns
/// * `bool` - `true` when the line is an exit keyword.
fn is_exit_command(line: &str) -> bool {
    let normalized = line.trim().to_lowercase();
    EXIT_KEYWORDS.iter().any(|keyword| normalized == *keyword)
}

/// Loads configuration from `config.json`, falling back to baked defaults.
///
/// # Details
/// A missing file is normal and only logged at debug level; a file that
/// exists but does not parse is logged as a warning. Both cases yield
/// the default configuration.
fn load_app_config() -> AppConfig {
    match fs::read_to_string(CONFIG_PATH) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!("Config parse error ({}): {}", CONFIG_PATH, err);
                AppConfig::default()
            }
        },
        Err(err) => {
            debug!("Config load skipped ({}): {}", CONFIG_PATH, err);
            AppConfig::default()
        }
    }
}

/// Determines the model tag from environment variable or configuration.
///
/// # Details
/// Checks the OLLAMA_MODEL environment variable first, then falls back to
/// the default_ollama_model value from the configuration file.
fn ollama_model(config: &AppConfig) -> String {
    env::var("OLLAMA_MODEL").unwrap_or_else(|_| config.default_ollama_model.clone())
}

/// Determines the Ollama base URL from environment variable or configuration.
fn ollama_url(config: &AppConfig) -> String {
    env::var("LEDI_OLLAMA_URL").unwrap_or_else(|_| config.default_ollama_url.clone())
}

/// Determines the GPIO chip name from environment variable or configuration.
fn gpio_chip(config: &AppConfig) -> String {
    env::var("LEDI_GPIO_CHIP").unwrap_or_else(|_| config.default_gpio_chip.clone())
}

/// Returns the fallback Ollama model tag.
///
/// # Details
/// This function exists to satisfy serde's default attribute requirements.
fn fallback_ollama_model() -> String {
    "llama3.2".to_string()
}

/// Returns the fallback Ollama base URL.
fn fallback_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// Returns the fallback GPIO chip name.
fn fallback_gpio_chip() -> String {
    "gpiochip4".to_string()
}

/// Returns the fallback line offset wired to the red LED.
fn fallback_red_line() -> u32 {
    19
}

/// Returns the fallback line offset wired to the blue LED.
fn fallback_blue_line() -> u32 {
    26
}

/// Returns the fallback per-request timeout in seconds.
fn fallback_request_timeout() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRequest;
    use crate::ai::testing::ScriptedModel;
    use crate::lights::testing::{recording_bank, WriteLog};
    use crate::lights::Light;

    fn runtime_with(model: ScriptedModel) -> (AssistantRuntime, WriteLog) {
        let (bank, writes) = recording_bank();
        (AssistantRuntime::with_parts(Box::new(model), bank), writes)
    }

    #[test]
    fn exit_keywords_match_whole_lines_only() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("  QUIT  "));
        assert!(is_exit_command("Esci"));
        assert!(!is_exit_command("exit please"));
        assert!(!is_exit_command("keep going"));
    }

    #[test]
    fn config_defaults_apply_field_by_field() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.default_ollama_model, "llama3.2");
        assert_eq!(config.default_ollama_url, "http://localhost:11434");
        assert_eq!(config.default_gpio_chip, "gpiochip4");
        assert_eq!(config.red_line_offset, 19);
        assert_eq!(config.blue_line_offset, 26);
        assert_eq!(config.request_timeout_secs, 120);

        let partial: AppConfig = serde_json::from_str(r#"{"red_line_offset": 5}"#).unwrap();
        assert_eq!(partial.red_line_offset, 5);
        assert_eq!(partial.blue_line_offset, 26);
    }

    #[test]
    fn turn_scratchpad_accumulates_within_the_turn() {
        let mut turn = Turn::start();
        assert!(turn.scratchpad().is_empty());
        turn.record("turn_on_light", "done");
        assert_eq!(turn.scratchpad().len(), 1);
        assert_eq!(turn.scratchpad()[0].action, "turn_on_light");

        let report = turn.finish("done".to_string());
        assert_eq!(report.reply, "done");
    }

    #[tokio::test]
    async fn text_decision_drives_the_light_and_reports() {
        let model = ScriptedModel::new();
        model.queue_text_decision(r#"{"name": "turn_on_light", "parameters": {}}"#);
        let probe = model.clone();
        let (mut runtime, writes) = runtime_with(model);

        let report = runtime.process_turn("turn on the light").await.unwrap();
        assert_eq!(report.reply, lights::TURNED_ON);
        assert_eq!(*writes.lock().unwrap(), vec![(Light::Red, true)]);
        assert_eq!(probe.seen_lines.lock().unwrap()[0], "turn on the light");
    }

    #[tokio::test]
    async fn native_tool_call_dispatches_without_content_parsing() {
        let model = ScriptedModel::new();
        model.queue_decision(Decision::ToolCall(ActionRequest {
            name: actions::GET_LIGHT_STATUS.to_string(),
            ..Default::default()
        }));
        let (mut runtime, _writes) = runtime_with(model);

        let report = runtime.process_turn("status?").await.unwrap();
        assert!(report.reply.contains("red light is off"));
        assert!(report.reply.contains("blue light is off"));
    }

    #[tokio::test]
    async fn malformed_decision_becomes_an_error_reply_and_the_loop_survives() {
        let model = ScriptedModel::new();
        model.queue_text_decision("The light is on, probably.");
        model.queue_text_decision(r#"{"name": "get_light_status", "parameters": {}}"#);
        let (mut runtime, _writes) = runtime_with(model);

        let report = runtime.process_turn("is the light on?").await.unwrap();
        assert!(report
            .reply
            .starts_with("Tool execution or output parsing failed:"));
        assert!(report.reply.contains("The light is on, probably."));

        let follow_up = runtime.process_turn("status").await.unwrap();
        assert!(follow_up.reply.contains("red light is off"));
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported_without_ending_the_session() {
        let model = ScriptedModel::new();
        model.queue_text_decision(
            r#"{"name": "answer_in_natural_language", "parameters": {"question": "What is Rust?"}}"#,
        );
        let (mut runtime, _writes) = runtime_with(model);

        // No scripted answer is queued, so the fallback handler fails.
        let report = runtime.process_turn("what is rust?").await.unwrap();
        assert!(report
            .reply
            .starts_with("Tool execution or output parsing failed:"));
    }

    #[tokio::test]
    async fn every_turn_starts_with_an_empty_scratchpad() {
        let model = ScriptedModel::new();
        model.queue_text_decision(r#"{"name": "turn_on_light", "parameters": {}}"#);
        model.queue_text_decision(r#"{"name": "turn_off_light", "parameters": {}}"#);
        let probe = model.clone();
        let (mut runtime, _writes) = runtime_with(model);

        runtime.process_turn("on").await.unwrap();
        runtime.process_turn("off").await.unwrap();
        assert_eq!(*probe.seen_scratchpad_lens.lock().unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn classification_transport_failure_is_fatal() {
        let model = ScriptedModel::new();
        let (mut runtime, _writes) = runtime_with(model);

        assert!(runtime.process_turn("hello").await.is_err());
    }
}
