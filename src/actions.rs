/*
 * @file actions.rs
 * @brief Action registry, dispatch, and the model-facing tool contract
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

//! The fixed set of actions the model may request, and their handlers.
//!
//! Every action name the model can emit maps onto one [`Action`] variant.
//! Unknown names decode to [`Action::Unrecognized`] rather than an error;
//! dispatch over the parsed action is an exhaustive match.

use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::ai::{Model, ToolSpec};
use crate::lights::{Light, LightBank};

/// Wire name for switching the red light on.
pub const TURN_ON_LIGHT: &str = "turn_on_light";

/// Wire name for switching the red light off.
pub const TURN_OFF_LIGHT: &str = "turn_off_light";

/// Wire name for switching the blue light on.
pub const TURN_ON_BLUE_LIGHT: &str = "turn_on_BLUE_light";

/// Wire name for switching the blue light off.
pub const TURN_OFF_BLUE_LIGHT: &str = "turn_off_BLUE_light";

/// Wire name for the combined status report.
pub const GET_LIGHT_STATUS: &str = "get_light_status";

/// Wire name for the free-form question fallback.
pub const ANSWER_IN_NATURAL_LANGUAGE: &str = "answer_in_natural_language";

/// Reply when the model names an action that does not exist.
pub const FALLBACK_REPLY: &str = "I couldn't work out how to run that command.";

/// Reply when the question fallback is invoked with no question text.
pub const NO_QUESTION_REPLY: &str = "I didn't receive a question.";

/// Reply when the model produces an empty answer to a question.
pub const EMPTY_ANSWER_REPLY: &str = "I'm sorry, I couldn't come up with an answer.";

/// System instruction that teaches the model the decision format.
///
/// # Details
/// The model must answer every user line with a single JSON object naming
/// one action. The worked examples pin the expected shape for the
/// natural-language fallback.
pub const SYSTEM_PROMPT: &str = r#"You are an assistant that controls the light.
If the user's request is about turning the light on or off, or about its status, invoke the matching tool:

To turn the red light on:
{
  "name": "turn_on_light",
  "parameters": {}
}
To turn the red light off:
{
  "name": "turn_off_light",
  "parameters": {}
}
To turn the blue light on:
{
  "name": "turn_on_BLUE_light",
  "parameters": {}
}
To turn the blue light off:
{
  "name": "turn_off_BLUE_light",
  "parameters": {}
}
To get the status of the light:
{
  "name": "get_light_status",
  "parameters": {}
}

If the request is NOT about the light, invoke the 'answer_in_natural_language' tool instead, passing the question as input in the "question" field, for example:

{
  "name": "answer_in_natural_language",
  "parameters": {
    "question": "text of the question"
  }
}

Example 1:
User: "What time is it in Tokyo?"
Assistant:
{
  "name": "answer_in_natural_language",
  "parameters": {
    "question": "What time is it in Tokyo?"
  }
}

Example 2:
User: "What is the capital of Canada?"
Assistant:
{
  "name": "answer_in_natural_language",
  "parameters": {
    "question": "What is the capital of Canada?"
  }
}

Now respond only in JSON."#;

/// One decision decoded from the model.
///
/// # Details
/// Unknown fields are ignored and every known field has a default, so a
/// partially well-formed decision still dispatches instead of erroring.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ActionRequest {
    /// Requested action name; empty when the model omitted it.
    #[serde(default)]
    pub name: String,
    /// Action arguments; only the question fallback reads any.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Optional ready-made reply some models attach to unknown actions.
    #[serde(default)]
    pub message: Option<String>,
}

/// The closed set of things this assistant can do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    TurnOnRed,
    TurnOffRed,
    TurnOnBlue,
    TurnOffBlue,
    Status,
    Answer { question: String },
    Unrecognized { message: Option<String> },
}

impl Action {
    /// Resolves a decoded request into an action.
    ///
    /// # Details
    /// Name matching is exact. Anything unknown, including an absent name,
    /// becomes [`Action::Unrecognized`] carrying the model's suggested
    /// reply when one was attached.
    pub fn from_request(request: &ActionRequest) -> Self {
        match request.name.as_str() {
            TURN_ON_LIGHT => Action::TurnOnRed,
            TURN_OFF_LIGHT => Action::TurnOffRed,
            TURN_ON_BLUE_LIGHT => Action::TurnOnBlue,
            TURN_OFF_BLUE_LIGHT => Action::TurnOffBlue,
            GET_LIGHT_STATUS => Action::Status,
            ANSWER_IN_NATURAL_LANGUAGE => Action::Answer {
                question: request
                    .parameters
                    .get("question")
                    .cloned()
                    .unwrap_or_default(),
            },
            _ => Action::Unrecognized {
                message: request.message.clone(),
            },
        }
    }
}

/// Runs one decoded request against the lights or the model.
///
/// # Arguments
/// * `request` - The decision decoded from the model.
/// * `lights` - Light bank mutated by the switching actions.
/// * `model` - Model used by the natural-language fallback.
///
/// # Returns
/// The user-facing result text for this action.
///
/// # Errors
/// Returns an error when a light write fails or the fallback completion
/// request fails; the caller folds these into an error reply for the turn.
pub async fn dispatch(
    request: &ActionRequest,
    lights: &mut LightBank,
    model: &dyn Model,
) -> Result<String> {
    match Action::from_request(request) {
        Action::TurnOnRed => Ok(lights.set_state(Light::Red, true)?.to_string()),
        Action::TurnOffRed => Ok(lights.set_state(Light::Red, false)?.to_string()),
        Action::TurnOnBlue => Ok(lights.set_state(Light::Blue, true)?.to_string()),
        Action::TurnOffBlue => Ok(lights.set_state(Light::Blue, false)?.to_string()),
        Action::Status => Ok(lights.status_sentence()),
        Action::Answer { question } => answer_question(&question, model).await,
        Action::Unrecognized { message } => {
            debug!("unrecognized action '{}'", request.name);
            Ok(message.unwrap_or_else(|| FALLBACK_REPLY.to_string()))
        }
    }
}

/// Answers an off-topic question with a plain completion.
///
/// # Details
/// Empty questions and empty model output both map onto fixed replies so
/// the loop always has something to print.
async fn answer_question(question: &str, model: &dyn Model) -> Result<String> {
    if question.trim().is_empty() {
        return Ok(NO_QUESTION_REPLY.to_string());
    }
    let prompt = format!(
        "You are a friendly assistant. Answer the following question clearly and completely:\n\n{question}\n"
    );
    let reply = model.answer(&prompt).await?;
    debug!("natural-language reply: {}", reply);
    if reply.trim().is_empty() {
        return Ok(EMPTY_ANSWER_REPLY.to_string());
    }
    Ok(reply)
}

/// Builds the tool descriptors advertised to the model.
///
/// # Details
/// One descriptor per action. Only the question fallback takes a parameter;
/// the switching and status tools all carry an empty object schema.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::function(
            TURN_ON_LIGHT,
            "Turns the light on, if it is not already on.",
            no_parameters(),
        ),
        ToolSpec::function(
            TURN_OFF_LIGHT,
            "Turns the light off, if it is not already off.",
            no_parameters(),
        ),
        ToolSpec::function(
            TURN_ON_BLUE_LIGHT,
            "Turns the BLUE light on, if it is not already on and only if explicitly requested.",
            no_parameters(),
        ),
        ToolSpec::function(
            TURN_OFF_BLUE_LIGHT,
            "Turns the BLUE light off, if it is not already off and only if explicitly requested.",
            no_parameters(),
        ),
        ToolSpec::function(
            GET_LIGHT_STATUS,
            "Returns the current status of the light.",
            no_parameters(),
        ),
        ToolSpec::function(
            ANSWER_IN_NATURAL_LANGUAGE,
            "Answers questions unrelated to turning the light on or off or its status. Keep the answer short and concise.",
            json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "The question to answer"
                    }
                },
                "required": ["question"]
            }),
        ),
    ]
}

fn no_parameters() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedModel;
    use crate::lights::{self, testing::recording_bank};

    fn request(name: &str) -> ActionRequest {
        ActionRequest {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn every_wire_name_resolves_to_its_action() {
        assert_eq!(Action::from_request(&request(TURN_ON_LIGHT)), Action::TurnOnRed);
        assert_eq!(Action::from_request(&request(TURN_OFF_LIGHT)), Action::TurnOffRed);
        assert_eq!(
            Action::from_request(&request(TURN_ON_BLUE_LIGHT)),
            Action::TurnOnBlue
        );
        assert_eq!(
            Action::from_request(&request(TURN_OFF_BLUE_LIGHT)),
            Action::TurnOffBlue
        );
        assert_eq!(Action::from_request(&request(GET_LIGHT_STATUS)), Action::Status);
    }

    #[test]
    fn question_parameter_rides_into_the_answer_action() {
        let mut decoded = request(ANSWER_IN_NATURAL_LANGUAGE);
        decoded
            .parameters
            .insert("question".to_string(), "What is Rust?".to_string());
        assert_eq!(
            Action::from_request(&decoded),
            Action::Answer {
                question: "What is Rust?".to_string()
            }
        );
    }

    #[test]
    fn decode_tolerates_missing_fields() {
        let decoded: ActionRequest = serde_json::from_str("{}").unwrap();
        assert!(decoded.name.is_empty());
        assert!(decoded.parameters.is_empty());
        assert_eq!(
            Action::from_request(&decoded),
            Action::Unrecognized { message: None }
        );
    }

    #[tokio::test]
    async fn switching_actions_confirm_and_leave_the_other_light_alone() {
        let (mut bank, writes) = recording_bank();
        let model = ScriptedModel::new();

        let reply = dispatch(&request(TURN_ON_LIGHT), &mut bank, &model)
            .await
            .unwrap();
        assert_eq!(reply, lights::TURNED_ON);
        assert_eq!(bank.query_state(Light::Blue), "off");
        assert_eq!(*writes.lock().unwrap(), vec![(Light::Red, true)]);
    }

    #[tokio::test]
    async fn repeated_switching_reports_already_on() {
        let (mut bank, writes) = recording_bank();
        let model = ScriptedModel::new();

        dispatch(&request(TURN_ON_BLUE_LIGHT), &mut bank, &model)
            .await
            .unwrap();
        let reply = dispatch(&request(TURN_ON_BLUE_LIGHT), &mut bank, &model)
            .await
            .unwrap();
        assert_eq!(reply, lights::ALREADY_ON);
        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_reflects_prior_mutations() {
        let (mut bank, _writes) = recording_bank();
        let model = ScriptedModel::new();

        dispatch(&request(TURN_ON_LIGHT), &mut bank, &model)
            .await
            .unwrap();
        let reply = dispatch(&request(GET_LIGHT_STATUS), &mut bank, &model)
            .await
            .unwrap();
        assert!(reply.contains("red light is on"));
        assert!(reply.contains("blue light is off"));
    }

    #[tokio::test]
    async fn unknown_action_returns_the_fixed_fallback() {
        let (mut bank, writes) = recording_bank();
        let model = ScriptedModel::new();

        let reply = dispatch(&request("open_the_window"), &mut bank, &model)
            .await
            .unwrap();
        assert_eq!(reply, FALLBACK_REPLY);
        assert!(writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_action_prefers_the_model_supplied_message() {
        let (mut bank, _writes) = recording_bank();
        let model = ScriptedModel::new();
        let decoded = ActionRequest {
            name: "dance".to_string(),
            message: Some("I can only control the lights.".to_string()),
            ..Default::default()
        };

        let reply = dispatch(&decoded, &mut bank, &model).await.unwrap();
        assert_eq!(reply, "I can only control the lights.");
    }

    #[tokio::test]
    async fn empty_question_never_reaches_the_model() {
        let (mut bank, _writes) = recording_bank();
        let model = ScriptedModel::new();
        let mut decoded = request(ANSWER_IN_NATURAL_LANGUAGE);
        decoded
            .parameters
            .insert("question".to_string(), "   ".to_string());

        let reply = dispatch(&decoded, &mut bank, &model).await.unwrap();
        assert_eq!(reply, NO_QUESTION_REPLY);

        // A missing question key takes the same path.
        let bare = request(ANSWER_IN_NATURAL_LANGUAGE);
        let reply = dispatch(&bare, &mut bank, &model).await.unwrap();
        assert_eq!(reply, NO_QUESTION_REPLY);
        assert!(model.answer_prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn question_is_wrapped_into_the_completion_prompt() {
        let (mut bank, _writes) = recording_bank();
        let model = ScriptedModel::new();
        model.queue_answer("Ottawa.");
        let mut decoded = request(ANSWER_IN_NATURAL_LANGUAGE);
        decoded.parameters.insert(
            "question".to_string(),
            "What is the capital of Canada?".to_string(),
        );

        let reply = dispatch(&decoded, &mut bank, &model).await.unwrap();
        assert_eq!(reply, "Ottawa.");

        let prompts = model.answer_prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("What is the capital of Canada?"));
        assert!(prompts[0].starts_with("You are a friendly assistant."));
    }

    #[tokio::test]
    async fn blank_completion_becomes_the_apology_reply() {
        let (mut bank, _writes) = recording_bank();
        let model = ScriptedModel::new();
        model.queue_answer("  \n ");
        let mut decoded = request(ANSWER_IN_NATURAL_LANGUAGE);
        decoded
            .parameters
            .insert("question".to_string(), "Why?".to_string());

        let reply = dispatch(&decoded, &mut bank, &model).await.unwrap();
        assert_eq!(reply, EMPTY_ANSWER_REPLY);
    }

    #[test]
    fn tool_specs_cover_every_action_once() {
        let specs = tool_specs();
        let names: Vec<&str> = specs.iter().map(|spec| spec.name()).collect();
        assert_eq!(
            names,
            vec![
                TURN_ON_LIGHT,
                TURN_OFF_LIGHT,
                TURN_ON_BLUE_LIGHT,
                TURN_OFF_BLUE_LIGHT,
                GET_LIGHT_STATUS,
                ANSWER_IN_NATURAL_LANGUAGE,
            ]
        );
    }
}
