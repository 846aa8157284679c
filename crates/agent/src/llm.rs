use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use orderly_core::config::{LlmConfig, LlmProvider};

use crate::errors::AgentError;
use crate::message::{ActionRequest, Message, Role};
use crate::tools::{manifest, ToolDefinition};

/// One model turn: full history in, next assistant message out.
///
/// Failures are fatal for the run. There is no retry here.
#[async_trait]
pub trait DecisionStep: Send + Sync {
    fn name(&self) -> &str;
    async fn decide(&self, messages: &[Message]) -> Result<Message, AgentError>;
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client for OpenAI and compatible servers (Ollama, vLLM).
pub struct OpenAiDecisionStep {
    base_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    tools: Vec<ToolDefinition>,
    client: reqwest::Client,
}

impl OpenAiDecisionStep {
    pub fn from_config(config: &LlmConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| AgentError::Decision(format!("could not build http client: {error}")))?;

        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.clone(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
        };
        // Ollama ignores the key but the header is still sent.
        let api_key =
            config.api_key.clone().unwrap_or_else(|| SecretString::from("ollama".to_string()));

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            tools: manifest(),
            client,
        })
    }

    fn request_body(&self, messages: &[Message]) -> Value {
        json!({
            "model": self.model,
            "messages": messages.iter().map(to_api_message).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "stream": false,
            "tools": self
                .tools
                .iter()
                .map(|tool| ApiToolDefinition {
                    r#type: "function",
                    function: ApiToolFunction {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect::<Vec<_>>(),
        })
    }
}

#[async_trait]
impl DecisionStep for OpenAiDecisionStep {
    fn name(&self) -> &str {
        "openai_compatible"
    }

    async fn decide(&self, messages: &[Message]) -> Result<Message, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            event_name = "agent.decision.request",
            model = %self.model,
            message_count = messages.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|error| AgentError::Decision(format!("network error: {error}")))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AgentError::Decision(
                "model endpoint rejected the api key".to_string(),
            ));
        }
        if status.as_u16() == 429 {
            return Err(AgentError::Decision("model endpoint is rate limiting".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "agent.decision.http_error",
                status = status.as_u16(),
                body = %body,
                "model endpoint returned an error"
            );
            return Err(AgentError::Decision(format!("model endpoint returned {status}: {body}")));
        }

        let payload: ApiResponse = response
            .json()
            .await
            .map_err(|error| AgentError::Decision(format!("unparsable response: {error}")))?;

        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Decision("response carried no choices".to_string()))?;

        Ok(from_api_message(choice.message))
    }
}

fn to_api_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::ActionResult => "tool",
    };

    let mut value = json!({ "role": role, "content": message.content });
    if message.has_actions() {
        value["tool_calls"] = message
            .requested_actions
            .iter()
            .map(|action| {
                json!({
                    "id": action.id,
                    "type": "function",
                    "function": {
                        "name": action.name,
                        "arguments": action.arguments.to_string(),
                    }
                })
            })
            .collect();
    }
    if let Some(request_id) = &message.request_id {
        value["tool_call_id"] = json!(request_id);
    }
    value
}

fn from_api_message(message: ApiMessage) -> Message {
    let requested_actions = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ActionRequest {
            id: call.id,
            name: call.function.name,
            // Unparsable argument text is kept as a string so dispatch can report it.
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments)),
        })
        .collect();

    Message::assistant_with_actions(message.content.unwrap_or_default(), requested_actions)
}

#[derive(Serialize)]
struct ApiToolDefinition<'a> {
    r#type: &'static str,
    function: ApiToolFunction<'a>,
}

#[derive(Serialize)]
struct ApiToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

enum Script {
    Queue(VecDeque<Message>),
    Repeat(Message),
}

/// Replays canned assistant messages. Drives the loop in tests and demos.
pub struct ScriptedDecisionStep {
    script: Mutex<Script>,
    latency: Option<Duration>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedDecisionStep {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self::with_script(Script::Queue(messages.into_iter().collect()))
    }

    /// Returns `message` on every call, forever.
    pub fn repeating(message: Message) -> Self {
        Self::with_script(Script::Repeat(message))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Histories passed to each `decide` call so far.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn with_script(script: Script) -> Self {
        Self { script: Mutex::new(script), latency: None, seen: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl DecisionStep for ScriptedDecisionStep {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, messages: &[Message]) -> Result<Message, AgentError> {
        self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(messages.to_vec());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut script = self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match &mut *script {
            Script::Queue(queue) => queue
                .pop_front()
                .ok_or_else(|| AgentError::Decision("scripted decisions exhausted".to_string())),
            Script::Repeat(message) => Ok(message.clone()),
        }
    }
}
