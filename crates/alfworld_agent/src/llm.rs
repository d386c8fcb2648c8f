//! OpenAI-compatible chat completion client.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::config::LlmConfig;
use crate::conversation::{Message, Role};
use crate::transport::{build_client, join_url, post_json, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
}

pub trait LlmCompletionClient {
    fn complete(&self, request: &LlmCompletionRequest)
        -> Result<LlmCompletionResult, LlmClientError>;
}

impl<C: LlmCompletionClient + ?Sized> LlmCompletionClient for Box<C> {
    fn complete(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResult, LlmClientError> {
        (**self).complete(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCompletionResult {
    pub output: String,
    pub model: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl LlmCompletionResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            model: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmClientError {
    BuildClient { message: String },
    Http { message: String },
    HttpStatus { code: u16, message: String },
    DecodeResponse { message: String },
    EmptyChoice,
    Exhausted,
    ReadReplies { path: String, message: String },
}

impl fmt::Display for LlmClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmClientError::BuildClient { message } => write!(f, "client build failed: {message}"),
            LlmClientError::Http { message } => write!(f, "http request failed: {message}"),
            LlmClientError::HttpStatus { code, message } => {
                write!(f, "http status {code}: {message}")
            }
            LlmClientError::DecodeResponse { message } => {
                write!(f, "decode response failed: {message}")
            }
            LlmClientError::EmptyChoice => write!(f, "empty completion choice"),
            LlmClientError::Exhausted => write!(f, "scripted replies exhausted"),
            LlmClientError::ReadReplies { path, message } => {
                write!(f, "read scripted replies failed ({path}): {message}")
            }
        }
    }
}

impl Error for LlmClientError {}

impl From<TransportError> for LlmClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::BuildClient { message } => LlmClientError::BuildClient { message },
            TransportError::Http { message } => LlmClientError::Http { message },
            TransportError::HttpStatus { code, message } => {
                LlmClientError::HttpStatus { code, message }
            }
            TransportError::DecodeResponse { message } => {
                LlmClientError::DecodeResponse { message }
            }
        }
    }
}

// ============================================================================
// OpenAI-compatible HTTP client
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiChatCompletionClient {
    base_url: String,
    api_key: String,
    client: Client,
}

impl OpenAiChatCompletionClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmClientError> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: build_client(config.timeout_ms)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn chat_payload(request: &LlmCompletionRequest) -> ChatCompletionRequest<'_> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !request.system_prompt.trim().is_empty() {
        messages.push(ChatMessage {
            role: Role::System.as_str(),
            content: request.system_prompt.as_str(),
        });
    }
    messages.extend(request.messages.iter().map(|message| ChatMessage {
        role: message.role.as_str(),
        content: message.content.as_str(),
    }));
    ChatCompletionRequest {
        model: request.model.as_str(),
        messages,
    }
}

impl ChatCompletionResponse {
    /// Text of the first choice plus whatever usage the server reported.
    fn into_result(self) -> Result<LlmCompletionResult, LlmClientError> {
        let first = self
            .choices
            .into_iter()
            .next()
            .ok_or(LlmClientError::EmptyChoice)?;
        let usage = self.usage.unwrap_or_default();
        Ok(LlmCompletionResult {
            output: first.message.content.unwrap_or_default(),
            model: self.model,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
    }
}

impl LlmCompletionClient for OpenAiChatCompletionClient {
    fn complete(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResult, LlmClientError> {
        let url = join_url(&self.base_url, "chat/completions");
        tracing::debug!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            "requesting chat completion"
        );
        let response: ChatCompletionResponse = post_json(
            self.client.post(url).bearer_auth(&self.api_key),
            &chat_payload(request),
        )?;
        response.into_result()
    }
}

// ============================================================================
// Scripted client
// ============================================================================

/// Replays canned replies in order; used for offline runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCompletionClient {
    replies: Vec<String>,
    cursor: Cell<usize>,
}

impl ScriptedCompletionClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            cursor: Cell::new(0),
        }
    }

    /// Loads a YAML or JSON list of replies.
    pub fn from_file(path: &Path) -> Result<Self, LlmClientError> {
        let read_error = |message: String| LlmClientError::ReadReplies {
            path: path.display().to_string(),
            message,
        };
        let content = fs::read_to_string(path).map_err(|err| read_error(err.to_string()))?;
        let replies: Vec<String> =
            serde_yaml::from_str(&content).map_err(|err| read_error(err.to_string()))?;
        Ok(Self::new(replies))
    }

    pub fn remaining(&self) -> usize {
        self.replies.len().saturating_sub(self.cursor.get())
    }
}

impl LlmCompletionClient for ScriptedCompletionClient {
    fn complete(
        &self,
        _request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResult, LlmClientError> {
        let index = self.cursor.get();
        let reply = self
            .replies
            .get(index)
            .ok_or(LlmClientError::Exhausted)?;
        self.cursor.set(index + 1);
        Ok(LlmCompletionResult::text(reply.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmCompletionRequest {
        LlmCompletionRequest {
            model: "gpt-test".to_string(),
            system_prompt: "be brief".to_string(),
            messages: vec![
                Message::user("Your task now begins."),
                Message::assistant("Action: look"),
            ],
        }
    }

    #[test]
    fn payload_puts_system_prompt_first() {
        let request = request();
        let payload = serde_json::to_value(chat_payload(&request)).unwrap();
        let roles: Vec<&str> = payload["messages"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|message| message["role"].as_str())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(payload["model"], "gpt-test");
    }

    #[test]
    fn payload_skips_blank_system_prompt() {
        let mut request = request();
        request.system_prompt = "  ".to_string();
        let payload = serde_json::to_value(chat_payload(&request)).unwrap();
        assert_eq!(payload["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn response_without_content_decodes_to_empty_output() {
        let response: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        let result = response.into_result().unwrap();
        assert_eq!(result, LlmCompletionResult::text(""));
    }

    #[test]
    fn response_carries_model_and_usage() {
        let response: ChatCompletionResponse = serde_json::from_str(
            r#"{"model":"gpt-4","usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15},
                "choices":[{"message":{"content":"Action: look"}},{"message":{"content":"ignored"}}]}"#,
        )
        .unwrap();
        let result = response.into_result().unwrap();
        assert_eq!(result.output, "Action: look");
        assert_eq!(result.model.as_deref(), Some("gpt-4"));
        assert_eq!(result.prompt_tokens, Some(12));
        assert_eq!(result.total_tokens, Some(15));
    }

    #[test]
    fn response_without_choices_is_an_error() {
        let response: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(response.into_result(), Err(LlmClientError::EmptyChoice));
    }

    #[test]
    fn malformed_base_url_surfaces_http_error() {
        let client = OpenAiChatCompletionClient::from_config(&LlmConfig {
            model: "gpt-test".to_string(),
            base_url: "not a url".to_string(),
            api_key: "key".to_string(),
            timeout_ms: 100,
            system_prompt: String::new(),
        })
        .unwrap();
        assert!(matches!(
            client.complete(&request()),
            Err(LlmClientError::Http { .. })
        ));
    }

    #[test]
    fn scripted_client_replays_then_exhausts() {
        let client = ScriptedCompletionClient::new(["Action: look", "Action: inventory"]);
        let request = request();
        assert_eq!(client.complete(&request).unwrap().output, "Action: look");
        assert_eq!(client.remaining(), 1);
        assert_eq!(client.complete(&request).unwrap().output, "Action: inventory");
        assert_eq!(client.complete(&request), Err(LlmClientError::Exhausted));
    }

    #[test]
    fn scripted_client_loads_reply_list() {
        let unique = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("alfworld-agent-replies-{unique}.yaml"));
        std::fs::write(&path, "- \"Action: look\"\n- TERMINATE\n").unwrap();
        let client = ScriptedCompletionClient::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(client.remaining(), 2);

        let boxed: Box<dyn LlmCompletionClient> = Box::new(client);
        assert_eq!(boxed.complete(&request()).unwrap().output, "Action: look");
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = OpenAiChatCompletionClient::from_config(&LlmConfig {
            model: "gpt-test".to_string(),
            base_url: "https://example.invalid/v1/".to_string(),
            api_key: "key".to_string(),
            timeout_ms: 1000,
            system_prompt: String::new(),
        })
        .unwrap();
        assert_eq!(client.base_url, "https://example.invalid/v1");
    }
}
