//! OpenAI chat-completions client, in two shapes: a one-shot completion at
//! temperature zero for constrained extraction prompts, and a tool-call round
//! for the chat dispatcher.

use serde::{Deserialize, Serialize};

use crate::{expect_success, ConnectorError};

pub const OPENAI_API_BASE: &str = "https://api.openai.com";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4";

/// Client for the chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    api_base: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_api_base(
            api_key,
            DEFAULT_CHAT_MODEL.to_string(),
            OPENAI_API_BASE.to_string(),
        )
    }

    /// Full constructor: alternate model and base URL.
    pub fn with_api_base(api_key: String, model: String, api_base: String) -> Self {
        Self {
            api_key,
            model,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// One-shot completion at temperature zero. Returns the assistant text.
    pub fn complete(&self, prompt: &str) -> Result<String, ConnectorError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: 0.0,
            tools: None,
        };
        let response = self.post_chat(&request)?;
        let choice = first_choice(response)?;
        Ok(choice.message.content.unwrap_or_default())
    }

    /// One round of a (possibly tool-calling) conversation. Returns the
    /// assistant turn, which may carry `tool_calls` instead of content.
    pub fn chat(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<serde_json::Value>>,
    ) -> Result<ChatMessage, ConnectorError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.7,
            tools,
        };
        let response = self.post_chat(&request)?;
        let choice = first_choice(response)?;
        Ok(choice.message)
    }

    fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ConnectorError> {
        let url = format!("{}/v1/chat/completions", self.api_base);
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()?;
        let response = expect_success("openai", response)?;
        response.json().map_err(|err| ConnectorError::Parse {
            provider: "openai",
            detail: err.to_string(),
        })
    }
}

fn first_choice(response: ChatResponse) -> Result<ChatChoice, ConnectorError> {
    response
        .choices
        .into_iter()
        .next()
        .ok_or(ConnectorError::Parse {
            provider: "openai",
            detail: "response had no choices".to_string(),
        })
}

/// One conversation message in the OpenAI wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Result of executing one tool call, addressed back to the call id.
    pub fn tool_result(call_id: &str, text: &str) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: Some(call_id.to_string()),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments exactly as the model produced them.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
