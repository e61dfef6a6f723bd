//! Chat completion backends

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::retry::{classify_status, parse_retry_after};
use crate::config::DialogueConfig;
use crate::{Error, Result};

/// A conversational model that keeps its own history
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Send one user message and return the raw reply
    ///
    /// # Errors
    ///
    /// Transient failures are reported as [`Error::QuotaExhausted`] or
    /// [`Error::ServiceUnavailable`]; anything else is not worth retrying
    async fn send(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// `OpenAI`-compatible `/chat/completions` backend
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    history: Mutex<VecDeque<ChatMessage>>,
    history_limit: usize,
}

impl OpenAiChat {
    /// Create a chat backend from dialogue configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &DialogueConfig) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for the dialogue backend".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            history: Mutex::new(VecDeque::new()),
            history_limit: config.history_limit,
        })
    }

    fn messages_for(&self, text: &str) -> Vec<ChatMessage> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new("system", &self.system_prompt));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::new("user", text));
        messages
    }

    fn remember(&self, user: &str, assistant: &str) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(ChatMessage::new("user", user));
        history.push_back(ChatMessage::new("assistant", assistant));
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    fn name(&self) -> &'static str {
        "openai-chat"
    }

    async fn send(&self, text: &str) -> Result<String> {
        let messages = self.messages_for(text);
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&ChatRequest {
                model: &self.model,
                messages: &messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body, retry_after));
        }

        let result: ChatResponse = response.json().await?;
        let reply = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Dialogue("reply contained no choices".to_string()))?;

        self.remember(text, &reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(limit: usize) -> OpenAiChat {
        OpenAiChat::new(&DialogueConfig {
            api_key: Some("test".to_string()),
            history_limit: limit,
            ..DialogueConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn requires_api_key() {
        assert!(matches!(
            OpenAiChat::new(&DialogueConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn messages_start_with_system_prompt() {
        let chat = chat(20);
        chat.remember("hello", "[NEUTRAL] hi");
        let messages = chat.messages_for("how are you");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3].content, "how are you");
    }

    #[test]
    fn history_is_bounded() {
        let chat = chat(4);
        for i in 0..5 {
            chat.remember(&format!("q{i}"), &format!("a{i}"));
        }
        let messages = chat.messages_for("next");
        // system + 4 remembered + user
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1].content, "q3");
    }

    #[test]
    fn endpoint_from_base_url() {
        let chat = OpenAiChat::new(&DialogueConfig {
            api_key: Some("k".to_string()),
            base_url: "http://localhost:8080/v1/".to_string(),
            ..DialogueConfig::default()
        })
        .unwrap();
        assert_eq!(chat.endpoint, "http://localhost:8080/v1/chat/completions");
    }
}
