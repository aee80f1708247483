use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use coordination::{ChatMessage, ChatRole, CompletionProvider, ProviderError};

use crate::config::ProviderSettings;

/// Chat-completions client for any OpenAI-compatible endpoint
/// (vLLM, llama.cpp server, OpenRouter, OpenAI).
pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    settings: ProviderSettings,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        let api_key = settings.api_key();
        Self {
            http: reqwest::Client::new(),
            settings,
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }

    fn body(&self, prompt: &str, history: &[ChatMessage]) -> Value {
        json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "messages": build_messages(prompt, history),
        })
    }
}

/// History in order, then `prompt` as the final user message.
pub fn build_messages(prompt: &str, history: &[ChatMessage]) -> Vec<Value> {
    let mut messages: Vec<Value> = history
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                "content": m.content,
            });
            if let Some(name) = &m.name {
                msg["name"] = json!(sanitize_name(name));
            }
            msg
        })
        .collect();
    messages.push(json!({ "role": "user", "content": prompt }));
    messages
}

// The API only accepts `[a-zA-Z0-9_-]` in message names.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Text of the first choice.
pub fn parse_completion(body: &Value) -> Result<String, ProviderError> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse(format!("no message content in {body}")))
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout.as_secs())
    } else if e.is_connect() || e.is_request() {
        ProviderError::Connection(e.to_string())
    } else {
        ProviderError::Provider(e.to_string())
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let mut request = self
            .http
            .post(self.endpoint())
            .timeout(timeout)
            .json(&self.body(prompt, history));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| map_send_error(e, timeout))?;
        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(ProviderError::Connection(format!("server returned {status}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        if !status.is_success() {
            return Err(ProviderError::Provider(format!("API error {status}: {body}")));
        }
        debug!(model = %self.settings.model, %status, "Completion received");
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_precedes_prompt() {
        let history = vec![
            ChatMessage::user("What is the unemployment rate?"),
            ChatMessage::assistant("labor analyst", "3.9% in March"),
        ];
        let messages = build_messages("Challenge the figure.", &history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["name"], "labor_analyst");
        assert_eq!(messages[2]["content"], "Challenge the figure.");
    }

    #[test]
    fn test_parse_completion() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "AGREE"}}]});
        assert_eq!(parse_completion(&body).unwrap(), "AGREE");

        let err = parse_completion(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_endpoint_tolerates_trailing_slash() {
        let provider = OpenAiCompatProvider::new(ProviderSettings {
            base_url: "http://localhost:8080/v1/".into(),
            ..ProviderSettings::default()
        });
        assert_eq!(provider.endpoint(), "http://localhost:8080/v1/chat/completions");
        let body = provider.body("hi", &[]);
        assert_eq!(body["messages"][0]["content"], "hi");
    }
}
