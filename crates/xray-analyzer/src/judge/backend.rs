//! The judging capability boundary and its OpenAI-compatible implementation.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::BackendConfig;
use crate::errors::BackendError;
use crate::judge::prompt::JudgePrompt;

/// A service that answers a bounded prompt with raw verdict text.
///
/// Implementations own their transport; timeouts are enforced by the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    async fn invoke(&self, prompt: &JudgePrompt) -> Result<String, BackendError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiJudge {
    client: reqwest::Client,
    config: BackendConfig,
}

impl OpenAiJudge {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    pub fn request_body(&self, prompt: &JudgePrompt) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        })
    }
}

#[async_trait]
impl JudgeBackend for OpenAiJudge {
    async fn invoke(&self, prompt: &JudgePrompt) -> Result<String, BackendError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unreachable(format!(
                "judge API error ({status}): {body}"
            )));
        }

        let resp_json: Value = response.json().await.map_err(classify_transport_error)?;
        let content = completion_text(&resp_json);
        debug!(model = %self.config.model, chars = content.len(), "judge responded");
        Ok(content)
    }
}

fn classify_transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else {
        BackendError::Unreachable(err.to_string())
    }
}

/// First choice's message content; empty if the envelope has none.
pub(crate) fn completion_text(resp: &Value) -> String {
    resp["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judge() -> OpenAiJudge {
        OpenAiJudge::new(BackendConfig {
            base_url: "http://localhost:8080/v1/".into(),
            api_key: "k".into(),
            model: "llama-3.3-70b".into(),
            temperature: 0.1,
            max_tokens: 1000,
        })
    }

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(judge().endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn request_body_carries_both_messages() {
        let body = judge().request_body(&JudgePrompt {
            system: "sys".into(),
            user: "usr".into(),
        });
        assert_eq!(body["model"], "llama-3.3-70b");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn completion_text_reads_first_choice() {
        let resp = json!({"choices": [{"message": {"role": "assistant", "content": "{\"faulty_step\": null}"}}]});
        assert_eq!(completion_text(&resp), "{\"faulty_step\": null}");
        assert_eq!(completion_text(&json!({"choices": []})), "");
    }
}
