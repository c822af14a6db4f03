//! Generation collaborator.
//!
//! The loop only needs "prompt + context in, text or error out". The
//! `CodeGenerator` trait is that seam; `ChatCompletionsGenerator` talks to
//! any OpenAI-compatible `/chat/completions` endpoint (llama.cpp server,
//! vLLM, hosted APIs).

use crate::prompt::CODER_SYSTEM_PROMPT;
use async_trait::async_trait;
use autofix_common::config::GeneratorConfig;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("request to generator failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("generator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected generator response: {0}")]
    Decode(String),

    #[error("generator returned no content")]
    Empty,

    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce text for `prompt`. `context` may be empty.
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

pub struct ChatCompletionsGenerator {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn user_message(prompt: &str, context: &str) -> String {
    if context.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("{}\n--- REQUEST ---\n{}", context.trim_end(), prompt)
    }
}

#[async_trait]
impl CodeGenerator for ChatCompletionsGenerator {
    #[tracing::instrument(skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, GenerationError> {
        let user = user_message(prompt, context);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: CODER_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
            stream: false,
        };

        debug!(endpoint = %self.endpoint, "Requesting completion");
        let start = Instant::now();

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let bytes = response.bytes().await?;
        let parsed: ChatResponse =
            serde_json::from_slice(&bytes).map_err(|e| GenerationError::Decode(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::Empty)?;

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_bytes = content.len(),
            "Completion received"
        );
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator_for(server: &MockServer, api_key: Option<&str>) -> ChatCompletionsGenerator {
        ChatCompletionsGenerator::new(&GeneratorConfig {
            base_url: format!("{}/v1/", server.uri()),
            model: "coder-7b".to_string(),
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
            temperature: 0.2,
        })
        .unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({ "choices": [ { "index": 0, "message": { "role": "assistant", "content": content } } ] })
    }

    #[test]
    fn test_user_message_layout() {
        assert_eq!(user_message("do it", ""), "do it");
        assert_eq!(
            user_message("do it", "--- TARGET LANGUAGE ---\nGo\n"),
            "--- TARGET LANGUAGE ---\nGo\n--- REQUEST ---\ndo it"
        );
    }

    #[tokio::test]
    async fn test_generate_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({ "model": "coder-7b", "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("print('hi')")))
            .expect(1)
            .mount(&server)
            .await;

        let generator = generator_for(&server, None);
        let text = generator.generate("say hi", "").await.unwrap();
        assert_eq!(text, "print('hi')");
    }

    #[tokio::test]
    async fn test_generate_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("x = 1")))
            .expect(1)
            .mount(&server)
            .await;

        let generator = generator_for(&server, Some("sk-test"));
        assert_eq!(generator.generate("x", "").await.unwrap(), "x = 1");
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
            .mount(&server)
            .await;

        let generator = generator_for(&server, None);
        let err = generator.generate("x", "").await.unwrap_err();
        assert!(matches!(err, GenerationError::Status { status: 503, ref body } if body == "model loading"));
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let generator = generator_for(&server, None);
        assert!(matches!(generator.generate("x", "").await, Err(GenerationError::Empty)));
    }

    #[tokio::test]
    async fn test_blank_content_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  \n")))
            .mount(&server)
            .await;

        let generator = generator_for(&server, None);
        assert!(matches!(generator.generate("x", "").await, Err(GenerationError::Empty)));
    }

    #[tokio::test]
    async fn test_garbage_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let generator = generator_for(&server, None);
        assert!(matches!(generator.generate("x", "").await, Err(GenerationError::Decode(_))));
    }
}
