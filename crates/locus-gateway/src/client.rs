//! OpenAI-compatible chat completion client

use crate::error::GatewayError;
use crate::parse::{clean_code, parse_features, parse_locations};
use crate::prompts::{self, ChatMessage, TestBrief};
use crate::LanguageModelGateway;
use async_trait::async_trait;
use locus_model::{CodeDefinition, Feature, ImplementationLocation, ProjectKind, Reply, TokenUsage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Gateway connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// API base URL, without the `/v1/chat/completions` suffix
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Model name
    pub model: String,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Temperature for analysis and test tasks
    pub temperature: f32,
    /// Temperature for the execution plan
    pub plan_temperature: f32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 300,
            temperature: 0.3,
            plan_temperature: 0.5,
        }
    }
}

impl GatewayConfig {
    /// Completions endpoint
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// HTTP gateway speaking the OpenAI chat completions protocol
#[derive(Debug, Clone)]
pub struct ChatGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl ChatGateway {
    /// Build a client from configuration
    ///
    /// # Errors
    /// Returns [`GatewayError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Send one chat completion and return the reply text
    ///
    /// # Errors
    /// Returns [`GatewayError`] on transport failure, non-success status,
    /// empty body or a body without choices.
    pub async fn chat(
        &self,
        task: &'static str,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<Reply<String>, GatewayError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature,
        };

        tracing::debug!(task, model = %self.config.model, "model call");
        let response = self
            .http
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::warn!(task, status = status.as_u16(), "model API error");
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage::single(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_else(|| TokenUsage::single(0, 0));
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::MalformedResponse("response has no choices".into()))?
            .message
            .content
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }

        tracing::debug!(
            task,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "model reply"
        );
        Ok(Reply::new(content, usage))
    }
}

#[async_trait]
impl LanguageModelGateway for ChatGateway {
    async fn extract_features(&self, description: &str) -> Result<Reply<Vec<String>>, GatewayError> {
        let reply = self
            .chat("extract_features", &prompts::extract_features(description), self.config.temperature)
            .await?;
        let features = parse_features(&reply.value)?;
        Ok(Reply::new(features, reply.usage))
    }

    async fn localize(
        &self,
        feature: &Feature,
        context: &[CodeDefinition],
    ) -> Result<Reply<Vec<ImplementationLocation>>, GatewayError> {
        let reply = self
            .chat("localize", &prompts::localize(feature, context), self.config.temperature)
            .await?;
        let locations = parse_locations(&reply.value)?;
        Ok(Reply::new(locations, reply.usage))
    }

    async fn generate_test(&self, brief: &TestBrief<'_>) -> Result<Reply<String>, GatewayError> {
        let reply = self
            .chat("generate_test", &prompts::generate_test(brief), self.config.temperature)
            .await?;
        Ok(reply.map(|code| clean_code(&code)))
    }

    async fn repair_test(
        &self,
        prior_source: &str,
        failure_log: &str,
        kind: ProjectKind,
    ) -> Result<Reply<String>, GatewayError> {
        let reply = self
            .chat(
                "repair_test",
                &prompts::repair_test(prior_source, failure_log, kind),
                self.config.temperature,
            )
            .await?;
        Ok(reply.map(|code| clean_code(&code)))
    }

    async fn generate_plan(
        &self,
        description: &str,
        definitions: &[CodeDefinition],
    ) -> Result<Reply<String>, GatewayError> {
        let reply = self
            .chat(
                "generate_plan",
                &prompts::generate_plan(description, definitions),
                self.config.plan_temperature,
            )
            .await?;
        Ok(reply.map(|plan| plan.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    fn gateway(base_url: String) -> ChatGateway {
        ChatGateway::new(GatewayConfig {
            base_url,
            api_key: "test-key".into(),
            timeout_secs: 5,
            ..GatewayConfig::default()
        })
        .unwrap()
    }

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5}
        })
        .to_string()
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = GatewayConfig {
            base_url: "https://llm.internal/".into(),
            ..GatewayConfig::default()
        };
        assert_eq!(config.endpoint(), "https://llm.internal/v1/chat/completions");
    }

    #[tokio::test]
    async fn extracts_features_with_usage() {
        let url = serve_once("200 OK", completion("```json\n[\"create channel\"]\n```")).await;
        let reply = gateway(url).extract_features("channels").await.unwrap();
        assert_eq!(reply.value, vec!["create channel"]);
        assert_eq!(reply.usage, TokenUsage::single(12, 5));
    }

    #[tokio::test]
    async fn generated_code_is_unfenced() {
        let url = serve_once("200 OK", completion("```python\nimport httpx\n```")).await;
        let reply = gateway(url)
            .repair_test("old", "log", ProjectKind::Python)
            .await
            .unwrap();
        assert_eq!(reply.value, "import httpx");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let url = serve_once("503 Service Unavailable", "{\"error\":\"overloaded\"}".into()).await;
        let err = gateway(url).generate_plan("x", &[]).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Status {
                status: 503,
                body: "{\"error\":\"overloaded\"}".into()
            }
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn missing_choices_is_malformed() {
        let url = serve_once("200 OK", "{\"choices\": []}".into()).await;
        let err = gateway(url).generate_plan("x", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = gateway(format!("http://{addr}"))
            .generate_plan("x", &[])
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
