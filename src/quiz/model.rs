//! Chat-completion clients behind one fail-soft interface.
//!
//! Every provider answers [`ModelClient::get_response`] with a list of text
//! blocks. Provider errors are logged and turned into an empty list, so
//! callers only ever have to handle "no usable output".

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chatgpt::config::{ChatGPTEngine, ModelConfigurationBuilder};
use chatgpt::client::ChatGPT;
use chatgpt::types::CompletionResponse;
use log::{debug, error, info};
use regex::Regex;
use url::Url;

use crate::config::{ModelSettings, Provider};
use crate::error::{ConfigError, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model identifier used in log lines.
    fn model_name(&self) -> &str;

    /// One round trip to the provider, returning the raw text of every choice.
    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Vec<String>, ModelError>;

    /// Fail-soft wrapper around [`ModelClient::complete`]: the returned
    /// choices are split into blocks on blank lines, and any error becomes an
    /// empty list after being logged.
    async fn get_response(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Vec<String> {
        let temperature = clamp_temperature(temperature);
        match self.complete(messages, max_tokens.max(1), temperature).await {
            Ok(choices) => {
                let blocks = split_blocks(&choices);
                info!(
                    "Response received from {} ({} choices, {} blocks)",
                    self.model_name(),
                    choices.len(),
                    blocks.len()
                );
                blocks
            }
            Err(e) => {
                error!("Error while getting response from {}: {}", self.model_name(), e);
                Vec::new()
            }
        }
    }

    /// Fail-soft free-text reply: the first non-blank choice with its
    /// layout untouched apart from surrounding blank lines.
    async fn get_text(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Option<String> {
        let temperature = clamp_temperature(temperature);
        match self.complete(messages, max_tokens.max(1), temperature).await {
            Ok(choices) => {
                let text = choices
                    .iter()
                    .map(|choice| choice.trim_start_matches(['\n', '\r']).trim_end())
                    .find(|choice| !choice.trim().is_empty())
                    .map(str::to_string);
                info!(
                    "Text received from {} ({} choices)",
                    self.model_name(),
                    choices.len()
                );
                text
            }
            Err(e) => {
                error!("Error while getting response from {}: {}", self.model_name(), e);
                None
            }
        }
    }
}

fn clamp_temperature(temperature: f32) -> f32 {
    if temperature.is_nan() {
        0.0
    } else {
        temperature.clamp(0.0, 1.0)
    }
}

static RE_BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());

/// Splits each choice on blank lines. A choice that holds one question passes
/// through unchanged; a choice that holds several yields one block each.
pub fn split_blocks<S: AsRef<str>>(choices: &[S]) -> Vec<String> {
    choices
        .iter()
        .flat_map(|choice| RE_BLANK_LINE.split(choice.as_ref().trim()))
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds the client for the configured provider.
pub fn connect(settings: &ModelSettings) -> Result<Arc<dyn ModelClient>, ConfigError> {
    let require_key = || {
        settings.api_key.clone().ok_or(ConfigError::MissingVar(
            settings.provider.api_key_vars().first().copied().unwrap_or("API key"),
        ))
    };
    let client: Arc<dyn ModelClient> = match settings.provider {
        Provider::OpenAi => Arc::new(
            ChatGptModel::new(
                require_key()?,
                &settings.model,
                settings.api_url.clone(),
                settings.timeout,
            )
            .map_err(|e| ConfigError::Client(e.to_string()))?,
        ),
        Provider::Groq => Arc::new(OpenAiCompatibleModel::new(
            require_key()?,
            &settings.model,
            settings.api_url.clone(),
            settings.timeout,
        )),
        Provider::Ollama => Arc::new(OllamaModel::new(
            &settings.model,
            settings.api_url.clone(),
            settings.timeout,
        )),
    };
    info!(
        "Using {:?} provider with model {} at {}",
        settings.provider, settings.model, settings.api_url
    );
    Ok(client)
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ModelError::Status {
        status: status.as_u16(),
        body,
    })
}

/// OpenAI through the `chatgpt_rs` client.
pub struct ChatGptModel {
    model: String,
    client: ChatGPT,
}

impl ChatGptModel {
    pub fn new(
        api_key: String,
        model: &str,
        api_url: Url,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let config = ModelConfigurationBuilder::default()
            .engine(ChatGPTEngine::Custom(Box::leak(model.to_string().into_boxed_str())))
            .api_url(api_url)
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Request(e.to_string()))?;
        Ok(Self {
            model: model.to_string(),
            client: ChatGPT::new_with_config(api_key, config)?,
        })
    }
}

#[async_trait]
impl ModelClient for ChatGptModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Vec<String>, ModelError> {
        // Clones share the connection pool.
        let mut client = self.client.clone();
        client.config.temperature = temperature;
        client.config.max_tokens = Some(max_tokens);

        let history: Vec<chatgpt::types::ChatMessage> = messages
            .iter()
            .map(|m| chatgpt::types::ChatMessage {
                role: match m.role {
                    Role::System => chatgpt::types::Role::System,
                    Role::User => chatgpt::types::Role::User,
                    Role::Assistant => chatgpt::types::Role::Assistant,
                },
                content: m.content.clone(),
            })
            .collect();

        debug!("Sending {} messages to {}", history.len(), self.model);
        let response: CompletionResponse = client.send_history(&history).await?;

        Ok(response
            .message_choices
            .into_iter()
            .map(|choice| choice.message.content)
            .collect())
    }
}

#[derive(serde::Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(serde::Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(serde::Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(serde::Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Any hosted endpoint speaking the OpenAI chat-completions format (Groq by
/// default).
pub struct OpenAiCompatibleModel {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    api_url: Url,
}

impl OpenAiCompatibleModel {
    pub fn new(api_key: String, model: &str, api_url: Url, timeout: Duration) -> Self {
        Self {
            http_client: http_client(timeout),
            api_key,
            model: model.to_string(),
            api_url,
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Vec<String>, ModelError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature,
        };
        debug!("Sending {} messages to {}", messages.len(), self.api_url);

        let response = self
            .http_client
            .post(self.api_url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response: ChatCompletionResponse = error_for_status(response).await?.json().await?;

        Ok(response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect())
    }
}

#[derive(serde::Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    options: OllamaOptions,
}

#[derive(serde::Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(serde::Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(serde::Deserialize)]
struct OllamaMessage {
    content: String,
}

/// Local inference through Ollama's `/api/chat`.
pub struct OllamaModel {
    http_client: reqwest::Client,
    model: String,
    api_url: Url,
}

impl OllamaModel {
    pub fn new(model: &str, api_url: Url, timeout: Duration) -> Self {
        Self {
            http_client: http_client(timeout),
            model: model.to_string(),
            api_url,
        }
    }
}

#[async_trait]
impl ModelClient for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Vec<String>, ModelError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                num_predict: max_tokens,
                temperature,
            },
        };
        debug!("Sending {} messages to {}", messages.len(), self.api_url);

        let response = self
            .http_client
            .post(self.api_url.clone())
            .json(&request)
            .send()
            .await?;
        let response: OllamaChatResponse = error_for_status(response).await?.json().await?;

        Ok(vec![response.message.content])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_one_blob_into_question_blocks() {
        let blob = "Question: One?\nA. 1\nB. 2\nC. 3\nD. 4\nCorrect Answer: A\n\n\n  \nQuestion: Two?\nA. 1\nB. 2\nC. 3\nD. 4\nCorrect Answer: B\n";
        let blocks = split_blocks(&[blob]);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("Question: One?"));
        assert!(blocks[1].ends_with("Correct Answer: B"));
    }

    #[test]
    fn passes_single_question_choices_through() {
        let choices = vec![
            "Question: One?".to_string(),
            "  ".to_string(),
            "Question: Two?".to_string(),
        ];
        assert_eq!(split_blocks(&choices), vec!["Question: One?", "Question: Two?"]);
    }

    #[test]
    fn serializes_roles_in_lowercase() {
        let json = serde_json::to_value(Message::system("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "hi"}));
    }

    #[tokio::test]
    async fn compatible_model_sends_budget_and_reads_choices() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "test-model",
                "max_tokens": 50,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": "first\n\nsecond"}},
                        {"message": {"role": "assistant", "content": "third"}}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/v1/chat/completions", server.url())).unwrap();
        let model = OpenAiCompatibleModel::new(
            "test-key".into(),
            "test-model",
            url,
            Duration::from_secs(5),
        );
        let blocks = model.get_response(&[Message::user("hello")], 50, 0.2).await;

        mock.assert_async().await;
        assert_eq!(blocks, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn text_reply_keeps_inner_layout() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": " \n"}},
                        {"message": {"role": "assistant", "content": "\nFirst:\n\n\n    indented\n"}}
                    ]
                })
                .to_string(),
            )
            .expect(2)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/v1/chat/completions", server.url())).unwrap();
        let model = OpenAiCompatibleModel::new("k".into(), "m", url, Duration::from_secs(5));
        let text = model.get_text(&[Message::user("explain")], 50, 0.7).await;
        assert_eq!(text.as_deref(), Some("First:\n\n\n    indented"));

        let blocks = model.get_response(&[Message::user("explain")], 50, 0.7).await;
        assert_eq!(blocks, vec!["First:", "indented"]);
    }

    #[tokio::test]
    async fn server_error_yields_empty_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/v1/chat/completions", server.url())).unwrap();
        let model = OpenAiCompatibleModel::new("k".into(), "m", url, Duration::from_secs(5));
        let err = model.complete(&[Message::user("hi")], 10, 0.5).await.unwrap_err();
        assert!(matches!(err, ModelError::Status { status: 500, .. }));

        assert!(model.get_response(&[Message::user("hi")], 10, 0.5).await.is_empty());
    }

    #[tokio::test]
    async fn ollama_reads_message_content() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "stream": false,
                "options": {"num_predict": 64}
            })))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "model": "llama3.1",
                    "message": {"role": "assistant", "content": "Question: A?\n\nQuestion: B?"},
                    "done": true
                })
                .to_string(),
            )
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/api/chat", server.url())).unwrap();
        let model = OllamaModel::new("llama3.1", url, Duration::from_secs(5));
        let blocks = model.get_response(&[Message::user("go")], 64, 0.1).await;
        assert_eq!(blocks, vec!["Question: A?", "Question: B?"]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty_response() {
        // Nothing listens on the discard port.
        let url = Url::parse("http://127.0.0.1:9/api/chat").unwrap();
        let model = OllamaModel::new("llama3.1", url, Duration::from_secs(2));
        assert!(model.get_response(&[Message::user("go")], 64, 0.1).await.is_empty());
    }

    #[tokio::test]
    async fn chatgpt_model_fails_soft_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"boom","type":"server_error"}}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/v1/chat/completions", server.url())).unwrap();
        let model = ChatGptModel::new("sk-test".into(), "gpt-4o-mini", url, Duration::from_secs(5))
            .unwrap();
        assert!(model.get_response(&[Message::user("hi")], 10, 0.5).await.is_empty());
    }
}
