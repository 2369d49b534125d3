use thiserror::Error;

/// Startup configuration problems. Any of these stops the bot before the
/// first model call is made.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingVar(&'static str),
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("unknown model provider {0:?} (expected openai, groq or ollama)")]
    UnknownProvider(String),
    #[error("could not build the model client: {0}")]
    Client(String),
}

/// Failures talking to a model provider. These never leave
/// [`crate::quiz::model::ModelClient::get_response`]; they are logged there.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("ChatGPT error: {0}")]
    ChatGpt(#[from] chatgpt::err::Error),
    #[error("invalid request: {0}")]
    Request(String),
}

/// Errors of the file-backed cache and of the question export.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
