//! Runtime configuration, read from the environment (and `.env` through
//! `dotenv` in `main`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::quiz::cache::{CacheStore, DEFAULT_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Groq,
    Ollama,
}

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Groq => "llama-3.1-8b-instant",
            Provider::Ollama => "llama3.1",
        }
    }

    pub fn default_api_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1/chat/completions",
            Provider::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Provider::Ollama => "http://127.0.0.1:11434/api/chat",
        }
    }

    /// Environment variables that may hold the API key, in lookup order.
    /// Local inference needs none.
    pub fn api_key_vars(self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => &["OPENAI_API_KEY", "CHATGPT_API_KEY"],
            Provider::Groq => &["GROQ_API_KEY"],
            Provider::Ollama => &[],
        }
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "chatgpt" => Ok(Provider::OpenAi),
            "groq" => Ok(Provider::Groq),
            "ollama" => Ok(Provider::Ollama),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Url,
    pub timeout: Duration,
}

/// Token budgets and sampling temperatures of the quiz operations.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizSettings {
    pub max_tokens_question: u32,
    pub max_tokens_explanation: u32,
    pub temperature_question: f32,
    pub temperature_explanation: f32,
    pub shuffle_options: bool,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            max_tokens_question: 3000,
            max_tokens_explanation: 1500,
            temperature_question: 0.1,
            temperature_explanation: 0.7,
            shuffle_options: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelSettings,
    pub quiz: QuizSettings,
    pub cache_store: CacheStore,
    pub cache_capacity: usize,
    pub output_path: PathBuf,
    pub dialogue_db: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Blank
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = match var("MCQ_PROVIDER") {
            Some(name) => name.parse::<Provider>()?,
            None => Provider::OpenAi,
        };

        let api_key = match provider.api_key_vars() {
            [] => None,
            names => Some(
                names
                    .iter()
                    .find_map(|name| var(*name))
                    .ok_or(ConfigError::MissingVar(names[0]))?,
            ),
        };

        let api_url_text =
            var("MCQ_API_URL").unwrap_or_else(|| provider.default_api_url().to_string());
        let api_url = Url::parse(&api_url_text).map_err(|e| ConfigError::Invalid {
            var: "MCQ_API_URL",
            value: api_url_text.clone(),
            reason: e.to_string(),
        })?;

        let timeout = Duration::from_secs(parse_var(&var, "MCQ_TIMEOUT_SECS", 60u64)?);
        let model = ModelSettings {
            provider,
            model: var("MCQ_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            api_key,
            api_url,
            timeout,
        };

        let defaults = QuizSettings::default();
        let max_tokens_question =
            parse_var(&var, "MCQ_MAX_TOKENS_QUESTION", defaults.max_tokens_question)?;
        let max_tokens_explanation =
            parse_var(&var, "MCQ_MAX_TOKENS_EXPLANATION", defaults.max_tokens_explanation)?;
        let temperature_question =
            parse_var(&var, "MCQ_TEMPERATURE_QUESTION", defaults.temperature_question)?;
        let temperature_explanation =
            parse_var(&var, "MCQ_TEMPERATURE_EXPLANATION", defaults.temperature_explanation)?;
        let quiz = QuizSettings {
            max_tokens_question: positive(max_tokens_question, "MCQ_MAX_TOKENS_QUESTION")?,
            max_tokens_explanation: positive(max_tokens_explanation, "MCQ_MAX_TOKENS_EXPLANATION")?,
            temperature_question: unit_interval(temperature_question, "MCQ_TEMPERATURE_QUESTION")?,
            temperature_explanation: unit_interval(
                temperature_explanation,
                "MCQ_TEMPERATURE_EXPLANATION",
            )?,
            shuffle_options: parse_var(&var, "MCQ_SHUFFLE_OPTIONS", defaults.shuffle_options)?,
        };

        // An explicitly empty MCQ_CACHE_PATH keeps the cache in memory.
        let cache_store = match lookup("MCQ_CACHE_PATH") {
            Some(path) if path.trim().is_empty() => CacheStore::Memory,
            Some(path) => CacheStore::File(PathBuf::from(path.trim())),
            None => CacheStore::File(PathBuf::from("cache.json")),
        };

        Ok(Self {
            model,
            quiz,
            cache_store,
            cache_capacity: parse_var(&var, "MCQ_CACHE_CAPACITY", DEFAULT_CAPACITY)?,
            output_path: var("MCQ_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("questions.json")),
            dialogue_db: var("MCQ_DIALOGUE_DB").unwrap_or_else(|| "db.sqlite".to_string()),
        })
    }
}

fn parse_var<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
            var: name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn positive(value: u32, name: &'static str) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var: name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn unit_interval(value: f32, name: &'static str) -> Result<f32, ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid {
            var: name,
            value: value.to_string(),
            reason: "must be between 0 and 1".to_string(),
        });
    }
    Ok(value)
}
