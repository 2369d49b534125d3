#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mcq_tgbot::config::QuizSettings;
use mcq_tgbot::error::ModelError;
use mcq_tgbot::quiz::cache::ResultCache;
use mcq_tgbot::quiz::helper::QuizHelper;
use mcq_tgbot::quiz::model::{Message, ModelClient};

/// Model stand-in that replays queued replies and counts round trips.
/// Once the script runs out every call fails.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Vec<String>, ModelError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply<S: AsRef<str>>(self, choices: &[S]) -> Self {
        self.push(Ok(choices.iter().map(|c| c.as_ref().to_string()).collect()));
        self
    }

    pub fn fail(self, error: ModelError) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, reply: Result<Vec<String>, ModelError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Vec<Message>> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<Vec<String>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Request("script exhausted".into())))
    }
}

pub fn helper(model: Arc<ScriptedModel>) -> QuizHelper {
    QuizHelper::new(model, Arc::new(ResultCache::in_memory(64)), QuizSettings::default())
}

pub fn mcq_block(prompt: &str, correct: char) -> String {
    format!(
        "Question: {prompt}\nA. first\nB. second\nC. third\nD. fourth\nCorrect Answer: {correct}"
    )
}
