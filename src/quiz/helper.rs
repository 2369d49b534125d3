use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::QuizSettings;
use crate::quiz::cache::{CacheKey, ResultCache};
use crate::quiz::model::{Message, ModelClient};
use crate::quiz::session::QuizSession;
use crate::quiz::{parser, prompt};
use crate::quiz::{
    Difficulty, EssayQuestion, OptionLetter, Question, Translation, TrueFalseQuestion,
};

/// Runs the model-backed quiz operations: generation, explanations,
/// prerequisite material, translations and similar questions.
///
/// One helper is shared by every chat. Results that are worth keeping go
/// through the [`ResultCache`]; failed model calls are never cached.
pub struct QuizHelper {
    model: Arc<dyn ModelClient>,
    cache: Arc<ResultCache>,
    settings: QuizSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub specialization: String,
    pub difficulty: Difficulty,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    pub requested: usize,
    pub ids: Vec<String>,
}

impl GenerationReport {
    pub fn generated(&self) -> usize {
        self.ids.len()
    }

    pub fn is_partial(&self) -> bool {
        !self.ids.is_empty() && self.ids.len() < self.requested
    }

    pub fn failed(&self) -> bool {
        self.ids.is_empty()
    }
}

impl QuizHelper {
    pub fn new(
        model: Arc<dyn ModelClient>,
        cache: Arc<ResultCache>,
        settings: QuizSettings,
    ) -> Self {
        Self {
            model,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &QuizSettings {
        &self.settings
    }

    /// Asks the model for `request.count` questions and stores the ones that
    /// parse in the specialization's bucket, replacing the bucket's previous
    /// questions. Blocks that do not follow the layout are dropped; a
    /// shortfall is reported, not treated as an error. When nothing parses the
    /// old questions stay.
    pub async fn generate_questions(
        &self,
        session: &mut QuizSession,
        request: &GenerationRequest,
    ) -> GenerationReport {
        let mut report = GenerationReport {
            requested: request.count,
            ids: Vec::new(),
        };
        if request.count == 0 {
            return report;
        }

        let prompt =
            prompt::generate_mcq(&request.specialization, request.difficulty, request.count);
        debug!("Generating questions with prompt: {}", prompt);

        let blocks = self.generation_blocks(prompt).await;
        let mut questions = parser::parse_mcq_batch(&blocks);
        questions.truncate(request.count);
        if self.settings.shuffle_options {
            let mut rng = rand::thread_rng();
            for question in questions.iter_mut() {
                question.shuffle_options(&mut rng);
            }
        }

        // A successful regeneration replaces the previous set for this topic.
        if !questions.is_empty() {
            session.clear_bucket(&request.specialization);
        }
        report.ids = session.add_questions(&request.specialization, questions);
        if report.failed() {
            error!(
                "No usable questions about {} out of {} blocks",
                request.specialization,
                blocks.len()
            );
        } else if report.is_partial() {
            warn!(
                "Generated only {} of {} questions about {}",
                report.generated(),
                report.requested,
                request.specialization
            );
        } else {
            info!(
                "Generated {} questions about {}",
                report.generated(),
                request.specialization
            );
        }
        report
    }

    pub async fn explain_answer(&self, id: &str, question: &Question) -> Option<String> {
        let key = CacheKey::explanation(id, question);
        let prompt =
            prompt::explain_answer(&question.prompt, &question.options, question.correct_option);
        self.cached_reply(&key, prompt::EXPLANATION_SYSTEM_PROMPT, prompt)
            .await
    }

    pub async fn fetch_prerequisite(&self, id: &str, question: &Question) -> Option<String> {
        let key = CacheKey::prerequisite(id, question);
        let prompt = prompt::fetch_prerequisite(&question.prompt, &question.options);
        self.cached_reply(&key, prompt::EXPLANATION_SYSTEM_PROMPT, prompt)
            .await
    }

    /// Translates one piece of a question. English is the canonical language
    /// and comes back unchanged.
    pub async fn translate_text(
        &self,
        id: &str,
        field: &str,
        text: &str,
        language: &str,
    ) -> Option<String> {
        if is_canonical_language(language) {
            return Some(text.to_string());
        }
        let key = CacheKey::translation(id, field, language, text);
        let prompt = prompt::translate(text, language);
        self.cached_reply(&key, prompt::TRANSLATION_SYSTEM_PROMPT, prompt)
            .await
    }

    /// Returns the question in `language`, translating and attaching it to the
    /// session on first use. Nothing is attached unless the prompt and all
    /// options were translated.
    pub async fn translate_question(
        &self,
        session: &mut QuizSession,
        id: &str,
        language: &str,
    ) -> Option<Translation> {
        if let Some(existing) = session.translation(id, language) {
            return Some(existing.clone());
        }
        let question = session.get(id)?.question.clone();

        let prompt = self
            .translate_text(id, "prompt", &question.prompt, language)
            .await?;
        let mut options = Vec::with_capacity(question.options.len());
        for (text, letter) in question.options.iter().zip(OptionLetter::ALL) {
            let field = format!("option_{letter}");
            options.push(self.translate_text(id, &field, text, language).await?);
        }

        let translation = Translation {
            language: language.to_string(),
            prompt,
            options,
        };
        session.attach_translation(id, translation.clone());
        Some(translation)
    }

    /// Generates one new question next to `id` and stores it in the same
    /// bucket. Returns the id of the new question.
    pub async fn generate_similar(&self, session: &mut QuizSession, id: &str) -> Option<String> {
        let stored = session.get(id)?.clone();
        let prompt = prompt::generate_similar(&stored.question.prompt, &stored.question.options);
        debug!("Generating a question similar to {}", id);

        let blocks = self.generation_blocks(prompt).await;
        let Some(mut question) = parser::parse_mcq_batch(&blocks).into_iter().next() else {
            warn!("Model reply for a question similar to {} did not parse", id);
            return None;
        };
        if self.settings.shuffle_options {
            question.shuffle_options(&mut rand::thread_rng());
        }
        session
            .add_questions(&stored.specialization, vec![question])
            .into_iter()
            .next()
    }

    pub async fn generate_true_false(
        &self,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Vec<TrueFalseQuestion> {
        let prompt = prompt::generate_true_false(topic, difficulty, count);
        let blocks = self.generation_blocks(prompt).await;
        let mut questions = parser::parse_true_false_batch(&blocks);
        questions.truncate(count);
        info!(
            "Generated {} of {} true/false statements about {}",
            questions.len(),
            count,
            topic
        );
        questions
    }

    pub async fn generate_essay(
        &self,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Vec<EssayQuestion> {
        let prompt = prompt::generate_essay(topic, difficulty, count);
        let blocks = self.generation_blocks(prompt).await;
        let mut questions = parser::parse_essay_batch(&blocks);
        questions.truncate(count);
        info!("Generated {} of {} essay questions about {}", questions.len(), count, topic);
        questions
    }

    async fn generation_blocks(&self, prompt: String) -> Vec<String> {
        self.model
            .get_response(
                &[
                    Message::system(prompt::GENERATION_SYSTEM_PROMPT),
                    Message::user(prompt),
                ],
                self.settings.max_tokens_question,
                self.settings.temperature_question,
            )
            .await
    }

    async fn cached_reply(&self, key: &CacheKey, system: &str, prompt: String) -> Option<String> {
        if let Some(hit) = self.cache.get(key) {
            return Some(hit);
        }

        let reply = self
            .model
            .get_text(
                &[Message::system(system), Message::user(prompt)],
                self.settings.max_tokens_explanation,
                self.settings.temperature_explanation,
            )
            .await?;
        self.cache.put(key, reply.clone()).await;
        Some(reply)
    }
}

fn is_canonical_language(language: &str) -> bool {
    language.trim().eq_ignore_ascii_case("english")
}
