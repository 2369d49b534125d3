//! Per-user quiz state.
//!
//! A [`QuizSession`] is an ordinary value: the bot keeps it inside the chat's
//! dialogue state, hands it to each [`crate::quiz::helper::QuizHelper`]
//! operation and stores it back afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use log::info;

use crate::error::StoreError;
use crate::quiz::cache::write_atomically;
use crate::quiz::{OptionLetter, Question, Translation};

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    buckets: BTreeMap<String, Bucket>,
    answers: BTreeMap<String, OptionLetter>,
}

/// Questions generated under one specialization. `last_index` never goes
/// down, so ids stay unique even after the bucket is cleared.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bucket {
    pub last_index: u64,
    pub questions: Vec<StoredQuestion>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoredQuestion {
    pub id: String,
    pub specialization: String,
    pub question: Question,
    pub translations: BTreeMap<String, Translation>,
}

impl QuizSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `questions` to the bucket of `specialization` and returns the
    /// ids assigned to them, `{specialization}_{n}` with `n` counting from 1.
    pub fn add_questions(&mut self, specialization: &str, questions: Vec<Question>) -> Vec<String> {
        let bucket = self.buckets.entry(specialization.to_string()).or_default();
        let mut ids = Vec::with_capacity(questions.len());
        for question in questions {
            bucket.last_index += 1;
            let id = format!("{}_{}", specialization, bucket.last_index);
            bucket.questions.push(StoredQuestion {
                id: id.clone(),
                specialization: specialization.to_string(),
                question,
                translations: BTreeMap::new(),
            });
            ids.push(id);
        }
        ids
    }

    pub fn get(&self, id: &str) -> Option<&StoredQuestion> {
        self.questions().find(|q| q.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut StoredQuestion> {
        self.buckets
            .values_mut()
            .flat_map(|bucket| bucket.questions.iter_mut())
            .find(|q| q.id == id)
    }

    pub fn questions(&self) -> impl Iterator<Item = &StoredQuestion> {
        self.buckets.values().flat_map(|bucket| bucket.questions.iter())
    }

    pub fn bucket(&self, specialization: &str) -> Option<&Bucket> {
        self.buckets.get(specialization)
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.questions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `false` when no question has this id.
    pub fn attach_translation(&mut self, id: &str, translation: Translation) -> bool {
        match self.get_mut(id) {
            Some(stored) => {
                stored
                    .translations
                    .insert(translation.language.clone(), translation);
                true
            }
            None => false,
        }
    }

    pub fn translation(&self, id: &str, language: &str) -> Option<&Translation> {
        self.get(id)?.translations.get(language)
    }

    pub fn record_answer(&mut self, id: &str, letter: OptionLetter) {
        self.answers.insert(id.to_string(), letter);
    }

    pub fn answer(&self, id: &str) -> Option<OptionLetter> {
        self.answers.get(id).copied()
    }

    /// Records `letter` as the user's answer and compares it with the key.
    pub fn check_answer(&mut self, id: &str, letter: OptionLetter) -> Option<AnswerCheck> {
        let question = &self.get(id)?.question;
        let check = AnswerCheck {
            correct: question.correct_option == letter,
            correct_option: question.correct_option,
            correct_text: question.correct_text().unwrap_or_default().to_string(),
        };
        self.record_answer(id, letter);
        Some(check)
    }

    /// Drops the questions of one specialization (and their answers) while
    /// keeping its id counter.
    pub fn clear_bucket(&mut self, specialization: &str) {
        if let Some(bucket) = self.buckets.get_mut(specialization) {
            for question in bucket.questions.drain(..) {
                self.answers.remove(&question.id);
            }
        }
    }

    pub fn export(&self) -> BTreeMap<String, ExportBucket> {
        self.buckets
            .iter()
            .map(|(specialization, bucket)| {
                let questions = bucket
                    .questions
                    .iter()
                    .map(|stored| ExportRecord {
                        id: stored.id.clone(),
                        question: stored.question.prompt.clone(),
                        options: stored.question.options.clone(),
                        correct_answer: stored.question.correct_option,
                        translations: stored
                            .translations
                            .iter()
                            .map(|(language, t)| {
                                (
                                    language.clone(),
                                    ExportTranslation {
                                        question: t.prompt.clone(),
                                        options: t.options.clone(),
                                    },
                                )
                            })
                            .collect(),
                    })
                    .collect();
                (specialization.clone(), ExportBucket { questions })
            })
            .collect()
    }

    /// Writes the canonical (untranslated) questions as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<usize, StoreError> {
        let json = serde_json::to_string_pretty(&self.export())?;
        write_atomically(path, json.as_bytes())?;
        info!("Saved {} questions to {}", self.len(), path.display());
        Ok(self.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerCheck {
    pub correct: bool,
    pub correct_option: OptionLetter,
    pub correct_text: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExportBucket {
    pub questions: Vec<ExportRecord>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: OptionLetter,
    pub translations: BTreeMap<String, ExportTranslation>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExportTranslation {
    pub question: String,
    pub options: Vec<String>,
}
