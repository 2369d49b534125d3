//! Instruction templates sent to the model.
//!
//! Every function here is pure: the same inputs always give the same text.
//! The generation templates spell out the exact layout that
//! [`crate::quiz::parser`] expects back.

use crate::quiz::{Difficulty, OptionLetter};

pub const GENERATION_SYSTEM_PROMPT: &str =
    "You are an experienced examiner who writes clear, factual assessment questions.";

pub const EXPLANATION_SYSTEM_PROMPT: &str =
    "You are an expert tutor providing detailed explanations for multiple-choice questions.";

pub const TRANSLATION_SYSTEM_PROMPT: &str =
    "You are a professional translator. You reply with the translation only.";

const MCQ_LAYOUT: &str = "Question: [Question text]
A. [Option A]
B. [Option B]
C. [Option C]
D. [Option D]
Correct Answer: [A/B/C/D]";

pub fn generate_mcq(topic: &str, difficulty: Difficulty, count: usize) -> String {
    format!(
        "Generate {count} unambiguous, unbiased and verifiable multiple-choice questions about {topic} at a {difficulty} difficulty level in English.
Cover a wide range of subtopics of {topic}, both theoretical concepts and practical real-world applications, of the kind that appears in competitive examinations.
Every question must rest on facts that can be checked in textbooks or other reliable sources. Avoid speculative or opinion-based content.
Use clear language that leaves no room for misinterpretation, free from cultural, racial or gender bias.

Each question MUST be unique and have exactly 4 options (A, B, C, D) with only one correct answer.
Separate questions with one blank line and format each question exactly as follows:

{MCQ_LAYOUT}

Make every option plausible and do not add explanations."
    )
}

pub fn translate(source_text: &str, target_language: &str) -> String {
    format!(
        "Translate the following text to {target_language}. Preserve the meaning exactly and reply with the translation only, without any commentary:\n\n{source_text}"
    )
}

pub fn explain_answer(question: &str, options: &[String], correct_option: OptionLetter) -> String {
    if options.is_empty() {
        return format!(
            "Explain the following question and why the correct answer is {correct_option}, in English:

{question}

Provide a detailed explanation, including any background information or context relevant to the question."
        );
    }
    format!(
        "Explain the following multiple-choice question and why the correct answer is {correct_option}, in English:

{question}

{}

Provide a detailed explanation, including any background information or context relevant to the question, and say briefly why each other option is wrong.",
        render_options(options)
    )
}

pub fn fetch_prerequisite(question: &str, options: &[String]) -> String {
    if options.is_empty() {
        return format!(
            "Provide detailed background material that would help a student understand the following question.
Cover the fundamental concepts, definitions and background knowledge the question relies on.

Question: {question}

Keep it clear and beginner-friendly, aimed at a student who is not familiar with the topic."
        );
    }
    format!(
        "Provide detailed background material that would help a student understand the following question and its options.
Cover the fundamental concepts, definitions and background knowledge the question and its options rely on.

Question: {question}

{}

Keep it clear and beginner-friendly, aimed at a student who is not familiar with the topic. Do not reveal the correct answer.",
        render_options(options)
    )
}

pub fn generate_similar(original_question: &str, options: &[String]) -> String {
    let original = if options.is_empty() {
        format!("Original Question: {original_question}")
    } else {
        format!(
            "Original Question: {original_question}\n{}",
            render_options(options)
        )
    };
    format!(
        "Generate 1 unique, unambiguous and unbiased multiple-choice question based on the following question.
The new question must cover a similar topic but must not duplicate or paraphrase the original question.

{original}

The question MUST have exactly 4 options (A, B, C, D) with only one correct answer. Format the output strictly as follows:

{MCQ_LAYOUT}

The correct answer is a single letter (A, B, C or D) and no explanation is included."
    )
}

pub fn generate_true_false(topic: &str, difficulty: Difficulty, count: usize) -> String {
    format!(
        "Generate {count} unambiguous and verifiable True/False statements about {topic} at a {difficulty} difficulty level in English.
Mix true and false statements. Separate statements with one blank line and format each one exactly as follows:

Statement: [Statement text]
Correct Answer: [True/False]"
    )
}

pub fn generate_essay(topic: &str, difficulty: Difficulty, count: usize) -> String {
    format!(
        "Generate {count} open-ended essay questions about {topic} at a {difficulty} difficulty level in English.
Separate questions with one blank line and format each one exactly as follows:

Question: [Question text]
Expected Length: [for example 200-300 words]"
    )
}

/// Renders options as `A. text` lines.
pub fn render_options(options: &[String]) -> String {
    options
        .iter()
        .zip(OptionLetter::ALL)
        .map(|(text, letter)| format!("{letter}. {text}"))
        .collect::<Vec<_>>()
        .join("\n")
}
