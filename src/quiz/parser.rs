//! Extraction of question records from raw model text.
//!
//! Parsing is all-or-nothing: a block either yields a complete record or
//! `None`. Batch helpers drop the blocks that do not match and keep the rest
//! in order.

use std::sync::LazyLock;

use log::debug;
use regex::{Captures, Regex};

use crate::quiz::{EssayQuestion, OptionLetter, Question, TrueFalseQuestion};

static RE_MCQ: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)(?i:question)\s*:\s*(?P<question>.+?)\s+A\.\s*(?P<a>.+?)\s+B\.\s*(?P<b>.+?)\s+C\.\s*(?P<c>.+?)\s+D\.\s*(?P<d>.+?)\s+(?i:correct\s+answer)\s*:\s*\**\s*(?P<answer>[A-Da-d])\b",
    )
    .unwrap()
});

static RE_TRUE_FALSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)(?i:statement)\s*:\s*(?P<statement>.+?)\s+(?i:correct\s+answer)\s*:\s*\**\s*(?P<answer>(?i:true|false))\b",
    )
    .unwrap()
});

static RE_ESSAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)(?i:question)\s*:\s*(?P<question>.+?)(?:\s+(?i:expected\s+length)\s*:\s*(?P<length>.+?))?\s*$",
    )
    .unwrap()
});

// A label line inside a captured field means the model emitted more options
// than four, or ran two questions together.
static RE_STRAY_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:(?i:question|statement)\s*:|[A-Z][.)]\s)").unwrap()
});

/// Parses one block in the `Question:` / `A.`–`D.` / `Correct Answer:` layout.
pub fn parse_mcq(block: &str) -> Option<Question> {
    let caps = RE_MCQ.captures(block)?;

    let prompt = field(&caps, "question")?;
    if RE_STRAY_LABEL.is_match(&prompt) {
        return None;
    }
    let mut options = Vec::with_capacity(4);
    for name in ["a", "b", "c", "d"] {
        let option = field(&caps, name)?;
        if RE_STRAY_LABEL.is_match(&option) {
            return None;
        }
        options.push(option);
    }
    let correct_option = caps["answer"].parse::<OptionLetter>().ok()?;

    Question::new(prompt, options, correct_option)
}

/// Parses one block in the `Statement:` / `Correct Answer: True|False` layout.
pub fn parse_true_false(block: &str) -> Option<TrueFalseQuestion> {
    let caps = RE_TRUE_FALSE.captures(block)?;
    let statement = field(&caps, "statement")?;
    if RE_STRAY_LABEL.is_match(&statement) {
        return None;
    }
    let answer = caps["answer"].eq_ignore_ascii_case("true");

    Some(TrueFalseQuestion { statement, answer })
}

/// Parses one block in the `Question:` / optional `Expected Length:` layout.
pub fn parse_essay(block: &str) -> Option<EssayQuestion> {
    let caps = RE_ESSAY.captures(block)?;
    let prompt = field(&caps, "question")?;
    if RE_STRAY_LABEL.is_match(&prompt) {
        return None;
    }
    let expected_length = caps
        .name("length")
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    Some(EssayQuestion {
        prompt,
        expected_length,
    })
}

pub fn parse_mcq_batch<S: AsRef<str>>(blocks: &[S]) -> Vec<Question> {
    parse_batch(blocks, parse_mcq)
}

pub fn parse_true_false_batch<S: AsRef<str>>(blocks: &[S]) -> Vec<TrueFalseQuestion> {
    parse_batch(blocks, parse_true_false)
}

pub fn parse_essay_batch<S: AsRef<str>>(blocks: &[S]) -> Vec<EssayQuestion> {
    parse_batch(blocks, parse_essay)
}

fn parse_batch<S, T, F>(blocks: &[S], parse: F) -> Vec<T>
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<T>,
{
    blocks
        .iter()
        .filter_map(|block| {
            let block = block.as_ref();
            let parsed = parse(block);
            if parsed.is_none() {
                debug!("Dropping block that does not match the layout: {:?}", block);
            }
            parsed
        })
        .collect()
}

fn field(caps: &Captures, name: &str) -> Option<String> {
    let text = caps.name(name)?.as_str().trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "Question: What is 2 + 3?
A. 4
B. 5
C. 6
D. 7
Correct Answer: B";

    #[test]
    fn parses_a_well_formed_block() {
        let question = parse_mcq(WELL_FORMED).unwrap();
        assert_eq!(question.prompt, "What is 2 + 3?");
        assert_eq!(question.options, vec!["4", "5", "6", "7"]);
        assert_eq!(question.correct_option, OptionLetter::B);
        assert_eq!(question.correct_text(), Some("5"));
    }

    #[test]
    fn tolerates_whitespace_and_label_case() {
        let block = "\n\n  question :   Which planet is known as the Red Planet?\n\n   A.  Venus\n B.Mars\n\tC. Jupiter\n D. Saturn  \n correct answer:  c \n";
        let question = parse_mcq(block).unwrap();
        assert_eq!(question.prompt, "Which planet is known as the Red Planet?");
        assert_eq!(question.options, vec!["Venus", "Mars", "Jupiter", "Saturn"]);
        assert_eq!(question.correct_option, OptionLetter::C);
    }

    #[test]
    fn accepts_inline_layout_and_bold_answer() {
        let block = "Question: Largest ocean? A. Atlantic B. Pacific C. Indian D. Arctic Correct Answer: **B**";
        let question = parse_mcq(block).unwrap();
        assert_eq!(question.options[1], "Pacific");
        assert_eq!(question.correct_option, OptionLetter::B);
    }

    #[test]
    fn rejects_three_options() {
        let block = "Question: What is 2 + 3?\nA. 4\nB. 5\nC. 6\nCorrect Answer: B";
        assert!(parse_mcq(block).is_none());
    }

    #[test]
    fn rejects_five_options() {
        let block = "Question: What is 2 + 3?\nA. 4\nB. 5\nC. 6\nD. 7\nE. 8\nCorrect Answer: B";
        assert!(parse_mcq(block).is_none());
    }

    #[test]
    fn rejects_missing_or_invalid_answer() {
        let missing = "Question: What is 2 + 3?\nA. 4\nB. 5\nC. 6\nD. 7";
        assert!(parse_mcq(missing).is_none());

        let wrong_letter = "Question: What is 2 + 3?\nA. 4\nB. 5\nC. 6\nD. 7\nCorrect Answer: E";
        assert!(parse_mcq(wrong_letter).is_none());

        let word = "Question: What is 2 + 3?\nA. 4\nB. 5\nC. 6\nD. 7\nCorrect Answer: Because";
        assert!(parse_mcq(word).is_none());
    }

    #[test]
    fn rejects_wrong_question_label() {
        let block = WELL_FORMED.replace("Question:", "Query:");
        assert!(parse_mcq(&block).is_none());
    }

    #[test]
    fn does_not_merge_two_questions() {
        let block = "Question: First?\nA. 1\nB. 2\nC. 3\nD. 4\nQuestion: Second?\nA. 5\nB. 6\nC. 7\nD. 8\nCorrect Answer: A";
        assert!(parse_mcq(block).is_none());
    }

    #[test]
    fn rejects_two_question_lines_before_the_options() {
        let block = "Question: First?\nQuestion: Second?\nA. 1\nB. 2\nC. 3\nD. 4\nCorrect Answer: A";
        assert!(parse_mcq(block).is_none());

        let essays = "Question: Describe photosynthesis.\nQuestion: Describe respiration.";
        assert!(parse_essay(essays).is_none());
    }

    #[test]
    fn batch_keeps_only_matching_blocks_in_order() {
        let blocks = vec![
            WELL_FORMED.to_string(),
            "Here are your questions:".to_string(),
            WELL_FORMED.replace("2 + 3", "3 + 3").replace("Correct Answer: B", "Correct Answer: C"),
        ];
        let questions = parse_mcq_batch(&blocks);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].prompt, "What is 2 + 3?");
        assert_eq!(questions[1].correct_option, OptionLetter::C);
    }

    #[test]
    fn parses_true_false() {
        let parsed =
            parse_true_false("Statement: Water boils at 100 °C at sea level.\nCorrect Answer: True")
                .unwrap();
        assert_eq!(parsed.statement, "Water boils at 100 °C at sea level.");
        assert!(parsed.answer);

        let parsed =
            parse_true_false("statement: The sun orbits the earth.\ncorrect answer: FALSE").unwrap();
        assert!(!parsed.answer);

        assert!(parse_true_false("Statement: Missing the key").is_none());
        assert!(parse_true_false("Statement: Odd\nCorrect Answer: Maybe").is_none());
    }

    #[test]
    fn parses_essay_with_and_without_length() {
        let parsed = parse_essay(
            "Question: Discuss the causes of World War I.\nExpected Length: 300-400 words",
        )
        .unwrap();
        assert_eq!(parsed.prompt, "Discuss the causes of World War I.");
        assert_eq!(parsed.expected_length.as_deref(), Some("300-400 words"));

        let parsed = parse_essay("Question: Describe photosynthesis.\n").unwrap();
        assert_eq!(parsed.prompt, "Describe photosynthesis.");
        assert_eq!(parsed.expected_length, None);

        assert!(parse_essay("Describe photosynthesis.").is_none());
    }
}
