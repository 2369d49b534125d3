pub mod cache;
pub mod helper;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod session;

use std::fmt;
use std::str::FromStr;

/// Letter of one of the four options of a multiple-choice question.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum OptionLetter {
    #[default]
    A,
    B,
    C,
    D,
}

impl OptionLetter {
    pub const ALL: [OptionLetter; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_char(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }
}

impl fmt::Display for OptionLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for OptionLetter {
    type Err = ();

    /// Accepts a single letter, in either case, with surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            _ => Err(()),
        }
    }
}

/// A multiple-choice question as recovered from model output.
///
/// `options` is either empty or holds exactly four entries, and
/// `correct_option` always points into it when it is not empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: OptionLetter,
}

impl Question {
    pub fn new(prompt: String, options: Vec<String>, correct_option: OptionLetter) -> Option<Self> {
        if !options.is_empty() && options.len() != OptionLetter::ALL.len() {
            return None;
        }
        Some(Self {
            prompt,
            options,
            correct_option,
        })
    }

    pub fn option(&self, letter: OptionLetter) -> Option<&str> {
        self.options.get(letter.index()).map(String::as_str)
    }

    pub fn correct_text(&self) -> Option<&str> {
        self.option(self.correct_option)
    }

    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    /// Permutes the options while keeping `correct_option` on the same text.
    pub fn shuffle_options<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) {
        use rand::seq::SliceRandom;

        if !self.has_options() {
            return;
        }
        let correct = self.options[self.correct_option.index()].clone();
        let mut order: Vec<usize> = (0..self.options.len()).collect();
        order.shuffle(rng);

        let shuffled: Vec<String> = order.iter().map(|&i| self.options[i].clone()).collect();
        let new_index = order
            .iter()
            .position(|&i| i == self.correct_option.index())
            .unwrap_or(self.correct_option.index());
        self.options = shuffled;
        self.correct_option = OptionLetter::from_index(new_index).unwrap_or_default();
        debug_assert_eq!(self.options[self.correct_option.index()], correct);
    }
}

/// A question rendered in another language. The canonical [`Question`] is
/// never overwritten by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Translation {
    pub language: String,
    pub prompt: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrueFalseQuestion {
    pub statement: String,
    pub answer: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EssayQuestion {
    pub prompt: String,
    pub expected_length: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            _ => Err(()),
        }
    }
}
