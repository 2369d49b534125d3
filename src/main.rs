use std::sync::Arc;

use dotenv::dotenv;
use log::{debug, warn};
use mcq_tgbot::config::Config;
use mcq_tgbot::quiz::cache::ResultCache;
use mcq_tgbot::quiz::helper::{GenerationRequest, QuizHelper};
use mcq_tgbot::quiz::session::QuizSession;
use mcq_tgbot::quiz::{self, Difficulty, EssayQuestion, OptionLetter, TrueFalseQuestion};
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, KeyboardButton, KeyboardMarkup, KeyboardRemove},
};

type QuizDialogue = Dialogue<State, ErasedStorage<State>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    Start,
    ReceiveTopic {
        session: QuizSession,
    },
    ReceiveQuestionKind {
        session: QuizSession,
        setup: QuizSetup,
    },
    ReceiveDifficulty {
        session: QuizSession,
        setup: QuizSetup,
    },
    ReceiveAmountOfQuestions {
        session: QuizSession,
        setup: QuizSetup,
    },
    ReceiveLanguage {
        session: QuizSession,
        setup: QuizSetup,
    },
    Quiz {
        session: QuizSession,
        progress: QuizProgress,
    },
    ReceiveMenuChoice {
        session: QuizSession,
    },
}

/// Answers collected while the user sets up a new quiz.
#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QuizSetup {
    topic: String,
    kind: QuestionKind,
    difficulty: Difficulty,
    amount: usize,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QuestionKind {
    #[default]
    MultipleChoice,
    TrueFalse,
    Essay,
}

impl QuestionKind {
    const ALL: [QuestionKind; 3] = [Self::MultipleChoice, Self::TrueFalse, Self::Essay];

    fn label(self) -> &'static str {
        match self {
            Self::MultipleChoice => "Multiple choice",
            Self::TrueFalse => "True/False",
            Self::Essay => "Essay",
        }
    }

    fn from_label(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(text.trim()))
    }
}

#[derive(Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QuizProgress {
    ids: Vec<String>,
    position: usize,
    language: String,
    score: usize,
    answered: usize,
    current_answered: bool,
}

impl QuizProgress {
    fn current_id(&self) -> Option<&str> {
        self.ids.get(self.position).map(String::as_str)
    }
}

type UserInfoStorage = std::sync::Arc<ErasedStorage<State>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // The .env file is optional; real environment variables work as well.
    let _ = dotenv();

    pretty_env_logger::init();
    log::info!("Starting MCQ quiz bot...");

    let config = Config::from_env().inspect_err(|e| log::error!("Configuration error: {}", e))?;
    let model = quiz::model::connect(&config.model)
        .inspect_err(|e| log::error!("Configuration error: {}", e))?;

    let cache = match ResultCache::open(config.cache_store.clone(), config.cache_capacity) {
        Ok(cache) => cache,
        Err(e) => {
            warn!(
                "Cache store {:?} is unreadable ({}), starting with an empty in-memory cache",
                config.cache_store, e
            );
            ResultCache::in_memory(config.cache_capacity)
        }
    };
    let quiz_helper = Arc::new(QuizHelper::new(model, Arc::new(cache), config.quiz.clone()));

    let bot = Bot::from_env();

    log::info!("Opening dialogue storage at {}", config.dialogue_db);
    let storage: UserInfoStorage = SqliteStorage::open(&config.dialogue_db, Json).await?.erase();
    let config = Arc::new(config);

    Dispatcher::builder(
        bot,
        Update::filter_message()
            .enter_dialogue::<Message, ErasedStorage<State>, State>()
            .branch(dptree::case![State::Start].endpoint(start))
            .branch(dptree::case![State::ReceiveTopic { session }].endpoint(receive_topic))
            .branch(
                dptree::case![State::ReceiveQuestionKind { session, setup }]
                    .endpoint(receive_question_kind),
            )
            .branch(
                dptree::case![State::ReceiveDifficulty { session, setup }]
                    .endpoint(receive_difficulty),
            )
            .branch(
                dptree::case![State::ReceiveAmountOfQuestions { session, setup }]
                    .endpoint(receive_amount_of_questions),
            )
            .branch(
                dptree::case![State::ReceiveLanguage { session, setup }].endpoint(receive_language),
            )
            .branch(dptree::case![State::Quiz { session, progress }].endpoint(run_quiz))
            .branch(
                dptree::case![State::ReceiveMenuChoice { session }].endpoint(receive_menu_choice),
            ),
    )
    .dependencies(dptree::deps![storage, quiz_helper, config])
    .enable_ctrlc_handler()
    .build()
    .dispatch()
    .await;

    Ok(())
}

const GREETING_TEXT: &str = "Hi! I am a quiz bot. Tell me a topic and I will write multiple-choice questions about it, check your answers and explain them.";
const ASK_TOPIC_TEXT: &str = "What topic should the questions be about?";
const GENERATION_FAILED_TEXT: &str = "Sorry, I could not generate anything this time. Please try again.";

const NEW_QUIZ: &str = "New quiz";
const SAVE_QUESTIONS: &str = "Save questions";
const EXPLAIN: &str = "Explain answer";
const PREREQUISITE: &str = "Prerequisite material";
const SIMILAR: &str = "Similar question";
const NEXT: &str = "Next question";
const FINISH: &str = "Finish quiz";

const LANGUAGES: [&str; 2] = ["English", "Hindi"];
const MAX_QUESTIONS: usize = 100;

// Telegram rejects messages longer than 4096 characters.
const MESSAGE_LIMIT: usize = 4000;

async fn start(bot: Bot, dialogue: QuizDialogue, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, GREETING_TEXT).await?;
    bot.send_message(msg.chat.id, ASK_TOPIC_TEXT)
        .reply_markup(KeyboardRemove::new())
        .await?;

    dialogue
        .update(State::ReceiveTopic {
            session: QuizSession::new(),
        })
        .await?;
    Ok(())
}

async fn receive_topic(
    bot: Bot,
    dialogue: QuizDialogue,
    session: QuizSession,
    msg: Message,
) -> HandlerResult {
    let topic = match msg.text().map(str::trim) {
        Some(topic) if !topic.is_empty() => topic.to_string(),
        _ => {
            bot.send_message(msg.chat.id, "Please send the topic as text").await?;
            return Ok(());
        }
    };

    let keyboard = KeyboardMarkup::new(vec![QuestionKind::ALL
        .iter()
        .map(|kind| KeyboardButton::new(kind.label()))
        .collect::<Vec<_>>()]);
    bot.send_message(msg.chat.id, format!("{}. What kind of questions?", topic))
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveQuestionKind {
            session,
            setup: QuizSetup {
                topic,
                ..QuizSetup::default()
            },
        })
        .await?;
    Ok(())
}

async fn receive_question_kind(
    bot: Bot,
    dialogue: QuizDialogue,
    (session, setup): (QuizSession, QuizSetup),
    msg: Message,
) -> HandlerResult {
    let Some(kind) = msg.text().and_then(QuestionKind::from_label) else {
        bot.send_message(msg.chat.id, "Please choose one of the options").await?;
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(vec![Difficulty::ALL
        .iter()
        .map(|d| KeyboardButton::new(d.as_str()))
        .collect::<Vec<_>>()]);
    bot.send_message(msg.chat.id, "Choose the difficulty level")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveDifficulty {
            session,
            setup: QuizSetup { kind, ..setup },
        })
        .await?;
    Ok(())
}

async fn receive_difficulty(
    bot: Bot,
    dialogue: QuizDialogue,
    (session, setup): (QuizSession, QuizSetup),
    msg: Message,
) -> HandlerResult {
    let Some(difficulty) = msg.text().and_then(|t| t.parse::<Difficulty>().ok()) else {
        bot.send_message(msg.chat.id, "Please choose one of the options").await?;
        return Ok(());
    };

    let keyboard = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new("5")],
        vec![KeyboardButton::new("10")],
        vec![KeyboardButton::new("15")],
    ]);
    bot.send_message(msg.chat.id, "How many questions?")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveAmountOfQuestions {
            session,
            setup: QuizSetup { difficulty, ..setup },
        })
        .await?;
    Ok(())
}

async fn receive_amount_of_questions(
    helper: Arc<QuizHelper>,
    bot: Bot,
    dialogue: QuizDialogue,
    (session, setup): (QuizSession, QuizSetup),
    msg: Message,
) -> HandlerResult {
    let amount = match msg.text().map(|t| t.trim().parse::<usize>()) {
        Some(Ok(amount)) if (1..=MAX_QUESTIONS).contains(&amount) => amount,
        Some(Ok(_)) => {
            bot.send_message(
                msg.chat.id,
                format!("The number of questions must be between 1 and {}", MAX_QUESTIONS),
            )
            .await?;
            return Ok(());
        }
        _ => {
            bot.send_message(msg.chat.id, "Please send a number").await?;
            return Ok(());
        }
    };

    let listing = match setup.kind {
        QuestionKind::MultipleChoice => None,
        QuestionKind::TrueFalse => {
            announce_generation(&bot, msg.chat.id).await?;
            let statements = helper
                .generate_true_false(&setup.topic, setup.difficulty, amount)
                .await;
            Some(render_true_false(&statements))
        }
        QuestionKind::Essay => {
            announce_generation(&bot, msg.chat.id).await?;
            let essays = helper
                .generate_essay(&setup.topic, setup.difficulty, amount)
                .await;
            Some(render_essays(&essays))
        }
    };
    if let Some(listing) = listing {
        if listing.is_empty() {
            bot.send_message(msg.chat.id, GENERATION_FAILED_TEXT)
                .reply_markup(menu_keyboard())
                .await?;
        } else {
            send_long(&bot, msg.chat.id, &listing, menu_keyboard()).await?;
        }
        dialogue.update(State::ReceiveMenuChoice { session }).await?;
        return Ok(());
    }

    let keyboard = KeyboardMarkup::new(vec![LANGUAGES
        .iter()
        .map(|language| KeyboardButton::new(*language))
        .collect::<Vec<_>>()]);
    bot.send_message(msg.chat.id, "Which language should I show the questions in?")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(State::ReceiveLanguage {
            session,
            setup: QuizSetup { amount, ..setup },
        })
        .await?;
    Ok(())
}

async fn receive_language(
    helper: Arc<QuizHelper>,
    bot: Bot,
    dialogue: QuizDialogue,
    (mut session, setup): (QuizSession, QuizSetup),
    msg: Message,
) -> HandlerResult {
    let language = match msg.text().map(str::trim) {
        Some(language) if !language.is_empty() => language.to_string(),
        _ => {
            bot.send_message(msg.chat.id, "Please choose a language").await?;
            return Ok(());
        }
    };

    announce_generation(&bot, msg.chat.id).await?;

    let request = GenerationRequest {
        specialization: setup.topic.clone(),
        difficulty: setup.difficulty,
        count: setup.amount,
    };
    let report = helper.generate_questions(&mut session, &request).await;

    if report.failed() {
        bot.send_message(msg.chat.id, GENERATION_FAILED_TEXT).await?;
        bot.send_message(msg.chat.id, ASK_TOPIC_TEXT).await?;
        dialogue.update(State::ReceiveTopic { session }).await?;
        return Ok(());
    }
    if report.is_partial() {
        bot.send_message(
            msg.chat.id,
            format!(
                "I could only prepare {} of the {} questions you asked for.",
                report.generated(),
                report.requested
            ),
        )
        .await?;
    }

    let progress = QuizProgress {
        ids: report.ids,
        language,
        ..QuizProgress::default()
    };
    show_question(&helper, &bot, msg.chat.id, &mut session, &progress).await?;

    dialogue.update(State::Quiz { session, progress }).await?;
    Ok(())
}

async fn run_quiz(
    helper: Arc<QuizHelper>,
    config: Arc<Config>,
    bot: Bot,
    dialogue: QuizDialogue,
    (mut session, mut progress): (QuizSession, QuizProgress),
    msg: Message,
) -> HandlerResult {
    let chat_id = msg.chat.id;
    let Some(id) = progress.current_id().map(str::to_string) else {
        return finish_quiz(&bot, &dialogue, session, &progress, chat_id).await;
    };
    let Some(stored) = session.get(&id).cloned() else {
        warn!("Question {} vanished from the session", id);
        return finish_quiz(&bot, &dialogue, session, &progress, chat_id).await;
    };

    match msg.text().unwrap_or_default() {
        EXPLAIN => {
            let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
            let reply = helper
                .explain_answer(&id, &stored.question)
                .await
                .unwrap_or_else(|| GENERATION_FAILED_TEXT.to_string());
            send_long(&bot, chat_id, &reply, action_keyboard()).await?;
        }
        PREREQUISITE => {
            let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
            let reply = helper
                .fetch_prerequisite(&id, &stored.question)
                .await
                .unwrap_or_else(|| GENERATION_FAILED_TEXT.to_string());
            send_long(&bot, chat_id, &reply, action_keyboard()).await?;
        }
        SIMILAR => {
            let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
            match helper.generate_similar(&mut session, &id).await {
                Some(new_id) => {
                    bot.send_message(
                        chat_id,
                        format!("Added a similar question ({}) to the end of this quiz.", new_id),
                    )
                    .await?;
                    progress.ids.push(new_id);
                }
                None => {
                    bot.send_message(chat_id, GENERATION_FAILED_TEXT).await?;
                }
            }
        }
        NEXT => {
            progress.position += 1;
            progress.current_answered = false;
            if progress.current_id().is_none() {
                return finish_quiz(&bot, &dialogue, session, &progress, chat_id).await;
            }
            show_question(&helper, &bot, chat_id, &mut session, &progress).await?;
        }
        FINISH => {
            return finish_quiz(&bot, &dialogue, session, &progress, chat_id).await;
        }
        SAVE_QUESTIONS => {
            save_questions(&bot, chat_id, &session, &config).await?;
        }
        answer => match answer.parse::<OptionLetter>() {
            Ok(_) if progress.current_answered => {
                bot.send_message(chat_id, "You have already answered this question")
                    .reply_markup(action_keyboard())
                    .await?;
            }
            Ok(letter) => {
                if let Some(check) = session.check_answer(&id, letter) {
                    progress.answered += 1;
                    progress.current_answered = true;
                    let reply = if check.correct {
                        progress.score += 1;
                        "Correct!".to_string()
                    } else {
                        format!(
                            "Incorrect. The correct answer is {}: {}",
                            check.correct_option, check.correct_text
                        )
                    };
                    bot.send_message(chat_id, reply)
                        .reply_markup(action_keyboard())
                        .await?;
                }
            }
            Err(_) => {
                bot.send_message(chat_id, "Please choose one of the options")
                    .reply_markup(question_keyboard())
                    .await?;
            }
        },
    }

    dialogue.update(State::Quiz { session, progress }).await?;
    Ok(())
}

async fn receive_menu_choice(
    config: Arc<Config>,
    bot: Bot,
    dialogue: QuizDialogue,
    session: QuizSession,
    msg: Message,
) -> HandlerResult {
    match msg.text() {
        Some(NEW_QUIZ) => {
            bot.send_message(msg.chat.id, ASK_TOPIC_TEXT)
                .reply_markup(KeyboardRemove::new())
                .await?;
            dialogue.update(State::ReceiveTopic { session }).await?;
        }
        Some(SAVE_QUESTIONS) => {
            save_questions(&bot, msg.chat.id, &session, &config).await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "Please choose one of the options")
                .reply_markup(menu_keyboard())
                .await?;
        }
    }
    Ok(())
}

async fn show_question(
    helper: &QuizHelper,
    bot: &Bot,
    chat_id: ChatId,
    session: &mut QuizSession,
    progress: &QuizProgress,
) -> HandlerResult {
    let Some(id) = progress.current_id() else {
        return Ok(());
    };
    let Some(stored) = session.get(id).cloned() else {
        return Ok(());
    };

    let (prompt, options) = if LANGUAGES[0].eq_ignore_ascii_case(&progress.language) {
        (stored.question.prompt, stored.question.options)
    } else {
        let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
        match helper.translate_question(session, id, &progress.language).await {
            Some(translation) => (translation.prompt, translation.options),
            None => {
                debug!("Showing {} untranslated", id);
                (stored.question.prompt, stored.question.options)
            }
        }
    };

    let text = format!(
        "Question {} of {} (ID: {})\n\n{}\n\n{}",
        progress.position + 1,
        progress.ids.len(),
        id,
        prompt,
        quiz::prompt::render_options(&options)
    );
    bot.send_message(chat_id, text)
        .reply_markup(question_keyboard())
        .await?;
    Ok(())
}

async fn finish_quiz(
    bot: &Bot,
    dialogue: &QuizDialogue,
    session: QuizSession,
    progress: &QuizProgress,
    chat_id: ChatId,
) -> HandlerResult {
    let summary = format!(
        "Quiz finished! You answered {} of {} questions correctly.\n\
         What would you like to do next?",
        progress.score, progress.answered
    );
    bot.send_message(chat_id, summary)
        .reply_markup(menu_keyboard())
        .await?;

    dialogue.update(State::ReceiveMenuChoice { session }).await?;
    Ok(())
}

async fn save_questions(
    bot: &Bot,
    chat_id: ChatId,
    session: &QuizSession,
    config: &Config,
) -> HandlerResult {
    if session.is_empty() {
        bot.send_message(chat_id, "There are no questions to save yet").await?;
        return Ok(());
    }
    let reply = match session.save(&config.output_path) {
        Ok(count) => format!("Saved {} questions to {}", count, config.output_path.display()),
        Err(e) => {
            log::error!("Failed to save questions: {}", e);
            "Sorry, saving the questions failed".to_string()
        }
    };
    bot.send_message(chat_id, reply).await?;
    Ok(())
}

async fn announce_generation(bot: &Bot, chat_id: ChatId) -> HandlerResult {
    bot.send_message(chat_id, "Generating questions, this can take a minute...")
        .reply_markup(KeyboardRemove::new())
        .await?;
    let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
    Ok(())
}

async fn send_long(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    keyboard: KeyboardMarkup,
) -> HandlerResult {
    for chunk in split_message(text, MESSAGE_LIMIT) {
        bot.send_message(chat_id, chunk)
            .reply_markup(keyboard.clone())
            .await?;
    }
    Ok(())
}

fn render_true_false(statements: &[TrueFalseQuestion]) -> String {
    statements
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let answer = if s.answer { "True" } else { "False" };
            format!("{}. {}\nAnswer: {}", i + 1, s.statement, answer)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_essays(essays: &[EssayQuestion]) -> String {
    essays
        .iter()
        .enumerate()
        .map(|(i, essay)| match &essay.expected_length {
            Some(length) => format!("{}. {}\nExpected length: {}", i + 1, essay.prompt, length),
            None => format!("{}. {}", i + 1, essay.prompt),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Splits `text` into pieces of at most `limit` characters, preferring to cut
/// at line breaks.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn question_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        OptionLetter::ALL
            .iter()
            .map(|letter| KeyboardButton::new(letter.to_string()))
            .collect::<Vec<_>>(),
        vec![KeyboardButton::new(EXPLAIN), KeyboardButton::new(PREREQUISITE)],
        vec![KeyboardButton::new(SIMILAR), KeyboardButton::new(NEXT)],
    ])
}

fn action_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(EXPLAIN), KeyboardButton::new(PREREQUISITE)],
        vec![KeyboardButton::new(SIMILAR), KeyboardButton::new(NEXT)],
        vec![KeyboardButton::new(SAVE_QUESTIONS), KeyboardButton::new(FINISH)],
    ])
}

fn menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(NEW_QUIZ),
        KeyboardButton::new(SAVE_QUESTIONS),
    ]])
}
