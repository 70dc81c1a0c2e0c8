//! Inline-button resolution.

use crate::quiz::QuizPayload;
use quipbot_storage::QuizRegistry;
use quipbot_telegram::menu;

pub const QUIZ_CLOSED_TEXT: &str = "This quiz is already closed.";
pub const UNKNOWN_ACTION_TEXT: &str = "Unknown action.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    AnsweredCorrectly {
        question: String,
        correct_answer: String,
    },
    AnsweredIncorrectly {
        question: String,
        correct_answer: String,
    },
    QuizClosed,
    Static(String),
    UnknownAction,
}

impl CallbackOutcome {
    /// Ledger counter credited to the clicking user.
    pub fn stat_action(&self) -> Option<&'static str> {
        match self {
            CallbackOutcome::AnsweredCorrectly { .. } => Some("quiz_correct"),
            CallbackOutcome::AnsweredIncorrectly { .. } => Some("quiz_wrong"),
            _ => None,
        }
    }

    /// Short toast shown on the acknowledgement.
    pub fn toast(&self) -> Option<&'static str> {
        match self {
            CallbackOutcome::AnsweredCorrectly { .. } => Some("✅ Correct!"),
            CallbackOutcome::AnsweredIncorrectly { .. } => Some("❌ Wrong!"),
            _ => None,
        }
    }

    /// Text reply for outcomes that do not rewrite the quiz message.
    pub fn reply_text(&self) -> String {
        match self {
            CallbackOutcome::AnsweredCorrectly {
                question,
                correct_answer,
            } => format!(
                "{}\n\n✅ Correct! The answer is {}.",
                question, correct_answer
            ),
            CallbackOutcome::AnsweredIncorrectly {
                question,
                correct_answer,
            } => format!(
                "{}\n\n❌ Wrong! The correct answer was {}.",
                question, correct_answer
            ),
            CallbackOutcome::QuizClosed => QUIZ_CLOSED_TEXT.to_string(),
            CallbackOutcome::Static(text) => text.clone(),
            CallbackOutcome::UnknownAction => UNKNOWN_ACTION_TEXT.to_string(),
        }
    }

    pub fn is_answer(&self) -> bool {
        self.stat_action().is_some()
    }
}

pub fn resolve_callback(
    data: &str,
    conversation_id: i64,
    quizzes: &mut QuizRegistry,
    bot_name: &str,
) -> CallbackOutcome {
    if let Ok(payload) = QuizPayload::decode(data) {
        if payload.conversation_id != conversation_id {
            return CallbackOutcome::QuizClosed;
        }
        return match quizzes.resolve_quiz(conversation_id, payload.quiz_id) {
            Some(quiz) if payload.correct => CallbackOutcome::AnsweredCorrectly {
                question: quiz.question,
                correct_answer: quiz.correct_answer,
            },
            Some(quiz) => CallbackOutcome::AnsweredIncorrectly {
                question: quiz.question,
                correct_answer: quiz.correct_answer,
            },
            None => CallbackOutcome::QuizClosed,
        };
    }

    match menu::static_callback_reply(data, bot_name) {
        Some(text) => CallbackOutcome::Static(text),
        None => CallbackOutcome::UnknownAction,
    }
}
