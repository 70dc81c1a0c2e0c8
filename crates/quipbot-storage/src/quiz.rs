//! Pending trivia questions, one per conversation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuiz {
    pub quiz_id: u64,
    pub question: String,
    pub correct_answer: String,
    pub opened_at: Instant,
}

#[derive(Debug)]
pub struct QuizRegistry {
    pending: HashMap<i64, PendingQuiz>,
    ttl: Option<Duration>,
    next_id: u64,
}

impl QuizRegistry {
    /// Quizzes older than `ttl` resolve as absent.
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            ttl: Some(ttl),
            next_id: 1,
        }
    }

    /// Registry whose quizzes stay answerable forever.
    pub fn without_expiry() -> Self {
        Self {
            pending: HashMap::new(),
            ttl: None,
            next_id: 1,
        }
    }

    /// Installs a quiz for the conversation, replacing any unanswered one.
    /// Returns the id that buttons of this quiz must carry.
    pub fn open(&mut self, conversation_id: i64, question: &str, correct_answer: &str) -> u64 {
        self.open_at(conversation_id, question, correct_answer, Instant::now())
    }

    pub fn open_at(
        &mut self,
        conversation_id: i64,
        question: &str,
        correct_answer: &str,
        now: Instant,
    ) -> u64 {
        let quiz_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.pending.insert(
            conversation_id,
            PendingQuiz {
                quiz_id,
                question: question.to_string(),
                correct_answer: correct_answer.to_string(),
                opened_at: now,
            },
        );
        quiz_id
    }

    /// Removes and returns the conversation's quiz, if one is still live.
    pub fn resolve(&mut self, conversation_id: i64) -> Option<PendingQuiz> {
        self.resolve_at(conversation_id, None, Instant::now())
    }

    /// Like [`resolve`](Self::resolve), but only for the quiz with `quiz_id`.
    /// A newer quiz in the same conversation is left pending.
    pub fn resolve_quiz(&mut self, conversation_id: i64, quiz_id: u64) -> Option<PendingQuiz> {
        self.resolve_at(conversation_id, Some(quiz_id), Instant::now())
    }

    pub fn resolve_at(
        &mut self,
        conversation_id: i64,
        quiz_id: Option<u64>,
        now: Instant,
    ) -> Option<PendingQuiz> {
        let current = self.pending.get(&conversation_id)?.quiz_id;
        if quiz_id.is_some_and(|id| id != current) {
            tracing::debug!(conversation_id, ?quiz_id, current, "Button belongs to a replaced quiz");
            return None;
        }
        let quiz = self.pending.remove(&conversation_id)?;
        if self.is_expired(&quiz, now) {
            tracing::debug!(conversation_id, "Discarding expired quiz");
            return None;
        }
        Some(quiz)
    }

    pub fn is_pending(&self, conversation_id: i64) -> bool {
        self.pending.contains_key(&conversation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops every expired quiz and returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.pending.len();
        self.pending
            .retain(|_, quiz| now.saturating_duration_since(quiz.opened_at) <= ttl);
        before - self.pending.len()
    }

    fn is_expired(&self, quiz: &PendingQuiz, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(quiz.opened_at) > ttl)
    }
}
