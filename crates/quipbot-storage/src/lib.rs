//! Quipbot Storage
//!
//! Volatile per-user state (stat counters, notes) and the pending-quiz
//! registry. Nothing here outlives the process.

mod quiz;

pub use quiz::{PendingQuiz, QuizRegistry};

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub notes: Vec<Note>,
    pub stats: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct Storage {
    users: HashMap<String, UserRecord>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    fn user_mut(&mut self, user_id: &str) -> &mut UserRecord {
        self.users.entry(user_id.to_string()).or_default()
    }

    /// Increments the counter for `action` and returns its new value.
    pub fn record_stat(&mut self, user_id: &str, action: &str) -> u64 {
        let counter = self
            .user_mut(user_id)
            .stats
            .entry(action.to_string())
            .or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Returns `None` when nothing was ever recorded for the user.
    pub fn get_stats(&self, user_id: &str) -> Option<&BTreeMap<String, u64>> {
        self.users
            .get(user_id)
            .map(|record| &record.stats)
            .filter(|stats| !stats.is_empty())
    }

    pub fn add_note(&mut self, user_id: &str, text: &str) -> usize {
        self.add_note_at(user_id, text, Utc::now())
    }

    pub fn add_note_at(&mut self, user_id: &str, text: &str, created_at: DateTime<Utc>) -> usize {
        let record = self.user_mut(user_id);
        record.notes.push(Note {
            text: text.to_string(),
            created_at,
        });
        record.notes.len()
    }

    pub fn get_notes(&self, user_id: &str) -> &[Note] {
        self.users
            .get(user_id)
            .map(|record| record.notes.as_slice())
            .unwrap_or_default()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Storage;
    use chrono::TimeZone;

    #[test]
    fn record_stat_counts_each_action_separately() {
        let mut storage = Storage::new();
        storage.record_stat("u1", "jokes");
        storage.record_stat("u1", "jokes");
        storage.record_stat("u1", "dice_rolls");

        let stats = storage.get_stats("u1").expect("stats for u1");
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.get("jokes"), Some(&2));
        assert_eq!(stats.get("dice_rolls"), Some(&1));
    }

    #[test]
    fn counts_match_call_sequence_per_user_and_action() {
        let calls = [
            ("a", "x"),
            ("b", "x"),
            ("a", "y"),
            ("a", "x"),
            ("b", "z"),
            ("a", "x"),
        ];
        let mut storage = Storage::new();
        for (user, action) in calls {
            storage.record_stat(user, action);
        }

        for (user, action) in calls {
            let expected = calls
                .iter()
                .filter(|(u, a)| *u == user && *a == action)
                .count() as u64;
            let stats = storage.get_stats(user).expect("recorded user");
            assert_eq!(stats.get(action).copied(), Some(expected));
        }
    }

    #[test]
    fn unknown_user_has_no_stats() {
        let storage = Storage::new();
        assert!(storage.get_stats("ghost").is_none());
    }

    #[test]
    fn record_stat_returns_running_total() {
        let mut storage = Storage::new();
        assert_eq!(storage.record_stat("u", "quizzes"), 1);
        assert_eq!(storage.record_stat("u", "quizzes"), 2);
    }

    #[test]
    fn notes_keep_insertion_order_and_timestamps() {
        let mut storage = Storage::new();
        let first = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let second = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();

        assert_eq!(storage.add_note_at("u", "buy milk", first), 1);
        assert_eq!(storage.add_note_at("u", "call mom", second), 2);

        let notes = storage.get_notes("u");
        assert_eq!(notes[0].text, "buy milk");
        assert_eq!(notes[0].created_at, first);
        assert_eq!(notes[1].text, "call mom");
        assert!(storage.get_notes("other").is_empty());
    }

    #[test]
    fn notes_alone_do_not_count_as_stats() {
        let mut storage = Storage::new();
        storage.add_note("u", "hello");
        assert_eq!(storage.user_count(), 1);
        assert!(storage.get_stats("u").is_none());
    }
}
