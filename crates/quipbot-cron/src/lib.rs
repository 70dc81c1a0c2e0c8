//! Quipbot Cron - Reminders in Chat
//!
//! Parses `/remind <duration> <text>` arguments and fires one-shot reminders
//! on tokio timers.

use quipbot_ipc::OutboundMessage;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

pub const MAX_REMINDER_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const REMINDER_USAGE: &str =
    "Usage: /remind <duration> <text>\nDuration: 30s, 10m, 2h, 1d or plain minutes (max 7 days).";

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("invalid reminder duration '{0}'")]
    InvalidDuration(String),

    #[error("reminder delay must be greater than zero")]
    ZeroDelay,

    #[error("reminder delay exceeds the 7 day maximum")]
    TooLong,

    #[error("reminder text cannot be empty")]
    EmptyText,

    #[error("failed to compile reminder pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderRequest {
    pub delay: Duration,
    pub text: String,
}

pub struct ReminderParser {
    duration_re: Regex,
}

impl ReminderParser {
    pub fn new() -> Result<Self, ReminderError> {
        Ok(Self {
            duration_re: Regex::new(r"(?i)^(\d{1,9})([smhd]?)$")?,
        })
    }

    /// Splits `"<duration> <text>"`. A bare number means minutes.
    pub fn parse(&self, input: &str) -> Result<ReminderRequest, ReminderError> {
        let input = input.trim();
        let (duration, text) = match input.split_once(char::is_whitespace) {
            Some((duration, text)) => (duration, text.trim()),
            None => (input, ""),
        };

        let delay = self.parse_duration(duration)?;
        if text.is_empty() {
            return Err(ReminderError::EmptyText);
        }

        Ok(ReminderRequest {
            delay,
            text: text.to_string(),
        })
    }

    pub fn parse_duration(&self, token: &str) -> Result<Duration, ReminderError> {
        let caps = self
            .duration_re
            .captures(token)
            .ok_or_else(|| ReminderError::InvalidDuration(token.to_string()))?;

        let value: u64 = caps[1]
            .parse()
            .map_err(|_| ReminderError::InvalidDuration(token.to_string()))?;
        let unit_secs: u64 = match caps[2].to_ascii_lowercase().as_str() {
            "s" => 1,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            _ => 60,
        };

        let secs = value
            .checked_mul(unit_secs)
            .ok_or(ReminderError::TooLong)?;
        if secs == 0 {
            return Err(ReminderError::ZeroDelay);
        }
        let delay = Duration::from_secs(secs);
        if delay > MAX_REMINDER_DELAY {
            return Err(ReminderError::TooLong);
        }
        Ok(delay)
    }
}

/// Human form of a delay using the largest unit that divides it evenly.
pub fn describe_delay(delay: Duration) -> String {
    let secs = delay.as_secs();
    let (value, unit) = if secs >= 86_400 && secs % 86_400 == 0 {
        (secs / 86_400, "day")
    } else if secs >= 3_600 && secs % 3_600 == 0 {
        (secs / 3_600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if value == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", value, unit)
    }
}

type TaskTable = Arc<Mutex<HashMap<u64, AbortHandle>>>;

fn lock_tasks(tasks: &TaskTable) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
    match tasks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Cancels one scheduled reminder.
#[derive(Debug)]
pub struct ReminderHandle {
    id: u64,
    tasks: TaskTable,
}

impl ReminderHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `false` if the reminder already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        match lock_tasks(&self.tasks).remove(&self.id) {
            Some(abort) => {
                abort.abort();
                debug!(reminder_id = self.id, "Reminder cancelled");
                true
            }
            None => false,
        }
    }
}

pub struct ReminderScheduler {
    outbound: broadcast::Sender<OutboundMessage>,
    tasks: TaskTable,
    next_id: AtomicU64,
}

impl ReminderScheduler {
    pub fn new(outbound: broadcast::Sender<OutboundMessage>) -> Self {
        Self {
            outbound,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns a timer that delivers `⏰ Reminder: <text>` to the chat.
    /// Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        channel: &str,
        chat_id: i64,
        text: &str,
        delay: Duration,
    ) -> ReminderHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outbound = self.outbound.clone();
        let tasks = self.tasks.clone();
        let msg = OutboundMessage::text(channel, chat_id, format!("⏰ Reminder: {}", text));

        // Hold the table lock across spawn so a zero-length timer cannot
        // remove its entry before it is inserted.
        let mut table = lock_tasks(&self.tasks);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock_tasks(&tasks).remove(&id);
            info!(reminder_id = id, chat_id, "Reminder fired");
            if let Err(e) = outbound.send(msg) {
                warn!(reminder_id = id, "Failed to deliver reminder: {}", e);
            }
        });
        table.insert(id, join.abort_handle());
        drop(table);

        debug!(reminder_id = id, chat_id, delay_secs = delay.as_secs(), "Reminder scheduled");
        ReminderHandle {
            id,
            tasks: self.tasks.clone(),
        }
    }

    pub fn pending_count(&self) -> usize {
        lock_tasks(&self.tasks).len()
    }

    /// Aborts every outstanding reminder and returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<AbortHandle> = lock_tasks(&self.tasks).drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        if !drained.is_empty() {
            info!("Cancelled {} pending reminder(s)", drained.len());
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ReminderParser {
        ReminderParser::new().expect("reminder pattern")
    }

    #[test]
    fn parse_accepts_all_units() {
        let p = parser();
        assert_eq!(p.parse_duration("30s").expect("s"), Duration::from_secs(30));
        assert_eq!(p.parse_duration("10m").expect("m"), Duration::from_secs(600));
        assert_eq!(p.parse_duration("2H").expect("h"), Duration::from_secs(7200));
        assert_eq!(p.parse_duration("1d").expect("d"), Duration::from_secs(86_400));
        assert_eq!(p.parse_duration("15").expect("bare"), Duration::from_secs(900));
    }

    #[test]
    fn parse_splits_duration_and_text() {
        let req = parser().parse("10m  take the pizza out ").expect("request");
        assert_eq!(req.delay, Duration::from_secs(600));
        assert_eq!(req.text, "take the pizza out");
    }

    #[test]
    fn parse_rejects_bad_input() {
        let p = parser();
        assert!(matches!(p.parse("soon do it"), Err(ReminderError::InvalidDuration(_))));
        assert!(matches!(p.parse("10m"), Err(ReminderError::EmptyText)));
        assert!(matches!(p.parse("0s hi"), Err(ReminderError::ZeroDelay)));
        assert!(matches!(p.parse("8d hi"), Err(ReminderError::TooLong)));
        assert!(matches!(p.parse(""), Err(ReminderError::InvalidDuration(_))));
    }

    #[test]
    fn seven_days_is_the_inclusive_limit() {
        let p = parser();
        assert_eq!(p.parse_duration("7d").expect("7d"), MAX_REMINDER_DELAY);
        assert!(p.parse_duration("10081").is_err());
    }

    #[test]
    fn describe_delay_picks_largest_even_unit() {
        assert_eq!(describe_delay(Duration::from_secs(30)), "30 seconds");
        assert_eq!(describe_delay(Duration::from_secs(600)), "10 minutes");
        assert_eq!(describe_delay(Duration::from_secs(3600)), "1 hour");
        assert_eq!(describe_delay(Duration::from_secs(90)), "90 seconds");
        assert_eq!(describe_delay(Duration::from_secs(2 * 86_400)), "2 days");
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_reminder_is_delivered_after_delay() {
        let (tx, mut rx) = broadcast::channel(8);
        let scheduler = ReminderScheduler::new(tx);
        scheduler.schedule("telegram", 42, "stretch", Duration::from_secs(30));
        assert_eq!(scheduler.pending_count(), 1);

        let msg = rx.recv().await.expect("reminder");
        assert_eq!(msg.chat_id, 42);
        assert_eq!(msg.text, "⏰ Reminder: stretch");
        tokio::task::yield_now().await;
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_reminder_never_fires() {
        let (tx, mut rx) = broadcast::channel(8);
        let scheduler = ReminderScheduler::new(tx);
        let handle = scheduler.schedule("telegram", 1, "nope", Duration::from_secs(5));

        assert!(handle.cancel());
        assert!(!handle.cancel());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_pending_reminders() {
        let (tx, mut rx) = broadcast::channel(8);
        let scheduler = ReminderScheduler::new(tx);
        scheduler.schedule("telegram", 1, "a", Duration::from_secs(5));
        scheduler.schedule("telegram", 2, "b", Duration::from_secs(6));

        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(scheduler.pending_count(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
