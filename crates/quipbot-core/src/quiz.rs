//! Trivia option shuffling and the inline-button payload format.
//!
//! Button order and correctness flags both come from the single `Vec`
//! returned by [`shuffle_options`]; nothing downstream re-derives which
//! option is correct.

use quipbot_ipc::InlineButton;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

/// Telegram rejects `callback_data` longer than this many bytes.
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

const PAYLOAD_PREFIX: &str = "q";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizOption {
    pub text: String,
    pub correct: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("not a quiz payload")]
    NotQuiz,

    #[error("malformed quiz payload '{0}'")]
    Malformed(String),

    #[error("quiz payload is {len} bytes, limit is 64")]
    TooLong { len: usize },
}

/// `q:<conversation_id>:<quiz_id>:<1|0>`; the quiz id ties a button to the
/// question it was rendered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizPayload {
    pub conversation_id: i64,
    pub quiz_id: u64,
    pub correct: bool,
}

impl QuizPayload {
    pub fn encode(&self) -> Result<String, PayloadError> {
        let data = format!(
            "{}:{}:{}:{}",
            PAYLOAD_PREFIX,
            self.conversation_id,
            self.quiz_id,
            if self.correct { 1 } else { 0 }
        );
        if data.len() > MAX_CALLBACK_DATA_BYTES {
            return Err(PayloadError::TooLong { len: data.len() });
        }
        Ok(data)
    }

    pub fn decode(data: &str) -> Result<Self, PayloadError> {
        let mut parts = data.split(':');
        if parts.next() != Some(PAYLOAD_PREFIX) {
            return Err(PayloadError::NotQuiz);
        }
        let malformed = || PayloadError::Malformed(data.to_string());

        let conversation_id = parts
            .next()
            .and_then(|raw| raw.parse::<i64>().ok())
            .ok_or_else(malformed)?;
        let quiz_id = parts
            .next()
            .and_then(|raw| raw.parse::<u64>().ok())
            .ok_or_else(malformed)?;
        let correct = match parts.next() {
            Some("1") => true,
            Some("0") => false,
            _ => return Err(malformed()),
        };
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            conversation_id,
            quiz_id,
            correct,
        })
    }
}

/// Uniform random permutation of the correct answer plus the incorrect ones.
pub fn shuffle_options<R: Rng + ?Sized>(
    correct_answer: &str,
    incorrect_answers: &[String],
    rng: &mut R,
) -> Vec<QuizOption> {
    let mut options: Vec<QuizOption> = std::iter::once(QuizOption {
        text: correct_answer.to_string(),
        correct: true,
    })
    .chain(incorrect_answers.iter().map(|answer| QuizOption {
        text: answer.clone(),
        correct: false,
    }))
    .collect();
    options.shuffle(rng);
    options
}

/// One button per row, in option order.
pub fn quiz_keyboard(
    conversation_id: i64,
    quiz_id: u64,
    options: &[QuizOption],
) -> Result<Vec<Vec<InlineButton>>, PayloadError> {
    options
        .iter()
        .map(|option| {
            let data = QuizPayload {
                conversation_id,
                quiz_id,
                correct: option.correct,
            }
            .encode()?;
            Ok(vec![InlineButton::new(option.text.clone(), data)])
        })
        .collect()
}

pub fn render_question(category: &str, difficulty: &str, question: &str) -> String {
    let mut header = String::from("🧠 Trivia time!");
    match (category.is_empty(), difficulty.is_empty()) {
        (false, false) => header.push_str(&format!(" ({}, {})", category, difficulty)),
        (false, true) => header.push_str(&format!(" ({})", category)),
        (true, false) => header.push_str(&format!(" ({})", difficulty)),
        (true, true) => {}
    }
    format!("{}\n\n{}", header, question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keyboard_flags_follow_shuffled_order() {
        let options = vec![
            QuizOption {
                text: "Berlin".to_string(),
                correct: false,
            },
            QuizOption {
                text: "Paris".to_string(),
                correct: true,
            },
            QuizOption {
                text: "London".to_string(),
                correct: false,
            },
        ];
        let keyboard = quiz_keyboard(7, 3, &options).expect("keyboard");

        assert_eq!(keyboard.len(), 3);
        assert!(keyboard.iter().all(|row| row.len() == 1));
        assert_eq!(keyboard[0][0].text, "Berlin");
        assert_eq!(keyboard[0][0].callback_data, "q:7:3:0");
        assert_eq!(keyboard[1][0].text, "Paris");
        assert_eq!(keyboard[1][0].callback_data, "q:7:3:1");
        assert_eq!(keyboard[2][0].callback_data, "q:7:3:0");
    }

    #[test]
    fn shuffle_keeps_every_option_and_exactly_one_correct() {
        let mut rng = StdRng::seed_from_u64(7);
        let incorrect = strings(&["London", "Berlin", "Rome"]);
        let options = shuffle_options("Paris", &incorrect, &mut rng);

        assert_eq!(options.len(), 4);
        assert_eq!(options.iter().filter(|o| o.correct).count(), 1);
        let correct = options.iter().find(|o| o.correct).expect("correct option");
        assert_eq!(correct.text, "Paris");
        let mut texts: Vec<_> = options.iter().map(|o| o.text.as_str()).collect();
        texts.sort_unstable();
        assert_eq!(texts, vec!["Berlin", "London", "Paris", "Rome"]);
    }

    #[test]
    fn correct_position_is_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(2024);
        let incorrect = strings(&["b", "c", "d"]);
        let mut counts = [0usize; 4];
        let runs = 8000;

        for _ in 0..runs {
            let options = shuffle_options("a", &incorrect, &mut rng);
            let position = options.iter().position(|o| o.correct).expect("correct");
            counts[position] += 1;
        }

        let expected = runs / 4;
        for count in counts {
            let deviation = (count as f64 - expected as f64).abs() / expected as f64;
            assert!(deviation < 0.1, "position counts skewed: {:?}", counts);
        }
    }

    #[test]
    fn seeded_shuffles_are_reproducible() {
        let incorrect = strings(&["x", "y", "z"]);
        let first = shuffle_options("w", &incorrect, &mut StdRng::seed_from_u64(1));
        let second = shuffle_options("w", &incorrect, &mut StdRng::seed_from_u64(1));
        assert_eq!(first, second);
    }

    #[test]
    fn payload_decodes_its_own_encoding() {
        let payload = QuizPayload {
            conversation_id: -1001234567890,
            quiz_id: 17,
            correct: true,
        };
        let data = payload.encode().expect("encode");
        assert_eq!(data, "q:-1001234567890:17:1");
        assert_eq!(QuizPayload::decode(&data), Ok(payload));
    }

    #[test]
    fn extreme_conversation_ids_fit_callback_limit() {
        let data = QuizPayload {
            conversation_id: i64::MIN,
            quiz_id: u64::MAX,
            correct: false,
        }
        .encode()
        .expect("encode");
        assert!(data.len() <= MAX_CALLBACK_DATA_BYTES);
    }

    #[test]
    fn decode_rejects_other_shapes() {
        assert_eq!(QuizPayload::decode("help"), Err(PayloadError::NotQuiz));
        assert!(matches!(
            QuizPayload::decode("q:abc:1"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            QuizPayload::decode("q:1:2"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            QuizPayload::decode("q:1:2:2"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            QuizPayload::decode("q:1:-2:1"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            QuizPayload::decode("q:1:2:1:extra"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            QuizPayload::decode("q:1"),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn render_question_includes_category() {
        assert_eq!(
            render_question("Geography", "easy", "Capital of France?"),
            "🧠 Trivia time! (Geography, easy)\n\nCapital of France?"
        );
        assert_eq!(render_question("", "", "Q?"), "🧠 Trivia time!\n\nQ?");
    }
}
