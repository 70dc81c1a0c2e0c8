//! Slash-command classification.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Help,
    Info,
    Joke,
    Weather,
    Cat,
    Dog,
    Time,
    Quote,
    Quiz,
    Qr,
    Shorten,
    Timezone,
    Remind,
    Calc,
    Note,
    Notes,
    Stats,
    Roll,
    Flip,
}

impl Command {
    pub fn from_name(name: &str) -> Option<Self> {
        let command = match name {
            "start" => Command::Start,
            "help" => Command::Help,
            "info" => Command::Info,
            "joke" => Command::Joke,
            "weather" => Command::Weather,
            "cat" => Command::Cat,
            "dog" => Command::Dog,
            "time" => Command::Time,
            "quote" => Command::Quote,
            "quiz" | "trivia" => Command::Quiz,
            "qr" => Command::Qr,
            "shorten" => Command::Shorten,
            "timezone" => Command::Timezone,
            "remind" => Command::Remind,
            "calc" => Command::Calc,
            "note" => Command::Note,
            "notes" => Command::Notes,
            "stats" => Command::Stats,
            "roll" => Command::Roll,
            "flip" => Command::Flip,
            _ => return None,
        };
        Some(command)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Info => "info",
            Command::Joke => "joke",
            Command::Weather => "weather",
            Command::Cat => "cat",
            Command::Dog => "dog",
            Command::Time => "time",
            Command::Quote => "quote",
            Command::Quiz => "quiz",
            Command::Qr => "qr",
            Command::Shorten => "shorten",
            Command::Timezone => "timezone",
            Command::Remind => "remind",
            Command::Calc => "calc",
            Command::Note => "note",
            Command::Notes => "notes",
            Command::Stats => "stats",
            Command::Roll => "roll",
            Command::Flip => "flip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Command {
        command: Command,
        args: Option<String>,
    },
    /// Plain text or an unrecognized command; echoed back verbatim.
    Echo(String),
    /// `/cmd@OtherBot` addressed to a different bot in a group.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct CommandRouter {
    case_insensitive: bool,
    bot_username: Option<String>,
}

impl CommandRouter {
    pub fn new(case_insensitive: bool, bot_username: Option<String>) -> Self {
        Self {
            case_insensitive,
            bot_username: bot_username.map(|name| name.to_lowercase()),
        }
    }

    pub fn route(&self, text: &str) -> Route {
        let Some(rest) = text.strip_prefix('/') else {
            return Route::Echo(text.to_string());
        };

        let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (token, remainder) = rest.split_at(token_end);

        let (name, mention) = match token.split_once('@') {
            Some((name, mention)) => (name, Some(mention)),
            None => (token, None),
        };

        let command = if self.case_insensitive {
            Command::from_name(&name.to_lowercase())
        } else {
            Command::from_name(name)
        };
        let Some(command) = command else {
            return Route::Echo(text.to_string());
        };

        if let (Some(mention), Some(own)) = (mention, self.bot_username.as_deref()) {
            if !mention.eq_ignore_ascii_case(own) {
                return Route::Ignored;
            }
        }

        let args = remainder.trim();
        Route::Command {
            command,
            args: (!args.is_empty()).then(|| args.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(text: &str) -> Route {
        CommandRouter::default().route(text)
    }

    fn command(command: Command, args: Option<&str>) -> Route {
        Route::Command {
            command,
            args: args.map(str::to_string),
        }
    }

    #[test]
    fn bare_command_has_no_argument() {
        assert_eq!(route("/joke"), command(Command::Joke, None));
        assert_eq!(route("/joke   "), command(Command::Joke, None));
    }

    #[test]
    fn argument_is_trimmed_remainder() {
        assert_eq!(
            route("/weather   New York  "),
            command(Command::Weather, Some("New York"))
        );
        assert_eq!(
            route("/note\nbuy milk\nand eggs"),
            command(Command::Note, Some("buy milk\nand eggs"))
        );
    }

    #[test]
    fn prefix_requires_token_boundary() {
        assert_eq!(route("/starting"), Route::Echo("/starting".to_string()));
        assert_eq!(route("/notes"), command(Command::Notes, None));
        assert_eq!(route("/note x"), command(Command::Note, Some("x")));
    }

    #[test]
    fn trivia_is_an_alias_for_quiz() {
        assert_eq!(route("/trivia"), command(Command::Quiz, None));
    }

    #[test]
    fn plain_and_unknown_text_echo() {
        assert_eq!(route("hello there"), Route::Echo("hello there".to_string()));
        assert_eq!(route("/unknown 1"), Route::Echo("/unknown 1".to_string()));
        assert_eq!(route("/"), Route::Echo("/".to_string()));
    }

    #[test]
    fn matching_is_case_sensitive_by_default() {
        assert_eq!(route("/JOKE"), Route::Echo("/JOKE".to_string()));
        let router = CommandRouter::new(true, None);
        assert_eq!(router.route("/JOKE"), command(Command::Joke, None));
    }

    #[test]
    fn bot_mention_suffix_is_dropped() {
        assert_eq!(
            route("/weather@QuipBot Rome"),
            command(Command::Weather, Some("Rome"))
        );
        let router = CommandRouter::new(false, Some("QuipBot".to_string()));
        assert_eq!(router.route("/flip@quipbot"), command(Command::Flip, None));
        assert_eq!(router.route("/flip@otherbot"), Route::Ignored);
    }

    #[test]
    fn every_name_round_trips() {
        for name in [
            "start", "help", "info", "joke", "weather", "cat", "dog", "time", "quote", "quiz",
            "qr", "shorten", "timezone", "remind", "calc", "note", "notes", "stats", "roll",
            "flip",
        ] {
            let command = Command::from_name(name).expect("known command");
            assert_eq!(command.name(), name);
        }
    }
}
