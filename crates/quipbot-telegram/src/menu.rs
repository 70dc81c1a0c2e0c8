//! Quipbot Telegram Menus
//!
//! Static texts and inline keyboards: greeting, help, info and the fixed
//! callback tokens behind the greeting buttons.

use quipbot_ipc::InlineButton;

pub const CALLBACK_HELP: &str = "help";
pub const CALLBACK_INFO: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotCommand {
    pub command: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

const fn cmd(
    command: &'static str,
    usage: &'static str,
    description: &'static str,
) -> BotCommand {
    BotCommand {
        command,
        usage,
        description,
    }
}

/// Commands advertised in `/help` and registered with `setMyCommands`.
pub const COMMANDS: &[BotCommand] = &[
    cmd("start", "", "Start interacting with the bot"),
    cmd("help", "", "Show this help message"),
    cmd("info", "", "Bot information"),
    cmd("joke", "", "Get a random joke"),
    cmd("weather", "<city>", "Get current weather for a city"),
    cmd("cat", "", "Get a random cat picture"),
    cmd("dog", "", "Get a random dog picture"),
    cmd("time", "", "Get the current server time"),
    cmd("quote", "", "Get an inspirational quote"),
    cmd("quiz", "", "Answer a trivia question"),
    cmd("qr", "<text>", "Turn text into a QR code"),
    cmd("shorten", "<url>", "Shorten a link"),
    cmd("timezone", "<Area/City>", "Current time in a timezone"),
    cmd("remind", "<duration> <text>", "Set a reminder (30s, 10m, 2h, 1d)"),
    cmd("calc", "<expression>", "Evaluate arithmetic"),
    cmd("note", "<text>", "Save a note"),
    cmd("notes", "", "List your notes"),
    cmd("stats", "", "Show your usage stats"),
    cmd("roll", "[sides]", "Roll a die"),
    cmd("flip", "", "Flip a coin"),
];

pub fn start_menu(first_name: &str, bot_name: &str) -> (String, Vec<Vec<InlineButton>>) {
    let text = format!(
        "Hello, {}! Welcome to {}. I can assist you with various tasks. Type /help to see what I can do.",
        first_name, bot_name
    );
    let keyboard = vec![
        vec![InlineButton::new("Help", CALLBACK_HELP)],
        vec![InlineButton::new("Info", CALLBACK_INFO)],
    ];
    (text, keyboard)
}

pub fn help_text() -> String {
    let mut text = String::from("Available commands:\n");
    for command in COMMANDS {
        text.push_str("\n/");
        text.push_str(command.command);
        if !command.usage.is_empty() {
            text.push(' ');
            text.push_str(command.usage);
        }
        text.push_str(" - ");
        text.push_str(command.description);
    }
    text
}

pub fn info_text(bot_name: &str) -> String {
    format!(
        "Bot Name: {}\nVersion: {}\nI was created to help and entertain you with useful information and fun surprises!",
        bot_name,
        env!("CARGO_PKG_VERSION")
    )
}

/// Reply for the fixed callback tokens, `None` for anything else.
pub fn static_callback_reply(data: &str, bot_name: &str) -> Option<String> {
    match data {
        CALLBACK_HELP => Some("Type /help to see all available commands.".to_string()),
        CALLBACK_INFO => Some(format!(
            "This bot is called {} and is here to help and entertain you!",
            bot_name
        )),
        _ => None,
    }
}

pub fn bot_commands_payload() -> serde_json::Value {
    let commands: Vec<serde_json::Value> = COMMANDS
        .iter()
        .map(|c| serde_json::json!({ "command": c.command, "description": c.description }))
        .collect();
    serde_json::json!({ "commands": commands })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_menu_greets_and_offers_help_and_info() {
        let (text, keyboard) = start_menu("Ada", "Quipbot");
        assert!(text.starts_with("Hello, Ada! Welcome to Quipbot."));
        assert_eq!(keyboard.len(), 2);
        assert_eq!(keyboard[0][0].callback_data, "help");
        assert_eq!(keyboard[1][0].callback_data, "info");
    }

    #[test]
    fn help_lists_every_command_with_usage() {
        let text = help_text();
        for command in COMMANDS {
            assert!(text.contains(&format!("/{}", command.command)));
        }
        assert!(text.contains("/weather <city> - "));
    }

    #[test]
    fn static_replies_cover_only_known_tokens() {
        assert!(static_callback_reply("help", "Q").is_some());
        assert_eq!(
            static_callback_reply("info", "Q").as_deref(),
            Some("This bot is called Q and is here to help and entertain you!")
        );
        assert!(static_callback_reply("q:1:2:1", "Q").is_none());
    }

    #[test]
    fn bot_commands_payload_matches_table() {
        let payload = bot_commands_payload();
        let commands = payload["commands"].as_array().expect("array");
        assert_eq!(commands.len(), COMMANDS.len());
        assert_eq!(commands[0]["command"], "start");
    }
}
