//! Command and callback handlers.
//!
//! Every handler recovers its own failures: provider errors become an
//! apology, bad arguments a usage hint. Only plumbing errors propagate.

use crate::calc;
use crate::callbacks::resolve_callback;
use crate::quiz::{quiz_keyboard, render_question, shuffle_options};
use crate::router::{Command, Route};
use crate::RuntimeState;
use anyhow::Result;
use quipbot_cron::{describe_delay, REMINDER_USAGE};
use quipbot_ipc::OutboundMessage;
use quipbot_providers::ProviderError;
use quipbot_telegram::menu;
use rand::Rng;
use tracing::{debug, info, warn};

const MIN_DIE_SIDES: u32 = 2;
const MAX_DIE_SIDES: u32 = 1000;
const DEFAULT_DIE_SIDES: u32 = 6;
const MAX_ZONE_LEN: usize = 64;

/// Who and where an inbound event came from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Incoming<'a> {
    pub channel: &'a str,
    pub chat_id: i64,
    pub message_id: Option<i64>,
    pub user_id: &'a str,
    pub first_name: Option<&'a str>,
}

impl RuntimeState {
    pub(crate) fn send(&self, msg: OutboundMessage) {
        if let Err(e) = self.outbound.send(msg) {
            warn!("Dropping outbound message, no transport listening: {}", e);
        }
    }

    fn reply(&self, ctx: &Incoming<'_>, text: impl Into<String>) {
        self.send(OutboundMessage::text(ctx.channel, ctx.chat_id, text));
    }

    fn chat_action(&self, ctx: &Incoming<'_>, action: &str) {
        self.send(OutboundMessage::chat_action(ctx.channel, ctx.chat_id, action));
    }

    async fn record(&self, user_id: &str, action: &str) {
        let count = self.storage.lock().await.record_stat(user_id, action);
        debug!(user_id, action, count, "Stat recorded");
    }
}

fn provider_failed(command: Command, err: &ProviderError) {
    warn!(
        command = command.name(),
        provider = err.provider(),
        "Provider call failed: {}",
        err
    );
}

pub(crate) async fn handle_text(
    state: &RuntimeState,
    ctx: &Incoming<'_>,
    text: &str,
) -> Result<()> {
    match state.router.route(text) {
        Route::Command { command, args } => {
            debug!(command = command.name(), chat_id = ctx.chat_id, "Dispatching command");
            dispatch(state, ctx, command, args.as_deref()).await
        }
        Route::Echo(text) => {
            state.reply(ctx, format!("You said: {}", text));
            Ok(())
        }
        Route::Ignored => Ok(()),
    }
}

async fn dispatch(
    state: &RuntimeState,
    ctx: &Incoming<'_>,
    command: Command,
    args: Option<&str>,
) -> Result<()> {
    match command {
        Command::Start => start(state, ctx),
        Command::Help => state.reply(ctx, menu::help_text()),
        Command::Info => state.reply(ctx, menu::info_text(&state.bot_name)),
        Command::Joke => joke(state, ctx).await,
        Command::Weather => weather(state, ctx, args).await,
        Command::Cat => animal(state, ctx, Command::Cat).await,
        Command::Dog => animal(state, ctx, Command::Dog).await,
        Command::Time => {
            let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            state.reply(ctx, format!("Current server time is: {}", now));
        }
        Command::Quote => quote(state, ctx).await,
        Command::Quiz => quiz(state, ctx).await?,
        Command::Qr => qr(state, ctx, args).await,
        Command::Shorten => shorten(state, ctx, args).await,
        Command::Timezone => timezone(state, ctx, args).await,
        Command::Remind => remind(state, ctx, args).await,
        Command::Calc => calculate(state, ctx, args).await,
        Command::Note => note(state, ctx, args).await,
        Command::Notes => notes(state, ctx).await,
        Command::Stats => stats(state, ctx).await,
        Command::Roll => roll(state, ctx, args).await,
        Command::Flip => flip(state, ctx).await,
    }
    Ok(())
}

fn start(state: &RuntimeState, ctx: &Incoming<'_>) {
    let first_name = ctx.first_name.unwrap_or("there");
    let (text, keyboard) = menu::start_menu(first_name, &state.bot_name);
    state.send(OutboundMessage::text(ctx.channel, ctx.chat_id, text).with_keyboard(keyboard));
}

async fn joke(state: &RuntimeState, ctx: &Incoming<'_>) {
    state.chat_action(ctx, "typing");
    match state.provider.joke().await {
        Ok(joke) => {
            state.record(ctx.user_id, "jokes").await;
            state.reply(ctx, format!("{}\n\n{}", joke.setup, joke.punchline));
        }
        Err(e) => {
            provider_failed(Command::Joke, &e);
            state.reply(
                ctx,
                "Sorry, I couldn't fetch a joke right now. Please try again later.",
            );
        }
    }
}

async fn weather(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(city) = args else {
        state.reply(ctx, "Please provide a city name. Usage: /weather <city>");
        return;
    };

    state.chat_action(ctx, "typing");
    match state.provider.weather(city).await {
        Ok(w) => {
            state.record(ctx.user_id, "weather_checks").await;
            state.reply(
                ctx,
                format!(
                    "Weather in {}:\nTemperature: {}°C\nCondition: {}\nHumidity: {}%\nWind Speed: {} km/h",
                    w.city, w.temp_c, w.condition, w.humidity, w.wind_kmph
                ),
            );
        }
        Err(ProviderError::NotFound { .. }) => {
            state.reply(ctx, format!("Sorry, I couldn't find a city called '{}'.", city));
        }
        Err(e) => {
            provider_failed(Command::Weather, &e);
            state.reply(ctx, "Sorry, I couldn't fetch the weather data at the moment.");
        }
    }
}

async fn animal(state: &RuntimeState, ctx: &Incoming<'_>, command: Command) {
    let (animal, stat) = match command {
        Command::Dog => ("dog", "dog_pictures"),
        _ => ("cat", "cat_pictures"),
    };

    state.chat_action(ctx, "upload_photo");
    let result = match command {
        Command::Dog => state.provider.dog_image().await,
        _ => state.provider.cat_image().await,
    };

    match result {
        Ok(Some(url)) => {
            state.record(ctx.user_id, stat).await;
            state.send(OutboundMessage::photo(
                ctx.channel,
                ctx.chat_id,
                url,
                format!("Here's a cute {} for you!", animal),
            ));
        }
        Ok(None) => {
            state.reply(ctx, format!("Sorry, I couldn't fetch a {} image right now.", animal));
        }
        Err(e) => {
            provider_failed(command, &e);
            state.reply(
                ctx,
                format!("Sorry, I couldn't fetch a {} image at the moment.", animal),
            );
        }
    }
}

async fn quote(state: &RuntimeState, ctx: &Incoming<'_>) {
    state.chat_action(ctx, "typing");
    match state.provider.quote().await {
        Ok(quote) => {
            state.record(ctx.user_id, "quotes").await;
            state.reply(ctx, format!("\"{}\" - {}", quote.text, quote.author));
        }
        Err(e) => {
            provider_failed(Command::Quote, &e);
            state.reply(ctx, "Sorry, I couldn't fetch a quote right now.");
        }
    }
}

async fn quiz(state: &RuntimeState, ctx: &Incoming<'_>) -> Result<()> {
    state.chat_action(ctx, "typing");
    let trivia = match state.provider.trivia().await {
        Ok(trivia) => trivia,
        Err(e) => {
            provider_failed(Command::Quiz, &e);
            state.reply(ctx, "Sorry, I couldn't fetch a trivia question right now.");
            return Ok(());
        }
    };

    let options = {
        let mut rng = rand::thread_rng();
        shuffle_options(&trivia.correct_answer, &trivia.incorrect_answers, &mut rng)
    };
    let keyboard = {
        let mut quizzes = state.quizzes.lock().await;
        let quiz_id = quizzes.open(ctx.chat_id, &trivia.question, &trivia.correct_answer);
        match quiz_keyboard(ctx.chat_id, quiz_id, &options) {
            Ok(keyboard) => keyboard,
            Err(e) => {
                quizzes.resolve_quiz(ctx.chat_id, quiz_id);
                return Err(e.into());
            }
        }
    };
    state.record(ctx.user_id, "quizzes").await;

    let text = render_question(&trivia.category, &trivia.difficulty, &trivia.question);
    state.send(OutboundMessage::text(ctx.channel, ctx.chat_id, text).with_keyboard(keyboard));
    Ok(())
}

async fn qr(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(data) = args else {
        state.reply(ctx, "Please provide text to encode. Usage: /qr <text>");
        return;
    };

    let url = state.provider.qr_image_url(data);
    state.record(ctx.user_id, "qr_codes").await;
    state.send(OutboundMessage::photo(
        ctx.channel,
        ctx.chat_id,
        url,
        "Here's your QR code!",
    ));
}

fn is_http_url(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

async fn shorten(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(link) = args.filter(|link| is_http_url(link)) else {
        state.reply(ctx, "Please provide a valid http(s) URL. Usage: /shorten <url>");
        return;
    };

    state.chat_action(ctx, "typing");
    match state.provider.shorten(link).await {
        Ok(short) => {
            state.record(ctx.user_id, "links_shortened").await;
            state.reply(ctx, format!("🔗 Short link: {}", short));
        }
        Err(e) => {
            provider_failed(Command::Shorten, &e);
            state.reply(ctx, "Sorry, I couldn't shorten that link right now.");
        }
    }
}

fn is_valid_zone(zone: &str) -> bool {
    !zone.is_empty()
        && zone.len() <= MAX_ZONE_LEN
        && !zone.starts_with('/')
        && !zone.contains("..")
        && zone
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'))
}

async fn timezone(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(zone) = args.filter(|zone| is_valid_zone(zone)) else {
        state.reply(
            ctx,
            "Please provide a timezone. Usage: /timezone <Area/City> (e.g. Europe/Rome)",
        );
        return;
    };

    state.chat_action(ctx, "typing");
    match state.provider.timezone(zone).await {
        Ok(info) => {
            state.record(ctx.user_id, "timezone_lookups").await;
            let local_time = chrono::DateTime::parse_from_rfc3339(&info.datetime)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|_| info.datetime.clone());
            let mut text = format!(
                "🕒 Time in {}: {}\nUTC offset: {}",
                info.timezone, local_time, info.utc_offset
            );
            if !info.abbreviation.is_empty() {
                text.push_str(&format!("\nAbbreviation: {}", info.abbreviation));
            }
            state.reply(ctx, text);
        }
        Err(ProviderError::NotFound { .. }) => {
            state.reply(ctx, format!("Unknown timezone '{}'. Try something like Europe/Rome.", zone));
        }
        Err(e) => {
            provider_failed(Command::Timezone, &e);
            state.reply(ctx, "Sorry, I couldn't look up that timezone right now.");
        }
    }
}

async fn remind(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(args) = args else {
        state.reply(ctx, REMINDER_USAGE);
        return;
    };

    match state.reminder_parser.parse(args) {
        Ok(request) => {
            let handle = state
                .reminders
                .schedule(ctx.channel, ctx.chat_id, &request.text, request.delay);
            info!(reminder_id = handle.id(), chat_id = ctx.chat_id, "Reminder accepted");
            state.record(ctx.user_id, "reminders").await;
            state.reply(
                ctx,
                format!(
                    "⏰ Reminder set! I'll remind you in {}.",
                    describe_delay(request.delay)
                ),
            );
        }
        Err(e) => state.reply(ctx, format!("⚠️ {}\n\n{}", e, REMINDER_USAGE)),
    }
}

async fn calculate(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(expression) = args else {
        state.reply(ctx, "Usage: /calc <expression>, e.g. /calc (2 + 3) * 4");
        return;
    };

    match calc::evaluate(expression) {
        Ok(value) => {
            state.record(ctx.user_id, "calculations").await;
            state.reply(
                ctx,
                format!("🧮 {} = {}", expression, calc::format_number(value)),
            );
        }
        Err(e) => state.reply(ctx, format!("⚠️ Cannot evaluate: {}", e)),
    }
}

async fn note(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(text) = args else {
        state.reply(ctx, "Usage: /note <text>");
        return;
    };

    let count = {
        let mut storage = state.storage.lock().await;
        let count = storage.add_note(ctx.user_id, text);
        storage.record_stat(ctx.user_id, "notes");
        count
    };
    state.reply(
        ctx,
        format!("📝 Note saved! You have {} note(s).", count),
    );
}

async fn notes(state: &RuntimeState, ctx: &Incoming<'_>) {
    let text = {
        let storage = state.storage.lock().await;
        let notes = storage.get_notes(ctx.user_id);
        if notes.is_empty() {
            "You have no notes yet. Add one with /note <text>.".to_string()
        } else {
            let mut lines = vec!["📒 Your notes:".to_string(), String::new()];
            for (i, note) in notes.iter().enumerate() {
                lines.push(format!(
                    "{}. {} ({})",
                    i + 1,
                    note.text,
                    note.created_at.format("%Y-%m-%d %H:%M UTC")
                ));
            }
            lines.join("\n")
        }
    };
    state.reply(ctx, text);
}

async fn stats(state: &RuntimeState, ctx: &Incoming<'_>) {
    let text = {
        let storage = state.storage.lock().await;
        match storage.get_stats(ctx.user_id) {
            Some(stats) => {
                let mut lines = vec!["📊 Your stats:".to_string(), String::new()];
                lines.extend(
                    stats
                        .iter()
                        .map(|(action, count)| format!("• {}: {}", action, count)),
                );
                lines.join("\n")
            }
            None => "No stats yet. Try some commands!".to_string(),
        }
    };
    state.reply(ctx, text);
}

fn parse_sides(args: Option<&str>) -> Option<u32> {
    match args {
        None => Some(DEFAULT_DIE_SIDES),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .filter(|sides| (MIN_DIE_SIDES..=MAX_DIE_SIDES).contains(sides)),
    }
}

async fn roll(state: &RuntimeState, ctx: &Incoming<'_>, args: Option<&str>) {
    let Some(sides) = parse_sides(args) else {
        state.reply(
            ctx,
            format!(
                "Please choose between {} and {} sides. Usage: /roll [sides]",
                MIN_DIE_SIDES, MAX_DIE_SIDES
            ),
        );
        return;
    };

    let value = rand::thread_rng().gen_range(1..=sides);
    state.record(ctx.user_id, "dice_rolls").await;
    state.reply(ctx, format!("🎲 You rolled a {} (1-{})", value, sides));
}

async fn flip(state: &RuntimeState, ctx: &Incoming<'_>) {
    let heads = rand::thread_rng().gen_bool(0.5);
    state.record(ctx.user_id, "coin_flips").await;
    state.reply(ctx, if heads { "🪙 Heads!" } else { "🪙 Tails!" });
}

/// Resolves a button press and acknowledges it exactly once.
pub(crate) async fn handle_callback(
    state: &RuntimeState,
    ctx: &Incoming<'_>,
    query_id: &str,
    data: &str,
) -> Result<()> {
    let outcome = {
        let mut quizzes = state.quizzes.lock().await;
        resolve_callback(data, ctx.chat_id, &mut quizzes, &state.bot_name)
    };
    debug!(chat_id = ctx.chat_id, ?outcome, "Callback resolved");

    if let Some(action) = outcome.stat_action() {
        state.record(ctx.user_id, action).await;
    }

    state.send(OutboundMessage::callback_ack(
        ctx.channel,
        ctx.chat_id,
        query_id,
        outcome.toast(),
    ));

    let reply = OutboundMessage::text(ctx.channel, ctx.chat_id, outcome.reply_text());
    match ctx.message_id {
        // Rewriting the question drops its keyboard.
        Some(message_id) if outcome.is_answer() => state.send(reply.editing(message_id)),
        _ => state.send(reply),
    }
    Ok(())
}
