//! Quipbot Core
//!
//! Runtime orchestration: routes inbound envelopes to command handlers,
//! resolves inline-button callbacks and owns the process-wide state.

pub mod calc;
pub mod callbacks;
mod handlers;
pub mod quiz;
pub mod router;

use anyhow::Result;
use handlers::Incoming;
use quipbot_config::Config;
use quipbot_cron::{ReminderParser, ReminderScheduler};
use quipbot_ipc::{Envelope, EventBus, MessageKind, OutboundMessage};
use quipbot_providers::{ContentProvider, Endpoints, HttpContentProvider};
use quipbot_storage::{QuizRegistry, Storage};
use router::CommandRouter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

const MAX_INBOUND_CONCURRENCY: usize = 8;
const QUIZ_PURGE_INTERVAL_SECS: u64 = 60;

const SCOPE_PRUNE_THRESHOLD: usize = 64;

/// Completion signal of the latest event seen per conversation.
type ScopeTails = HashMap<String, oneshot::Receiver<()>>;

/// Forgets conversations whose latest event already finished.
fn prune_idle_scopes(scope_tails: &mut ScopeTails) -> usize {
    let before = scope_tails.len();
    scope_tails.retain(|_, tail| {
        matches!(tail.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    });
    let pruned = before - scope_tails.len();
    if pruned > 0 {
        debug!("Pruned {} idle conversation scope(s)", pruned);
    }
    pruned
}

/// Everything a handler touches, cheap to clone into each worker task.
#[derive(Clone)]
pub struct RuntimeState {
    outbound: broadcast::Sender<OutboundMessage>,
    provider: Arc<dyn ContentProvider>,
    storage: Arc<Mutex<Storage>>,
    quizzes: Arc<Mutex<QuizRegistry>>,
    reminders: Arc<ReminderScheduler>,
    reminder_parser: Arc<ReminderParser>,
    router: Arc<CommandRouter>,
    bot_name: Arc<str>,
}

impl RuntimeState {
    pub fn new(
        config: &Config,
        provider: Arc<dyn ContentProvider>,
        outbound: broadcast::Sender<OutboundMessage>,
    ) -> Result<Self> {
        let bot_username = config.telegram.as_ref().and_then(|t| t.bot_username());

        Ok(Self {
            reminders: Arc::new(ReminderScheduler::new(outbound.clone())),
            outbound,
            provider,
            storage: Arc::new(Mutex::new(Storage::new())),
            quizzes: Arc::new(Mutex::new(QuizRegistry::new(Duration::from_secs(
                config.quiz.ttl_secs,
            )))),
            reminder_parser: Arc::new(ReminderParser::new()?),
            router: Arc::new(CommandRouter::new(
                config.commands.case_insensitive,
                bot_username,
            )),
            bot_name: Arc::from(config.core.bot_name()),
        })
    }

    pub fn storage(&self) -> &Arc<Mutex<Storage>> {
        &self.storage
    }

    pub fn quizzes(&self) -> &Arc<Mutex<QuizRegistry>> {
        &self.quizzes
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }
}

pub fn endpoints_from_config(config: &Config) -> Endpoints {
    let providers = &config.providers;
    let mut endpoints = Endpoints::default();
    let overrides = [
        (&mut endpoints.joke, &providers.joke_url),
        (&mut endpoints.weather, &providers.weather_url),
        (&mut endpoints.quote, &providers.quote_url),
        (&mut endpoints.cat, &providers.cat_url),
        (&mut endpoints.dog, &providers.dog_url),
        (&mut endpoints.trivia, &providers.trivia_url),
        (&mut endpoints.qr, &providers.qr_url),
        (&mut endpoints.shorten, &providers.shorten_url),
        (&mut endpoints.timezone, &providers.timezone_url),
    ];
    for (slot, value) in overrides {
        if let Some(url) = value.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            *slot = url.to_string();
        }
    }
    endpoints
}

pub struct QuipbotRuntime {
    config: Config,
    event_bus: EventBus,
    state: RuntimeState,
}

impl QuipbotRuntime {
    pub fn new(config: Config) -> Result<Self> {
        let provider = HttpContentProvider::new(
            endpoints_from_config(&config),
            Duration::from_secs(config.providers.timeout_secs),
        )?;
        Self::with_provider(config, Arc::new(provider))
    }

    pub fn with_provider(config: Config, provider: Arc<dyn ContentProvider>) -> Result<Self> {
        let event_bus = EventBus::new();
        let state = RuntimeState::new(&config, provider, event_bus.outbound_sender())?;
        Ok(Self {
            config,
            event_bus,
            state,
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    pub async fn run(&self) -> Result<()> {
        info!(bot = %self.state.bot_name, "Quipbot runtime starting...");

        // Subscribe before any adapter can publish so nothing is missed.
        let inbound_rx = self.event_bus.subscribe();
        self.start_telegram_adapter()?;
        let processor = tokio::spawn(Self::process_events(inbound_rx, self.state.clone()));

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut purge_interval =
            tokio::time::interval(Duration::from_secs(QUIZ_PURGE_INTERVAL_SECS));

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    if let Err(e) = result {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutdown requested");
                    break;
                }
                _ = purge_interval.tick() => {
                    let purged = self.state.quizzes.lock().await.purge_expired(Instant::now());
                    if purged > 0 {
                        debug!("Purged {} expired quiz(zes)", purged);
                    }
                }
            }
        }

        processor.abort();
        self.state.reminders.cancel_all();
        info!("Quipbot runtime stopped");
        Ok(())
    }

    fn start_telegram_adapter(&self) -> Result<()> {
        let Some(telegram_config) = &self.config.telegram else {
            anyhow::bail!(
                "no [telegram] section configured (set bot_token or {})",
                quipbot_config::TELEGRAM_TOKEN_ENV
            );
        };

        let adapter = Arc::new(
            quipbot_telegram::TelegramAdapter::new(telegram_config)?
                .with_event_bus(self.event_bus.clone()),
        );
        info!(account = %adapter.account_tag(), "Telegram adapter enabled");

        let outbound_rx = self.event_bus.outbound_subscribe();
        let adapter_for_outbound = Arc::clone(&adapter);
        tokio::spawn(async move {
            adapter_for_outbound.run_outbound_handler(outbound_rx).await;
        });

        tokio::spawn(async move {
            if let Err(e) = adapter.poll().await {
                error!("Telegram adapter failed: {}", e);
            }
        });
        Ok(())
    }

    /// One task per envelope; each waits for the previous event of its
    /// conversation before taking a worker permit.
    async fn process_events(mut inbound_rx: broadcast::Receiver<Envelope>, state: RuntimeState) {
        let mut scope_tails: ScopeTails = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(MAX_INBOUND_CONCURRENCY));

        loop {
            match inbound_rx.recv().await {
                Ok(envelope) => {
                    let state = state.clone();
                    let semaphore = Arc::clone(&semaphore);
                    let trace_id = envelope.trace_id.clone();

                    let (done_tx, done_rx) = oneshot::channel::<()>();
                    let previous = scope_tails.insert(Self::inbound_scope_key(&envelope), done_rx);
                    if scope_tails.len() > SCOPE_PRUNE_THRESHOLD {
                        prune_idle_scopes(&mut scope_tails);
                    }

                    tokio::spawn(async move {
                        if let Some(previous) = previous {
                            // Err means the predecessor task ended without signalling.
                            let _ = previous.await;
                        }

                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(err) => {
                                error!(
                                    "Inbound worker semaphore closed (trace_id={}): {}",
                                    trace_id, err
                                );
                                return;
                            }
                        };

                        if let Err(e) = Self::process_inbound(envelope, &state).await {
                            error!(
                                "Error processing inbound event (trace_id={}): {}",
                                trace_id, e
                            );
                        }
                        let _ = done_tx.send(());
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event bus closed, stopping event processor");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event bus lagged by {} events", n);
                }
            }
        }
    }

    fn inbound_scope_key(envelope: &Envelope) -> String {
        let account_tag = envelope.payload_str("account_tag").unwrap_or("default");
        match envelope.chat_id {
            Some(chat_id) => format!("{}:{}:chat:{}", envelope.channel, account_tag, chat_id),
            None => format!("{}:{}:event:{}", envelope.channel, account_tag, envelope.id),
        }
    }

    /// Handles one envelope end to end. Callers serialize per conversation.
    pub async fn process_inbound(envelope: Envelope, state: &RuntimeState) -> Result<()> {
        let Some(chat_id) = envelope.chat_id else {
            warn!(trace_id = %envelope.trace_id, "Dropping event without chat id");
            return Ok(());
        };
        let first_name = envelope.payload_str("first_name");

        match &envelope.kind {
            MessageKind::Message { from, text } => {
                let ctx = Incoming {
                    channel: &envelope.channel,
                    chat_id,
                    message_id: envelope.message_id,
                    user_id: from,
                    first_name,
                };
                handlers::handle_text(state, &ctx, text).await
            }
            MessageKind::Callback { query_id, data } => {
                let user_id = envelope
                    .payload
                    .get("from_user_id")
                    .and_then(|v| v.as_i64())
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let ctx = Incoming {
                    channel: &envelope.channel,
                    chat_id,
                    message_id: envelope.message_id,
                    user_id: &user_id,
                    first_name,
                };
                handlers::handle_callback(state, &ctx, query_id, data).await
            }
        }
    }
}
