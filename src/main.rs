use std::process::ExitCode;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use teloxide::utils::command::BotCommands;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use feedback_relay::config::{CacheBackend, Config};
use feedback_relay::error_sink::ErrorSinkLayer;
use feedback_relay::relay::{
    Delivery, IdentityCache, InboundMessage, RedisIdentityCache, RelayEngine, SnapshotIdentityCache, TelegramClient,
    spawn_persist_task,
};

struct RelayState {
    engine: RelayEngine,
    greeting: String,
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
enum Command {
    #[command(description = "Start the bot.")]
    Start,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "relay.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("relay.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            return ExitCode::FAILURE;
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(error_chat_id) = config.error_chat_id {
        registry.with(ErrorSinkLayer::new(bot.clone(), error_chat_id)).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting feedback relay...");
    info!("Loaded config from {}", config.config_path.display());
    info!("Admin chat: {}", config.admin_chat_id);

    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            error!("Failed to reach Telegram: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Authorized on account @{}", me.username());

    let shutdown = Arc::new(Notify::new());
    let mut persist_task: Option<JoinHandle<()>> = None;
    let cache: Arc<dyn IdentityCache> = match config.cache {
        CacheBackend::Redis { ref url, ref key_prefix } => match RedisIdentityCache::connect(url, key_prefix).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                error!("Failed to connect to identity store: {e}");
                return ExitCode::FAILURE;
            }
        },
        CacheBackend::Snapshot { ref path, persist_interval } => match SnapshotIdentityCache::load_or_new(path) {
            Ok(cache) => {
                let cache = Arc::new(cache);
                persist_task = Some(spawn_persist_task(cache.clone(), persist_interval, shutdown.clone()));
                info!("Persisting identities to {:?} every {:?}", path, persist_interval);
                cache
            }
            Err(e) => {
                error!("Failed to open identity snapshot {:?}: {e}", path);
                return ExitCode::FAILURE;
            }
        },
    };

    let transport = Arc::new(TelegramClient::new(bot.clone()));
    let state = Arc::new(RelayState {
        engine: RelayEngine::new(config.relay_settings(), transport, cache),
        greeting: config.greeting.clone(),
    });

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
        .branch(
            dptree::filter(|msg: Message| matches!(msg.kind, teloxide::types::MessageKind::Common(_)))
                .endpoint(handle_media),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    shutdown.notify_one();
    if let Some(task) = persist_task
        && let Err(e) = task.await
    {
        error!("Snapshot task failed: {e}");
    }
    info!("Stopped");
    ExitCode::SUCCESS
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command, state: Arc<RelayState>) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            bot.send_message(msg.chat.id, &state.greeting)
                .reply_parameters(ReplyParameters::new(msg.id))
                .await?;
        }
    }
    Ok(())
}

async fn handle_text(msg: Message, state: Arc<RelayState>) -> ResponseResult<()> {
    relay(InboundMessage::from_telegram(&msg), &state).await;
    Ok(())
}

async fn handle_media(msg: Message, state: Arc<RelayState>) -> ResponseResult<()> {
    relay(InboundMessage::from_telegram(&msg), &state).await;
    Ok(())
}

/// Relay one message. Failures only affect this message.
async fn relay(msg: InboundMessage, state: &RelayState) {
    let from = msg
        .sender
        .as_ref()
        .map(|s| s.username.as_deref().unwrap_or(&s.first_name).to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let preview: String = msg.readable().chars().take(100).collect();
    info!("📨 {:?} message {} from {} in chat {}: \"{}\"", msg.kind, msg.message_id, from, msg.chat_id, preview);

    match state.engine.handle(&msg).await {
        Ok(Delivery::ToUser { chat_id, route }) => info!("Delivered admin reply to chat {chat_id} ({route:?})"),
        Ok(Delivery::ToAdmin { route }) => info!("Relayed message {} to admin ({route:?})", msg.message_id),
        Ok(Delivery::Ignored) => debug!("Message {} not relayed", msg.message_id),
        Err(e) if e.is_resolution_failure() => {
            warn!("Admin reply {} not delivered: {e}", msg.message_id);
        }
        Err(e) => error!("Failed to relay message {} from chat {}: {e}", msg.message_id, msg.chat_id),
    }
}
