use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tgflow::{ActionContext, Bot, BotBuilder, Config};

/// Where the demo wizard keeps finished sign-ups.
#[derive(Default)]
struct Signups {
    names: std::sync::Mutex<Vec<String>>,
}

/// Entered through `/start`: ask for the name and wait on the next node.
async fn start(mut ctx: ActionContext) -> Result<()> {
    if !ctx.entered_by_command() {
        ctx.send_message("Send /start to sign up or /help for commands.")
            .await?;
        return Ok(());
    }
    ctx.next_state();
    ctx.send_message("Welcome! What is your name?").await?;
    Ok(())
}

async fn ask_name(mut ctx: ActionContext) -> Result<()> {
    let name = ctx.text().unwrap_or_default().trim().to_string();
    if name.is_empty() {
        ctx.send_message("Please send your name as text.").await?;
        return Ok(());
    }
    if let Some(signups) = ctx.dep::<Signups>() {
        signups
            .names
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(name.clone());
    }
    ctx.next_state();
    ctx.send_message(format!("Nice to meet you, {name}. Pick a plan: 1 or 2"))
        .await?;
    Ok(())
}

async fn pick_plan(mut ctx: ActionContext) -> Result<()> {
    if ctx.next_state() {
        let plan = ctx.current_state().name().to_string();
        ctx.send_message(format!("You chose the {plan} plan. Send /start to begin again."))
            .await?;
    } else {
        ctx.send_message("Answer 1 or 2.").await?;
    }
    Ok(())
}

async fn done(ctx: ActionContext) -> Result<()> {
    ctx.send_message("You are signed up. Send /start to begin again.")
        .await?;
    Ok(())
}

async fn help(ctx: ActionContext) -> Result<()> {
    let state = ctx.current_state().name().to_string();
    ctx.send_message(format!(
        "/start - sign up\n/help - this message\n(you are at '{state}')"
    ))
    .await?;
    Ok(())
}

fn sign_up_bot(mut builder: BotBuilder) -> Result<Bot> {
    let welcome = builder.add_node("welcome", None, start);
    let name = builder.add_node("name", None, ask_name);
    let plan = builder.add_node("plan", None, pick_plan);
    let basic = builder.add_node("basic", Some("1"), done);
    let premium = builder.add_node("premium", Some("2"), done);
    builder.add_child(welcome, name)?;
    builder.add_child(name, plan)?;
    builder.add_child(plan, basic)?;
    builder.add_child(plan, premium)?;
    builder
        .command("/start", welcome)
        .handler("/help", help)
        .provide(Signups::default());

    Ok(builder.build(welcome, welcome)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tgflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  API: {}", config.telegram.api_url);
    info!(
        "  Polling: limit {}, timeout {}s, retry {}s",
        config.polling.limit, config.polling.timeout_secs, config.polling.retry_delay_secs
    );
    info!("  First contact: {:?}", config.conversation.first_contact);

    // Build the conversation
    let bot = sign_up_bot(BotBuilder::from_config(&config)?)?;

    match bot.get_me().await {
        Ok(me) => info!(
            "Running as @{} ({})",
            me.username.as_deref().unwrap_or("unknown"),
            me.id.0
        ),
        Err(e) => warn!("getMe failed: {}", e),
    }
    if let Err(e) = bot.delete_webhook().await {
        warn!("deleteWebhook failed: {}", e);
    }

    let cancel = bot.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            cancel.cancel();
        }
    });

    info!("Bot is starting...");
    bot.run().await;

    Ok(())
}
