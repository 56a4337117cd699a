use std::error::Error;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod codegen;
mod config;
mod db;
mod entitlements;
mod handlers;
mod payments;
mod providers;
mod state;
mod utils;

use config::CONFIG;
use db::database::Database;
use handlers::commands;
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Velix,
    Help,
    Vg(String),
    Vs,
    Vcm,
    Upgrade(String),
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

fn caption_starts_with(message: &Message, prefix: &str) -> bool {
    message
        .caption()
        .map(|caption| caption.trim_start().starts_with(prefix))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging();

    if CONFIG.bot_token.trim().is_empty() {
        return Err("TELEGRAM_BOT_TOKEN is required".into());
    }

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!("Starting Velix AI bot");

    let db = Database::init(&CONFIG.database_url).await?;
    db.health_check().await?;
    let state = AppState::new(db);

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            dptree::filter(|msg: Message| caption_starts_with(&msg, "/vcm"))
                .endpoint(handle_code_caption),
        )
        .branch(
            dptree::filter(|msg: Message| caption_starts_with(&msg, "/vs"))
                .endpoint(handle_analyze_caption),
        )
        .endpoint(handle_unrecognized);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    fn optional_arg(arg: String) -> Option<String> {
        if arg.trim().is_empty() {
            None
        } else {
            Some(arg)
        }
    }

    match command {
        Command::Velix => commands::start_handler(bot, message).await?,
        Command::Help => commands::help_handler(bot, message).await?,
        Command::Vg(arg) => {
            let arg = optional_arg(arg);
            tokio::spawn(async move {
                if let Err(err) =
                    commands::generate_image_handler(bot, state, message, arg).await
                {
                    error!("vg handler failed: {err}");
                }
            });
        }
        Command::Vs => {
            tokio::spawn(async move {
                if let Err(err) = commands::analyze_image_handler(bot, state, message).await {
                    error!("vs handler failed: {err}");
                }
            });
        }
        Command::Vcm => {
            tokio::spawn(async move {
                if let Err(err) = commands::generate_code_handler(bot, state, message).await {
                    error!("vcm handler failed: {err}");
                }
            });
        }
        Command::Upgrade(arg) => {
            let arg = optional_arg(arg);
            tokio::spawn(async move {
                if let Err(err) = commands::upgrade_handler(bot, state, message, arg).await {
                    error!("upgrade handler failed: {err}");
                }
            });
        }
    }
    Ok(())
}

async fn handle_analyze_caption(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = commands::analyze_image_handler(bot, state, message).await {
            error!("vs caption handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_code_caption(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = commands::generate_code_handler(bot, state, message).await {
            error!("vcm caption handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_callback_query(bot: Bot, query: CallbackQuery) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = commands::callback_handler(bot, query).await {
            error!("callback handler failed: {err}");
        }
    });
    Ok(())
}

async fn handle_unrecognized(bot: Bot, message: Message) -> HandlerResult {
    commands::unrecognized_handler(bot, message).await?;
    Ok(())
}
