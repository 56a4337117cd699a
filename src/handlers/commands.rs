use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};
use tracing::{error, warn};
use url::Url;

use crate::codegen::bridge::submit_job;
use crate::codegen::protocol::GeneratePayload;
use crate::codegen::session::JobRequest;
use crate::config::CONFIG;
use crate::db::models::Feature;
use crate::entitlements::meter;
use crate::handlers::keyboard::{start_keyboard, welcome_text, CallbackCommand};
use crate::handlers::media::{download_media, get_file_url, has_image_attachment, image_file_id};
use crate::handlers::replies::{retract_notice, send_quota_exceeded, send_wait_notice};
use crate::providers::{image_gen, vision};
use crate::state::AppState;

fn message_user_id(message: &Message) -> Option<i64> {
    message
        .from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
}

/// Find-or-create the entitlement row and pin it in the cache. Must run
/// before the meter gate in the same request; the meter denies on a miss.
async fn bootstrap_entitlement(state: &AppState, user_id: i64) -> Result<()> {
    state.entitlements.ensure_loaded(&state.db, user_id).await?;
    Ok(())
}

/// Quota gate shared by the direct-provider features. Returns true when
/// the request may proceed; store errors deny and are logged, never
/// surfaced as an allow.
async fn gate_quota(bot: &Bot, state: &AppState, message: &Message, feature: Feature) -> bool {
    let Some(user_id) = message_user_id(message) else {
        return false;
    };

    if let Err(err) = bootstrap_entitlement(state, user_id).await {
        error!(user_id, "Entitlement bootstrap failed: {err}");
        let _ = bot
            .send_message(
                message.chat.id,
                "❌ Velix Engine is having trouble right now. Please try again later.",
            )
            .await;
        return false;
    }

    match meter::check_and_consume(&state.db, &state.entitlements, user_id, feature).await {
        Ok(true) => true,
        Ok(false) => {
            send_quota_exceeded(bot, message.chat.id, feature).await;
            false
        }
        Err(err) => {
            error!(user_id, feature = feature.as_str(), "Usage meter failed: {err}");
            let _ = bot
                .send_message(
                    message.chat.id,
                    "❌ Velix Engine is having trouble right now. Please try again later.",
                )
                .await;
            false
        }
    }
}

#[allow(deprecated)]
pub async fn start_handler(bot: Bot, message: Message) -> Result<()> {
    let first_name = message
        .from
        .as_ref()
        .map(|user| user.first_name.clone())
        .unwrap_or_else(|| "there".to_string());

    let video = InputFile::url(Url::parse(&CONFIG.welcome_video_url)?);
    bot.send_video(message.chat.id, video)
        .caption(welcome_text(&first_name))
        .parse_mode(ParseMode::Markdown)
        .reply_markup(start_keyboard()?)
        .await?;
    Ok(())
}

#[allow(deprecated)]
pub async fn help_handler(bot: Bot, message: Message) -> Result<()> {
    let text = format!(
        "{}\n\n{}\n\n{}\n\n*Premium* - /upgrade\nSend /upgrade followed by your payment transaction hash to unlock {} daily uses per feature.",
        CallbackCommand::VelixGen.instruction_text(),
        CallbackCommand::VelixVision.instruction_text(),
        CallbackCommand::CodeMorph.instruction_text(),
        CONFIG.premium_daily_limit,
    );
    bot.send_message(message.chat.id, text)
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}

#[allow(deprecated)]
pub async fn generate_image_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    prompt: Option<String>,
) -> Result<()> {
    let prompt = prompt.map(|value| value.trim().to_string()).unwrap_or_default();
    if prompt.is_empty() {
        bot.send_message(
            message.chat.id,
            "*Please add your prompt after /vg*\n\nExample: `/vg astronaut riding a horse`",
        )
        .parse_mode(ParseMode::Markdown)
        .await?;
        return Ok(());
    }

    if !gate_quota(&bot, &state, &message, Feature::GenerateImage).await {
        return Ok(());
    }

    let notice = send_wait_notice(&bot, message.chat.id, Feature::GenerateImage).await;

    match image_gen::generate_image(&prompt).await {
        Ok(image_url) => {
            bot.send_photo(message.chat.id, InputFile::url(Url::parse(&image_url)?))
                .caption("🖼️ *VelixGen Result*")
                .parse_mode(ParseMode::Markdown)
                .await?;
            retract_notice(&bot, message.chat.id, notice).await;
        }
        Err(err) => {
            warn!("Image generation failed: {err}");
            retract_notice(&bot, message.chat.id, notice).await;
            bot.send_message(
                message.chat.id,
                "⚠️ *Velix Engine rejected this prompt due to safety restrictions, Please try a different prompt.*",
            )
            .parse_mode(ParseMode::Markdown)
            .await?;
        }
    }

    Ok(())
}

#[allow(deprecated)]
pub async fn analyze_image_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(file_id) = image_file_id(&message) else {
        bot.send_message(message.chat.id, "👁️ Please send an image to analyze")
            .await?;
        return Ok(());
    };

    if !gate_quota(&bot, &state, &message, Feature::AnalyzeImage).await {
        return Ok(());
    }

    let notice = send_wait_notice(&bot, message.chat.id, Feature::AnalyzeImage).await;

    let result = async {
        let (file_url, _path) = get_file_url(&bot, &file_id).await?;
        vision::analyze_image(&file_url).await
    }
    .await;

    match result {
        Ok(analysis) => {
            retract_notice(&bot, message.chat.id, notice).await;
            bot.send_message(
                message.chat.id,
                format!("👁️*VelixVision Result:*\n\n{analysis}"),
            )
            .parse_mode(ParseMode::Markdown)
            .await?;
        }
        Err(err) => {
            warn!("Image analysis failed: {err}");
            retract_notice(&bot, message.chat.id, notice).await;
            bot.send_message(
                message.chat.id,
                "❌ Velix Engine failed to analyze this image. Try again with a clearer one.",
            )
            .await?;
        }
    }

    Ok(())
}

/// Image-to-code. The quota is deliberately not consumed here: the job
/// bridge charges it when the backend confirms it started generating.
pub async fn generate_code_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user_id) = message_user_id(&message) else {
        return Ok(());
    };

    if let Some(document) = message.document() {
        let is_image = document
            .mime_type
            .as_ref()
            .map(|mime| mime.essence_str().starts_with("image/"))
            .unwrap_or(false);
        if !is_image {
            bot.send_message(
                message.chat.id,
                "Invalid format file type, file type must be image",
            )
            .await?;
            return Ok(());
        }
    }

    if has_image_attachment(&message) {
        let caption_ok = message
            .caption()
            .map(|caption| caption.trim_start().starts_with("/vcm"))
            .unwrap_or(false);
        if !caption_ok {
            bot.send_message(message.chat.id, "Image must be with caption /vcm")
                .await?;
            return Ok(());
        }
    }

    let Some(file_id) = image_file_id(&message) else {
        bot.send_message(
            message.chat.id,
            "💻 Please send a photo of your UI / Design to generate into a code",
        )
        .await?;
        return Ok(());
    };

    // Entitlement must be resident before the bridge's mid-stream quota
    // check; the meter fails closed on a cache miss.
    if let Err(err) = bootstrap_entitlement(&state, user_id).await {
        error!(user_id, "Entitlement bootstrap failed: {err}");
        bot.send_message(
            message.chat.id,
            "❌ Velix Engine is having trouble right now. Please try again later.",
        )
        .await?;
        return Ok(());
    }

    let (file_url, file_path) = get_file_url(&bot, &file_id).await?;
    let Some(bytes) = download_media(&file_url).await else {
        bot.send_message(
            message.chat.id,
            "❌ Couldn't download that image from Telegram. Please try again.",
        )
        .await?;
        return Ok(());
    };

    let data_uri = crate::handlers::media::to_data_uri(&bytes, &file_path);
    let job = JobRequest {
        chat_id: message.chat.id,
        payload: GeneratePayload::create(data_uri),
    };

    if let Err(err) = submit_job(&bot, &state, user_id, job).await {
        warn!(user_id, "Job submission failed: {err}");
        bot.send_message(
            message.chat.id,
            "❌ CodeMorph couldn't take this request. Please send your design again.",
        )
        .await?;
    }

    Ok(())
}

pub async fn upgrade_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    reference: Option<String>,
) -> Result<()> {
    let Some(user_id) = message_user_id(&message) else {
        return Ok(());
    };

    let reference = reference.map(|value| value.trim().to_string()).unwrap_or_default();
    if reference.is_empty() {
        bot.send_message(
            message.chat.id,
            format!(
                "💎 To unlock premium ({} daily uses per feature), send {} to the Velix treasury and reply with:\n/upgrade <transaction hash or explorer link>",
                CONFIG.premium_daily_limit, CONFIG.premium_threshold
            ),
        )
        .await?;
        return Ok(());
    }

    if let Err(err) = bootstrap_entitlement(&state, user_id).await {
        error!(user_id, "Entitlement bootstrap failed: {err}");
        bot.send_message(
            message.chat.id,
            "❌ Velix Engine is having trouble right now. Please try again later.",
        )
        .await?;
        return Ok(());
    }

    match crate::payments::verifier::verify_and_upgrade(
        &state.db,
        &state.entitlements,
        user_id,
        &reference,
    )
    .await
    {
        Ok(confirmation) => {
            bot.send_message(
                message.chat.id,
                format!(
                    "🌟 Premium unlocked! You now have {} daily uses per feature (valid until {}).",
                    confirmation.new_daily_limit,
                    confirmation.valid_until.format("%Y-%m-%d")
                ),
            )
            .await?;
        }
        Err(err) => {
            warn!(user_id, "Payment verification failed: {err}");
            bot.send_message(message.chat.id, err.user_message()).await?;
        }
    }

    Ok(())
}

#[allow(deprecated)]
pub async fn callback_handler(bot: Bot, query: CallbackQuery) -> Result<()> {
    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    let Some(command) = CallbackCommand::decode(data) else {
        warn!("Unrecognized callback payload: {data}");
        bot.answer_callback_query(query.id).await?;
        return Ok(());
    };

    bot.answer_callback_query(query.id.clone()).await?;
    if let Some(message) = query.message.as_ref() {
        bot.send_message(message.chat().id, command.instruction_text())
            .parse_mode(ParseMode::Markdown)
            .await?;
    }
    Ok(())
}

#[allow(deprecated)]
pub async fn unrecognized_handler(bot: Bot, message: Message) -> Result<()> {
    bot.send_message(
        message.chat.id,
        "⚠️*Velix AI didn't recognize that input*⚠️\n\nPlease try using one of the available features in the bot.",
    )
    .parse_mode(ParseMode::Markdown)
    .await?;
    Ok(())
}
