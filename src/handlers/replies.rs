use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};
use tracing::warn;

use crate::db::models::Feature;

pub fn quota_exceeded_text(feature: Feature) -> String {
    format!(
        "⚠️ You have reached your daily limit for {}. Try again tomorrow.",
        feature.display_name()
    )
}

pub fn wait_notice_text(feature: Feature) -> &'static str {
    match feature {
        Feature::GenerateImage => {
            "⏳*Please wait and avoid any input*⏳\n\nVelixGen is generating your image..."
        }
        Feature::AnalyzeImage => {
            "⏳*Please wait and avoid any input*⏳\n\nVelixVision is generating your analyze..."
        }
        Feature::GenerateCode => {
            "We got your request. CodeMorph is generating your code,\n\n⏳*please wait and avoid making any input during this process.*⏳"
        }
    }
}

/// The returned id is the handle for retracting the notice once the result
/// (or failure) lands.
#[allow(deprecated)]
pub async fn send_wait_notice(bot: &Bot, chat_id: ChatId, feature: Feature) -> Option<MessageId> {
    match bot
        .send_message(chat_id, wait_notice_text(feature))
        .parse_mode(ParseMode::Markdown)
        .await
    {
        Ok(message) => Some(message.id),
        Err(err) => {
            warn!("Failed to send wait notice: {err}");
            None
        }
    }
}

pub async fn retract_notice(bot: &Bot, chat_id: ChatId, notice: Option<MessageId>) {
    if let Some(message_id) = notice {
        if let Err(err) = bot.delete_message(chat_id, message_id).await {
            warn!("Failed to delete wait notice: {err}");
        }
    }
}

pub async fn send_quota_exceeded(bot: &Bot, chat_id: ChatId, feature: Feature) {
    if let Err(err) = bot.send_message(chat_id, quota_exceeded_text(feature)).await {
        warn!("Failed to send quota message: {err}");
    }
}
