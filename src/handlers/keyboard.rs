use anyhow::Result;
use serde::{Deserialize, Serialize};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use url::Url;

/// Commands carried in inline-keyboard callback data. Encoded as JSON so
/// old buttons keep working across releases; decoding is exhaustive and
/// anything unrecognized is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CallbackCommand {
    VelixGen,
    VelixVision,
    CodeMorph,
}

impl CallbackCommand {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }

    pub fn instruction_text(&self) -> &'static str {
        match self {
            CallbackCommand::VelixGen => {
                "*VelixGen* - Text to Image\nCommand: /vg\nInstructions: Type /vg followed by your prompt.\nExample: \"`/vg astronaut riding a horse`\"\nVelixGen turns your text into visuals - mockups, icons, or whatever you imagine."
            }
            CallbackCommand::VelixVision => {
                "*VelixVision* - Image to Text Analysis\nCommand: /vs\nInstructions: Upload any Image/UI layout & type \"/vs\" in the image caption.\nVelixVision will analyze the structure & generate smart metadata for your workflows."
            }
            CallbackCommand::CodeMorph => {
                "*CodeMorph* - Image to Code\nCommand: /vcm\nInstructions: Upload your image or design screenshot and type \"/vcm\" on image caption.\nSit back and relax while our bot generates the code for you."
            }
        }
    }
}

pub fn welcome_text(first_name: &str) -> String {
    format!(
        "Hello {first_name} 👋\n\
         *Welcome to Velix AI 🌟* - The Visual Intelligence Layer for Builders.\n\n\
         Here's what I can do for you:\n\n\
         *VelixGen™*\n\
         Turn prompts into stunning visuals - logos, UI mockups, diagrams & more.\n\n\
         *VelixVision™*\n\
         Understand layouts and elements from images - detect structure, roles, and visual metadata.\n\n\
         *CodeMorph™*\n\
         Drop in a UI screenshot. Get back clean, production ready HTML/React/Tailwind code instantly.\n\n\
         📩 More info? Contact us: [build@velixlabs.dev](mailto:build@velixlabs.dev)"
    )
}

pub fn start_keyboard() -> Result<InlineKeyboardMarkup> {
    let rows = vec![
        vec![InlineKeyboardButton::callback(
            "CodeMorph 💻",
            CallbackCommand::CodeMorph.encode(),
        )],
        vec![
            InlineKeyboardButton::callback("VelixVision 👁️", CallbackCommand::VelixVision.encode()),
            InlineKeyboardButton::callback("VelixGen 🖼️", CallbackCommand::VelixGen.encode()),
        ],
        vec![InlineKeyboardButton::url(
            "Website 🌐",
            Url::parse("https://www.velixlabs.dev/")?,
        )],
        vec![
            InlineKeyboardButton::url("Portal 🌀", Url::parse("https://t.me/VelixAIPortal")?),
            InlineKeyboardButton::url("Twitter / X", Url::parse("https://x.com/VelixLabs")?),
            InlineKeyboardButton::url(
                "GitBook 🗒",
                Url::parse("https://documentation.velixlabs.dev/")?,
            ),
        ],
    ];
    Ok(InlineKeyboardMarkup::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_commands_round_trip() {
        for command in [
            CallbackCommand::VelixGen,
            CallbackCommand::VelixVision,
            CallbackCommand::CodeMorph,
        ] {
            let encoded = command.encode();
            assert_eq!(CallbackCommand::decode(&encoded), Some(command));
        }
    }

    #[test]
    fn encoding_stays_within_telegram_callback_data_limit() {
        // Telegram caps callback_data at 64 bytes.
        assert!(CallbackCommand::VelixVision.encode().len() <= 64);
    }

    #[test]
    fn unknown_payloads_decode_to_none() {
        assert_eq!(CallbackCommand::decode(r#"{"command":"legacy"}"#), None);
        assert_eq!(CallbackCommand::decode("3"), None);
        assert_eq!(CallbackCommand::decode(""), None);
    }
}
