use serde::{Deserialize, Serialize};

use crate::config::CONFIG;

const GENERATING_STATUS: &str = "Generating code...";
const COMPLETE_STATUS: &str = "Code generation complete.";

/// Request frame sent to the code-generation backend right after connect.
/// Field names are the backend's wire contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePayload {
    pub generation_type: &'static str,
    pub image: String,
    pub input_mode: &'static str,
    pub generated_code_config: &'static str,
    pub code_generation_model: String,
    pub editor_theme: String,
    pub is_image_generation_enabled: bool,
    pub is_term_of_service_accepted: bool,
    pub access_code: Option<String>,
    pub open_ai_api_key: Option<String>,
    #[serde(rename = "openAiBaseURL")]
    pub open_ai_base_url: Option<String>,
    pub screenshot_one_api_key: Option<String>,
}

impl GeneratePayload {
    pub fn create(image_data_uri: String) -> Self {
        GeneratePayload {
            generation_type: "create",
            image: image_data_uri,
            input_mode: "image",
            generated_code_config: "html_tailwind",
            code_generation_model: CONFIG.code_generation_model.clone(),
            editor_theme: CONFIG.editor_theme.clone(),
            is_image_generation_enabled: false,
            is_term_of_service_accepted: true,
            access_code: None,
            open_ai_api_key: Some(CONFIG.openai_api_key.clone()),
            open_ai_base_url: None,
            screenshot_one_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StatusFrame {
    #[serde(rename = "type", default)]
    frame_type: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    html: Option<String>,
}

/// The two contractually meaningful backend events. Everything else is
/// `Ignored` for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Generating,
    Complete { html: Option<String> },
    Ignored,
}

pub fn classify_frame(text: &str) -> StatusEvent {
    let Ok(frame) = serde_json::from_str::<StatusFrame>(text) else {
        return StatusEvent::Ignored;
    };
    if frame.frame_type != "status" {
        return StatusEvent::Ignored;
    }
    match frame.value.as_str() {
        GENERATING_STATUS => StatusEvent::Generating,
        COMPLETE_STATUS => StatusEvent::Complete { html: frame.html },
        _ => StatusEvent::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generating_status_is_recognized() {
        let event = classify_frame(r#"{"type":"status","value":"Generating code..."}"#);
        assert_eq!(event, StatusEvent::Generating);
    }

    #[test]
    fn complete_status_carries_the_artifact() {
        let event = classify_frame(
            r#"{"type":"status","value":"Code generation complete.","html":"<p>hi</p>"}"#,
        );
        assert_eq!(
            event,
            StatusEvent::Complete {
                html: Some("<p>hi</p>".to_string())
            }
        );
    }

    #[test]
    fn complete_without_html_is_still_a_complete_event() {
        let event = classify_frame(r#"{"type":"status","value":"Code generation complete."}"#);
        assert_eq!(event, StatusEvent::Complete { html: None });
    }

    #[test]
    fn unknown_and_malformed_frames_are_ignored() {
        assert_eq!(
            classify_frame(r#"{"type":"status","value":"Thinking..."}"#),
            StatusEvent::Ignored
        );
        assert_eq!(
            classify_frame(r#"{"type":"chunk","value":"<div"}"#),
            StatusEvent::Ignored
        );
        assert_eq!(classify_frame("not json"), StatusEvent::Ignored);
        assert_eq!(classify_frame("{}"), StatusEvent::Ignored);
    }

    #[test]
    fn payload_serializes_with_the_backend_field_names() {
        let payload = GeneratePayload {
            generation_type: "create",
            image: "data:image/png;base64,AAAA".to_string(),
            input_mode: "image",
            generated_code_config: "html_tailwind",
            code_generation_model: "gpt_4_vision".to_string(),
            editor_theme: "espresso".to_string(),
            is_image_generation_enabled: false,
            is_term_of_service_accepted: true,
            access_code: None,
            open_ai_api_key: Some("sk-test".to_string()),
            open_ai_base_url: None,
            screenshot_one_api_key: None,
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["generationType"], "create");
        assert_eq!(value["inputMode"], "image");
        assert_eq!(value["generatedCodeConfig"], "html_tailwind");
        assert_eq!(value["codeGenerationModel"], "gpt_4_vision");
        assert_eq!(value["editorTheme"], "espresso");
        assert_eq!(value["isImageGenerationEnabled"], false);
        assert_eq!(value["isTermOfServiceAccepted"], true);
        assert!(value["accessCode"].is_null());
        assert_eq!(value["openAiApiKey"], "sk-test");
        assert!(value["openAiBaseURL"].is_null());
        assert!(value["screenshotOneApiKey"].is_null());
    }
}
