use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::providers::image_gen::summarize_error_body;
use crate::utils::http::get_http_client;

const ANALYZE_INSTRUCTION: &str = "Analyze this image in detail. Describe the objects, people, \
    setting, colors, actions, emotions, and any contextual meaning. Provide insights like a \
    professional visual analyst.";

/// One image reference plus the fixed analyst instruction; the reply is
/// free text.
pub async fn analyze_image(image_url: &str) -> Result<String> {
    let payload = json!({
        "model": CONFIG.vision_model,
        "messages": [
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": ANALYZE_INSTRUCTION },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]
            }
        ],
        "max_tokens": 1000,
    });

    let url = format!(
        "{}/chat/completions",
        CONFIG.openai_base_url.trim_end_matches('/')
    );
    debug!(model = %CONFIG.vision_model, "Requesting image analysis");

    let response = get_http_client()
        .post(&url)
        .bearer_auth(&CONFIG.openai_api_key)
        .json(&payload)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let summary = summarize_error_body(&body);
        warn!("Image analysis failed with status {status}: {summary}");
        return Err(anyhow!("Vision provider returned {status}: {summary}"));
    }

    let body = response.json::<Value>().await?;
    let content = body
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "No analysis result.".to_string());

    Ok(content)
}
