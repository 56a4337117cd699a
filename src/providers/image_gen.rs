use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::utils::http::get_http_client;

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

pub fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = value.pointer("/error/message").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }
    truncate_for_log(trimmed, 500)
}

/// Text-to-image via the provider's images endpoint. Returns one
/// retrievable image URL.
pub async fn generate_image(prompt: &str) -> Result<String> {
    let payload = json!({
        "model": CONFIG.image_model,
        "prompt": prompt,
        "n": 1,
        "size": CONFIG.image_resolution,
        "quality": "hd",
    });

    let url = format!(
        "{}/images/generations",
        CONFIG.openai_base_url.trim_end_matches('/')
    );
    debug!(model = %CONFIG.image_model, "Requesting image generation");

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
        warn!("Image generation failed with status {status}: {summary}");
        return Err(anyhow!("Image provider returned {status}: {summary}"));
    }

    let body = response.json::<Value>().await?;
    body.pointer("/data/0/url")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| anyhow!("Image provider response contained no image URL"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_the_provider_error_message() {
        let body = r#"{"error":{"message":"Your request was rejected by the safety system."}}"#;
        assert_eq!(
            summarize_error_body(body),
            "Your request was rejected by the safety system."
        );
    }

    #[test]
    fn falls_back_to_the_raw_body() {
        assert_eq!(summarize_error_body("bad gateway"), "bad gateway");
        assert_eq!(summarize_error_body("  "), "empty response body");
    }
}
