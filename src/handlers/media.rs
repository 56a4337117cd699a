use std::time::Duration;

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::warn;

use crate::config::CONFIG;
use crate::utils::http::get_http_client;

const MEDIA_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const MEDIA_DOWNLOAD_BASE_DELAY_MS: u64 = 400;

/// True when the message carries an image the bot can work on, either as a
/// compressed photo or as an image document.
pub fn has_image_attachment(message: &Message) -> bool {
    if message.photo().map(|sizes| !sizes.is_empty()).unwrap_or(false) {
        return true;
    }
    message
        .document()
        .and_then(|document| document.mime_type.as_ref())
        .map(|mime| mime.essence_str().starts_with("image/"))
        .unwrap_or(false)
}

/// The largest photo size, or the document's file when it is an image.
pub fn image_file_id(message: &Message) -> Option<FileId> {
    if let Some(photo) = message.photo().and_then(|sizes| sizes.last()) {
        return Some(photo.file.id.clone());
    }
    let document = message.document()?;
    let is_image = document
        .mime_type
        .as_ref()
        .map(|mime| mime.essence_str().starts_with("image/"))
        .unwrap_or(false);
    if is_image {
        Some(document.file.id.clone())
    } else {
        None
    }
}

/// Resolve a file id to the Telegram file-download URL and its server-side
/// path (the path carries the original extension).
pub async fn get_file_url(bot: &Bot, file_id: &FileId) -> Result<(String, String)> {
    let file = bot.get_file(file_id.clone()).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        CONFIG.bot_token, file.path
    );
    Ok((url, file.path))
}

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub async fn download_media(url: &str) -> Option<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..MEDIA_DOWNLOAD_MAX_ATTEMPTS {
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Failed to fetch media {url}: {err} (attempt={}/{})",
                    attempt + 1,
                    MEDIA_DOWNLOAD_MAX_ATTEMPTS
                );
                if !(err.is_timeout() || err.is_connect())
                    || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS
                {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(
                    MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt,
                ))
                .await;
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!("Media download for {url} failed with status {status}");
            if !should_retry_status(status) || attempt + 1 == MEDIA_DOWNLOAD_MAX_ATTEMPTS {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(
                MEDIA_DOWNLOAD_BASE_DELAY_MS << attempt,
            ))
            .await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Some(bytes.to_vec()),
            Err(err) => {
                warn!("Failed to read media bytes from {url}: {err}");
                return None;
            }
        }
    }

    None
}

/// Build the `data:image/...;base64,` URI the generation backend expects.
/// MIME is sniffed from the bytes, falling back to the file extension.
pub fn to_data_uri(bytes: &[u8], file_path: &str) -> String {
    let mime = infer::get(bytes)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| {
            let extension = file_path.rsplit('.').next().unwrap_or("png");
            format!("image/{extension}")
        });
    format!(
        "data:{mime};base64,{}",
        general_purpose::STANDARD.encode(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];

    #[test]
    fn sniffs_the_mime_type_from_bytes() {
        let uri = to_data_uri(PNG_MAGIC, "photos/file_1.jpg");
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn falls_back_to_the_path_extension() {
        let uri = to_data_uri(b"not a known image format", "photos/file_2.webp");
        assert!(uri.starts_with("data:image/webp;base64,"));
    }

    #[test]
    fn encodes_the_payload_as_base64() {
        let uri = to_data_uri(b"abc", "x.png");
        assert!(uri.ends_with("YWJj"));
    }
}
