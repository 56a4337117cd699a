use std::path::{Path, PathBuf};

use anyhow::Result;

/// Strip the code-block fencing the backend sometimes wraps around the
/// generated document: a leading ```` ```html ```` and a trailing
/// ```` ``` ````. Nothing else is altered.
pub fn strip_code_fences(html: &str) -> String {
    let mut cleaned = html;
    if let Some(rest) = cleaned.strip_prefix("```html") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.to_string()
}

/// One file per completed job, named by the chat id. The output directory
/// is created on demand.
pub fn artifact_path(generated_dir: &Path, chat_id: i64) -> PathBuf {
    generated_dir.join(format!("{chat_id}.html"))
}

pub async fn persist_artifact(generated_dir: &Path, chat_id: i64, html: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(generated_dir).await?;
    let path = artifact_path(generated_dir, chat_id);
    tokio::fs::write(&path, strip_code_fences(html)).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_and_trailing_fences() {
        assert_eq!(
            strip_code_fences("```html<!DOCTYPE html><p>hi</p>```"),
            "<!DOCTYPE html><p>hi</p>"
        );
    }

    #[test]
    fn leaves_unfenced_output_untouched() {
        assert_eq!(strip_code_fences("<p>plain</p>"), "<p>plain</p>");
    }

    #[test]
    fn strips_each_fence_independently() {
        assert_eq!(strip_code_fences("```html<p>open</p>"), "<p>open</p>");
        assert_eq!(strip_code_fences("<p>close</p>```"), "<p>close</p>");
    }

    #[test]
    fn does_not_touch_fences_in_the_middle() {
        let body = "<pre>```html</pre>";
        assert_eq!(strip_code_fences(body), body);
    }

    #[tokio::test]
    async fn persists_the_cleaned_artifact_exactly() {
        let dir = std::env::temp_dir().join(format!("velix-artifact-{}", std::process::id()));
        let path = persist_artifact(&dir, 12345, "```html<p>payload</p>```")
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "12345.html");
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(written, "<p>payload</p>");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
