use crate::config::AppConfig;
use crate::generate::{CommentProvider, GenerateError};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Longest slice of an error body carried into the error message.
const MAX_ERROR_BODY: usize = 300;

/// Client for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(config: &AppConfig) -> Result<Self, GenerateError> {
        let api_key = config.api_key().ok_or(GenerateError::MissingApiKey)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| GenerateError::Fatal(e.to_string()))?;
        info!("creating provider for {}", config.base_url);
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, body: &Value) -> Result<String, GenerateError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| GenerateError::BadResponse(e.to_string()))?;
        debug!("usage: {}", value["usage"]);
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GenerateError::BadResponse("missing choices[0].message.content".into()))
    }
}

#[async_trait]
impl CommentProvider for OpenAiCompatProvider {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String, GenerateError> {
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": 0.7,
        });
        self.send(&body).await
    }

    async fn transcribe(
        &self,
        data: &[u8],
        mime: &str,
        prompt: &str,
        model: &str,
    ) -> Result<String, GenerateError> {
        self.send(&transcription_body(data, mime, prompt, model)).await
    }
}

/// Images go in an `image_url` part; PDFs need a `file` part.
fn transcription_body(data: &[u8], mime: &str, prompt: &str, model: &str) -> Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let data_url = format!("data:{mime};base64,{encoded}");
    let attachment = if mime == "application/pdf" {
        json!({ "type": "file", "file": { "filename": "roster.pdf", "file_data": data_url } })
    } else {
        json!({ "type": "image_url", "image_url": { "url": data_url } })
    };
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [{ "type": "text", "text": prompt }, attachment]
        }],
        "temperature": 0,
    })
}

fn classify_transport(e: reqwest::Error) -> GenerateError {
    if e.is_timeout() || e.is_connect() {
        GenerateError::Transient(e.to_string())
    } else {
        GenerateError::Fatal(e.to_string())
    }
}

/// 429 and 5xx overloads are retried; everything else aborts the batch.
pub fn classify_status(status: StatusCode, body: &str) -> GenerateError {
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), snippet.trim());
    match status.as_u16() {
        429 | 500 | 502 | 503 | 504 => GenerateError::Transient(message),
        _ => GenerateError::Fatal(message),
    }
}

/// MIME type for a roster scan, from its extension.
pub fn mime_for_path(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn overload_statuses_are_transient() {
        for code in [429u16, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).expect("status");
            assert!(classify_status(status, "busy").is_transient(), "{code}");
        }
        for code in [400u16, 401, 403, 404] {
            let status = StatusCode::from_u16(code).expect("status");
            assert!(!classify_status(status, "nope").is_transient(), "{code}");
        }
    }

    #[test]
    fn error_body_is_truncated() {
        let long = "x".repeat(5000);
        let err = classify_status(StatusCode::BAD_REQUEST, &long);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn provider_needs_a_key() {
        let cfg = AppConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::new(&cfg),
            Err(GenerateError::MissingApiKey)
        ));
    }

    #[test]
    fn pdf_goes_in_a_file_part_and_images_in_image_url() {
        let body = transcription_body(b"%PDF-1.7", "application/pdf", "list students", "m");
        let part = &body["messages"][0]["content"][1];
        assert_eq!(part["type"], json!("file"));
        assert_eq!(part["file"]["filename"], json!("roster.pdf"));
        assert!(part["file"]["file_data"]
            .as_str()
            .is_some_and(|u| u.starts_with("data:application/pdf;base64,")));
        assert!(part.get("image_url").is_none());

        let body = transcription_body(&[0x89, b'P'], "image/png", "list students", "m");
        let part = &body["messages"][0]["content"][1];
        assert_eq!(part["type"], json!("image_url"));
        assert!(part["image_url"]["url"]
            .as_str()
            .is_some_and(|u| u.starts_with("data:image/png;base64,")));
        assert_eq!(body["messages"][0]["content"][0]["text"], json!("list students"));
    }

    #[tokio::test]
    async fn malformed_base_url_is_not_retried() {
        let cfg = AppConfig {
            api_key: Some("sk-test".into()),
            base_url: "not a url".into(),
            ..AppConfig::default()
        };
        let provider = OpenAiCompatProvider::new(&cfg).expect("provider");
        let err = provider.complete("hi", "m").await.expect_err("bad url");
        assert!(!err.is_transient(), "{err}");
    }

    #[test]
    fn mime_types_by_extension() {
        assert_eq!(mime_for_path(Path::new("roster.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("scan.pdf")), Some("application/pdf"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
    }
}
