// src/chatbot/gemini.rs
use std::time::Duration;

use axum::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const API_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Gemini returned no text")]
    EmptyResponse,
}

/// 聊天机器人依赖的文本生成能力，测试里可以替换成固定回复
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// 拼接第一个候选结果中所有文本片段
pub(crate) fn extract_text(response: GenerateResponse) -> Result<String, LlmError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(text.to_string())
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: prompt }] }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let body: GenerateResponse = response.json().await?;
        extract_text(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> GenerateResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn endpoint_includes_model() {
        let client = GeminiClient::new("key", "gemini-1.5-flash")
            .unwrap()
            .with_base_url("http://localhost:9999/");
        assert_eq!(
            client.endpoint(),
            "http://localhost:9999/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn text_parts_are_joined() {
        let body = parse(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"there"}]}}]}"#,
        );
        assert_eq!(extract_text(body).unwrap(), "Hello there");
    }

    #[test]
    fn blocked_or_empty_responses_are_errors() {
        assert!(matches!(
            extract_text(parse(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)),
            Err(LlmError::EmptyResponse)
        ));
        assert!(matches!(
            extract_text(parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#)),
            Err(LlmError::EmptyResponse)
        ));
    }
}
