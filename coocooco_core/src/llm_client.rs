use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::VisionConfig;
use crate::http_client::build_http_client;

/// Minimal OpenAI-compatible chat-completions client for image prompts.
#[derive(Clone)]
pub struct LlmClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl LlmClient {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            client: build_http_client(Some(Duration::from_secs(config.timeout_secs)))?,
        })
    }

    /// Sends one system + user turn with an inline base64 image and returns
    /// the raw assistant text.
    pub async fn ask_about_image(
        &self,
        system: &str,
        prompt: &str,
        image_bytes: &[u8],
        mime: &str,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image_bytes);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                json!({ "role": "system", "content": system }),
                json!({
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompt },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:{};base64,{}", mime, image_base64) }
                        }
                    ]
                }),
            ],
            temperature: Some(0.0),
            max_tokens: Some(400),
        };

        let mut req = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await.context("Failed to send vision request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Vision API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse vision response")?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from vision model"))
    }

    pub async fn ask_json<T>(
        &self,
        system: &str,
        prompt: &str,
        image_bytes: &[u8],
        mime: &str,
    ) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.ask_about_image(system, prompt, image_bytes, mime).await?;
        parse_json(&response)
    }
}

/// Parses model output that should be JSON but may arrive wrapped in a
/// reasoning block, a fenced code block, or surrounding prose.
pub fn parse_json<T>(response: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    if let Ok(parsed) = serde_json::from_str::<T>(response) {
        return Ok(parsed);
    }

    let cleaned = match response.rfind("</think>") {
        Some(end) => &response[end + "</think>".len()..],
        None => response,
    };
    if let Ok(parsed) = serde_json::from_str::<T>(cleaned.trim()) {
        return Ok(parsed);
    }

    let extracted = if let Some(start) = cleaned.find("```json") {
        let after = &cleaned[start + "```json".len()..];
        after.find("```").map(|end| after[..end].trim()).unwrap_or(cleaned)
    } else {
        outermost_json(cleaned).unwrap_or(cleaned)
    };

    serde_json::from_str::<T>(extracted.trim()).with_context(|| {
        format!(
            "Failed to parse JSON. Extracted: {} | Original: {}",
            extracted,
            response.chars().take(500).collect::<String>()
        )
    })
}

/// Widest `{...}` or `[...]` span, whichever opens first.
fn outermost_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
