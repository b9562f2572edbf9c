use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::BackendConfig;
use crate::http_client::build_http_client;

/// Remote conversation handles for one bird.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    pub assistant_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Everything a backend needs to set up or refresh a bird's assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub species: String,
    pub personality: Option<String>,
    pub event_prompt: Option<&'static str>,
    pub ids: SessionIds,
}

impl SessionRequest {
    pub fn system_prompt(&self) -> String {
        build_system_prompt(
            &self.species,
            self.personality.as_deref(),
            self.event_prompt,
        )
    }
}

pub fn build_system_prompt(
    species: &str,
    personality: Option<&str>,
    event_prompt: Option<&str>,
) -> String {
    let mut prompt = format!(
        "You are a {}. Use short chirpy sentences with occasional bird sounds \
         (*chirp*, *tweet*). Max 1-2 sentences.",
        species
    );
    if let Some(personality) = personality.filter(|p| !p.trim().is_empty()) {
        prompt.push_str(&format!(" Your personality is {}.", personality));
    }
    if let Some(event_prompt) = event_prompt {
        prompt.push(' ');
        prompt.push_str(event_prompt);
    }
    prompt
}

/// Conversational backend contract.
///
/// Every failure (network, credentials, non-2xx, malformed body) folds into
/// `None`; callers treat all of them the same way.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Makes sure an assistant and thread exist. Returns the ids to use,
    /// which may be newly created.
    async fn ensure_session(&self, request: &SessionRequest) -> Option<SessionIds>;

    async fn send_message(&self, session: &SessionIds, text: &str) -> Option<String>;
}

/// Backend used when no chat service is configured.
pub struct OfflineChatBackend;

#[async_trait]
impl ChatBackend for OfflineChatBackend {
    async fn ensure_session(&self, _request: &SessionRequest) -> Option<SessionIds> {
        None
    }

    async fn send_message(&self, _session: &SessionIds, _text: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct AssistantCreated {
    assistant_id: String,
}

#[derive(Debug, Deserialize)]
struct ThreadCreated {
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct MessageReply {
    content: Option<String>,
}

/// Backboard assistants/threads API client.
#[derive(Clone)]
pub struct BackboardClient {
    api_url: String,
    api_key: Option<String>,
    llm_provider: String,
    llm_model: String,
    setup_timeout: Duration,
    message_timeout: Duration,
    client: reqwest::Client,
}

impl BackboardClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            llm_provider: config.llm_provider.clone(),
            llm_model: config.llm_model.clone(),
            setup_timeout: Duration::from_secs(config.setup_timeout_secs),
            message_timeout: Duration::from_secs(config.message_timeout_secs),
            client: build_http_client(None)?,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .context("Backboard API key is not configured")
    }

    async fn try_ensure_session(&self, request: &SessionRequest) -> Result<SessionIds> {
        let api_key = self.api_key()?;
        let mut ids = request.ids.clone();
        let mut created_assistant = false;

        let assistant_id = match ids.assistant_id.clone() {
            Some(id) => id,
            None => {
                let body = json!({
                    "name": format!("{} Chat", request.species),
                    "system_prompt": request.system_prompt(),
                    "llm_provider": self.llm_provider,
                    "llm_model_name": self.llm_model,
                    "memory": "Auto",
                });
                let response = self
                    .client
                    .post(format!("{}/assistants", self.api_url))
                    .header("X-API-Key", api_key)
                    .timeout(self.setup_timeout)
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to send create-assistant request")?;
                let created: AssistantCreated = read_json(response, "create assistant").await?;
                tracing::info!("Created Backboard assistant {}", created.assistant_id);
                created_assistant = true;
                ids.assistant_id = Some(created.assistant_id.clone());
                created.assistant_id
            }
        };

        if ids.thread_id.is_none() {
            let response = self
                .client
                .post(format!("{}/assistants/{}/threads", self.api_url, assistant_id))
                .header("X-API-Key", api_key)
                .timeout(self.setup_timeout)
                .json(&json!({}))
                .send()
                .await
                .context("Failed to send create-thread request")?;
            let created: ThreadCreated = read_json(response, "create thread").await?;
            tracing::info!("Created Backboard thread {}", created.thread_id);
            ids.thread_id = Some(created.thread_id);
        }

        // Existing assistants get their prompt refreshed so events and newly
        // learned personalities reach the model.
        if !created_assistant && (request.event_prompt.is_some() || request.personality.is_some())
        {
            if let Err(error) = self.patch_prompt(api_key, &assistant_id, request).await {
                tracing::warn!("Failed to update assistant prompt: {:#}", error);
            }
        }

        Ok(ids)
    }

    async fn patch_prompt(
        &self,
        api_key: &str,
        assistant_id: &str,
        request: &SessionRequest,
    ) -> Result<()> {
        let response = self
            .client
            .patch(format!("{}/assistants/{}", self.api_url, assistant_id))
            .header("X-API-Key", api_key)
            .timeout(self.setup_timeout)
            .json(&json!({ "system_prompt": request.system_prompt() }))
            .send()
            .await
            .context("Failed to send prompt update")?;
        ensure_success(response, "update assistant").await?;
        Ok(())
    }

    async fn try_send_message(&self, session: &SessionIds, text: &str) -> Result<String> {
        let api_key = self.api_key()?;
        let thread_id = session
            .thread_id
            .as_deref()
            .context("No Backboard thread for this bird")?;

        let response = self
            .client
            .post(format!("{}/threads/{}/messages", self.api_url, thread_id))
            .header("X-API-Key", api_key)
            .timeout(self.message_timeout)
            .form(&[("content", text), ("stream", "false"), ("memory", "Auto")])
            .send()
            .await
            .context("Failed to send chat message")?;

        let reply: MessageReply = read_json(response, "send message").await?;
        reply
            .content
            .filter(|content| !content.trim().is_empty())
            .context("Backboard reply had no content")
    }
}

#[async_trait]
impl ChatBackend for BackboardClient {
    async fn ensure_session(&self, request: &SessionRequest) -> Option<SessionIds> {
        match self.try_ensure_session(request).await {
            Ok(ids) => Some(ids),
            Err(error) => {
                tracing::warn!("Backboard session setup failed: {:#}", error);
                None
            }
        }
    }

    async fn send_message(&self, session: &SessionIds, text: &str) -> Option<String> {
        match self.try_send_message(session, text).await {
            Ok(reply) => Some(reply),
            Err(error) => {
                tracing::warn!("Backboard message failed: {:#}", error);
                None
            }
        }
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read body".to_string());
    anyhow::bail!("Backboard {} returned error {}: {}", what, status, body)
}

async fn read_json<T>(response: reqwest::Response, what: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let response = ensure_success(response, what).await?;
    response
        .json::<T>()
        .await
        .with_context(|| format!("Failed to parse Backboard {} response", what))
}
