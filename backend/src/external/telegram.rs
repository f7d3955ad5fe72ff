//! Telegram Bot API client used to deliver alert messages

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::TelegramConfig;
use crate::error::DispatchError;
use crate::services::notification::NotificationDispatcher;

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    http_client: Client,
    base_url: String,
    bot_token: String,
}

/// sendMessage request body
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

/// Envelope every Bot API response is wrapped in
#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramClient {
    /// Create a client from configuration. Returns `None` without a bot token.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>, DispatchError> {
        let token = match config.bot_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => return Ok(None),
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Some(Self {
            http_client,
            base_url: config.api_endpoint.trim_end_matches('/').to_string(),
            bot_token: token,
        }))
    }

    /// Create a client with custom base URL (for testing)
    pub fn with_base_url(bot_token: String, base_url: String) -> Self {
        Self {
            http_client: Client::new(),
            base_url,
            bot_token,
        }
    }

    /// Send a Markdown text message to a chat
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), DispatchError> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
        };

        let response = self
            .http_client
            .post(format!("{}/bot{}/sendMessage", self.base_url, self.bot_token))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body: Option<TelegramApiResponse> = response.json().await.ok();

        match body {
            Some(body) if status.is_success() && body.ok => Ok(()),
            body => Err(DispatchError::Rejected {
                status: status.as_u16(),
                description: body
                    .and_then(|b| b.description)
                    .unwrap_or_else(|| "Unknown error".to_string()),
            }),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for TelegramClient {
    async fn deliver(&self, destination: &str, text: &str) -> Result<(), DispatchError> {
        self.send_message(destination, text).await
    }
}
