//! Meta Graph API send adapter (Instagram and Facebook Messenger)

use async_trait::async_trait;
use linkreply_domain::{OutboundMessage, PlatformAdapter, SendError, SendReceipt};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v19.0";

/// Sends replies through `POST {base}/{version}/{account_id}/messages`
pub struct GraphMessagingAdapter {
    client: Client,
    platform: String,
    access_token: SecretString,
    base_url: String,
    api_version: String,
    enabled: bool,
}

impl GraphMessagingAdapter {
    pub fn new(platform: impl Into<String>, access_token: SecretString) -> Self {
        Self::with_base_url(
            platform,
            access_token,
            DEFAULT_BASE_URL.to_string(),
            DEFAULT_API_VERSION.to_string(),
        )
    }

    pub fn with_base_url(
        platform: impl Into<String>,
        access_token: SecretString,
        base_url: String,
        api_version: String,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            platform: platform.into(),
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            enabled: true,
        }
    }

    /// Create a disabled adapter (platform configured off, or no token)
    pub fn disabled(platform: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            platform: platform.into(),
            access_token: SecretString::new("".into()),
            base_url: String::new(),
            api_version: String::new(),
            enabled: false,
        }
    }

    fn messages_url(&self, account_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.api_version, account_id
        )
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    recipient: Recipient<'a>,
    message: MessageBody<'a>,
}

/// DMs go to the sender; comments without one get a private reply
#[derive(Serialize)]
#[serde(untagged)]
enum Recipient<'a> {
    User { id: &'a str },
    Comment { comment_id: &'a str },
}

#[derive(Serialize)]
struct MessageBody<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct GraphErrorBody {
    error: GraphErrorDetail,
}

#[derive(Deserialize)]
struct GraphErrorDetail {
    message: String,
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_message(response: Response) -> String {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<GraphErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body)
}

#[async_trait]
impl PlatformAdapter for GraphMessagingAdapter {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        if !self.enabled {
            return Err(SendError::Disabled);
        }

        let recipient = match (
            message.recipient_id.as_deref(),
            message.reply_to_event_id.as_deref(),
        ) {
            (Some(id), _) if !id.is_empty() => Recipient::User { id },
            (_, Some(comment_id)) if !comment_id.is_empty() => Recipient::Comment { comment_id },
            _ => {
                return Err(SendError::Rejected(
                    "Event has neither a sender nor an event ID to reply to".to_string(),
                ));
            }
        };

        let request = SendMessageRequest {
            recipient,
            message: MessageBody {
                text: &message.text,
            },
        };

        let response = self
            .client
            .post(self.messages_url(&message.account_id))
            .header(
                "Authorization",
                format!("Bearer {}", self.access_token.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| SendError::Network(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SendError::Auth(error_message(response).await));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SendError::RateLimited(retry_after(&response)));
        }

        if status.is_server_error() {
            return Err(SendError::Api {
                status: Some(status.as_u16()),
                message: error_message(response).await,
            });
        }

        if !status.is_success() {
            return Err(SendError::Rejected(format!(
                "{}: {}",
                status.as_u16(),
                error_message(response).await
            )));
        }

        let body: SendMessageResponse = response.json().await.map_err(|e| SendError::Api {
            status: Some(status.as_u16()),
            message: format!("Unexpected response: {}", e),
        })?;

        tracing::debug!(
            platform = %self.platform,
            message_id = %body.message_id,
            "Reply sent"
        );

        Ok(SendReceipt {
            id: body.message_id,
        })
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
