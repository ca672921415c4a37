//! Notification sink.
//!
//! Messages are formatted elsewhere (see [`crate::report`]); a [`Notifier`]
//! only transmits them. Delivery is best-effort: [`Notifier::notify`] reports
//! whether the message went out and never returns an error.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BackupConfig;

/// Upper bound on one delivery attempt.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Future returned by [`Notifier::notify`]; resolves to `true` on delivery.
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Rendering hint passed along with the message text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseMode {
    /// Text is sent verbatim.
    Plain,
    /// Text uses the Telegram HTML subset.
    Html,
}

/// Pre-formatted message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Message body.
    pub text: String,
    /// Rendering hint.
    pub mode: ParseMode,
}

impl Message {
    /// Message rendered as HTML.
    #[must_use]
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: ParseMode::Html,
        }
    }

    /// Plain-text message.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: ParseMode::Plain,
        }
    }
}

/// Sends messages to an external sink.
pub trait Notifier: Send + Sync {
    /// Delivers `message`, returning `false` when it could not be sent.
    fn notify<'a>(&'a self, message: &'a Message) -> NotifyFuture<'a>;
}

/// Errors raised while talking to the Telegram Bot API.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Raised when no bot token or chat id is configured.
    #[error("telegram notifications are not configured")]
    NotConfigured,
    /// Raised when the HTTP client cannot be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    /// Raised when the request fails in transit.
    #[error("telegram request failed: {0}")]
    Transport(String),
    /// Raised when the API answers with a non-success status.
    #[error("telegram rejected the message with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

/// Bot token and destination chat.
#[derive(Clone, Eq, PartialEq)]
pub struct TelegramCredentials {
    /// Bot API token.
    pub token: String,
    /// Destination chat id.
    pub chat_id: String,
}

impl fmt::Debug for TelegramCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramCredentials")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
}

/// Notifier posting to the Telegram Bot API `sendMessage` method.
#[derive(Clone, Debug)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    credentials: Option<TelegramCredentials>,
}

impl TelegramNotifier {
    /// Creates a notifier. `None` credentials produce a notifier that
    /// never delivers.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Client`] when the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        credentials: Option<TelegramCredentials>,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|err| NotifyError::Client(err.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.into(),
            credentials,
        })
    }

    /// Creates a notifier from the process configuration.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Client`] when the HTTP client cannot be built.
    pub fn from_config(config: &BackupConfig) -> Result<Self, NotifyError> {
        let credentials =
            config
                .telegram_credentials()
                .map(|(token, chat_id)| TelegramCredentials {
                    token: token.to_owned(),
                    chat_id: chat_id.to_owned(),
                });
        Self::new(config.telegram_api_base.clone(), credentials)
    }

    /// Returns `true` when both token and chat id are present.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Sends `message`, surfacing every failure.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::NotConfigured`] without credentials,
    /// [`NotifyError::Transport`] on network failures, and
    /// [`NotifyError::Rejected`] when the API refuses the message.
    pub async fn send(&self, message: &Message) -> Result<(), NotifyError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(NotifyError::NotConfigured)?;
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            credentials.token
        );
        let payload = SendMessage {
            chat_id: &credentials.chat_id,
            text: &message.text,
            parse_mode: match message.mode {
                ParseMode::Html => Some("HTML"),
                ParseMode::Plain => None,
            },
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.without_url().to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

impl Notifier for TelegramNotifier {
    fn notify<'a>(&'a self, message: &'a Message) -> NotifyFuture<'a> {
        Box::pin(async move {
            match self.send(message).await {
                Ok(()) => {
                    debug!("notification delivered");
                    true
                }
                Err(NotifyError::NotConfigured) => {
                    warn!("telegram credentials missing; notification skipped");
                    false
                }
                Err(err) => {
                    warn!(error = %err, "notification failed");
                    false
                }
            }
        })
    }
}
