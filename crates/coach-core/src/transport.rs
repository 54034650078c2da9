//! Outbound channel transports.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::model::{DialogMessage, DialogOption, DialogOptionType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Temporary failure; the message stays pending and is tried again.
    #[error("retryable transport failure: {0}")]
    Retryable(String),

    /// The endpoint or configuration can never deliver this message.
    #[error("invalid transport configuration: {0}")]
    InvalidConfiguration(String),
}

pub trait Transport: Send + Sync {
    fn dispatch(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
        sender: &str,
    ) -> Result<(), TransportError>;

    /// Tell the recipient that the reply window of `message` has closed.
    fn inform_about_answering_timeout(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
    ) -> Result<(), TransportError>;
}

pub fn from_config(config: &TransportConfig) -> Arc<dyn Transport> {
    match config {
        TransportConfig::Log => Arc::new(LogTransport),
        TransportConfig::Webhook { url, timeout_secs } => {
            Arc::new(WebhookTransport::new(url.clone(), Duration::from_secs(*timeout_secs)))
        }
    }
}

// ---------------------------------------------------------------------------
// LogTransport
// ---------------------------------------------------------------------------

/// Writes outbound messages to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn dispatch(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
        sender: &str,
    ) -> Result<(), TransportError> {
        tracing::info!(
            channel = %option.kind,
            recipient = %option.data,
            sender,
            message = %message.id,
            order = message.order,
            "outbound: {}",
            message.text
        );
        Ok(())
    }

    fn inform_about_answering_timeout(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
    ) -> Result<(), TransportError> {
        tracing::info!(
            channel = %option.kind,
            recipient = %option.data,
            message = %message.id,
            "answering timeout"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WebhookEvent<'a> {
    Message {
        channel: DialogOptionType,
        recipient: &'a str,
        sender: &'a str,
        message_id: Uuid,
        order: u64,
        text: &'a str,
        answer_options: Option<&'a str>,
        expects_answer: bool,
    },
    AnsweringTimeout {
        channel: DialogOptionType,
        recipient: &'a str,
        message_id: Uuid,
        order: u64,
    },
}

/// POSTs every event as JSON to a gateway. 4xx responses are permanent,
/// 5xx responses and network failures are retryable.
pub struct WebhookTransport {
    url: String,
    timeout: Duration,
    client: OnceLock<reqwest::blocking::Client>,
}

impl WebhookTransport {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            url,
            timeout,
            client: OnceLock::new(),
        }
    }

    // The blocking client owns a runtime; it is built on first use so it is
    // never created inside an async context.
    fn client(&self) -> Result<&reqwest::blocking::Client, TransportError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfiguration(e.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn post(&self, event: &WebhookEvent<'_>) -> Result<(), TransportError> {
        let response = self
            .client()?
            .post(&self.url)
            .json(event)
            .send()
            .map_err(|e| {
                if e.is_builder() {
                    TransportError::InvalidConfiguration(e.to_string())
                } else {
                    TransportError::Retryable(e.to_string())
                }
            })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(TransportError::InvalidConfiguration(format!(
                "gateway rejected message with {status}"
            )))
        } else {
            Err(TransportError::Retryable(format!("gateway answered {status}")))
        }
    }
}

impl Transport for WebhookTransport {
    fn dispatch(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
        sender: &str,
    ) -> Result<(), TransportError> {
        self.post(&WebhookEvent::Message {
            channel: option.kind,
            recipient: &option.data,
            sender,
            message_id: message.id,
            order: message.order,
            text: &message.text,
            answer_options: message.answer_options.as_deref(),
            expects_answer: message.answer_expected,
        })
    }

    fn inform_about_answering_timeout(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
    ) -> Result<(), TransportError> {
        self.post(&WebhookEvent::AnsweringTimeout {
            channel: option.kind,
            recipient: &option.data,
            message_id: message.id,
            order: message.order,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message {
        recipient: String,
        channel: DialogOptionType,
        message: Uuid,
        text: String,
    },
    Timeout {
        recipient: String,
        message: Uuid,
    },
}

/// Keeps every delivery in memory. Failures can be queued to simulate an
/// unreliable gateway.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    deliveries: Mutex<Vec<Delivery>>,
    failures: Mutex<Vec<TransportError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next dispatch fails with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(error);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Texts of delivered messages in delivery order.
    pub fn texts(&self) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Message { text, .. } => Some(text),
                Delivery::Timeout { .. } => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn dispatch(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
        _sender: &str,
    ) -> Result<(), TransportError> {
        let failure = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(error) = failure {
            return Err(error);
        }
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Delivery::Message {
                recipient: option.data.clone(),
                channel: option.kind,
                message: message.id,
                text: message.text.clone(),
            });
        Ok(())
    }

    fn inform_about_answering_timeout(
        &self,
        option: &DialogOption,
        message: &DialogMessage,
    ) -> Result<(), TransportError> {
        self.deliveries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Delivery::Timeout {
                recipient: option.data.clone(),
                message: message.id,
            });
        Ok(())
    }
}
