//! Asynchronous mail dispatch.
//!
//! # Data Flow
//! ```text
//! Mailer::send(Message)
//!     → jobs queue (bounded, awaits when full)
//!     → MailLoop (one background task)
//!     → MailTransport (log or HTTP API)
//!     → results queue (bounded) → Mailer::next_result
//! ```
//!
//! # Design Decisions
//! - Enqueueing applies backpressure instead of failing
//! - A full results queue drops the result with a warning so sends never stall
//! - Send failures are logged and reported as results, the loop keeps going
//! - On shutdown the queue is closed and drained for at most `DRAIN_TIMEOUT`;
//!   whatever is left is counted and logged

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::config::schema::MailConfig;
use crate::observability::metrics;

/// Upper bound on delivering queued messages after shutdown.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for mail dispatch.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail queue is full")]
    QueueFull,
    #[error("mail loop has stopped")]
    Closed,
    #[error("mail API request failed")]
    Http(#[from] reqwest::Error),
    #[error("mail API rejected the message with status {0}")]
    Rejected(u16),
}

/// An outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sender address; the configured default when empty.
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub from_name: String,
    pub to: String,
    pub subject: String,
    /// Template name resolved by the delivery service.
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Outcome of one send.
#[derive(Debug, Clone, PartialEq)]
pub struct MailResult {
    pub to: String,
    pub subject: String,
    pub success: bool,
    pub error: Option<String>,
}

/// How messages leave the process.
#[derive(Debug, Clone)]
pub enum MailTransport {
    /// Log the message and report success.
    Log,
    /// POST the message as JSON to a delivery API.
    Api {
        client: reqwest::Client,
        url: String,
        key: String,
        provider: String,
    },
}

impl MailTransport {
    /// Transport described by `config`: the API when a service URL is set.
    pub fn from_config(config: &MailConfig) -> Result<Self, MailError> {
        match config.service.url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => Ok(MailTransport::Api {
                client: reqwest::Client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()?,
                url: url.to_string(),
                key: config.service.key.clone(),
                provider: config.service.provider.clone(),
            }),
            None => Ok(MailTransport::Log),
        }
    }

    async fn deliver(&self, message: &Message) -> Result<(), MailError> {
        match self {
            MailTransport::Log => {
                tracing::info!(to = %message.to, subject = %message.subject, "Mail delivered to log");
                Ok(())
            }
            MailTransport::Api {
                client,
                url,
                key,
                provider,
            } => {
                let mut request = client
                    .post(url)
                    .header("X-Mail-Provider", provider.as_str())
                    .json(message);
                if !key.is_empty() {
                    request = request.bearer_auth(key);
                }
                let response = request.send().await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(MailError::Rejected(response.status().as_u16()))
                }
            }
        }
    }
}

/// Handle for enqueueing mail. Clones share the queues.
#[derive(Debug, Clone)]
pub struct Mailer {
    jobs: mpsc::Sender<Message>,
    results: Arc<Mutex<mpsc::Receiver<MailResult>>>,
    from: String,
    from_name: String,
}

/// Background send loop paired with a [`Mailer`].
#[derive(Debug)]
pub struct MailLoop {
    jobs: mpsc::Receiver<Message>,
    results: mpsc::Sender<MailResult>,
    transport: MailTransport,
}

impl Mailer {
    pub fn new(config: &MailConfig, transport: MailTransport) -> (Mailer, MailLoop) {
        let capacity = config.queue_capacity.max(1);
        let (jobs_tx, jobs_rx) = mpsc::channel(capacity);
        let (results_tx, results_rx) = mpsc::channel(capacity);
        let mailer = Mailer {
            jobs: jobs_tx,
            results: Arc::new(Mutex::new(results_rx)),
            from: config.from_address.clone(),
            from_name: config.from_name.clone(),
        };
        let send_loop = MailLoop {
            jobs: jobs_rx,
            results: results_tx,
            transport,
        };
        (mailer, send_loop)
    }

    fn with_defaults(&self, mut message: Message) -> Message {
        if message.from.is_empty() {
            message.from = self.from.clone();
        }
        if message.from_name.is_empty() {
            message.from_name = self.from_name.clone();
        }
        message
    }

    /// Enqueue a message, waiting while the queue is full.
    pub async fn send(&self, message: Message) -> Result<(), MailError> {
        self.jobs
            .send(self.with_defaults(message))
            .await
            .map_err(|_| MailError::Closed)
    }

    /// Enqueue without waiting.
    pub fn try_send(&self, message: Message) -> Result<(), MailError> {
        self.jobs
            .try_send(self.with_defaults(message))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => MailError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => MailError::Closed,
            })
    }

    /// Next delivery outcome; `None` once the loop has stopped and drained.
    pub async fn next_result(&self) -> Option<MailResult> {
        self.results.lock().await.recv().await
    }
}

impl MailLoop {
    /// Deliver queued messages until shutdown or until every `Mailer` is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Mail loop started");
        loop {
            tokio::select! {
                job = self.jobs.recv() => {
                    let Some(message) = job else { break };
                    self.dispatch(message).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Mail loop received shutdown signal, draining queue");
                    self.drain(DRAIN_TIMEOUT).await;
                    break;
                }
            }
        }
    }

    /// Stop accepting messages and deliver what is queued until `limit` elapses.
    /// Returns how many messages were dropped.
    async fn drain(&mut self, limit: Duration) -> usize {
        self.jobs.close();
        let deadline = tokio::time::Instant::now() + limit;
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        while let Some(message) = self.jobs.recv().await {
            if dropped > 0 {
                dropped += 1;
                continue;
            }
            match tokio::time::timeout_at(deadline, self.dispatch(message)).await {
                Ok(()) => delivered += 1,
                Err(_) => dropped += 1,
            }
        }
        if dropped > 0 {
            tracing::warn!(delivered, dropped, "Mail queue not drained before shutdown, messages dropped");
        } else if delivered > 0 {
            tracing::info!(delivered, "Mail queue drained");
        }
        dropped
    }

    async fn dispatch(&self, message: Message) {
        let outcome = self.transport.deliver(&message).await;
        metrics::record_mail(outcome.is_ok());
        let error = match outcome {
            Ok(()) => None,
            Err(err) => {
                tracing::error!(to = %message.to, error = %err, "Failed to send mail");
                Some(err.to_string())
            }
        };
        let result = MailResult {
            to: message.to,
            subject: message.subject,
            success: error.is_none(),
            error,
        };
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.results.try_send(result) {
            tracing::warn!(to = %dropped.to, "Mail results queue full, dropping result");
        }
    }
}
