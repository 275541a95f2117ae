//! Outbound mail transports.

use anyhow::Result;
use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by mail provider")]
    RateLimited,

    #[error("mail provider error {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("rejected by mail provider ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl DeliveryError {
    /// Transient failures worth another attempt later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Network(_) | DeliveryError::RateLimited | DeliveryError::Provider { .. }
        )
    }
}

pub trait MailTransport: Send + Sync {
    fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

fn check_address(address: &str) -> Result<(), DeliveryError> {
    let address = address.trim();
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DeliveryError::InvalidAddress(address.to_string())),
    }
}

/// Logs every message instead of sending it.
pub struct LogMailTransport {
    from_address: String,
}

impl LogMailTransport {
    pub fn new(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }
}

impl MailTransport for LogMailTransport {
    fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        check_address(address)?;
        info!(
            "Mail from {} to {}: {} ({} bytes)",
            self.from_address,
            address,
            subject,
            body.len()
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Posts each message as JSON to a mail provider API.
pub struct HttpMailTransport {
    client: Client,
    endpoint: String,
    token: Option<String>,
    from_address: String,
}

impl HttpMailTransport {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        from_address: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            token,
            from_address: from_address.to_string(),
        })
    }
}

/// Map a provider response status to a delivery result.
fn classify_status(status: u16, body: String) -> Result<(), DeliveryError> {
    match status {
        200..=299 => Ok(()),
        429 => Err(DeliveryError::RateLimited),
        500..=599 => Err(DeliveryError::Provider {
            status,
            message: body,
        }),
        _ => Err(DeliveryError::Rejected {
            status,
            message: body,
        }),
    }
}

impl MailTransport for HttpMailTransport {
    fn send(&self, address: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        check_address(address)?;

        let request = SendRequest {
            from: &self.from_address,
            to: address.trim(),
            subject,
            text: body,
        };
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .map_err(|e| DeliveryError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        debug!("Mail provider answered {} for {}", status, address);
        if response.status().is_success() {
            return Ok(());
        }
        let text = response.text().unwrap_or_default();
        classify_status(status, text)
    }
}
