#![allow(dead_code)]

use archive_jobs::mail::{DeliveryError, MailTransport};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
enum Failure {
    Transient,
    Permanent,
}

/// Transport that records deliveries and fails addresses on demand.
#[derive(Default)]
pub struct ScriptedTransport {
    sent: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, (Failure, usize)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` sends to `address` with a retryable error.
    pub fn fail_transient(&self, address: &str, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), (Failure::Transient, times));
    }

    /// Reject every send to `address`.
    pub fn reject(&self, address: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), (Failure::Permanent, usize::MAX));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl MailTransport for ScriptedTransport {
    fn send(&self, address: &str, _subject: &str, _body: &str) -> Result<(), DeliveryError> {
        let mut failures = self.failures.lock().unwrap();
        if let Some((failure, remaining)) = failures.get_mut(address) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(match failure {
                    Failure::Transient => DeliveryError::Network("connection reset".to_string()),
                    Failure::Permanent => DeliveryError::Rejected {
                        status: 422,
                        message: "mailbox does not exist".to_string(),
                    },
                });
            }
        }
        drop(failures);
        self.sent.lock().unwrap().push(address.to_string());
        Ok(())
    }
}
