//! In-process mailers for development and tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use crate::{MailError, Mailer, OutgoingEmail, SendReceipt};

/// Mailer that only logs messages.
///
/// Every message is accepted and gets a fresh `log-<uuid>` message id.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        let message_id = format!("log-{}", uuid::Uuid::new_v4());
        info!(
            to = %email.to,
            kind = %email.kind,
            subject = %email.subject,
            message_id = %message_id,
            "Email logged (not delivered)"
        );
        Ok(SendReceipt::new(message_id))
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[derive(Debug, Default)]
struct Outbox {
    sent: Vec<(String, OutgoingEmail)>,
    failing: HashSet<String>,
}

/// Mailer that records accepted messages in memory.
///
/// Clones share the same outbox. Recipients registered with
/// [`MemoryMailer::fail_for`] are rejected, which lets tests exercise the
/// per-recipient failure path.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    outbox: Arc<Mutex<Outbox>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryMailer {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every future message to `address`.
    pub fn fail_for(&self, address: impl Into<String>) {
        self.lock().failing.insert(address.into().to_lowercase());
    }

    /// Accepts messages to `address` again.
    pub fn recover(&self, address: &str) {
        self.lock().failing.remove(&address.to_lowercase());
    }

    /// Returns the accepted messages in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.lock().sent.iter().map(|(_, e)| e.clone()).collect()
    }

    /// Returns the accepted messages addressed to `address`.
    #[must_use]
    pub fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        let address = address.to_lowercase();
        self.lock()
            .sent
            .iter()
            .filter(|(_, e)| e.to.to_lowercase() == address)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Returns the message id issued for the most recent message to `address`.
    #[must_use]
    pub fn last_message_id(&self, address: &str) -> Option<String> {
        let address = address.to_lowercase();
        self.lock()
            .sent
            .iter()
            .rev()
            .find(|(_, e)| e.to.to_lowercase() == address)
            .map(|(id, _)| id.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        let mut outbox = self.lock();
        if outbox.failing.contains(&email.to.to_lowercase()) {
            return Err(MailError::Rejected {
                recipient: email.to.clone(),
                reason: "recipient marked as failing".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let message_id = format!("mem-{id}");
        outbox.sent.push((message_id.clone(), email.clone()));
        drop(outbox);

        Ok(SendReceipt::new(message_id))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
