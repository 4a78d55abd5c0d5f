//! Notification seam.
//!
//! The workflow only ever needs "phone number + message, best effort". The
//! real SMS gateway (Twilio in production) implements this trait in the API
//! layer; this crate ships a no-op and a recording double.

use std::sync::Mutex;

use async_trait::async_trait;

/// One-way outbound notification sender.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `body` to `phone`. Best effort: the workflow logs failures
    /// and never lets them affect order state.
    async fn send_sms(&self, phone: &str, body: &str) -> anyhow::Result<()>;
}

/// Discards every message. Default wiring when no gateway is configured.
#[derive(Debug, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send_sms(&self, _phone: &str, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A captured outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    pub phone: String,
    pub body: String,
}

/// Records every message for later assertion. Test wiring.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentSms>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far, in send order.
    pub fn sent(&self) -> Vec<SentSms> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_sms(&self, phone: &str, body: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentSms {
                phone: phone.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}
