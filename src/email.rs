//! Outbound email contract.
//!
//! Rendering lives in [`crate::notify::email`]; this module only defines the
//! multipart message shape and the sender seam. Production delivery is an
//! external concern.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::error::EmailError;

/// A multipart (text + HTML) message from a configured source address.
#[derive(Clone, Debug)]
pub struct OutboundEmail {
    pub source: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), EmailError>;
}

/// Records messages instead of delivering them; doubles as the local
/// development sender and the test double.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<OutboundEmail>>,
    /// When set, the next `fail_next` sends error out (for retry testing).
    fail_next: Mutex<usize>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Makes the next `count` sends fail.
    pub fn fail_next(&self, count: usize) {
        *self.fail_next.lock() = count;
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, email: OutboundEmail) -> Result<(), EmailError> {
        {
            let mut failures = self.fail_next.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(EmailError("simulated delivery failure".to_string()));
            }
        }
        info!(to = %email.to, subject = %email.subject, "recording outbound email");
        self.sent.lock().push(email);
        Ok(())
    }
}
