//! Outgoing mail: the `Mailer` seam, its SMTP and in-memory implementations,
//! and the messages this service sends.

mod memory;
pub mod recovery;
mod smtp;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryMailer;
pub use smtp::SmtpMailer;

/// A single message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub from: String,
    pub to: Vec<String>,
    pub html_body: Option<String>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid message: {0}")]
    Build(String),

    #[error("smtp transport error: {0}")]
    Transport(String),

    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Sends mail synchronously from the caller's point of view: `Ok` means the
/// transport accepted the message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}
