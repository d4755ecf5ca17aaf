//! Inbound and outbound messaging seams.
//!
//! The supervisor receives work requests as `InboundMessage`s and pushes
//! alerts and results out through a `Notifier`. Both are trait seams so the
//! transport (chat service, CLI, test harness) stays out of the core.

use crate::error::ChannelError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message arriving from the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Opaque sender identity (used for authorization upstream).
    pub sender: String,

    /// The message text.
    pub text: String,

    /// When the message arrived.
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outbound notification seam. Delivery failures are reported but the
/// system never blocks on a notifier.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> std::result::Result<(), ChannelError>;
}

/// A notifier that drops everything, for tests and headless runs.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _text: &str) -> std::result::Result<(), ChannelError> {
        Ok(())
    }
}
