//! Alert delivery seam.
//!
//! The monitor decides *when* to alert; a [`NotificationSender`] decides
//! *how*. Concrete senders (Telegram bot, webhook, mail) live with the
//! deployment. [`LogSender`] is the built-in fallback.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use fleet_state::{ChannelId, ServerId};

use crate::probe::BoxFuture;

/// An alert about one unreachable server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub server_id: ServerId,
    pub server_name: String,
    pub reason: String,
    pub consecutive_failures: u32,
    /// Time of the failing probe that triggered the alert.
    pub detected_at: DateTime<Utc>,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server {} ({}) is unreachable: {} ({} consecutive failures)",
            self.server_name, self.server_id, self.reason, self.consecutive_failures
        )
    }
}

/// Why an alert was not delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("unknown notification channel {0}")]
    UnknownChannel(ChannelId),

    #[error("channel rejected notification: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers alerts to a notification channel.
///
/// `Ok(())` means the channel accepted the alert; only then does the
/// cooldown start.
pub trait NotificationSender: Send + Sync {
    fn send<'a>(
        &'a self,
        channel_id: ChannelId,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Writes alerts to the log and always accepts them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

impl NotificationSender for LogSender {
    fn send<'a>(
        &'a self,
        channel_id: ChannelId,
        notification: &'a Notification,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            warn!(
                channel_id,
                server_id = notification.server_id,
                failures = notification.consecutive_failures,
                reason = %notification.reason,
                "ALERT: {notification}"
            );
            Ok(())
        })
    }
}
