//! In-app notifications and the external delivery boundary.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use sacco_db::queries;
use sacco_types::models::{Notification, NotificationCategory};

use crate::{EngineResult, LoanEngine};

/// External delivery channel (email, SMS gateway, ...). Fire-and-forget:
/// a failing sink is logged and never affects the financial transaction
/// that produced the notification.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Default sink: log-only delivery.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            user = %notification.user_id,
            category = %notification.category,
            "notification: {}",
            notification.title
        );
        Ok(())
    }
}

/// Write a notification row inside the caller's transaction and hand it
/// back for post-commit delivery.
pub(crate) fn create(
    conn: &Connection,
    user_id: Uuid,
    title: &str,
    message: &str,
    category: NotificationCategory,
    related_entity: Option<&str>,
) -> EngineResult<Notification> {
    let notification = Notification {
        id: Uuid::new_v4(),
        user_id,
        title: title.to_string(),
        message: message.to_string(),
        category,
        related_entity: related_entity.map(str::to_string),
        created_at: Utc::now(),
    };
    queries::insert_notification(conn, &notification)?;
    Ok(notification)
}

impl LoanEngine {
    /// Deliver a batch of already-committed notifications through the sink.
    pub(crate) fn deliver_all(&self, notifications: &[Notification]) {
        for notification in notifications {
            if let Err(e) = self.sink.deliver(notification) {
                warn!(
                    notification = %notification.id,
                    user = %notification.user_id,
                    "notification delivery failed: {e:#}"
                );
            }
        }
    }
}
