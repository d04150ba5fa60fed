//! SQLite-backed mailbox and message router.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{InboundMessage, MessageCategory, OutboundMessage};
use crate::domain::ports::{Mailbox, MessageRouter};

/// Mail store shared by every role; each instance reads one address.
#[derive(Clone)]
pub struct SqliteMailbox {
    pool: SqlitePool,
    address: String,
}

impl SqliteMailbox {
    pub fn new(pool: SqlitePool, address: impl Into<String>) -> Self {
        Self {
            pool,
            address: address.into(),
        }
    }

    /// Same store, viewed from another address.
    pub fn for_address(&self, address: impl Into<String>) -> Self {
        Self::new(self.pool.clone(), address)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Messages for this address, read or not, oldest first.
    pub async fn list_all(&self) -> DomainResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE recipient = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&self.address)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }
}

/// A persisted message with its delivery metadata.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message: InboundMessage,
    pub priority: String,
    pub category: Option<MessageCategory>,
}

#[async_trait]
impl Mailbox for SqliteMailbox {
    async fn list_unread(&self) -> DomainResult<Vec<InboundMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM messages WHERE recipient = ? AND read = 0 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(&self.address)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| StoredMessage::from(row).message)
            .collect())
    }

    async fn mark_read(&self, id: &str) -> DomainResult<()> {
        let result = sqlx::query("UPDATE messages SET read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("message {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRouter for SqliteMailbox {
    async fn send(&self, message: OutboundMessage) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO messages (id, sender, recipient, subject, body, priority, category, read, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)"#,
        )
        .bind(format!("msg-{}", Uuid::new_v4().simple()))
        .bind(&message.from)
        .bind(&message.to)
        .bind(&message.subject)
        .bind(&message.body)
        .bind(message.priority.as_str())
        .bind(message.category.map(|c| c.as_str()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::Notification {
            recipient: message.to.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    sender: String,
    recipient: String,
    subject: String,
    body: String,
    priority: String,
    category: Option<String>,
    read: bool,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            message: InboundMessage {
                id: row.id,
                from: row.sender,
                to: row.recipient,
                subject: row.subject,
                body: row.body,
                read: row.read,
            },
            priority: row.priority,
            category: row.category.as_deref().and_then(MessageCategory::from_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::MessagePriority;

    async fn setup_mailbox(address: &str) -> SqliteMailbox {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteMailbox::new(pool, address)
    }

    #[tokio::test]
    async fn test_send_then_list_unread_for_recipient_only() {
        let refinery = setup_mailbox("gastown/refinery").await;
        let witness = refinery.for_address("gastown/witness");

        refinery
            .send(OutboundMessage::new("gastown/refinery", "gastown/witness", "MERGED nux", "Worker: nux"))
            .await
            .unwrap();
        witness
            .send(
                OutboundMessage::new("gastown/witness", "gastown/refinery", "HELP", "stuck")
                    .with_priority(MessagePriority::High)
                    .with_category(MessageCategory::Task),
            )
            .await
            .unwrap();

        let inbox = witness.list_unread().await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].subject, "MERGED nux");
        assert_eq!(inbox[0].from, "gastown/refinery");
        assert!(!inbox[0].read);

        let stored = refinery.list_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].priority, "high");
        assert_eq!(stored[0].category, Some(MessageCategory::Task));
    }

    #[tokio::test]
    async fn test_mark_read_hides_message() {
        let mailbox = setup_mailbox("gastown/refinery").await;
        mailbox
            .send(OutboundMessage::new("gastown/nux", "gastown/refinery", "MERGE_READY nux", ""))
            .await
            .unwrap();

        let id = mailbox.list_unread().await.unwrap()[0].id.clone();
        mailbox.mark_read(&id).await.unwrap();

        assert!(mailbox.list_unread().await.unwrap().is_empty());
        let all = mailbox.list_all().await.unwrap();
        assert!(all[0].message.read);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_is_not_found() {
        let mailbox = setup_mailbox("gastown/refinery").await;
        assert!(matches!(
            mailbox.mark_read("msg-missing").await,
            Err(DomainError::NotFound(_))
        ));
    }
}
