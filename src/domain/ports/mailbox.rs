use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{InboundMessage, OutboundMessage};

/// Inbound side of a role's mailbox
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages addressed to this mailbox, oldest first
    async fn list_unread(&self) -> DomainResult<Vec<InboundMessage>>;

    /// Mark a message as read
    async fn mark_read(&self, id: &str) -> DomainResult<()>;
}

/// Outbound message delivery to roles, groups, or workers
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> DomainResult<()>;
}
