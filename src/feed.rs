// src/feed.rs
use crate::models::chat::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const FEED_CAPACITY: usize = 256;

/// Live message feed: one broadcast channel per user id.
///
/// The document store publishes every appended message here; each chat
/// surface holds at most one receiver at a time, replacing it on sign-in
/// and dropping it on sign-out. Dropping the receiver is the only
/// unsubscribe operation.
#[derive(Clone, Default)]
pub struct MessageFeed {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Message>>>>,
}

impl MessageFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to message-append events for a user.
    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Message> {
        let mut channels = self.channels.write().await;
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an appended message to every live subscriber for the user.
    pub async fn publish(&self, user_id: &str, message: Message) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(user_id) {
            // Err means no live receivers, which is fine: nobody is watching.
            if sender.send(message).is_err() {
                tracing::debug!("No active feed subscribers for user {}", user_id);
            }
        } else {
            tracing::debug!("No feed channel for user {}, message not delivered", user_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_published_message() {
        let feed = MessageFeed::new();
        let mut rx = feed.subscribe("1").await;

        feed.publish("1", Message::user("Hello", 100)).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.text, "Hello");
    }

    #[tokio::test]
    async fn test_feeds_are_scoped_per_user() {
        let feed = MessageFeed::new();
        let mut rx_a = feed.subscribe("a").await;
        let mut rx_b = feed.subscribe("b").await;

        feed.publish("a", Message::user("for a", 1)).await;

        assert_eq!(rx_a.recv().await.unwrap().text, "for a");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_noop() {
        let feed = MessageFeed::new();
        // Must not panic or block.
        feed.publish("nobody", Message::bot("hi", 1)).await;
    }
}
