// src/store.rs
use crate::feed::MessageFeed;
use crate::models::chat::{Message, MessageRow};
use crate::models::preferences::{Preferences, PreferencesPatch, Theme};
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),
}

/// The per-user document store: one preferences document per user and
/// an append-only message collection. Successful message appends are
/// published to the live feed. Retrieval order is unspecified; callers
/// sort by timestamp themselves.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_preferences(&self, user_id: &str) -> Result<Option<Preferences>, StoreError>;

    async fn create_preferences(
        &self,
        user_id: &str,
        prefs: &Preferences,
    ) -> Result<(), StoreError>;

    /// Merge-write: only fields present in the patch change. Concurrent
    /// writers are last-write-wins, no conflict detection.
    async fn merge_preferences(
        &self,
        user_id: &str,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, StoreError>;

    async fn append_message(&self, user_id: &str, message: &Message) -> Result<(), StoreError>;

    async fn list_messages(&self, user_id: &str) -> Result<Vec<Message>, StoreError>;
}

pub struct PgDocumentStore {
    pool: PgPool,
    feed: MessageFeed,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, feed: MessageFeed) -> Self {
        Self { pool, feed }
    }

    fn parse_user_id(user_id: &str) -> Result<i32, StoreError> {
        user_id
            .parse::<i32>()
            .map_err(|_| StoreError::InvalidUserId(user_id.to_string()))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn load_preferences(&self, user_id: &str) -> Result<Option<Preferences>, StoreError> {
        let id = Self::parse_user_id(user_id)?;

        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT theme, language FROM preferences WHERE user_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(theme, language)| Preferences {
            theme: Theme::from_str(&theme),
            language,
        }))
    }

    async fn create_preferences(
        &self,
        user_id: &str,
        prefs: &Preferences,
    ) -> Result<(), StoreError> {
        let id = Self::parse_user_id(user_id)?;

        sqlx::query(
            "INSERT INTO preferences (user_id, theme, language)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(id)
        .bind(prefs.theme.as_str())
        .bind(&prefs.language)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn merge_preferences(
        &self,
        user_id: &str,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, StoreError> {
        let id = Self::parse_user_id(user_id)?;

        // Upsert with COALESCE keeps absent patch fields untouched.
        let (theme, language) = sqlx::query_as::<_, (String, String)>(
            "INSERT INTO preferences (user_id, theme, language)
             VALUES ($1, COALESCE($2, 'light'), COALESCE($3, 'en'))
             ON CONFLICT (user_id) DO UPDATE SET
                 theme = COALESCE($2, preferences.theme),
                 language = COALESCE($3, preferences.language),
                 updated_at = NOW()
             RETURNING theme, language",
        )
        .bind(id)
        .bind(patch.theme.map(|t| t.as_str()))
        .bind(patch.language.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(Preferences {
            theme: Theme::from_str(&theme),
            language,
        })
    }

    async fn append_message(&self, user_id: &str, message: &Message) -> Result<(), StoreError> {
        let id = Self::parse_user_id(user_id)?;

        sqlx::query(
            "INSERT INTO messages (user_id, text, sender, timestamp_ms)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(&message.text)
        .bind(message.sender.as_str())
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        self.feed.publish(user_id, message.clone()).await;
        Ok(())
    }

    async fn list_messages(&self, user_id: &str) -> Result<Vec<Message>, StoreError> {
        let id = Self::parse_user_id(user_id)?;

        // Insertion order only; ascending-timestamp display order is the
        // reader's responsibility.
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, user_id, text, sender, timestamp_ms FROM messages WHERE user_id = $1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory document store for tests: same contract as the
    /// Postgres store, including feed publication on append.
    pub struct MemoryStore {
        preferences: Mutex<HashMap<String, Preferences>>,
        messages: Mutex<HashMap<String, Vec<Message>>>,
        feed: MessageFeed,
    }

    impl MemoryStore {
        pub fn new(feed: MessageFeed) -> Self {
            Self {
                preferences: Mutex::new(HashMap::new()),
                messages: Mutex::new(HashMap::new()),
                feed,
            }
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn load_preferences(
            &self,
            user_id: &str,
        ) -> Result<Option<Preferences>, StoreError> {
            Ok(self.preferences.lock().await.get(user_id).cloned())
        }

        async fn create_preferences(
            &self,
            user_id: &str,
            prefs: &Preferences,
        ) -> Result<(), StoreError> {
            self.preferences
                .lock()
                .await
                .entry(user_id.to_string())
                .or_insert_with(|| prefs.clone());
            Ok(())
        }

        async fn merge_preferences(
            &self,
            user_id: &str,
            patch: &PreferencesPatch,
        ) -> Result<Preferences, StoreError> {
            let mut prefs = self.preferences.lock().await;
            let current = prefs
                .entry(user_id.to_string())
                .or_insert_with(Preferences::default);
            *current = current.merged(patch);
            Ok(current.clone())
        }

        async fn append_message(
            &self,
            user_id: &str,
            message: &Message,
        ) -> Result<(), StoreError> {
            self.messages
                .lock()
                .await
                .entry(user_id.to_string())
                .or_default()
                .push(message.clone());
            self.feed.publish(user_id, message.clone()).await;
            Ok(())
        }

        async fn list_messages(&self, user_id: &str) -> Result<Vec<Message>, StoreError> {
            Ok(self
                .messages
                .lock()
                .await
                .get(user_id)
                .cloned()
                .unwrap_or_default())
        }
    }
}
