use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const TOKEN_KEY_LEN: usize = 40;

/// Opaque bearer tokens, one per user, no expiry.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the user's token, creating it on first use.
    async fn get_or_create(&self, user_id: Uuid) -> anyhow::Result<String>;

    async fn find_user_id(&self, key: &str) -> anyhow::Result<Option<Uuid>>;
}

pub fn generate_key() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_KEY_LEN)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct PgTokenStore {
    db: PgPool,
}

impl PgTokenStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn get_or_create(&self, user_id: Uuid) -> anyhow::Result<String> {
        // On conflict the existing row is returned untouched.
        let key = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO auth_tokens (key, user_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING key
            "#,
        )
        .bind(generate_key())
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .context("get or create token")?;
        Ok(key)
    }

    async fn find_user_id(&self, key: &str) -> anyhow::Result<Option<Uuid>> {
        let user_id = sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM auth_tokens WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .context("select token")?;
        Ok(user_id)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryTokenStore {
    by_user: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get_or_create(&self, user_id: Uuid) -> anyhow::Result<String> {
        let mut by_user = self.by_user.write().await;
        Ok(by_user.entry(user_id).or_insert_with(generate_key).clone())
    }

    async fn find_user_id(&self, key: &str) -> anyhow::Result<Option<Uuid>> {
        let by_user = self.by_user.read().await;
        Ok(by_user
            .iter()
            .find(|(_, k)| k.as_str() == key)
            .map(|(id, _)| *id))
    }
}
