use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo_types::{NewUser, ProfileChanges, User};

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, is_active, is_staff, created_at";

/// Another record already holds the email. Stores return it inside `anyhow::Error`.
#[derive(Debug, Error)]
#[error("email already registered")]
pub struct DuplicateEmail;

const PG_UNIQUE_VIOLATION: &str = "23505";

fn unique_violation(e: sqlx::Error, what: &'static str) -> anyhow::Error {
    let code = e.as_database_error().and_then(|d| d.code());
    if code.as_deref() == Some(PG_UNIQUE_VIOLATION) {
        DuplicateEmail.into()
    } else {
        anyhow::Error::new(e).context(what)
    }
}

/// Persistence for user records. Only password hashes ever reach the store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new active, non-staff user.
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Look up by normalized email.
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Apply a partial update and return the stored record.
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> anyhow::Result<User>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .fetch_one(&self.db)
            .await
            .map_err(|e| unique_violation(e, "insert user"))?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("select user by id")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("select user by email")?;
        Ok(user)
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> anyhow::Result<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                password_hash = COALESCE($5, password_hash)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.email)
            .bind(changes.first_name)
            .bind(changes.last_name)
            .bind(changes.password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(|e| unique_violation(e, "update user profile"))?;
        Ok(user)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("update password hash")?;
        anyhow::ensure!(result.rows_affected() == 1, "user {id} not found");
        Ok(())
    }
}

/// In-memory store for tests and local runs without Postgres.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(DuplicateEmail.into());
        }
        let record = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            is_active: true,
            is_staff: false,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> anyhow::Result<User> {
        let mut users = self.users.write().await;
        if let Some(email) = &changes.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(DuplicateEmail.into());
            }
        }
        let user = users
            .get_mut(&id)
            .with_context(|| format!("user {id} not found"))?;
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(first_name) = changes.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = changes.last_name {
            user.last_name = last_name;
        }
        if let Some(password_hash) = changes.password_hash {
            user.password_hash = password_hash;
        }
        Ok(user.clone())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&id)
            .with_context(|| format!("user {id} not found"))?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }
}
