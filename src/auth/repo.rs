use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::repo_types::{User, UserHistoryEntry, UserWithCredentials};

const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("key or username already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Storage contract for user documents. Implementations own username
/// uniqueness: `insert` and `put` must detect duplicates atomically.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, key: &str) -> RepoResult<Option<UserWithCredentials>>;
    async fn get_by_username(&self, username: &str) -> RepoResult<Option<UserWithCredentials>>;
    async fn insert(&self, user: UserWithCredentials) -> RepoResult<UserWithCredentials>;
    async fn put(&self, user: UserWithCredentials) -> RepoResult<UserWithCredentials>;
    /// Replaces the public document of an existing key. The stored password
    /// hash is kept as it is at write time.
    async fn update_profile(&self, user: User) -> RepoResult<UserWithCredentials>;
    async fn update_password_hash(&self, key: &str, new_hash: &str) -> RepoResult<()>;
    async fn append_history(&self, entry: UserHistoryEntry) -> RepoResult<()>;
    async fn list_history(&self, username: &str) -> RepoResult<Vec<UserHistoryEntry>>;
}

/// Document store on Postgres: one JSONB document per key.
#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write(e: sqlx::Error) -> RepoError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
            return RepoError::Conflict;
        }
    }
    RepoError::Database(e)
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_by_id(&self, key: &str) -> RepoResult<Option<UserWithCredentials>> {
        let row = sqlx::query_as::<_, (Json<UserWithCredentials>,)>(
            r#"SELECT doc FROM users WHERE key = $1"#,
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    async fn get_by_username(&self, username: &str) -> RepoResult<Option<UserWithCredentials>> {
        let row = sqlx::query_as::<_, (Json<UserWithCredentials>,)>(
            r#"SELECT doc FROM users WHERE username = $1 LIMIT 1"#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    async fn insert(&self, user: UserWithCredentials) -> RepoResult<UserWithCredentials> {
        sqlx::query(
            r#"
            INSERT INTO users (key, username, doc)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&user.user.key)
        .bind(&user.user.username)
        .bind(Json(&user))
        .execute(&self.db)
        .await
        .map_err(map_write)?;
        debug!(key = %user.user.key, "user document inserted");
        Ok(user)
    }

    async fn put(&self, user: UserWithCredentials) -> RepoResult<UserWithCredentials> {
        let (Json(doc),) = sqlx::query_as::<_, (Json<UserWithCredentials>,)>(
            r#"
            INSERT INTO users (key, username, doc)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET doc = EXCLUDED.doc
            RETURNING doc
            "#,
        )
        .bind(&user.user.key)
        .bind(&user.user.username)
        .bind(Json(&user))
        .fetch_one(&self.db)
        .await
        .map_err(map_write)?;
        Ok(doc)
    }

    async fn update_profile(&self, user: User) -> RepoResult<UserWithCredentials> {
        let row = sqlx::query_as::<_, (Json<UserWithCredentials>,)>(
            r#"
            UPDATE users
               SET doc = $2::jsonb || jsonb_build_object('hashed_password', doc->'hashed_password')
             WHERE key = $1
            RETURNING doc
            "#,
        )
        .bind(&user.key)
        .bind(Json(&user))
        .fetch_optional(&self.db)
        .await
        .map_err(map_write)?;
        row.map(|(Json(doc),)| doc).ok_or(RepoError::NotFound)
    }

    async fn update_password_hash(&self, key: &str, new_hash: &str) -> RepoResult<()> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET doc = jsonb_set(doc, '{hashed_password}', to_jsonb($2::text))
             WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(new_hash)
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn append_history(&self, entry: UserHistoryEntry) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_history (id, username, doc)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&entry.username)
        .bind(Json(&entry))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_history(&self, username: &str) -> RepoResult<Vec<UserHistoryEntry>> {
        let rows = sqlx::query_as::<_, (Json<UserHistoryEntry>,)>(
            r#"
            SELECT doc
              FROM user_history
             WHERE username = $1
             ORDER BY created_at ASC
            "#,
        )
        .bind(username)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(Json(e),)| e).collect())
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, UserWithCredentials>>,
    history: RwLock<Vec<UserHistoryEntry>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_by_id(&self, key: &str) -> RepoResult<Option<UserWithCredentials>> {
        Ok(self.users.read().await.get(key).cloned())
    }

    async fn get_by_username(&self, username: &str) -> RepoResult<Option<UserWithCredentials>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.user.username == username)
            .cloned())
    }

    async fn insert(&self, user: UserWithCredentials) -> RepoResult<UserWithCredentials> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.user.key)
            || users.values().any(|u| u.user.username == user.user.username)
        {
            return Err(RepoError::Conflict);
        }
        users.insert(user.user.key.clone(), user.clone());
        Ok(user)
    }

    async fn put(&self, user: UserWithCredentials) -> RepoResult<UserWithCredentials> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.user.username == user.user.username && u.user.key != user.user.key)
        {
            return Err(RepoError::Conflict);
        }
        users.insert(user.user.key.clone(), user.clone());
        Ok(user)
    }

    async fn update_profile(&self, user: User) -> RepoResult<UserWithCredentials> {
        let mut users = self.users.write().await;
        let stored = users.get_mut(&user.key).ok_or(RepoError::NotFound)?;
        stored.user = user;
        Ok(stored.clone())
    }

    async fn update_password_hash(&self, key: &str, new_hash: &str) -> RepoResult<()> {
        let mut users = self.users.write().await;
        let user = users.get_mut(key).ok_or(RepoError::NotFound)?;
        user.hashed_password = new_hash.to_string();
        Ok(())
    }

    async fn append_history(&self, entry: UserHistoryEntry) -> RepoResult<()> {
        self.history.write().await.push(entry);
        Ok(())
    }

    async fn list_history(&self, username: &str) -> RepoResult<Vec<UserHistoryEntry>> {
        Ok(self
            .history
            .read()
            .await
            .iter()
            .filter(|e| e.username == username)
            .cloned()
            .collect())
    }
}
