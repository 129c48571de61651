use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::repo_types::{NewUser, ProfileUpdate, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username or email already taken")]
    Duplicate,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Durable user records. Every method touches exactly one user.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Matches a user whose username equals `username` or whose email equals `email`.
    async fn find_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;

    /// `None` unsets the stored token.
    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<(), StoreError>;

    /// Swaps `current` for `next` only if `current` is still the stored token.
    /// Returns false when the slot already holds something else.
    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        next: &str,
    ) -> Result<bool, StoreError>;

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError>;

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError>;
}

const USER_COLUMNS: &str = "id, username, email, full_name, avatar, cover_image, watch_history, \
                            password_hash, refresh_token, created_at, updated_at";

fn map_unique(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate;
        }
    }
    StoreError::Database(e)
}

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
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2 LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, full_name, avatar, cover_image, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.full_name)
            .bind(&user.avatar)
            .bind(&user.cover_image)
            .bind(&user.password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(map_unique)?;
        debug!(user_id = %created.id, "user row inserted");
        Ok(created)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        next: &str,
    ) -> Result<bool, StoreError> {
        let done = sqlx::query(
            "UPDATE users SET refresh_token = $3, updated_at = now() \
             WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id)
        .bind(current)
        .bind(next)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET full_name   = COALESCE($2, full_name),
                   email       = COALESCE($3, email),
                   avatar      = COALESCE($4, avatar),
                   cover_image = COALESCE($5, cover_image),
                   updated_at  = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(update.full_name)
            .bind(update.email)
            .bind(update.avatar)
            .bind(update.cover_image)
            .fetch_optional(&self.db)
            .await
            .map_err(map_unique)?;
        Ok(user)
    }
}

/// Process-local store for tests and database-less local runs.
/// Data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        let found = users.values().find(|u| {
            username.is_some_and(|name| u.username == name)
                || email.is_some_and(|mail| u.email == mail)
        });
        Ok(found.cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Duplicate);
        }
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar,
            cover_image: user.cover_image,
            watch_history: Vec::new(),
            password_hash: user.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<(), StoreError> {
        if let Some(u) = self.users.lock().unwrap().get_mut(&id) {
            u.refresh_token = token.map(str::to_owned);
            u.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        next: &str,
    ) -> Result<bool, StoreError> {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(&id) {
            Some(u) if u.refresh_token.as_deref() == Some(current) => {
                u.refresh_token = Some(next.to_owned());
                u.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
        if let Some(u) = self.users.lock().unwrap().get_mut(&id) {
            u.password_hash = hash.to_owned();
            u.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().unwrap();
        if let Some(email) = &update.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Duplicate);
            }
        }
        let Some(u) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(full_name) = update.full_name {
            u.full_name = full_name;
        }
        if let Some(email) = update.email {
            u.email = email;
        }
        if let Some(avatar) = update.avatar {
            u.avatar = avatar;
        }
        if let Some(cover) = update.cover_image {
            u.cover_image = Some(cover);
        }
        u.updated_at = OffsetDateTime::now_utc();
        Ok(Some(u.clone()))
    }
}
