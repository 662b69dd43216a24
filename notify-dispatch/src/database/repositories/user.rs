//! User repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::UserDbModel;
use crate::notification::recipient::{Supervisor, SupervisorLookup};

/// User repository trait.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user and return its id.
    async fn create(&self, user: &UserDbModel) -> Result<i64>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserDbModel>>;

    /// Supervisor of user `id`, if the user exists and has one.
    async fn find_supervisor(&self, id: i64) -> Result<Option<UserDbModel>>;
}

/// SQLx implementation of UserRepository.
pub struct SqlxUserRepository {
    pool: SqlitePool,
}

impl SqlxUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &UserDbModel) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_account (firstname, lastname, email, supervisor_id)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user.firstname)
        .bind(&user.lastname)
        .bind(&user.email)
        .bind(user.supervisor_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserDbModel>> {
        let user = sqlx::query_as::<_, UserDbModel>(
            "SELECT id, firstname, lastname, email, supervisor_id FROM user_account WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_supervisor(&self, id: i64) -> Result<Option<UserDbModel>> {
        let supervisor = sqlx::query_as::<_, UserDbModel>(
            r#"
            SELECT s.id, s.firstname, s.lastname, s.email, s.supervisor_id
            FROM user_account u
            INNER JOIN user_account s ON s.id = u.supervisor_id
            WHERE u.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(supervisor)
    }
}

#[async_trait]
impl SupervisorLookup for SqlxUserRepository {
    async fn supervisor_of(&self, actor_id: i64) -> Result<Option<Supervisor>> {
        Ok(self
            .find_supervisor(actor_id)
            .await?
            .filter(|s| !s.email.trim().is_empty())
            .map(Supervisor::from))
    }
}
