use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::CredentialStore;
use crate::error::StoreError;
use crate::user::{Address, Role, User, UserChanges};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, phone, addresses, \
                            refresh_tokens, created_at, updated_at";

/// PostgreSQL-backed store
///
/// Token sets live in a `TEXT[]` column on `users`; every token-set mutation
/// is a single `UPDATE` statement, so row locking serialises concurrent
/// rotations of the same user.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    phone: Option<String>,
    addresses: Json<Vec<Address>>,
    refresh_tokens: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse::<Role>().map_err(StoreError::QueryExecution)?;
        Ok(User {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role,
            phone: row.phone,
            addresses: row.addresses.0,
            refresh_tokens: row.refresh_tokens,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Wrap an array expression so only its last `cap` elements survive.
/// A NULL cap keeps the whole array.
fn capped(array_expr: &str, cap_param: &str) -> String {
    format!(
        "ARRAY(SELECT t FROM unnest({expr}) WITH ORDINALITY AS s(t, ord) \
         WHERE {cap}::BIGINT IS NULL OR ord > cardinality({expr}) - {cap}::BIGINT \
         ORDER BY ord)",
        expr = array_expr,
        cap = cap_param
    )
}

fn cap_param(max_tokens: Option<usize>) -> Option<i64> {
    max_tokens.map(|m| i64::try_from(m).unwrap_or(i64::MAX))
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_by_refresh_token(&self, token_digest: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE refresh_tokens @> ARRAY[$1::TEXT]",
            USER_COLUMNS
        ))
        .bind(token_digest)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users ORDER BY created_at",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(User::try_from).collect()
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, phone, addresses,
                               refresh_tokens, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.phone)
        .bind(Json(&user.addresses))
        .bind(&user.refresh_tokens)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let clear_or_set_phone = changes.phone.is_some();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                name = COALESCE($2, name),
                phone = CASE WHEN $3 THEN $4 ELSE phone END,
                addresses = COALESCE($5, addresses),
                role = COALESCE($6, role),
                updated_at = $7
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(id)
        .bind(changes.name)
        .bind(clear_or_set_phone)
        .bind(changes.phone.flatten())
        .bind(changes.addresses.map(Json))
        .bind(changes.role.map(|r| r.as_str()))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_refresh_token(
        &self,
        id: Uuid,
        token_digest: &str,
        max_tokens: Option<usize>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE users SET refresh_tokens = {} WHERE id = $1",
            capped("array_append(refresh_tokens, $2::TEXT)", "$3")
        ))
        .bind(id)
        .bind(token_digest)
        .bind(cap_param(max_tokens))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate_refresh_token(
        &self,
        id: Uuid,
        old_digest: &str,
        new_digest: &str,
        max_tokens: Option<usize>,
    ) -> Result<bool, StoreError> {
        // The membership test sits in the WHERE clause: a concurrent rotation
        // that committed first makes this statement match zero rows.
        let result = sqlx::query(&format!(
            "UPDATE users SET refresh_tokens = {} \
             WHERE id = $1 AND refresh_tokens @> ARRAY[$2::TEXT]",
            capped(
                "array_append(array_remove(refresh_tokens, $2::TEXT), $3::TEXT)",
                "$4"
            )
        ))
        .bind(id)
        .bind(old_digest)
        .bind(new_digest)
        .bind(cap_param(max_tokens))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_refresh_token(&self, id: Uuid, token_digest: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET refresh_tokens = array_remove(refresh_tokens, $2::TEXT) WHERE id = $1",
        )
        .bind(id)
        .bind(token_digest)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
