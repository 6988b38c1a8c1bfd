use super::{Field, Hasher, StoreError, User, UserStore};
use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;

const SCHEMA: &str = include_str!("../../sql/schema.sql");

const USER_COLUMNS: &str = "id, username, email, hashed_password, is_admin, status, created_at, updated_at, last_login_at";

/// Postgres-backed account store.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
    hasher: Hasher,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hasher: Hasher::default(),
        }
    }

    /// Create the `users` table and its constraints when missing.
    ///
    /// # Errors
    /// Returns an error if the schema statements fail.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "MIGRATE"
        );
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn fetch_one_where(&self, column: &str, value: &str) -> Result<User, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)?
    }
}

fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::NotFound)
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    Ok(User {
        id: u64::try_from(id)
            .map_err(|_| StoreError::Backend(format!("negative user id: {id}")))?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        hashed_password: row.try_get("hashed_password")?,
        is_admin: row.try_get("is_admin")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_login_at: row.try_get("last_login_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Map a unique violation onto the column that collided.
fn conflict_field(err: &sqlx::Error) -> Option<Field> {
    if !is_unique_violation(err) {
        return None;
    }
    let constraint = match err {
        sqlx::Error::Database(db_err) => db_err.constraint().unwrap_or_default(),
        _ => "",
    };
    if constraint.contains("username") {
        Some(Field::Username)
    } else {
        Some(Field::Email)
    }
}

fn map_write_error(err: sqlx::Error) -> StoreError {
    match conflict_field(&err) {
        Some(field) => StoreError::AlreadyExists(field),
        None => StoreError::Database(err),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username_or_email(&self, login: &str) -> Result<User, StoreError> {
        if login.is_empty() {
            return Err(StoreError::NotFound);
        }
        let column = if login.contains('@') { "email" } else { "username" };
        self.fetch_one_where(column, login).await
    }

    async fn get_by_id(&self, id: u64) -> Result<User, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(to_db_id(id)?)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(user_from_row).ok_or(StoreError::NotFound)?
    }

    async fn create(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, StoreError> {
        let hashed_password = self.hasher.hash(password).await?;
        let query = format!(
            "INSERT INTO users (username, email, hashed_password) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(username)
            .bind(email)
            .bind(hashed_password)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .map_err(map_write_error)?;
        user_from_row(&row)
    }

    async fn save(&self, user: &User) -> Result<(), StoreError> {
        let query = r"
            UPDATE users
            SET username = $2,
                email = $3,
                hashed_password = $4,
                is_admin = $5,
                status = $6,
                last_login_at = $7,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(to_db_id(user.id)?)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.hashed_password)
            .bind(user.is_admin)
            .bind(user.status.as_str())
            .bind(user.last_login_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    fn hasher(&self) -> &Hasher {
        &self.hasher
    }
}
