//! User accounts.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{OptionalExtension, Row, ToSql, params};
use serde::Serialize;

use super::{Store, StoreError};
use crate::policy::Role;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, is_active, created_at, last_login_at";

/// A stored account, including its password hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Row id.
    pub id: i64,
    /// Unique login name.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Fixed at creation.
    pub role: Role,
    /// Inactive accounts cannot log in.
    pub is_active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Most recent successful login.
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Registration input. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Account role.
    pub role: Role,
}

/// Public view of a [`User`], safe to return from the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    /// Row id.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Account role.
    pub role: Role,
    /// Whether the account may log in.
    pub is_active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error| FromSqlError::Other(Box::new(error)))
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
        last_login_at: row.get(7)?,
    })
}

impl Store {
    /// Inserts a new account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when the username or email is
    /// already registered.
    pub fn create_user(&self, new: &NewUser) -> Result<User, StoreError> {
        let conn = self.lock()?;

        let taken = |column: &str, value: &str| -> rusqlite::Result<bool> {
            conn.query_row(
                &format!("SELECT EXISTS(SELECT 1 FROM users WHERE {column} = ?1)"),
                params![value],
                |row| row.get(0),
            )
        };
        if taken("username", &new.username)? {
            return Err(StoreError::Duplicate { field: "username" });
        }
        if taken("email", &new.email)? {
            return Err(StoreError::Duplicate { field: "email" });
        }

        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO users (username, email, password_hash, role, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                new.username,
                new.email,
                new.password_hash,
                new.role,
                created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(user_id = id, role = %new.role, "user registered");

        Ok(User {
            id,
            username: new.username.clone(),
            email: new.email.clone(),
            password_hash: new.password_hash.clone(),
            role: new.role,
            is_active: true,
            created_at,
            last_login_at: None,
        })
    }

    /// Looks up an account by login name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Looks up an account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Lists accounts with `role`, ordered by username.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn users_by_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = ?1 ORDER BY username ASC"
        ))?;
        let users = stmt
            .query_map(params![role], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Records a successful login.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub fn touch_last_login(&self, id: i64) -> Result<DateTime<Utc>, StoreError> {
        let conn = self.lock()?;
        let now = Utc::now();
        let updated = conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("user", id));
        }
        Ok(now)
    }

    /// Enables or disables an account. Disabled accounts cannot log in and
    /// their outstanding tokens stop working.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub fn set_active(&self, id: i64, active: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        if updated == 0 {
            return Err(StoreError::not_found("user", id));
        }
        Ok(())
    }
}
