//! SQLite-backed credential store.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::PasswordPolicy;
use crate::db::{self, DbPool};
use crate::error::{ApiError, ApiResult, FieldError};

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// Public profile of a registered user. The password hash never leaves
/// this module and is not part of this type.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orcid_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Registration request body.
#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    /// Optional ORCID iD for scholarly data export, e.g. `0000-0002-1825-0097`.
    #[serde(default)]
    pub orcid_id: Option<String>,
}

pub struct UserStore {
    pool: DbPool,
    policy: PasswordPolicy,
}

impl UserStore {
    pub fn new(pool: DbPool, policy: PasswordPolicy) -> Self {
        Self { pool, policy }
    }

    /// Register a new user. Stores a one-way salted hash, never the raw
    /// password, and returns the public profile.
    pub fn register(&self, new_user: &NewUser) -> ApiResult<User> {
        let username = new_user.username.trim();
        let email = new_user.email.trim();
        let mut fields = Vec::new();

        let len = username.chars().count();
        if !(3..=50).contains(&len) {
            fields.push(FieldError {
                field: "username",
                message: "username must be 3-50 characters".into(),
            });
        }
        // An email-shaped username would be ambiguous in the
        // username-or-email login lookup and could shadow another
        // account's address.
        if username.contains('@') || username.chars().any(char::is_whitespace) {
            fields.push(FieldError {
                field: "username",
                message: "username must not contain '@' or whitespace".into(),
            });
        }
        if !valid_email(email) {
            fields.push(FieldError {
                field: "email",
                message: "not a valid email address".into(),
            });
        }
        if let Err(message) = self.policy.check(&new_user.password) {
            fields.push(FieldError {
                field: "password",
                message,
            });
        }
        let orcid_id = match normalize_orcid(new_user.orcid_id.as_deref()) {
            Ok(orcid) => orcid,
            Err(message) => {
                fields.push(FieldError {
                    field: "orcid_id",
                    message,
                });
                None
            }
        };
        if !fields.is_empty() {
            return Err(ApiError::Validation(fields));
        }

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_owned(),
            email: email.to_owned(),
            orcid_id,
            created_at: Utc::now(),
        };
        let salt = generate_salt();
        let password_hash = hash_password(&new_user.password, &salt);

        let conn = self.pool.get()?;
        let result = conn.execute(
            "INSERT INTO users (id, username, email, password_hash, salt, orcid_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                user.id,
                user.username,
                user.email,
                password_hash,
                salt,
                user.orcid_id,
                db::format_ts(user.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(user),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ApiError::Conflict(
                    "username or email already registered".into(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify a login attempt by username or email.
    ///
    /// The hash comparison is constant-time, and the unknown-identity path
    /// burns a dummy hash so both failure modes cost the same.
    pub fn authenticate(&self, username_or_email: &str, password: &str) -> ApiResult<User> {
        let conn = self.pool.get()?;
        let row: Result<(UserRow, String, String), _> = conn.query_row(
            "SELECT id, username, email, orcid_id, created_at, password_hash, salt
             FROM users WHERE username = ?1 OR email = ?1",
            rusqlite::params![username_or_email.trim()],
            |row| {
                Ok((
                    UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        orcid_id: row.get(3)?,
                        created_at: row.get(4)?,
                    },
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        );

        match row {
            Ok((user_row, stored_hash, salt)) => {
                let attempt_hash = hash_password(password, &salt);
                if !constant_time_eq(stored_hash.as_bytes(), attempt_hash.as_bytes()) {
                    return Err(ApiError::Auth("password mismatch".into()));
                }
                user_row.into_user()
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                // Dummy hash to prevent a timing side-channel on identity
                // existence.
                let _ = hash_password(password, "0000000000000000");
                Err(ApiError::Auth("unknown identity".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a user by id.
    pub fn get(&self, user_id: &str) -> ApiResult<Option<User>> {
        let conn = self.pool.get()?;
        let row = conn.query_row(
            "SELECT id, username, email, orcid_id, created_at FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            UserRow::from_row,
        );
        match row {
            Ok(user_row) => Ok(Some(user_row.into_user()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Update the only mutable profile field, the external scholarly
    /// identifier. `Some("")` clears it; `None` leaves it untouched.
    pub fn update_profile(&self, user_id: &str, orcid_id: Option<&str>) -> ApiResult<User> {
        if let Some(raw) = orcid_id {
            let normalized =
                normalize_orcid(Some(raw)).map_err(|m| ApiError::invalid("orcid_id", m))?;
            let conn = self.pool.get()?;
            let updated = conn.execute(
                "UPDATE users SET orcid_id = ?1 WHERE id = ?2",
                rusqlite::params![normalized, user_id],
            )?;
            if updated == 0 {
                return Err(ApiError::NotFound("user"));
            }
        }
        self.get(user_id)?.ok_or(ApiError::NotFound("user"))
    }
}

/// Raw row, timestamp still a string.
struct UserRow {
    id: String,
    username: String,
    email: String,
    orcid_id: Option<String>,
    created_at: String,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            orcid_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn into_user(self) -> ApiResult<User> {
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            orcid_id: self.orcid_id,
            created_at: db::parse_ts(&self.created_at)?,
        })
    }
}

/// Minimal syntactic email check: one `@`, non-empty local part, dotted
/// domain, no whitespace.
fn valid_email(email: &str) -> bool {
    if email.len() > 100 || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Validate and normalize an ORCID iD (`dddd-dddd-dddd-dddX` with an
/// ISO 7064 mod 11-2 check character). Empty input clears the field.
fn normalize_orcid(raw: Option<&str>) -> Result<Option<String>, String> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(value) => value,
    };

    let groups: Vec<&str> = raw.split('-').collect();
    let shape_ok = groups.len() == 4
        && groups.iter().all(|g| g.len() == 4)
        && groups
            .concat()
            .chars()
            .enumerate()
            .all(|(i, c)| c.is_ascii_digit() || (i == 15 && (c == 'X' || c == 'x')));
    if !shape_ok {
        return Err("ORCID iD must look like 0000-0002-1825-0097".into());
    }

    let normalized = raw.to_ascii_uppercase();
    let digits: Vec<char> = normalized.chars().filter(|c| *c != '-').collect();
    let mut total: u32 = 0;
    for c in &digits[..15] {
        total = (total + c.to_digit(10).unwrap_or(0)) * 2;
    }
    let expected = match (12 - total % 11) % 11 {
        10 => 'X',
        d => char::from_digit(d, 10).unwrap_or('0'),
    };
    if digits[15] != expected {
        return Err("ORCID iD checksum does not match".into());
    }
    Ok(Some(normalized))
}

// ── Cryptographic helpers ───────────────────────────────────────────

/// Generate a random salt (hex-encoded).
fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with salt using iterated SHA-256.
fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    // Iterated hashing for key stretching
    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

/// Byte-wise comparison that does not short-circuit on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
