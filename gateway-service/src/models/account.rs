//! Account model - end-user identity records owned by the record store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Persisted account row.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    /// Password epoch: advanced on every password change to invalidate
    /// previously issued credentials.
    pub password_at: DateTime<Utc>,
    pub email_verified: bool,
    pub email_verification_code: Option<String>,
    pub password_reset_code: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    /// Create a new, unverified account. `email` is case-folded here so every
    /// write path stores the same form.
    pub fn new(email: &str, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            email: normalize_email(email),
            password_hash,
            password_at: next_password_epoch(None),
            email_verified: false,
            email_verification_code: None,
            password_reset_code: None,
            created_utc: now,
        }
    }

    /// Password epoch in milliseconds since the Unix epoch.
    pub fn password_epoch(&self) -> i64 {
        self.password_at.timestamp_millis()
    }

    /// The subset of the account the authorization core depends on.
    pub fn identity(&self) -> AccountIdentity {
        AccountIdentity {
            id: self.id.clone(),
            email: self.email.clone(),
            password_epoch: self.password_epoch(),
        }
    }
}

/// Identity value consumed by credential issuance and the authorization gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub id: String,
    pub email: String,
    pub password_epoch: i64,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Epoch for a password write: now at millisecond precision, strictly after
/// `previous` so that two changes within the same millisecond still differ.
pub fn next_password_epoch(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    match previous {
        Some(prev) if now.timestamp_millis() <= prev.timestamp_millis() => {
            let prev = DateTime::from_timestamp_millis(prev.timestamp_millis()).unwrap_or(prev);
            prev + Duration::milliseconds(1)
        }
        _ => now,
    }
}
