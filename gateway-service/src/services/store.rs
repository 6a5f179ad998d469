//! Account record store.
//!
//! The authorization gateway only reads (`find_account_by_id`); account
//! actions use the write operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

use crate::models::Account;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate record")]
    Duplicate,

    #[error("Record store error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
            _ => StoreError::Backend(anyhow::anyhow!(err)),
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account_by_id(&self, id: &str) -> Result<Option<Account>, StoreError>;
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
    async fn find_account_by_verification_code(
        &self,
        code: &str,
    ) -> Result<Option<Account>, StoreError>;
    async fn find_account_by_reset_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<Account>, StoreError>;
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;
    /// Store a new password hash, advance the password epoch and consume any
    /// pending reset code. Returns false when the account does not exist.
    async fn update_password(
        &self,
        id: &str,
        password_hash: &str,
        password_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    /// Change the email address; the new address starts unverified.
    async fn update_email(&self, id: &str, email: &str) -> Result<bool, StoreError>;
    async fn mark_email_verified(&self, id: &str) -> Result<bool, StoreError>;
    async fn delete_account(&self, id: &str) -> Result<bool, StoreError>;
    async fn health_check(&self) -> Result<(), StoreError>;
    async fn close(&self);
}

/// PostgreSQL-backed account store.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_account_by_id(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_account_by_verification_code(
        &self,
        code: &str,
    ) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE email_verification_code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn find_account_by_reset_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<Account>, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT * FROM accounts WHERE email = $1 AND password_reset_code = $2",
        )
        .bind(email)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, password_at, email_verified,
                                  email_verification_code, password_reset_code, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.password_at)
        .bind(account.email_verified)
        .bind(&account.email_verification_code)
        .bind(&account.password_reset_code)
        .bind(account.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_password(
        &self,
        id: &str,
        password_hash: &str,
        password_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = $2, password_at = $3, password_reset_code = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(password_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_email(&self, id: &str, email: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET email = $2, email_verified = FALSE WHERE id = $1",
        )
        .bind(id)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_email_verified(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET email_verified = TRUE, email_verification_code = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_account(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::Backend(anyhow::anyhow!("Database health check failed: {}", e))
        })?;
        Ok(())
    }

    async fn close(&self) {
        tracing::info!("Closing database connection");
        self.pool.close().await;
    }
}

/// In-process account store for tests. Counts id lookups so callers can
/// assert that a cached decision avoided the record store.
pub struct InMemoryAccountStore {
    accounts: std::sync::Mutex<HashMap<String, Account>>,
    reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: std::sync::Mutex::new(HashMap::new()),
            reads: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Insert or replace an account directly, bypassing duplicate checks.
    pub fn put(&self, account: Account) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(account.id.clone(), account);
        }
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.accounts
            .lock()
            .ok()
            .and_then(|accounts| accounts.get(id).cloned())
    }

    /// Number of `find_account_by_id` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "Record store is unavailable"
            )));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Account>>, StoreError> {
        self.accounts
            .lock()
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("Mock store mutex poisoned: {}", e)))
    }

    fn find_by<F>(&self, predicate: F) -> Result<Option<Account>, StoreError>
    where
        F: Fn(&Account) -> bool,
    {
        self.check_available()?;
        Ok(self.lock()?.values().find(|a| predicate(a)).cloned())
    }

    fn update<F>(&self, id: &str, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Account),
    {
        self.check_available()?;
        match self.lock()?.get_mut(id) {
            Some(account) => {
                apply(account);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_account_by_id(&self, id: &str) -> Result<Option<Account>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.lock()?.get(id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.find_by(|a| a.email == email)
    }

    async fn find_account_by_verification_code(
        &self,
        code: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.find_by(|a| a.email_verification_code.as_deref() == Some(code))
    }

    async fn find_account_by_reset_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.find_by(|a| a.email == email && a.password_reset_code.as_deref() == Some(code))
    }

    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.check_available()?;
        let mut accounts = self.lock()?;
        if accounts
            .values()
            .any(|a| a.id == account.id || a.email == account.email)
        {
            return Err(StoreError::Duplicate);
        }
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn update_password(
        &self,
        id: &str,
        password_hash: &str,
        password_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.update(id, |account| {
            account.password_hash = password_hash.to_string();
            account.password_at = password_at;
            account.password_reset_code = None;
        })
    }

    async fn update_email(&self, id: &str, email: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        if self.lock()?.values().any(|a| a.id != id && a.email == email) {
            return Err(StoreError::Duplicate);
        }
        self.update(id, |account| {
            account.email = email.to_string();
            account.email_verified = false;
        })
    }

    async fn mark_email_verified(&self, id: &str) -> Result<bool, StoreError> {
        self.update(id, |account| {
            account.email_verified = true;
            account.email_verification_code = None;
        })
    }

    async fn delete_account(&self, id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.lock()?.remove(id).is_some())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn close(&self) {}
}
