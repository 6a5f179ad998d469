//! Account actions.
//!
//! Every action that advances the password epoch, changes the email carried in
//! cached decisions, or deletes the account flushes the account's cached
//! decisions before it reports success.

use std::sync::Arc;

use super::cache::DecisionCache;
use super::credential::CredentialCodec;
use super::error::ServiceError;
use super::jobs::{Job, JobQueue, RetryPolicy};
use super::metrics;
use super::store::{AccountStore, StoreError};
use crate::models::{next_password_epoch, normalize_email, Account};
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

pub const MIN_PASSWORD_LENGTH: usize = 5;
pub const MIN_RESET_CODE_LENGTH: usize = 6;

/// Credential handed back by register and login.
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub id: String,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    cache: Arc<dyn DecisionCache>,
    jobs: Arc<dyn JobQueue>,
    codec: CredentialCodec,
    retry_policy: RetryPolicy,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        cache: Arc<dyn DecisionCache>,
        jobs: Arc<dyn JobQueue>,
        codec: CredentialCodec,
    ) -> Self {
        Self {
            store,
            cache,
            jobs,
            codec,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: Password,
    ) -> Result<IssuedCredential, ServiceError> {
        let email = require_email(email)?;
        validate_password(&password)?;

        if self.store.find_account_by_email(&email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyRegistered(email));
        }

        let hash = hash(password).await?;
        let account = Account::new(&email, hash.into_string());

        match self.store.insert_account(&account).await {
            Ok(()) => {}
            Err(StoreError::Duplicate) => return Err(ServiceError::EmailAlreadyRegistered(email)),
            Err(e) => return Err(e.into()),
        }

        let token = self.codec.issue(&account.identity())?;
        tracing::info!(user_id = %account.id, "Account registered");

        self.enqueue_best_effort(Job::SendVerificationEmail {
            user_id: account.id.clone(),
        })
        .await;

        Ok(IssuedCredential {
            token,
            id: account.id,
        })
    }

    pub async fn login(
        &self,
        email: &str,
        password: Password,
    ) -> Result<IssuedCredential, ServiceError> {
        let email = require_email(email)?;

        let account = self
            .store
            .find_account_by_email(&email)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;

        if !password_matches(password, &account).await? {
            tracing::info!(user_id = %account.id, "Login rejected: password mismatch");
            return Err(ServiceError::InvalidCredentials);
        }

        let token = self.codec.issue(&account.identity())?;
        tracing::info!(user_id = %account.id, "Login succeeded");

        Ok(IssuedCredential {
            token,
            id: account.id,
        })
    }

    pub async fn resend_verification_email(
        &self,
        session_user_id: Option<&str>,
    ) -> Result<(), ServiceError> {
        let account = self.session_account(session_user_id).await?;
        if account.email_verified {
            return Err(ServiceError::EmailAlreadyVerified);
        }

        self.enqueue(Job::SendVerificationEmail {
            user_id: account.id,
        })
        .await
    }

    pub async fn verify_email(&self, code: &str) -> Result<(), ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "code is required.".to_string(),
            ));
        }

        let account = self
            .store
            .find_account_by_verification_code(code)
            .await?
            .ok_or(ServiceError::InvalidCode)?;

        if !self.store.mark_email_verified(&account.id).await? {
            return Err(ServiceError::UserNotFound);
        }

        tracing::info!(user_id = %account.id, "Email verified");
        Ok(())
    }

    pub async fn send_password_reset_email(&self, email: &str) -> Result<(), ServiceError> {
        let email = require_email(email)?;

        let account = self
            .store
            .find_account_by_email(&email)
            .await?
            .ok_or(ServiceError::EmailNotFound)?;

        self.enqueue(Job::SendPasswordResetEmail {
            user_id: account.id,
        })
        .await
    }

    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: Password,
    ) -> Result<(), ServiceError> {
        let email = require_email(email)?;
        validate_password(&new_password)?;
        if code.chars().count() < MIN_RESET_CODE_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "Code must be at least {} characters long.",
                MIN_RESET_CODE_LENGTH
            )));
        }

        let account = self
            .store
            .find_account_by_reset_code(&email, code)
            .await?
            .ok_or(ServiceError::UserNotFound)?;

        self.set_password(&account, new_password, "reset_password")
            .await
    }

    pub async fn change_password(
        &self,
        session_user_id: Option<&str>,
        old_password: Password,
        new_password: Password,
    ) -> Result<(), ServiceError> {
        let account = self.session_account(session_user_id).await?;
        validate_password(&new_password)?;

        if !password_matches(old_password, &account).await? {
            return Err(ServiceError::OldPasswordMismatch);
        }

        self.set_password(&account, new_password, "change_password")
            .await
    }

    pub async fn change_email(
        &self,
        session_user_id: Option<&str>,
        password: Password,
        new_email: &str,
    ) -> Result<(), ServiceError> {
        let account = self.session_account(session_user_id).await?;

        if !password_matches(password, &account).await? {
            return Err(ServiceError::PasswordMismatch);
        }

        let new_email = require_email(new_email)?;
        if new_email == account.email {
            return Err(ServiceError::ValidationError(
                "Cannot use same email.".to_string(),
            ));
        }

        match self.store.update_email(&account.id, &new_email).await {
            Ok(true) => {}
            Ok(false) => return Err(ServiceError::UserNotFound),
            Err(StoreError::Duplicate) => {
                return Err(ServiceError::EmailAlreadyRegistered(new_email))
            }
            Err(e) => return Err(e.into()),
        }

        // Cached decisions carry the old email.
        self.invalidate_credentials(&account.id, "change_email")
            .await?;

        tracing::info!(user_id = %account.id, "Email changed");
        self.enqueue_best_effort(Job::SendVerificationEmail {
            user_id: account.id,
        })
        .await;
        Ok(())
    }

    pub async fn destroy_user(
        &self,
        session_user_id: Option<&str>,
        password: Password,
    ) -> Result<(), ServiceError> {
        let account = self.session_account(session_user_id).await?;

        if !password_matches(password, &account).await? {
            return Err(ServiceError::PasswordMismatch);
        }

        if !self.store.delete_account(&account.id).await? {
            return Err(ServiceError::UserNotFound);
        }

        self.invalidate_credentials(&account.id, "destroy_user")
            .await?;

        tracing::info!(user_id = %account.id, "Account destroyed");
        self.enqueue_best_effort(Job::SendUserDestroyedEmail {
            email: account.email,
        })
        .await;
        self.enqueue_best_effort(Job::CleanupDestroyedUserFiles {
            user_id: account.id,
        })
        .await;
        Ok(())
    }

    /// Drop every cached decision of the account. Must run after any write
    /// that changes the password epoch or deletes the account.
    ///
    /// A concurrent authorization that read the account before the write may
    /// still store its decision after this flush. That entry survives for at
    /// most one decision TTL.
    pub async fn invalidate_credentials(
        &self,
        account_id: &str,
        trigger: &'static str,
    ) -> Result<u64, ServiceError> {
        let deleted = self
            .cache
            .flush_prefix(&format!("{}:", account_id))
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id = %account_id,
                    trigger,
                    error = %e,
                    "Failed to flush cached decisions"
                );
                ServiceError::Internal(e)
            })?;

        metrics::record_cache_flush(trigger, deleted);
        tracing::info!(user_id = %account_id, trigger, deleted, "Flushed cached decisions");
        Ok(deleted)
    }

    async fn set_password(
        &self,
        account: &Account,
        new_password: Password,
        trigger: &'static str,
    ) -> Result<(), ServiceError> {
        let hash = hash(new_password).await?;
        let epoch = next_password_epoch(Some(account.password_at));

        if !self
            .store
            .update_password(&account.id, hash.as_str(), epoch)
            .await?
        {
            return Err(ServiceError::UserNotFound);
        }

        self.invalidate_credentials(&account.id, trigger).await?;

        tracing::info!(user_id = %account.id, trigger, "Password changed");
        self.enqueue_best_effort(Job::SendPasswordChangedEmail {
            user_id: account.id.clone(),
        })
        .await;
        Ok(())
    }

    async fn session_account(&self, user_id: Option<&str>) -> Result<Account, ServiceError> {
        let user_id = user_id
            .filter(|id| !id.is_empty())
            .ok_or(ServiceError::UserNotFound)?;

        self.store
            .find_account_by_id(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    async fn enqueue(&self, job: Job) -> Result<(), ServiceError> {
        let job_type = job.job_type();
        self.jobs
            .enqueue(job, self.retry_policy.clone())
            .await
            .map_err(|e| {
                tracing::error!(job_type, error = %e, "Failed to enqueue job");
                ServiceError::Internal(e)
            })
    }

    /// Follow-up jobs after a committed write; failure is logged only.
    async fn enqueue_best_effort(&self, job: Job) {
        let _ = self.enqueue(job).await;
    }
}

fn require_email(email: &str) -> Result<String, ServiceError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(ServiceError::ValidationError(
            "Email is required.".to_string(),
        ));
    }
    Ok(email)
}

fn validate_password(password: &Password) -> Result<(), ServiceError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ServiceError::ValidationError(format!(
            "Password must be at least {} characters long.",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

async fn hash(password: Password) -> Result<PasswordHashString, ServiceError> {
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))??;
    Ok(hashed)
}

async fn password_matches(password: Password, account: &Account) -> Result<bool, ServiceError> {
    let stored = PasswordHashString::new(account.password_hash.clone());
    let matched = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))??;
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::cache::{CachedDecision, InMemoryDecisionCache};
    use crate::services::jobs::InMemoryJobQueue;
    use crate::services::store::InMemoryAccountStore;
    use crate::models::Decision;
    use secrecy::Secret;

    struct Fixture {
        service: AccountService,
        codec: CredentialCodec,
        store: Arc<InMemoryAccountStore>,
        cache: Arc<InMemoryDecisionCache>,
        jobs: Arc<InMemoryJobQueue>,
    }

    fn fixture() -> Fixture {
        let codec = CredentialCodec::new(&JwtConfig {
            signing_key: Secret::new("accounts-test-key".to_string()),
        })
        .expect("codec");
        let store = Arc::new(InMemoryAccountStore::new());
        let cache = Arc::new(InMemoryDecisionCache::new());
        let jobs = Arc::new(InMemoryJobQueue::new());
        let service = AccountService::new(store.clone(), cache.clone(), jobs.clone(), codec.clone());
        Fixture {
            service,
            codec,
            store,
            cache,
            jobs,
        }
    }

    fn pw(value: &str) -> Password {
        Password::new(value.to_string())
    }

    async fn seed_cache(cache: &InMemoryDecisionCache, user_id: &str) {
        let decision = CachedDecision::Allow(Decision {
            role: "user".to_string(),
            user_id: user_id.to_string(),
            email: "a@example.com".to_string(),
        });
        cache
            .set(&format!("{}:tokA", user_id), &decision, 1800)
            .await
            .expect("seed");
        cache
            .set("other:tokB", &decision, 1800)
            .await
            .expect("seed");
    }

    #[tokio::test]
    async fn test_register_issues_credential() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("Alice@Example.com", pw("secret")).await?;

        let claim = f.codec.verify(&issued.token)?;
        assert_eq!(claim.user_id, issued.id);
        assert_eq!(claim.email, "alice@example.com");

        let stored = f.store.get(&issued.id).expect("stored");
        assert_eq!(claim.password_at, stored.password_epoch());
        assert_eq!(f.jobs.job_types(), vec!["sendVerificationEmail"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_rejects_short_password_and_duplicates() -> Result<(), ServiceError> {
        let f = fixture();
        let err = f.service.register("a@example.com", pw("1234")).await;
        assert!(matches!(err, Err(ServiceError::ValidationError(_))));

        f.service.register("a@example.com", pw("12345")).await?;
        let err = f.service.register("A@example.com", pw("12345")).await;
        assert!(matches!(err, Err(ServiceError::EmailAlreadyRegistered(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_login_does_not_reveal_unknown_email() -> Result<(), ServiceError> {
        let f = fixture();
        f.service.register("a@example.com", pw("secret")).await?;

        assert!(f.service.login("A@EXAMPLE.COM", pw("secret")).await.is_ok());
        assert!(matches!(
            f.service.login("a@example.com", pw("wrong")).await,
            Err(ServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            f.service.login("nobody@example.com", pw("secret")).await,
            Err(ServiceError::InvalidCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_change_password_advances_epoch_and_flushes() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("a@example.com", pw("secret")).await?;
        let before = f.store.get(&issued.id).expect("account").password_epoch();
        seed_cache(&f.cache, &issued.id).await;

        f.service
            .change_password(Some(&issued.id), pw("secret"), pw("better"))
            .await?;

        let after = f.store.get(&issued.id).expect("account").password_epoch();
        assert!(after > before);
        assert_eq!(f.cache.keys(), vec!["other:tokB"]);
        assert!(f.jobs.job_types().contains(&"sendPasswordChangedEmail".to_string()));
        assert!(f.service.login("a@example.com", pw("better")).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_change_password_requires_old_password() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("a@example.com", pw("secret")).await?;
        seed_cache(&f.cache, &issued.id).await;

        let err = f
            .service
            .change_password(Some(&issued.id), pw("nope!"), pw("better"))
            .await;
        assert!(matches!(err, Err(ServiceError::OldPasswordMismatch)));
        assert_eq!(f.cache.keys().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_password_flow() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("a@example.com", pw("secret")).await?;
        let mut account = f.store.get(&issued.id).expect("account");
        account.password_reset_code = Some("123456".to_string());
        f.store.put(account);
        seed_cache(&f.cache, &issued.id).await;

        assert!(matches!(
            f.service.reset_password("a@example.com", "12345", pw("fresh")).await,
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.reset_password("a@example.com", "654321", pw("fresh")).await,
            Err(ServiceError::UserNotFound)
        ));

        f.service
            .reset_password("A@example.com", "123456", pw("fresh"))
            .await?;

        let account = f.store.get(&issued.id).expect("account");
        assert!(account.password_reset_code.is_none());
        assert_eq!(f.cache.keys(), vec!["other:tokB"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_flush_failure_fails_action() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("a@example.com", pw("secret")).await?;
        f.cache.set_unavailable(true);

        let err = f
            .service
            .change_password(Some(&issued.id), pw("secret"), pw("better"))
            .await;
        assert!(matches!(err, Err(ServiceError::Internal(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_change_email_flushes_and_unverifies() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("a@example.com", pw("secret")).await?;
        f.service.register("b@example.com", pw("secret")).await?;
        seed_cache(&f.cache, &issued.id).await;

        assert!(matches!(
            f.service
                .change_email(Some(&issued.id), pw("secret"), "a@example.com")
                .await,
            Err(ServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service
                .change_email(Some(&issued.id), pw("secret"), "b@example.com")
                .await,
            Err(ServiceError::EmailAlreadyRegistered(_))
        ));

        f.service
            .change_email(Some(&issued.id), pw("secret"), "New@Example.com")
            .await?;

        let account = f.store.get(&issued.id).expect("account");
        assert_eq!(account.email, "new@example.com");
        assert!(!account.email_verified);
        assert_eq!(f.cache.keys(), vec!["other:tokB"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_destroy_user() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("a@example.com", pw("secret")).await?;
        seed_cache(&f.cache, &issued.id).await;

        assert!(matches!(
            f.service.destroy_user(Some(&issued.id), pw("wrong")).await,
            Err(ServiceError::PasswordMismatch)
        ));

        f.service.destroy_user(Some(&issued.id), pw("secret")).await?;

        assert!(f.store.get(&issued.id).is_none());
        assert_eq!(f.cache.keys(), vec!["other:tokB"]);
        let jobs = f.jobs.job_types();
        assert!(jobs.contains(&"sendUserDestroyedEmail".to_string()));
        assert!(jobs.contains(&"cleanupDestroyedUserFiles".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_email_verification() -> Result<(), ServiceError> {
        let f = fixture();
        let issued = f.service.register("a@example.com", pw("secret")).await?;
        let mut account = f.store.get(&issued.id).expect("account");
        account.email_verification_code = Some("verify-me".to_string());
        f.store.put(account);

        assert!(matches!(
            f.service.verify_email("wrong").await,
            Err(ServiceError::InvalidCode)
        ));
        f.service.verify_email("verify-me").await?;

        let account = f.store.get(&issued.id).expect("account");
        assert!(account.email_verified);
        assert!(account.email_verification_code.is_none());

        assert!(matches!(
            f.service.resend_verification_email(Some(&issued.id)).await,
            Err(ServiceError::EmailAlreadyVerified)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_session_user_required() {
        let f = fixture();
        assert!(matches!(
            f.service.resend_verification_email(None).await,
            Err(ServiceError::UserNotFound)
        ));
        assert!(matches!(
            f.service.destroy_user(Some("ghost"), pw("secret")).await,
            Err(ServiceError::UserNotFound)
        ));
    }
}
