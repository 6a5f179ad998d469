//! Per-request authorization pipeline.
//!
//! Every request ends in exactly one of three states: PUBLIC (no credential),
//! AUTHORIZED (verified credential whose password epoch matches the account)
//! or DENIED. Backend failures deny; nothing here ever authorizes on error.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use thiserror::Error;

use super::cache::{cache_key, CachedDecision, DecisionCache};
use super::credential::{Claim, CredentialCodec};
use super::metrics;
use super::store::AccountStore;
use crate::config::{AuthzConfig, CacheConfig};
use crate::models::{AccountIdentity, Decision, SUPERUSER_ROLE, USER_ROLE};

#[derive(Debug, Error)]
pub enum DenialReason {
    #[error("credential failed verification")]
    InvalidCredential,

    #[error("credential carries no subject")]
    MissingSubject,

    #[error("credential predates the current password")]
    StaleCredential,

    #[error("account not found")]
    AccountNotFound,

    #[error("credential was denied earlier")]
    CachedDenial,

    #[error("backend unavailable: {0}")]
    BackendUnavailable(anyhow::Error),
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::InvalidCredential => "invalid_credential",
            DenialReason::MissingSubject => "missing_subject",
            DenialReason::StaleCredential => "stale_credential",
            DenialReason::AccountNotFound => "account_not_found",
            DenialReason::CachedDenial => "cached_denial",
            DenialReason::BackendUnavailable(_) => "backend_unavailable",
        }
    }

    /// Epochs only advance and ids are never reused, so these denials can
    /// never turn into an authorization for the same credential.
    fn is_permanent(&self) -> bool {
        matches!(
            self,
            DenialReason::StaleCredential | DenialReason::AccountNotFound
        )
    }
}

#[derive(Debug)]
pub enum GatewayOutcome {
    Public,
    Authorized(Decision),
    Denied(DenialReason),
}

impl GatewayOutcome {
    fn label(&self) -> &'static str {
        match self {
            GatewayOutcome::Public => "public",
            GatewayOutcome::Authorized(_) => "authorized",
            GatewayOutcome::Denied(_) => "denied",
        }
    }
}

/// Tunables applied when deriving and caching decisions.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    pub ttl_seconds: u64,
    /// 0 disables negative caching.
    pub negative_ttl_seconds: u64,
    pub superuser_email_domain: Option<String>,
}

impl DecisionPolicy {
    pub fn from_config(cache: &CacheConfig, authz: &AuthzConfig) -> Self {
        Self {
            ttl_seconds: cache.default_ttl_seconds,
            negative_ttl_seconds: cache.negative_ttl_seconds,
            superuser_email_domain: authz.superuser_email_domain.clone(),
        }
    }

    fn role_for(&self, email: &str) -> &'static str {
        match &self.superuser_email_domain {
            Some(domain) if email_domain(email) == Some(domain.as_str()) => SUPERUSER_ROLE,
            _ => USER_ROLE,
        }
    }
}

fn email_domain(email: &str) -> Option<&str> {
    email.rsplit_once('@').map(|(_, domain)| domain)
}

#[derive(Clone)]
pub struct AuthorizationGateway {
    codec: CredentialCodec,
    cache: Arc<dyn DecisionCache>,
    store: Arc<dyn AccountStore>,
    policy: DecisionPolicy,
}

impl AuthorizationGateway {
    pub fn new(
        codec: CredentialCodec,
        cache: Arc<dyn DecisionCache>,
        store: Arc<dyn AccountStore>,
        policy: DecisionPolicy,
    ) -> Self {
        Self {
            codec,
            cache,
            store,
            policy,
        }
    }

    /// Decide on a request given its raw credential, if any.
    pub async fn authorize(&self, raw_credential: Option<&str>) -> GatewayOutcome {
        let outcome = match raw_credential.map(str::trim).filter(|t| !t.is_empty()) {
            None => GatewayOutcome::Public,
            Some(raw) => match self.evaluate(raw).await {
                Ok(decision) => GatewayOutcome::Authorized(decision),
                Err(reason) => GatewayOutcome::Denied(reason),
            },
        };

        match &outcome {
            GatewayOutcome::Public => {
                tracing::debug!(outcome = "public", "Request has no credential");
                metrics::record_decision("public", "none");
            }
            GatewayOutcome::Authorized(decision) => {
                tracing::debug!(
                    outcome = "authorized",
                    user_id = %decision.user_id,
                    role = %decision.role,
                    "Request authorized"
                );
                metrics::record_decision("authorized", "none");
            }
            GatewayOutcome::Denied(reason @ DenialReason::BackendUnavailable(e)) => {
                tracing::error!(
                    outcome = outcome.label(),
                    reason = reason.as_str(),
                    error = %e,
                    "Authorization backend failure, denying request"
                );
                metrics::record_decision("denied", reason.as_str());
            }
            GatewayOutcome::Denied(reason) => {
                tracing::info!(
                    outcome = outcome.label(),
                    reason = reason.as_str(),
                    "Request denied"
                );
                metrics::record_decision("denied", reason.as_str());
            }
        }

        outcome
    }

    async fn evaluate(&self, raw: &str) -> Result<Decision, DenialReason> {
        let claim = self
            .codec
            .verify(raw)
            .map_err(|_| DenialReason::InvalidCredential)?;

        if claim.user_id.is_empty() {
            return Err(DenialReason::MissingSubject);
        }

        let key = cache_key(&claim.user_id, raw);
        match self
            .cache
            .get(&key)
            .await
            .map_err(DenialReason::BackendUnavailable)?
        {
            Some(CachedDecision::Deny) => return Err(DenialReason::CachedDenial),
            Some(CachedDecision::Allow(decision)) => return Ok(decision),
            None => {}
        }

        match self.decide(&claim).await {
            Ok(decision) => {
                // Not ordered against account flushes: a decision read before a
                // password change can land after its flush and then lives until
                // the TTL expires.
                self.cache
                    .set(
                        &key,
                        &CachedDecision::Allow(decision.clone()),
                        self.policy.ttl_seconds,
                    )
                    .await
                    .map_err(DenialReason::BackendUnavailable)?;
                Ok(decision)
            }
            Err(reason) => {
                if reason.is_permanent() && self.policy.negative_ttl_seconds > 0 {
                    if let Err(e) = self
                        .cache
                        .set(
                            &key,
                            &CachedDecision::Deny,
                            self.policy.negative_ttl_seconds,
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "Failed to cache denial");
                    }
                }
                Err(reason)
            }
        }
    }

    async fn decide(&self, claim: &Claim) -> Result<Decision, DenialReason> {
        let account = self
            .store
            .find_account_by_id(&claim.user_id)
            .await
            .map_err(|e| DenialReason::BackendUnavailable(anyhow::Error::new(e)))?
            .ok_or(DenialReason::AccountNotFound)?;

        let AccountIdentity {
            id,
            email,
            password_epoch,
        } = account.identity();

        if password_epoch != claim.password_at {
            return Err(DenialReason::StaleCredential);
        }

        Ok(Decision {
            role: self.policy.role_for(&email).to_string(),
            user_id: id,
            email,
        })
    }
}

/// Find the raw credential of a request: `Authorization` header first, then a
/// `token` field of a JSON body, then a `token` query parameter. The first
/// source carrying a non-empty value is used even when nothing follows its
/// `Bearer` scheme; such a value fails verification instead of falling
/// through to the next source.
pub fn extract_credential(headers: &HeaderMap, body: &[u8], query: Option<&str>) -> Option<String> {
    header_credential(headers)
        .or_else(|| body_credential(body))
        .or_else(|| query_credential(query))
        .map(strip_scheme)
}

fn non_empty(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn header_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(non_empty)
        .map(str::to_string)
}

fn body_credential(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("token")
        .and_then(serde_json::Value::as_str)
        .and_then(non_empty)
        .map(str::to_string)
}

fn query_credential(query: Option<&str>) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query?).ok()?;
    pairs
        .into_iter()
        .find(|(key, _)| key == "token")
        .and_then(|(_, value)| non_empty(&value).map(str::to_string))
}

/// Drop a leading `Bearer` scheme. A bare scheme is kept as is.
fn strip_scheme(raw: String) -> String {
    match raw.split_once(' ') {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case("bearer") && !rest.trim().is_empty() =>
        {
            rest.trim().to_string()
        }
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::models::Account;
    use crate::services::cache::{InMemoryDecisionCache, NEGATIVE_SENTINEL};
    use crate::services::store::InMemoryAccountStore;
    use axum::http::HeaderValue;
    use chrono::DateTime;
    use secrecy::Secret;

    struct Fixture {
        gateway: AuthorizationGateway,
        codec: CredentialCodec,
        cache: Arc<InMemoryDecisionCache>,
        store: Arc<InMemoryAccountStore>,
    }

    fn policy() -> DecisionPolicy {
        DecisionPolicy {
            ttl_seconds: 1800,
            negative_ttl_seconds: 1800,
            superuser_email_domain: None,
        }
    }

    fn fixture_with(policy: DecisionPolicy) -> Fixture {
        let codec = CredentialCodec::new(&JwtConfig {
            signing_key: Secret::new("gateway-test-key".to_string()),
        })
        .expect("codec");
        let cache = Arc::new(InMemoryDecisionCache::new());
        let store = Arc::new(InMemoryAccountStore::new());
        let gateway =
            AuthorizationGateway::new(codec.clone(), cache.clone(), store.clone(), policy);
        Fixture {
            gateway,
            codec,
            cache,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(policy())
    }

    fn account(id: &str, email: &str, epoch: i64) -> Account {
        let mut account = Account::new(email, "hash".to_string());
        account.id = id.to_string();
        account.password_at = DateTime::from_timestamp_millis(epoch).expect("epoch");
        account
    }

    fn credential(codec: &CredentialCodec, id: &str, email: &str, epoch: i64) -> String {
        codec
            .issue(&AccountIdentity {
                id: id.to_string(),
                email: email.to_string(),
                password_epoch: epoch,
            })
            .expect("issue")
    }

    #[tokio::test]
    async fn test_no_credential_is_public() {
        let f = fixture();
        f.cache.set_unavailable(true);
        f.store.set_unavailable(true);

        assert!(matches!(f.gateway.authorize(None).await, GatewayOutcome::Public));
        assert!(matches!(
            f.gateway.authorize(Some("   ")).await,
            GatewayOutcome::Public
        ));
        assert_eq!(f.store.reads(), 0);
    }

    #[tokio::test]
    async fn test_scenario_authorize_then_invalidate() -> Result<(), anyhow::Error> {
        let f = fixture();
        f.store.put(account("u1", "a@example.com", 1000));
        let t1 = credential(&f.codec, "u1", "a@example.com", 1000);

        match f.gateway.authorize(Some(&t1)).await {
            GatewayOutcome::Authorized(decision) => {
                assert_eq!(decision.role, "user");
                assert_eq!(decision.user_id, "u1");
                assert_eq!(decision.email, "a@example.com");
            }
            other => panic!("expected authorized, got {:?}", other),
        }
        assert_eq!(f.cache.ttl(&cache_key("u1", &t1)), Some(1800));

        f.store.put(account("u1", "a@example.com", 2000));
        assert_eq!(f.cache.flush_prefix("u1:").await?, 1);

        assert!(f.codec.verify(&t1).is_ok());
        assert!(matches!(
            f.gateway.authorize(Some(&t1)).await,
            GatewayOutcome::Denied(DenialReason::StaleCredential)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let f = fixture();
        f.store.put(account("u1", "a@example.com", 1000));
        let token = credential(&f.codec, "u1", "a@example.com", 1000);

        let first = f.gateway.authorize(Some(&token)).await;
        let second = f.gateway.authorize(Some(&token)).await;

        match (first, second) {
            (GatewayOutcome::Authorized(a), GatewayOutcome::Authorized(b)) => assert_eq!(a, b),
            other => panic!("expected two authorizations, got {:?}", other),
        }
        assert_eq!(f.store.reads(), 1);
    }

    #[tokio::test]
    async fn test_signature_mutations_are_denied() {
        let f = fixture();
        f.store.put(account("u1", "a@example.com", 1000));
        let token = credential(&f.codec, "u1", "a@example.com", 1000);
        let start = token.rfind('.').map(|i| i + 1).unwrap_or(0);

        let mut bytes = token.into_bytes();
        for pos in start..bytes.len() {
            for bit in 0..8 {
                bytes[pos] ^= 1 << bit;
                if let Ok(mutated) = std::str::from_utf8(&bytes) {
                    let outcome = f.gateway.authorize(Some(mutated)).await;
                    assert!(
                        matches!(outcome, GatewayOutcome::Denied(_) | GatewayOutcome::Public),
                        "mutation at {} bit {} authorized",
                        pos,
                        bit
                    );
                }
                bytes[pos] ^= 1 << bit;
            }
        }
        assert_eq!(f.store.reads(), 0);
    }

    #[tokio::test]
    async fn test_missing_subject_is_denied() {
        let f = fixture();
        let token = credential(&f.codec, "", "a@example.com", 1000);
        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Denied(DenialReason::MissingSubject)
        ));
    }

    #[tokio::test]
    async fn test_unknown_account_is_denied_and_negatively_cached() {
        let f = fixture();
        let token = credential(&f.codec, "ghost", "g@example.com", 1000);

        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Denied(DenialReason::AccountNotFound)
        ));
        assert_eq!(
            f.cache.raw(&cache_key("ghost", &token)).as_deref(),
            Some(NEGATIVE_SENTINEL)
        );

        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Denied(DenialReason::CachedDenial)
        ));
        assert_eq!(f.store.reads(), 1);
    }

    #[tokio::test]
    async fn test_negative_caching_can_be_disabled() {
        let f = fixture_with(DecisionPolicy {
            negative_ttl_seconds: 0,
            ..policy()
        });
        let token = credential(&f.codec, "ghost", "g@example.com", 1000);

        f.gateway.authorize(Some(&token)).await;
        f.gateway.authorize(Some(&token)).await;

        assert!(f.cache.keys().is_empty());
        assert_eq!(f.store.reads(), 2);
    }

    #[tokio::test]
    async fn test_backend_failures_deny() {
        let f = fixture();
        f.store.put(account("u1", "a@example.com", 1000));
        let token = credential(&f.codec, "u1", "a@example.com", 1000);

        f.cache.set_unavailable(true);
        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Denied(DenialReason::BackendUnavailable(_))
        ));

        f.cache.set_unavailable(false);
        f.store.set_unavailable(true);
        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Denied(DenialReason::BackendUnavailable(_))
        ));
        assert!(f.cache.keys().is_empty());
    }

    #[tokio::test]
    async fn test_failed_decision_write_denies() {
        let f = fixture();
        f.store.put(account("u1", "a@example.com", 1000));
        let token = credential(&f.codec, "u1", "a@example.com", 1000);

        f.cache.set_fail_writes(true);
        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Denied(DenialReason::BackendUnavailable(_))
        ));
        assert!(f.cache.keys().is_empty());

        f.cache.set_fail_writes(false);
        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Authorized(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_denial_write_keeps_reason() {
        let f = fixture();
        let token = credential(&f.codec, "ghost", "g@example.com", 1000);

        f.cache.set_fail_writes(true);
        assert!(matches!(
            f.gateway.authorize(Some(&token)).await,
            GatewayOutcome::Denied(DenialReason::AccountNotFound)
        ));
        assert!(f.cache.keys().is_empty());
    }

    #[tokio::test]
    async fn test_cached_decision_returned_verbatim() {
        let f = fixture();
        let token = credential(&f.codec, "u1", "a@example.com", 1000);
        f.cache.insert_raw(
            &cache_key("u1", &token),
            r#"{"role":"editor","user_id":"u1","email":"old@example.com"}"#,
        );

        match f.gateway.authorize(Some(&token)).await {
            GatewayOutcome::Authorized(decision) => {
                assert_eq!(decision.role, "editor");
                assert_eq!(decision.email, "old@example.com");
            }
            other => panic!("expected authorized, got {:?}", other),
        }
        assert_eq!(f.store.reads(), 0);
    }

    #[tokio::test]
    async fn test_superuser_domain() {
        let f = fixture_with(DecisionPolicy {
            superuser_email_domain: Some("ops.example.com".to_string()),
            ..policy()
        });
        f.store.put(account("root", "root@ops.example.com", 5));
        let token = credential(&f.codec, "root", "root@ops.example.com", 5);

        match f.gateway.authorize(Some(&token)).await {
            GatewayOutcome::Authorized(decision) => assert_eq!(decision.role, "superuser"),
            other => panic!("expected authorized, got {:?}", other),
        }
    }

    #[test]
    fn test_extraction_order() {
        let mut headers = HeaderMap::new();
        let body = br#"{"token":"from-body"}"#;
        let query = Some("token=from-query");

        assert_eq!(
            extract_credential(&headers, body, query).as_deref(),
            Some("from-body")
        );
        assert_eq!(
            extract_credential(&headers, b"", query).as_deref(),
            Some("from-query")
        );

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(
            extract_credential(&headers, body, query).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_extraction_edge_cases() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("   "));
        assert_eq!(
            extract_credential(&headers, b"not json", Some("other=1")),
            None
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("raw-token"));
        assert_eq!(
            extract_credential(&headers, b"", None).as_deref(),
            Some("raw-token")
        );

        assert_eq!(
            extract_credential(&HeaderMap::new(), br#"{"token":42}"#, Some("token=a%2Bb"))
                .as_deref(),
            Some("a+b")
        );
    }

    #[test]
    fn test_bare_scheme_stays_on_its_source() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(
            extract_credential(&headers, br#"{"token":"from-body"}"#, Some("token=from-query"))
                .as_deref(),
            Some("Bearer")
        );

        assert_eq!(
            extract_credential(&HeaderMap::new(), br#"{"token":"Bearer "}"#, Some("token=q"))
                .as_deref(),
            Some("Bearer")
        );
    }

    #[tokio::test]
    async fn test_bare_scheme_is_denied() {
        let f = fixture();
        f.store.put(account("u1", "a@example.com", 1000));
        let token = credential(&f.codec, "u1", "a@example.com", 1000);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        let query = format!("token={}", token);
        let raw = extract_credential(&headers, b"", Some(&query));

        assert!(matches!(
            f.gateway.authorize(raw.as_deref()).await,
            GatewayOutcome::Denied(DenialReason::InvalidCredential)
        ));
        assert_eq!(f.store.reads(), 0);
    }
}
