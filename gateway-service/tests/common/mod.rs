//! Test helpers for gateway-service integration tests.
//!
//! Builds the full router over in-memory store, cache and queue.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::DateTime;
use gateway_service::{
    build_router, compose_modules,
    models::{Account, AccountIdentity},
    services::{
        CredentialCodec, DecisionPolicy, InMemoryAccountStore, InMemoryDecisionCache,
        InMemoryJobQueue,
    },
    Dependencies,
};
use gateway_service::config::JwtConfig;
use secrecy::Secret;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const TEST_SIGNING_KEY: &str = "integration-test-signing-key";

pub struct TestApp {
    pub router: Router,
    pub codec: CredentialCodec,
    pub store: Arc<InMemoryAccountStore>,
    pub cache: Arc<InMemoryDecisionCache>,
    pub jobs: Arc<InMemoryJobQueue>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with_policy(DecisionPolicy {
            ttl_seconds: 1800,
            negative_ttl_seconds: 1800,
            superuser_email_domain: None,
        })
    }

    pub fn spawn_with_policy(policy: DecisionPolicy) -> Self {
        let codec = CredentialCodec::new(&JwtConfig {
            signing_key: Secret::new(TEST_SIGNING_KEY.to_string()),
        })
        .expect("Failed to build credential codec");
        let store = Arc::new(InMemoryAccountStore::new());
        let cache = Arc::new(InMemoryDecisionCache::new());
        let jobs = Arc::new(InMemoryJobQueue::new());

        let modules = compose_modules(Dependencies {
            codec: codec.clone(),
            store: store.clone(),
            cache: cache.clone(),
            jobs: jobs.clone(),
            policy,
        });
        let router = build_router(&modules, &["*".to_string()]);

        Self {
            router,
            codec,
            store,
            cache,
            jobs,
        }
    }

    /// Seed an account with a fixed password epoch (milliseconds).
    pub fn seed_account(&self, id: &str, email: &str, epoch: i64) {
        let mut account = Account::new(email, "unused-hash".to_string());
        account.id = id.to_string();
        account.password_at = DateTime::from_timestamp_millis(epoch).expect("valid epoch");
        self.store.put(account);
    }

    pub fn credential(&self, id: &str, email: &str, epoch: i64) -> String {
        self.codec
            .issue(&AccountIdentity {
                id: id.to_string(),
                email: email.to_string(),
                password_epoch: epoch,
            })
            .expect("Failed to issue credential")
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into()));
        (status, body)
    }

    pub async fn authorize_bearer(&self, token: &str) -> (StatusCode, serde_json::Value) {
        self.send(
            Request::builder()
                .method("GET")
                .uri("/hasura/auth")
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }

    pub async fn action(
        &self,
        name: &str,
        input: serde_json::Value,
        session_user_id: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let mut body = serde_json::json!({ "input": input, "session_variables": {} });
        if let Some(user_id) = session_user_id {
            body["session_variables"]["x-hasura-user-id"] = user_id.into();
        }

        self.send(
            Request::builder()
                .method("POST")
                .uri(format!("/hasura/actions/{}", name))
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
        )
        .await
    }
}
