//! Route modules composed into the service router.
//!
//! Each module contributes its routes and releases what it owns on shutdown.

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers::{self, health::OperationsState};
use crate::services::{
    AccountService, AccountStore, AuthorizationGateway, CredentialCodec, DecisionCache,
    DecisionPolicy, JobQueue,
};

#[async_trait]
pub trait RouteModule: Send + Sync {
    fn name(&self) -> &'static str;
    fn register(&self, router: Router) -> Router;
    async fn shutdown(&self);
}

/// Shared collaborators handed to the modules at startup.
#[derive(Clone)]
pub struct Dependencies {
    pub codec: CredentialCodec,
    pub store: Arc<dyn AccountStore>,
    pub cache: Arc<dyn DecisionCache>,
    pub jobs: Arc<dyn JobQueue>,
    pub policy: DecisionPolicy,
}

/// Modules in registration order; shutdown runs in the same order.
pub fn compose_modules(deps: Dependencies) -> Vec<Arc<dyn RouteModule>> {
    let gateway = AuthorizationGateway::new(
        deps.codec.clone(),
        deps.cache.clone(),
        deps.store.clone(),
        deps.policy.clone(),
    );
    let accounts = AccountService::new(
        deps.store.clone(),
        deps.cache.clone(),
        deps.jobs.clone(),
        deps.codec.clone(),
    );

    vec![
        Arc::new(AuthorizationModule {
            gateway,
            cache: deps.cache.clone(),
        }),
        Arc::new(ActionsModule { accounts }),
        Arc::new(OperationsModule {
            state: OperationsState {
                store: deps.store,
                cache: deps.cache,
                jobs: deps.jobs,
            },
        }),
    ]
}

pub struct AuthorizationModule {
    gateway: AuthorizationGateway,
    cache: Arc<dyn DecisionCache>,
}

#[async_trait]
impl RouteModule for AuthorizationModule {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn register(&self, router: Router) -> Router {
        router.merge(
            Router::new()
                .route(
                    "/hasura/auth",
                    get(handlers::authz::authorize_request)
                        .post(handlers::authz::authorize_request),
                )
                .with_state(self.gateway.clone()),
        )
    }

    async fn shutdown(&self) {
        self.cache.disconnect().await;
    }
}

pub struct ActionsModule {
    accounts: AccountService,
}

#[async_trait]
impl RouteModule for ActionsModule {
    fn name(&self) -> &'static str {
        "actions"
    }

    fn register(&self, router: Router) -> Router {
        use handlers::actions;

        router.merge(
            Router::new()
                .route("/hasura/actions/register", post(actions::register))
                .route("/hasura/actions/login", post(actions::login))
                .route(
                    "/hasura/actions/resendVerificationEmail",
                    post(actions::resend_verification_email),
                )
                .route("/hasura/actions/verifyEmail", post(actions::verify_email))
                .route(
                    "/hasura/actions/sendPasswordResetEmail",
                    post(actions::send_password_reset_email),
                )
                .route("/hasura/actions/resetPassword", post(actions::reset_password))
                .route(
                    "/hasura/actions/changePassword",
                    post(actions::change_password),
                )
                .route("/hasura/actions/changeEmail", post(actions::change_email))
                .route("/hasura/actions/destroyUser", post(actions::destroy_user))
                .with_state(self.accounts.clone()),
        )
    }

    async fn shutdown(&self) {
        tracing::debug!("Actions module has no resources to release");
    }
}

pub struct OperationsModule {
    state: OperationsState,
}

#[async_trait]
impl RouteModule for OperationsModule {
    fn name(&self) -> &'static str {
        "operations"
    }

    fn register(&self, router: Router) -> Router {
        router.merge(
            Router::new()
                .route("/readycheck", get(handlers::health::readiness_check))
                .route("/health", get(handlers::health::health_check))
                .route("/metrics", get(handlers::metrics::metrics))
                .with_state(self.state.clone()),
        )
    }

    async fn shutdown(&self) {
        self.state.store.close().await;
    }
}
