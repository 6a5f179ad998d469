//! Services layer for gateway-service.
//!
//! The authorization pipeline, its cache and record store, and the account
//! actions that invalidate cached decisions.

pub mod accounts;
pub mod cache;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod metrics;
pub mod store;

pub use accounts::{AccountService, IssuedCredential};
pub use cache::{
    cache_key, CachedDecision, DecisionCache, InMemoryDecisionCache, RedisDecisionCache,
};
pub use credential::{Claim, CredentialCodec, CredentialError};
pub use error::ServiceError;
pub use gateway::{
    extract_credential, AuthorizationGateway, DecisionPolicy, DenialReason, GatewayOutcome,
};
pub use jobs::{InMemoryJobQueue, Job, JobQueue, RedisJobQueue, RetryPolicy};
pub use store::{AccountStore, InMemoryAccountStore, PgAccountStore, StoreError};
