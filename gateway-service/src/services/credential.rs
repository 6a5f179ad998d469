use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use thiserror::Error;

use crate::config::JwtConfig;
use crate::models::AccountIdentity;

/// Signs and verifies bearer credentials (HS256).
///
/// Credentials carry no expiry: they stay valid until the account's password
/// epoch moves past the one embedded in the claim.
#[derive(Clone)]
pub struct CredentialCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

/// Decoded credential payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    /// Password epoch (milliseconds) of the account when the credential was issued.
    pub password_at: i64,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    /// Deliberately opaque: callers must not learn which check failed.
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Failed to issue credential: {0}")]
    Issue(String),
}

impl CredentialCodec {
    /// Build the codec from the process-wide signing key. Fails when the key is
    /// empty so a misconfigured process never starts serving traffic.
    pub fn new(config: &JwtConfig) -> Result<Self, AppError> {
        let key = config.signing_key.expose_secret();
        if key.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Backend not configured - missing credential signing key"
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        tracing::info!("Credential codec initialized with HS256 key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(key.as_bytes()),
            decoding_key: DecodingKey::from_secret(key.as_bytes()),
            validation,
        })
    }

    /// Issue a credential for the given account identity.
    pub fn issue(&self, account: &AccountIdentity) -> Result<String, CredentialError> {
        let claim = Claim {
            user_id: account.id.clone(),
            email: account.email.clone(),
            password_at: account.password_epoch,
        };

        encode(&Header::new(Algorithm::HS256), &claim, &self.encoding_key)
            .map_err(|e| CredentialError::Issue(e.to_string()))
    }

    /// Check the signature and structure of a raw credential.
    pub fn verify(&self, raw: &str) -> Result<Claim, CredentialError> {
        decode::<Claim>(raw, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Credential verification failed");
                CredentialError::InvalidCredential
            })
    }
}
