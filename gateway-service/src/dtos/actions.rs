//! Request and response bodies of the account action webhooks.
//!
//! Fields default to empty so that a missing field is reported with the same
//! message as an empty one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

const SESSION_USER_ID: &str = "x-hasura-user-id";

/// Envelope of every action call.
#[derive(Debug, Deserialize)]
pub struct ActionRequest<T> {
    #[serde(default)]
    pub input: T,

    #[serde(default)]
    pub session_variables: HashMap<String, serde_json::Value>,
}

impl<T> ActionRequest<T> {
    /// Caller's user id, matched case-insensitively.
    pub fn session_user_id(&self) -> Option<String> {
        self.session_variables
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(SESSION_USER_ID))
            .and_then(|(_, value)| value.as_str())
            .map(str::to_string)
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RegisterInput {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required."))]
    pub email: String,

    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct LoginInput {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required."))]
    pub email: String,

    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct EmptyInput {}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct VerifyEmailInput {
    #[serde(default)]
    #[validate(length(min = 1, message = "code is required."))]
    pub code: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SendPasswordResetEmailInput {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required."))]
    pub email: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordInput {
    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required."))]
    pub email: String,

    #[serde(default)]
    pub code: String,

    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    #[serde(default)]
    pub old_password: String,

    #[serde(default)]
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEmailInput {
    #[serde(default)]
    pub password: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "Email is required."))]
    pub new_email: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DestroyUserInput {
    #[serde(default)]
    pub password: String,
}

/// Returned by register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub token: String,
    pub id: String,
}
