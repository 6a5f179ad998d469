//! Account action webhooks under `/hasura/actions`.

use axum::{extract::State, Json};

use crate::dtos::actions::{
    ChangeEmailInput, ChangePasswordInput, CredentialResponse, DestroyUserInput, EmptyInput,
    LoginInput, RegisterInput, ResetPasswordInput, SendPasswordResetEmailInput, VerifyEmailInput,
};
use crate::services::{AccountService, IssuedCredential, ServiceError};
use crate::utils::{ActionInput, Password};

impl From<IssuedCredential> for CredentialResponse {
    fn from(issued: IssuedCredential) -> Self {
        Self {
            token: issued.token,
            id: issued.id,
        }
    }
}

pub async fn register(
    State(service): State<AccountService>,
    action: ActionInput<RegisterInput>,
) -> Result<Json<CredentialResponse>, ServiceError> {
    let input = action.input;
    let issued = service
        .register(&input.email, Password::new(input.password))
        .await?;
    Ok(Json(issued.into()))
}

pub async fn login(
    State(service): State<AccountService>,
    action: ActionInput<LoginInput>,
) -> Result<Json<CredentialResponse>, ServiceError> {
    let input = action.input;
    let issued = service
        .login(&input.email, Password::new(input.password))
        .await?;
    Ok(Json(issued.into()))
}

pub async fn resend_verification_email(
    State(service): State<AccountService>,
    action: ActionInput<EmptyInput>,
) -> Result<Json<bool>, ServiceError> {
    service
        .resend_verification_email(action.session_user_id.as_deref())
        .await?;
    Ok(Json(true))
}

pub async fn verify_email(
    State(service): State<AccountService>,
    action: ActionInput<VerifyEmailInput>,
) -> Result<Json<bool>, ServiceError> {
    service.verify_email(&action.input.code).await?;
    Ok(Json(true))
}

pub async fn send_password_reset_email(
    State(service): State<AccountService>,
    action: ActionInput<SendPasswordResetEmailInput>,
) -> Result<Json<bool>, ServiceError> {
    service.send_password_reset_email(&action.input.email).await?;
    Ok(Json(true))
}

pub async fn reset_password(
    State(service): State<AccountService>,
    action: ActionInput<ResetPasswordInput>,
) -> Result<Json<bool>, ServiceError> {
    let input = action.input;
    service
        .reset_password(&input.email, &input.code, Password::new(input.new_password))
        .await?;
    Ok(Json(true))
}

pub async fn change_password(
    State(service): State<AccountService>,
    action: ActionInput<ChangePasswordInput>,
) -> Result<Json<bool>, ServiceError> {
    let input = action.input;
    service
        .change_password(
            action.session_user_id.as_deref(),
            Password::new(input.old_password),
            Password::new(input.new_password),
        )
        .await?;
    Ok(Json(true))
}

pub async fn change_email(
    State(service): State<AccountService>,
    action: ActionInput<ChangeEmailInput>,
) -> Result<Json<bool>, ServiceError> {
    let input = action.input;
    service
        .change_email(
            action.session_user_id.as_deref(),
            Password::new(input.password),
            &input.new_email,
        )
        .await?;
    Ok(Json(true))
}

pub async fn destroy_user(
    State(service): State<AccountService>,
    action: ActionInput<DestroyUserInput>,
) -> Result<Json<bool>, ServiceError> {
    service
        .destroy_user(
            action.session_user_id.as_deref(),
            Password::new(action.input.password),
        )
        .await?;
    Ok(Json(true))
}
