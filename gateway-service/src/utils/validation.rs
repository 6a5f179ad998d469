use axum::{
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

use crate::dtos::actions::ActionRequest;
use crate::services::ServiceError;

/// Extracts and validates the `input` of an action call together with the
/// caller's session user id. Rejections use the action error body.
pub struct ActionInput<T> {
    pub input: T,
    pub session_user_id: Option<String>,
}

#[axum::async_trait]
impl<T, S> FromRequest<S> for ActionInput<T>
where
    T: DeserializeOwned + Default + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(request) = Json::<ActionRequest<T>>::from_request(req, state)
            .await
            .map_err(|e| {
                ServiceError::ValidationError(format!("Invalid request body: {}", e.body_text()))
                    .into_response()
            })?;

        request.input.validate().map_err(|e| {
            ServiceError::ValidationError(first_message(&e)).into_response()
        })?;

        let session_user_id = request.session_user_id();
        Ok(ActionInput {
            input: request.input,
            session_user_id,
        })
    }
}

/// First validation message, ordered by field name so the answer is stable.
fn first_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(_, errs)| errs.iter())
        .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
        .unwrap_or_else(|| errors.to_string())
}
