//! Authorization webhook consulted by the routing layer on every request.

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::HeaderMap,
    Json,
};
use service_core::error::AppError;

use crate::dtos::authz::WebhookSession;
use crate::services::{extract_credential, AuthorizationGateway, GatewayOutcome};

/// `GET`/`POST /hasura/auth`. Every denial produces the same 401 body.
pub async fn authorize_request(
    State(gateway): State<AuthorizationGateway>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<WebhookSession>, AppError> {
    let credential = extract_credential(&headers, &body, query.as_deref());

    match gateway.authorize(credential.as_deref()).await {
        GatewayOutcome::Public => Ok(Json(WebhookSession::public())),
        GatewayOutcome::Authorized(decision) => Ok(Json(decision.into())),
        GatewayOutcome::Denied(reason) => {
            Err(AppError::Unauthorized(anyhow::anyhow!(reason.as_str())))
        }
    }
}
