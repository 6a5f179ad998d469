use serde::Serialize;

use crate::models::{Decision, PUBLIC_ROLE};

/// Session variables returned to the routing layer by the auth webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookSession {
    #[serde(rename = "X-Hasura-Role")]
    pub role: String,

    #[serde(rename = "X-Hasura-User-Id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(rename = "X-Hasura-User-Email", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl WebhookSession {
    pub fn public() -> Self {
        Self {
            role: PUBLIC_ROLE.to_string(),
            user_id: None,
            email: None,
        }
    }
}

impl From<Decision> for WebhookSession {
    fn from(decision: Decision) -> Self {
        Self {
            role: decision.role,
            user_id: Some(decision.user_id),
            email: Some(decision.email),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_session_has_no_identity() {
        let value = serde_json::to_value(WebhookSession::public()).expect("serialize");
        assert_eq!(value, json!({ "X-Hasura-Role": "public" }));
    }

    #[test]
    fn test_authorized_session_headers() {
        let session = WebhookSession::from(Decision {
            role: "user".to_string(),
            user_id: "u1".to_string(),
            email: "a@example.com".to_string(),
        });
        let value = serde_json::to_value(session).expect("serialize");
        assert_eq!(
            value,
            json!({
                "X-Hasura-Role": "user",
                "X-Hasura-User-Id": "u1",
                "X-Hasura-User-Email": "a@example.com"
            })
        );
    }
}
