pub mod actions;
pub mod authz;

use serde::Serialize;

/// Error body returned to action callers.
#[derive(Debug, Serialize)]
pub struct ActionErrorResponse {
    pub message: String,
}
