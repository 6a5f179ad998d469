use serde::{Deserialize, Serialize};

pub const PUBLIC_ROLE: &str = "public";
pub const USER_ROLE: &str = "user";
pub const SUPERUSER_ROLE: &str = "superuser";

/// Authorization decision handed to the routing layer for an authenticated
/// caller. This is also the value stored in the decision cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub role: String,
    pub user_id: String,
    pub email: String,
}
