use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The authenticated principal of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    pub username: String,
    pub is_admin: bool,
}
