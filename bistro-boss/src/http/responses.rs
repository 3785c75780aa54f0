use serde::{Deserialize, Serialize};

use crate::store::InsertOneResult;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub menu: usize,
    pub reviews: usize,
    pub carts: usize,
    pub users: usize,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CreateUserResponse {
    Inserted(InsertOneResult),
    AlreadyExists(MessageResponse),
}

#[derive(Debug, Serialize)]
pub struct AdminFlag {
    pub admin: bool,
}

/// `{admin:false}` when the path email is not the caller's, otherwise the
/// looked-up flag wrapped in `result`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AdminStatusResponse {
    NotCaller(AdminFlag),
    Lookup { result: AdminFlag },
}

#[derive(Debug, Deserialize)]
pub struct CartsQuery {
    pub email: Option<String>,
}
