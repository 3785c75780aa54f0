use std::sync::Arc;

use crate::store::Database;
use crate::token::TokenService;

/// Shared handles injected into every handler. Built once at startup.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(db: Database, tokens: TokenService) -> Self {
        Self {
            db,
            tokens: Arc::new(tokens),
        }
    }
}
