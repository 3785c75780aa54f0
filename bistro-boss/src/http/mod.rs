//! HTTP layer: Axum router, authorization gate, handlers and responses.
//!
//! Exposes the bistro's JSON endpoints (`/jwt`, `/users`, `/menu`, `/reviews`,
//! `/carts`) plus a plain-text liveness route at `/`.

mod auth;
mod error;
mod handlers;
mod responses;
mod state;


pub use handlers::router;
pub use state::AppState;
