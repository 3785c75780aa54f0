use std::any::Any;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::model::{CartItem, MenuItem, NewCartItem, NewUser, ObjectId, Review, Role, User};
use crate::store::{DeleteResult, InsertOneResult, UpdateResult};
use crate::token::TokenRequest;

use super::auth::{ensure_admin, ensure_authenticated};
use super::error::ApiError;
use super::responses::{
    AdminFlag, AdminStatusResponse, CartsQuery, CreateUserResponse, HealthResponse,
    MessageResponse, TokenResponse,
};
use super::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/jwt", post(issue_token))
        .route("/users", get(list_users).post(create_user))
        // PATCH takes a user id, GET takes an email; one template serves both.
        .route("/users/admin/{key}", get(admin_status).patch(make_admin))
        .route("/menu", get(list_menu))
        .route("/reviews", get(list_reviews))
        .route("/carts", get(list_carts).post(add_to_cart))
        .route("/carts/{id}", delete(remove_from_cart))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            tower_http::request_id::SetRequestIdLayer::new(
                axum::http::header::HeaderName::from_static("x-request-id"),
                tower_http::request_id::MakeRequestUuid::default(),
            ),
        )
        .layer(tower_http::request_id::PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error!("handler panicked");
    ApiError::Internal.into_response()
}

fn parse_object_id(raw: &str) -> Result<ObjectId, ApiError> {
    raw.parse().map_err(|err| {
        debug!(error = %err, "rejected path id");
        ApiError::InvalidId
    })
}

async fn root() -> &'static str {
    "Bistro boss is running"
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        menu: state.db.menu.count().await,
        reviews: state.db.reviews.count().await,
        carts: state.db.carts.count().await,
        users: state.db.users.count().await,
    })
}

async fn issue_token(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(request) = payload?;
    let email = request.email.clone();
    let token = state.tokens.issue(request).map_err(|err| {
        error!(error = %err, "failed to sign token");
        ApiError::Internal
    })?;
    debug!(email = %email, "token issued");
    Ok(Json(TokenResponse { token }))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, ApiError> {
    let claims = ensure_authenticated(&state, &headers)?;
    ensure_admin(&state, &claims).await?;

    let users = state.db.users.find_all().await;
    debug!(users = users.len(), "users listed");
    Ok(Json(users))
}

async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let Json(new_user) = payload?;
    let user = new_user.into_user();
    let email = user.email.clone();

    let key = email.clone();
    let inserted = state
        .db
        .users
        .insert_unless(move |existing| existing.email == key, user)
        .await?;

    match inserted {
        Some(result) => {
            info!(email = %email, id = %result.inserted_id, "user created");
            Ok(Json(CreateUserResponse::Inserted(result)))
        }
        None => {
            debug!(email = %email, "user already exists");
            Ok(Json(CreateUserResponse::AlreadyExists(MessageResponse {
                message: "user already exist",
            })))
        }
    }
}

async fn make_admin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UpdateResult>, ApiError> {
    let id = parse_object_id(&id)?;

    let result = state
        .db
        .users
        .update_one(id, |user| {
            let changed = !user.is_admin();
            user.role = Some(Role::Admin);
            changed
        })
        .await?;

    info!(
        id = %id,
        matched = result.matched_count,
        modified = result.modified_count,
        "admin role requested"
    );
    Ok(Json(result))
}

async fn admin_status(
    State(state): State<AppState>,
    Path(email): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AdminStatusResponse>, ApiError> {
    let claims = ensure_authenticated(&state, &headers)?;

    if claims.email != email {
        debug!(caller = %claims.email, requested = %email, "admin status requested for another user");
        return Ok(Json(AdminStatusResponse::NotCaller(AdminFlag { admin: false })));
    }

    let admin = state
        .db
        .users
        .find_one(|user| user.email == email)
        .await
        .is_some_and(|user| user.is_admin());
    debug!(email = %email, admin, "admin status requested");

    Ok(Json(AdminStatusResponse::Lookup {
        result: AdminFlag { admin },
    }))
}

async fn list_menu(State(state): State<AppState>) -> Json<Vec<MenuItem>> {
    let items = state.db.menu.find_all().await;
    debug!(items = items.len(), "menu requested");
    Json(items)
}

async fn list_reviews(State(state): State<AppState>) -> Json<Vec<Review>> {
    let reviews = state.db.reviews.find_all().await;
    debug!(reviews = reviews.len(), "reviews requested");
    Json(reviews)
}

async fn add_to_cart(
    State(state): State<AppState>,
    payload: Result<Json<NewCartItem>, JsonRejection>,
) -> Result<Json<InsertOneResult>, ApiError> {
    let Json(new_item) = payload?;
    let item = new_item.into_cart_item();
    let email = item.email.clone();

    let result = state.db.carts.insert_one(item).await?;
    debug!(email = %email, id = %result.inserted_id, "cart item added");
    Ok(Json(result))
}

async fn list_carts(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<CartsQuery>, QueryRejection>,
) -> Result<Json<Vec<CartItem>>, ApiError> {
    let claims = ensure_authenticated(&state, &headers)?;
    let Query(query) = query?;

    let Some(email) = query.email.filter(|email| !email.is_empty()) else {
        debug!("cart requested without email");
        return Ok(Json(Vec::new()));
    };

    if email != claims.email {
        warn!(caller = %claims.email, requested = %email, "cart requested for another user");
        return Err(ApiError::Forbidden);
    }

    let items = state.db.carts.find(|item| item.email == email).await;
    debug!(email = %email, items = items.len(), "cart requested");
    Ok(Json(items))
}

async fn remove_from_cart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResult>, ApiError> {
    let id = parse_object_id(&id)?;

    let result = state.db.carts.delete_one(id).await?;
    debug!(id = %id, deleted = result.deleted_count, "cart item removal requested");
    Ok(Json(result))
}
