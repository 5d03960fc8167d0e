//! HTTP request handlers for the route-sharing API
//!
//! Handlers are thin: they extract the request, call the matching service
//! operation and shape the JSON response. Every failure is an [`AppError`]
//! and renders as `{ "error": ... }`.

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::database::Document;
use crate::error::AppError;
use crate::model::{
    CreateRouteRequest, CreatedRouteResponse, LikeRequest, ListParams, LoginRequest,
    LoginResponse, MessageResponse, RegisterRequest, RouteListResponse, RouteResponse,
};
use crate::route_service::LikeOutcome;
use crate::state::AppState;

/// JSON body extractor whose rejection is a 400 in the API's error shape
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Query-string extractor with the same rejection handling as [`AppJson`]
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Path extractor with the same rejection handling as [`AppJson`]
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

/// Registers a new user
///
/// # Request Body
///
/// ```json
/// { "email": "ann@example.com", "username": "ann", "password": "secret" }
/// ```
///
/// # Response
///
/// - **200 OK** - `{ "message": "User registered successfully" }`
/// - **400 Bad Request** - a field is missing
/// - **409 Conflict** - email or username already taken
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    Ok(Json(state.credentials.register(payload).await?))
}

/// Checks credentials
///
/// # Response
///
/// - **200 OK** - `{ "email", "username", "message" }`
/// - **400 Bad Request** - email or password missing
/// - **401 Unauthorized** - unknown email or wrong password (indistinguishable)
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    Ok(Json(state.credentials.login(payload).await?))
}

/// Lists routes, optionally filtered by city and sorted
///
/// # Example Request
///
/// `GET /routes?city=Ghent&sortBy=popularity`
pub async fn list_routes(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<Json<RouteListResponse>, AppError> {
    let routes = state.routes.list(params)?;
    Ok(Json(RouteListResponse { routes }))
}

pub async fn get_route(
    AppPath(id): AppPath<String>,
    State(state): State<AppState>,
) -> Result<Json<RouteResponse>, AppError> {
    let route = state.routes.get(&id)?;
    Ok(Json(RouteResponse { route }))
}

/// Creates a route
///
/// # Response
///
/// - **201 Created** - `{ "message", "route_id" }`
/// - **400 Bad Request** - missing fields, fewer than 2 checkpoints,
///   malformed checkpoint or non-numeric distance/elevation
pub async fn create_route(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateRouteRequest>,
) -> Result<(StatusCode, Json<CreatedRouteResponse>), AppError> {
    let id = state.routes.create(payload)?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedRouteResponse {
            message: "Route created successfully".to_string(),
            route_id: id.to_hex(),
        }),
    ))
}

pub async fn update_route(
    AppPath(id): AppPath<String>,
    State(state): State<AppState>,
    AppJson(fields): AppJson<Document>,
) -> Result<Json<MessageResponse>, AppError> {
    state.routes.update(&id, fields)?;
    Ok(Json(MessageResponse::new("Route updated successfully")))
}

pub async fn delete_route(
    AppPath(id): AppPath<String>,
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, AppError> {
    state.routes.delete(&id)?;
    Ok(Json(MessageResponse::new("Route deleted successfully")))
}

/// Likes a route on behalf of `user`
///
/// Repeating the call, or liking a route that does not exist, is a
/// successful no-op.
pub async fn like_route(
    AppPath(id): AppPath<String>,
    State(state): State<AppState>,
    AppJson(payload): AppJson<LikeRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = match state.routes.like(&id, payload.user)? {
        LikeOutcome::Applied => "Route liked",
        LikeOutcome::Unchanged => "Route already liked or not found",
    };
    Ok(Json(MessageResponse::new(message)))
}

/// Withdraws a like; the mirror image of [`like_route`]
pub async fn unlike_route(
    AppPath(id): AppPath<String>,
    State(state): State<AppState>,
    AppJson(payload): AppJson<LikeRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let message = match state.routes.unlike(&id, payload.user)? {
        LikeOutcome::Applied => "Route unliked",
        LikeOutcome::Unchanged => "Route not liked or not found",
    };
    Ok(Json(MessageResponse::new(message)))
}
