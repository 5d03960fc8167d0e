//! Route definitions for the route-sharing API
//!
//! This module configures all HTTP routes and maps them to their respective handlers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::handler::{
    create_route, delete_route, get_route, like_route, list_routes, login, register,
    unlike_route, update_route,
};
use crate::state::AppState;

/// Creates and configures the Axum application router with all routes
///
/// # Route Definitions
///
/// - `POST /register` - Creates a user account
/// - `POST /login` - Verifies credentials
/// - `GET /routes` - Lists routes (`?city=` filter, `?sortBy=distance|date|popularity`)
/// - `POST /routes` - Creates a route
/// - `GET /routes/{id}` - Fetches one route
/// - `PUT /routes/{id}` - Partially updates a route
/// - `DELETE /routes/{id}` - Deletes a route
/// - `POST /routes/{id}/like` - Likes a route (idempotent)
/// - `DELETE /routes/{id}/like` - Withdraws a like (idempotent)
///
/// CORS is permissive so that a browser front end on another origin can
/// call the API.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use routeshare::database::Store;
/// # use routeshare::route::create_app;
/// # use routeshare::state::AppState;
/// let store = Arc::new(Store::open("routes.db").unwrap());
/// let app = create_app(AppState::new(store));
/// // axum::serve(listener, app).await.unwrap();
/// ```
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/routes", get(list_routes).post(create_route))
        .route(
            "/routes/{id}",
            get(get_route).put(update_route).delete(delete_route),
        )
        .route("/routes/{id}/like", post(like_route).delete(unlike_route))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
