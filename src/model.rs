//! Data models for the route-sharing application
//!
//! Stored records, request payloads and response bodies. Request payloads
//! keep every field optional so that presence checks produce a validation
//! error instead of a JSON rejection.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{Document, Sort};
use crate::error::AppError;

/// A registered user as stored in the `users` collection
///
/// `password` holds an argon2 PHC string and never leaves the service.
#[derive(Deserialize, Debug, Clone)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// User document prior to insertion
#[derive(Serialize, Debug)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// Waypoint embedded in a route
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub order: i64,
}

/// Route document prior to insertion
#[derive(Serialize, Debug, Clone)]
pub struct NewRoute {
    pub name: String,
    pub city: String,
    pub distance_km: f64,
    pub elevation_m: f64,
    pub creator: String,
    pub description: String,
    pub checkpoints: Vec<Checkpoint>,
    #[serde(rename = "likedBy")]
    pub liked_by: Vec<String>,
    pub popularity: i64,
    pub created_at: DateTime<Utc>,
}

/// Request payload for `POST /register`
#[derive(Deserialize, Debug, Default)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Request payload for `POST /login`
#[derive(Deserialize, Debug, Default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request payload for `POST /routes`
///
/// Numeric fields arrive either as JSON numbers or numeric strings, so they
/// stay untyped until validation.
///
/// # Example
/// ```json
/// {
///   "name": "Loop A",
///   "city": "Ghent",
///   "distance_km": 10,
///   "elevation_m": 50,
///   "creator": "bob",
///   "checkpoints": [
///     { "name": "Start", "latitude": 0, "longitude": 0, "order": 0 },
///     { "name": "End", "latitude": 1, "longitude": 1, "order": 1 }
///   ]
/// }
/// ```
#[derive(Deserialize, Debug, Default)]
pub struct CreateRouteRequest {
    pub name: Option<Value>,
    pub city: Option<Value>,
    pub distance_km: Option<Value>,
    pub elevation_m: Option<Value>,
    pub creator: Option<Value>,
    pub description: Option<Value>,
    pub checkpoints: Option<Value>,
}

/// Request payload for `POST /routes/{id}/like` and `DELETE /routes/{id}/like`
#[derive(Deserialize, Debug, Default)]
pub struct LikeRequest {
    pub user: Option<String>,
}

/// Query parameters for `GET /routes`
///
/// Query string: `?sortBy=popularity&city=Ghent`
#[derive(Deserialize, Debug, Default)]
pub struct ListParams {
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
    pub city: Option<String>,
}

/// Accepted values of the `sortBy` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// Shortest first
    Distance,
    /// Newest first
    Date,
    /// Most liked first
    Popularity,
}

impl SortBy {
    pub fn sort(self) -> Sort {
        match self {
            Self::Distance => Sort::ascending("distance_km"),
            Self::Date => Sort::descending("created_at"),
            Self::Popularity => Sort::descending("popularity"),
        }
    }
}

impl FromStr for SortBy {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "distance" => Ok(Self::Distance),
            "date" => Ok(Self::Date),
            "popularity" => Ok(Self::Popularity),
            _ => Err(AppError::Validation(
                "Invalid sortBy value. Use distance, date or popularity".to_string(),
            )),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub email: String,
    pub username: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedRouteResponse {
    pub message: String,
    pub route_id: String,
}

#[derive(Serialize, Debug)]
pub struct RouteListResponse {
    pub routes: Vec<Document>,
}

#[derive(Serialize, Debug)]
pub struct RouteResponse {
    pub route: Document,
}

/// Treats an empty string the same as a missing value
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
