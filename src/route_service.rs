//! Route aggregate: validation, persistence, listing and the like protocol
//!
//! `popularity` is a counter kept in lockstep with `likedBy`. Like and unlike
//! are single conditional updates: the membership test is part of the match,
//! so a concurrent duplicate request finds nothing to change.

use std::sync::Arc;

use bson::oid::ObjectId;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::database::{to_document, Collection, Document, Filter, Store, Update};
use crate::error::AppError;
use crate::model::{non_empty, Checkpoint, CreateRouteRequest, ListParams, NewRoute, SortBy};

const LIKED_BY: &str = "likedBy";
const POPULARITY: &str = "popularity";

const MISSING_FIELDS: &str =
    "Missing required fields: name, city, distance_km, elevation_m, creator, checkpoints";
const TOO_FEW_CHECKPOINTS: &str = "Checkpoints must be an array with at least 2 items";
const CHECKPOINT_SHAPE: &str = "Each checkpoint must have name, latitude, longitude and order";

/// Result of a like or unlike request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    Applied,
    /// Already in the requested state, or the route does not exist
    Unchanged,
}

#[derive(Clone)]
pub struct RouteService {
    store: Arc<Store>,
}

impl RouteService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn list(&self, params: ListParams) -> Result<Vec<Document>, AppError> {
        let sort = non_empty(params.sort_by)
            .map(|value| value.parse::<SortBy>())
            .transpose()?
            .map(SortBy::sort);
        let filter = match non_empty(params.city) {
            Some(city) => Filter::all().eq("city", city),
            None => Filter::all(),
        };

        Ok(self.store.find(Collection::Routes, &filter, sort.as_ref())?)
    }

    pub fn get(&self, id: &str) -> Result<Document, AppError> {
        let id = parse_id(id)?;
        self.store
            .find_one(Collection::Routes, &Filter::by_id(id))?
            .ok_or_else(route_not_found)
    }

    pub fn create(&self, request: CreateRouteRequest) -> Result<ObjectId, AppError> {
        let route = validate_new_route(request)?;
        let id = self
            .store
            .insert_one(Collection::Routes, to_document(&route)?)?;

        info!(route_id = %id, name = %route.name, city = %route.city, "route created");
        Ok(id)
    }

    /// Merges `fields` into the stored route without further validation
    pub fn update(&self, id: &str, fields: Document) -> Result<(), AppError> {
        if fields.is_empty() {
            return Err(AppError::Validation(
                "No fields provided for update".to_string(),
            ));
        }
        let id = parse_id(id)?;
        if fields.contains_key("_id") {
            return Err(AppError::Validation(
                "The _id field cannot be updated".to_string(),
            ));
        }

        let update = fields
            .into_iter()
            .fold(Update::new(), |update, (field, value)| update.set(field, value));
        let result = self
            .store
            .update_one(Collection::Routes, &Filter::by_id(id), &update)?;
        if result.matched == 0 {
            return Err(route_not_found());
        }

        info!(route_id = %id, "route updated");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), AppError> {
        let id = parse_id(id)?;
        if self
            .store
            .delete_one(Collection::Routes, &Filter::by_id(id))?
            == 0
        {
            return Err(route_not_found());
        }

        info!(route_id = %id, "route deleted");
        Ok(())
    }

    pub fn like(&self, id: &str, user: Option<String>) -> Result<LikeOutcome, AppError> {
        let user = require_user(user)?;
        let id = parse_id(id)?;

        let result = self.store.update_one(
            Collection::Routes,
            &Filter::by_id(id).not_contains(LIKED_BY, user.as_str()),
            &Update::new()
                .add_to_set(LIKED_BY, user.as_str())
                .inc(POPULARITY, 1),
        )?;
        if result.modified == 0 {
            debug!(route_id = %id, user = %user, "like ignored");
            return Ok(LikeOutcome::Unchanged);
        }

        info!(route_id = %id, user = %user, "route liked");
        Ok(LikeOutcome::Applied)
    }

    pub fn unlike(&self, id: &str, user: Option<String>) -> Result<LikeOutcome, AppError> {
        let user = require_user(user)?;
        let id = parse_id(id)?;

        let result = self.store.update_one(
            Collection::Routes,
            &Filter::by_id(id).contains(LIKED_BY, user.as_str()),
            &Update::new()
                .pull(LIKED_BY, user.as_str())
                .inc(POPULARITY, -1),
        )?;
        if result.modified == 0 {
            debug!(route_id = %id, user = %user, "unlike ignored");
            return Ok(LikeOutcome::Unchanged);
        }

        // Floor guard: the counter is tracked separately from the set
        self.store.update_one(
            Collection::Routes,
            &Filter::by_id(id).less_than(POPULARITY, 0.0),
            &Update::new().set(POPULARITY, 0),
        )?;

        info!(route_id = %id, user = %user, "route unliked");
        Ok(LikeOutcome::Applied)
    }
}

fn parse_id(id: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(id).map_err(|_| AppError::Validation("Invalid route id".to_string()))
}

fn require_user(user: Option<String>) -> Result<String, AppError> {
    non_empty(user).ok_or_else(|| AppError::Validation("User is required".to_string()))
}

fn route_not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}

fn validate_new_route(request: CreateRouteRequest) -> Result<NewRoute, AppError> {
    let (
        Some(name),
        Some(city),
        Some(distance_km),
        Some(elevation_m),
        Some(creator),
        Some(checkpoints),
    ) = (
        request.name,
        request.city,
        request.distance_km,
        request.elevation_m,
        request.creator,
        request.checkpoints,
    )
    else {
        return Err(AppError::Validation(MISSING_FIELDS.to_string()));
    };

    let checkpoints = match checkpoints {
        Value::Array(items) if items.len() >= 2 => items,
        _ => return Err(AppError::Validation(TOO_FEW_CHECKPOINTS.to_string())),
    };
    let checkpoints = checkpoints
        .iter()
        .map(validate_checkpoint)
        .collect::<Result<Vec<_>, _>>()?;

    let (Some(name), Some(city), Some(creator)) = (text(&name), text(&city), text(&creator))
    else {
        return Err(AppError::Validation(
            "name, city and creator must be strings".to_string(),
        ));
    };
    let description = match request.description {
        None => String::new(),
        Some(value) => text(&value).ok_or_else(|| {
            AppError::Validation("description must be a string".to_string())
        })?,
    };

    let (Some(distance_km), Some(elevation_m)) = (number(&distance_km), number(&elevation_m))
    else {
        return Err(AppError::Validation(
            "distance_km and elevation_m must be numeric".to_string(),
        ));
    };
    if distance_km < 0.0 || elevation_m < 0.0 {
        return Err(AppError::Validation(
            "distance_km and elevation_m must not be negative".to_string(),
        ));
    }

    Ok(NewRoute {
        name,
        city,
        distance_km,
        elevation_m,
        creator,
        description,
        checkpoints,
        liked_by: Vec::new(),
        popularity: 0,
        created_at: Utc::now(),
    })
}

fn validate_checkpoint(value: &Value) -> Result<Checkpoint, AppError> {
    let field = |key: &str| value.get(key).filter(|field| !field.is_null());
    let (Some(name), Some(latitude), Some(longitude), Some(order)) = (
        field("name"),
        field("latitude"),
        field("longitude"),
        field("order"),
    ) else {
        return Err(AppError::Validation(CHECKPOINT_SHAPE.to_string()));
    };

    let (Some(name), Some(latitude), Some(longitude), Some(order)) =
        (text(name), number(latitude), number(longitude), integer(order))
    else {
        return Err(AppError::Validation(
            "Checkpoint name must be a string; latitude, longitude and order must be numeric"
                .to_string(),
        ));
    };

    Ok(Checkpoint {
        name,
        latitude,
        longitude,
        order,
    })
}

fn text(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

/// JSON numbers and numeric strings, finite only
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|number| number.is_finite())
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0 && float.abs() < i64::MAX as f64)
                .map(|float| float as i64)
        }),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}
