//! Library exports for the route-sharing backend
//!
//! This module exposes internal components for testing and potential library usage.

pub mod config;
pub mod credential_service;
pub mod database;
pub mod error;
pub mod handler;
pub mod model;
pub mod route;
pub mod route_service;
pub mod state;
