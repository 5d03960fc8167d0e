//! Application state shared across all request handlers

use std::sync::Arc;

use crate::credential_service::CredentialService;
use crate::database::Store;
use crate::route_service::RouteService;

/// Cloned into every handler by axum; both services share one store handle
#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialService,
    pub routes: RouteService,
}

impl AppState {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            credentials: CredentialService::new(Arc::clone(&store)),
            routes: RouteService::new(store),
        }
    }
}
