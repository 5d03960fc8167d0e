//! Registration and login
//!
//! Passwords are hashed with argon2id and a per-user random salt. Hashing
//! and verification are CPU-bound, so both run on tokio's blocking pool.

use std::sync::Arc;

use argon2::password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::database::{to_document, Collection, Filter, Store, StoreError};
use crate::error::AppError;
use crate::model::{
    non_empty, LoginRequest, LoginResponse, MessageResponse, NewUser, RegisterRequest, User,
};

const EMAIL_TAKEN: &str = "Email already in use";
const USERNAME_TAKEN: &str = "Username already taken";

#[derive(Clone)]
pub struct CredentialService {
    store: Arc<Store>,
}

impl CredentialService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Creates a user account
    ///
    /// Email uniqueness is checked before username uniqueness, and the first
    /// conflict is the one reported. Both lookups are direct gets on the
    /// store's unique index; the authoritative check runs in the same write
    /// transaction as the insert, so concurrent registrations cannot both
    /// claim the same email or username.
    pub async fn register(&self, request: RegisterRequest) -> Result<MessageResponse, AppError> {
        let (Some(email), Some(username), Some(password)) = (
            non_empty(request.email),
            non_empty(request.username),
            non_empty(request.password),
        ) else {
            return Err(AppError::Validation(
                "Email, username and password are required".to_string(),
            ));
        };

        // Cheap early exit that avoids hashing for an obvious conflict
        if self
            .store
            .find_one(Collection::Users, &Filter::all().eq("email", email.as_str()))?
            .is_some()
        {
            return Err(AppError::Conflict(EMAIL_TAKEN.to_string()));
        }
        if self
            .store
            .find_one(
                Collection::Users,
                &Filter::all().eq("username", username.as_str()),
            )?
            .is_some()
        {
            return Err(AppError::Conflict(USERNAME_TAKEN.to_string()));
        }

        let user = NewUser {
            email,
            username,
            password: hash_password(password).await?,
            created_at: Utc::now(),
        };

        match self
            .store
            .insert_one(Collection::Users, to_document(&user)?)
        {
            Ok(id) => {
                info!(user_id = %id, username = %user.username, "user registered");
                Ok(MessageResponse::new("User registered successfully"))
            }
            Err(StoreError::Duplicate(field)) if field == "email" => {
                Err(AppError::Conflict(EMAIL_TAKEN.to_string()))
            }
            Err(StoreError::Duplicate(_)) => Err(AppError::Conflict(USERNAME_TAKEN.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Verifies an email/password pair
    ///
    /// An unknown email and a wrong password produce the same error, and both
    /// pay for one argon2 verification.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, AppError> {
        let (Some(email), Some(password)) = (non_empty(request.email), non_empty(request.password))
        else {
            return Err(AppError::Validation(
                "Email and password are required".to_string(),
            ));
        };

        let Some(doc) = self
            .store
            .find_one(Collection::Users, &Filter::all().eq("email", email.as_str()))?
        else {
            // Burn the same verification cost as a real account would
            verify_password(password, dummy_hash().await?.to_string()).await?;
            warn!("login rejected: unknown email");
            return Err(AppError::InvalidCredentials);
        };
        let user: User = serde_json::from_value(Value::Object(doc)).map_err(StoreError::from)?;

        if !verify_password(password, user.password).await? {
            warn!(user_id = %user.id, "login rejected: wrong password");
            return Err(AppError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        Ok(LoginResponse {
            email: user.email,
            username: user.username,
            message: "Login successful".to_string(),
        })
    }
}

/// Argon2 hash of a throwaway password, computed once and verified against
/// whenever a login names an unknown email
async fn dummy_hash() -> Result<&'static str, AppError> {
    static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

    DUMMY_HASH
        .get_or_try_init(|| hash_password("routeshare-unknown-account".to_string()))
        .await
        .map(String::as_str)
}

async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|err| AppError::Internal(format!("hashing task failed: {err}")))?
    .map_err(|err| AppError::Internal(format!("password hashing failed: {err}")))
}

async fn verify_password(password: String, stored_hash: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored_hash)?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(err) => Err(err),
        }
    })
    .await
    .map_err(|err| AppError::Internal(format!("verification task failed: {err}")))?
    .map_err(|err| AppError::Internal(format!("stored password hash unusable: {err}")))
}
