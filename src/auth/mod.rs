use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use rand::RngCore;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::validate_email;

use crate::db::DbPool;
use crate::entities::{access_token, user, user::UserSummary};
use crate::errors::{FieldError, ServiceError};
use crate::events::{Event, EventSender};

const TOKEN_BYTES: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;

/// Authenticated principal attached to the request once the bearer token
/// has been resolved.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub token_id: Uuid,
}

/// Issues and validates opaque bearer tokens. Tokens are random bytes handed
/// to the client once; only their SHA-256 digest is persisted, so a leaked
/// database cannot be replayed against the API.
pub struct AuthService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    token_ttl: Option<Duration>,
}

impl AuthService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        token_ttl_secs: Option<u64>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            token_ttl: token_ttl_secs.map(|s| Duration::seconds(s as i64)),
        }
    }

    /// Creates an account and issues its first token.
    #[instrument(skip(self, password))]
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(UserSummary, String), ServiceError> {
        let db = self.db_pool.as_ref();
        let mut errors = Vec::new();

        if name.is_empty() || name.chars().count() > 255 {
            errors.push(FieldError::new(
                "name",
                "Name must be between 1 and 255 characters.",
            ));
        }
        if !validate_email(email) {
            errors.push(FieldError::new("email", "Email must be a valid email address."));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(FieldError::new(
                "password",
                "Password must be at least 8 characters.",
            ));
        }

        if errors.is_empty() {
            let existing = user::Entity::find()
                .filter(user::Column::Email.eq(email))
                .one(db)
                .await
                .map_err(ServiceError::DatabaseError)?;
            if existing.is_some() {
                errors.push(FieldError::new("email", "The email has already been taken."));
            }
        }

        if !errors.is_empty() {
            return Err(ServiceError::ValidationFailed(errors));
        }

        let password_hash = hash_password(password)?;
        let account = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            password_hash: Set(password_hash),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .map_err(ServiceError::DatabaseError)?;

        info!(user_id = %account.id, "Registered user");
        if let Err(e) = self
            .event_sender
            .send(Event::UserRegistered(account.id))
            .await
        {
            warn!("Failed to publish user registered event: {}", e);
        }

        let token = self.issue_token(account.id).await?;
        Ok((UserSummary::from(&account), token))
    }

    /// Verifies credentials and issues a fresh token. The failure message is
    /// deliberately identical for unknown email and wrong password.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(UserSummary, String), ServiceError> {
        let db = self.db_pool.as_ref();

        let account = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid credentials".to_string()))?;

        if !verify_password(password, &account.password_hash) {
            return Err(ServiceError::Unauthorized("Invalid credentials".to_string()));
        }

        let token = self.issue_token(account.id).await?;
        info!(user_id = %account.id, "User logged in");
        Ok((UserSummary::from(&account), token))
    }

    /// Revokes the token the request authenticated with.
    #[instrument(skip(self))]
    pub async fn logout(&self, token_id: Uuid) -> Result<(), ServiceError> {
        access_token::Entity::delete_by_id(token_id)
            .exec(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(())
    }

    /// Resolves a plaintext bearer token to its user. Expired tokens are
    /// deleted on sight.
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let db = self.db_pool.as_ref();
        let digest = hash_token(token);

        let record = access_token::Entity::find()
            .filter(access_token::Column::TokenHash.eq(digest))
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid or expired token".to_string()))?;

        let now = Utc::now();
        if record.is_expired(now) {
            let _ = access_token::Entity::delete_by_id(record.id).exec(db).await;
            return Err(ServiceError::Unauthorized("Invalid or expired token".to_string()));
        }

        let account = user::Entity::find_by_id(record.user_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid or expired token".to_string()))?;

        // Best effort; a failed touch must not fail the request
        let mut touch: access_token::ActiveModel = record.clone().into();
        touch.last_used_at = Set(Some(now));
        if let Err(e) = touch.update(db).await {
            warn!("Failed to record token use: {}", e);
        }

        Ok(AuthUser {
            user_id: account.id,
            name: account.name,
            email: account.email,
            token_id: record.id,
        })
    }

    async fn issue_token(&self, user_id: Uuid) -> Result<String, ServiceError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let now = Utc::now();
        access_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token_hash: Set(hash_token(&token)),
            created_at: Set(now),
            expires_at: Set(self.token_ttl.map(|ttl| now + ttl)),
            last_used_at: Set(None),
        }
        .insert(self.db_pool.as_ref())
        .await
        .map_err(ServiceError::DatabaseError)?;

        Ok(token)
    }
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServiceError::InternalError(format!("Failed to hash password: {}", e)))
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Middleware guarding protected routes. Resolves the bearer token and makes
/// the AuthUser available to extractors downstream.
pub async fn require_auth(
    State(auth_service): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return ServiceError::Unauthorized("Missing bearer token".to_string()).into_response();
    };

    match auth_service.authenticate(token).await {
        Ok(auth_user) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("Authentication required".to_string()))
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub user: UserSummary,
}

/// Routes reachable without a token.
pub fn public_routes() -> Router<Arc<AuthService>> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
}

/// Routes that assume `require_auth` ran.
pub fn protected_routes() -> Router<Arc<AuthService>> {
    Router::new()
        .route("/logout", post(logout_handler))
        .route("/me", axum::routing::get(me_handler))
}

async fn register_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let (user, token) = auth_service
        .register(&body.name, &body.email, &body.password)
        .await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(TokenResponse { token, user }),
    ))
}

async fn login_handler(
    State(auth_service): State<Arc<AuthService>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ServiceError> {
    let (user, token) = auth_service.login(&body.email, &body.password).await?;
    Ok(Json(TokenResponse { token, user }))
}

async fn logout_handler(
    State(auth_service): State<Arc<AuthService>>,
    auth_user: AuthUser,
) -> Result<Json<serde_json::Value>, ServiceError> {
    auth_service.logout(auth_user.token_id).await?;
    Ok(Json(serde_json::json!({ "message": "Successfully logged out" })))
}

async fn me_handler(auth_user: AuthUser) -> Json<UserSummary> {
    Json(UserSummary {
        id: auth_user.user_id,
        name: auth_user.name,
        email: auth_user.email,
    })
}
