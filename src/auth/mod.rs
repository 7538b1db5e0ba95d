/*!
 * # Authentication Module
 *
 * Username/password login backed by the `users` table, issuing HS256 JWTs:
 *
 * - short-lived access tokens, accepted only by the bearer middleware
 * - longer-lived refresh tokens, recorded in `refresh_tokens` and accepted
 *   only by `/auth/refresh` and `/auth/logout`
 *
 * Logout revokes the presented refresh token so it can no longer be exchanged.
 */

pub mod password;
pub mod refresh_token;
pub mod user;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ErrorResponse;
use crate::handlers::extract::ApiJson;

/// Which credential a JWT represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Subject (user ID)
    pub username: String,      // Login name
    pub token_type: TokenType, // access or refresh
    pub jti: String,           // JWT ID (unique identifier for this token)
    pub iat: i64,              // Issued at time
    pub nbf: i64,              // Not valid before time
    pub exp: i64,              // Expiration time
    pub iss: String,           // Issuer
    pub aud: String,           // Audience
}

/// Authenticated user data extracted from the access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub token_id: String,
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub jwt_issuer: String,
    pub access_token_expiration: Duration,
    pub refresh_token_expiration: Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_audience: String,
        jwt_issuer: String,
        access_token_expiration: Duration,
        refresh_token_expiration: Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_audience,
            jwt_issuer,
            access_token_expiration,
            refresh_token_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
            Duration::from_secs(cfg.refresh_token_expiration as u64),
        )
    }
}

/// Authentication service that handles token issuance and validation
#[derive(Debug, Clone)]
pub struct AuthService {
    pub config: AuthConfig,
    pub db: Arc<DatabaseConnection>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    /// Verifies username/password and issues an access + refresh token pair.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let found = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&*self.db)
            .await?;

        // unknown usernames still pay for a hash verification
        let password = password.to_owned();
        let stored_hash = found.as_ref().map(|u| u.password_hash.clone());
        let verified = tokio::task::spawn_blocking(move || match stored_hash {
            Some(hash) => password::verify_password(&password, &hash),
            None => password::verify_without_user(&password),
        })
        .await
        .map_err(|e| AuthError::InternalError(format!("password verification task failed: {}", e)))?;

        let user = match found {
            Some(user) if verified && user.is_active => user,
            _ => {
                warn!(username = %username, "login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };

        let tokens = self.generate_token(&user).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(tokens)
    }

    /// Generate an access/refresh pair for a user and record the refresh token
    pub async fn generate_token(&self, user: &user::Model) -> Result<TokenPair, AuthError> {
        let now = Utc::now();
        let (access_token, _) = self.encode_token(user, TokenType::Access, now)?;
        let (refresh_token, refresh_claims) = self.encode_token(user, TokenType::Refresh, now)?;

        let expires_at = DateTime::<Utc>::from_timestamp(refresh_claims.exp, 0)
            .ok_or_else(|| AuthError::InternalError("Invalid token expiry".to_string()))?;
        self.store_refresh_token(user.id, &refresh_claims.jti, now, expires_at)
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
            refresh_expires_in: self.config.refresh_token_expiration.as_secs() as i64,
        })
    }

    fn encode_token(
        &self,
        user: &user::Model,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<(String, Claims), AuthError> {
        let lifetime = match token_type {
            TokenType::Access => self.config.access_token_expiration,
            TokenType::Refresh => self.config.refresh_token_expiration,
        };
        let exp = now
            + ChronoDuration::from_std(lifetime)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            token_type,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;

        Ok((token, claims))
    }

    /// Decode a JWT, checking signature, expiry, issuer, audience and type
    pub fn decode_token(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);
        validation.validate_nbf = true;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        if claims.token_type != expected {
            debug!(jti = %claims.jti, "token presented with the wrong type");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    /// Validate a bearer access token and resolve the active user behind it
    pub async fn validate_access_token(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.decode_token(token, TokenType::Access)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidToken)?;

        Ok(AuthUser {
            user_id: user.id,
            username: user.username,
            token_id: claims.jti,
        })
    }

    /// Exchange a refresh token for a new access token.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, AuthError> {
        let (claims, stored) = self.load_refresh_token(refresh_token).await?;
        if !stored.is_usable_at(Utc::now()) {
            return Err(AuthError::RevokedToken);
        }

        let user = user::Entity::find_by_id(stored.user_id)
            .one(&*self.db)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AuthError::InvalidToken)?;

        let (access_token, _) = self.encode_token(&user, TokenType::Access, Utc::now())?;
        debug!(user_id = %user.id, refresh_jti = %claims.jti, "issued access token from refresh token");

        Ok(AccessToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiration.as_secs() as i64,
        })
    }

    /// Revoke a refresh token owned by `user_id`.
    ///
    /// Any problem with the presented token is reported as `InvalidRefreshToken`.
    #[instrument(skip(self, refresh_token))]
    pub async fn logout(&self, user_id: Uuid, refresh_token: &str) -> Result<(), AuthError> {
        let (_, stored) = self
            .load_refresh_token(refresh_token)
            .await
            .map_err(|e| match e {
                AuthError::DatabaseError(_) | AuthError::InternalError(_) => e,
                _ => AuthError::InvalidRefreshToken,
            })?;

        if stored.user_id != user_id || !stored.is_usable_at(Utc::now()) {
            return Err(AuthError::InvalidRefreshToken);
        }

        let mut active: refresh_token::ActiveModel = stored.into();
        active.revoked = Set(true);
        active.update(&*self.db).await?;

        info!(user_id = %user_id, "refresh token revoked");
        Ok(())
    }

    async fn load_refresh_token(
        &self,
        token: &str,
    ) -> Result<(Claims, refresh_token::Model), AuthError> {
        let claims = self.decode_token(token, TokenType::Refresh)?;

        let stored = refresh_token::Entity::find()
            .filter(refresh_token::Column::TokenId.eq(claims.jti.as_str()))
            .one(&*self.db)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if stored.user_id.to_string() != claims.sub {
            return Err(AuthError::InvalidToken);
        }

        Ok((claims, stored))
    }

    async fn store_refresh_token(
        &self,
        user_id: Uuid,
        jti: &str,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        refresh_token::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            token_id: Set(jti.to_string()),
            created_at: Set(created_at),
            expires_at: Set(expires_at),
            revoked: Set(false),
        }
        .insert(&*self.db)
        .await?;
        Ok(())
    }

    /// Provision a new active user with an argon2-hashed password
    pub async fn create_user(&self, username: &str, password: &str) -> Result<user::Model, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        let existing = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(AuthError::InvalidInput(format!(
                "user '{}' already exists",
                username
            )));
        }

        let now = Utc::now();
        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(username.to_string()),
            password_hash: Set(password::hash_password(password)?),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(user_id = %created.id, username = %created.username, "user created");
        Ok(created)
    }

    /// Replace a user's password
    pub async fn set_password(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidInput("password is required".to_string()));
        }
        let found = self.find_user(username).await?;

        let mut active: user::ActiveModel = found.into();
        active.password_hash = Set(password::hash_password(password)?);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(())
    }

    /// Deactivate a user and revoke every refresh token they hold
    pub async fn deactivate_user(&self, username: &str) -> Result<u64, AuthError> {
        let found = self.find_user(username).await?;
        let user_id = found.id;

        let mut active: user::ActiveModel = found.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        let revoked = refresh_token::Entity::update_many()
            .col_expr(
                refresh_token::Column::Revoked,
                sea_orm::sea_query::Expr::value(true),
            )
            .filter(refresh_token::Column::UserId.eq(user_id))
            .filter(refresh_token::Column::Revoked.eq(false))
            .exec(&*self.db)
            .await?
            .rows_affected;

        info!(user_id = %user_id, revoked, "user deactivated");
        Ok(revoked)
    }

    async fn find_user(&self, username: &str) -> Result<user::Model, AuthError> {
        user::Entity::find()
            .filter(user::Column::Username.eq(username.trim()))
            .one(&*self.db)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

/// Token pair response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// Access token issued in exchange for a refresh token
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Login credentials
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

/// Refresh token request
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has been revoked")]
    RevokedToken,

    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User not found")]
    UserNotFound,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbErr> for AuthError {
    fn from(err: DbErr) -> Self {
        error!("auth database error: {}", err);
        AuthError::DatabaseError(err.to_string())
    }
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingAuth
            | Self::InvalidCredentials
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::RevokedToken => StatusCode::UNAUTHORIZED,
            Self::InvalidRefreshToken | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::TokenCreation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::MissingAuth => "AUTH_MISSING",
            Self::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            Self::InvalidToken => "AUTH_INVALID_TOKEN",
            Self::TokenExpired => "AUTH_TOKEN_EXPIRED",
            Self::RevokedToken => "AUTH_REVOKED_TOKEN",
            Self::InvalidRefreshToken => "AUTH_INVALID_REFRESH_TOKEN",
            Self::InvalidInput(_) => "AUTH_INVALID_INPUT",
            Self::UserNotFound => "AUTH_USER_NOT_FOUND",
            Self::TokenCreation(_) => "AUTH_TOKEN_CREATION_FAILED",
            Self::DatabaseError(_) => "AUTH_DATABASE_ERROR",
            Self::InternalError(_) => "AUTH_INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::MissingAuth => "Authentication required".to_string(),
            Self::InvalidToken => "Invalid authentication token".to_string(),
            Self::RevokedToken => "Authentication token has been revoked".to_string(),
            Self::TokenCreation(_) | Self::DatabaseError(_) | Self::InternalError(_) => {
                error!(error = %self, "authentication failure");
                "Internal authentication error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            details: Some(self.code().to_string()),
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// Authentication middleware that validates the bearer access token
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            error!("auth middleware installed without an AuthService extension");
            return AuthError::InternalError("Authentication service not available".to_string())
                .into_response();
        }
    };

    match extract_auth_from_headers(request.headers(), &auth_service).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

async fn extract_auth_from_headers(
    headers: &HeaderMap,
    auth_service: &AuthService,
) -> Result<AuthUser, AuthError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingAuth)?;

    auth_service.validate_access_token(token).await
}

/// Authentication routes, mounted under `/auth`
pub fn auth_routes() -> axum::Router<Arc<AuthService>> {
    axum::Router::new()
        .route("/login", axum::routing::post(login_handler))
        .route("/refresh", axum::routing::post(refresh_token_handler))
        .route(
            "/logout",
            axum::routing::post(logout_handler)
                .route_layer(axum::middleware::from_fn(auth_middleware)),
        )
        .layer(DefaultBodyLimit::max(1024 * 64))
}

/// Login handler
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginCredentials,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "auth"
)]
pub async fn login_handler(
    State(auth_service): State<Arc<AuthService>>,
    ApiJson(credentials): ApiJson<LoginCredentials>,
) -> Result<Json<TokenPair>, AuthError> {
    let token_pair = auth_service
        .login(&credentials.username, &credentials.password)
        .await?;
    Ok(Json(token_pair))
}

/// Refresh token handler
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New access token", body = AccessToken),
        (status = 401, description = "Invalid, expired or revoked refresh token"),
    ),
    tag = "auth"
)]
pub async fn refresh_token_handler(
    State(auth_service): State<Arc<AuthService>>,
    ApiJson(refresh_request): ApiJson<RefreshTokenRequest>,
) -> Result<Json<AccessToken>, AuthError> {
    let token = auth_service.refresh(&refresh_request.refresh_token).await?;
    Ok(Json(token))
}

/// Logout handler; revokes the presented refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = RefreshTokenRequest,
    responses(
        (status = 205, description = "Refresh token revoked"),
        (status = 400, description = "Invalid or expired refresh token"),
        (status = 401, description = "Missing or invalid access token"),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout_handler(
    State(auth_service): State<Arc<AuthService>>,
    auth_user: AuthUser,
    ApiJson(request): ApiJson<RefreshTokenRequest>,
) -> Result<StatusCode, AuthError> {
    auth_service
        .logout(auth_user.user_id, &request.refresh_token)
        .await?;
    Ok(StatusCode::RESET_CONTENT)
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.route_layer(axum::middleware::from_fn(auth_middleware))
    }
}
