//! Password hashing, token issue and verification, and the bearer-token extractor.
use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error, warn};
use uuid::Uuid;

use crate::cache::ExpiringStore;
use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::models::{Claims, TokenType, User};
use crate::state::AppState;
use crate::store::{blocking, StoreResult};

pub struct AuthService;

impl AuthService {
    pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
        hash(password, cost)
            .map_err(|e| {
                error!("Failed to hash password: {}", e);
                ApiError::InternalError("Failed to hash password".to_string())
            })
    }

    pub fn verify_password(password: &str, hash: &str) -> Result<bool, ApiError> {
        verify(password, hash)
            .map_err(|e| {
                error!("Failed to verify password: {}", e);
                ApiError::InternalError("Failed to verify password".to_string())
            })
    }

    pub fn issue_token(
        user: &User,
        role: Option<&str>,
        token_type: TokenType,
        config: &AppConfig,
    ) -> Result<String, ApiError> {
        let now = Utc::now();
        let lifetime = match token_type {
            TokenType::Access => Duration::minutes(config.access_token_minutes),
            TokenType::Refresh => Duration::days(config.refresh_token_days),
        };

        let claims = Claims {
            sub: user.id.to_string(),
            exp: (now + lifetime).timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().simple().to_string(),
            token_type,
            user_id: user.id,
            email: user.email.clone(),
            role: role.map(str::to_string),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret.as_bytes())
        )
        .map_err(|e| {
            error!("Failed to generate token: {}", e);
            ApiError::InternalError("Failed to generate token".to_string())
        })
    }

    /// An `(access, refresh)` pair carrying the same role claim.
    pub fn issue_pair(user: &User, role: Option<&str>, config: &AppConfig) -> Result<(String, String), ApiError> {
        let access = Self::issue_token(user, role, TokenType::Access, config)?;
        let refresh = Self::issue_token(user, role, TokenType::Refresh, config)?;
        Ok((access, refresh))
    }

    /// Decodes and checks signature, expiry and token type.
    pub fn decode_token(token: &str, expected: TokenType, config: &AppConfig) -> Result<Claims, String> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => "Token is expired".to_string(),
            _ => "Token is invalid".to_string(),
        })?;

        if data.claims.token_type != expected {
            return Err("Token has wrong type".to_string());
        }
        Ok(data.claims)
    }
}

fn blacklist_key(jti: &str) -> String {
    format!("blacklist_{}", jti)
}

/// Blacklists a refresh token until it would have expired anyway.
pub fn revoke(cache: &dyn ExpiringStore, claims: &Claims, now: chrono::DateTime<Utc>) -> StoreResult<()> {
    let remaining = Duration::seconds(claims.exp as i64 - now.timestamp());
    if remaining <= Duration::zero() {
        debug!("Token {} already expired, nothing to revoke", claims.jti);
        return Ok(());
    }
    cache.set(&blacklist_key(&claims.jti), "1", remaining)
}

pub fn is_revoked(cache: &dyn ExpiringStore, jti: &str) -> StoreResult<bool> {
    Ok(cache.get(&blacklist_key(jti))?.is_some())
}

/// The active user behind the request's `Authorization: Bearer` access token.
pub struct AuthenticatedUser(pub User);

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let bearer = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        Box::pin(async move {
            let state = state.ok_or_else(|| ApiError::InternalError("Application state missing".to_string()))?;
            let token = bearer
                .ok_or_else(|| ApiError::AuthError("Authentication credentials were not provided.".to_string()))?;
            let claims = AuthService::decode_token(&token, TokenType::Access, &state.config).map_err(|e| {
                warn!("Rejected bearer token: {}", e);
                ApiError::AuthError("Given token not valid for any token type".to_string())
            })?;

            let identity = state.identity.clone();
            let user = blocking(move || identity.get_user(claims.user_id))
                .await
                .map_err(|e| match e {
                    ApiError::NotFoundError(_) => ApiError::AuthError("User not found".to_string()),
                    other => other,
                })?;
            if !user.is_active {
                return Err(ApiError::AuthError("User is inactive".to_string()));
            }
            Ok(AuthenticatedUser(user))
        })
    }
}
