//! Bearer token authentication
//!
//! HS256 JWTs carrying `{sub, exp, iat, iss, aud, roles}`. Three role groups
//! gate the API:
//!
//! - `api_admin`: full CRUD and configuration
//! - `api_consumer`: read-only
//! - `api_producer`: read, plus creating chunks and ingesting samples
//!
//! With auth disabled every caller is treated as an admin.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::state::AppState;

pub const ROLE_ADMIN: &str = "api_admin";
pub const ROLE_CONSUMER: &str = "api_consumer";
pub const ROLE_PRODUCER: &str = "api_producer";

/// Role groups recognised by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "api_admin")]
    Admin,
    #[serde(rename = "api_consumer")]
    Consumer,
    #[serde(rename = "api_producer")]
    Producer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => ROLE_ADMIN,
            Role::Consumer => ROLE_CONSUMER,
            Role::Producer => ROLE_PRODUCER,
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        match self {
            Role::Admin => true,
            Role::Consumer => permission == Permission::Read,
            Role::Producer => matches!(permission, Permission::Read | Permission::Produce),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ROLE_ADMIN | "admin" => Ok(Role::Admin),
            ROLE_CONSUMER | "consumer" => Ok(Role::Consumer),
            ROLE_PRODUCER | "producer" => Ok(Role::Producer),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// What an endpoint needs from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// View any record or sample
    Read,
    /// Create chunks and ingest samples
    Produce,
    /// Everything else
    Admin,
}

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Authentication settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: "change-me".to_string(),
            issuer: "channelstore".to_string(),
            audience: "channelstore-api".to_string(),
            token_ttl_hours: 24,
        }
    }
}

/// Mints and validates tokens
pub struct JwtManager {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(config: AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Generate a token for a subject holding the given roles
    pub fn generate_token(&self, subject: &str, roles: &[Role]) -> Result<String, ApiError> {
        let now = Utc::now();
        let expiration = now + Duration::hours(self.config.token_ttl_hours);

        let claims = Claims {
            sub: subject.to_string(),
            exp: expiration.timestamp() as usize,
            iat: now.timestamp() as usize,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            roles: roles.iter().map(|r| r.as_str().to_string()).collect(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Validate a token and resolve the caller
    pub fn validate_token(&self, token: &str) -> Result<Caller, ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.set_audience(&[self.config.audience.clone()]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;

        let roles = data
            .claims
            .roles
            .iter()
            .filter_map(|r| r.parse::<Role>().ok())
            .collect();

        Ok(Caller {
            subject: data.claims.sub,
            roles,
        })
    }
}

/// The authenticated identity behind a request
#[derive(Debug, Clone)]
pub struct Caller {
    pub subject: String,
    pub roles: Vec<Role>,
}

impl Caller {
    fn anonymous_admin() -> Self {
        Self {
            subject: "anonymous".to_string(),
            roles: vec![Role::Admin],
        }
    }

    pub fn can(&self, permission: Permission) -> bool {
        self.roles.iter().any(|r| r.grants(permission))
    }

    /// Fail with 403 unless some role grants `permission`
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.can(permission) {
            return Ok(());
        }
        tracing::debug!(subject = %self.subject, ?permission, "Permission denied");
        Err(ApiError::PermissionDenied(format!(
            "{} may not perform this action",
            self.subject
        )))
    }
}

/// Extract the token from an `Authorization: Bearer ...` header
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if !state.jwt.enabled() {
            return Ok(Caller::anonymous_admin());
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
            })?;

        let token = bearer_token(header)
            .ok_or_else(|| ApiError::Unauthorized("Expected a Bearer token.".to_string()))?;

        state.jwt.validate_token(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new(AuthConfig {
            secret: "test-secret".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_token_round_trip_keeps_roles() {
        let jwt = manager();
        let token = jwt.generate_token("alice", &[Role::Producer]).unwrap();
        let caller = jwt.validate_token(&token).unwrap();

        assert_eq!(caller.subject, "alice");
        assert_eq!(caller.roles, vec![Role::Producer]);
        assert!(caller.can(Permission::Produce));
        assert!(!caller.can(Permission::Admin));
    }

    #[test]
    fn test_foreign_secret_is_rejected() {
        let other = JwtManager::new(AuthConfig {
            secret: "other".to_string(),
            ..Default::default()
        });
        let token = other.generate_token("mallory", &[Role::Admin]).unwrap();
        assert!(matches!(
            manager().validate_token(&token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_role_grants() {
        assert!(Role::Consumer.grants(Permission::Read));
        assert!(!Role::Consumer.grants(Permission::Produce));
        assert!(Role::Producer.grants(Permission::Produce));
        assert!(Role::Admin.grants(Permission::Admin));
        assert_eq!("api_consumer".parse::<Role>().unwrap(), Role::Consumer);
        assert!("api_transformer".parse::<Role>().is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
