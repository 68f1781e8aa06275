//! Authentication extractors.
//!
//! - `AdminAuth` - Admin bearer token (HS256 JWT) for the credit management routes
//! - `ServiceAuth` - Service-to-service authentication via API key

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Admin identity used when admin authentication is disabled.
const ANONYMOUS_ADMIN: &str = "anonymous";

/// An authenticated administrator.
#[derive(Debug, Clone)]
pub struct AdminAuth {
    /// Admin identifier (for audit logging).
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if !state.config.admin_auth_enabled {
            return Ok(AdminAuth {
                admin_id: ANONYMOUS_ADMIN.to_string(),
            });
        }

        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let secret = state.config.admin_jwt_secret.as_ref().ok_or_else(|| {
            tracing::error!("Admin auth is enabled but no JWT secret is configured");
            ApiError::Unauthorized
        })?;

        let claims = validate_admin_token(token, secret)?;
        tracing::debug!(admin_id = %claims.sub, "Admin authenticated");

        Ok(AdminAuth {
            admin_id: claims.sub,
        })
    }
}

/// Service authentication via API key.
///
/// Used for the billing hook and skill admission.
#[derive(Debug, Clone)]
pub struct ServiceAuth {
    /// The service name or identifier.
    pub service_name: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let expected_key = state
            .config
            .service_api_key
            .as_ref()
            .ok_or(ApiError::Unauthorized)?;

        if api_key != expected_key {
            return Err(ApiError::Unauthorized);
        }

        let service_name = parts
            .headers
            .get("x-service-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Ok(ServiceAuth { service_name })
    }
}

/// Claims of an admin token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    /// Subject (admin ID).
    pub sub: String,
    /// Expiration time.
    pub exp: i64,
}

/// Validate an admin token signed with the shared secret.
fn validate_admin_token(token: &str, secret: &str) -> Result<AdminClaims, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<AdminClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "Admin token validation failed");
            ApiError::Unauthorized
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, exp: i64) -> String {
        let claims = AdminClaims {
            sub: "ops".into(),
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn accepts_token_with_matching_secret() {
        let claims = validate_admin_token(&token("secret", in_an_hour()), "secret").unwrap();
        assert_eq!(claims.sub, "ops");
    }

    #[test]
    fn rejects_wrong_secret() {
        assert!(matches!(
            validate_admin_token(&token("other", in_an_hour()), "secret"),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let expired = chrono::Utc::now().timestamp() - 3600;
        assert!(validate_admin_token(&token("secret", expired), "secret").is_err());
    }
}
