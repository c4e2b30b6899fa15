/// Authentication extractors and utilities
use crate::{api::middleware::extract_bearer_token, context::AppContext, error::CmsError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated caller, taken from the `sub` claim of a bearer JWT
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = CmsError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| CmsError::Authentication("Missing authorization header".to_string()))?;

        let token_data = verify_jwt_token(&token, &state.config.authentication.jwt_secret)?;

        let user_id = token_data
            .claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| CmsError::Authentication("Invalid JWT: missing 'sub' claim".to_string()))?
            .to_string();

        Ok(AuthContext { user_id })
    }
}

/// Verify a JWT token with full validation
///
/// This performs:
/// 1. JWT signature verification
/// 2. Expiration checking
/// 3. Claims validation
pub fn verify_jwt_token(
    token: &str,
    jwt_secret: &str,
) -> Result<jsonwebtoken::TokenData<serde_json::Value>, CmsError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    decode::<serde_json::Value>(token, &decoding_key, &validation).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                CmsError::Authentication("Token has expired".to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                CmsError::Authentication("Invalid token signature".to_string())
            }
            _ => CmsError::Authentication(format!("Invalid token: {}", e)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "an-hs256-secret-of-at-least-32-characters";

    fn token(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let exp = chrono::Utc::now().timestamp() + 3600;
        let jwt = token(serde_json::json!({ "sub": "alice", "exp": exp }), SECRET);

        let data = verify_jwt_token(&jwt, SECRET).unwrap();
        assert_eq!(data.claims["sub"], "alice");
    }

    #[test]
    fn test_wrong_secret() {
        let exp = chrono::Utc::now().timestamp() + 3600;
        let jwt = token(serde_json::json!({ "sub": "alice", "exp": exp }), SECRET);

        let err = verify_jwt_token(&jwt, "another-secret-that-is-long-enough-too").unwrap_err();
        assert!(matches!(err, CmsError::Authentication(msg) if msg == "Invalid token signature"));
    }

    #[test]
    fn test_expired_token() {
        // Past the five minute leeway
        let exp = chrono::Utc::now().timestamp() - 600;
        let jwt = token(serde_json::json!({ "sub": "alice", "exp": exp }), SECRET);

        let err = verify_jwt_token(&jwt, SECRET).unwrap_err();
        assert!(matches!(err, CmsError::Authentication(msg) if msg == "Token has expired"));
    }

    #[test]
    fn test_garbage_token() {
        assert!(verify_jwt_token("not-a-jwt", SECRET).is_err());
    }
}
