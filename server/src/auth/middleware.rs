//! Authentication middleware.
//!
//! Bearer token extraction. When `AUTH_SECRET` is configured the token must
//! match it; otherwise requests are accepted anonymously.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// Presented the configured shared secret
    Token,
    /// No secret configured (development mode)
    Anonymous,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(auth_header, state.config.auth_secret.as_deref())
    }
}

fn authorize(header: Option<&str>, secret: Option<&str>) -> Result<AuthUser, AppError> {
    let Some(secret) = secret else {
        return Ok(AuthUser::Anonymous);
    };

    let header = header.ok_or(AppError::Unauthorized("Missing authorization header"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized("Invalid authorization header format"))?;

    if token.is_empty() {
        return Err(AppError::Unauthorized("Empty bearer token"));
    }
    if !tokens_match(token, secret) {
        return Err(AppError::Unauthorized("Invalid bearer token"));
    }
    Ok(AuthUser::Token)
}

/// Compares every byte regardless of where the first mismatch is. Only the
/// length leaks.
fn tokens_match(presented: &str, secret: &str) -> bool {
    if presented.len() != secret.len() {
        return false;
    }
    presented
        .bytes()
        .zip(secret.bytes())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_without_secret() {
        assert_eq!(authorize(None, None).unwrap(), AuthUser::Anonymous);
        assert_eq!(
            authorize(Some("Bearer whatever"), None).unwrap(),
            AuthUser::Anonymous
        );
    }

    #[test]
    fn secret_must_match() {
        assert_eq!(
            authorize(Some("Bearer s3cret"), Some("s3cret")).unwrap(),
            AuthUser::Token
        );
        assert!(authorize(Some("Bearer wrong"), Some("s3cret")).is_err());
        assert!(authorize(Some("Bearer "), Some("s3cret")).is_err());
        assert!(authorize(Some("Basic s3cret"), Some("s3cret")).is_err());
        assert!(authorize(None, Some("s3cret")).is_err());
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3creT", "s3cret"));
        assert!(!tokens_match("s3cre", "s3cret"));
        assert!(!tokens_match("s3crets", "s3cret"));
        assert!(!tokens_match("", "s3cret"));
    }

    #[test]
    fn prefix_of_secret_is_rejected() {
        let err = authorize(Some("Bearer s3c"), Some("s3cret")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized("Invalid bearer token")));
    }
}
