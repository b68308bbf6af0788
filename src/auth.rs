use crate::{config::Config, error::AppError};
use arc_swap::ArcSwap;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Authentication information attached to each authenticated request
#[derive(Debug, Clone)]
pub struct AuthInfo {
    /// Name of the admin token used for authentication
    pub token_name: String,
}

/// Authenticated principal, readable by the capture layer for attribution.
///
/// An upstream auth layer inserts this; the admin middleware below inserts
/// one carrying the token name so admin mutations are attributed too.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
}

/// Admin authentication middleware
///
/// Extracts and validates the Bearer token from the Authorization header
/// against the configured admin tokens, comparing in constant time.
pub async fn auth_middleware(
    State(config): State<Arc<ArcSwap<Config>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = extract_bearer_token(auth_header)?;

    let config = config.load();
    let matched = config
        .admin
        .tokens
        .iter()
        .find(|t| t.enabled && token_matches(&t.token, token))
        .ok_or_else(|| AppError::Unauthorized("Invalid or disabled admin token".to_string()))?;

    let name = matched.name.clone();
    req.extensions_mut().insert(AuthInfo {
        token_name: name.clone(),
    });
    req.extensions_mut().insert(Principal {
        user_id: name.clone(),
    });

    let mut response = next.run(req).await;
    // Mirror the principal onto the response so layers outside this one
    // (the capture middleware) can attribute the request.
    response.extensions_mut().insert(Principal { user_id: name });
    Ok(response)
}

/// Constant-time token comparison
fn token_matches(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Extract Bearer token from Authorization header
fn extract_bearer_token(auth_header: &str) -> Result<&str, AppError> {
    const BEARER_PREFIX: &str = "Bearer ";

    if !auth_header.starts_with(BEARER_PREFIX) {
        return Err(AppError::Unauthorized(
            "Authorization header must use Bearer scheme".to_string(),
        ));
    }

    let token = &auth_header[BEARER_PREFIX.len()..];

    if token.is_empty() {
        return Err(AppError::Unauthorized("Bearer token is empty".to_string()));
    }

    Ok(token)
}
