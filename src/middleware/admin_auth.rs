//! Admin token check
//!
//! Every `/admin` request must carry the configured token in `X-Admin-Token`.
//! Without a configured token the admin surface stays closed.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::AppError;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Expected admin token, `None` when the operator did not configure one.
pub type AdminToken = Option<Arc<str>>;

/// Rejects requests whose `X-Admin-Token` is missing or does not match.
pub async fn require_admin_token(
    State(expected): State<AdminToken>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        warn!(path = %request.uri().path(), "Admin request rejected, no admin token configured");
        return AppError::Unauthorized("admin access is not configured".to_string())
            .into_response();
    };

    let matches = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));

    match matches {
        Some(true) => next.run(request).await,
        Some(false) => {
            warn!(path = %request.uri().path(), "Admin request rejected, wrong token");
            AppError::Unauthorized("invalid admin token".to_string()).into_response()
        }
        None => AppError::Unauthorized("missing admin token".to_string()).into_response(),
    }
}
