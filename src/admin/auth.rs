use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::admin::AdminState;

/// Require `Authorization: Bearer <api_key>` when a key is configured.
pub async fn admin_auth_middleware<V>(
    State(state): State<AdminState<V>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode>
where
    V: Send + Sync + 'static,
{
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    if presented == Some(expected) {
        return Ok(next.run(request).await);
    }

    tracing::debug!(uri = %request.uri(), "Rejected status API request without valid token");
    Err(StatusCode::UNAUTHORIZED)
}
