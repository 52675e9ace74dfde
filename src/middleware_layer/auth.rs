use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    services::session::SessionRegistry,
    state::AppState,
};

/// Session value key holding the authenticated user's id.
pub const USER_ID_KEY: &str = "userID";

/// The authenticated user, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

/// A middleware that requires a session carrying a user id.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(registry): Extension<SessionRegistry>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    tracing::debug!("🔐 Checking authentication...");

    let session = state
        .sessions
        .get(&registry, &cookies, state.cookie_name())
        .await;

    if session.is_new().await {
        tracing::warn!("❌ No stored session for request");
        return AppError::Unauthorized.into_response();
    }

    let Some(user_id) = session.get::<String>(USER_ID_KEY).await else {
        tracing::warn!("❌ {} not in session values", USER_ID_KEY);
        return AppError::Unauthorized.into_response();
    };

    tracing::debug!("✅ User authenticated: {}", user_id);
    request.extensions_mut().insert(CurrentUser(user_id));

    next.run(request).await
}
