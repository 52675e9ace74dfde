use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    Extension, Form,
};
use serde::Serialize;
use tower_cookies::Cookies;

use crate::{
    error::{AppError, Result},
    handlers::response::json,
    middleware_layer::auth::{CurrentUser, USER_ID_KEY},
    middleware_layer::csrf::RequestCsrfToken,
    models::session::Values,
    repositories::session::SessionRepository,
    services::csrf::CSRF_TOKEN_KEY,
    services::session::SessionRegistry,
    state::AppState,
    validation::auth::{LoginForm, validate_login_form},
};

/// The response payload for authentication-related requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

/// The current session as seen by the client.
#[derive(Serialize)]
pub struct SessionResponse {
    pub is_new: bool,
    pub csrf_token: String,
    pub values: Values,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user_id: String,
}

/// Shows the current session and its CSRF token.
#[axum::debug_handler]
pub async fn show_session(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(registry): Extension<SessionRegistry>,
    Extension(RequestCsrfToken(csrf_token)): Extension<RequestCsrfToken>,
) -> Result<Response> {
    let session = state
        .sessions
        .get(&registry, &cookies, state.cookie_name())
        .await;
    let snapshot = session.snapshot().await;

    json(
        StatusCode::OK,
        &SessionResponse {
            is_new: snapshot.is_new,
            csrf_token,
            values: snapshot.values,
        },
    )
}

/// Handles user login.
///
/// The authenticated identity always gets a new session id.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(registry): Extension<SessionRegistry>,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    tracing::info!("🔐 Login attempt: {}", form.username);
    validate_login_form(&form)?;
    state.authenticate(&form.username, &form.password)?;

    let previous = state
        .sessions
        .get(&registry, &cookies, state.cookie_name())
        .await;
    if !previous.is_new().await {
        state.sessions.store().delete(&previous.id().await).await?;
    }
    let csrf_token = previous.get_value(CSRF_TOKEN_KEY).await;

    let session = state
        .sessions
        .new_session(&registry, state.cookie_name())
        .await;
    if let Some(token) = csrf_token {
        session
            .with_state(|s| {
                s.values.insert(CSRF_TOKEN_KEY.to_string(), token);
            })
            .await;
    }
    session
        .insert(USER_ID_KEY, &form.username)
        .await
        .map_err(|e| AppError::Internal(format!("Session value serialization failed: {}", e)))?;
    state.sessions.save(&cookies, &session).await?;

    tracing::info!("✅ User logged in: {}", form.username);

    json(
        StatusCode::OK,
        &AuthResponse {
            success: true,
            message: "Login successful".to_string(),
        },
    )
}

/// Handles user logout by destroying the session.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(registry): Extension<SessionRegistry>,
) -> Result<Response> {
    let session = state
        .sessions
        .get(&registry, &cookies, state.cookie_name())
        .await;
    session.set_max_age(-1).await;
    state.sessions.save(&cookies, &session).await?;

    tracing::info!("✅ Session destroyed on logout");

    json(
        StatusCode::OK,
        &AuthResponse {
            success: true,
            message: "Logout successful".to_string(),
        },
    )
}

/// Returns the authenticated user.
#[axum::debug_handler]
pub async fn profile(Extension(CurrentUser(user_id)): Extension<CurrentUser>) -> Result<Response> {
    json(StatusCode::OK, &ProfileResponse { user_id })
}
