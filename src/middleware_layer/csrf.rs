use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use http_body_util::LengthLimitError;
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    services::csrf::{self, CSRF_FORM_FIELD, CSRF_HEADER},
    services::session::SessionRegistry,
    state::AppState,
};

/// Largest form body buffered while looking for the token field.
const MAX_FORM_BYTES: usize = 64 * 1024;

/// The session's CSRF token, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct RequestCsrfToken(pub String);

fn is_form(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

/// Pulls the presented token from the header, falling back to the form body.
///
/// The body is restored so the handler can still read the form.
async fn presented_token(req: Request<Body>) -> Result<(Option<String>, Request<Body>), AppError> {
    if let Some(value) = req.headers().get(CSRF_HEADER) {
        let token = value.to_str().ok().map(str::to_string);
        if token.is_none() {
            tracing::warn!("❌ CSRF: header has an invalid format");
        }
        return Ok((token, req));
    }

    if csrf::is_safe_method(req.method()) || !is_form(&req) {
        return Ok((None, req));
    }

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_FORM_BYTES).await.map_err(|e| {
        let e = e.into_inner();
        if e.is::<LengthLimitError>() {
            AppError::PayloadTooLarge(MAX_FORM_BYTES)
        } else {
            AppError::Internal(format!("Unable to read form body: {}", e))
        }
    })?;

    let token = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == CSRF_FORM_FIELD)
        .map(|(_, value)| value.into_owned());

    Ok((token, Request::from_parts(parts, Body::from(bytes))))
}

/// A middleware that verifies the CSRF token.
///
/// Safe requests pass and get a token generated (and saved) if the session
/// has none. Unsafe requests must present the session's token in the
/// `X-CSRF-Token` header or the `csrf_token` form field.
pub async fn verify_csrf(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(registry): Extension<SessionRegistry>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let session = state
        .sessions
        .get(&registry, &cookies, state.cookie_name())
        .await;

    let method = req.method().clone();
    let (presented, mut req) = match presented_token(req).await {
        Ok(found) => found,
        Err(e) => return e.into_response(),
    };

    let checked = match csrf::validate(&session, presented.as_deref(), &method).await {
        Ok(checked) => checked,
        Err(e) => {
            tracing::warn!(method = %method, reason = %e, "❌ CSRF: request rejected");
            return AppError::Csrf(e).into_response();
        }
    };

    if checked.fresh {
        if let Err(e) = state.sessions.save(&cookies, &session).await {
            return e.into_response();
        }
        tracing::debug!("✅ CSRF token generated for session");
    }

    req.extensions_mut().insert(RequestCsrfToken(checked.token.clone()));
    let mut response = next.run(req).await;

    if csrf::is_safe_method(&method) {
        if let Ok(value) = HeaderValue::from_str(&checked.token) {
            response.headers_mut().insert(CSRF_HEADER, value);
        }
    }

    response
}
