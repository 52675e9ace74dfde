use axum::{
    body::Body,
    extract::Request,
    middleware::Next,
    response::Response,
};

use crate::services::session::SessionRegistry;

/// Gives every request its own [`SessionRegistry`].
///
/// Must run outside any middleware or handler that looks sessions up.
pub async fn session_registry(mut req: Request<Body>, next: Next) -> Response {
    req.extensions_mut().insert(SessionRegistry::new());
    next.run(req).await
}
