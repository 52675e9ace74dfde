use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Extension,
};
use serde::Serialize;
use tower_cookies::Cookies;

use crate::{
    error::{AppError, Result},
    handlers::response::json,
    services::session::SessionRegistry,
    state::AppState,
};

/// Session value key holding the list of items added to the cart.
pub const SHOPPING_LIST_KEY: &str = "shoppingList";

#[derive(Serialize)]
pub struct CartResponse {
    pub shopping_list: Vec<String>,
}

/// Appends `item` to the session's shopping list.
#[axum::debug_handler]
pub async fn add_item(
    State(state): State<AppState>,
    cookies: Cookies,
    Extension(registry): Extension<SessionRegistry>,
    Path(item): Path<String>,
) -> Result<Response> {
    let session = state
        .sessions
        .get(&registry, &cookies, state.cookie_name())
        .await;

    let mut shopping_list: Vec<String> = session.get(SHOPPING_LIST_KEY).await.unwrap_or_default();
    shopping_list.push(item);

    session
        .insert(SHOPPING_LIST_KEY, &shopping_list)
        .await
        .map_err(|e| AppError::Internal(format!("Session value serialization failed: {}", e)))?;
    state.sessions.save(&cookies, &session).await?;

    tracing::debug!(items = shopping_list.len(), "🛒 Cart updated");

    json(StatusCode::OK, &CartResponse { shopping_list })
}
