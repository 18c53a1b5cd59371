use axum::{Extension, Json, extract::State, response::IntoResponse};

use parley_types::api::Claims;

use crate::error::ChatError;
use crate::state::AppState;
use crate::with_store;

/// GET /api/messages/users -- everyone the caller can start a chat with.
pub async fn get_users_for_sidebar(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let me = claims.sub;
    let users = with_store(&state.store, move |store| store.list_users_except(me)).await?;
    Ok(Json(users))
}
