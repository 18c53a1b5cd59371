use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, MarkReadResponse, SendMessageRequest};

use crate::blob::is_hosted;
use crate::dispatch::{MessageDraft, validate_draft};
use crate::error::ChatError;
use crate::state::AppState;

/// POST /api/messages/send/{id}
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let sender_id = claims.sub;

    // Validate before paying for an upload
    let draft = validate_draft(
        sender_id,
        receiver_id,
        MessageDraft {
            text: req.text,
            image_url: req.image,
        },
    )?;

    // Unknown users would leave an orphaned upload behind
    state.dispatcher.check_participants(sender_id, receiver_id).await?;

    let (image_url, uploaded) = match draft.image_url {
        Some(image) if is_hosted(&image) => (Some(image.trim().to_string()), false),
        Some(image) => (Some(state.blobs.store_image(&image).await?), true),
        None => (None, false),
    };

    let sent = state
        .dispatcher
        .send(
            sender_id,
            receiver_id,
            MessageDraft {
                text: draft.text,
                image_url: image_url.clone(),
            },
        )
        .await;

    let message = match sent {
        Ok(message) => message,
        Err(e) => {
            if let (true, Some(url)) = (uploaded, image_url) {
                state.blobs.discard(&url).await;
            }
            return Err(e);
        }
    };

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/{id} -- the conversation between the caller and `id`.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let messages = state.dispatcher.list_messages(claims.sub, peer_id).await?;
    Ok(Json(messages))
}

/// GET /api/messages/unreadCounts -- `{senderId: count}` for the caller.
pub async fn get_unread_counts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    let counts = state.unread.count_unread(claims.sub).await?;
    Ok(Json(counts))
}

/// POST /api/messages/markRead/{id} -- the caller has read everything `id` sent.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ChatError> {
    state.unread.mark_read(claims.sub, peer_id).await?;
    Ok(Json(MarkReadResponse { success: true }))
}
