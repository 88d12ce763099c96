//! services/api/src/web/messages.rs
//!
//! Message RPCs. Delivery to live sockets happens inside the broker; these
//! handlers only return the committed result to the caller.

use axum::{extract::State, Extension};
use chat_core::SessionContext;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::protocol::{MessageEditView, MessageView};
use crate::web::rpc::{reply, Envelope, RpcBody, RpcResult};
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub room_id: Uuid,
    pub content: String,
    pub reply_to_id: Option<i64>,
    /// Echoed back in the `message_ack` push so the client can reconcile.
    pub client_message_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesBody {
    pub room_id: Uuid,
    pub limit: Option<u32>,
    pub before_message_id: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageBody {
    pub message_id: i64,
    pub new_content: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageIdBody {
    pub message_id: i64,
}

#[utoipa::path(
    post,
    path = "/rpc/SendMessage",
    tag = "Messages",
    security(("bearer" = [])),
    request_body = SendMessageBody,
    responses(
        (status = 200, description = "Message stored and broadcast", body = Envelope<MessageView>),
        (status = 400, description = "Empty or oversized content, or a bad reply target"),
        (status = 403, description = "Not a member, or blocked in a direct room")
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<SendMessageBody>,
) -> RpcResult<MessageView> {
    let message = state
        .broker
        .send_message(
            &ctx,
            req.room_id,
            &req.content,
            req.reply_to_id,
            req.client_message_id,
        )
        .await?;
    reply("Message sent", message.into())
}

/// Returns up to `limit` of the newest messages older than `beforeMessageId`,
/// oldest first. Deleted messages are left out.
#[utoipa::path(
    post,
    path = "/rpc/GetMessages",
    tag = "Messages",
    security(("bearer" = [])),
    request_body = GetMessagesBody,
    responses(
        (status = 200, description = "A page of history", body = Envelope<Vec<MessageView>>),
        (status = 403, description = "Not a member")
    )
)]
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<GetMessagesBody>,
) -> RpcResult<Vec<MessageView>> {
    let limit = req.limit.unwrap_or(state.config.message_page_limit);
    let messages = state
        .broker
        .get_messages(&ctx, req.room_id, limit, req.before_message_id)
        .await?;
    reply(
        "Messages retrieved",
        messages.into_iter().map(MessageView::from).collect(),
    )
}

#[utoipa::path(
    post,
    path = "/rpc/EditMessage",
    tag = "Messages",
    security(("bearer" = [])),
    request_body = EditMessageBody,
    responses(
        (status = 200, description = "Message edited", body = Envelope<MessageView>),
        (status = 400, description = "Message already deleted"),
        (status = 403, description = "Not the sender")
    )
)]
pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<EditMessageBody>,
) -> RpcResult<MessageView> {
    let message = state
        .broker
        .edit_message(&ctx, req.message_id, &req.new_content)
        .await?;
    reply("Message edited", message.into())
}

#[utoipa::path(
    post,
    path = "/rpc/DeleteMessage",
    tag = "Messages",
    security(("bearer" = [])),
    request_body = MessageIdBody,
    responses(
        (status = 200, description = "Message deleted", body = Envelope<bool>),
        (status = 400, description = "Message already deleted"),
        (status = 403, description = "Not the sender")
    )
)]
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<MessageIdBody>,
) -> RpcResult<bool> {
    state.broker.delete_message(&ctx, req.message_id).await?;
    reply("Message deleted", true)
}

#[utoipa::path(
    post,
    path = "/rpc/GetMessageEditHistory",
    tag = "Messages",
    security(("bearer" = [])),
    request_body = MessageIdBody,
    responses(
        (status = 200, description = "Every edit, oldest first", body = Envelope<Vec<MessageEditView>>)
    )
)]
pub async fn get_message_edit_history(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<MessageIdBody>,
) -> RpcResult<Vec<MessageEditView>> {
    let edits = state.broker.message_edit_history(&ctx, req.message_id).await?;
    reply(
        "Edit history retrieved",
        edits.into_iter().map(MessageEditView::from).collect(),
    )
}
