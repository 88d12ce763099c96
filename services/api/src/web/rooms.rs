//! services/api/src/web/rooms.rs
//!
//! Room and membership RPCs.

use axum::{extract::State, Extension};
use chat_core::{ChatError, CreateRoomRequest, MemberRole, RoomPatch, RoomType, SessionContext};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::auth::CountData;
use crate::web::protocol::{MemberView, RoomView};
use crate::web::rpc::{reply, Envelope, RpcBody, RpcResult};
use crate::web::state::AppState;

//=========================================================================================
// Request Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomBody {
    /// `group` or `direct`.
    #[serde(rename = "type")]
    pub room_type: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// For `direct`, exactly one user id.
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoomBody {
    pub room_id: Uuid,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomIdBody {
    pub room_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembersBody {
    pub room_id: Uuid,
    pub user_ids: Vec<Uuid>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberRoleBody {
    pub room_id: Uuid,
    pub user_id: Uuid,
    /// `admin` or `member`.
    pub role: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransferOwnershipBody {
    pub room_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberMutedBody {
    pub room_id: Uuid,
    pub is_muted: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PinMessageBody {
    pub room_id: Uuid,
    /// `null` clears the pin.
    pub message_id: Option<i64>,
}

/// Parses a label case-insensitively into one of the domain enums.
fn parse_label<T: FromStr>(value: &str, field: &str) -> Result<T, ChatError> {
    value
        .trim()
        .to_ascii_lowercase()
        .parse()
        .map_err(|_| ChatError::validation(format!("Invalid {}: {}", field, value)))
}

//=========================================================================================
// Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/rpc/GetAccessibleRooms",
    tag = "Rooms",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The global room plus every room the caller is an active member of", body = Envelope<Vec<RoomView>>)
    )
)]
pub async fn get_accessible_rooms(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> RpcResult<Vec<RoomView>> {
    let rooms = state.broker.accessible_rooms(&ctx).await?;
    reply("Rooms retrieved", rooms.into_iter().map(RoomView::from).collect())
}

/// Creates a group room, or opens (or reuses) a direct conversation.
#[utoipa::path(
    post,
    path = "/rpc/CreateRoom",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = CreateRoomBody,
    responses(
        (status = 200, description = "Room created", body = Envelope<RoomView>),
        (status = 400, description = "Invalid room type, name or member list"),
        (status = 403, description = "Blocked")
    )
)]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<CreateRoomBody>,
) -> RpcResult<RoomView> {
    let room_type: RoomType = parse_label(&req.room_type, "room type")?;
    let request = CreateRoomRequest {
        room_type,
        name: req.name,
        description: req.description,
        member_ids: req.member_ids,
    };
    let room = state.broker.create_room(&ctx, request).await?;
    reply("Room created", room.into())
}

#[utoipa::path(
    post,
    path = "/rpc/UpdateRoom",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = UpdateRoomBody,
    responses(
        (status = 200, description = "Room updated", body = Envelope<RoomView>),
        (status = 403, description = "Not an owner or admin, or the room is not a group")
    )
)]
pub async fn update_room(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<UpdateRoomBody>,
) -> RpcResult<RoomView> {
    let patch = RoomPatch {
        name: req.name,
        description: req.description,
        avatar_url: req.avatar_url,
    };
    let room = state.broker.update_room(&ctx, req.room_id, patch).await?;
    reply("Room updated", room.into())
}

#[utoipa::path(
    post,
    path = "/rpc/DeleteRoom",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = RoomIdBody,
    responses(
        (status = 200, description = "Room deleted", body = Envelope<bool>),
        (status = 403, description = "Not an owner or admin, or the room is not a group")
    )
)]
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RoomIdBody>,
) -> RpcResult<bool> {
    state.broker.delete_room(&ctx, req.room_id).await?;
    reply("Room deleted", true)
}

#[utoipa::path(
    post,
    path = "/rpc/JoinRoom",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = RoomIdBody,
    responses(
        (status = 200, description = "Joined or rejoined", body = Envelope<bool>),
        (status = 400, description = "Already a member"),
        (status = 404, description = "No such room")
    )
)]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RoomIdBody>,
) -> RpcResult<bool> {
    state.broker.join_room(&ctx, req.room_id).await?;
    reply("Joined room", true)
}

#[utoipa::path(
    post,
    path = "/rpc/LeaveRoom",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = RoomIdBody,
    responses(
        (status = 200, description = "Left the room", body = Envelope<bool>),
        (status = 400, description = "Global or direct room, or the caller is the owner")
    )
)]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RoomIdBody>,
) -> RpcResult<bool> {
    state.broker.leave_room(&ctx, req.room_id).await?;
    reply("Left room", true)
}

#[utoipa::path(
    post,
    path = "/rpc/AddRoomMembers",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = RoomMembersBody,
    responses(
        (status = 200, description = "Number of users added", body = Envelope<CountData>),
        (status = 403, description = "Not an owner or admin")
    )
)]
pub async fn add_room_members(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RoomMembersBody>,
) -> RpcResult<CountData> {
    let count = state
        .broker
        .add_room_members(&ctx, req.room_id, &req.user_ids)
        .await?;
    reply("Members added", CountData { count })
}

#[utoipa::path(
    post,
    path = "/rpc/RemoveRoomMembers",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = RoomMembersBody,
    responses(
        (status = 200, description = "Number of users removed", body = Envelope<CountData>),
        (status = 403, description = "Insufficient role for one of the targets")
    )
)]
pub async fn remove_room_members(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RoomMembersBody>,
) -> RpcResult<CountData> {
    let count = state
        .broker
        .remove_room_members(&ctx, req.room_id, &req.user_ids)
        .await?;
    reply("Members removed", CountData { count })
}

#[utoipa::path(
    post,
    path = "/rpc/GetRoomMembers",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = RoomIdBody,
    responses(
        (status = 200, description = "Active members with their roles", body = Envelope<Vec<MemberView>>),
        (status = 403, description = "Not a member")
    )
)]
pub async fn get_room_members(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RoomIdBody>,
) -> RpcResult<Vec<MemberView>> {
    let members = state.broker.room_members(&ctx, req.room_id).await?;
    reply("Members retrieved", members.into_iter().map(MemberView::from).collect())
}

#[utoipa::path(
    post,
    path = "/rpc/UpdateMemberRole",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = MemberRoleBody,
    responses(
        (status = 200, description = "Role changed", body = Envelope<MemberView>),
        (status = 403, description = "Only the owner may change roles")
    )
)]
pub async fn update_member_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<MemberRoleBody>,
) -> RpcResult<MemberView> {
    let role: MemberRole = parse_label(&req.role, "role")?;
    let member = state
        .broker
        .update_member_role(&ctx, req.room_id, req.user_id, role)
        .await?;
    let user = state.broker.get_user(&ctx, member.user_id).await?;
    reply("Role updated", (member, user).into())
}

#[utoipa::path(
    post,
    path = "/rpc/TransferOwnership",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = TransferOwnershipBody,
    responses(
        (status = 200, description = "Ownership transferred", body = Envelope<bool>),
        (status = 403, description = "Only the owner may transfer ownership")
    )
)]
pub async fn transfer_ownership(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<TransferOwnershipBody>,
) -> RpcResult<bool> {
    state
        .broker
        .transfer_ownership(&ctx, req.room_id, req.user_id)
        .await?;
    reply("Ownership transferred", true)
}

#[utoipa::path(
    post,
    path = "/rpc/UpdateMemberMuted",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = MemberMutedBody,
    responses(
        (status = 200, description = "Mute flag updated for the caller", body = Envelope<bool>)
    )
)]
pub async fn update_member_muted(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<MemberMutedBody>,
) -> RpcResult<bool> {
    let member = state
        .broker
        .update_member_muted(&ctx, req.room_id, req.is_muted)
        .await?;
    reply("Mute setting updated", member.is_muted)
}

#[utoipa::path(
    post,
    path = "/rpc/PinMessage",
    tag = "Rooms",
    security(("bearer" = [])),
    request_body = PinMessageBody,
    responses(
        (status = 200, description = "Pin set or cleared", body = Envelope<RoomView>),
        (status = 400, description = "The message is not a live message of this room")
    )
)]
pub async fn pin_message(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<PinMessageBody>,
) -> RpcResult<RoomView> {
    let room = state
        .broker
        .pin_message(&ctx, req.room_id, req.message_id)
        .await?;
    reply("Pinned message updated", room.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!(parse_label::<RoomType>("Group", "room type").unwrap(), RoomType::Group);
        assert_eq!(parse_label::<MemberRole>(" ADMIN ", "role").unwrap(), MemberRole::Admin);
        assert!(matches!(
            parse_label::<RoomType>("lobby", "room type"),
            Err(ChatError::Validation(_))
        ));
    }
}
