//! services/api/src/web/social.rs
//!
//! User lookup, friendship and block-list RPCs.

use axum::{extract::State, Extension};
use chat_core::SessionContext;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::protocol::{BlockedUserView, UserView};
use crate::web::rpc::{reply, Envelope, RpcBody, RpcResult};
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserIdBody {
    pub user_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchUsersBody {
    pub query: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RespondFriendRequestBody {
    pub user_id: Uuid,
    pub accept: bool,
}

//=========================================================================================
// Users
//=========================================================================================

#[utoipa::path(
    post,
    path = "/rpc/GetUser",
    tag = "Users",
    security(("bearer" = [])),
    request_body = UserIdBody,
    responses(
        (status = 200, description = "Public profile", body = Envelope<UserView>),
        (status = 404, description = "No such user")
    )
)]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<UserIdBody>,
) -> RpcResult<UserView> {
    let user = state.broker.get_user(&ctx, req.user_id).await?;
    reply("User retrieved", user.into())
}

/// Case-insensitive substring match on usernames, excluding the caller.
#[utoipa::path(
    post,
    path = "/rpc/SearchUsers",
    tag = "Users",
    security(("bearer" = [])),
    request_body = SearchUsersBody,
    responses(
        (status = 200, description = "Matching users", body = Envelope<Vec<UserView>>),
        (status = 400, description = "Empty query")
    )
)]
pub async fn search_users(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<SearchUsersBody>,
) -> RpcResult<Vec<UserView>> {
    let users = state.broker.search_users(&ctx, &req.query).await?;
    reply("Users retrieved", users.into_iter().map(UserView::from).collect())
}

//=========================================================================================
// Friends
//=========================================================================================

#[utoipa::path(
    post,
    path = "/rpc/SendFriendRequest",
    tag = "Relationships",
    security(("bearer" = [])),
    request_body = UserIdBody,
    responses(
        (status = 200, description = "Request sent, or accepted if the other user had already asked", body = Envelope<bool>),
        (status = 403, description = "Blocked"),
        (status = 400, description = "Already friends or already pending")
    )
)]
pub async fn send_friend_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<UserIdBody>,
) -> RpcResult<bool> {
    state.broker.send_friend_request(&ctx, req.user_id).await?;
    reply("Friend request sent", true)
}

#[utoipa::path(
    post,
    path = "/rpc/RespondFriendRequest",
    tag = "Relationships",
    security(("bearer" = [])),
    request_body = RespondFriendRequestBody,
    responses(
        (status = 200, description = "Request accepted or rejected", body = Envelope<bool>),
        (status = 404, description = "No pending request from this user")
    )
)]
pub async fn respond_friend_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RespondFriendRequestBody>,
) -> RpcResult<bool> {
    state
        .broker
        .respond_friend_request(&ctx, req.user_id, req.accept)
        .await?;
    let message = if req.accept {
        "Friend request accepted"
    } else {
        "Friend request rejected"
    };
    reply(message, req.accept)
}

#[utoipa::path(
    post,
    path = "/rpc/RemoveFriend",
    tag = "Relationships",
    security(("bearer" = [])),
    request_body = UserIdBody,
    responses(
        (status = 200, description = "Friendship removed", body = Envelope<bool>),
        (status = 404, description = "Not friends")
    )
)]
pub async fn remove_friend(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<UserIdBody>,
) -> RpcResult<bool> {
    state.broker.remove_friend(&ctx, req.user_id).await?;
    reply("Friend removed", true)
}

#[utoipa::path(
    post,
    path = "/rpc/GetFriends",
    tag = "Relationships",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Accepted friends", body = Envelope<Vec<UserView>>)
    )
)]
pub async fn get_friends(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> RpcResult<Vec<UserView>> {
    let friends = state.broker.friends(&ctx).await?;
    reply("Friends retrieved", friends.into_iter().map(UserView::from).collect())
}

#[utoipa::path(
    post,
    path = "/rpc/GetPendingFriendRequests",
    tag = "Relationships",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Users waiting for the caller's answer", body = Envelope<Vec<UserView>>)
    )
)]
pub async fn get_pending_friend_requests(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> RpcResult<Vec<UserView>> {
    let pending = state.broker.pending_friend_requests(&ctx).await?;
    reply(
        "Pending requests retrieved",
        pending.into_iter().map(UserView::from).collect(),
    )
}

//=========================================================================================
// Blocks
//=========================================================================================

#[utoipa::path(
    post,
    path = "/rpc/BlockUser",
    tag = "Relationships",
    security(("bearer" = [])),
    request_body = UserIdBody,
    responses(
        (status = 200, description = "User blocked", body = Envelope<bool>)
    )
)]
pub async fn block_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<UserIdBody>,
) -> RpcResult<bool> {
    state.broker.block_user(&ctx, req.user_id).await?;
    reply("User blocked", true)
}

#[utoipa::path(
    post,
    path = "/rpc/UnblockUser",
    tag = "Relationships",
    security(("bearer" = [])),
    request_body = UserIdBody,
    responses(
        (status = 200, description = "User unblocked", body = Envelope<bool>),
        (status = 404, description = "User is not blocked")
    )
)]
pub async fn unblock_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<UserIdBody>,
) -> RpcResult<bool> {
    state.broker.unblock_user(&ctx, req.user_id).await?;
    reply("User unblocked", true)
}

#[utoipa::path(
    post,
    path = "/rpc/GetBlockedUsers",
    tag = "Relationships",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Users the caller has blocked", body = Envelope<Vec<BlockedUserView>>)
    )
)]
pub async fn get_blocked_users(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> RpcResult<Vec<BlockedUserView>> {
    let blocked = state.broker.blocked_users(&ctx).await?;
    reply(
        "Blocked users retrieved",
        blocked.into_iter().map(BlockedUserView::from).collect(),
    )
}
