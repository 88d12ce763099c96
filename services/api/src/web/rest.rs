//! services/api/src/web/rest.rs
//!
//! Assembles the HTTP surface: the RPC routes, the socket endpoint, the
//! health probe, and the master definition for the OpenAPI specification.

use crate::web::{
    auth, messages, middleware::require_session, rooms, rpc::Envelope, social,
    state::AppState, ws_handler::ws_handler,
};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::register,
        auth::login,
        auth::login_with_refresh_token,
        auth::logout,
        auth::get_active_sessions,
        auth::revoke_session,
        auth::revoke_sessions,
        auth::revoke_all_sessions,
        social::get_user,
        social::search_users,
        rooms::get_accessible_rooms,
        rooms::create_room,
        rooms::update_room,
        rooms::delete_room,
        rooms::join_room,
        rooms::leave_room,
        rooms::add_room_members,
        rooms::remove_room_members,
        rooms::get_room_members,
        rooms::update_member_role,
        rooms::transfer_ownership,
        rooms::update_member_muted,
        rooms::pin_message,
        messages::send_message,
        messages::get_messages,
        messages::edit_message,
        messages::delete_message,
        messages::get_message_edit_history,
        social::send_friend_request,
        social::respond_friend_request,
        social::remove_friend,
        social::get_friends,
        social::get_pending_friend_requests,
        social::block_user,
        social::unblock_user,
        social::get_blocked_users,
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Accounts", description = "Registration, login and logout."),
        (name = "Sessions", description = "Listing and revoking the caller's sessions."),
        (name = "Users", description = "Public user profiles."),
        (name = "Rooms", description = "Rooms, membership and roles."),
        (name = "Messages", description = "Sending, editing, deleting and paging messages."),
        (name = "Relationships", description = "Friends and blocks."),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by the protected paths.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

//=========================================================================================
// Health
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthData {
    pub status: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "The server is up", body = Envelope<HealthData>)
    )
)]
pub async fn health_handler() -> Json<Envelope<HealthData>> {
    Json(Envelope::ok("OK", HealthData { status: "ok" }))
}

//=========================================================================================
// Router
//=========================================================================================

/// Builds the application router. CORS and the Swagger UI are layered on by
/// the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no token, or the token travels in the body/query)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/rpc/Register", post(auth::register))
        .route("/rpc/Login", post(auth::login))
        .route("/rpc/LoginWithRefreshToken", post(auth::login_with_refresh_token));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        .route("/rpc/Logout", post(auth::logout))
        .route("/rpc/GetActiveSessions", post(auth::get_active_sessions))
        .route("/rpc/RevokeSession", post(auth::revoke_session))
        .route("/rpc/RevokeSessions", post(auth::revoke_sessions))
        .route("/rpc/RevokeAllSessions", post(auth::revoke_all_sessions))
        .route("/rpc/GetUser", post(social::get_user))
        .route("/rpc/SearchUsers", post(social::search_users))
        .route("/rpc/GetAccessibleRooms", post(rooms::get_accessible_rooms))
        .route("/rpc/CreateRoom", post(rooms::create_room))
        .route("/rpc/UpdateRoom", post(rooms::update_room))
        .route("/rpc/DeleteRoom", post(rooms::delete_room))
        .route("/rpc/JoinRoom", post(rooms::join_room))
        .route("/rpc/LeaveRoom", post(rooms::leave_room))
        .route("/rpc/AddRoomMembers", post(rooms::add_room_members))
        .route("/rpc/RemoveRoomMembers", post(rooms::remove_room_members))
        .route("/rpc/GetRoomMembers", post(rooms::get_room_members))
        .route("/rpc/UpdateMemberRole", post(rooms::update_member_role))
        .route("/rpc/TransferOwnership", post(rooms::transfer_ownership))
        .route("/rpc/UpdateMemberMuted", post(rooms::update_member_muted))
        .route("/rpc/PinMessage", post(rooms::pin_message))
        .route("/rpc/SendMessage", post(messages::send_message))
        .route("/rpc/GetMessages", post(messages::get_messages))
        .route("/rpc/EditMessage", post(messages::edit_message))
        .route("/rpc/DeleteMessage", post(messages::delete_message))
        .route(
            "/rpc/GetMessageEditHistory",
            post(messages::get_message_edit_history),
        )
        .route("/rpc/SendFriendRequest", post(social::send_friend_request))
        .route("/rpc/RespondFriendRequest", post(social::respond_friend_request))
        .route("/rpc/RemoveFriend", post(social::remove_friend))
        .route("/rpc/GetFriends", post(social::get_friends))
        .route(
            "/rpc/GetPendingFriendRequests",
            post(social::get_pending_friend_requests),
        )
        .route("/rpc/BlockUser", post(social::block_user))
        .route("/rpc/UnblockUser", post(social::unblock_user))
        .route("/rpc/GetBlockedUsers", post(social::get_blocked_users))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_session,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
