//! services/api/src/web/auth.rs
//!
//! Account and session RPCs: register, login, token re-login, logout and
//! management of the caller's other sessions.

use axum::{extract::State, http::HeaderMap, Extension};
use chat_core::{AuthOutcome, DeviceDetails, SessionContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::protocol::SessionView;
use crate::web::rpc::{client_ip, reply, Envelope, RpcBody, RpcResult};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenLoginRequest {
    pub token: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionRequest {
    pub session_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionsRequest {
    pub session_ids: Vec<Uuid>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthData {
    pub session_token: String,
    pub user_id: Uuid,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

impl From<AuthOutcome> for AuthData {
    fn from(outcome: AuthOutcome) -> Self {
        Self {
            session_token: outcome.session.token,
            user_id: outcome.user.id,
            username: outcome.user.username,
            expires_at: outcome.session.expires_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CountData {
    pub count: usize,
}

//=========================================================================================
// Accounts
//=========================================================================================

/// Creates an account and its first session.
#[utoipa::path(
    post,
    path = "/rpc/Register",
    tag = "Accounts",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Account created", body = Envelope<AuthData>),
        (status = 400, description = "Invalid username or password"),
        (status = 409, description = "Username already taken")
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RpcBody(req): RpcBody<CredentialsRequest>,
) -> RpcResult<AuthData> {
    let device = DeviceDetails {
        device_info: req.device_info,
        ip_address: client_ip(req.ip_address, &headers),
    };
    let outcome = state.broker.register(&req.username, &req.password, device).await?;
    info!(user = %outcome.user.id, session = %outcome.session.id, "Registered new user");
    reply("Registration successful", outcome.into())
}

#[utoipa::path(
    post,
    path = "/rpc/Login",
    tag = "Accounts",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Logged in", body = Envelope<AuthData>),
        (status = 401, description = "Invalid username or password")
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RpcBody(req): RpcBody<CredentialsRequest>,
) -> RpcResult<AuthData> {
    let device = DeviceDetails {
        device_info: req.device_info,
        ip_address: client_ip(req.ip_address, &headers),
    };
    let outcome = state.broker.login(&req.username, &req.password, device).await?;
    info!(user = %outcome.user.id, session = %outcome.session.id, "User logged in");
    reply("Login successful", outcome.into())
}

/// Resumes an existing session. The token is returned unchanged with its
/// expiry pushed forward.
#[utoipa::path(
    post,
    path = "/rpc/LoginWithRefreshToken",
    tag = "Accounts",
    request_body = TokenLoginRequest,
    responses(
        (status = 200, description = "Session resumed", body = Envelope<AuthData>),
        (status = 401, description = "Unknown or expired token")
    )
)]
pub async fn login_with_refresh_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RpcBody(req): RpcBody<TokenLoginRequest>,
) -> RpcResult<AuthData> {
    let device = DeviceDetails {
        device_info: req.device_info,
        ip_address: client_ip(req.ip_address, &headers),
    };
    let outcome = state.broker.login_with_token(&req.token, device).await?;
    reply("Login successful", outcome.into())
}

#[utoipa::path(
    post,
    path = "/rpc/Logout",
    tag = "Accounts",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Session ended", body = Envelope<bool>),
        (status = 401, description = "Unknown or expired token")
    )
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> RpcResult<bool> {
    state.broker.logout(&ctx).await?;
    info!(user = %ctx.user_id, session = %ctx.session_id, "User logged out");
    reply("Logged out", true)
}

//=========================================================================================
// Sessions
//=========================================================================================

#[utoipa::path(
    post,
    path = "/rpc/GetActiveSessions",
    tag = "Sessions",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The caller's unexpired sessions", body = Envelope<Vec<SessionView>>)
    )
)]
pub async fn get_active_sessions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> RpcResult<Vec<SessionView>> {
    let sessions = state.broker.active_sessions(&ctx).await?;
    let views = sessions
        .into_iter()
        .map(|s| SessionView::new(s, ctx.session_id))
        .collect();
    reply("Sessions retrieved", views)
}

#[utoipa::path(
    post,
    path = "/rpc/RevokeSession",
    tag = "Sessions",
    security(("bearer" = [])),
    request_body = RevokeSessionRequest,
    responses(
        (status = 200, description = "Session revoked", body = Envelope<bool>),
        (status = 403, description = "Session belongs to another user"),
        (status = 404, description = "No such session")
    )
)]
pub async fn revoke_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RevokeSessionRequest>,
) -> RpcResult<bool> {
    state.broker.revoke_session(&ctx, req.session_id).await?;
    reply("Session revoked", true)
}

#[utoipa::path(
    post,
    path = "/rpc/RevokeSessions",
    tag = "Sessions",
    security(("bearer" = [])),
    request_body = RevokeSessionsRequest,
    responses(
        (status = 200, description = "Sessions revoked", body = Envelope<CountData>)
    )
)]
pub async fn revoke_sessions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
    RpcBody(req): RpcBody<RevokeSessionsRequest>,
) -> RpcResult<CountData> {
    let count = state.broker.revoke_sessions(&ctx, &req.session_ids).await?;
    reply("Sessions revoked", CountData { count })
}

/// Revokes every session of the caller except the one making the call.
#[utoipa::path(
    post,
    path = "/rpc/RevokeAllSessions",
    tag = "Sessions",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Other sessions revoked", body = Envelope<CountData>)
    )
)]
pub async fn revoke_all_sessions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<SessionContext>,
) -> RpcResult<CountData> {
    let count = state.broker.revoke_all_sessions(&ctx).await?;
    info!(user = %ctx.user_id, count, "Revoked other sessions");
    reply("Sessions revoked", CountData { count })
}
