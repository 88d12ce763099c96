//! services/api/src/web/rpc.rs
//!
//! The envelope every RPC answers with, and the conversion of broker errors
//! into failed envelopes.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chat_core::ChatError;
use serde::{de::DeserializeOwned, Serialize};
use tracing::error;
use utoipa::ToSchema;

//=========================================================================================
// Envelope
//=========================================================================================

/// `{success, message, data?}`. `data` is omitted on failure.
#[derive(Serialize, Debug, ToSchema)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

pub type RpcResult<T> = Result<Json<Envelope<T>>, RpcError>;

/// Wraps `data` in a successful envelope.
pub fn reply<T>(message: &str, data: T) -> RpcResult<T> {
    Ok(Json(Envelope::ok(message, data)))
}

//=========================================================================================
// Errors
//=========================================================================================

/// A broker failure on its way out of an RPC.
#[derive(Debug)]
pub struct RpcError(pub ChatError);

impl From<ChatError> for RpcError {
    fn from(err: ChatError) -> Self {
        RpcError(err)
    }
}

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
        ChatError::Conflict(_) => StatusCode::CONFLICT,
        ChatError::InvalidCredentials | ChatError::InvalidToken | ChatError::Expired => {
            StatusCode::UNAUTHORIZED
        }
        ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The text a client is allowed to see. Store failures are logged and hidden.
pub fn public_message(err: &ChatError) -> String {
    match err {
        ChatError::Store(inner) => {
            error!("Store failure: {}", inner);
            "Internal server error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (status, Json(Envelope::failure(public_message(&self.0)))).into_response()
    }
}

//=========================================================================================
// Request Body
//=========================================================================================

/// `Json<T>` whose rejection is reported as a failed envelope.
pub struct RpcBody<T>(pub T);

impl<S, T> FromRequest<S> for RpcBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = RpcError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(RpcBody(value)),
            Err(rejection) => Err(RpcError(ChatError::validation(rejection_text(&rejection)))),
        }
    }
}

fn rejection_text(rejection: &JsonRejection) -> String {
    format!("Invalid request body: {}", rejection.body_text())
}

/// Takes the first hop of `X-Forwarded-For` when the client did not supply an address.
pub fn client_ip(explicit: Option<String>, headers: &HeaderMap) -> Option<String> {
    explicit.filter(|ip| !ip.trim().is_empty()).or_else(|| {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chat_core::PortError;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(status_for(&ChatError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&ChatError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ChatError::forbidden("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&ChatError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&ChatError::InvalidToken), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn store_errors_are_not_leaked() {
        let err = ChatError::Store(PortError::Unexpected("connection reset by peer".into()));
        assert_eq!(public_message(&err), "Internal server error");
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn failed_envelope_has_no_data() {
        let value = serde_json::to_value(Envelope::failure("nope")).unwrap();
        assert_eq!(value, serde_json::json!({ "success": false, "message": "nope" }));
    }

    #[test]
    fn forwarded_address_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.7, 172.16.0.1"));
        assert_eq!(client_ip(None, &headers).as_deref(), Some("10.0.0.7"));
        assert_eq!(
            client_ip(Some("192.168.1.2".into()), &headers).as_deref(),
            Some("192.168.1.2")
        );
        assert_eq!(client_ip(None, &HeaderMap::new()), None);
    }
}
