//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every handler and socket.

use crate::config::Config;
use chat_core::ChatBroker;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<ChatBroker>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(broker: Arc<ChatBroker>, config: Arc<Config>) -> Self {
        Self { broker, config }
    }
}
