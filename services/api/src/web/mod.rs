pub mod auth;
pub mod messages;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod rooms;
pub mod rpc;
pub mod social;
pub mod state;
pub mod ws_handler;

// Re-export the pieces the binaries wire together.
pub use rest::{router, ApiDoc};
pub use state::AppState;
pub use ws_handler::ws_handler;
