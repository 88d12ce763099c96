//! services/api/src/sweeper.rs
//!
//! Background removal of expired sessions. Every swept session is pushed a
//! `SessionRevoked` event so sockets still attached to it close.

use chat_core::ChatBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct SessionSweeper {
    broker: Arc<ChatBroker>,
    every: Duration,
}

impl SessionSweeper {
    pub fn new(broker: Arc<ChatBroker>, every: Duration) -> Self {
        Self { broker, every }
    }

    /// Runs one pass. Returns how many sessions were removed.
    pub async fn sweep_once(&self) -> usize {
        match self.broker.sweep_expired_sessions().await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleaned up {} expired sessions", count);
                }
                count
            }
            Err(e) => {
                error!("Failed to cleanup expired sessions: {}", e);
                0
            }
        }
    }

    /// Spawns the sweep loop. It exits when `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Session sweeper started (every {:?})", self.every);
            let mut ticker = interval(self.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
            info!("Session sweeper stopped");
        })
    }
}
