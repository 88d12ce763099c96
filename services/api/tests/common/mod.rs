//! Shared fixtures for the integration tests: a broker over the in-memory
//! store, plus helpers for registering users and draining socket channels.

#![allow(dead_code)]

use api_lib::adapters::InMemoryDb;
use chat_core::{
    AuthOutcome, BrokerConfig, BrokerEvent, ChatBroker, CredentialHasher, DeviceDetails,
    FanoutRouter, PortResult, SessionContext,
};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const PASSWORD: &str = "correct horse";

/// Skips the deliberate cost of Argon2 so scenario tests stay fast.
pub struct FastHasher;

impl CredentialHasher for FastHasher {
    fn hash_password(&self, password: &str) -> PortResult<String> {
        Ok(format!("plain${password}"))
    }

    fn verify_password(&self, password: &str, hashed: &str) -> PortResult<bool> {
        Ok(hashed.strip_prefix("plain$") == Some(password))
    }
}

pub fn broker() -> Arc<ChatBroker> {
    broker_with(BrokerConfig::default())
}

pub fn broker_with(config: BrokerConfig) -> Arc<ChatBroker> {
    Arc::new(ChatBroker::new(
        Arc::new(InMemoryDb::new()),
        Arc::new(FastHasher),
        Arc::new(FanoutRouter::new()),
        config,
    ))
}

/// A broker whose sessions are expired the moment they are issued.
pub fn expiring_broker() -> Arc<ChatBroker> {
    broker_with(BrokerConfig {
        session_lifetime: chrono::Duration::seconds(-1),
        ..BrokerConfig::default()
    })
}

pub struct TestUser {
    pub ctx: SessionContext,
    pub auth: AuthOutcome,
}

impl TestUser {
    pub fn id(&self) -> uuid::Uuid {
        self.auth.user.id
    }

    pub fn token(&self) -> &str {
        &self.auth.session.token
    }
}

pub async fn register(broker: &ChatBroker, username: &str) -> TestUser {
    let auth = broker
        .register(username, PASSWORD, DeviceDetails::default())
        .await
        .expect("register");
    let ctx = broker.authenticate(&auth.session.token).await.expect("authenticate");
    TestUser { ctx, auth }
}

/// Opens a second session for an existing user.
pub async fn login(broker: &ChatBroker, username: &str, device: &str) -> TestUser {
    let auth = broker
        .login(
            username,
            PASSWORD,
            DeviceDetails {
                device_info: Some(device.to_string()),
                ip_address: None,
            },
        )
        .await
        .expect("login");
    let ctx = broker.authenticate(&auth.session.token).await.expect("authenticate");
    TestUser { ctx, auth }
}

/// Everything delivered to a channel so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<BrokerEvent>) -> Vec<BrokerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
