//! Shared fixtures for unit tests.

use crate::auth::{Claims, TokenVerifier, VerifierConfig};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use relay_protocol::OutboundMessage;
use relay_transport::{ConnectionId, PushChannel, PushError};
use std::sync::Mutex;

pub const TEST_ISSUER: &str = "https://identity.example.test";
pub const SIGNING_KEY: &str = include_str!("../testdata/signing_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../testdata/signing_key.pub.pem");
pub const OTHER_PUBLIC_KEY: &str = include_str!("../testdata/other_key.pub.pem");

pub fn verifier() -> TokenVerifier {
    TokenVerifier::new(&VerifierConfig {
        algorithm: Algorithm::RS256,
        public_key_pem: Some(PUBLIC_KEY.to_string()),
        issuer: Some(TEST_ISSUER.to_string()),
    })
    .expect("test verifier")
}

pub fn claims_for(principal_id: &str, exp: i64) -> Claims {
    Claims {
        principal_id: principal_id.to_string(),
        auth_hash: format!("hash-{principal_id}"),
        origin_host: "app.example.test".to_string(),
        device_fingerprint: "device-1".to_string(),
        issuer: TEST_ISSUER.to_string(),
        exp,
    }
}

pub fn sign(claims: &Claims) -> String {
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).expect("test signing key");
    encode(&Header::new(Algorithm::RS256), claims, &key).expect("token should encode")
}

/// A token for `principal_id` valid for the next hour.
pub fn token_for(principal_id: &str) -> String {
    sign(&claims_for(
        principal_id,
        crate::auth::current_unix_timestamp() + 3600,
    ))
}

/// Push channel that records every push and reports configured ids as gone
/// or failing.
#[derive(Default)]
pub struct RecordingChannel {
    pushed: Mutex<Vec<(ConnectionId, Bytes)>>,
    gone: DashSet<ConnectionId>,
    failing: DashSet<ConnectionId>,
    pub attempts: DashMap<ConnectionId, usize>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_gone(&self, id: &str) {
        self.gone.insert(ConnectionId::new(id));
    }

    pub fn mark_failing(&self, id: &str) {
        self.failing.insert(ConnectionId::new(id));
    }

    /// Messages received by `id`, decoded, in push order.
    pub fn received(&self, id: &str) -> Vec<OutboundMessage> {
        self.pushed
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to.as_str() == id)
            .map(|(_, data)| serde_json::from_slice(data).expect("pushed valid json"))
            .collect()
    }

    pub fn total_pushed(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    async fn push(&self, connection_id: &ConnectionId, data: Bytes) -> Result<(), PushError> {
        *self.attempts.entry(connection_id.clone()).or_insert(0) += 1;
        if self.gone.contains(connection_id) {
            return Err(PushError::Gone);
        }
        if self.failing.contains(connection_id) {
            return Err(PushError::Transient("simulated failure".to_string()));
        }
        self.pushed
            .lock()
            .unwrap()
            .push((connection_id.clone(), data));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
