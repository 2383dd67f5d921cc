//! The signed-message layer (§4.7) used by the Sync Engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use forge_crypto::{content_hash, verify, PeerSigningKey};
use forge_nonce::NonceStore;
use tracing::instrument;

use crate::error::ProtocolError;
use crate::wire::{Envelope, PeerHandshake, SyncPayload};

pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 120;

#[derive(Debug, Clone, Copy)]
pub struct FederationProtocolConfig {
    pub clock_skew_seconds: i64,
}

impl Default for FederationProtocolConfig {
    fn default() -> Self {
        Self { clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS }
    }
}

/// Builds and verifies signed handshakes and sync payloads. Holds the one
/// nonce store shared by both message kinds: a replay of a handshake nonce
/// and a replay of a sync-payload nonce are the same failure mode, so they
/// share one forward-only counter per sender key (the sender's public key).
pub struct FederationProtocol {
    nonce_store: Arc<NonceStore>,
    config: FederationProtocolConfig,
}

impl FederationProtocol {
    pub fn new(nonce_store: Arc<NonceStore>, config: FederationProtocolConfig) -> Self {
        Self { nonce_store, config }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_handshake(
        &self,
        signing_key: &PeerSigningKey,
        instance_id: impl Into<String>,
        display_name: impl Into<String>,
        api_version: impl Into<String>,
        supports_push: bool,
        supports_pull: bool,
        supports_streaming: bool,
        suggested_sync_interval_minutes: u32,
        max_entities_per_sync: u32,
        nonce: u64,
        now: DateTime<Utc>,
    ) -> PeerHandshake {
        let mut handshake = PeerHandshake {
            instance_id: instance_id.into(),
            display_name: display_name.into(),
            api_version: api_version.into(),
            public_key: signing_key.public_key_hex(),
            supports_push,
            supports_pull,
            supports_streaming,
            suggested_sync_interval_minutes,
            max_entities_per_sync,
            timestamp: now,
            nonce,
            signature: String::new(),
        };
        handshake.signature = signing_key.sign(&handshake.signing_payload());
        handshake
    }

    /// Step 1-3 of §4.7's handshake protocol: verify signature, timestamp
    /// window, then consume the nonce. Each check is a distinct abort
    /// reason so the caller can attribute the rejection precisely in its
    /// Trust Manager bookkeeping.
    #[instrument(skip(self, handshake))]
    pub async fn verify_handshake(&self, handshake: &PeerHandshake, now: DateTime<Utc>) -> Result<(), ProtocolError> {
        verify(&handshake.public_key, &handshake.signing_payload(), &handshake.signature)?;
        self.check_timestamp_window(handshake.timestamp, now)?;
        self.consume_nonce(&handshake.public_key, handshake.nonce).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build_sync_payload(
        &self,
        signing_key: &PeerSigningKey,
        peer_id: impl Into<String>,
        sync_id: impl Into<String>,
        now: DateTime<Utc>,
        entities: Vec<serde_json::Value>,
        edges: Vec<serde_json::Value>,
        deletions: Vec<String>,
        has_more: bool,
        next_cursor: Option<String>,
        nonce: Option<u64>,
    ) -> Result<SyncPayload, ProtocolError> {
        let mut payload = SyncPayload {
            peer_id: peer_id.into(),
            sync_id: sync_id.into(),
            timestamp: now,
            entities,
            edges,
            deletions,
            has_more,
            next_cursor,
            content_hash: String::new(),
            signature: String::new(),
            nonce,
        };
        payload.content_hash = content_hash(&payload.body_value())?;
        payload.signature = signing_key.sign(&payload.signing_payload());
        Ok(payload)
    }

    /// Step in §4.7's sync payload protocol: recompute the hash, verify the
    /// signature against `sender_public_key`, check freshness, consume the
    /// nonce if present. `sender_public_key` is supplied by the caller (the
    /// Sync Engine, reading it off the `Peer` row) since `SyncPayload` on
    /// the wire carries only a `peer_id`, not the key itself.
    #[instrument(skip(self, payload, sender_public_key))]
    pub async fn verify_sync_payload(&self, payload: &SyncPayload, sender_public_key: &str, now: DateTime<Utc>) -> Result<(), ProtocolError> {
        let recomputed = content_hash(&payload.body_value())?;
        if recomputed != payload.content_hash {
            return Err(ProtocolError::Malformed(format!(
                "content hash mismatch: expected {}, computed {}",
                payload.content_hash, recomputed
            )));
        }
        verify(sender_public_key, &payload.signing_payload(), &payload.signature)?;
        self.check_timestamp_window(payload.timestamp, now)?;
        if let Some(nonce) = payload.nonce {
            self.consume_nonce(sender_public_key, nonce).await?;
        }
        Ok(())
    }

    /// Wraps an arbitrary request body (the sync-request's `{since,
    /// capsule_types?, limit}`) in the signed envelope shape every body
    /// crosses `SyncTransport` in (§6).
    pub fn build_envelope(&self, signing_key: &PeerSigningKey, payload: serde_json::Value, nonce: u64, now: DateTime<Utc>) -> Result<Envelope, ProtocolError> {
        let hash = content_hash(&payload)?;
        let signature = signing_key.sign(format!("{hash}:{nonce}").as_bytes());
        Ok(Envelope { payload, signature, public_key: signing_key.public_key_hex(), nonce, timestamp: now })
    }

    #[instrument(skip(self, envelope))]
    pub async fn verify_envelope(&self, envelope: &Envelope, now: DateTime<Utc>) -> Result<(), ProtocolError> {
        let hash = content_hash(&envelope.payload)?;
        verify(&envelope.public_key, format!("{hash}:{}", envelope.nonce).as_bytes(), &envelope.signature)?;
        self.check_timestamp_window(envelope.timestamp, now)?;
        self.consume_nonce(&envelope.public_key, envelope.nonce).await?;
        Ok(())
    }

    fn check_timestamp_window(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ProtocolError> {
        let skew = (now - timestamp).num_seconds().abs();
        if skew > self.config.clock_skew_seconds {
            return Err(ProtocolError::TimestampOutOfWindow { timestamp: timestamp.timestamp(), tolerance_secs: self.config.clock_skew_seconds });
        }
        Ok(())
    }

    async fn consume_nonce(&self, sender: &str, nonce: u64) -> Result<(), ProtocolError> {
        let (accepted, reason) = self.nonce_store.verify_and_consume_nonce(sender, nonce).await?;
        if !accepted {
            return Err(ProtocolError::NonceRejected(reason.to_string()));
        }
        Ok(())
    }
}
