//! Per-session state shared across actors.
//!
//! Attached to a connection mid-handshake, once the secret is known, and
//! destroyed with it. The secret and controlled entity id never change; all
//! other fields are replaced whole or only move forward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{constants, Result, SessionError};
use crate::utils::ttl_cache::TtlCache;
use crate::world::ChunkLoc;

#[derive(Debug)]
pub struct SharedConnectionState {
    entity_id: String,
    secret: String,
    epoch: Instant,
    /// Milliseconds after `epoch` of the last received heartbeat
    last_heartbeat_ms: AtomicU64,
    heartbeat_task: Mutex<Option<AbortHandle>>,
    heartbeat_cancellations: AtomicU64,
    requested_entities: Mutex<TtlCache<String, ()>>,
    requested_chunks: Mutex<TtlCache<ChunkLoc, ()>>,
}

impl SharedConnectionState {
    pub fn new(
        entity_id: impl Into<String>,
        secret: impl Into<String>,
        sync: &SyncConfig,
    ) -> Result<Self> {
        let entity_id = entity_id.into();
        let secret = secret.into();
        if entity_id.is_empty() {
            return Err(SessionError::HandshakeError(
                constants::ERR_EMPTY_ENTITY.into(),
            ));
        }
        if secret.is_empty() {
            return Err(SessionError::HandshakeError(
                constants::ERR_EMPTY_SECRET.into(),
            ));
        }

        Ok(Self {
            entity_id,
            secret,
            epoch: Instant::now(),
            last_heartbeat_ms: AtomicU64::new(0),
            heartbeat_task: Mutex::new(None),
            heartbeat_cancellations: AtomicU64::new(0),
            requested_entities: Mutex::new(TtlCache::with_settings(
                sync.request_ttl,
                sync.max_tracked_requests,
            )),
            requested_chunks: Mutex::new(TtlCache::with_settings(
                sync.request_ttl,
                sync.max_tracked_requests,
            )),
        })
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn verify_secret(&self, presented: &str) -> Result<()> {
        if presented != self.secret {
            return Err(SessionError::SecretMismatch);
        }
        Ok(())
    }

    pub fn record_heartbeat(&self) {
        let elapsed = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_heartbeat_ms.fetch_max(elapsed, Ordering::AcqRel);
    }

    pub fn since_last_heartbeat(&self) -> Duration {
        let last = Duration::from_millis(self.last_heartbeat_ms.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Install a new heartbeat task, aborting the previous one first.
    pub fn replace_heartbeat_task(&self, task: AbortHandle) {
        if let Ok(mut slot) = self.heartbeat_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
                self.heartbeat_cancellations.fetch_add(1, Ordering::Relaxed);
                debug!(entity = %self.entity_id, "Replaced heartbeat task");
            }
        }
    }

    /// Abort the heartbeat task. Returns false if none was running.
    pub fn cancel_heartbeat(&self) -> bool {
        let task = self.heartbeat_task.lock().ok().and_then(|mut slot| slot.take());
        match task {
            Some(task) => {
                task.abort();
                self.heartbeat_cancellations.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn has_heartbeat_task(&self) -> bool {
        self.heartbeat_task
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Total heartbeat tasks aborted over the session's lifetime.
    pub fn heartbeat_cancellations(&self) -> u64 {
        self.heartbeat_cancellations.load(Ordering::Relaxed)
    }

    /// Returns true if an entity request for `uuid` should be sent now.
    pub fn mark_entity_requested(&self, uuid: &str) -> bool {
        self.requested_entities
            .lock()
            .map(|mut cache| cache.mark(uuid.to_string()))
            .unwrap_or(false)
    }

    /// Returns true if a chunk request for `chunk` should be sent now.
    pub fn mark_chunk_requested(&self, chunk: ChunkLoc) -> bool {
        self.requested_chunks
            .lock()
            .map(|mut cache| cache.mark(chunk))
            .unwrap_or(false)
    }
}

impl Drop for SharedConnectionState {
    fn drop(&mut self) {
        self.cancel_heartbeat();
    }
}
