use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::FlowState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("stored flow state could not be decoded: {0}")]
    Decode(String),
}

/// Keyed persistence for one conversation's in-progress booking state.
///
/// Entries expire after the configured time-to-live; an expired entry reads
/// as absent, so abandoned conversations restart cleanly.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<FlowState>, StoreError>;
    async fn put(&self, key: &str, state: &FlowState) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

pub struct InMemoryFlowStateStore {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<String, (FlowState, Instant)>>>,
}

impl InMemoryFlowStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl FlowStateStore for InMemoryFlowStateStore {
    async fn get(&self, key: &str) -> Result<Option<FlowState>, StoreError> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((_, stored_at)) if stored_at.elapsed() > self.ttl => {
                // Lazy eviction: stale state is treated as absent.
                entries.remove(key);
                debug!("Expired flow state for {}", key);
                Ok(None)
            }
            Some((state, _)) => Ok(Some(state.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, state: &FlowState) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (state.clone(), Instant::now()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

// ==============================================================================
// REDIS STORE
// ==============================================================================

pub struct RedisFlowStateStore {
    conn: redis::aio::ConnectionManager,
    ttl_seconds: u64,
}

impl RedisFlowStateStore {
    pub async fn connect(redis_url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!("Flow state store connected to Redis");
        Ok(Self {
            conn,
            ttl_seconds: ttl.as_secs().max(1),
        })
    }

    fn redis_key(key: &str) -> String {
        format!("booking_flow:{}", key)
    }
}

#[async_trait]
impl FlowStateStore for RedisFlowStateStore {
    async fn get(&self, key: &str) -> Result<Option<FlowState>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::redis_key(key))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match raw {
            Some(json) => {
                let state = serde_json::from_str(&json)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, state: &FlowState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state).map_err(|e| StoreError::Decode(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(Self::redis_key(key), json, self.ttl_seconds)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(Self::redis_key(key))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

// ==============================================================================
// RESILIENT WRAPPER
// ==============================================================================

/// Primary store with an in-memory fallback. Writes are mirrored into the
/// fallback so a primary outage mid-conversation does not lose progress.
pub struct ResilientStateStore {
    primary: Arc<dyn FlowStateStore>,
    fallback: InMemoryFlowStateStore,
}

impl ResilientStateStore {
    pub fn new(primary: Arc<dyn FlowStateStore>, ttl: Duration) -> Self {
        Self {
            primary,
            fallback: InMemoryFlowStateStore::new(ttl),
        }
    }
}

#[async_trait]
impl FlowStateStore for ResilientStateStore {
    async fn get(&self, key: &str) -> Result<Option<FlowState>, StoreError> {
        match self.primary.get(key).await {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!("Primary state store read failed for {}: {}", key, e);
                self.fallback.get(key).await
            }
        }
    }

    async fn put(&self, key: &str, state: &FlowState) -> Result<(), StoreError> {
        self.fallback.put(key, state).await?;
        if let Err(e) = self.primary.put(key, state).await {
            warn!("Primary state store write failed for {}: {}", key, e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.fallback.delete(key).await?;
        if let Err(e) = self.primary.delete(key).await {
            warn!("Primary state store delete failed for {}: {}", key, e);
        }
        Ok(())
    }
}
