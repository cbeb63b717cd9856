//! Outbound snapshot delivery.
//!
//! The realtime transport registers an account when its socket opens and
//! owns the receiving half of the channel. Ticks only ever `try_send`, so a
//! slow client can never hold up a galaxy.

use std::collections::HashMap;

use async_trait::async_trait;
use orrery_protocol::{AccountId, FactionId, VisibilitySnapshot};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("faction {0} is not part of the snapshot")]
    UnknownObserver(FactionId),
    #[error("account {0} is not connected")]
    NotConnected(AccountId),
    #[error("connection for account {0} is closed")]
    Closed(AccountId),
    #[error("connection for account {0} is not keeping up")]
    Lagging(AccountId),
}

#[async_trait]
pub trait PushSink: Send + Sync {
    async fn is_online(&self, account: AccountId) -> bool;
    async fn push_snapshot(
        &self,
        faction: FactionId,
        snapshot: VisibilitySnapshot,
    ) -> Result<(), PushError>;
}

/// Online accounts and the channel feeding each one's socket.
pub struct ConnectionRegistry {
    capacity: usize,
    connections: RwLock<HashMap<AccountId, mpsc::Sender<VisibilitySnapshot>>>,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register an account, replacing any previous connection.
    pub async fn connect(&self, account: AccountId) -> mpsc::Receiver<VisibilitySnapshot> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.write().await.insert(account, tx);
        debug!(%account, "account connected");
        rx
    }

    pub async fn disconnect(&self, account: AccountId) {
        if self.connections.write().await.remove(&account).is_some() {
            debug!(%account, "account disconnected");
        }
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[async_trait]
impl PushSink for ConnectionRegistry {
    async fn is_online(&self, account: AccountId) -> bool {
        self.connections
            .read()
            .await
            .get(&account)
            .is_some_and(|tx| !tx.is_closed())
    }

    async fn push_snapshot(
        &self,
        faction: FactionId,
        snapshot: VisibilitySnapshot,
    ) -> Result<(), PushError> {
        let account = snapshot
            .faction(faction)
            .map(|f| f.account)
            .ok_or(PushError::UnknownObserver(faction))?;
        let sender = self
            .connections
            .read()
            .await
            .get(&account)
            .cloned()
            .ok_or(PushError::NotConnected(account))?;

        match sender.try_send(snapshot) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(PushError::Lagging(account)),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.disconnect(account).await;
                Err(PushError::Closed(account))
            }
        }
    }
}
