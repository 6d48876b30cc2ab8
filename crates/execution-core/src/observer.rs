//! Registry of order IDs placed by this client.
//!
//! The trade stream asks the registry whether a fill belongs to us. Two locks
//! are involved and they are independent:
//!
//! - the map lock (`parking_lot::RwLock`) guards membership and is held only
//!   for the duration of a single lookup or update
//! - the placement lock (`tokio::sync::Mutex`) is advisory. Order placement
//!   holds it from before the REST request until the returned ID has been
//!   registered. The stream session holds it while authenticating and
//!   subscribing.
//!
//! Holding the placement lock on both sides means an order is either
//! registered before the subscription starts delivering fills, or it is placed
//! only after the subscription is complete. A fill can therefore never be
//! judged for an order whose placement is still in flight.
//!
//! ```rust,ignore
//! let guard = observer.lock().await?;
//! let placed = client.buy_market_order("btcusd", amount).await?;
//! observer.observe(OrderSide::Buy, "btcusd", placed.id)?;
//! drop(guard);
//! ```
//!
//! Entries are never expired. Callers must `delete` an order once it is
//! finished or canceled, otherwise the entry lives for the whole process.

use crate::order::OrderSide;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Errors returned by the order registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObserverError {
    /// The order ID is already registered.
    #[error("order {0} is already observed")]
    AlreadyExists(u64),

    /// The order ID is not registered.
    #[error("order {0} is not observed")]
    NotFound(u64),

    /// The placement lock could not be acquired in time.
    #[error("placement lock not acquired within {0:?}")]
    LockTimeout(Duration),
}

/// An order registered for fill reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedOrder {
    pub order_id: u64,
    pub side: OrderSide,
    pub symbol: String,
    /// When the order was registered.
    pub observed_at: Instant,
}

/// Scoped hold on the placement lock. Dropping it releases the lock.
#[must_use = "the placement lock is released as soon as the guard is dropped"]
pub struct PlacementGuard {
    inner: Option<OwnedMutexGuard<()>>,
}

impl PlacementGuard {
    fn exclusive(inner: OwnedMutexGuard<()>) -> Self {
        Self { inner: Some(inner) }
    }

    fn unlocked() -> Self {
        Self { inner: None }
    }

    /// Whether this guard actually excludes other holders.
    pub fn is_exclusive(&self) -> bool {
        self.inner.is_some()
    }

    /// Release the lock explicitly.
    pub fn unlock(self) {}
}

impl std::fmt::Debug for PlacementGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementGuard")
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

/// Tracks which exchange order IDs belong to this client.
#[async_trait]
pub trait OrderObserver: Send + Sync {
    /// Register an order. Fails if the ID is already registered.
    fn observe(&self, side: OrderSide, symbol: &str, order_id: u64) -> Result<(), ObserverError>;

    /// Unregister an order. Fails if the ID is not registered.
    fn delete(&self, order_id: u64) -> Result<(), ObserverError>;

    /// Membership test used on the stream hot path.
    fn is_observable(&self, order_id: u64) -> bool;

    /// Acquire the placement lock.
    async fn lock(&self) -> Result<PlacementGuard, ObserverError>;

    /// Look up a registered order.
    fn get(&self, order_id: u64) -> Option<ObservedOrder>;

    /// Number of registered orders.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe reference to an order observer.
pub type SharedOrderObserver = Arc<dyn OrderObserver>;

/// Create a shared `StreamObserver`.
pub fn create_stream_observer() -> SharedOrderObserver {
    Arc::new(StreamObserver::new())
}

/// Create a shared `NilObserver`.
pub fn create_nil_observer() -> SharedOrderObserver {
    Arc::new(NilObserver)
}

/// Registry used for private stream reconciliation.
pub struct StreamObserver {
    orders: RwLock<HashMap<u64, ObservedOrder>>,
    placement: Arc<Mutex<()>>,
    lock_timeout: Option<Duration>,
}

impl Default for StreamObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamObserver {
    /// Create an empty registry whose lock waits indefinitely.
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            placement: Arc::new(Mutex::new(())),
            lock_timeout: None,
        }
    }

    /// Bound how long `lock` waits before failing with `LockTimeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Snapshot of all registered order IDs.
    pub fn order_ids(&self) -> Vec<u64> {
        self.orders.read().keys().copied().collect()
    }
}

#[async_trait]
impl OrderObserver for StreamObserver {
    fn observe(&self, side: OrderSide, symbol: &str, order_id: u64) -> Result<(), ObserverError> {
        let mut orders = self.orders.write();
        if orders.contains_key(&order_id) {
            return Err(ObserverError::AlreadyExists(order_id));
        }

        orders.insert(
            order_id,
            ObservedOrder {
                order_id,
                side,
                symbol: symbol.to_string(),
                observed_at: Instant::now(),
            },
        );

        tracing::debug!(order_id, %side, symbol, "Order observed");
        Ok(())
    }

    fn delete(&self, order_id: u64) -> Result<(), ObserverError> {
        match self.orders.write().remove(&order_id) {
            Some(_) => {
                tracing::debug!(order_id, "Order no longer observed");
                Ok(())
            }
            None => Err(ObserverError::NotFound(order_id)),
        }
    }

    fn is_observable(&self, order_id: u64) -> bool {
        self.orders.read().contains_key(&order_id)
    }

    async fn lock(&self) -> Result<PlacementGuard, ObserverError> {
        let acquire = self.placement.clone().lock_owned();

        let inner = match self.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, acquire)
                .await
                .map_err(|_| ObserverError::LockTimeout(timeout))?,
            None => acquire.await,
        };

        Ok(PlacementGuard::exclusive(inner))
    }

    fn get(&self, order_id: u64) -> Option<ObservedOrder> {
        self.orders.read().get(&order_id).cloned()
    }

    fn len(&self) -> usize {
        self.orders.read().len()
    }
}

/// Registry that observes nothing.
///
/// Used when the stream carries market-wide trades and no reconciliation
/// is wanted. Registration succeeds without effect and the lock never blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NilObserver;

#[async_trait]
impl OrderObserver for NilObserver {
    fn observe(&self, _side: OrderSide, _symbol: &str, _order_id: u64) -> Result<(), ObserverError> {
        Ok(())
    }

    fn delete(&self, _order_id: u64) -> Result<(), ObserverError> {
        Ok(())
    }

    fn is_observable(&self, _order_id: u64) -> bool {
        false
    }

    async fn lock(&self) -> Result<PlacementGuard, ObserverError> {
        Ok(PlacementGuard::unlocked())
    }

    fn get(&self, _order_id: u64) -> Option<ObservedOrder> {
        None
    }

    fn len(&self) -> usize {
        0
    }
}
