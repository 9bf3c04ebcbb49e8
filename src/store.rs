//! Order and deliverable storage.
//!
//! Both stores are traits so deployments can plug in persistence; the
//! defaults here are in-memory and process-lived. The order store is where
//! the status state machine is enforced: an update that would move an order
//! along an edge the DAG does not have is rejected without any write, and
//! a tx hash can only ever be attached to one order.

use async_trait::async_trait;
use dashmap::DashMap;
use url::Url;

use ivxp_types::error::{CodedError, ErrorCode};
use ivxp_types::hash::ContentHash;
use ivxp_types::order::{Deliverable, Order, OrderId, OrderStatus, TxHash};
use ivxp_types::timestamp::Timestamp;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No order with the given id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),
    /// The patch would move the order along an edge the DAG does not have.
    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    /// The tx hash is already attached to another order.
    #[error("Transaction hash already used: {0}")]
    DuplicateTxHash(TxHash),
    /// A deliverable for the order already exists; they are insert-only.
    #[error("Deliverable already exists for order: {0}")]
    DeliverableAlreadyExists(OrderId),
}

impl CodedError for StoreError {
    fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound(_) => ErrorCode::OrderNotFound,
            StoreError::IllegalTransition { .. } => ErrorCode::InvalidOrderStatus,
            StoreError::DuplicateTxHash(_) => ErrorCode::PaymentVerificationFailed,
            StoreError::DeliverableAlreadyExists(_) => ErrorCode::DeliverableAlreadyExists,
        }
    }
}

/// A partial update applied to an order.
///
/// Absent fields are left untouched. Applying a patch is compare-and-apply
/// against the current snapshot under the store's per-key guard.
#[derive(Debug, Default, Clone)]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub tx_hash: Option<TxHash>,
    pub content_hash: Option<ContentHash>,
    pub delivery_endpoint: Option<Url>,
    pub confirmed_at: Option<Timestamp>,
}

impl OrderPatch {
    /// A patch that only moves status.
    pub fn status(status: OrderStatus) -> Self {
        OrderPatch {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Filter for [`OrderStore::list`].
#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub service_type: Option<String>,
}

/// Keyed CRUD over orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order. The order must be in `quoted`.
    async fn create(&self, order: Order) -> Result<Order, StoreError>;

    /// Fetch an order by id.
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Apply a patch, enforcing the status DAG and tx-hash uniqueness.
    async fn update(&self, id: &OrderId, patch: OrderPatch) -> Result<Order, StoreError>;

    /// List orders matching a filter.
    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError>;

    /// Remove an order; returns whether it existed.
    async fn delete(&self, id: &OrderId) -> Result<bool, StoreError>;
}

/// Keyed storage of deliverables. Insert-only.
#[async_trait]
pub trait DeliverableStore: Send + Sync {
    /// Store the deliverable for an order. Overwriting is a protocol error.
    async fn set(&self, id: &OrderId, deliverable: Deliverable) -> Result<(), StoreError>;

    /// Fetch the deliverable for an order.
    async fn get(&self, id: &OrderId) -> Result<Option<Deliverable>, StoreError>;
}

/// Process-lived [`OrderStore`].
///
/// Per-order mutations are linearized through the dashmap entry guard, so
/// concurrent readers observe either the old or the new snapshot, never a
/// torn one.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<OrderId, Order>,
    // tx hash (lowercase) -> owning order
    tx_index: DashMap<TxHash, OrderId>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: Order) -> Result<Order, StoreError> {
        if let Some(tx_hash) = order.tx_hash {
            if self.tx_index.contains_key(&tx_hash) {
                return Err(StoreError::DuplicateTxHash(tx_hash));
            }
            self.tx_index.insert(tx_hash, order.id.clone());
        }
        self.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(id).map(|entry| entry.clone()))
    }

    async fn update(&self, id: &OrderId, patch: OrderPatch) -> Result<Order, StoreError> {
        // Uniqueness check first so a conflicting patch leaves no writes.
        if let Some(tx_hash) = patch.tx_hash {
            if let Some(owner) = self.tx_index.get(&tx_hash) {
                if owner.value() != id {
                    return Err(StoreError::DuplicateTxHash(tx_hash));
                }
            }
        }
        let mut entry = self
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let order = entry.value_mut();
        if let Some(next) = patch.status {
            if !order.status.can_transition_to(next) {
                return Err(StoreError::IllegalTransition {
                    from: order.status,
                    to: next,
                });
            }
            order.status = next;
        }
        if let Some(tx_hash) = patch.tx_hash {
            order.tx_hash = Some(tx_hash);
            self.tx_index.insert(tx_hash, id.clone());
        }
        if let Some(content_hash) = patch.content_hash {
            order.content_hash = Some(content_hash);
        }
        if let Some(delivery_endpoint) = patch.delivery_endpoint {
            order.delivery_endpoint = Some(delivery_endpoint);
        }
        if let Some(confirmed_at) = patch.confirmed_at {
            order.confirmed_at = Some(confirmed_at);
        }
        Ok(order.clone())
    }

    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        let orders = self
            .orders
            .iter()
            .filter(|entry| {
                let order = entry.value();
                filter.status.is_none_or(|status| order.status == status)
                    && filter
                        .service_type
                        .as_deref()
                        .is_none_or(|service| order.service_type == service)
            })
            .map(|entry| entry.value().clone())
            .collect();
        Ok(orders)
    }

    async fn delete(&self, id: &OrderId) -> Result<bool, StoreError> {
        let removed = self.orders.remove(id);
        if let Some((_, order)) = &removed {
            if let Some(tx_hash) = order.tx_hash {
                self.tx_index.remove(&tx_hash);
            }
        }
        Ok(removed.is_some())
    }
}

/// Process-lived [`DeliverableStore`].
#[derive(Debug, Default)]
pub struct InMemoryDeliverableStore {
    deliverables: DashMap<OrderId, Deliverable>,
}

impl InMemoryDeliverableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliverableStore for InMemoryDeliverableStore {
    async fn set(&self, id: &OrderId, deliverable: Deliverable) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.deliverables.entry(id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DeliverableAlreadyExists(id.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(deliverable);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &OrderId) -> Result<Option<Deliverable>, StoreError> {
        Ok(self.deliverables.get(id).map(|entry| entry.clone()))
    }
}
