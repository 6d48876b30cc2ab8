//! Core execution types and the order registry.
//!
//! This crate provides the fundamental types shared by the REST client and
//! the trade stream:
//!
//! - **Order types**: `OrderSide`, `OrderType`, `ExecPolicy`, `OrderStatus`
//! - **Fills**: `Fill`, one executed trade as reported by the stream
//! - **Order registry**: `OrderObserver` with `StreamObserver` and `NilObserver`
//!
//! # Order Lifecycle
//!
//! 1. Caller takes the registry's placement lock
//! 2. Order is submitted via REST API
//! 3. The exchange-assigned ID is registered with `observe`
//! 4. The lock is released (guard dropped)
//! 5. The trade stream forwards every fill whose order ID is observable
//! 6. Once the order is terminal the caller calls `delete`
//!
//! # Race Condition Handling
//!
//! The stream session takes the same placement lock while it authenticates and
//! subscribes, so an order is either registered before the subscription exists
//! or placed after it. See the `observer` module documentation for details.

mod fill;
mod observer;
mod order;

pub use fill::Fill;
pub use observer::{
    create_nil_observer, create_stream_observer, NilObserver, ObservedOrder, ObserverError,
    OrderObserver, PlacementGuard, SharedOrderObserver, StreamObserver,
};
pub use order::{ExecPolicy, OrderSide, OrderStatus, OrderType};
