//! Bitstamp REST API client.
//!
//! This crate provides a typed client for the Bitstamp v2 private API with:
//!
//! - **Order placement**: limit and market orders, registered with the order
//!   observer under its placement lock
//! - **Order management**: status, cancel, cancel all, open orders
//! - **Account**: balances, transactions, websocket tokens
//! - **Error handling**: Bitstamp error bodies classified into typed errors
//!
//! # Example
//!
//! ```rust,ignore
//! use auth::ApiCredentials;
//! use bitstamp_rest::BitstampRestClient;
//! use execution_core::create_stream_observer;
//!
//! let credentials = ApiCredentials::from_env()?;
//! let observer = create_stream_observer();
//! let client = BitstampRestClient::new(credentials, observer.clone())?;
//!
//! // The returned ID is observable before the call returns
//! let placed = client.buy_market_order("btcusd", dec!(0.001)).await?;
//! assert!(observer.is_observable(placed.id));
//! ```

mod client;
mod error;
mod responses;

pub use client::{BitstampRestClient, PlaceOrderRequest};
pub use error::BitstampRestError;
pub use responses::{
    transaction_type, BalanceResult, CancelAllOrdersResult, OpenOrderResult, OrderCancelResult,
    OrderStatusResult, OrderTransaction, PlaceOrderResult, StreamTokenResponse, TransactionResult,
};
