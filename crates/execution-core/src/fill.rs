//! Executed trade as delivered to the fill consumer.

use crate::order::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One executed trade reported by the exchange stream.
///
/// `order_id` and `side` describe the participant the fill is about. Public
/// trades also name the other participant's order in `counter_order_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Exchange order ID this fill belongs to.
    pub order_id: u64,
    /// Order on the other side of the trade (public channel only).
    pub counter_order_id: Option<u64>,
    /// Exchange trade ID.
    pub trade_id: u64,
    /// Currency pair, e.g. `btcusd`.
    pub symbol: String,
    /// Execution price.
    pub price: f64,
    /// Executed amount in base currency.
    pub size: f64,
    /// Fee charged (zero when the channel does not report it).
    pub fee: f64,
    /// Side of `order_id`.
    pub side: OrderSide,
    /// Execution time.
    pub filled_at: DateTime<Utc>,
}

impl Fill {
    /// Quote-currency value of the fill.
    pub fn notional(&self) -> f64 {
        self.price * self.size
    }

    /// Every order ID this fill may belong to.
    pub fn order_ids(&self) -> impl Iterator<Item = u64> {
        std::iter::once(self.order_id).chain(self.counter_order_id)
    }

    /// Re-express the fill from the point of view of `order_id`.
    ///
    /// Returns `None` if the order took no part in this trade.
    pub fn oriented_to(&self, order_id: u64) -> Option<Fill> {
        if order_id == self.order_id {
            return Some(self.clone());
        }

        match self.counter_order_id {
            Some(counter) if counter == order_id => Some(Fill {
                order_id: counter,
                counter_order_id: Some(self.order_id),
                side: self.side.opposite(),
                ..self.clone()
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fill() -> Fill {
        Fill {
            order_id: 10,
            counter_order_id: Some(20),
            trade_id: 1,
            symbol: "btcusd".into(),
            price: 30_000.0,
            size: 0.5,
            fee: 0.0,
            side: OrderSide::Buy,
            filled_at: DateTime::from_timestamp_micros(1_634_000_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_notional() {
        assert_eq!(make_fill().notional(), 15_000.0);
    }

    #[test]
    fn test_order_ids() {
        let ids: Vec<u64> = make_fill().order_ids().collect();
        assert_eq!(ids, vec![10, 20]);

        let mut private = make_fill();
        private.counter_order_id = None;
        assert_eq!(private.order_ids().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn test_oriented_to_counter_order_flips_side() {
        let fill = make_fill();
        let flipped = fill.oriented_to(20).unwrap();

        assert_eq!(flipped.order_id, 20);
        assert_eq!(flipped.counter_order_id, Some(10));
        assert_eq!(flipped.side, OrderSide::Sell);
        assert_eq!(flipped.trade_id, fill.trade_id);
    }

    #[test]
    fn test_oriented_to_own_order_is_identity() {
        let fill = make_fill();
        assert_eq!(fill.oriented_to(10), Some(fill.clone()));
        assert_eq!(fill.oriented_to(99), None);
    }
}
