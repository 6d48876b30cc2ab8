//! Order types and status enums.

use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Convert from Bitstamp string representation.
    pub fn from_bitstamp_str(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }

    /// Convert to Bitstamp string representation (also the URL path segment).
    pub fn as_bitstamp_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Convert from the numeric `type` field of public trades (0 = buy, 1 = sell).
    pub fn from_trade_type(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Buy),
            1 => Some(Self::Sell),
            _ => None,
        }
    }

    /// The other side of a trade.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_bitstamp_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    /// Whether this order type needs a limit price.
    pub fn requires_price(&self) -> bool {
        matches!(self, Self::Limit)
    }
}

/// Execution policy for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecPolicy {
    /// Good till canceled.
    #[default]
    Default,
    /// Canceled at the end of the day.
    Daily,
    /// Fill or kill.
    FillOrKill,
    /// Immediate or cancel.
    ImmediateOrCancel,
}

impl ExecPolicy {
    /// Form parameter that switches the policy on, if any.
    pub fn form_flag(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Daily => Some("daily_order"),
            Self::FillOrKill => Some("fok_order"),
            Self::ImmediateOrCancel => Some("ioc_order"),
        }
    }
}

/// Order status as reported by `order_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Resting or partially filled.
    Open,
    /// Completely filled.
    Finished,
    /// Canceled by user or exchange.
    Canceled,
}

impl OrderStatus {
    /// Convert from Bitstamp string representation.
    pub fn from_bitstamp_str(s: &str) -> Option<Self> {
        match s {
            "Open" | "In Queue" => Some(Self::Open),
            "Finished" => Some(Self::Finished),
            "Canceled" | "Cancelled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Check if this is a terminal status (order is done).
    ///
    /// Callers should `delete` the order from the registry once this holds.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_roundtrip() {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            assert_eq!(OrderSide::from_bitstamp_str(side.as_bitstamp_str()), Some(side));
        }
        assert_eq!(OrderSide::from_bitstamp_str("BUY"), None);
    }

    #[test]
    fn test_side_from_trade_type() {
        assert_eq!(OrderSide::from_trade_type(0), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_trade_type(1), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_trade_type(2), None);
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_side_serde_lowercase() {
        assert_eq!(serde_json::to_string(&OrderSide::Sell).unwrap(), "\"sell\"");
    }

    #[test]
    fn test_exec_policy_flags() {
        assert_eq!(ExecPolicy::Default.form_flag(), None);
        assert_eq!(ExecPolicy::Daily.form_flag(), Some("daily_order"));
        assert_eq!(ExecPolicy::FillOrKill.form_flag(), Some("fok_order"));
        assert_eq!(ExecPolicy::ImmediateOrCancel.form_flag(), Some("ioc_order"));
    }

    #[test]
    fn test_status_terminal() {
        assert!(!OrderStatus::Open.is_terminal());
        assert!(OrderStatus::Finished.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert_eq!(
            OrderStatus::from_bitstamp_str("Cancelled"),
            Some(OrderStatus::Canceled)
        );
        assert_eq!(OrderStatus::from_bitstamp_str("Weird"), None);
    }

    #[test]
    fn test_order_type_requires_price() {
        assert!(OrderType::Limit.requires_price());
        assert!(!OrderType::Market.requires_price());
    }
}
