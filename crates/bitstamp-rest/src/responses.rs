//! Bitstamp API response types.
//!
//! Bitstamp is inconsistent about quoting numbers, so every numeric field goes
//! through the flexible parsers from `common`.

use chrono::NaiveDateTime;
use common::{parse_flexible_f64, parse_flexible_u64};
use execution_core::{OrderSide, OrderStatus};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Datetime layout used in transaction records.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Response from the buy/sell endpoints (limit and market).
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderResult {
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub id: u64,
    pub datetime: String,
    #[serde(rename = "type", deserialize_with = "deserialize_trade_side")]
    pub side: OrderSide,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub price: f64,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub amount: f64,
}

/// Response from `/api/v2/balance/`: available currencies and balances.
///
/// Only `<currency>_balance` keys are kept, keyed by lowercase currency.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct BalanceResult {
    pub balances: HashMap<String, f64>,
}

impl BalanceResult {
    /// Total balance of one currency.
    pub fn get(&self, currency: &str) -> Option<f64> {
        self.balances.get(&currency.to_lowercase()).copied()
    }
}

impl TryFrom<Map<String, Value>> for BalanceResult {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut balances = HashMap::new();

        for (key, value) in fields {
            let key = key.to_lowercase();
            let Some(currency) = key.strip_suffix("_balance") else {
                continue;
            };

            let amount = parse_flexible_f64(&value).map_err(|e| format!("{}: {}", key, e))?;
            balances.insert(currency.to_string(), amount);
        }

        Ok(Self { balances })
    }
}

/// Transaction type codes used by `user_transactions`.
pub mod transaction_type {
    pub const DEPOSIT: u64 = 0;
    pub const WITHDRAWAL: u64 = 1;
    pub const TRADE: u64 = 2;
}

/// One entry of `/api/v2/user_transactions/`.
///
/// Fields not known up front are currency amounts affected by the
/// transaction (e.g. `usd`, `btc`) and are collected in `amounts`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct TransactionResult {
    pub id: u64,
    /// Zero for deposits and withdrawals.
    pub order_id: u64,
    pub datetime: String,
    pub kind: u64,
    pub fee: f64,
    pub amounts: HashMap<String, f64>,
}

impl TransactionResult {
    pub fn is_trade(&self) -> bool {
        self.kind == transaction_type::TRADE
    }
}

impl TryFrom<Map<String, Value>> for TransactionResult {
    type Error = String;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let id = take_u64(&mut fields, "id")?;
        let order_id = match fields.remove("order_id") {
            Some(Value::Null) | None => 0,
            Some(value) => parse_flexible_u64(&value).map_err(|e| format!("order_id: {}", e))?,
        };
        let datetime = take_string(&mut fields, "datetime")?;
        let kind = take_u64(&mut fields, "type")?;
        let fee = match fields.remove("fee") {
            Some(value) => parse_flexible_f64(&value).map_err(|e| format!("fee: {}", e))?,
            None => 0.0,
        };

        Ok(Self {
            id,
            order_id,
            datetime,
            kind,
            fee,
            amounts: collect_amounts(fields),
        })
    }
}

/// One entry of `/api/v2/open_orders/all/`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrderResult {
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub id: u64,
    pub datetime: String,
    #[serde(rename = "type", deserialize_with = "deserialize_trade_side")]
    pub side: OrderSide,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub price: f64,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub amount: f64,
    pub currency_pair: String,
}

/// Response from `/api/v2/order_status/`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusResult {
    pub status: String,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub id: u64,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub amount_remaining: f64,
    #[serde(default)]
    pub transactions: Vec<OrderTransaction>,
}

impl OrderStatusResult {
    /// Parsed order status, `None` for values this client does not know.
    pub fn order_status(&self) -> Option<OrderStatus> {
        OrderStatus::from_bitstamp_str(&self.status)
    }

    /// Total base amount filled so far, summed over trades.
    pub fn filled_amount(&self, base_currency: &str) -> f64 {
        self.transactions
            .iter()
            .filter_map(|t| t.currencies.get(base_currency))
            .sum()
    }
}

/// A trade belonging to an order, as listed by `order_status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct OrderTransaction {
    pub tid: u64,
    pub price: f64,
    pub fee: f64,
    pub datetime: Option<NaiveDateTime>,
    pub kind: u64,
    /// Currency amounts affected by the trade.
    pub currencies: HashMap<String, f64>,
}

impl TryFrom<Map<String, Value>> for OrderTransaction {
    type Error = String;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let tid = take_u64(&mut fields, "tid")?;
        let price = take_f64(&mut fields, "price")?;
        let fee = take_f64(&mut fields, "fee")?;
        let kind = take_u64(&mut fields, "type")?;
        let datetime = fields
            .remove("datetime")
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|s| NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).ok());

        Ok(Self {
            tid,
            price,
            fee,
            datetime,
            kind,
            currencies: collect_amounts(fields),
        })
    }
}

/// Response from `/api/v2/cancel_order/`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderCancelResult {
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub id: u64,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub amount: f64,
    #[serde(deserialize_with = "deserialize_flexible_f64")]
    pub price: f64,
    #[serde(rename = "type", deserialize_with = "deserialize_trade_side")]
    pub side: OrderSide,
    #[serde(default)]
    pub currency_pair: Option<String>,
}

/// Response from `/api/v2/cancel_all_orders/`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelAllOrdersResult {
    pub success: bool,
    #[serde(default)]
    pub canceled: Vec<OrderCancelResult>,
}

/// Response from `/api/v2/websockets_token/`.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamTokenResponse {
    pub token: String,
    #[serde(default)]
    pub valid_sec: Option<u64>,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub user_id: u64,
}

fn take_u64(fields: &mut Map<String, Value>, key: &str) -> Result<u64, String> {
    let value = fields.remove(key).ok_or_else(|| format!("missing field {}", key))?;
    parse_flexible_u64(&value).map_err(|e| format!("{}: {}", key, e))
}

fn take_f64(fields: &mut Map<String, Value>, key: &str) -> Result<f64, String> {
    let value = fields.remove(key).ok_or_else(|| format!("missing field {}", key))?;
    parse_flexible_f64(&value).map_err(|e| format!("{}: {}", key, e))
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Result<String, String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("{}: expected string, got {}", key, other)),
        None => Err(format!("missing field {}", key)),
    }
}

/// Keep the remaining fields that hold numbers. Others (nulls, nested data) are skipped.
fn collect_amounts(fields: Map<String, Value>) -> HashMap<String, f64> {
    fields
        .into_iter()
        .filter_map(|(key, value)| parse_flexible_f64(&value).ok().map(|v| (key, v)))
        .collect()
}

fn deserialize_flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_flexible_f64(&value).map_err(de::Error::custom)
}

fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_flexible_u64(&value).map_err(de::Error::custom)
}

/// Order `type` field: 0 = buy, 1 = sell, quoted or bare.
fn deserialize_trade_side<'de, D>(deserializer: D) -> Result<OrderSide, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let code = parse_flexible_u64(&value).map_err(de::Error::custom)?;
    OrderSide::from_trade_type(code)
        .ok_or_else(|| de::Error::custom(format!("unknown order type {}", code)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_place_order() {
        let json = r#"{"id": "1373320601649153", "datetime": "2021-06-19 15:58:44.669000", "type": "0", "price": "36171.43", "amount": "0.00090000"}"#;
        let result: PlaceOrderResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.id, 1373320601649153);
        assert_eq!(result.side, OrderSide::Buy);
        assert_eq!(result.price, 36171.43);
        assert_eq!(result.amount, 0.0009);
    }

    #[test]
    fn test_place_order_accepts_bare_numbers() {
        let json = r#"{"id": 77, "datetime": "x", "type": 1, "price": 100.5, "amount": 0.0009}"#;
        let result: PlaceOrderResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.id, 77);
        assert_eq!(result.side, OrderSide::Sell);
        assert_eq!(result.amount, 0.0009);
    }

    #[test]
    fn test_place_order_rejects_unknown_type() {
        let json = r#"{"id": 77, "datetime": "x", "type": 5, "price": 1, "amount": 1}"#;
        assert!(serde_json::from_str::<PlaceOrderResult>(json).is_err());
    }

    #[test]
    fn test_deserialize_balances() {
        let json = r#"{"usd_balance": "100.50", "BTC_balance": 0.25, "usd_available": "90.00", "fee": "0.5"}"#;
        let result: BalanceResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.balances.len(), 2);
        assert_eq!(result.get("usd"), Some(100.5));
        assert_eq!(result.get("BTC"), Some(0.25));
        assert_eq!(result.get("eth"), None);
    }

    #[test]
    fn test_deserialize_balances_invalid_number() {
        let json = r#"{"usd_balance": "lots"}"#;
        assert!(serde_json::from_str::<BalanceResult>(json).is_err());
    }

    #[test]
    fn test_deserialize_transaction() {
        let json = r#"{"id": 1, "order_id": 1373320601649153, "datetime": "2021-06-19 15:58:44", "type": "2", "fee": "0.16277", "usd": "-32.55", "btc": "0.0009", "btc_usd": 36171.43, "extra": null}"#;
        let result: TransactionResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.id, 1);
        assert_eq!(result.order_id, 1373320601649153);
        assert!(result.is_trade());
        assert_eq!(result.fee, 0.16277);
        assert_eq!(result.amounts.get("btc"), Some(&0.0009));
        assert_eq!(result.amounts.get("usd"), Some(&-32.55));
        assert!(!result.amounts.contains_key("extra"));
    }

    #[test]
    fn test_deserialize_deposit_without_order() {
        let json = r#"{"id": 2, "datetime": "2021-06-19 15:58:44", "type": "0", "fee": "0", "usd": "50"}"#;
        let result: TransactionResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.order_id, 0);
        assert_eq!(result.kind, transaction_type::DEPOSIT);
    }

    #[test]
    fn test_deserialize_order_status() {
        let json = r#"{"status": "Finished", "id": 1373320601649153, "amount_remaining": "0.00000000", "transactions": [{"fee": "0.16277", "price": "36171.43000000", "datetime": "2021-06-19 15:58:44.669000", "usd": "32.55428700", "btc": "0.00090000", "tid": 183814449, "type": 2}]}"#;
        let result: OrderStatusResult = serde_json::from_str(json).unwrap();

        assert_eq!(result.order_status(), Some(OrderStatus::Finished));
        assert_eq!(result.amount_remaining, 0.0);
        assert_eq!(result.transactions.len(), 1);

        let trade = &result.transactions[0];
        assert_eq!(trade.tid, 183814449);
        assert_eq!(trade.price, 36171.43);
        assert!(trade.datetime.is_some());
        assert_eq!(result.filled_amount("btc"), 0.0009);
    }

    #[test]
    fn test_deserialize_cancel_all() {
        let json = r#"{"success": true, "canceled": [{"id": 1, "amount": "0.1", "price": "100", "type": 0, "currency_pair": "BTC/USD"}]}"#;
        let result: CancelAllOrdersResult = serde_json::from_str(json).unwrap();

        assert!(result.success);
        assert_eq!(result.canceled.len(), 1);
        assert_eq!(result.canceled[0].side, OrderSide::Buy);
    }

    #[test]
    fn test_deserialize_stream_token() {
        let json = r#"{"token": "abc", "valid_sec": 60, "user_id": "12345"}"#;
        let result: StreamTokenResponse = serde_json::from_str(json).unwrap();

        assert_eq!(result.token, "abc");
        assert_eq!(result.user_id, 12345);
        assert_eq!(result.valid_sec, Some(60));
    }
}
