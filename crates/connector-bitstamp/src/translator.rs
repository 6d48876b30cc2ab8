//! Bitstamp websocket wire protocol.
//!
//! Turns raw text frames into `StreamEvent`s and builds the subscribe
//! requests. Public and private trade channels carry different payloads; both
//! come out as the same normalized `Fill`.

use chrono::{DateTime, Utc};
use common::{parse_flexible_f64, parse_flexible_u64, NumberError};
use connector_core::StreamMode;
use execution_core::{Fill, OrderSide};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const EVENT_TRADE: &str = "trade";
pub const EVENT_SUBSCRIBE: &str = "bts:subscribe";
pub const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "bts:subscription_succeeded";
pub const EVENT_REQUEST_RECONNECT: &str = "bts:request_reconnect";
pub const EVENT_ERROR: &str = "bts:error";

const PUBLIC_CHANNEL_PREFIX: &str = "live_trades_";
const PRIVATE_CHANNEL_PREFIX: &str = "private-my_trades_";

/// Why a frame could not be turned into an event.
#[derive(Debug, Error, PartialEq)]
pub enum TranslationError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    #[error("channel {0:?} does not match the stream mode")]
    UnexpectedChannel(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        #[source]
        source: NumberError,
    },

    #[error("invalid side {0:?}")]
    InvalidSide(String),

    #[error("timestamp {0} out of range")]
    InvalidTimestamp(u64),
}

/// A successfully translated frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// An executed trade.
    Trade(Fill),
    /// The server confirmed a subscription.
    SubscriptionSucceeded { channel: String },
    /// The server is going away and asks clients to reconnect.
    ReconnectRequested,
    /// The server rejected a request.
    ServerError { message: String },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    data: Value,
}

/// Translate one text frame.
///
/// `mode` selects the trade payload shape. A trade on a channel of the other
/// mode is rejected.
pub fn translate(text: &str, mode: StreamMode) -> Result<StreamEvent, TranslationError> {
    let frame: RawFrame =
        serde_json::from_str(text).map_err(|e| TranslationError::Malformed(e.to_string()))?;

    match frame.event.as_str() {
        EVENT_TRADE => {
            let symbol = channel_symbol(&frame.channel, mode)
                .ok_or_else(|| TranslationError::UnexpectedChannel(frame.channel.clone()))?;
            let fill = match mode {
                StreamMode::Public => public_trade(&frame.data, symbol)?,
                StreamMode::Private => private_trade(&frame.data, symbol)?,
            };
            Ok(StreamEvent::Trade(fill))
        }
        EVENT_SUBSCRIPTION_SUCCEEDED => Ok(StreamEvent::SubscriptionSucceeded {
            channel: frame.channel,
        }),
        EVENT_REQUEST_RECONNECT => Ok(StreamEvent::ReconnectRequested),
        EVENT_ERROR => Ok(StreamEvent::ServerError {
            message: frame
                .data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        other => Err(TranslationError::UnknownEvent(other.to_string())),
    }
}

/// Channel name for a symbol.
///
/// Private channels are bound to the authenticated user.
pub fn channel_name(mode: StreamMode, symbol: &str, user_id: Option<u64>) -> String {
    match (mode, user_id) {
        (StreamMode::Private, Some(user_id)) => {
            format!("{}{}-{}", PRIVATE_CHANNEL_PREFIX, symbol, user_id)
        }
        (StreamMode::Private, None) => format!("{}{}", PRIVATE_CHANNEL_PREFIX, symbol),
        (StreamMode::Public, _) => format!("{}{}", PUBLIC_CHANNEL_PREFIX, symbol),
    }
}

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    event: &'static str,
    data: SubscribeData<'a>,
}

#[derive(Debug, Serialize)]
struct SubscribeData<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a str>,
}

/// Build a `bts:subscribe` request.
pub fn subscribe_message(channel: &str, auth: Option<&str>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&SubscribeRequest {
        event: EVENT_SUBSCRIBE,
        data: SubscribeData { channel, auth },
    })
}

/// Extract the symbol from a trade channel name of the given mode.
fn channel_symbol(channel: &str, mode: StreamMode) -> Option<String> {
    let symbol = match mode {
        StreamMode::Public => channel.strip_prefix(PUBLIC_CHANNEL_PREFIX)?,
        StreamMode::Private => {
            let rest = channel.strip_prefix(PRIVATE_CHANNEL_PREFIX)?;
            // Drop the `-{user_id}` suffix
            rest.rsplit_once('-').map(|(symbol, _)| symbol).unwrap_or(rest)
        }
    };

    (!symbol.is_empty()).then(|| symbol.to_string())
}

/// Private trade: one order ID, already ours, with an explicit side and fee.
fn private_trade(data: &Value, symbol: String) -> Result<Fill, TranslationError> {
    let side_text = data
        .get("side")
        .and_then(Value::as_str)
        .ok_or(TranslationError::MissingField("side"))?;
    let side = OrderSide::from_bitstamp_str(side_text)
        .ok_or_else(|| TranslationError::InvalidSide(side_text.to_string()))?;

    Ok(Fill {
        order_id: field_u64(data, "order_id")?,
        counter_order_id: None,
        trade_id: field_u64(data, "id")?,
        symbol,
        price: field_f64(data, "price")?,
        size: field_f64(data, "amount")?,
        fee: match data.get("fee") {
            Some(Value::Null) | None => 0.0,
            Some(_) => field_f64(data, "fee")?,
        },
        side,
        filled_at: filled_at(data)?,
    })
}

/// Public trade: both order IDs, `type` names the taker side.
///
/// The taker's order becomes `order_id`, the maker's `counter_order_id`.
fn public_trade(data: &Value, symbol: String) -> Result<Fill, TranslationError> {
    let type_value = data.get("type").ok_or(TranslationError::MissingField("type"))?;
    let code = parse_flexible_u64(type_value).map_err(|source| TranslationError::InvalidNumber {
        field: "type",
        source,
    })?;
    let side = OrderSide::from_trade_type(code)
        .ok_or_else(|| TranslationError::InvalidSide(code.to_string()))?;

    let buy_order_id = field_u64(data, "buy_order_id")?;
    let sell_order_id = field_u64(data, "sell_order_id")?;
    let (order_id, counter_order_id) = match side {
        OrderSide::Buy => (buy_order_id, sell_order_id),
        OrderSide::Sell => (sell_order_id, buy_order_id),
    };

    Ok(Fill {
        order_id,
        counter_order_id: Some(counter_order_id),
        trade_id: field_u64(data, "id")?,
        symbol,
        price: field_f64(data, "price")?,
        size: field_f64(data, "amount")?,
        fee: 0.0,
        side,
        filled_at: filled_at(data)?,
    })
}

fn field_u64(data: &Value, field: &'static str) -> Result<u64, TranslationError> {
    let value = data.get(field).ok_or(TranslationError::MissingField(field))?;
    parse_flexible_u64(value).map_err(|source| TranslationError::InvalidNumber { field, source })
}

fn field_f64(data: &Value, field: &'static str) -> Result<f64, TranslationError> {
    let value = data.get(field).ok_or(TranslationError::MissingField(field))?;
    parse_flexible_f64(value).map_err(|source| TranslationError::InvalidNumber { field, source })
}

/// `microtimestamp` is microseconds since the epoch, quoted or bare.
fn filled_at(data: &Value) -> Result<DateTime<Utc>, TranslationError> {
    let micros = field_u64(data, "microtimestamp")?;
    i64::try_from(micros)
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .ok_or(TranslationError::InvalidTimestamp(micros))
}
