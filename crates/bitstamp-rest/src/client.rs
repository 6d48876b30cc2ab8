//! Bitstamp REST API client.

use crate::error::BitstampRestError;
use crate::responses::{
    BalanceResult, CancelAllOrdersResult, OpenOrderResult, OrderCancelResult, OrderStatusResult,
    PlaceOrderResult, StreamTokenResponse, TransactionResult,
};
use async_trait::async_trait;
use auth::{ApiCredentials, RequestSigner};
use common::Endpoints;
use connector_core::{ConnectorError, StreamToken, StreamTokenProvider};
use execution_core::{ExecPolicy, OrderSide, OrderType, SharedOrderObserver};
use rest_client::{RestClient, RestError};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Request timeout for Bitstamp API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Value Bitstamp expects for boolean form flags.
const FLAG_TRUE: &str = "True";

/// Parameters of a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderRequest {
    pub side: OrderSide,
    /// Currency pair, e.g. `btcusd`.
    pub symbol: String,
    pub order_type: OrderType,
    /// Amount in base currency.
    pub amount: Decimal,
    /// Limit price, required for limit orders.
    pub price: Option<Decimal>,
    pub exec_policy: ExecPolicy,
}

impl PlaceOrderRequest {
    pub fn limit(side: OrderSide, symbol: &str, amount: Decimal, price: Decimal) -> Self {
        Self {
            side,
            symbol: symbol.to_lowercase(),
            order_type: OrderType::Limit,
            amount,
            price: Some(price),
            exec_policy: ExecPolicy::Default,
        }
    }

    pub fn market(side: OrderSide, symbol: &str, amount: Decimal) -> Self {
        Self {
            side,
            symbol: symbol.to_lowercase(),
            order_type: OrderType::Market,
            amount,
            price: None,
            exec_policy: ExecPolicy::Default,
        }
    }

    pub fn with_exec_policy(mut self, exec_policy: ExecPolicy) -> Self {
        self.exec_policy = exec_policy;
        self
    }

    /// Check the request before it is signed.
    pub fn validate(&self) -> Result<(), BitstampRestError> {
        if self.symbol.is_empty() || !self.symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BitstampRestError::InvalidOrder(format!(
                "invalid symbol {:?}",
                self.symbol
            )));
        }
        if self.amount <= Decimal::ZERO {
            return Err(BitstampRestError::InvalidOrder(
                "amount must be positive".into(),
            ));
        }

        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(BitstampRestError::InvalidOrder(
                "limit order requires a price".into(),
            )),
            (OrderType::Limit, Some(price)) if price <= Decimal::ZERO => Err(
                BitstampRestError::InvalidOrder("price must be positive".into()),
            ),
            (OrderType::Market, Some(_)) => Err(BitstampRestError::InvalidOrder(
                "market order takes no price".into(),
            )),
            (OrderType::Market, None) if self.exec_policy != ExecPolicy::Default => Err(
                BitstampRestError::InvalidOrder("execution policy applies to limit orders".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Endpoint path for this order.
    pub fn path(&self) -> String {
        match self.order_type {
            OrderType::Limit => {
                format!("/api/v2/{}/{}/", self.side.as_bitstamp_str(), self.symbol)
            }
            OrderType::Market => {
                format!("/api/v2/{}/market/{}/", self.side.as_bitstamp_str(), self.symbol)
            }
        }
    }

    /// Form parameters for this order.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("amount", self.amount.normalize().to_string())];

        if let Some(price) = self.price {
            params.push(("price", price.normalize().to_string()));
        }

        if let Some(flag) = self.exec_policy.form_flag() {
            params.push((flag, FLAG_TRUE.to_string()));
        }

        params
    }
}

/// Bitstamp REST API client with authentication support.
///
/// Every order placed through this client is registered with the order
/// observer while the observer's placement lock is held.
pub struct BitstampRestClient {
    client: RestClient,
    credentials: ApiCredentials,
    endpoints: Endpoints,
    observer: SharedOrderObserver,
}

impl BitstampRestClient {
    /// Create a new Bitstamp REST client for production.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        credentials: ApiCredentials,
        observer: SharedOrderObserver,
    ) -> Result<Self, BitstampRestError> {
        Self::with_endpoints(credentials, Endpoints::production(), observer)
    }

    /// Create a new Bitstamp REST client for specific endpoints.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_endpoints(
        credentials: ApiCredentials,
        endpoints: Endpoints,
        observer: SharedOrderObserver,
    ) -> Result<Self, BitstampRestError> {
        let client = RestClient::new(&endpoints.rest_base_url, REQUEST_TIMEOUT)?;

        Ok(Self {
            client,
            credentials,
            endpoints,
            observer,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Get the API key (for logging/debugging).
    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Registry that placed orders are recorded in.
    pub fn observer(&self) -> &SharedOrderObserver {
        &self.observer
    }

    // ========================================================================
    // Order Placement
    // ========================================================================

    /// Place a new order and register its ID with the observer.
    ///
    /// POST /api/v2/{side}/{symbol}/ or /api/v2/{side}/market/{symbol}/
    ///
    /// The observer's placement lock is held from before the request is sent
    /// until the returned ID is registered, and released on every exit path.
    pub async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResult, BitstampRestError> {
        request.validate()?;

        let guard = self.observer.lock().await?;

        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            order_type = ?request.order_type,
            amount = %request.amount,
            price = ?request.price,
            exec_policy = ?request.exec_policy,
            "Placing order"
        );

        let response: PlaceOrderResult = self
            .private_request(&request.path(), &request.params())
            .await?;

        self.observer
            .observe(request.side, &request.symbol, response.id)
            .map_err(|source| {
                tracing::error!(
                    order_id = response.id,
                    error = %source,
                    "Order placed but could not be registered"
                );
                BitstampRestError::ObserveFailed {
                    order_id: response.id,
                    source,
                }
            })?;

        drop(guard);

        tracing::info!(
            order_id = response.id,
            price = response.price,
            amount = response.amount,
            "Order placed"
        );

        Ok(response)
    }

    pub async fn buy_limit_order(
        &self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        exec_policy: ExecPolicy,
    ) -> Result<PlaceOrderResult, BitstampRestError> {
        let request = PlaceOrderRequest::limit(OrderSide::Buy, symbol, amount, price)
            .with_exec_policy(exec_policy);
        self.place_order(&request).await
    }

    pub async fn sell_limit_order(
        &self,
        symbol: &str,
        amount: Decimal,
        price: Decimal,
        exec_policy: ExecPolicy,
    ) -> Result<PlaceOrderResult, BitstampRestError> {
        let request = PlaceOrderRequest::limit(OrderSide::Sell, symbol, amount, price)
            .with_exec_policy(exec_policy);
        self.place_order(&request).await
    }

    pub async fn buy_market_order(
        &self,
        symbol: &str,
        amount: Decimal,
    ) -> Result<PlaceOrderResult, BitstampRestError> {
        self.place_order(&PlaceOrderRequest::market(OrderSide::Buy, symbol, amount))
            .await
    }

    pub async fn sell_market_order(
        &self,
        symbol: &str,
        amount: Decimal,
    ) -> Result<PlaceOrderResult, BitstampRestError> {
        self.place_order(&PlaceOrderRequest::market(OrderSide::Sell, symbol, amount))
            .await
    }

    // ========================================================================
    // Order Management
    // ========================================================================

    /// Cancel an order.
    ///
    /// POST /api/v2/cancel_order/
    ///
    /// The order stays registered with the observer; callers delete it once
    /// they no longer expect fills for it.
    pub async fn cancel_order(&self, order_id: u64) -> Result<OrderCancelResult, BitstampRestError> {
        tracing::info!(order_id, "Canceling order");

        let response: OrderCancelResult = self
            .private_request("/api/v2/cancel_order/", &[("id", order_id.to_string())])
            .await?;

        tracing::info!(order_id = response.id, amount = response.amount, "Order canceled");
        Ok(response)
    }

    /// Cancel every open order.
    ///
    /// POST /api/v2/cancel_all_orders/
    pub async fn cancel_all_orders(&self) -> Result<CancelAllOrdersResult, BitstampRestError> {
        let response: CancelAllOrdersResult =
            self.private_request("/api/v2/cancel_all_orders/", &[]).await?;

        tracing::info!(
            success = response.success,
            canceled = response.canceled.len(),
            "Canceled all orders"
        );
        Ok(response)
    }

    /// Query an order by exchange order ID.
    ///
    /// POST /api/v2/order_status/
    pub async fn get_order_status(
        &self,
        order_id: u64,
    ) -> Result<OrderStatusResult, BitstampRestError> {
        self.private_request("/api/v2/order_status/", &[("id", order_id.to_string())])
            .await
    }

    /// List open orders across all pairs.
    ///
    /// POST /api/v2/open_orders/all/
    pub async fn get_open_orders(&self) -> Result<Vec<OpenOrderResult>, BitstampRestError> {
        self.private_request("/api/v2/open_orders/all/", &[]).await
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// POST /api/v2/balance/
    pub async fn get_balances(&self) -> Result<BalanceResult, BitstampRestError> {
        self.private_request("/api/v2/balance/", &[]).await
    }

    /// POST /api/v2/user_transactions/
    pub async fn get_transactions(&self) -> Result<Vec<TransactionResult>, BitstampRestError> {
        self.private_request("/api/v2/user_transactions/", &[]).await
    }

    /// Obtain a token for the private websocket channels.
    ///
    /// POST /api/v2/websockets_token/
    pub async fn generate_stream_token(&self) -> Result<StreamTokenResponse, BitstampRestError> {
        let response: StreamTokenResponse =
            self.private_request("/api/v2/websockets_token/", &[]).await?;

        tracing::debug!(
            user_id = response.user_id,
            valid_sec = ?response.valid_sec,
            "Stream token generated"
        );
        Ok(response)
    }

    // ========================================================================
    // Signing
    // ========================================================================

    /// Sign and send one private request, then decode the response.
    async fn private_request<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, BitstampRestError> {
        let body = encode_form(params)?;

        let signer = RequestSigner::new(&self.credentials);
        let signed = signer.sign_request(
            self.endpoints.rest_host(),
            path,
            &body,
            chrono::Utc::now().timestamp_millis(),
        )?;
        let headers = signed.headers();

        let body = (!body.is_empty()).then_some(body.as_str());
        let text = match self.client.post_form(path, body, &headers).await {
            Ok(text) => text,
            Err(RestError::HttpError { status, message }) => {
                return Err(BitstampRestError::from_api_response(&message)
                    .unwrap_or(BitstampRestError::Rest(RestError::HttpError { status, message })));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(err) = BitstampRestError::from_api_response(&text) {
            tracing::warn!(path = %path, error = %err, "Bitstamp API error");
            return Err(err);
        }

        serde_json::from_str(&text).map_err(|e| {
            tracing::warn!(path = %path, body = %text, error = %e, "Failed to parse response");
            BitstampRestError::Parse(e.to_string())
        })
    }
}

/// Url-encode form parameters with keys in sorted order.
fn encode_form(params: &[(&str, String)]) -> Result<String, BitstampRestError> {
    let mut sorted: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    serde_urlencoded::to_string(&sorted).map_err(|e| BitstampRestError::Parse(e.to_string()))
}

#[async_trait]
impl StreamTokenProvider for BitstampRestClient {
    async fn generate_stream_token(&self) -> Result<StreamToken, ConnectorError> {
        let response = BitstampRestClient::generate_stream_token(self)
            .await
            .map_err(|e| ConnectorError::Auth(e.to_string()))?;

        Ok(StreamToken {
            token: response.token,
            user_id: response.user_id,
        })
    }
}

impl std::fmt::Debug for BitstampRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitstampRestClient")
            .field("endpoints", &self.endpoints)
            .field("api_key", &self.credentials.api_key())
            .field("observed_orders", &self.observer.len())
            .finish()
    }
}
