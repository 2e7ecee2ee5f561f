//! Hyperliquid HTTP client
//!
//! JSON over HTTPS. Order actions are signed with HMAC-SHA256 over the
//! canonical JSON body (hex-encoded, sent alongside the nonce); info
//! requests are unsigned. Prices and sizes travel as strings, as the
//! venue expects.
//!
//! Credentials come from the environment: `HYPERLIQUID_WALLET` (account
//! address) and `HYPERLIQUID_API_SECRET` (signing key).

use crate::adapter::hyperliquid::symbols::QUOTE_ASSET;
use crate::adapter::ExchangeAck;
use crate::core::errors::{AdapterError, NetworkError, Result, ZqError};
use crate::core::types::{
    Balance, Order, OrderStatus, OrderType, Position, Side, TimeInForce, TradingPair,
};
use crate::core::Timestamp;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::str::FromStr;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub api_url: String,
    pub wallet: Option<String>,
    pub api_secret: Option<String>,
    pub timeout: std::time::Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.hyperliquid.xyz".to_string(),
            wallet: std::env::var("HYPERLIQUID_WALLET").ok(),
            api_secret: std::env::var("HYPERLIQUID_API_SECRET").ok(),
            timeout: std::time::Duration::from_secs(10),
        }
    }
}

// -- wire types --------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OrderPayload {
    /// Asset index.
    a: u32,
    /// Buy flag.
    b: bool,
    /// Limit price, as string.
    p: String,
    /// Size, as string.
    s: String,
    /// Reduce only.
    r: bool,
    /// Order type discriminant.
    t: OrderTypePayload,
    /// Client order id.
    c: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum OrderTypePayload {
    Limit {
        tif: String,
    },
    Trigger {
        #[serde(rename = "triggerPx")]
        trigger_px: String,
        #[serde(rename = "isMarket")]
        is_market: bool,
        tpsl: String,
    },
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    status: String,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenOrderRow {
    coin: String,
    side: String,
    #[serde(rename = "limitPx")]
    limit_px: String,
    sz: String,
    oid: u64,
    #[serde(default)]
    cloid: Option<String>,
    #[serde(default)]
    timestamp: i64,
}

pub struct HyperliquidRest {
    config: RestConfig,
    http: reqwest::Client,
}

impl HyperliquidRest {
    pub fn new(config: RestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ZqError::Network(NetworkError::ConnectionFailed(e.to_string())))?;
        Ok(Self { config, http })
    }

    fn wallet(&self) -> Result<&str> {
        self.config.wallet.as_deref().ok_or_else(|| {
            ZqError::Adapter(AdapterError::Unauthorized(
                "HYPERLIQUID_WALLET not configured".into(),
            ))
        })
    }

    /// HMAC-SHA256 over the canonical JSON action, hex encoded.
    fn sign(&self, body: &str) -> Result<String> {
        let secret = self.config.api_secret.as_deref().ok_or_else(|| {
            ZqError::Adapter(AdapterError::Unauthorized(
                "HYPERLIQUID_API_SECRET not configured".into(),
            ))
        })?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ZqError::Adapter(AdapterError::Unauthorized(e.to_string())))?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn map_http_error(err: reqwest::Error) -> ZqError {
        if err.is_timeout() {
            ZqError::Network(NetworkError::Timeout(10_000))
        } else if err.is_connect() {
            ZqError::Network(NetworkError::ConnectionFailed(err.to_string()))
        } else {
            ZqError::Adapter(AdapterError::ServerError(err.to_string()))
        }
    }

    fn map_status(status: reqwest::StatusCode, body: &str) -> Option<ZqError> {
        if status.is_success() {
            return None;
        }
        Some(match status.as_u16() {
            401 | 403 => ZqError::Adapter(AdapterError::Unauthorized(body.to_string())),
            429 => ZqError::Adapter(AdapterError::RateLimitExceeded),
            500..=599 => ZqError::Adapter(AdapterError::ServerError(body.to_string())),
            _ => ZqError::Adapter(AdapterError::InvalidRequest(body.to_string())),
        })
    }

    async fn post_signed(&self, action: serde_json::Value) -> Result<serde_json::Value> {
        let nonce = Timestamp::now().as_millis();
        let canonical = serde_json::to_string(&action)
            .map_err(|e| ZqError::Adapter(AdapterError::InvalidRequest(e.to_string())))?;
        let signature = self.sign(&canonical)?;
        let request = json!({
            "action": action,
            "nonce": nonce,
            "signature": signature,
        });

        let response = self
            .http
            .post(format!("{}/exchange", self.config.api_url))
            .json(&request)
            .send()
            .await
            .map_err(Self::map_http_error)?;
        let status = response.status();
        let body = response.text().await.map_err(Self::map_http_error)?;
        if let Some(err) = Self::map_status(status, &body) {
            return Err(err);
        }
        serde_json::from_str(&body)
            .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))
    }

    async fn post_info(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(format!("{}/info", self.config.api_url))
            .json(&body)
            .send()
            .await
            .map_err(Self::map_http_error)?;
        let status = response.status();
        let text = response.text().await.map_err(Self::map_http_error)?;
        if let Some(err) = Self::map_status(status, &text) {
            return Err(err);
        }
        serde_json::from_str(&text)
            .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))
    }

    /// Map one of our orders into the venue payload.
    ///
    /// Market orders are not native on Hyperliquid: they go out as
    /// IOC limits at the opposite-side best padded by `slippage_bound`.
    pub fn order_payload(
        order: &Order,
        asset: u32,
        opposite_best: Option<Decimal>,
        slippage_bound: Decimal,
    ) -> Result<OrderPayloadBundle> {
        let (price, order_type) = match order.order_type {
            OrderType::Limit | OrderType::StopLimit => {
                let price = order.price.ok_or(ZqError::Business(
                    crate::core::errors::BusinessError::LimitOrderRequiresPrice,
                ))?;
                (price, limit_tif(order.tif)?)
            }
            OrderType::Market => {
                let best = opposite_best.ok_or_else(|| {
                    ZqError::Adapter(AdapterError::InvalidRequest(
                        "no market data to price a market order".into(),
                    ))
                })?;
                let price = match order.side {
                    Side::Buy => best * (Decimal::ONE + slippage_bound),
                    Side::Sell => best * (Decimal::ONE - slippage_bound),
                };
                (price, OrderTypePayload::Limit { tif: "Ioc".into() })
            }
            OrderType::StopMarket | OrderType::Trigger => {
                let trigger = order
                    .trigger_price
                    .or(order.stop_price)
                    .ok_or_else(|| {
                        ZqError::Adapter(AdapterError::InvalidRequest(
                            "trigger order without trigger price".into(),
                        ))
                    })?;
                let is_market = order.order_type == OrderType::StopMarket;
                let tpsl = "sl".to_string();
                (
                    order.price.unwrap_or(trigger),
                    OrderTypePayload::Trigger {
                        trigger_px: trigger.to_string(),
                        is_market,
                        tpsl,
                    },
                )
            }
        };

        Ok(OrderPayloadBundle {
            payload: OrderPayload {
                a: asset,
                b: order.side == Side::Buy,
                p: price.to_string(),
                s: order.qty.to_string(),
                r: order.reduce_only,
                t: order_type,
                c: order.client_order_id.to_string(),
            },
        })
    }

    pub async fn submit(&self, bundle: OrderPayloadBundle) -> Result<ExchangeAck> {
        let action = json!({
            "type": "order",
            "orders": [serde_json::to_value(&bundle.payload)
                .map_err(|e| ZqError::Adapter(AdapterError::InvalidRequest(e.to_string())))?],
            "grouping": "na",
        });
        let response: ExchangeResponse = serde_json::from_value(self.post_signed(action).await?)
            .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))?;
        if response.status != "ok" {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(format!(
                "order rejected: {}",
                response.status
            ))));
        }

        // statuses[0] is either {"resting": {"oid": n}}, {"filled": ...}
        // or {"error": "..."}.
        let status_value = response
            .response
            .as_ref()
            .and_then(|r| r.pointer("/data/statuses/0"))
            .cloned()
            .unwrap_or_default();
        if let Some(err) = status_value.get("error").and_then(|e| e.as_str()) {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(
                err.to_string(),
            )));
        }
        let (oid, status) = if let Some(resting) = status_value.get("resting") {
            (resting.get("oid").and_then(|o| o.as_u64()), OrderStatus::Open)
        } else if let Some(filled) = status_value.get("filled") {
            (filled.get("oid").and_then(|o| o.as_u64()), OrderStatus::Open)
        } else {
            (None, OrderStatus::Submitted)
        };
        let exchange_order_id = oid
            .map(|o| o.to_string())
            .ok_or_else(|| {
                ZqError::Adapter(AdapterError::ServerError(
                    "ack without an order id".into(),
                ))
            })?;
        debug!(oid = %exchange_order_id, "order acknowledged");
        Ok(ExchangeAck {
            exchange_order_id,
            status,
        })
    }

    /// Mid price for one coin, used to price translated market orders.
    pub async fn fetch_mid(&self, coin: &str) -> Result<Decimal> {
        let mids = self.post_info(json!({ "type": "allMids" })).await?;
        parse_decimal(mids.get(coin))
    }

    /// Amend a resting order in place.
    pub async fn modify(&self, oid: u64, bundle: OrderPayloadBundle) -> Result<ExchangeAck> {
        let action = json!({
            "type": "modify",
            "oid": oid,
            "order": serde_json::to_value(&bundle.payload)
                .map_err(|e| ZqError::Adapter(AdapterError::InvalidRequest(e.to_string())))?,
        });
        let response: ExchangeResponse = serde_json::from_value(self.post_signed(action).await?)
            .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))?;
        if response.status != "ok" {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(format!(
                "modify rejected: {}",
                response.status
            ))));
        }
        Ok(ExchangeAck {
            exchange_order_id: oid.to_string(),
            status: OrderStatus::Open,
        })
    }

    pub async fn cancel(&self, asset: u32, oid: u64) -> Result<()> {
        let action = json!({
            "type": "cancel",
            "cancels": [{ "a": asset, "o": oid }],
        });
        let response: ExchangeResponse = serde_json::from_value(self.post_signed(action).await?)
            .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))?;
        if response.status != "ok" {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(format!(
                "cancel rejected: {}",
                response.status
            ))));
        }
        Ok(())
    }

    /// Leverage updates are a known reliability sore spot on this venue:
    /// only an explicit `"status":"ok"` counts as success.
    pub async fn set_leverage(&self, asset: u32, leverage: u32) -> Result<()> {
        let action = json!({
            "type": "updateLeverage",
            "asset": asset,
            "isCross": true,
            "leverage": leverage,
        });
        let response: ExchangeResponse = serde_json::from_value(self.post_signed(action).await?)
            .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))?;
        if response.status != "ok" {
            return Err(ZqError::Adapter(AdapterError::InvalidRequest(format!(
                "leverage update not confirmed: {}",
                response.status
            ))));
        }
        Ok(())
    }

    pub async fn fetch_open_orders(&self) -> Result<Vec<Order>> {
        let wallet = self.wallet()?.to_string();
        let rows: Vec<OpenOrderRow> = serde_json::from_value(
            self.post_info(json!({ "type": "openOrders", "user": wallet }))
                .await?,
        )
        .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            match open_order_row_to_order(&row) {
                Ok(order) => orders.push(order),
                Err(err) => debug!(oid = row.oid, %err, "skipping unparsable open order"),
            }
        }
        Ok(orders)
    }

    pub async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let wallet = self.wallet()?.to_string();
        let state = self
            .post_info(json!({ "type": "clearinghouseState", "user": wallet }))
            .await?;
        let rows = state
            .get("assetPositions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut positions = Vec::new();
        for row in rows {
            let Some(p) = row.get("position") else { continue };
            let coin = p.get("coin").and_then(|c| c.as_str()).unwrap_or_default();
            let szi = parse_decimal(p.get("szi"))?;
            if szi == Decimal::ZERO {
                continue;
            }
            positions.push(Position {
                pair: TradingPair::new(coin, QUOTE_ASSET),
                side: if szi > Decimal::ZERO {
                    Side::Buy
                } else {
                    Side::Sell
                },
                size: szi.abs(),
                entry_price: parse_decimal(p.get("entryPx"))?,
                mark_price: None,
                liquidation_price: parse_decimal(p.get("liquidationPx")).ok(),
                unrealized_pnl: parse_decimal(p.get("unrealizedPnl")).unwrap_or_default(),
                leverage: p
                    .pointer("/leverage/value")
                    .and_then(|v| v.as_u64())
                    .map(Decimal::from)
                    .unwrap_or(Decimal::ONE),
                margin_used: parse_decimal(p.get("marginUsed")).unwrap_or_default(),
                opened_at: Timestamp::now(),
            });
        }
        Ok(positions)
    }

    pub async fn fetch_balances(&self) -> Result<Vec<Balance>> {
        let wallet = self.wallet()?.to_string();
        let state = self
            .post_info(json!({ "type": "clearinghouseState", "user": wallet }))
            .await?;
        let total = parse_decimal(state.pointer("/marginSummary/accountValue"))?;
        let margin_used = parse_decimal(state.pointer("/marginSummary/totalMarginUsed"))
            .unwrap_or_default();
        Ok(vec![Balance {
            asset: QUOTE_ASSET.to_string(),
            total,
            available: total - margin_used,
            locked: margin_used,
            ts: Timestamp::now(),
        }])
    }

    /// Coin universe with asset indices, for the symbol mapper.
    pub async fn fetch_universe(&self) -> Result<Vec<(String, u32)>> {
        let meta = self.post_info(json!({ "type": "meta" })).await?;
        let universe = meta
            .get("universe")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(universe
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                entry
                    .get("name")
                    .and_then(|n| n.as_str())
                    .map(|name| (name.to_string(), i as u32))
            })
            .collect())
    }
}

pub struct OrderPayloadBundle {
    payload: OrderPayload,
}

fn limit_tif(tif: TimeInForce) -> Result<OrderTypePayload> {
    let tif = match tif {
        TimeInForce::Gtc => "Gtc",
        TimeInForce::Ioc => "Ioc",
        TimeInForce::Alo => "Alo",
        TimeInForce::Fok => {
            return Err(ZqError::Adapter(AdapterError::UnsupportedTimeInForce(
                "fok".into(),
            )))
        }
    };
    Ok(OrderTypePayload::Limit { tif: tif.into() })
}

fn parse_decimal(value: Option<&serde_json::Value>) -> Result<Decimal> {
    let raw = value.and_then(|v| v.as_str()).ok_or_else(|| {
        ZqError::Adapter(AdapterError::ServerError("missing numeric field".into()))
    })?;
    Decimal::from_str(raw)
        .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))
}

fn parse_decimal_str(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| ZqError::Adapter(AdapterError::ServerError(e.to_string())))
}

fn open_order_row_to_order(row: &OpenOrderRow) -> Result<Order> {
    let pair = TradingPair::new(row.coin.clone(), QUOTE_ASSET);
    let side = if row.side == "B" { Side::Buy } else { Side::Sell };
    let qty = parse_decimal_str(&row.sz)?;
    let price = parse_decimal_str(&row.limit_px)?;
    let cloid = row
        .cloid
        .clone()
        .unwrap_or_else(|| format!("hl-{}", row.oid));
    let created = Timestamp::from_millis(row.timestamp);

    Ok(Order {
        client_order_id: crate::core::types::OrderId::new(cloid),
        exchange_order_id: Some(row.oid.to_string()),
        pair,
        side,
        order_type: OrderType::Limit,
        tif: TimeInForce::Gtc,
        qty,
        filled_qty: Decimal::ZERO,
        remaining_qty: qty,
        price: Some(price),
        stop_price: None,
        trigger_price: None,
        reduce_only: false,
        status: OrderStatus::Open,
        avg_fill_price: None,
        total_fee: Decimal::ZERO,
        created_at: created,
        submitted_at: Some(created),
        updated_at: created,
        filled_at: None,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OrderId, OrderRequest};
    use rust_decimal_macros::dec;

    fn order(order_type: OrderType, tif: TimeInForce) -> Order {
        let mut request = OrderRequest::limit(
            TradingPair::new("BTC", "USDC"),
            Side::Buy,
            dec!(0.1),
            dec!(50_000),
        );
        request.order_type = order_type;
        request.tif = tif;
        if order_type == OrderType::Market {
            request.price = None;
        }
        Order::from_request(&request, OrderId::new("test-cloid"))
    }

    #[test]
    fn test_limit_payload_shape() {
        let bundle = HyperliquidRest::order_payload(
            &order(OrderType::Limit, TimeInForce::Gtc),
            0,
            None,
            Decimal::ZERO,
        )
        .unwrap();
        let value = serde_json::to_value(&bundle.payload).unwrap();
        assert_eq!(value["a"], 0);
        assert_eq!(value["b"], true);
        assert_eq!(value["p"], "50000");
        assert_eq!(value["s"], "0.1");
        assert_eq!(value["r"], false);
        assert_eq!(value["c"], "test-cloid");
        assert_eq!(value["t"]["limit"]["tif"], "Gtc");
    }

    #[test]
    fn test_fok_unsupported() {
        let result = HyperliquidRest::order_payload(
            &order(OrderType::Limit, TimeInForce::Fok),
            0,
            None,
            Decimal::ZERO,
        );
        assert!(matches!(
            result,
            Err(ZqError::Adapter(AdapterError::UnsupportedTimeInForce(_)))
        ));
    }

    #[test]
    fn test_market_becomes_ioc_limit_with_slippage_bound() {
        let bundle = HyperliquidRest::order_payload(
            &order(OrderType::Market, TimeInForce::Ioc),
            2,
            Some(dec!(50_000)),
            dec!(0.01),
        )
        .unwrap();
        let value = serde_json::to_value(&bundle.payload).unwrap();
        assert_eq!(value["t"]["limit"]["tif"], "Ioc");
        assert_eq!(value["p"], "50500.00");
    }

    #[test]
    fn test_market_without_book_rejected() {
        let result = HyperliquidRest::order_payload(
            &order(OrderType::Market, TimeInForce::Ioc),
            0,
            None,
            Decimal::ZERO,
        );
        assert!(result.is_err());
    }
}
