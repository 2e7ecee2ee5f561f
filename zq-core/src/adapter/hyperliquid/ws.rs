//! Hyperliquid WebSocket stream
//!
//! One socket multiplexes every subscription channel the venue offers:
//! `l2Book`, `trades`, `candle` for market data, `orderUpdates` and
//! `userFills` for the account stream. Market data goes into the data
//! engine's sink; account events are published as `adapter.*` bus topics
//! for the execution engine to reconcile.
//!
//! The reader task polls the shared shutdown token at every suspension
//! point (reads are bounded by a one second timeout) and pings the venue
//! periodically to keep the connection alive.

use crate::bus::{Event, MessageBus, OrderUpdate};
use crate::core::errors::{AdapterError, NetworkError, Result, ZqError};
use crate::core::types::{
    Candle, Fill, MarketTrade, OrderId, OrderStatus, Quote, Side, Timeframe, TradingPair,
};
use crate::core::Timestamp;
use crate::data::MarketSink;
use crate::resilience::ShutdownToken;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::symbols::QUOTE_ASSET;

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub ws_url: String,
    pub wallet: Option<String>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://api.hyperliquid.xyz/ws".to_string(),
            wallet: std::env::var("HYPERLIQUID_WALLET").ok(),
        }
    }
}

pub struct HyperliquidWs {
    config: WsConfig,
    connected: Arc<AtomicBool>,
    outgoing: Mutex<Option<tokio::sync::mpsc::UnboundedSender<String>>>,
}

impl HyperliquidWs {
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            outgoing: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue a raw message (subscription request) for the socket.
    pub fn send(&self, message: serde_json::Value) -> Result<()> {
        let guard = self.outgoing.lock();
        match guard.as_ref() {
            Some(tx) => tx
                .send(message.to_string())
                .map_err(|_| ZqError::Adapter(AdapterError::Disconnected)),
            None => Err(ZqError::Adapter(AdapterError::Disconnected)),
        }
    }

    pub fn subscribe_channel(&self, channel: &str, coin: &str) -> Result<()> {
        self.send(json!({
            "method": "subscribe",
            "subscription": { "type": channel, "coin": coin },
        }))
    }

    pub fn subscribe_candle(&self, coin: &str, interval: &str) -> Result<()> {
        self.send(json!({
            "method": "subscribe",
            "subscription": { "type": "candle", "coin": coin, "interval": interval },
        }))
    }

    pub fn subscribe_user_channels(&self) -> Result<()> {
        let wallet = self.config.wallet.clone().ok_or_else(|| {
            ZqError::Adapter(AdapterError::Unauthorized(
                "HYPERLIQUID_WALLET not configured".into(),
            ))
        })?;
        self.send(json!({
            "method": "subscribe",
            "subscription": { "type": "orderUpdates", "user": wallet },
        }))?;
        self.send(json!({
            "method": "subscribe",
            "subscription": { "type": "userFills", "user": wallet },
        }))
    }

    pub fn unsubscribe_channel(&self, channel: &str, coin: &str) -> Result<()> {
        self.send(json!({
            "method": "unsubscribe",
            "subscription": { "type": channel, "coin": coin },
        }))
    }

    /// Connect and spawn the reader task on the adapter's runtime.
    pub fn start(
        &self,
        handle: &tokio::runtime::Handle,
        sink: MarketSink,
        bus: MessageBus,
        shutdown: ShutdownToken,
    ) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let url = self.config.ws_url.clone();
        let stream = handle
            .block_on(async { tokio_tungstenite::connect_async(url.as_str()).await })
            .map_err(|e| ZqError::Network(NetworkError::ConnectionFailed(e.to_string())))?
            .0;
        info!(url = %self.config.ws_url, "hyperliquid websocket connected");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        *self.outgoing.lock() = Some(tx);
        self.connected.store(true, Ordering::Release);

        let connected = Arc::clone(&self.connected);
        handle.spawn(async move {
            let (mut writer, mut reader) = stream.split();
            let mut last_ping = std::time::Instant::now();

            loop {
                if shutdown.is_stopped() {
                    let _ = writer.send(Message::Close(None)).await;
                    break;
                }
                // Flush queued subscription requests.
                while let Ok(outgoing) = rx.try_recv() {
                    if writer.send(Message::Text(outgoing)).await.is_err() {
                        break;
                    }
                }
                if last_ping.elapsed() > Duration::from_secs(30) {
                    last_ping = std::time::Instant::now();
                    let _ = writer
                        .send(Message::Text(json!({"method": "ping"}).to_string()))
                        .await;
                }

                // Bounded read so the shutdown token is polled regularly.
                match tokio::time::timeout(Duration::from_secs(1), reader.next()).await {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        handle_message(&text, &sink, &bus);
                    }
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        let _ = writer.send(Message::Pong(payload)).await;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(err))) => {
                        warn!(%err, "websocket read failed");
                        break;
                    }
                    Ok(None) => {
                        warn!("websocket closed by venue");
                        break;
                    }
                    Err(_) => {} // read timeout, loop to poll shutdown
                }
            }
            connected.store(false, Ordering::Release);
            info!("hyperliquid websocket reader stopped");
        });
        Ok(())
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        *self.outgoing.lock() = None;
    }
}

impl std::fmt::Debug for HyperliquidWs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidWs")
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn handle_message(text: &str, sink: &MarketSink, bus: &MessageBus) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        debug!("unparsable websocket frame");
        return;
    };
    let channel = value.get("channel").and_then(|c| c.as_str()).unwrap_or("");
    let data = value.get("data").cloned().unwrap_or_default();

    match channel {
        "l2Book" => {
            if let Some(quote) = parse_l2_book(&data) {
                sink.push_quote(quote);
            }
        }
        "trades" => {
            for trade in parse_trades(&data) {
                sink.push_trade(trade);
            }
        }
        "candle" => {
            if let Some(candle) = parse_candle(&data) {
                sink.push_candle(candle);
            }
        }
        "orderUpdates" => {
            for update in parse_order_updates(&data) {
                bus.publish("adapter.order_update", Event::OrderUpdate(update));
            }
        }
        "userFills" => {
            for fill in parse_user_fills(&data) {
                bus.publish("adapter.fill", Event::Fill(fill));
            }
        }
        "subscriptionResponse" | "pong" | "" => {}
        other => debug!(channel = other, "ignoring websocket channel"),
    }
}

fn dec_field(value: &serde_json::Value, key: &str) -> Option<Decimal> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| Decimal::from_str(s).ok())
}

fn parse_l2_book(data: &serde_json::Value) -> Option<Quote> {
    let coin = data.get("coin")?.as_str()?;
    let levels = data.get("levels")?.as_array()?;
    let bids = levels.first()?.as_array()?;
    let asks = levels.get(1)?.as_array()?;
    let best_bid = bids.first()?;
    let best_ask = asks.first()?;
    let time_ms = data.get("time").and_then(|t| t.as_i64())?;

    Some(Quote {
        pair: TradingPair::new(coin, QUOTE_ASSET),
        bid: dec_field(best_bid, "px")?,
        ask: dec_field(best_ask, "px")?,
        bid_size: dec_field(best_bid, "sz")?,
        ask_size: dec_field(best_ask, "sz")?,
        ts: Timestamp::from_millis(time_ms),
    })
}

fn parse_trades(data: &serde_json::Value) -> Vec<MarketTrade> {
    let Some(rows) = data.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(MarketTrade {
                pair: TradingPair::new(row.get("coin")?.as_str()?, QUOTE_ASSET),
                side: if row.get("side")?.as_str()? == "B" {
                    Side::Buy
                } else {
                    Side::Sell
                },
                price: dec_field(row, "px")?,
                qty: dec_field(row, "sz")?,
                ts: Timestamp::from_millis(row.get("time")?.as_i64()?),
            })
        })
        .collect()
}

fn parse_candle(data: &serde_json::Value) -> Option<Candle> {
    let coin = data.get("s")?.as_str()?;
    let interval = data.get("i")?.as_str()?;
    let timeframe = Timeframe::from_str(interval).ok()?;
    Some(Candle {
        pair: TradingPair::new(coin, QUOTE_ASSET),
        timeframe,
        open: dec_field(data, "o")?,
        high: dec_field(data, "h")?,
        low: dec_field(data, "l")?,
        close: dec_field(data, "c")?,
        volume: dec_field(data, "v")?,
        open_ts: Timestamp::from_millis(data.get("t")?.as_i64()?),
    })
}

fn map_order_status(raw: &str) -> Option<OrderStatus> {
    match raw {
        "open" => Some(OrderStatus::Open),
        "filled" => Some(OrderStatus::Filled),
        "canceled" => Some(OrderStatus::Canceled),
        "rejected" => Some(OrderStatus::Rejected),
        "triggered" => Some(OrderStatus::Triggered),
        "marginCanceled" => Some(OrderStatus::MarginCanceled),
        other => {
            debug!(status = other, "unknown order status from venue");
            None
        }
    }
}

fn parse_order_updates(data: &serde_json::Value) -> Vec<OrderUpdate> {
    let Some(rows) = data.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let order = row.get("order")?;
            let cloid = order.get("cloid")?.as_str()?;
            let status = map_order_status(row.get("status")?.as_str()?)?;
            let orig = dec_field(order, "origSz");
            let remaining = dec_field(order, "sz");
            let filled = match (orig, remaining) {
                (Some(orig), Some(remaining)) => Some(orig - remaining),
                _ => None,
            };
            Some(OrderUpdate {
                client_order_id: OrderId::new(cloid),
                exchange_order_id: order.get("oid").and_then(|o| o.as_u64()).map(|o| o.to_string()),
                status,
                filled_qty: filled,
                avg_fill_price: None,
                ts: row
                    .get("statusTimestamp")
                    .and_then(|t| t.as_i64())
                    .map(Timestamp::from_millis)
                    .unwrap_or_else(Timestamp::now),
            })
        })
        .collect()
}

fn parse_user_fills(data: &serde_json::Value) -> Vec<Fill> {
    let Some(rows) = data.get("fills").and_then(|f| f.as_array()) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let cloid = row.get("cloid")?.as_str()?;
            Some(Fill {
                client_order_id: OrderId::new(cloid),
                pair: TradingPair::new(row.get("coin")?.as_str()?, QUOTE_ASSET),
                side: if row.get("side")?.as_str()? == "B" {
                    Side::Buy
                } else {
                    Side::Sell
                },
                qty: dec_field(row, "sz")?,
                price: dec_field(row, "px")?,
                fee: dec_field(row, "fee").unwrap_or(Decimal::ZERO),
                ts: Timestamp::from_millis(row.get("time")?.as_i64()?),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_l2_book() {
        let data = serde_json::json!({
            "coin": "BTC",
            "levels": [
                [{ "px": "49999.0", "sz": "1.5", "n": 3 }],
                [{ "px": "50001.0", "sz": "2.0", "n": 2 }]
            ],
            "time": 1700000000000i64,
        });
        let quote = parse_l2_book(&data).unwrap();
        assert_eq!(quote.pair, TradingPair::new("BTC", "USDC"));
        assert_eq!(quote.bid, dec!(49999.0));
        assert_eq!(quote.ask, dec!(50001.0));
        assert_eq!(quote.bid_size, dec!(1.5));
    }

    #[test]
    fn test_parse_candle() {
        let data = serde_json::json!({
            "s": "ETH",
            "i": "1m",
            "o": "3000.0",
            "h": "3010.0",
            "l": "2990.0",
            "c": "3005.0",
            "v": "120.5",
            "t": 1700000040000i64,
        });
        let candle = parse_candle(&data).unwrap();
        assert_eq!(candle.timeframe, Timeframe::M1);
        assert_eq!(candle.close, dec!(3005.0));
    }

    #[test]
    fn test_parse_order_update_with_fill_progress() {
        let data = serde_json::json!([{
            "order": {
                "coin": "BTC",
                "oid": 77,
                "cloid": "abc123",
                "origSz": "1.0",
                "sz": "0.4",
            },
            "status": "open",
            "statusTimestamp": 1700000000000i64,
        }]);
        let updates = parse_order_updates(&data);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].client_order_id, OrderId::new("abc123"));
        assert_eq!(updates[0].exchange_order_id.as_deref(), Some("77"));
        assert_eq!(updates[0].filled_qty, Some(dec!(0.6)));
        assert_eq!(updates[0].status, OrderStatus::Open);
    }

    #[test]
    fn test_fills_without_cloid_skipped() {
        let data = serde_json::json!({
            "fills": [
                { "coin": "BTC", "px": "50000", "sz": "0.1", "side": "B", "time": 1700000000000i64 },
                { "coin": "BTC", "px": "50000", "sz": "0.1", "side": "B", "time": 1700000000000i64, "cloid": "keepme", "fee": "0.5" }
            ]
        });
        let fills = parse_user_fills(&data);
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].client_order_id, OrderId::new("keepme"));
        assert_eq!(fills[0].fee, dec!(0.5));
    }
}
