//! Hyperliquid adapter
//!
//! One adapter exposes both venue capabilities: [`DataProvider`] over the
//! WebSocket stream and [`ExecutionClient`] over the signed HTTP API. All
//! I/O runs on a tokio runtime the adapter owns; results cross back into
//! the core through the data engine's sink and `adapter.*` bus topics,
//! never through shared framework state.
//!
//! While disconnected, up to `buffer_limit` subscription requests are
//! buffered for replay after reconnect; anything beyond that fails with
//! `Disconnected`.

pub mod rest;
pub mod symbols;
pub mod ws;

pub use rest::{HyperliquidRest, RestConfig};
pub use symbols::HyperliquidSymbols;
pub use ws::{HyperliquidWs, WsConfig};

use crate::adapter::{
    Capabilities, DataProvider, ExchangeAck, ExecutionClient, OutboundBuffer, SymbolMapper,
};
use crate::bus::MessageBus;
use crate::core::errors::{AdapterError, BusinessError, Result, ZqError};
use crate::core::types::{
    Balance, Order, OrderChanges, Position, TimeInForce, Timeframe, TradingPair,
};
use crate::data::MarketSink;
use crate::resilience::ShutdownToken;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HyperliquidConfig {
    pub rest: RestConfig,
    pub ws: WsConfig,
    /// Price pad applied when translating market orders to IOC limits.
    pub slippage_bound: Decimal,
    /// Subscription requests buffered across a disconnect.
    pub buffer_limit: usize,
    /// Quantity increment advertised in capabilities.
    pub lot_size: Decimal,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            rest: RestConfig::default(),
            ws: WsConfig::default(),
            slippage_bound: Decimal::new(1, 2), // 1%
            buffer_limit: 16,
            lot_size: Decimal::new(1, 3),
        }
    }
}

#[derive(Debug, Clone)]
struct SubscriptionReq {
    pair: TradingPair,
    timeframe: Option<Timeframe>,
}

pub struct HyperliquidAdapter {
    config: HyperliquidConfig,
    runtime: tokio::runtime::Runtime,
    rest: HyperliquidRest,
    ws: HyperliquidWs,
    symbols: HyperliquidSymbols,
    bus: MessageBus,
    /// Token for the current connection's reader task.
    connection_token: Mutex<ShutdownToken>,
    buffered_subs: OutboundBuffer<SubscriptionReq>,
    sink: Mutex<Option<MarketSink>>,
}

impl HyperliquidAdapter {
    pub fn new(config: HyperliquidConfig, bus: MessageBus) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("hyperliquid-io")
            .build()
            .map_err(|e| {
                ZqError::System(crate::core::errors::SystemError::ResourceExhausted(
                    e.to_string(),
                ))
            })?;
        let rest = HyperliquidRest::new(config.rest.clone())?;
        let ws = HyperliquidWs::new(config.ws.clone());
        let buffer_limit = config.buffer_limit;
        Ok(Arc::new(Self {
            config,
            runtime,
            rest,
            ws,
            symbols: HyperliquidSymbols::new(),
            bus,
            connection_token: Mutex::new(ShutdownToken::new()),
            buffered_subs: OutboundBuffer::new(buffer_limit),
            sink: Mutex::new(None),
        }))
    }

    fn coin_for(&self, pair: &TradingPair) -> Result<String> {
        self.symbols.to_exchange(pair)
    }

    fn asset_for(&self, coin: &str) -> Result<u32> {
        if let Some(asset) = self.symbols.asset_index(coin) {
            return Ok(asset);
        }
        // Lazy universe load: first use, or a coin listed since startup.
        let universe = self.runtime.block_on(self.rest.fetch_universe())?;
        self.symbols.set_universe(universe);
        self.symbols.asset_index(coin).ok_or_else(|| {
            ZqError::Adapter(AdapterError::InvalidRequest(format!(
                "unknown asset {coin}"
            )))
        })
    }

    fn send_subscription(&self, req: &SubscriptionReq) -> Result<()> {
        let coin = self.coin_for(&req.pair)?;
        self.ws.subscribe_channel("l2Book", &coin)?;
        self.ws.subscribe_channel("trades", &coin)?;
        if let Some(timeframe) = req.timeframe {
            self.ws.subscribe_candle(&coin, timeframe.as_str())?;
        }
        Ok(())
    }
}

impl DataProvider for HyperliquidAdapter {
    fn name(&self) -> &str {
        "hyperliquid"
    }

    fn capabilities(&self) -> Capabilities {
        let pairs = Vec::new(); // any listed coin, resolved lazily
        Capabilities {
            pairs,
            timeframes: Timeframe::ALL.to_vec(),
            streaming: true,
            lot_size: self.config.lot_size,
            min_notional: Decimal::TEN,
            supports_market_orders: false,
            supported_tifs: vec![TimeInForce::Gtc, TimeInForce::Ioc, TimeInForce::Alo],
        }
    }

    fn connect(&self, sink: MarketSink) -> Result<()> {
        if self.ws.is_connected() {
            return Ok(());
        }
        let token = ShutdownToken::new();
        *self.connection_token.lock() = token.clone();
        self.ws
            .start(self.runtime.handle(), sink.clone(), self.bus.clone(), token)?;
        *self.sink.lock() = Some(sink);

        match self.runtime.block_on(self.rest.fetch_universe()) {
            Ok(universe) => self.symbols.set_universe(universe),
            Err(err) => warn!(%err, "could not load asset universe"),
        }

        for req in self.buffered_subs.drain() {
            if let Err(err) = self.send_subscription(&req) {
                warn!(pair = %req.pair, %err, "buffered subscription replay failed");
            }
        }
        info!("hyperliquid adapter connected");
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.connection_token.lock().stop();
        self.ws.mark_disconnected();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ws.is_connected()
    }

    fn subscribe(&self, pair: &TradingPair, timeframe: Option<Timeframe>) -> Result<()> {
        let req = SubscriptionReq {
            pair: pair.clone(),
            timeframe,
        };
        if self.ws.is_connected() {
            self.send_subscription(&req)
        } else {
            self.buffered_subs.push(req)
        }
    }

    fn unsubscribe(&self, pair: &TradingPair, timeframe: Option<Timeframe>) -> Result<()> {
        let coin = self.coin_for(pair)?;
        self.ws.unsubscribe_channel("l2Book", &coin)?;
        self.ws.unsubscribe_channel("trades", &coin)?;
        if timeframe.is_some() {
            self.ws.unsubscribe_channel("candle", &coin)?;
        }
        Ok(())
    }
}

impl ExecutionClient for HyperliquidAdapter {
    fn name(&self) -> &str {
        "hyperliquid"
    }

    fn capabilities(&self) -> Capabilities {
        DataProvider::capabilities(self)
    }

    fn submit(&self, order: &Order) -> Result<ExchangeAck> {
        let coin = self.coin_for(&order.pair)?;
        let asset = self.asset_for(&coin)?;
        let opposite_best = match order.order_type {
            crate::core::types::OrderType::Market => {
                Some(self.runtime.block_on(self.rest.fetch_mid(&coin))?)
            }
            _ => None,
        };
        let bundle = HyperliquidRest::order_payload(
            order,
            asset,
            opposite_best,
            self.config.slippage_bound,
        )?;
        self.runtime.block_on(self.rest.submit(bundle))
    }

    fn cancel(&self, order: &Order) -> Result<()> {
        let coin = self.coin_for(&order.pair)?;
        let asset = self.asset_for(&coin)?;
        let oid = order
            .exchange_order_id
            .as_deref()
            .and_then(|o| o.parse::<u64>().ok())
            .ok_or_else(|| {
                ZqError::Business(BusinessError::OrderNotFound(
                    order.client_order_id.to_string(),
                ))
            })?;
        self.runtime.block_on(self.rest.cancel(asset, oid))
    }

    fn modify(&self, order: &Order, changes: &OrderChanges) -> Result<ExchangeAck> {
        let coin = self.coin_for(&order.pair)?;
        let asset = self.asset_for(&coin)?;
        let oid = order
            .exchange_order_id
            .as_deref()
            .and_then(|o| o.parse::<u64>().ok())
            .ok_or_else(|| {
                ZqError::Business(BusinessError::OrderNotFound(
                    order.client_order_id.to_string(),
                ))
            })?;

        let mut amended = order.clone();
        if let Some(price) = changes.price {
            amended.price = Some(price);
        }
        if let Some(qty) = changes.qty {
            amended.qty = qty;
        }
        if let Some(tif) = changes.tif {
            amended.tif = tif;
        }
        let bundle =
            HyperliquidRest::order_payload(&amended, asset, None, self.config.slippage_bound)?;
        self.runtime.block_on(self.rest.modify(oid, bundle))
    }

    fn fetch_open_orders(&self) -> Result<Vec<Order>> {
        self.runtime.block_on(self.rest.fetch_open_orders())
    }

    fn fetch_positions(&self) -> Result<Vec<Position>> {
        self.runtime.block_on(self.rest.fetch_positions())
    }

    fn fetch_balances(&self) -> Result<Vec<Balance>> {
        self.runtime.block_on(self.rest.fetch_balances())
    }

    fn set_leverage(&self, pair: &TradingPair, leverage: u32) -> Result<()> {
        let coin = self.coin_for(pair)?;
        let asset = self.asset_for(&coin)?;
        self.runtime.block_on(self.rest.set_leverage(asset, leverage))
    }

    fn stream_order_updates(&self) -> Result<()> {
        self.ws.subscribe_user_channels()
    }
}

impl std::fmt::Debug for HyperliquidAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidAdapter")
            .field("connected", &self.ws.is_connected())
            .finish()
    }
}
