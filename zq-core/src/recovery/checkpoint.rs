//! Checkpoint binary format
//!
//! Little-endian layout, CRC32 over everything before the trailing
//! checksum field:
//!
//! ```text
//! u32  version (=1)
//! i64  timestamp_ns
//! AccountState  { 5 x Decimal }
//! u32  position_count
//! repeat PositionState { str id, str symbol, u8 side,
//!                        Decimal qty, entry_price, unrealized_pnl,
//!                        i64 opened_at_ns }
//! u32  order_count
//! repeat OrderState { str client_order_id, str symbol, u8 side,
//!                     u8 order_type, Decimal qty, filled_qty,
//!                     opt<Decimal> price, u8 status, i64 created_at_ns }
//! u32  crc32
//! ```
//!
//! Strings are u16 length + UTF-8 bytes; a Decimal is i128 mantissa +
//! u8 scale; an optional Decimal is a u8 flag followed by the payload
//! when the flag is 1. A file whose CRC does not validate is ignored.

use crate::core::decimal::{from_parts, to_parts};
use crate::core::errors::{DataError, Result, ZqError};
use crate::core::types::{OrderStatus, OrderType, Side};
use rust_decimal::Decimal;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountState {
    pub equity: Decimal,
    pub balance: Decimal,
    pub available: Decimal,
    pub margin_used: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionState {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub opened_at_ns: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderState {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub filled_qty: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at_ns: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp_ns: i64,
    pub account: AccountState,
    pub positions: Vec<PositionState>,
    pub orders: Vec<OrderState>,
}

// -- enum codes -------------------------------------------------------------

fn side_code(side: Side) -> u8 {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

fn side_from(code: u8) -> Result<Side> {
    match code {
        0 => Ok(Side::Buy),
        1 => Ok(Side::Sell),
        other => Err(invalid(format!("unknown side code {other}"))),
    }
}

fn order_type_code(order_type: OrderType) -> u8 {
    match order_type {
        OrderType::Limit => 0,
        OrderType::Market => 1,
        OrderType::StopMarket => 2,
        OrderType::StopLimit => 3,
        OrderType::Trigger => 4,
    }
}

fn order_type_from(code: u8) -> Result<OrderType> {
    match code {
        0 => Ok(OrderType::Limit),
        1 => Ok(OrderType::Market),
        2 => Ok(OrderType::StopMarket),
        3 => Ok(OrderType::StopLimit),
        4 => Ok(OrderType::Trigger),
        other => Err(invalid(format!("unknown order type code {other}"))),
    }
}

fn status_code(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Submitted => 1,
        OrderStatus::Open => 2,
        OrderStatus::PartiallyFilled => 3,
        OrderStatus::Filled => 4,
        OrderStatus::Canceled => 5,
        OrderStatus::Rejected => 6,
        OrderStatus::Triggered => 7,
        OrderStatus::Expired => 8,
        OrderStatus::MarginCanceled => 9,
    }
}

fn status_from(code: u8) -> Result<OrderStatus> {
    match code {
        0 => Ok(OrderStatus::Pending),
        1 => Ok(OrderStatus::Submitted),
        2 => Ok(OrderStatus::Open),
        3 => Ok(OrderStatus::PartiallyFilled),
        4 => Ok(OrderStatus::Filled),
        5 => Ok(OrderStatus::Canceled),
        6 => Ok(OrderStatus::Rejected),
        7 => Ok(OrderStatus::Triggered),
        8 => Ok(OrderStatus::Expired),
        9 => Ok(OrderStatus::MarginCanceled),
        other => Err(invalid(format!("unknown status code {other}"))),
    }
}

fn invalid(msg: String) -> ZqError {
    ZqError::Data(DataError::InvalidFormat(msg))
}

// -- writer -----------------------------------------------------------------

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn decimal(&mut self, d: Decimal) {
        let (mantissa, scale) = to_parts(d);
        self.buf.extend_from_slice(&mantissa.to_le_bytes());
        self.u8(scale);
    }

    fn opt_decimal(&mut self, d: Option<Decimal>) {
        match d {
            Some(d) => {
                self.u8(1);
                self.decimal(d);
            }
            None => self.u8(0),
        }
    }

    fn string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.buf
            .extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(bytes);
    }
}

// -- reader -----------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(invalid("truncated checkpoint".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(i64::from_le_bytes(bytes))
    }

    fn decimal(&mut self) -> Result<Decimal> {
        let b = self.take(16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(b);
        let mantissa = i128::from_le_bytes(bytes);
        let scale = self.u8()?;
        Ok(from_parts(mantissa, scale))
    }

    fn opt_decimal(&mut self) -> Result<Option<Decimal>> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.decimal()?)),
            other => Err(invalid(format!("bad option flag {other}"))),
        }
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| invalid("checkpoint string is not UTF-8".into()))
    }
}

// -- codec ------------------------------------------------------------------

impl Checkpoint {
    pub fn new(account: AccountState, positions: Vec<PositionState>, orders: Vec<OrderState>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            timestamp_ns: crate::core::Timestamp::now().as_ns(),
            account,
            positions,
            orders,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(self.version);
        w.i64(self.timestamp_ns);

        w.decimal(self.account.equity);
        w.decimal(self.account.balance);
        w.decimal(self.account.available);
        w.decimal(self.account.margin_used);
        w.decimal(self.account.unrealized_pnl);

        w.u32(self.positions.len() as u32);
        for p in &self.positions {
            w.string(&p.id);
            w.string(&p.symbol);
            w.u8(side_code(p.side));
            w.decimal(p.qty);
            w.decimal(p.entry_price);
            w.decimal(p.unrealized_pnl);
            w.i64(p.opened_at_ns);
        }

        w.u32(self.orders.len() as u32);
        for o in &self.orders {
            w.string(&o.client_order_id);
            w.string(&o.symbol);
            w.u8(side_code(o.side));
            w.u8(order_type_code(o.order_type));
            w.decimal(o.qty);
            w.decimal(o.filled_qty);
            w.opt_decimal(o.price);
            w.u8(status_code(o.status));
            w.i64(o.created_at_ns);
        }

        let crc = crc32fast::hash(&w.buf);
        w.u32(crc);
        w.buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(invalid("checkpoint too short".into()));
        }
        let (payload, crc_bytes) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(payload) != stored {
            return Err(ZqError::Data(DataError::ChecksumMismatch));
        }

        let mut r = Reader::new(payload);
        let version = r.u32()?;
        if version != CHECKPOINT_VERSION {
            return Err(invalid(format!("unsupported checkpoint version {version}")));
        }
        let timestamp_ns = r.i64()?;

        let account = AccountState {
            equity: r.decimal()?,
            balance: r.decimal()?,
            available: r.decimal()?,
            margin_used: r.decimal()?,
            unrealized_pnl: r.decimal()?,
        };

        let position_count = r.u32()? as usize;
        let mut positions = Vec::with_capacity(position_count.min(65_536));
        for _ in 0..position_count {
            positions.push(PositionState {
                id: r.string()?,
                symbol: r.string()?,
                side: side_from(r.u8()?)?,
                qty: r.decimal()?,
                entry_price: r.decimal()?,
                unrealized_pnl: r.decimal()?,
                opened_at_ns: r.i64()?,
            });
        }

        let order_count = r.u32()? as usize;
        let mut orders = Vec::with_capacity(order_count.min(65_536));
        for _ in 0..order_count {
            orders.push(OrderState {
                client_order_id: r.string()?,
                symbol: r.string()?,
                side: side_from(r.u8()?)?,
                order_type: order_type_from(r.u8()?)?,
                qty: r.decimal()?,
                filled_qty: r.decimal()?,
                price: r.opt_decimal()?,
                status: status_from(r.u8()?)?,
                created_at_ns: r.i64()?,
            });
        }

        if r.pos != payload.len() {
            return Err(invalid("trailing bytes after checkpoint body".into()));
        }

        Ok(Self {
            version,
            timestamp_ns,
            account,
            positions,
            orders,
        })
    }
}
