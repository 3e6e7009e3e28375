//! Packed little-endian wire messages
//!
//! Every message starts with a fixed 16-byte [`MessageHeader`] followed by a
//! type-specific body. Numeric fields are little-endian two's-complement or
//! IEEE-754 doubles; strings are fixed-width, NUL-padded. Messages are
//! always sent and received whole, so decoders treat a short buffer as a
//! protocol fault rather than a retry condition.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::clock::Clock;
use crate::errors::WireError;
use crate::types::{
    BookSide, BookUpdateType, ControlAction, ExecutionType, LogLevel, MetricKind, OrderType,
    RiskLevel, SignalAction, Symbol,
};

/// Message type discriminator carried in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    MarketData = 1,
    TradingSignal = 2,
    OrderRequest = 3,
    OrderExecution = 4,
    PositionUpdate = 5,
    RiskAlert = 6,
    LogMessage = 7,
    ControlCommand = 8,
    SystemStatus = 9,
    OrderBookUpdate = 10,
    MetricsSnapshot = 11,
}

impl TryFrom<u16> for MessageType {
    type Error = WireError;

    fn try_from(v: u16) -> Result<Self, WireError> {
        Ok(match v {
            1 => Self::MarketData,
            2 => Self::TradingSignal,
            3 => Self::OrderRequest,
            4 => Self::OrderExecution,
            5 => Self::PositionUpdate,
            6 => Self::RiskAlert,
            7 => Self::LogMessage,
            8 => Self::ControlCommand,
            9 => Self::SystemStatus,
            10 => Self::OrderBookUpdate,
            11 => Self::MetricsSnapshot,
            other => {
                return Err(WireError::InvalidEnum {
                    field: "MessageType",
                    value: other,
                });
            }
        })
    }
}

/// Common header: `{type: u16, sequence: u32, timestamp_ns: u64, payload_size: u16}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub payload_size: u16,
}

/// Encoded size of [`MessageHeader`].
pub const HEADER_LEN: usize = 16;

impl MessageHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.msg_type as u16).to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&self.payload_size.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        let msg_type = MessageType::try_from(cur.read_u16::<LittleEndian>()?)?;
        let sequence = cur.read_u32::<LittleEndian>()?;
        let timestamp_ns = cur.read_u64::<LittleEndian>()?;
        let payload_size = cur.read_u16::<LittleEndian>()?;
        Ok(Self {
            msg_type,
            sequence,
            timestamp_ns,
            payload_size,
        })
    }
}

fn write_fixed_str(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width.saturating_sub(1));
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (width - n), 0);
}

fn read_fixed_str<R: Read>(cur: &mut R, width: usize) -> Result<String, WireError> {
    let mut buf = vec![0u8; width];
    cur.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(width);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

fn read_symbol<R: Read>(cur: &mut R) -> Result<Symbol, WireError> {
    let mut buf = [0u8; 16];
    cur.read_exact(&mut buf)?;
    Ok(Symbol::from_wire(&buf))
}

/// A record that can be framed behind a [`MessageHeader`].
pub trait WireRecord: Sized {
    const TYPE: MessageType;

    /// Body length in bytes, excluding the header.
    fn body_len(&self) -> usize;
    fn encode_body(&self, out: &mut Vec<u8>);
    fn decode_body(buf: &[u8]) -> Result<Self, WireError>;

    /// Frame the record behind an explicit header.
    fn encode_with_header(&self, header: MessageHeader) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body_len());
        header.encode(&mut out);
        self.encode_body(&mut out);
        out
    }
}

/// Normalized top-of-book tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarketData {
    pub symbol: Symbol,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_size: u32,
    pub ask_size: u32,
    pub last_price: f64,
    pub last_size: u32,
    pub exchange_timestamp: u64,
}

impl MarketData {
    /// Structural validity: `bid <= ask` whenever both sides are present.
    pub fn is_valid(&self) -> bool {
        if self.symbol.is_empty() {
            return false;
        }
        if self.bid_price > 0.0 && self.ask_price > 0.0 {
            return self.bid_price <= self.ask_price;
        }
        true
    }

    pub fn mid_price(&self) -> f64 {
        if self.bid_price > 0.0 && self.ask_price > 0.0 {
            (self.bid_price + self.ask_price) / 2.0
        } else {
            self.last_price
        }
    }
}

impl WireRecord for MarketData {
    const TYPE: MessageType = MessageType::MarketData;

    fn body_len(&self) -> usize {
        60
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.symbol.as_wire());
        out.extend_from_slice(&self.bid_price.to_le_bytes());
        out.extend_from_slice(&self.ask_price.to_le_bytes());
        out.extend_from_slice(&self.bid_size.to_le_bytes());
        out.extend_from_slice(&self.ask_size.to_le_bytes());
        out.extend_from_slice(&self.last_price.to_le_bytes());
        out.extend_from_slice(&self.last_size.to_le_bytes());
        out.extend_from_slice(&self.exchange_timestamp.to_le_bytes());
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            symbol: read_symbol(&mut cur)?,
            bid_price: cur.read_f64::<LittleEndian>()?,
            ask_price: cur.read_f64::<LittleEndian>()?,
            bid_size: cur.read_u32::<LittleEndian>()?,
            ask_size: cur.read_u32::<LittleEndian>()?,
            last_price: cur.read_f64::<LittleEndian>()?,
            last_size: cur.read_u32::<LittleEndian>()?,
            exchange_timestamp: cur.read_u64::<LittleEndian>()?,
        })
    }
}

/// Strategy output routed to the order gateway.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TradingSignal {
    pub symbol: Symbol,
    pub action: SignalAction,
    pub order_type: OrderType,
    pub price: f64,
    pub quantity: u32,
    pub strategy_id: u64,
    pub confidence: f64,
}

impl TradingSignal {
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.quantity > 0
            && (0.0..=1.0).contains(&self.confidence)
            && (self.order_type != OrderType::Limit || self.price > 0.0)
    }
}

impl WireRecord for TradingSignal {
    const TYPE: MessageType = MessageType::TradingSignal;

    fn body_len(&self) -> usize {
        46
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.symbol.as_wire());
        out.push(self.action.as_u8());
        out.push(self.order_type.as_u8());
        out.extend_from_slice(&self.price.to_le_bytes());
        out.extend_from_slice(&self.quantity.to_le_bytes());
        out.extend_from_slice(&self.strategy_id.to_le_bytes());
        out.extend_from_slice(&self.confidence.to_le_bytes());
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            symbol: read_symbol(&mut cur)?,
            action: SignalAction::try_from(cur.read_u8()?)?,
            order_type: OrderType::try_from(cur.read_u8()?)?,
            price: cur.read_f64::<LittleEndian>()?,
            quantity: cur.read_u32::<LittleEndian>()?,
            strategy_id: cur.read_u64::<LittleEndian>()?,
            confidence: cur.read_f64::<LittleEndian>()?,
        })
    }
}

/// Execution report from the gateway, broker adapter or fill simulator.
///
/// `exec_seq` increases strictly per order so duplicate deliveries can be
/// recognized and ignored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrderExecution {
    pub order_id: u64,
    pub symbol: Symbol,
    pub exec_type: ExecutionType,
    /// Which way the order traded; drives signed position updates.
    pub side: SignalAction,
    pub exec_seq: u32,
    pub fill_price: f64,
    pub fill_quantity: u32,
    pub remaining_quantity: u32,
    pub commission: f64,
}

impl OrderExecution {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.exec_type,
            ExecutionType::Fill | ExecutionType::Cancelled | ExecutionType::Rejected
        )
    }
}

impl WireRecord for OrderExecution {
    const TYPE: MessageType = MessageType::OrderExecution;

    fn body_len(&self) -> usize {
        54
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.order_id.to_le_bytes());
        out.extend_from_slice(self.symbol.as_wire());
        out.push(self.exec_type.as_u8());
        out.push(self.side.as_u8());
        out.extend_from_slice(&self.exec_seq.to_le_bytes());
        out.extend_from_slice(&self.fill_price.to_le_bytes());
        out.extend_from_slice(&self.fill_quantity.to_le_bytes());
        out.extend_from_slice(&self.remaining_quantity.to_le_bytes());
        out.extend_from_slice(&self.commission.to_le_bytes());
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            order_id: cur.read_u64::<LittleEndian>()?,
            symbol: read_symbol(&mut cur)?,
            exec_type: ExecutionType::try_from(cur.read_u8()?)?,
            side: SignalAction::try_from(cur.read_u8()?)?,
            exec_seq: cur.read_u32::<LittleEndian>()?,
            fill_price: cur.read_f64::<LittleEndian>()?,
            fill_quantity: cur.read_u32::<LittleEndian>()?,
            remaining_quantity: cur.read_u32::<LittleEndian>()?,
            commission: cur.read_f64::<LittleEndian>()?,
        })
    }
}

/// Position snapshot published after every change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionUpdate {
    pub symbol: Symbol,
    pub position: i32,
    pub average_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub market_value: f64,
}

impl WireRecord for PositionUpdate {
    const TYPE: MessageType = MessageType::PositionUpdate;

    fn body_len(&self) -> usize {
        52
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.symbol.as_wire());
        out.extend_from_slice(&self.position.to_le_bytes());
        out.extend_from_slice(&self.average_price.to_le_bytes());
        out.extend_from_slice(&self.unrealized_pnl.to_le_bytes());
        out.extend_from_slice(&self.realized_pnl.to_le_bytes());
        out.extend_from_slice(&self.market_value.to_le_bytes());
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            symbol: read_symbol(&mut cur)?,
            position: cur.read_i32::<LittleEndian>()?,
            average_price: cur.read_f64::<LittleEndian>()?,
            unrealized_pnl: cur.read_f64::<LittleEndian>()?,
            realized_pnl: cur.read_f64::<LittleEndian>()?,
            market_value: cur.read_f64::<LittleEndian>()?,
        })
    }
}

/// A single L2 level change keyed by the vendor's sequence number.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrderBookUpdate {
    pub symbol: Symbol,
    pub update_type: BookUpdateType,
    pub side: BookSide,
    pub price: f64,
    pub size: u32,
    pub order_count: u32,
    pub sequence: u64,
    pub exchange_timestamp: u64,
}

impl WireRecord for OrderBookUpdate {
    const TYPE: MessageType = MessageType::OrderBookUpdate;

    fn body_len(&self) -> usize {
        50
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.symbol.as_wire());
        out.push(self.update_type.as_u8());
        out.push(self.side.as_u8());
        out.extend_from_slice(&self.price.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.order_count.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.exchange_timestamp.to_le_bytes());
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            symbol: read_symbol(&mut cur)?,
            update_type: BookUpdateType::try_from(cur.read_u8()?)?,
            side: BookSide::try_from(cur.read_u8()?)?,
            price: cur.read_f64::<LittleEndian>()?,
            size: cur.read_u32::<LittleEndian>()?,
            order_count: cur.read_u32::<LittleEndian>()?,
            sequence: cur.read_u64::<LittleEndian>()?,
            exchange_timestamp: cur.read_u64::<LittleEndian>()?,
        })
    }
}

/// Risk limit breach notification.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskAlert {
    pub level: RiskLevel,
    pub message: String,
    pub symbol: Symbol,
    pub threshold_value: f64,
    pub current_value: f64,
}

impl WireRecord for RiskAlert {
    const TYPE: MessageType = MessageType::RiskAlert;

    fn body_len(&self) -> usize {
        161
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.push(self.level.as_u8());
        write_fixed_str(out, &self.message, 128);
        out.extend_from_slice(self.symbol.as_wire());
        out.extend_from_slice(&self.threshold_value.to_le_bytes());
        out.extend_from_slice(&self.current_value.to_le_bytes());
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            level: RiskLevel::try_from(cur.read_u8()?)?,
            message: read_fixed_str(&mut cur, 128)?,
            symbol: read_symbol(&mut cur)?,
            threshold_value: cur.read_f64::<LittleEndian>()?,
            current_value: cur.read_f64::<LittleEndian>()?,
        })
    }
}

/// Record destined for the central log sink.
#[derive(Clone, Debug, PartialEq)]
pub struct LogMessage {
    pub level: LogLevel,
    pub component: String,
    pub message: String,
}

impl WireRecord for LogMessage {
    const TYPE: MessageType = MessageType::LogMessage;

    fn body_len(&self) -> usize {
        289
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.push(self.level.as_u8());
        write_fixed_str(out, &self.component, 32);
        write_fixed_str(out, &self.message, 256);
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            level: LogLevel::try_from(cur.read_u8()?)?,
            component: read_fixed_str(&mut cur, 32)?,
            message: read_fixed_str(&mut cur, 256)?,
        })
    }
}

/// Command from the control plane.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlCommand {
    pub action: ControlAction,
    pub target_service: String,
    pub parameters: String,
}

impl ControlCommand {
    /// Whether the command addresses the named service (or everyone).
    pub fn targets(&self, service: &str) -> bool {
        self.target_service.is_empty()
            || self.target_service == "all"
            || self.target_service == service
    }
}

impl WireRecord for ControlCommand {
    const TYPE: MessageType = MessageType::ControlCommand;

    fn body_len(&self) -> usize {
        161
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        out.push(self.action.as_u8());
        write_fixed_str(out, &self.target_service, 32);
        write_fixed_str(out, &self.parameters, 128);
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            action: ControlAction::try_from(cur.read_u8()?)?,
            target_service: read_fixed_str(&mut cur, 32)?,
            parameters: read_fixed_str(&mut cur, 128)?,
        })
    }
}

/// Liveness and resource report from a service.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemStatus {
    pub service_name: String,
    pub messages_processed: u64,
    pub memory_usage_kb: u64,
    pub cpu_usage_percent: f64,
    pub uptime_ns: u64,
}

impl WireRecord for SystemStatus {
    const TYPE: MessageType = MessageType::SystemStatus;

    fn body_len(&self) -> usize {
        64
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        write_fixed_str(out, &self.service_name, 32);
        out.extend_from_slice(&self.messages_processed.to_le_bytes());
        out.extend_from_slice(&self.memory_usage_kb.to_le_bytes());
        out.extend_from_slice(&self.cpu_usage_percent.to_le_bytes());
        out.extend_from_slice(&self.uptime_ns.to_le_bytes());
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        Ok(Self {
            service_name: read_fixed_str(&mut cur, 32)?,
            messages_processed: cur.read_u64::<LittleEndian>()?,
            memory_usage_kb: cur.read_u64::<LittleEndian>()?,
            cpu_usage_percent: cur.read_f64::<LittleEndian>()?,
            uptime_ns: cur.read_u64::<LittleEndian>()?,
        })
    }
}

/// One published metric value inside a [`MetricsSnapshot`].
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEntryWire {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
}

const METRIC_ENTRY_LEN: usize = 64 + 8 + 1;

/// Periodic snapshot from a service's metrics publisher:
/// `{service_name[32], timestamp_ns, metric_count, [{name[64], value, kind}]}`.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsSnapshot {
    pub service_name: String,
    pub timestamp_ns: u64,
    pub metrics: Vec<MetricEntryWire>,
}

impl WireRecord for MetricsSnapshot {
    const TYPE: MessageType = MessageType::MetricsSnapshot;

    fn body_len(&self) -> usize {
        32 + 8 + 4 + self.metrics.len() * METRIC_ENTRY_LEN
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        write_fixed_str(out, &self.service_name, 32);
        out.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        out.extend_from_slice(&(self.metrics.len() as u32).to_le_bytes());
        for m in &self.metrics {
            write_fixed_str(out, &m.name, 64);
            out.extend_from_slice(&m.value.to_le_bytes());
            out.push(m.kind.as_u8());
        }
    }

    fn decode_body(buf: &[u8]) -> Result<Self, WireError> {
        let mut cur = std::io::Cursor::new(buf);
        let service_name = read_fixed_str(&mut cur, 32)?;
        let timestamp_ns = cur.read_u64::<LittleEndian>()?;
        let count = cur.read_u32::<LittleEndian>()? as usize;
        let mut metrics = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            metrics.push(MetricEntryWire {
                name: read_fixed_str(&mut cur, 64)?,
                value: cur.read_f64::<LittleEndian>()?,
                kind: MetricKind::try_from(cur.read_u8()?)?,
            });
        }
        Ok(Self {
            service_name,
            timestamp_ns,
            metrics,
        })
    }
}

/// A decoded wire message of any type.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    MarketData(MessageHeader, MarketData),
    TradingSignal(MessageHeader, TradingSignal),
    OrderExecution(MessageHeader, OrderExecution),
    PositionUpdate(MessageHeader, PositionUpdate),
    OrderBookUpdate(MessageHeader, OrderBookUpdate),
    RiskAlert(MessageHeader, RiskAlert),
    LogMessage(MessageHeader, LogMessage),
    ControlCommand(MessageHeader, ControlCommand),
    SystemStatus(MessageHeader, SystemStatus),
    MetricsSnapshot(MessageHeader, MetricsSnapshot),
}

impl Message {
    /// Decode a whole framed message. The payload must be complete; the
    /// transports never deliver partial frames.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let header = MessageHeader::decode(buf)?;
        let body = &buf[HEADER_LEN..];
        if body.len() != header.payload_size as usize {
            return Err(WireError::PayloadSizeMismatch {
                declared: header.payload_size,
                actual: body.len(),
            });
        }
        Ok(match header.msg_type {
            MessageType::MarketData => Self::MarketData(header, MarketData::decode_body(body)?),
            MessageType::TradingSignal => {
                Self::TradingSignal(header, TradingSignal::decode_body(body)?)
            }
            MessageType::OrderExecution | MessageType::OrderRequest => {
                Self::OrderExecution(header, OrderExecution::decode_body(body)?)
            }
            MessageType::PositionUpdate => {
                Self::PositionUpdate(header, PositionUpdate::decode_body(body)?)
            }
            MessageType::OrderBookUpdate => {
                Self::OrderBookUpdate(header, OrderBookUpdate::decode_body(body)?)
            }
            MessageType::RiskAlert => Self::RiskAlert(header, RiskAlert::decode_body(body)?),
            MessageType::LogMessage => Self::LogMessage(header, LogMessage::decode_body(body)?),
            MessageType::ControlCommand => {
                Self::ControlCommand(header, ControlCommand::decode_body(body)?)
            }
            MessageType::SystemStatus => {
                Self::SystemStatus(header, SystemStatus::decode_body(body)?)
            }
            MessageType::MetricsSnapshot => {
                Self::MetricsSnapshot(header, MetricsSnapshot::decode_body(body)?)
            }
        })
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            Self::MarketData(h, _)
            | Self::TradingSignal(h, _)
            | Self::OrderExecution(h, _)
            | Self::PositionUpdate(h, _)
            | Self::OrderBookUpdate(h, _)
            | Self::RiskAlert(h, _)
            | Self::LogMessage(h, _)
            | Self::ControlCommand(h, _)
            | Self::SystemStatus(h, _)
            | Self::MetricsSnapshot(h, _) => h,
        }
    }
}

/// Stamps headers with a process-wide monotonic sequence and the clock's
/// monotonic timestamp. Constructed once at service start and shared.
pub struct HeaderFactory {
    clock: Arc<Clock>,
    sequence: AtomicU32,
}

impl HeaderFactory {
    pub fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            sequence: AtomicU32::new(1),
        }
    }

    pub fn header_for(&self, msg_type: MessageType, payload_size: usize) -> MessageHeader {
        MessageHeader {
            msg_type,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            timestamp_ns: self.clock.now_ns(),
            payload_size: payload_size as u16,
        }
    }

    /// Frame a record with a freshly stamped header.
    pub fn frame<T: WireRecord>(&self, record: &T) -> Vec<u8> {
        record.encode_with_header(self.header_for(T::TYPE, record.body_len()))
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn factory() -> HeaderFactory {
        HeaderFactory::new(Arc::new(Clock::for_tests()))
    }

    #[test]
    fn market_data_round_trip() {
        let md = MarketData {
            symbol: Symbol::new("AAPL"),
            bid_price: 189.98,
            ask_price: 190.02,
            bid_size: 300,
            ask_size: 150,
            last_price: 190.0,
            last_size: 100,
            exchange_timestamp: 1_700_000_000_000_000_000,
        };
        let bytes = factory().frame(&md);
        assert_eq!(bytes.len(), HEADER_LEN + 60);

        match Message::decode(&bytes).unwrap() {
            Message::MarketData(header, decoded) => {
                assert_eq!(header.msg_type, MessageType::MarketData);
                assert_eq!(header.payload_size as usize, 60);
                assert_eq!(decoded, md);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn signal_round_trip() {
        let sig = TradingSignal {
            symbol: Symbol::new("MSFT"),
            action: SignalAction::Sell,
            order_type: OrderType::Limit,
            price: 410.25,
            quantity: 50,
            strategy_id: 1001,
            confidence: 0.75,
        };
        let bytes = factory().frame(&sig);
        match Message::decode(&bytes).unwrap() {
            Message::TradingSignal(_, decoded) => assert_eq!(decoded, sig),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn execution_round_trip() {
        let exec = OrderExecution {
            order_id: 42,
            symbol: Symbol::new("SPY"),
            exec_type: ExecutionType::PartialFill,
            side: SignalAction::Buy,
            exec_seq: 3,
            fill_price: 512.01,
            fill_quantity: 400,
            remaining_quantity: 600,
            commission: 1.25,
        };
        let bytes = factory().frame(&exec);
        match Message::decode(&bytes).unwrap() {
            Message::OrderExecution(_, decoded) => assert_eq!(decoded, exec),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn metrics_snapshot_round_trip() {
        let snap = MetricsSnapshot {
            service_name: "strategy-engine".to_string(),
            timestamp_ns: 123,
            metrics: vec![
                MetricEntryWire {
                    name: "tick_to_signal_ns".to_string(),
                    value: 1850.0,
                    kind: MetricKind::Latency,
                },
                MetricEntryWire {
                    name: "signals_generated".to_string(),
                    value: 12.0,
                    kind: MetricKind::Counter,
                },
            ],
        };
        let bytes = factory().frame(&snap);
        match Message::decode(&bytes).unwrap() {
            Message::MetricsSnapshot(_, decoded) => assert_eq!(decoded, snap),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn fixed_width_records_round_trip() {
        let f = factory();

        let alert = RiskAlert {
            level: RiskLevel::Critical,
            message: "daily loss limit breached".to_string(),
            symbol: Symbol::new("TSLA"),
            threshold_value: -5000.0,
            current_value: -6123.4,
        };
        match Message::decode(&f.frame(&alert)).unwrap() {
            Message::RiskAlert(_, decoded) => assert_eq!(decoded, alert),
            other => panic!("wrong variant: {other:?}"),
        }

        let log = LogMessage {
            level: LogLevel::Warning,
            component: "order-gateway".to_string(),
            message: "send back-pressure".to_string(),
        };
        match Message::decode(&f.frame(&log)).unwrap() {
            Message::LogMessage(_, decoded) => assert_eq!(decoded, log),
            other => panic!("wrong variant: {other:?}"),
        }

        let command = ControlCommand {
            action: ControlAction::PauseTrading,
            target_service: "strategy-engine".to_string(),
            parameters: String::new(),
        };
        match Message::decode(&f.frame(&command)).unwrap() {
            Message::ControlCommand(_, decoded) => {
                assert!(decoded.targets("strategy-engine"));
                assert!(!decoded.targets("order-gateway"));
                assert_eq!(decoded, command);
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let status = SystemStatus {
            service_name: "market-data".to_string(),
            messages_processed: 123_456,
            memory_usage_kb: 2048,
            cpu_usage_percent: 12.5,
            uptime_ns: 9_000_000_000,
        };
        match Message::decode(&f.frame(&status)).unwrap() {
            Message::SystemStatus(_, decoded) => assert_eq!(decoded, status),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn long_strings_truncate_to_field_width() {
        let f = factory();
        let log = LogMessage {
            level: LogLevel::Info,
            component: "c".repeat(100),
            message: "m".repeat(500),
        };
        match Message::decode(&f.frame(&log)).unwrap() {
            Message::LogMessage(header, decoded) => {
                assert_eq!(header.payload_size as usize, 289);
                assert_eq!(decoded.component.len(), 31);
                assert_eq!(decoded.message.len(), 255);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn sequences_are_monotonic() {
        let f = factory();
        let md = MarketData {
            symbol: Symbol::new("A"),
            bid_price: 1.0,
            ask_price: 1.1,
            bid_size: 1,
            ask_size: 1,
            last_price: 1.05,
            last_size: 1,
            exchange_timestamp: 0,
        };
        let first = Message::decode(&f.frame(&md)).unwrap().header().sequence;
        let second = Message::decode(&f.frame(&md)).unwrap().header().sequence;
        assert!(second > first);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = factory().frame(&MarketData {
            symbol: Symbol::new("A"),
            bid_price: 1.0,
            ask_price: 1.1,
            bid_size: 1,
            ask_size: 1,
            last_price: 1.0,
            last_size: 1,
            exchange_timestamp: 0,
        });
        let err = Message::decode(&bytes[..bytes.len() - 4]).unwrap_err();
        assert!(matches!(err, WireError::PayloadSizeMismatch { .. }));
    }

    #[test]
    fn crossed_tick_is_invalid() {
        let md = MarketData {
            symbol: Symbol::new("X"),
            bid_price: 10.0,
            ask_price: 9.0,
            bid_size: 1,
            ask_size: 1,
            last_price: 9.5,
            last_size: 1,
            exchange_timestamp: 0,
        };
        assert!(!md.is_valid());
    }
}
