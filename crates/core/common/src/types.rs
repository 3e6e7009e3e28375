//! Scalar types and enums shared across the wire protocol

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::WireError;

/// Fixed-width symbol identifier, at most 15 bytes plus a NUL terminator.
///
/// Stored exactly as it travels on the wire so that hot-path code never
/// allocates when moving symbols between messages and book keys.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol([u8; 16]);

impl Symbol {
    /// Maximum number of payload bytes (one slot is reserved for NUL).
    pub const MAX_LEN: usize = 15;

    /// Build a symbol from a string, truncating to [`Symbol::MAX_LEN`] bytes.
    pub fn new(s: &str) -> Self {
        let mut buf = [0u8; 16];
        let bytes = s.as_bytes();
        let n = bytes.len().min(Self::MAX_LEN);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    /// Reconstruct a symbol from its 16-byte wire representation.
    pub fn from_wire(raw: &[u8; 16]) -> Self {
        let mut buf = *raw;
        // The last byte is a terminator regardless of what arrived.
        buf[15] = 0;
        Self(buf)
    }

    /// The raw 16-byte, NUL-padded representation.
    pub fn as_wire(&self) -> &[u8; 16] {
        &self.0
    }

    /// The symbol text up to the first NUL.
    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(16);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub const fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = WireError;

            fn try_from(v: u8) -> Result<Self, WireError> {
                match v {
                    $($value => Ok(Self::$variant),)+
                    other => Err(WireError::InvalidEnum {
                        field: stringify!($name),
                        value: u16::from(other),
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Side of the book a level or order sits on.
    BookSide {
        Bid = 1,
        Ask = 2,
    }
}

wire_enum! {
    /// What a strategy wants done.
    SignalAction {
        Buy = 1,
        Sell = 2,
        Cancel = 3,
        Modify = 4,
    }
}

wire_enum! {
    OrderType {
        Market = 1,
        Limit = 2,
        Stop = 3,
        StopLimit = 4,
    }
}

wire_enum! {
    /// Execution report disposition.
    ExecutionType {
        New = 1,
        PartialFill = 2,
        Fill = 3,
        Cancelled = 4,
        Rejected = 5,
    }
}

wire_enum! {
    BookUpdateType {
        Add = 1,
        Update = 2,
        Delete = 3,
        Snapshot = 4,
    }
}

wire_enum! {
    RiskLevel {
        Info = 1,
        Warning = 2,
        Critical = 3,
    }
}

wire_enum! {
    LogLevel {
        Debug = 1,
        Info = 2,
        Warning = 3,
        Error = 4,
        Critical = 5,
    }
}

wire_enum! {
    ControlAction {
        StartTrading = 1,
        StopTrading = 2,
        PauseTrading = 3,
        RestartService = 4,
        ShutdownSystem = 5,
        UpdateConfig = 6,
    }
}

wire_enum! {
    MetricKind {
        Latency = 0,
        Counter = 1,
        Gauge = 2,
        Histogram = 3,
    }
}

impl SignalAction {
    /// True for the actions that open or change exposure.
    pub fn is_order(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}
