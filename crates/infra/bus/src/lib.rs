//! Lock-free rings and pluggable transports for inter-service messaging
//!
//! Two layers live here. The bottom layer is the lock-free plumbing: an
//! SPSC queue ([`spsc`]) and a single-producer broadcast ring ([`spmc`]).
//! The top layer is the transport abstraction ([`transport`]) with its two
//! backends: framed TCP sockets ([`tcp`]) and named in-process rings
//! ([`ring`]). The [`factory`] picks a backend from the endpoint scheme.

pub mod error;
pub mod factory;
pub mod ring;
pub mod spmc;
pub mod spsc;
pub mod tcp;
pub mod transport;

pub use error::TransportError;
pub use factory::TransportFactory;
pub use spmc::{SpmcRing, SpmcConsumer, ConsumerPoll};
pub use spsc::{spsc_channel, SpscConsumer, SpscProducer};
pub use transport::{Publisher, Puller, Pusher, StatsSnapshot, Subscriber};
