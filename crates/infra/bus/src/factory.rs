//! Backend selection from endpoint schemes
//!
//! `tcp://host:port` endpoints get the socket transport, `ring://name`
//! endpoints the in-process SPMC ring. Sender roles bind, receiver roles
//! connect; a factory instance owns the ring registry its endpoints share.

use std::sync::Arc;

use crate::error::TransportError;
use crate::ring::{
    DEFAULT_RING_BYTES, RingPublisher, RingPuller, RingPusher, RingRegistry, RingSubscriber,
};
use crate::tcp::{TcpPublisher, TcpPuller, TcpPusher, TcpSubscriber};
use crate::transport::{Publisher, Puller, Pusher, Subscriber};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Tcp,
    Ring,
}

fn backend_of(endpoint: &str) -> Result<(Backend, &str), TransportError> {
    if let Some(rest) = endpoint.strip_prefix("tcp://") {
        if rest.contains(':') {
            return Ok((Backend::Tcp, rest));
        }
    }
    if let Some(name) = endpoint.strip_prefix("ring://") {
        if !name.is_empty() {
            return Ok((Backend::Ring, name));
        }
    }
    Err(TransportError::InvalidEndpoint(endpoint.to_string()))
}

/// Creates transport roles for configured endpoints.
pub struct TransportFactory {
    rings: Arc<RingRegistry>,
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory {
    pub fn new() -> Self {
        Self {
            rings: RingRegistry::new(DEFAULT_RING_BYTES),
        }
    }

    /// Size the rings this factory creates (power of two bytes).
    pub fn with_ring_bytes(ring_bytes: usize) -> Self {
        Self {
            rings: RingRegistry::new(ring_bytes),
        }
    }

    /// Bind a fan-out publisher on `endpoint`.
    pub fn publisher(&self, endpoint: &str) -> Result<Box<dyn Publisher>, TransportError> {
        Ok(match backend_of(endpoint)? {
            (Backend::Tcp, _) => Box::new(TcpPublisher::bind(endpoint)?),
            (Backend::Ring, name) => Box::new(RingPublisher::bind(
                &self.rings,
                name,
                endpoint.to_string(),
            )?),
        })
    }

    /// Connect a subscriber to `endpoint` with an initial set of topic
    /// filters (empty set receives everything).
    pub fn subscriber(
        &self,
        endpoint: &str,
        topics: &[&str],
    ) -> Result<Box<dyn Subscriber>, TransportError> {
        let mut subscriber: Box<dyn Subscriber> = match backend_of(endpoint)? {
            (Backend::Tcp, _) => Box::new(TcpSubscriber::connect(endpoint)?),
            (Backend::Ring, name) => Box::new(RingSubscriber::connect(
                &self.rings,
                name,
                endpoint.to_string(),
            )?),
        };
        for topic in topics {
            subscriber.subscribe(topic)?;
        }
        Ok(subscriber)
    }

    /// Bind a point-to-point pusher on `endpoint`.
    pub fn pusher(&self, endpoint: &str) -> Result<Box<dyn Pusher>, TransportError> {
        Ok(match backend_of(endpoint)? {
            (Backend::Tcp, _) => Box::new(TcpPusher::bind(endpoint)?),
            (Backend::Ring, name) => Box::new(RingPusher::bind(
                &self.rings,
                name,
                endpoint.to_string(),
            )?),
        })
    }

    /// Connect a point-to-point puller to `endpoint`.
    pub fn puller(&self, endpoint: &str) -> Result<Box<dyn Puller>, TransportError> {
        Ok(match backend_of(endpoint)? {
            (Backend::Tcp, _) => Box::new(TcpPuller::connect(endpoint)?),
            (Backend::Ring, name) => Box::new(RingPuller::connect(
                &self.rings,
                name,
                endpoint.to_string(),
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_selection() {
        assert_eq!(
            backend_of("tcp://127.0.0.1:5556").unwrap().0,
            Backend::Tcp
        );
        assert_eq!(backend_of("ring://md").unwrap().0, Backend::Ring);
        assert!(backend_of("ipc:///tmp/x").is_err());
        assert!(backend_of("ring://").is_err());
    }

    #[test]
    fn ring_endpoints_share_one_registry() {
        let factory = TransportFactory::with_ring_bytes(1 << 16);
        let publisher = factory.publisher("ring://shared").unwrap();
        let mut subscriber = factory.subscriber("ring://shared", &["t"]).unwrap();

        publisher.publish("t", b"hello", true).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(subscriber.recv(&mut buf, true).unwrap(), Some(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn separate_factories_do_not_share_rings() {
        let a = TransportFactory::new();
        let b = TransportFactory::new();
        let _pub = a.publisher("ring://x").unwrap();
        assert!(matches!(
            b.subscriber("ring://x", &[]),
            Err(TransportError::RingNotBound(_))
        ));
    }
}
