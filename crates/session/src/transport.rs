//! Transport capability and the intercepting adapter.
//!
//! The host owns real connections. This module only describes what the
//! session needs from them ([`Transport`], [`Channel`]) and provides
//! [`InterceptingTransport`], a decorator that hands both directions of the
//! primary channel to a [`PrimaryObserver`] while passing every frame
//! through untouched.
//!
//! Everything here is single-threaded: the host delivers channel events one
//! at a time and each call completes before the next.

use std::cell::RefCell;
use std::rc::Rc;

use minimap_state::Millis;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("channel is not open")]
    Closed,
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
}

/// Event emitted by a channel, delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(Vec<u8>),
    Close,
    Error(String),
}

/// One bidirectional connection.
pub trait Channel {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// `connect(address) -> channel`, used for both the primary and the relay
/// connection.
pub trait Transport {
    type Channel: Channel;

    fn connect(&mut self, address: &str) -> Result<Self::Channel, TransportError>;
}

// ============================================================================
// Interception
// ============================================================================

/// Receives both directions of the primary channel.
pub trait PrimaryObserver {
    fn primary_opened(&mut self, url: &str, now: Millis);
    fn primary_inbound(&mut self, frame: &[u8], now: Millis);
    fn primary_outbound(&mut self, frame: &[u8]);
    fn primary_closed(&mut self, now: Millis);
}

/// Decorates a transport so every channel it opens is observed.
pub struct InterceptingTransport<T, O> {
    inner: T,
    observer: Rc<RefCell<O>>,
}

impl<T: Transport, O: PrimaryObserver> InterceptingTransport<T, O> {
    pub fn new(inner: T, observer: Rc<RefCell<O>>) -> Self {
        Self { inner, observer }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport, O: PrimaryObserver> Transport for InterceptingTransport<T, O> {
    type Channel = InterceptedChannel<T::Channel, O>;

    fn connect(&mut self, address: &str) -> Result<Self::Channel, TransportError> {
        let inner = self.inner.connect(address)?;
        tracing::debug!(address, "intercepting primary channel");
        Ok(InterceptedChannel {
            inner,
            url: address.to_string(),
            observer: Rc::clone(&self.observer),
        })
    }
}

/// Primary channel wrapped by [`InterceptingTransport`].
///
/// Outbound frames are shown to the observer before they are sent. The host
/// routes inbound events through [`deliver`](Self::deliver) and hands the
/// returned event to the page's own handler unchanged.
pub struct InterceptedChannel<C, O> {
    inner: C,
    url: String,
    observer: Rc<RefCell<O>>,
}

impl<C: Channel, O: PrimaryObserver> InterceptedChannel<C, O> {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn deliver(&mut self, event: ChannelEvent, now: Millis) -> ChannelEvent {
        {
            let mut observer = self.observer.borrow_mut();
            match &event {
                ChannelEvent::Open => observer.primary_opened(&self.url, now),
                ChannelEvent::Message(frame) => observer.primary_inbound(frame, now),
                ChannelEvent::Close => observer.primary_closed(now),
                ChannelEvent::Error(reason) => {
                    tracing::warn!(url = %self.url, %reason, "primary channel error");
                    observer.primary_closed(now);
                }
            }
        }
        event
    }
}

impl<C: Channel, O: PrimaryObserver> Channel for InterceptedChannel<C, O> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.observer.borrow_mut().primary_outbound(bytes);
        self.inner.send(bytes)
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

// ============================================================================
// In-memory transport
// ============================================================================

#[cfg(test)]
pub(crate) mod memory {
    use super::*;

    #[derive(Debug, Default)]
    struct MemoryState {
        open: bool,
        sent: Vec<Vec<u8>>,
    }

    /// Channel that records what is sent. Clones share the same state, so a
    /// test can keep one handle while the session owns another.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryChannel {
        state: Rc<RefCell<MemoryState>>,
    }

    impl MemoryChannel {
        /// A channel still connecting.
        pub fn new() -> Self {
            Self::default()
        }

        pub fn new_open() -> Self {
            let channel = Self::new();
            channel.set_open(true);
            channel
        }

        pub fn set_open(&self, open: bool) {
            self.state.borrow_mut().open = open;
        }

        pub fn sent(&self) -> Vec<Vec<u8>> {
            self.state.borrow().sent.clone()
        }

        pub fn take_sent(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.state.borrow_mut().sent)
        }
    }

    impl Channel for MemoryChannel {
        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            let mut state = self.state.borrow_mut();
            if !state.open {
                return Err(TransportError::Closed);
            }
            state.sent.push(bytes.to_vec());
            Ok(())
        }

        fn close(&mut self) {
            self.state.borrow_mut().open = false;
        }

        fn is_open(&self) -> bool {
            self.state.borrow().open
        }
    }

    /// Transport handing out [`MemoryChannel`]s.
    #[derive(Debug, Default)]
    pub struct MemoryTransport {
        refuse: bool,
        connected: Vec<(String, MemoryChannel)>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// A transport that fails every connect.
        pub fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::default()
            }
        }

        /// Handles to every channel opened so far, with their addresses.
        pub fn connected(&self) -> &[(String, MemoryChannel)] {
            &self.connected
        }
    }

    impl Transport for MemoryTransport {
        type Channel = MemoryChannel;

        fn connect(&mut self, address: &str) -> Result<MemoryChannel, TransportError> {
            if self.refuse {
                return Err(TransportError::Connect {
                    address: address.to_string(),
                    reason: "refused".to_string(),
                });
            }
            let channel = MemoryChannel::new();
            self.connected.push((address.to_string(), channel.clone()));
            Ok(channel)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryChannel, MemoryTransport};
    use super::*;

    #[derive(Default)]
    struct Log {
        events: Vec<String>,
    }

    impl PrimaryObserver for Log {
        fn primary_opened(&mut self, url: &str, now: Millis) {
            self.events.push(format!("open {url} {now}"));
        }

        fn primary_inbound(&mut self, frame: &[u8], now: Millis) {
            self.events.push(format!("in {frame:?} {now}"));
        }

        fn primary_outbound(&mut self, frame: &[u8]) {
            self.events.push(format!("out {frame:?}"));
        }

        fn primary_closed(&mut self, now: Millis) {
            self.events.push(format!("close {now}"));
        }
    }

    #[test]
    fn test_memory_channel_requires_open() {
        let mut channel = MemoryChannel::new();
        assert_eq!(channel.send(&[1]), Err(TransportError::Closed));
        channel.set_open(true);
        channel.send(&[1]).unwrap();
        channel.close();
        assert!(!channel.is_open());
        assert_eq!(channel.sent(), vec![vec![1]]);
    }

    #[test]
    fn test_intercepted_channel_sees_both_directions() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut transport = InterceptingTransport::new(MemoryTransport::new(), Rc::clone(&log));

        let mut channel = transport.connect("ws://game:443").unwrap();
        let raw = transport.inner().connected()[0].1.clone();
        raw.set_open(true);

        assert_eq!(channel.deliver(ChannelEvent::Open, 5), ChannelEvent::Open);
        let inbound = ChannelEvent::Message(vec![0x14]);
        assert_eq!(channel.deliver(inbound.clone(), 6), inbound);
        channel.send(&[0x00, 0x41, 0x00]).unwrap();
        channel.deliver(ChannelEvent::Error("reset".to_string()), 7);

        // Outbound frames still reach the real channel.
        assert_eq!(raw.sent(), vec![vec![0x00, 0x41, 0x00]]);
        assert_eq!(
            log.borrow().events,
            vec![
                "open ws://game:443 5".to_string(),
                "in [20] 6".to_string(),
                "out [0, 65, 0]".to_string(),
                "close 7".to_string(),
            ]
        );
    }

    #[test]
    fn test_connect_failure_propagates() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut transport = InterceptingTransport::new(MemoryTransport::refusing(), log);
        assert!(matches!(
            transport.connect("ws://nowhere"),
            Err(TransportError::Connect { .. })
        ));
    }
}
