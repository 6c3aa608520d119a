//! `RofSock`: the framed byte pump owned by each connection. Pure state —
//! the backend moves the actual bytes and reports what happened.
//!
//! Inbound, it accumulates stream bytes and cuts complete envelopes, at most
//! `rx_budget` per drain so one busy peer cannot starve the rest of the
//! loop. Outbound, it holds a bounded FIFO of encoded frames the backend
//! picks up via the runtime's `poll_io`; crossing the high watermark fails
//! sends with `Backpressure` until the queue drains below the low mark.

use std::collections::VecDeque;

use bytes::Bytes;

use message::{Envelope, Framer, FramingError};
use {ConnMode, EndpointConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Fail)]
pub enum SendError {
    /// Write queue is at its high watermark; retry after `SendDrained`.
    #[fail(display = "write queue full")]
    Backpressure,
    #[fail(display = "socket is not open")]
    NotOpen,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SockState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
pub struct RofSock {
    state: SockState,
    mode: ConnMode,
    /// Connect parameters; retained on active sockets for reconnects.
    endpoint: Option<EndpointConfig>,
    framer: Framer,
    msg_size_cap: usize,
    rx_budget: usize,
    tx: VecDeque<Bytes>,
    tx_high: usize,
    tx_low: usize,
    congested: bool,
    backoff: u64,
    backoff_initial: u64,
    backoff_max: u64,
}

pub struct SockParams {
    pub msg_size_cap: usize,
    pub rx_budget: usize,
    pub tx_high_watermark: usize,
    pub tx_low_watermark: usize,
    pub reconnect_initial: u64,
    pub reconnect_max: u64,
}

impl RofSock {
    pub fn active(endpoint: EndpointConfig, params: &SockParams) -> Self {
        Self::new(ConnMode::Active, Some(endpoint), params)
    }

    pub fn passive(params: &SockParams) -> Self {
        let mut sock = Self::new(ConnMode::PassiveAccepted, None, params);
        // an accepted socket is already open
        sock.state = SockState::Open;
        sock
    }

    fn new(mode: ConnMode, endpoint: Option<EndpointConfig>, params: &SockParams) -> Self {
        RofSock {
            state: SockState::Idle,
            mode,
            endpoint,
            framer: Framer::new(params.msg_size_cap),
            msg_size_cap: params.msg_size_cap,
            rx_budget: params.rx_budget,
            tx: VecDeque::new(),
            tx_high: params.tx_high_watermark,
            tx_low: params.tx_low_watermark,
            congested: false,
            backoff: params.reconnect_initial,
            backoff_initial: params.reconnect_initial,
            backoff_max: params.reconnect_max,
        }
    }

    pub fn state(&self) -> SockState {
        self.state
    }

    pub fn mode(&self) -> ConnMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.state == SockState::Open
    }

    /// Whether this socket reconnects by itself after failure.
    pub fn reconnects(&self) -> bool {
        self.mode == ConnMode::Active && self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Option<&EndpointConfig> {
        self.endpoint.as_ref()
    }

    pub fn on_connecting(&mut self) {
        self.state = SockState::Connecting;
    }

    pub fn on_connected(&mut self) {
        self.state = SockState::Open;
        self.framer = Framer::new(self.msg_size_cap);
        self.tx.clear();
        self.congested = false;
    }

    pub fn on_closed(&mut self) {
        self.state = SockState::Closed;
        self.tx.clear();
    }

    /// Current reconnect delay in microseconds; doubles per failure up to
    /// the cap.
    pub fn next_backoff(&mut self) -> u64 {
        let delay = self.backoff;
        self.backoff = ::std::cmp::min(self.backoff * 2, self.backoff_max);
        delay
    }

    /// Called when the connection layer observed a completed HELLO exchange.
    pub fn reset_backoff(&mut self) {
        self.backoff = self.backoff_initial;
    }

    pub fn queue(&mut self, frame: Bytes) -> Result<(), SendError> {
        if self.state != SockState::Open {
            return Err(SendError::NotOpen);
        }
        if self.tx.len() >= self.tx_high {
            self.congested = true;
            return Err(SendError::Backpressure);
        }
        self.tx.push_back(frame);
        Ok(())
    }

    /// Pop the next outbound frame. The second value is true exactly once
    /// per congestion episode, when the queue drops back below the low
    /// watermark.
    pub fn poll_transmit(&mut self) -> (Option<Bytes>, bool) {
        let frame = self.tx.pop_front();
        let mut drained = false;
        if self.congested && self.tx.len() <= self.tx_low {
            self.congested = false;
            drained = true;
        }
        (frame, drained)
    }

    pub fn tx_depth(&self) -> usize {
        self.tx.len()
    }

    pub fn input(&mut self, data: &[u8]) {
        self.framer.input(data);
    }

    /// Cut up to `rx_budget` complete messages out of the receive buffer.
    /// The bool is true when more complete messages stayed buffered.
    pub fn drain_rx(&mut self) -> Result<(Vec<Envelope>, bool), FramingError> {
        let mut out = Vec::new();
        while out.len() < self.rx_budget {
            match self.framer.next()? {
                Some(envelope) => out.push(envelope),
                None => return Ok((out, false)),
            }
        }
        // budget exhausted; probe whether a full frame is still pending
        Ok((out, self.framer.pending() >= ::HEADER_LEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message::Header;
    use msg::{Echo, Message};
    use {EndpointConfig, Version};

    fn params() -> SockParams {
        SockParams {
            msg_size_cap: 1 << 16,
            rx_budget: 16,
            tx_high_watermark: 4,
            tx_low_watermark: 1,
            reconnect_initial: 1_000_000,
            reconnect_max: 16_000_000,
        }
    }

    fn active_sock() -> RofSock {
        let endpoint = EndpointConfig::tcp("127.0.0.1:6653".parse().unwrap());
        let mut sock = RofSock::active(endpoint, &params());
        sock.on_connecting();
        sock.on_connected();
        sock
    }

    fn frame(xid: u32) -> Bytes {
        Message::EchoRequest(Echo::default())
            .encode(Version::V1_3, xid)
            .unwrap()
            .to_bytes()
    }

    #[test]
    fn backpressure_and_drain_signal() {
        let mut sock = active_sock();
        for i in 0..4 {
            sock.queue(frame(i)).unwrap();
        }
        assert_eq!(sock.queue(frame(9)), Err(SendError::Backpressure));

        // draining to the low watermark signals exactly once
        let (f, drained) = sock.poll_transmit();
        assert!(f.is_some());
        assert!(!drained);
        let (_, drained) = sock.poll_transmit();
        assert!(!drained);
        let (_, drained) = sock.poll_transmit();
        assert!(drained); // len now 1 == low watermark
        let (_, drained) = sock.poll_transmit();
        assert!(!drained);
        assert!(sock.queue(frame(10)).is_ok());
    }

    #[test]
    fn queue_requires_open_socket() {
        let endpoint = EndpointConfig::tcp("127.0.0.1:6653".parse().unwrap());
        let mut sock = RofSock::active(endpoint, &params());
        assert_eq!(sock.queue(frame(0)), Err(SendError::NotOpen));
        sock.on_connecting();
        sock.on_connected();
        sock.queue(frame(0)).unwrap();
        sock.on_closed();
        assert_eq!(sock.queue(frame(1)), Err(SendError::NotOpen));
        assert_eq!(sock.tx_depth(), 0);
    }

    #[test]
    fn rx_budget_bounds_drain() {
        let mut sock = active_sock();
        let mut bytes = Vec::new();
        for i in 0..20 {
            bytes.extend_from_slice(&frame(i));
        }
        sock.input(&bytes);
        let (msgs, more) = sock.drain_rx().unwrap();
        assert_eq!(msgs.len(), 16);
        assert!(more);
        let (msgs, more) = sock.drain_rx().unwrap();
        assert_eq!(msgs.len(), 4);
        assert!(!more);
    }

    #[test]
    fn malformed_length_is_fatal() {
        let mut sock = active_sock();
        let bad = Header {
            version: 4,
            ty: 2,
            length: 4,
            xid: 0,
        };
        let mut raw = Vec::new();
        use coding::Codec;
        bad.encode(&mut raw);
        sock.input(&raw);
        assert_matches!(sock.drain_rx(), Err(_));
    }

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut sock = active_sock();
        assert!(sock.reconnects());
        assert_eq!(sock.next_backoff(), 1_000_000);
        assert_eq!(sock.next_backoff(), 2_000_000);
        assert_eq!(sock.next_backoff(), 4_000_000);
        assert_eq!(sock.next_backoff(), 8_000_000);
        assert_eq!(sock.next_backoff(), 16_000_000);
        assert_eq!(sock.next_backoff(), 16_000_000);
        sock.reset_backoff();
        assert_eq!(sock.next_backoff(), 1_000_000);
    }

    #[test]
    fn passive_socket_never_reconnects() {
        let sock = RofSock::passive(&params());
        assert!(!sock.reconnects());
        assert!(sock.is_open());
    }
}
