//! `RofConn`: the per-connection OpenFlow state machine. Owns one
//! [`RofSock`], negotiates the protocol version over HELLO, optionally runs
//! the FEATURES exchange, and keeps the peer alive with periodic echo.
//!
//! External stimuli (socket events, inbound messages, timers) are folded
//! into an internal event FIFO that is drained to quiescence before control
//! returns, so transitions triggered mid-transition run in order.

use std::collections::VecDeque;

use slog::Logger;

use message::{Envelope, MsgKind};
use msg::{self, Echo, FeaturesReply, Hello, Message};
use runtime::{ConnId, Context, Io, Timer};
use sock::{RofSock, SendError};
use xid::XidStore;
use {OfpErr, Side, Version, VersionBitmap};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnState {
    Disconnected,
    ConnectPending,
    WaitForHello,
    WaitForFeatures,
    Established,
}

/// What a connection reports to its owning channel. The channel reacts on
/// its own loop iteration; the connection never calls back into its owner.
#[derive(Debug)]
pub enum ConnEvent {
    Established { version: Version },
    Closed,
    Refused,
    /// A post-handshake message for the session layer.
    Message { xid: u32, msg: Message },
}

#[derive(Debug, Fail)]
pub enum ConnError {
    #[fail(display = "connection is not established")]
    NotEstablished,
    #[fail(display = "all 2^32 xids are outstanding")]
    XidSpaceExhausted,
    #[fail(display = "{}", _0)]
    Send(#[cause] SendError),
    #[fail(display = "{}", _0)]
    Encode(#[cause] msg::EncodeError),
}

impl From<SendError> for ConnError {
    fn from(e: SendError) -> ConnError {
        ConnError::Send(e)
    }
}

impl From<msg::EncodeError> for ConnError {
    fn from(e: msg::EncodeError) -> ConnError {
        ConnError::Encode(e)
    }
}

/// Internal engine events, queued and drained FIFO.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Engine {
    Connected,
    Disconnected,
    HelloRcvd,
    HelloExpired,
    FeaturesRcvd,
    FeaturesExpired,
    EchoRcvd,
    EchoExpired,
}

pub struct RofConn {
    log: Logger,
    id: ConnId,
    side: Side,
    aux_id: u8,
    sock: RofSock,
    state: ConnState,
    versionbitmap: VersionBitmap,
    versionbitmap_peer: VersionBitmap,
    version: Option<Version>,
    /// Learned from the features exchange on controller-side mains.
    features: Option<FeaturesReply>,
    xids: XidStore,
    next_xid: u32,
    engine: VecDeque<Engine>,
    /// Pending upward notifications, collected by the owner after each call.
    out: Vec<ConnEvent>,
}

impl RofConn {
    pub fn new(
        log: Logger,
        id: ConnId,
        side: Side,
        aux_id: u8,
        versionbitmap: VersionBitmap,
        sock: RofSock,
        initial_xid: u32,
    ) -> Self {
        RofConn {
            log,
            id,
            side,
            aux_id,
            sock,
            state: ConnState::Disconnected,
            versionbitmap,
            versionbitmap_peer: VersionBitmap::new(),
            version: None,
            features: None,
            xids: XidStore::new(),
            next_xid: initial_xid,
            engine: VecDeque::new(),
            out: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn aux_id(&self) -> u8 {
        self.aux_id
    }

    pub fn set_aux_id(&mut self, aux_id: u8) {
        self.aux_id = aux_id;
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnState::Established
    }

    pub fn is_actively_established(&self) -> bool {
        self.sock.reconnects()
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn versionbitmap_peer(&self) -> &VersionBitmap {
        &self.versionbitmap_peer
    }

    /// Features learned during the handshake; `None` until the controller
    /// side's FEATURES exchange completed.
    pub fn features(&self) -> Option<&FeaturesReply> {
        self.features.as_ref()
    }

    pub fn dpid(&self) -> Option<u64> {
        self.features.as_ref().map(|f| f.dpid)
    }

    pub fn sock_mut(&mut self) -> &mut RofSock {
        &mut self.sock
    }

    pub fn sock(&self) -> &RofSock {
        &self.sock
    }

    /// Drain notifications produced by the last stimulus.
    pub fn take_events(&mut self) -> Vec<ConnEvent> {
        ::std::mem::replace(&mut self.out, Vec::new())
    }

    // ---- xid space -------------------------------------------------------

    /// Fresh xid from the wrapping counter, skipping live entries.
    pub fn get_async_xid(&mut self) -> Result<u32, ConnError> {
        let start = self.next_xid;
        loop {
            let xid = self.next_xid;
            self.next_xid = self.next_xid.wrapping_add(1);
            if !self.xids.contains(xid) {
                return Ok(xid);
            }
            if self.next_xid == start {
                return Err(ConnError::XidSpaceExhausted);
            }
        }
    }

    /// Fresh xid registered for a reply of `kind` due within `timeout` µs.
    pub fn get_sync_xid(
        &mut self,
        now: u64,
        kind: MsgKind,
        sub_type: u16,
        timeout: u64,
    ) -> Result<u32, ConnError> {
        let xid = self.get_async_xid()?;
        self.xids
            .insert(xid, kind, sub_type, now, now + timeout)
            .expect("freshly allocated xid cannot be outstanding");
        Ok(xid)
    }

    pub fn release_sync_xid(&mut self, xid: u32) {
        self.xids.release(xid);
    }

    pub fn xids(&self) -> &XidStore {
        &self.xids
    }

    pub fn xids_mut(&mut self) -> &mut XidStore {
        &mut self.xids
    }

    // ---- outbound --------------------------------------------------------

    /// Queue a message on the negotiated version. Fails before Established.
    pub fn send_message(&mut self, ctx: &mut Context, msg: &Message, xid: u32) -> Result<(), ConnError> {
        let version = self.version.ok_or(ConnError::NotEstablished)?;
        self.send_raw(ctx, version, msg, xid)
    }

    fn send_raw(
        &mut self,
        ctx: &mut Context,
        version: Version,
        msg: &Message,
        xid: u32,
    ) -> Result<(), ConnError> {
        let envelope = msg.encode(version, xid)?;
        self.sock.queue(envelope.to_bytes())?;
        ctx.dirty.insert(self.id);
        Ok(())
    }

    // ---- lifecycle -------------------------------------------------------

    /// Open the socket (active connections).
    pub fn connect(&mut self, ctx: &mut Context) {
        debug_assert!(self.sock.reconnects());
        let endpoint = self.sock.endpoint().expect("active socket has an endpoint").clone();
        self.state = ConnState::ConnectPending;
        self.sock.on_connecting();
        ctx.io.push_back(Io::Connect {
            conn: self.id,
            endpoint,
        });
    }

    /// Arm the reconnect timer with the socket's current backoff.
    pub fn schedule_reconnect(&mut self, ctx: &mut Context, now: u64) {
        let delay = self.sock.next_backoff();
        debug!(self.log, "scheduling reconnect"; "delay_us" => delay);
        ctx.io.push_back(Io::TimerStart {
            conn: self.id,
            timer: Timer::Reconnect,
            time: now + delay,
        });
    }

    /// Adopt an already-open socket (passive side of an accept, or the
    /// immediate-connect case): send HELLO straight away.
    pub fn on_adopted(&mut self, ctx: &mut Context, now: u64) {
        debug_assert!(self.sock.is_open());
        self.enqueue_hello(ctx, now);
    }

    pub fn handle_connected(&mut self, ctx: &mut Context, now: u64) {
        self.sock.on_connected();
        self.engine_push(Engine::Connected);
        self.run_engine(ctx, now);
    }

    pub fn handle_connect_refused(&mut self, ctx: &mut Context, now: u64) {
        warn!(self.log, "connect refused");
        self.state = ConnState::Disconnected;
        self.out.push(ConnEvent::Refused);
        let _ = ctx; // no timers armed yet in ConnectPending
        let _ = now;
    }

    pub fn handle_closed(&mut self, ctx: &mut Context, now: u64) {
        self.engine_push(Engine::Disconnected);
        self.run_engine(ctx, now);
    }

    /// Close the socket and cancel the liveness machinery without emitting
    /// the `Closed` notification. Used for suppressed teardown.
    pub fn close_silent(&mut self, ctx: &mut Context) {
        self.cancel_timers(ctx);
        if self.sock.is_open() || self.state == ConnState::ConnectPending {
            ctx.io.push_back(Io::Close { conn: self.id });
        }
        self.sock.on_closed();
        self.state = ConnState::Disconnected;
        self.version = None;
    }

    pub fn handle_input(&mut self, ctx: &mut Context, now: u64, data: &[u8]) -> bool {
        self.sock.input(data);
        let (envelopes, more) = match self.sock.drain_rx() {
            Ok(x) => x,
            Err(e) => {
                warn!(self.log, "framing error, closing"; "reason" => %e);
                self.disconnect(ctx, now);
                return false;
            }
        };
        for envelope in envelopes {
            self.process(ctx, now, envelope);
            if self.state == ConnState::Disconnected {
                return false;
            }
        }
        more
    }

    pub fn handle_timeout(&mut self, ctx: &mut Context, now: u64, timer: Timer) {
        match timer {
            Timer::Hello => {
                self.engine_push(Engine::HelloExpired);
                self.run_engine(ctx, now);
            }
            Timer::Features => {
                self.engine_push(Engine::FeaturesExpired);
                self.run_engine(ctx, now);
            }
            Timer::EchoInterval => {
                if self.state == ConnState::Established {
                    self.send_echo_request(ctx, now);
                }
            }
            Timer::EchoTimeout => {
                self.engine_push(Engine::EchoExpired);
                self.run_engine(ctx, now);
            }
            Timer::Reconnect => {
                if self.state == ConnState::Disconnected && self.sock.reconnects() {
                    self.connect(ctx);
                }
            }
            // session-level timers are handled above this layer
            _ => {}
        }
    }

    // ---- engine ----------------------------------------------------------

    fn engine_push(&mut self, event: Engine) {
        self.engine.push_back(event);
    }

    fn run_engine(&mut self, ctx: &mut Context, now: u64) {
        while let Some(event) = self.engine.pop_front() {
            match event {
                Engine::Connected => self.event_connected(ctx, now),
                Engine::Disconnected => self.event_disconnected(ctx),
                Engine::HelloRcvd => self.event_hello_rcvd(ctx, now),
                Engine::HelloExpired | Engine::FeaturesExpired | Engine::EchoExpired => {
                    debug!(self.log, "handshake or liveness timer expired"; "event" => ?event);
                    self.disconnect(ctx, now);
                }
                Engine::FeaturesRcvd => self.event_features_rcvd(ctx, now),
                Engine::EchoRcvd => self.event_echo_rcvd(ctx, now),
            }
        }
    }

    fn event_connected(&mut self, ctx: &mut Context, now: u64) {
        match self.state {
            ConnState::ConnectPending | ConnState::Disconnected => {
                self.enqueue_hello(ctx, now);
            }
            _ => {
                error!(self.log, "connected event in unexpected state"; "state" => ?self.state);
            }
        }
    }

    fn enqueue_hello(&mut self, ctx: &mut Context, now: u64) {
        let version = self
            .versionbitmap
            .highest()
            .expect("local version bitmap must not be empty");
        let hello = Message::Hello(Hello {
            bitmap: Some(self.versionbitmap),
        });
        let xid = self.get_async_xid().unwrap_or(0);
        if let Err(e) = self.send_raw(ctx, version, &hello, xid) {
            warn!(self.log, "failed to queue HELLO"; "reason" => %e);
            self.disconnect(ctx, now);
            return;
        }
        self.state = ConnState::WaitForHello;
        ctx.io.push_back(Io::TimerStart {
            conn: self.id,
            timer: Timer::Hello,
            time: now + ctx.config.hello_timeout,
        });
    }

    fn event_disconnected(&mut self, ctx: &mut Context) {
        match self.state {
            ConnState::Disconnected => {}
            _ => {
                self.cancel_timers(ctx);
                self.sock.on_closed();
                self.state = ConnState::Disconnected;
                self.version = None;
                self.out.push(ConnEvent::Closed);
            }
        }
    }

    fn event_hello_rcvd(&mut self, ctx: &mut Context, now: u64) {
        ctx.io.push_back(Io::TimerStop {
            conn: self.id,
            timer: Timer::Hello,
        });
        if self.side == Side::Controller && self.aux_id == 0 {
            self.send_features_request(ctx, now);
        } else {
            self.become_established(ctx, now);
        }
    }

    fn send_features_request(&mut self, ctx: &mut Context, now: u64) {
        let version = self.version.expect("negotiated before features");
        let timeout = ctx.config.features_timeout;
        let xid = match self.get_sync_xid(now, MsgKind::FeaturesRequest, 0, timeout) {
            Ok(xid) => xid,
            Err(e) => {
                warn!(self.log, "xid allocation failed"; "reason" => %e);
                self.disconnect(ctx, now);
                return;
            }
        };
        if let Err(e) = self.send_raw(ctx, version, &Message::FeaturesRequest, xid) {
            warn!(self.log, "failed to queue FEATURES request"; "reason" => %e);
            self.disconnect(ctx, now);
            return;
        }
        self.state = ConnState::WaitForFeatures;
        ctx.io.push_back(Io::TimerStart {
            conn: self.id,
            timer: Timer::Features,
            time: now + timeout,
        });
    }

    fn event_features_rcvd(&mut self, ctx: &mut Context, now: u64) {
        ctx.io.push_back(Io::TimerStop {
            conn: self.id,
            timer: Timer::Features,
        });
        self.become_established(ctx, now);
    }

    fn become_established(&mut self, ctx: &mut Context, now: u64) {
        let version = self.version.expect("negotiated version present");
        self.state = ConnState::Established;
        self.sock.reset_backoff();
        ctx.io.push_back(Io::TimerStart {
            conn: self.id,
            timer: Timer::EchoInterval,
            time: now + ctx.config.echo_interval,
        });
        info!(self.log, "connection established"; "version" => %version, "aux" => self.aux_id);
        self.out.push(ConnEvent::Established { version });
    }

    fn event_echo_rcvd(&mut self, ctx: &mut Context, now: u64) {
        ctx.io.push_back(Io::TimerStop {
            conn: self.id,
            timer: Timer::EchoTimeout,
        });
        ctx.io.push_back(Io::TimerStart {
            conn: self.id,
            timer: Timer::EchoInterval,
            time: now + ctx.config.echo_interval,
        });
    }

    fn send_echo_request(&mut self, ctx: &mut Context, now: u64) {
        let timeout = ctx.config.echo_timeout;
        let xid = match self.get_sync_xid(now, MsgKind::EchoRequest, 0, timeout) {
            Ok(xid) => xid,
            Err(e) => {
                warn!(self.log, "xid allocation failed"; "reason" => %e);
                self.disconnect(ctx, now);
                return;
            }
        };
        let msg = Message::EchoRequest(Echo::default());
        if self.send_message(ctx, &msg, xid).is_err() {
            self.disconnect(ctx, now);
            return;
        }
        ctx.io.push_back(Io::TimerStart {
            conn: self.id,
            timer: Timer::EchoTimeout,
            time: now + timeout,
        });
    }

    /// Close the socket and run the disconnect transition. Queued frames
    /// (an error reply, typically) are flushed ahead of the close.
    pub fn disconnect(&mut self, ctx: &mut Context, now: u64) {
        self.flush_tx(ctx);
        if self.sock.is_open() || self.state == ConnState::ConnectPending {
            ctx.io.push_back(Io::Close { conn: self.id });
        }
        self.engine_push(Engine::Disconnected);
        self.run_engine(ctx, now);
    }

    fn flush_tx(&mut self, ctx: &mut Context) {
        loop {
            let (frame, _) = self.sock.poll_transmit();
            match frame {
                Some(frame) => ctx.io.push_back(Io::Transmit {
                    conn: self.id,
                    frame,
                }),
                None => break,
            }
        }
        ctx.dirty.remove(&self.id);
    }

    fn cancel_timers(&mut self, ctx: &mut Context) {
        for &timer in &[
            Timer::Hello,
            Timer::Features,
            Timer::EchoInterval,
            Timer::EchoTimeout,
        ] {
            ctx.io.push_back(Io::TimerStop {
                conn: self.id,
                timer,
            });
        }
    }

    // ---- inbound dispatch ------------------------------------------------

    fn process(&mut self, ctx: &mut Context, now: u64, envelope: Envelope) {
        let msg = match Message::decode(&envelope) {
            Ok(msg) => msg,
            Err(e) => {
                // HELLO is exempt: its header may name a version we do not
                // speak, and the element list parses regardless.
                if self.state == ConnState::WaitForHello && envelope.header.ty == 0 {
                    let hello = msg::decode_hello_body(&envelope.body).unwrap_or_default();
                    self.hello_rcvd(ctx, now, &envelope, hello);
                    return;
                }
                warn!(self.log, "undecodable message"; "reason" => %e);
                self.reject(ctx, now, &envelope, OfpErr::BAD_REQUEST_BAD_TYPE);
                return;
            }
        };

        match self.state {
            ConnState::WaitForHello => match msg {
                Message::Hello(hello) => self.hello_rcvd(ctx, now, &envelope, hello),
                _ => {
                    warn!(self.log, "non-HELLO message during handshake"; "ty" => envelope.header.ty);
                    self.reject(ctx, now, &envelope, OfpErr::BAD_REQUEST_BAD_TYPE);
                }
            },
            ConnState::WaitForFeatures => match msg {
                Message::FeaturesReply(reply) => {
                    self.xids.remove(MsgKind::FeaturesRequest, envelope.header.xid);
                    self.aux_id = reply.auxiliary_id;
                    self.features = Some(reply);
                    self.engine_push(Engine::FeaturesRcvd);
                    self.run_engine(ctx, now);
                }
                Message::EchoRequest(echo) => self.echo_request_rcvd(ctx, now, &envelope, echo),
                Message::Error(ref e) => {
                    warn!(self.log, "error during features exchange"; "err" => %e.err);
                    self.disconnect(ctx, now);
                }
                _ => {
                    debug!(self.log, "ignoring message before features reply"; "ty" => envelope.header.ty);
                }
            },
            ConnState::Established => self.process_established(ctx, now, envelope, msg),
            ConnState::Disconnected | ConnState::ConnectPending => {
                debug!(self.log, "dropping message in inactive state"; "state" => ?self.state);
            }
        }
    }

    fn process_established(
        &mut self,
        ctx: &mut Context,
        now: u64,
        envelope: Envelope,
        msg: Message,
    ) {
        // a peer must keep talking the negotiated version
        if envelope.version() != self.version {
            warn!(self.log, "message with wrong version"; "got" => envelope.header.version);
            self.reject(ctx, now, &envelope, OfpErr::BAD_REQUEST_BAD_VERSION);
            return;
        }
        match msg {
            Message::Hello(_) => {
                debug!(self.log, "ignoring redundant HELLO");
            }
            Message::EchoRequest(echo) => self.echo_request_rcvd(ctx, now, &envelope, echo),
            Message::EchoReply(_) => {
                if self.xids.remove(MsgKind::EchoRequest, envelope.header.xid).is_some() {
                    self.engine_push(Engine::EchoRcvd);
                    self.run_engine(ctx, now);
                } else {
                    debug!(self.log, "unsolicited echo reply"; "xid" => envelope.header.xid);
                }
            }
            Message::Error(ref e) if e.err.ty == ::error_type::HELLO_FAILED => {
                warn!(self.log, "peer reports hello failure"; "err" => %e.err);
                self.disconnect(ctx, now);
            }
            other => {
                self.out.push(ConnEvent::Message {
                    xid: envelope.header.xid,
                    msg: other,
                });
            }
        }
    }

    fn echo_request_rcvd(&mut self, ctx: &mut Context, now: u64, envelope: &Envelope, echo: Echo) {
        let version = match self.version {
            Some(v) => v,
            None => return,
        };
        let reply = Message::EchoReply(echo);
        if self
            .send_raw(ctx, version, &reply, envelope.header.xid)
            .is_err()
        {
            self.disconnect(ctx, now);
        }
    }

    fn hello_rcvd(&mut self, ctx: &mut Context, now: u64, envelope: &Envelope, hello: Hello) {
        if let Some(bitmap) = hello.bitmap {
            self.versionbitmap_peer = bitmap;
        }
        match self.negotiate(&hello, envelope.header.version) {
            Some(version) => {
                debug!(self.log, "negotiated version"; "version" => %version);
                self.version = Some(version);
                self.engine_push(Engine::HelloRcvd);
                self.run_engine(ctx, now);
            }
            None => {
                warn!(
                    self.log,
                    "no common version";
                    "local" => %self.versionbitmap,
                    "peer_header" => envelope.header.version
                );
                // answer on our highest version so the peer can parse it
                let version = self.versionbitmap.highest().unwrap_or(Version::V1_0);
                let err = Message::Error(msg::error_for(OfpErr::HELLO_INCOMPATIBLE, envelope));
                let _ = self.send_raw(ctx, version, &err, envelope.header.xid);
                self.disconnect(ctx, now);
            }
        }
    }

    /// Bitmap intersection when the peer advertises one, numeric minimum of
    /// the header versions otherwise; the result must be in our own bitmap.
    fn negotiate(&self, hello: &Hello, peer_header_version: u8) -> Option<Version> {
        if hello.bitmap.is_some() {
            return self.versionbitmap.intersect(&self.versionbitmap_peer).highest();
        }
        let local_max = self.versionbitmap.highest()?;
        let wire = ::std::cmp::min(local_max.to_wire(), peer_header_version);
        let candidate = Version::from_wire(wire)?;
        if self.versionbitmap.contains(candidate) {
            Some(candidate)
        } else {
            None
        }
    }

    /// Emit an OF error reply and close: framing and protocol errors are
    /// fatal for the connection.
    fn reject(&mut self, ctx: &mut Context, now: u64, envelope: &Envelope, err: OfpErr) {
        if let Some(version) = self.version.or_else(|| self.versionbitmap.highest()) {
            let reply = Message::Error(msg::error_for(err, envelope));
            let _ = self.send_raw(ctx, version, &reply, envelope.header.xid);
        }
        self.disconnect(ctx, now);
    }
}

impl ::std::fmt::Debug for RofConn {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("RofConn")
            .field("id", &self.id)
            .field("aux_id", &self.aux_id)
            .field("state", &self.state)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sock::SockParams;
    use std::collections::HashSet;

    fn test_conn(initial_xid: u32) -> RofConn {
        let params = SockParams {
            msg_size_cap: 1 << 16,
            rx_budget: 16,
            tx_high_watermark: 64,
            tx_low_watermark: 16,
            reconnect_initial: 1_000_000,
            reconnect_max: 16_000_000,
        };
        let log = Logger::root(::slog::Discard, o!());
        RofConn::new(
            log,
            ConnId(0),
            Side::Datapath,
            0,
            VersionBitmap::all(),
            RofSock::passive(&params),
            initial_xid,
        )
    }

    #[test]
    fn async_xids_skip_outstanding_entries() {
        let mut conn = test_conn(10);
        let sync = conn.get_sync_xid(0, MsgKind::EchoRequest, 0, 1_000).unwrap();
        assert_eq!(sync, 10);
        // counter has advanced past the registered xid
        assert_eq!(conn.get_async_xid().unwrap(), 11);
        // wrap the counter back onto the live entry: it must be skipped
        conn.next_xid = 10;
        assert_eq!(conn.get_async_xid().unwrap(), 11);
        conn.release_sync_xid(10);
        conn.next_xid = 10;
        assert_eq!(conn.get_async_xid().unwrap(), 10);
    }

    #[test]
    fn live_xids_never_collide() {
        let mut conn = test_conn(0xffff_fffd);
        let mut live = HashSet::new();
        for _ in 0..16 {
            let xid = conn
                .get_sync_xid(0, MsgKind::MultipartRequest, 3, 1_000)
                .unwrap();
            assert!(live.insert(xid), "xid {} issued twice", xid);
        }
        // release half and reallocate across the wraparound boundary
        let released: Vec<u32> = live.iter().cloned().take(8).collect();
        for xid in &released {
            conn.release_sync_xid(*xid);
            live.remove(xid);
        }
        for _ in 0..8 {
            let xid = conn
                .get_sync_xid(0, MsgKind::MultipartRequest, 3, 1_000)
                .unwrap();
            assert!(live.insert(xid), "xid {} issued twice", xid);
        }
    }

    #[test]
    fn wrong_version_negotiations() {
        let conn = test_conn(0);
        // bitmap intersection picks the shared maximum
        let hello = Hello {
            bitmap: Some(VersionBitmap::only(Version::V1_2)),
        };
        let mut probe = test_conn(0);
        probe.versionbitmap_peer = VersionBitmap::only(Version::V1_2);
        assert_eq!(probe.negotiate(&hello, 0x03), Some(Version::V1_2));
        // header fallback clamps to the smaller side
        let bare = Hello { bitmap: None };
        assert_eq!(conn.negotiate(&bare, 0x03), Some(Version::V1_2));
        assert_eq!(conn.negotiate(&bare, 0x05), Some(Version::V1_3));
        // 1.1 exists on the wire but not in this library
        assert_eq!(conn.negotiate(&bare, 0x02), None);
    }
}
