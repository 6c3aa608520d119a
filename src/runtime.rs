//! The main entry point to the library.
//!
//! `Runtime` performs no I/O whatsoever. It multiplexes every connection and
//! session of one reactor loop, generates a stream of [`Io`] operations for
//! a backend to perform via `poll_io`, and consumes socket events, inbound
//! bytes, and timer expirations via the `handle_*` methods. Application
//! events come out of `poll`, or through an [`AppObserver`].
//!
//! A worker pool is a set of independent `Runtime`s, one per thread;
//! nothing here is shared except the process-wide dpid registry.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use fnv::{FnvHashMap, FnvHashSet};
use rand::rngs::OsRng;
use rand::RngCore;
use slab::Slab;
use slog::Logger;

use chan::{ChanError, ChanSendError};
use conn::{ConnEvent, ConnState, RofConn};
use ctl::{CtlHandle, DatapathInfo};
use dpath::{DpAction, DpHandle, FlowModOp};
use message::MsgKind;
use msg::{
    ErrorMsg, ExperimenterMsg, FlowMod, FlowRemoved, GroupMod, Message, MeterMod, PacketIn,
    PacketOut, PortMod, PortStatus, RoleMsg, SwitchConfig,
};
use port::Port;
use sock::{RofSock, SockParams};
use stats::{StatsReply, StatsRequest};
use {EndpointConfig, Side, VersionBitmap, DEFAULT_MSG_SIZE_CAP};

/// Parameters governing every session of a runtime. All durations are in
/// microseconds, like every `now` in the API.
pub struct Config {
    /// Versions advertised in outbound HELLOs.
    pub versions: VersionBitmap,
    pub hello_timeout: u64,
    pub features_timeout: u64,
    pub get_config_timeout: u64,
    pub stats_timeout: u64,
    pub barrier_timeout: u64,
    pub echo_interval: u64,
    pub echo_timeout: u64,
    pub reconnect_initial: u64,
    pub reconnect_max: u64,
    /// Frames larger than this are a fatal framing error.
    pub msg_size_cap: usize,
    /// Messages surfaced per connection per input drain.
    pub rx_budget: usize,
    pub tx_high_watermark: usize,
    pub tx_low_watermark: usize,
}

impl Default for Config {
    fn default() -> Self {
        const SECOND: u64 = 1_000_000;
        Self {
            versions: VersionBitmap::all(),
            hello_timeout: 5 * SECOND,
            features_timeout: 5 * SECOND,
            get_config_timeout: 5 * SECOND,
            stats_timeout: 5 * SECOND,
            barrier_timeout: 5 * SECOND,
            echo_interval: 10 * SECOND,
            echo_timeout: 5 * SECOND,
            reconnect_initial: SECOND,
            reconnect_max: 16 * SECOND,
            msg_size_cap: DEFAULT_MSG_SIZE_CAP,
            rx_budget: 16,
            tx_high_watermark: 64,
            tx_low_watermark: 16,
        }
    }
}

impl Config {
    fn sock_params(&self) -> SockParams {
        SockParams {
            msg_size_cap: self.msg_size_cap,
            rx_budget: self.rx_budget,
            tx_high_watermark: self.tx_high_watermark,
            tx_low_watermark: self.tx_low_watermark,
            reconnect_initial: self.reconnect_initial,
            reconnect_max: self.reconnect_max,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SessionHandle(pub usize);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ConnId(pub usize);

/// Every timer the runtime ever arms, exhaustively. Backends key armed
/// timers by `(ConnId, Timer)`; session-level timers ride on the session's
/// main connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Timer {
    Hello,
    Features,
    EchoInterval,
    EchoTimeout,
    Reconnect,
    FeaturesReply,
    GetConfigReply,
    StatsReply,
    BarrierReply,
    PortDescReply,
}

/// I/O operations to be immediately executed by the backend.
#[derive(Debug)]
pub enum Io {
    /// Open a stream socket; report the outcome via `handle_connected` or
    /// `handle_connect_refused`.
    Connect {
        conn: ConnId,
        endpoint: EndpointConfig,
    },
    Close {
        conn: ConnId,
    },
    Transmit {
        conn: ConnId,
        frame: Bytes,
    },
    /// Start or reset a timer; `time` is absolute µs.
    TimerStart {
        conn: ConnId,
        timer: Timer,
        time: u64,
    },
    TimerStop {
        conn: ConnId,
        timer: Timer,
    },
}

/// Events of interest to the application.
#[derive(Debug)]
pub enum Event {
    /// A datapath finished its init sequence; fired once per channel
    /// lifetime.
    DpathOpen {
        sess: SessionHandle,
        dpid: u64,
    },
    DpathClose {
        sess: SessionHandle,
        dpid: Option<u64>,
    },
    PacketIn {
        sess: SessionHandle,
        dpid: u64,
        aux_id: u8,
        msg: PacketIn,
    },
    FlowRemoved {
        sess: SessionHandle,
        dpid: u64,
        msg: FlowRemoved,
    },
    PortStatus {
        sess: SessionHandle,
        dpid: u64,
        reason: u8,
        desc: Port,
    },
    StatsReply {
        sess: SessionHandle,
        dpid: u64,
        xid: u32,
        /// Further parts of the same reply follow under this xid.
        more: bool,
        body: StatsReply,
    },
    BarrierReply {
        sess: SessionHandle,
        dpid: u64,
        xid: u32,
    },
    RoleReply {
        sess: SessionHandle,
        dpid: u64,
        msg: RoleMsg,
    },
    /// OFPT_ERROR from the peer; the runtime does not attempt recovery.
    PeerError {
        sess: SessionHandle,
        dpid: Option<u64>,
        xid: u32,
        msg: ErrorMsg,
    },
    Experimenter {
        sess: SessionHandle,
        dpid: Option<u64>,
        msg: ExperimenterMsg,
    },
    /// An outstanding request of `kind` hit its deadline.
    RequestTimeout {
        sess: SessionHandle,
        kind: MsgKind,
        xid: u32,
    },
    /// Local flow-table bookkeeping for a FLOW_MOD this side sent.
    FlowModApplied {
        sess: SessionHandle,
        dpid: u64,
        op: FlowModOp,
        flow: FlowMod,
    },
    /// A congested connection dropped below its low watermark; sends may
    /// be retried.
    SendDrained {
        conn: ConnId,
    },
    /// Datapath role: a controller channel came up.
    CtlOpen {
        sess: SessionHandle,
    },
    CtlClose {
        sess: SessionHandle,
    },
    /// Datapath role: a message the application must act on (flow-mod,
    /// packet-out, stats the core cannot answer, ...).
    CtlMessage {
        sess: SessionHandle,
        aux_id: u8,
        xid: u32,
        msg: Message,
    },
}

pub struct Context {
    pub config: Arc<Config>,
    pub rng: OsRng,
    pub io: VecDeque<Io>,
    pub events: VecDeque<Event>,
    pub dirty: FnvHashSet<ConnId>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Owner {
    /// Controller-side connection whose identity is not known yet; routed
    /// to a session once the handshake names dpid and aux id.
    Pending,
    Sess(SessionHandle),
}

enum Session {
    Dpath(DpHandle),
    Ctl(CtlHandle),
}

impl Session {
    fn conn_ids(&self) -> Vec<ConnId> {
        match *self {
            Session::Dpath(ref dp) => dp.chan().conn_ids(),
            Session::Ctl(ref ctl) => ctl.chan().conn_ids(),
        }
    }

    fn teardown(&mut self, ctx: &mut Context, arena: &mut Slab<RofConn>) {
        match *self {
            Session::Dpath(ref mut dp) => dp.teardown(ctx, arena),
            Session::Ctl(ref mut ctl) => ctl.teardown(ctx, arena),
        }
    }
}

pub struct Runtime {
    log: Logger,
    pub(crate) ctx: Context,
    conns: Slab<RofConn>,
    sessions: Slab<Session>,
    owners: FnvHashMap<ConnId, Owner>,
    dpids: FnvHashMap<u64, SessionHandle>,
}

impl Runtime {
    pub fn new(log: Logger, config: Config) -> Self {
        assert!(
            !config.versions.is_empty(),
            "runtime must speak at least one version"
        );
        assert!(config.tx_low_watermark < config.tx_high_watermark);
        Runtime {
            log,
            ctx: Context {
                config: Arc::new(config),
                rng: OsRng::new().unwrap(),
                io: VecDeque::new(),
                events: VecDeque::new(),
                dirty: FnvHashSet::default(),
            },
            conns: Slab::new(),
            sessions: Slab::new(),
            owners: FnvHashMap::default(),
            dpids: FnvHashMap::default(),
        }
    }

    /// Get an application-facing event.
    pub fn poll(&mut self) -> Option<Event> {
        self.ctx.events.pop_front()
    }

    /// Get a pending IO operation, flushing dirty write queues on the way.
    pub fn poll_io(&mut self) -> Option<Io> {
        loop {
            if let Some(io) = self.ctx.io.pop_front() {
                return Some(io);
            }
            let conn = match self.ctx.dirty.iter().next() {
                Some(&conn) => conn,
                None => return None,
            };
            self.ctx.dirty.remove(&conn);
            self.flush_conn(conn);
        }
    }

    fn flush_conn(&mut self, conn: ConnId) {
        let sock = match self.conns.get_mut(conn.0) {
            Some(c) => c.sock_mut(),
            None => return,
        };
        loop {
            let (frame, drained) = sock.poll_transmit();
            if drained {
                self.ctx.events.push_back(Event::SendDrained { conn });
            }
            match frame {
                Some(frame) => self.ctx.io.push_back(Io::Transmit { conn, frame }),
                None => break,
            }
        }
    }

    // ---- connection and session factories -------------------------------

    fn new_conn(
        &mut self,
        side: Side,
        aux_id: u8,
        versions: VersionBitmap,
        sock: RofSock,
    ) -> ConnId {
        let entry = self.conns.vacant_entry();
        let id = ConnId(entry.key());
        let log = self.log.new(o!("conn" => id.0, "aux" => aux_id));
        let initial_xid = self.ctx.rng.next_u32();
        entry.insert(RofConn::new(
            log,
            id,
            side,
            aux_id,
            versions,
            sock,
            initial_xid,
        ));
        id
    }

    /// Controller side: dial a datapath. The connection stays pending until
    /// its handshake names the dpid, then a `DpHandle` session is created
    /// (or joined, for auxiliaries) automatically.
    pub fn connect_datapath(&mut self, endpoint: EndpointConfig) -> ConnId {
        let versions = self.ctx.config.versions;
        let sock = RofSock::active(endpoint, &self.ctx.config.sock_params());
        let conn = self.new_conn(Side::Controller, 0, versions, sock);
        self.owners.insert(conn, Owner::Pending);
        self.conns[conn.0].connect(&mut self.ctx);
        conn
    }

    /// Controller side: adopt a connection accepted by the backend's
    /// listener. HELLO goes out immediately.
    pub fn accept_datapath(&mut self, now: u64) -> ConnId {
        let versions = self.ctx.config.versions;
        let sock = RofSock::passive(&self.ctx.config.sock_params());
        let conn = self.new_conn(Side::Controller, 0, versions, sock);
        self.owners.insert(conn, Owner::Pending);
        self.conns[conn.0].on_adopted(&mut self.ctx, now);
        conn
    }

    /// Datapath side: dial a controller, creating the session up front.
    pub fn connect_controller(
        &mut self,
        endpoint: EndpointConfig,
        info: DatapathInfo,
    ) -> (SessionHandle, ConnId) {
        let sess = self.new_ctl_session(info);
        let versions = self.ctx.config.versions;
        let sock = RofSock::active(endpoint, &self.ctx.config.sock_params());
        let conn = self.new_conn(Side::Datapath, 0, versions, sock);
        self.attach_conn(sess, 0, conn);
        self.conns[conn.0].connect(&mut self.ctx);
        (sess, conn)
    }

    /// Datapath side: adopt an accepted controller connection as a new
    /// session's main.
    pub fn accept_controller(
        &mut self,
        now: u64,
        info: DatapathInfo,
    ) -> (SessionHandle, ConnId) {
        let sess = self.new_ctl_session(info);
        let versions = self.ctx.config.versions;
        let sock = RofSock::passive(&self.ctx.config.sock_params());
        let conn = self.new_conn(Side::Datapath, 0, versions, sock);
        self.attach_conn(sess, 0, conn);
        self.conns[conn.0].on_adopted(&mut self.ctx, now);
        (sess, conn)
    }

    /// Dial an auxiliary connection for an established session (OF1.3+).
    /// Fails with `ChanError::Invalid` before the main is up or below 1.3.
    pub fn add_aux_conn(
        &mut self,
        sess: SessionHandle,
        aux_id: u8,
        endpoint: EndpointConfig,
    ) -> Result<ConnId, ChanError> {
        let (bitmap, side) = {
            let local = self.ctx.config.versions;
            let session = self.sessions.get(sess.0).ok_or(ChanError::NotFound)?;
            match *session {
                Session::Dpath(ref dp) => (
                    dp.chan().admission(&self.conns, aux_id, local)?,
                    Side::Controller,
                ),
                Session::Ctl(ref ctl) => (
                    ctl.chan().admission(&self.conns, aux_id, local)?,
                    Side::Datapath,
                ),
            }
        };
        let sock = RofSock::active(endpoint, &self.ctx.config.sock_params());
        let conn = self.new_conn(side, aux_id, bitmap, sock);
        self.attach_conn(sess, aux_id, conn);
        self.conns[conn.0].connect(&mut self.ctx);
        Ok(conn)
    }

    fn new_ctl_session(&mut self, info: DatapathInfo) -> SessionHandle {
        let entry = self.sessions.vacant_entry();
        let sess = SessionHandle(entry.key());
        let log = self.log.new(o!("sess" => sess.0, "dpid" => info.dpid));
        entry.insert(Session::Ctl(CtlHandle::new(log, sess, info)));
        sess
    }

    fn new_dpath_session(&mut self, dpid: u64) -> SessionHandle {
        let entry = self.sessions.vacant_entry();
        let sess = SessionHandle(entry.key());
        let log = self.log.new(o!("sess" => sess.0, "dpid" => dpid));
        entry.insert(Session::Dpath(DpHandle::new(log, sess)));
        sess
    }

    fn attach_conn(&mut self, sess: SessionHandle, aux_id: u8, conn: ConnId) {
        {
            let session = &mut self.sessions[sess.0];
            let chan = match *session {
                Session::Dpath(ref mut dp) => dp.chan_mut(),
                Session::Ctl(ref mut ctl) => ctl.chan_mut(),
            };
            chan.attach(aux_id, conn).expect("validated aux id");
        }
        self.owners.insert(conn, Owner::Sess(sess));
    }

    // ---- teardown --------------------------------------------------------

    /// Destroy a session and every connection it owns.
    pub fn drop_session(&mut self, sess: SessionHandle) {
        self.destroy_session(sess);
    }

    /// Tear down one connection; dropping the main tears the auxiliaries
    /// down first.
    pub fn drop_conn(&mut self, now: u64, sess: SessionHandle, aux_id: u8) -> Result<(), ChanError> {
        {
            let session = self.sessions.get_mut(sess.0).ok_or(ChanError::NotFound)?;
            match *session {
                Session::Dpath(ref mut dp) => {
                    dp.drop_conn(&mut self.ctx, &mut self.conns, now, aux_id)?
                }
                Session::Ctl(ref mut ctl) => {
                    ctl.drop_conn(&mut self.ctx, &mut self.conns, now, aux_id)?
                }
            }
        }
        self.prune_owners();
        Ok(())
    }

    fn destroy_session(&mut self, sess: SessionHandle) {
        if !self.sessions.contains(sess.0) {
            return;
        }
        let mut session = self.sessions.remove(sess.0);
        for id in session.conn_ids() {
            self.owners.remove(&id);
        }
        session.teardown(&mut self.ctx, &mut self.conns);
        self.dpids.retain(|_, s| *s != sess);
    }

    fn drop_pending(&mut self, conn: ConnId) {
        if let Some(c) = self.conns.get_mut(conn.0) {
            c.close_silent(&mut self.ctx);
        }
        if self.conns.contains(conn.0) {
            self.conns.remove(conn.0);
        }
        self.owners.remove(&conn);
        self.ctx.dirty.remove(&conn);
    }

    fn prune_owners(&mut self) {
        let conns = &self.conns;
        self.owners.retain(|c, _| conns.contains(c.0));
    }

    // ---- socket and timer stimuli ---------------------------------------

    pub fn handle_connected(&mut self, now: u64, conn: ConnId) {
        if let Some(c) = self.conns.get_mut(conn.0) {
            c.handle_connected(&mut self.ctx, now);
        }
        self.after_conn_stimulus(now, conn);
    }

    pub fn handle_connect_refused(&mut self, now: u64, conn: ConnId) {
        if let Some(c) = self.conns.get_mut(conn.0) {
            c.handle_connect_refused(&mut self.ctx, now);
        }
        self.after_conn_stimulus(now, conn);
    }

    pub fn handle_closed(&mut self, now: u64, conn: ConnId) {
        if let Some(c) = self.conns.get_mut(conn.0) {
            c.handle_closed(&mut self.ctx, now);
        }
        self.after_conn_stimulus(now, conn);
    }

    /// Feed inbound stream bytes. Returns true when complete messages
    /// stayed buffered because the per-turn budget was hit; call again
    /// (an empty slice is fine) after servicing other connections.
    pub fn handle_input(&mut self, now: u64, conn: ConnId, data: &[u8]) -> bool {
        let more = match self.conns.get_mut(conn.0) {
            Some(c) => c.handle_input(&mut self.ctx, now, data),
            None => false,
        };
        self.after_conn_stimulus(now, conn);
        more
    }

    /// A timer armed via `Io::TimerStart` fired.
    pub fn handle_timeout(&mut self, now: u64, conn: ConnId, timer: Timer) {
        match timer {
            Timer::Hello
            | Timer::Features
            | Timer::EchoInterval
            | Timer::EchoTimeout
            | Timer::Reconnect => {
                if let Some(c) = self.conns.get_mut(conn.0) {
                    c.handle_timeout(&mut self.ctx, now, timer);
                }
                self.after_conn_stimulus(now, conn);
            }
            _ => {
                let owner = self.owners.get(&conn).cloned();
                if let Some(Owner::Sess(sess)) = owner {
                    if let Some(session) = self.sessions.get_mut(sess.0) {
                        if let Session::Dpath(ref mut dp) = *session {
                            dp.handle_timeout(&mut self.ctx, &mut self.conns, now, timer);
                        }
                    }
                    self.run_session_actions(sess);
                }
            }
        }
    }

    fn after_conn_stimulus(&mut self, now: u64, conn: ConnId) {
        let (events, aux) = match self.conns.get_mut(conn.0) {
            Some(c) => (c.take_events(), c.aux_id()),
            None => return,
        };
        if events.is_empty() {
            return;
        }
        match self.owners.get(&conn).cloned() {
            Some(Owner::Sess(sess)) => {
                for ev in events {
                    self.dispatch_conn_event(now, sess, aux, ev);
                }
                self.run_session_actions(sess);
            }
            Some(Owner::Pending) => self.route_pending(now, conn, events),
            None => {
                debug!(self.log, "events from unowned connection"; "conn" => conn.0);
            }
        }
    }

    fn dispatch_conn_event(&mut self, now: u64, sess: SessionHandle, aux: u8, ev: ConnEvent) {
        if let Some(session) = self.sessions.get_mut(sess.0) {
            match *session {
                Session::Dpath(ref mut dp) => {
                    dp.on_conn_event(&mut self.ctx, &mut self.conns, now, aux, ev)
                }
                Session::Ctl(ref mut ctl) => {
                    ctl.on_conn_event(&mut self.ctx, &mut self.conns, now, aux, ev)
                }
            }
        }
        self.prune_owners();
    }

    fn run_session_actions(&mut self, sess: SessionHandle) {
        let actions = match self.sessions.get_mut(sess.0) {
            Some(session) => match *session {
                Session::Dpath(ref mut dp) => dp.take_actions(),
                Session::Ctl(_) => return,
            },
            None => return,
        };
        for action in actions {
            match action {
                DpAction::DpidClaimed { dpid } => {
                    if let Some(&old) = self.dpids.get(&dpid) {
                        if old != sess {
                            warn!(
                                self.log,
                                "duplicate dpid, destroying stale session";
                                "dpid" => dpid,
                                "stale" => old.0
                            );
                            self.destroy_session(old);
                        }
                    }
                    self.dpids.insert(dpid, sess);
                }
                DpAction::Terminate => {
                    info!(self.log, "terminating session"; "sess" => sess.0);
                    self.destroy_session(sess);
                    return;
                }
            }
        }
    }

    /// A pending controller-side connection produced events: on handshake
    /// completion, route it into a datapath session by the dpid and aux id
    /// its FEATURES exchange named.
    fn route_pending(&mut self, now: u64, conn: ConnId, events: Vec<ConnEvent>) {
        for event in events {
            match event {
                ConnEvent::Established { version } => {
                    let (dpid, aux) = {
                        let c = &self.conns[conn.0];
                        (c.dpid(), c.aux_id())
                    };
                    let dpid = match dpid {
                        Some(dpid) => dpid,
                        None => {
                            warn!(self.log, "handshake ended without a dpid, dropping");
                            self.drop_pending(conn);
                            return;
                        }
                    };
                    if aux == 0 {
                        if let Some(&old) = self.dpids.get(&dpid) {
                            warn!(
                                self.log,
                                "dpid reappeared on a new connection, displacing old handle";
                                "dpid" => dpid
                            );
                            self.destroy_session(old);
                        }
                        let sess = self.new_dpath_session(dpid);
                        self.attach_conn(sess, 0, conn);
                        self.dpids.insert(dpid, sess);
                        self.dispatch_conn_event(now, sess, 0, ConnEvent::Established { version });
                        self.run_session_actions(sess);
                    } else {
                        let sess = match self.dpids.get(&dpid).cloned() {
                            Some(sess) => sess,
                            None => {
                                warn!(
                                    self.log,
                                    "auxiliary connection for unknown dpid";
                                    "dpid" => dpid,
                                    "aux" => aux
                                );
                                self.drop_pending(conn);
                                return;
                            }
                        };
                        // a lingering connection under this aux id is stale
                        let occupied = match self.sessions.get(sess.0) {
                            Some(session) => match *session {
                                Session::Dpath(ref dp) => dp.chan().conn(aux).is_some(),
                                Session::Ctl(ref ctl) => ctl.chan().conn(aux).is_some(),
                            },
                            None => false,
                        };
                        if occupied {
                            let _ = self.drop_conn(now, sess, aux);
                        }
                        let local = self.ctx.config.versions;
                        let admitted = match self.sessions.get(sess.0) {
                            Some(session) => match *session {
                                Session::Dpath(ref dp) => {
                                    dp.chan().admission(&self.conns, aux, local)
                                }
                                Session::Ctl(ref ctl) => {
                                    ctl.chan().admission(&self.conns, aux, local)
                                }
                            },
                            None => Err(ChanError::NotFound),
                        };
                        if let Err(e) = admitted {
                            warn!(self.log, "auxiliary rejected"; "aux" => aux, "reason" => %e);
                            self.drop_pending(conn);
                            return;
                        }
                        self.attach_conn(sess, aux, conn);
                        self.dispatch_conn_event(now, sess, aux, ConnEvent::Established { version });
                    }
                }
                ConnEvent::Closed | ConnEvent::Refused => {
                    self.drop_pending(conn);
                    return;
                }
                ConnEvent::Message { .. } => {
                    debug!(self.log, "message from unrouted connection, dropped");
                }
            }
        }
    }

    // ---- application-facing senders -------------------------------------

    fn with_dpath<T, F>(&mut self, sess: SessionHandle, f: F) -> Result<T, ChanSendError>
    where
        F: FnOnce(&mut DpHandle, &mut Context, &mut Slab<RofConn>) -> Result<T, ChanSendError>,
    {
        match self.sessions.get_mut(sess.0) {
            Some(session) => match *session {
                Session::Dpath(ref mut dp) => f(dp, &mut self.ctx, &mut self.conns),
                Session::Ctl(_) => Err(ChanSendError::Chan(ChanError::NotFound)),
            },
            None => Err(ChanSendError::Chan(ChanError::NotFound)),
        }
    }

    fn with_ctl<T, F>(&mut self, sess: SessionHandle, f: F) -> Result<T, ChanSendError>
    where
        F: FnOnce(&mut CtlHandle, &mut Context, &mut Slab<RofConn>) -> Result<T, ChanSendError>,
    {
        match self.sessions.get_mut(sess.0) {
            Some(session) => match *session {
                Session::Ctl(ref mut ctl) => f(ctl, &mut self.ctx, &mut self.conns),
                Session::Dpath(_) => Err(ChanSendError::Chan(ChanError::NotFound)),
            },
            None => Err(ChanSendError::Chan(ChanError::NotFound)),
        }
    }

    /// Send a pre-built message on the named connection of a session.
    pub fn send_message(
        &mut self,
        sess: SessionHandle,
        aux_id: u8,
        msg: &Message,
        xid: u32,
    ) -> Result<(), ChanSendError> {
        match self.sessions.get_mut(sess.0) {
            Some(session) => match *session {
                Session::Dpath(ref mut dp) => {
                    dp.send_message(&mut self.ctx, &mut self.conns, aux_id, msg, xid)
                }
                Session::Ctl(ref mut ctl) => {
                    ctl.send_message(&mut self.ctx, &mut self.conns, aux_id, msg, xid)
                }
            },
            None => Err(ChanSendError::Chan(ChanError::NotFound)),
        }
    }

    /// A fresh xid on the session's main connection, for embedders that
    /// build their own messages.
    pub fn alloc_xid(&mut self, sess: SessionHandle) -> Result<u32, ChanSendError> {
        let main = match self.sessions.get(sess.0) {
            Some(session) => match *session {
                Session::Dpath(ref dp) => dp.chan().main(),
                Session::Ctl(ref ctl) => ctl.chan().main(),
            },
            None => None,
        };
        let main = main.ok_or(ChanSendError::Chan(ChanError::NotFound))?;
        self.conns[main.0]
            .get_async_xid()
            .map_err(ChanSendError::Conn)
    }

    pub fn send_flow_mod(
        &mut self,
        sess: SessionHandle,
        fm: FlowMod,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.send_flow_mod(ctx, conns, fm))
    }

    pub fn flow_mod_reset(&mut self, sess: SessionHandle) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.flow_mod_reset(ctx, conns))
    }

    pub fn send_group_mod(
        &mut self,
        sess: SessionHandle,
        gm: GroupMod,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.send_group_mod(ctx, conns, gm))
    }

    pub fn send_meter_mod(
        &mut self,
        sess: SessionHandle,
        mm: MeterMod,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.send_meter_mod(ctx, conns, mm))
    }

    pub fn send_packet_out(
        &mut self,
        sess: SessionHandle,
        po: PacketOut,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.send_packet_out(ctx, conns, po))
    }

    pub fn send_port_mod(
        &mut self,
        sess: SessionHandle,
        pm: PortMod,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.send_port_mod(ctx, conns, pm))
    }

    pub fn send_set_config(
        &mut self,
        sess: SessionHandle,
        config: SwitchConfig,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.send_set_config(ctx, conns, config))
    }

    pub fn send_stats_request(
        &mut self,
        now: u64,
        sess: SessionHandle,
        request: StatsRequest,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| {
            dp.send_stats_request(ctx, conns, now, request)
        })
    }

    pub fn send_barrier_request(
        &mut self,
        now: u64,
        sess: SessionHandle,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| dp.send_barrier_request(ctx, conns, now))
    }

    pub fn send_role_request(
        &mut self,
        now: u64,
        sess: SessionHandle,
        role: RoleMsg,
    ) -> Result<u32, ChanSendError> {
        self.with_dpath(sess, |dp, ctx, conns| {
            dp.send_role_request(ctx, conns, now, role)
        })
    }

    pub fn send_packet_in(
        &mut self,
        sess: SessionHandle,
        aux_id: u8,
        packet_in: PacketIn,
    ) -> Result<u32, ChanSendError> {
        self.with_ctl(sess, |ctl, ctx, conns| {
            ctl.send_packet_in(ctx, conns, aux_id, packet_in)
        })
    }

    pub fn send_flow_removed(
        &mut self,
        sess: SessionHandle,
        removed: FlowRemoved,
    ) -> Result<u32, ChanSendError> {
        self.with_ctl(sess, |ctl, ctx, conns| {
            ctl.send_flow_removed(ctx, conns, removed)
        })
    }

    pub fn send_port_status(
        &mut self,
        sess: SessionHandle,
        status: PortStatus,
    ) -> Result<u32, ChanSendError> {
        self.with_ctl(sess, |ctl, ctx, conns| {
            ctl.send_port_status(ctx, conns, status)
        })
    }

    // ---- introspection ---------------------------------------------------

    pub fn dpath(&self, sess: SessionHandle) -> Option<&DpHandle> {
        match self.sessions.get(sess.0) {
            Some(&Session::Dpath(ref dp)) => Some(dp),
            _ => None,
        }
    }

    pub fn ctl(&self, sess: SessionHandle) -> Option<&CtlHandle> {
        match self.sessions.get(sess.0) {
            Some(&Session::Ctl(ref ctl)) => Some(ctl),
            _ => None,
        }
    }

    pub fn dpath_by_dpid(&self, dpid: u64) -> Option<SessionHandle> {
        self.dpids.get(&dpid).cloned()
    }

    pub fn conn_state(&self, conn: ConnId) -> Option<ConnState> {
        self.conns.get(conn.0).map(RofConn::state)
    }

    pub fn is_established(&self, sess: SessionHandle) -> bool {
        match self.sessions.get(sess.0) {
            Some(&Session::Dpath(ref dp)) => dp.chan().is_established(&self.conns),
            Some(&Session::Ctl(ref ctl)) => ctl.chan().is_established(&self.conns),
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }
}

/// Capability surface for embedders that prefer callbacks over polling:
/// handlers run synchronously on the loop thread and must not block. The
/// default methods ignore everything, so applications implement only what
/// they care about.
pub trait AppObserver {
    fn handle_dpath_open(&mut self, _sess: SessionHandle, _dpid: u64) {}
    fn handle_dpath_close(&mut self, _sess: SessionHandle, _dpid: Option<u64>) {}
    fn handle_packet_in(&mut self, _sess: SessionHandle, _dpid: u64, _aux_id: u8, _msg: &PacketIn) {
    }
    fn handle_flow_removed(&mut self, _sess: SessionHandle, _dpid: u64, _msg: &FlowRemoved) {}
    fn handle_port_status(&mut self, _sess: SessionHandle, _dpid: u64, _reason: u8, _desc: &Port) {}
    fn handle_stats_reply(
        &mut self,
        _sess: SessionHandle,
        _dpid: u64,
        _xid: u32,
        _more: bool,
        _body: &StatsReply,
    ) {
    }
    fn handle_barrier_reply(&mut self, _sess: SessionHandle, _dpid: u64, _xid: u32) {}
    fn handle_role_reply(&mut self, _sess: SessionHandle, _dpid: u64, _msg: &RoleMsg) {}
    fn handle_error(&mut self, _sess: SessionHandle, _xid: u32, _msg: &ErrorMsg) {}
    fn handle_experimenter(&mut self, _sess: SessionHandle, _msg: &ExperimenterMsg) {}
    fn handle_request_timeout(&mut self, _sess: SessionHandle, _kind: MsgKind, _xid: u32) {}
    /// Everything without a dedicated method above.
    fn handle_event(&mut self, _event: &Event) {}
}

impl Runtime {
    /// Drain pending events through an observer.
    pub fn dispatch_events<O: AppObserver>(&mut self, observer: &mut O) {
        while let Some(event) = self.poll() {
            match event {
                Event::DpathOpen { sess, dpid } => observer.handle_dpath_open(sess, dpid),
                Event::DpathClose { sess, dpid } => observer.handle_dpath_close(sess, dpid),
                Event::PacketIn {
                    sess,
                    dpid,
                    aux_id,
                    ref msg,
                } => observer.handle_packet_in(sess, dpid, aux_id, msg),
                Event::FlowRemoved { sess, dpid, ref msg } => {
                    observer.handle_flow_removed(sess, dpid, msg)
                }
                Event::PortStatus {
                    sess,
                    dpid,
                    reason,
                    ref desc,
                } => observer.handle_port_status(sess, dpid, reason, desc),
                Event::StatsReply {
                    sess,
                    dpid,
                    xid,
                    more,
                    ref body,
                } => observer.handle_stats_reply(sess, dpid, xid, more, body),
                Event::BarrierReply { sess, dpid, xid } => {
                    observer.handle_barrier_reply(sess, dpid, xid)
                }
                Event::RoleReply { sess, dpid, ref msg } => {
                    observer.handle_role_reply(sess, dpid, msg)
                }
                Event::PeerError { sess, xid, ref msg, .. } => {
                    observer.handle_error(sess, xid, msg)
                }
                Event::Experimenter { sess, ref msg, .. } => {
                    observer.handle_experimenter(sess, msg)
                }
                Event::RequestTimeout { sess, kind, xid } => {
                    observer.handle_request_timeout(sess, kind, xid)
                }
                ref other => observer.handle_event(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = Config::default();
        assert_eq!(config.hello_timeout, 5_000_000);
        assert_eq!(config.echo_interval, 10_000_000);
        assert_eq!(config.reconnect_initial, 1_000_000);
        assert_eq!(config.reconnect_max, 16_000_000);
        assert!(config.versions.contains(::Version::V1_3));
        assert!(config.tx_low_watermark < config.tx_high_watermark);
    }
}
