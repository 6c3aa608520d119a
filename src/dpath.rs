//! `DpHandle`: the controller-side session object for one datapath. Wraps a
//! [`RofChan`], drives the post-handshake init sequence, keeps the observed
//! switch state (ports, tables, groups, meters), and correlates outstanding
//! requests through the main connection's [`XidStore`].
//!
//! Init sequence: FEATURES → GET_CONFIG → TABLE_STATS → (OF1.3: PORT_DESC)
//! → Running, each step guarded by a reply timer whose expiry terminates
//! the session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use fnv::FnvHashMap;
use slab::Slab;
use slog::Logger;

use chan::{ChanEvent, ChanSendError, RofChan};
use conn::{ConnEvent, RofConn};
use message::MsgKind;
use msg::{
    self, FlowMod, GroupMod, Message, MeterMod, PacketOut, PortMod, RoleMsg, SwitchConfig,
};
use port::Port;
use runtime::{ConnId, Context, Event, Io, SessionHandle, Timer};
use stats::{MultipartRequest, StatsReply, StatsRequest, TableStatsEntry};
use Version;

/// Process-wide claim table detecting the same dpid appearing twice, also
/// across worker loops. Values are per-handle tokens.
mod registry {
    use super::*;

    lazy_static! {
        static ref DPIDS: Mutex<FnvHashMap<u64, usize>> = Mutex::new(FnvHashMap::default());
    }
    static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

    pub fn token() -> usize {
        NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim `dpid`; returns the previous holder's token if there was one.
    pub fn claim(dpid: u64, token: usize) -> Option<usize> {
        let mut map = DPIDS.lock().unwrap();
        let prev = map.insert(dpid, token);
        prev.filter(|&p| p != token)
    }

    pub fn release(dpid: u64, token: usize) {
        let mut map = DPIDS.lock().unwrap();
        if map.get(&dpid) == Some(&token) {
            map.remove(&dpid);
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DpState {
    Down,
    WaitFeatures,
    WaitGetConfig,
    WaitTableStats,
    WaitPortDesc,
    Running,
}

/// Follow-ups the runtime must perform on the session's behalf, since a
/// session cannot reach its siblings.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DpAction {
    /// FEATURES_REPLY named this dpid; any older handle for it must die.
    DpidClaimed { dpid: u64 },
    /// Init sequence failed; destroy this session.
    Terminate,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlowModOp {
    Add,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct FlowKey {
    priority: u16,
    match_key: Vec<u8>,
    cookie: u64,
}

impl FlowKey {
    fn of(fm: &FlowMod) -> FlowKey {
        FlowKey {
            priority: fm.priority,
            match_key: fm.fields.key_bytes(),
            cookie: fm.cookie & fm.cookie_mask,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowEntry {
    pub priority: u16,
    pub cookie: u64,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub fields: ::oxm::Match,
    pub instructions: Vec<::action::Instruction>,
}

#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub group_type: u8,
    pub buckets: Vec<::action::Bucket>,
}

#[derive(Debug, Clone)]
pub struct MeterEntry {
    pub flags: u16,
    pub bands: Vec<msg::MeterBand>,
}

pub struct DpHandle {
    log: Logger,
    sess: SessionHandle,
    chan: RofChan,
    state: DpState,
    token: usize,
    dpid: Option<u64>,
    n_buffers: u32,
    n_tables: u8,
    capabilities: u32,
    config: SwitchConfig,
    ports: BTreeMap<u32, Port>,
    tables: Vec<TableStatsEntry>,
    flows: FnvHashMap<u8, FnvHashMap<FlowKey, FlowEntry>>,
    groups: FnvHashMap<u32, GroupEntry>,
    meters: FnvHashMap<u32, MeterEntry>,
    /// dpath_open fires exactly once per channel lifetime.
    opened: bool,
    stats_timer_armed: bool,
    barrier_timer_armed: bool,
    actions: Vec<DpAction>,
}

impl DpHandle {
    pub fn new(log: Logger, sess: SessionHandle) -> Self {
        let chan_log = log.clone();
        DpHandle {
            log,
            sess,
            chan: RofChan::new(chan_log),
            state: DpState::Down,
            token: registry::token(),
            dpid: None,
            n_buffers: 0,
            n_tables: 0,
            capabilities: 0,
            config: SwitchConfig::default(),
            ports: BTreeMap::new(),
            tables: Vec::new(),
            flows: FnvHashMap::default(),
            groups: FnvHashMap::default(),
            meters: FnvHashMap::default(),
            opened: false,
            stats_timer_armed: false,
            barrier_timer_armed: false,
            actions: Vec::new(),
        }
    }

    pub fn sess(&self) -> SessionHandle {
        self.sess
    }

    pub fn chan(&self) -> &RofChan {
        &self.chan
    }

    pub fn chan_mut(&mut self) -> &mut RofChan {
        &mut self.chan
    }

    pub fn state(&self) -> DpState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == DpState::Running
    }

    pub fn dpid(&self) -> Option<u64> {
        self.dpid
    }

    pub fn n_buffers(&self) -> u32 {
        self.n_buffers
    }

    pub fn n_tables(&self) -> u8 {
        self.n_tables
    }

    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn miss_send_len(&self) -> u16 {
        self.config.miss_send_len
    }

    pub fn ports(&self) -> &BTreeMap<u32, Port> {
        &self.ports
    }

    pub fn port(&self, port_no: u32) -> Option<&Port> {
        self.ports.get(&port_no)
    }

    pub fn tables(&self) -> &[TableStatsEntry] {
        &self.tables
    }

    pub fn group(&self, group_id: u32) -> Option<&GroupEntry> {
        self.groups.get(&group_id)
    }

    pub fn meter(&self, meter_id: u32) -> Option<&MeterEntry> {
        self.meters.get(&meter_id)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.values().map(FnvHashMap::len).sum()
    }

    pub fn take_actions(&mut self) -> Vec<DpAction> {
        ::std::mem::replace(&mut self.actions, Vec::new())
    }

    /// Release the registry claim; the runtime calls this exactly once when
    /// the session dies.
    pub fn release_registry(&mut self) {
        if let Some(dpid) = self.dpid.take() {
            registry::release(dpid, self.token);
        }
    }

    fn main(&self) -> Option<ConnId> {
        self.chan.main()
    }

    // ---- connection event fold ------------------------------------------

    pub fn on_conn_event(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        aux_id: u8,
        event: ConnEvent,
    ) {
        self.chan.handle_conn_event(ctx, arena, now, aux_id, event);
        let events = self.chan.take_events();
        for ev in events {
            self.on_chan_event(ctx, arena, now, ev);
        }
    }

    fn on_chan_event(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        event: ChanEvent,
    ) {
        match event {
            ChanEvent::Established { version } => {
                debug!(self.log, "channel up, starting init sequence"; "version" => %version);
                self.start_init(ctx, arena, now);
            }
            ChanEvent::Disconnected => {
                self.cancel_session_timers(ctx);
                self.state = DpState::Down;
                self.stats_timer_armed = false;
                self.barrier_timer_armed = false;
                if self.opened {
                    self.opened = false;
                    ctx.events.push_back(Event::DpathClose {
                        sess: self.sess,
                        dpid: self.dpid,
                    });
                }
            }
            ChanEvent::Message { aux_id, xid, msg } => {
                self.dispatch(ctx, arena, now, aux_id, xid, msg);
            }
        }
    }

    fn cancel_session_timers(&mut self, ctx: &mut Context) {
        if let Some(main) = self.main() {
            for &timer in &[
                Timer::FeaturesReply,
                Timer::GetConfigReply,
                Timer::StatsReply,
                Timer::BarrierReply,
                Timer::PortDescReply,
            ] {
                ctx.io.push_back(Io::TimerStop { conn: main, timer });
            }
        }
    }

    // ---- init sequence ---------------------------------------------------

    fn start_init(&mut self, ctx: &mut Context, arena: &mut Slab<RofConn>, now: u64) {
        self.state = DpState::WaitFeatures;
        let timeout = ctx.config.features_timeout;
        self.send_request(
            ctx,
            arena,
            now,
            &Message::FeaturesRequest,
            MsgKind::FeaturesRequest,
            0,
            timeout,
            Some(Timer::FeaturesReply),
        );
    }

    /// Register a sync xid on the main connection, send, and optionally arm
    /// a session reply timer. Any failure here tears the session down.
    fn send_request(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        msg: &Message,
        kind: MsgKind,
        sub_type: u16,
        timeout: u64,
        timer: Option<Timer>,
    ) -> Option<u32> {
        let main = match self.main() {
            Some(main) => main,
            None => return None,
        };
        let result = {
            let conn = &mut arena[main.0];
            conn.get_sync_xid(now, kind, sub_type, timeout)
                .and_then(|xid| conn.send_message(ctx, msg, xid).map(|_| xid))
        };
        match result {
            Ok(xid) => {
                if let Some(timer) = timer {
                    ctx.io.push_back(Io::TimerStart {
                        conn: main,
                        timer,
                        time: now + timeout,
                    });
                }
                Some(xid)
            }
            Err(e) => {
                warn!(self.log, "request send failed, terminating session"; "reason" => %e);
                self.actions.push(DpAction::Terminate);
                None
            }
        }
    }

    fn init_step_done(&mut self, ctx: &mut Context, timer: Timer) {
        if let Some(main) = self.main() {
            ctx.io.push_back(Io::TimerStop { conn: main, timer });
        }
    }

    fn enter_running(&mut self, ctx: &mut Context) {
        self.state = DpState::Running;
        if !self.opened {
            self.opened = true;
            info!(self.log, "datapath open"; "dpid" => self.dpid.unwrap_or(0));
            ctx.events.push_back(Event::DpathOpen {
                sess: self.sess,
                dpid: self.dpid.unwrap_or(0),
            });
        }
    }

    // ---- inbound dispatch ------------------------------------------------

    fn dispatch(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        aux_id: u8,
        xid: u32,
        msg: Message,
    ) {
        match msg {
            Message::FeaturesReply(reply) => {
                if self.state != DpState::WaitFeatures {
                    debug!(self.log, "late features reply"; "xid" => xid);
                    return;
                }
                self.init_step_done(ctx, Timer::FeaturesReply);
                self.release_main_xid(arena, MsgKind::FeaturesRequest, xid);

                /* A duplicate dpid is assumed to be the stale handle of a
                 * lost TCP connection; the runtime destroys it before this
                 * session proceeds. */
                if registry::claim(reply.dpid, self.token).is_some() {
                    warn!(self.log, "dpid already known, displacing prior handle";
                          "dpid" => reply.dpid);
                }
                self.actions.push(DpAction::DpidClaimed { dpid: reply.dpid });

                self.dpid = Some(reply.dpid);
                self.n_buffers = reply.n_buffers;
                self.n_tables = reply.n_tables;
                self.capabilities = reply.capabilities;
                self.ports = reply
                    .ports
                    .iter()
                    .map(|p| (p.port_no, p.clone()))
                    .collect();

                self.state = DpState::WaitGetConfig;
                let timeout = ctx.config.get_config_timeout;
                self.send_request(
                    ctx,
                    arena,
                    now,
                    &Message::GetConfigRequest,
                    MsgKind::GetConfigRequest,
                    0,
                    timeout,
                    Some(Timer::GetConfigReply),
                );
            }
            Message::GetConfigReply(config) => {
                if self.state != DpState::WaitGetConfig {
                    debug!(self.log, "late get-config reply"; "xid" => xid);
                    return;
                }
                self.init_step_done(ctx, Timer::GetConfigReply);
                self.release_main_xid(arena, MsgKind::GetConfigRequest, xid);
                self.config = config;

                self.state = DpState::WaitTableStats;
                self.tables.clear();
                let request =
                    Message::MultipartRequest(MultipartRequest::new(StatsRequest::Table));
                let timeout = ctx.config.stats_timeout;
                self.send_request(
                    ctx,
                    arena,
                    now,
                    &request,
                    MsgKind::MultipartRequest,
                    ::stats::stats_type::TABLE,
                    timeout,
                    Some(Timer::StatsReply),
                );
            }
            Message::MultipartReply(reply) => {
                self.multipart_reply(ctx, arena, now, xid, reply);
            }
            Message::PacketIn(packet_in) => {
                ctx.events.push_back(Event::PacketIn {
                    sess: self.sess,
                    dpid: self.dpid.unwrap_or(0),
                    aux_id,
                    msg: packet_in,
                });
            }
            Message::FlowRemoved(removed) => {
                // the switch dropped the entry; mirror that locally (by
                // priority + match, since the stored key masks the cookie)
                if let Some(table) = self.flows.get_mut(&removed.table_id) {
                    let match_key = removed.fields.key_bytes();
                    let gone: Vec<FlowKey> = table
                        .keys()
                        .filter(|k| k.priority == removed.priority && k.match_key == match_key)
                        .cloned()
                        .collect();
                    for key in gone {
                        table.remove(&key);
                    }
                }
                ctx.events.push_back(Event::FlowRemoved {
                    sess: self.sess,
                    dpid: self.dpid.unwrap_or(0),
                    msg: removed,
                });
            }
            Message::PortStatus(status) => self.port_status(ctx, status),
            Message::BarrierReply => {
                self.release_main_xid(arena, MsgKind::BarrierRequest, xid);
                ctx.events.push_back(Event::BarrierReply {
                    sess: self.sess,
                    dpid: self.dpid.unwrap_or(0),
                    xid,
                });
            }
            Message::RoleReply(role) => {
                self.release_main_xid(arena, MsgKind::RoleRequest, xid);
                ctx.events.push_back(Event::RoleReply {
                    sess: self.sess,
                    dpid: self.dpid.unwrap_or(0),
                    msg: role,
                });
            }
            Message::Error(err) => {
                ctx.events.push_back(Event::PeerError {
                    sess: self.sess,
                    dpid: self.dpid,
                    xid,
                    msg: err,
                });
            }
            Message::Experimenter(exp) => {
                ctx.events.push_back(Event::Experimenter {
                    sess: self.sess,
                    dpid: self.dpid,
                    msg: exp,
                });
            }
            Message::GetAsyncReply(_) | Message::SetConfig(_) | Message::Hello(_) => {
                debug!(self.log, "ignoring message"; "kind" => ?msg.kind());
            }
            other => {
                debug!(self.log, "unhandled message from datapath"; "kind" => ?other.kind());
            }
        }
    }

    fn multipart_reply(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        xid: u32,
        reply: ::stats::MultipartReply,
    ) {
        let more = reply.more();
        match self.state {
            DpState::WaitTableStats => {
                if let StatsReply::Table(entries) = reply.body {
                    self.tables.extend(entries);
                    if more {
                        return; // further parts extend the same step
                    }
                    self.init_step_done(ctx, Timer::StatsReply);
                    self.release_main_xid(arena, MsgKind::MultipartRequest, xid);
                    if self.chan.version() == Some(Version::V1_3) {
                        self.state = DpState::WaitPortDesc;
                        let request = Message::MultipartRequest(MultipartRequest::new(
                            StatsRequest::PortDesc,
                        ));
                        let timeout = ctx.config.stats_timeout;
                        self.send_request(
                            ctx,
                            arena,
                            now,
                            &request,
                            MsgKind::MultipartRequest,
                            ::stats::stats_type::PORT_DESC,
                            timeout,
                            Some(Timer::PortDescReply),
                        );
                    } else {
                        self.enter_running(ctx);
                    }
                } else {
                    debug!(self.log, "unexpected multipart body during init");
                }
            }
            DpState::WaitPortDesc => {
                if let StatsReply::PortDesc(ports) = reply.body {
                    for p in ports {
                        self.ports.insert(p.port_no, p);
                    }
                    if more {
                        return;
                    }
                    self.init_step_done(ctx, Timer::PortDescReply);
                    self.release_main_xid(arena, MsgKind::MultipartRequest, xid);
                    self.enter_running(ctx);
                } else {
                    debug!(self.log, "unexpected multipart body during init");
                }
            }
            _ => {
                if !more {
                    self.release_main_xid(arena, MsgKind::MultipartRequest, xid);
                }
                ctx.events.push_back(Event::StatsReply {
                    sess: self.sess,
                    dpid: self.dpid.unwrap_or(0),
                    xid,
                    more,
                    body: reply.body,
                });
            }
        }
    }

    fn release_main_xid(&mut self, arena: &mut Slab<RofConn>, kind: MsgKind, xid: u32) {
        if let Some(main) = self.main() {
            if let Some(conn) = arena.get_mut(main.0) {
                conn.xids_mut().remove(kind, xid);
            }
        }
    }

    /// Port table mutation: ADD/MODIFY upsert, DELETE is an idempotent
    /// removal.
    fn port_status(&mut self, ctx: &mut Context, status: msg::PortStatus) {
        let port_no = status.desc.port_no;
        match status.reason {
            msg::port_status_reason::ADD | msg::port_status_reason::MODIFY => {
                self.ports.insert(port_no, status.desc.clone());
            }
            msg::port_status_reason::DELETE => {
                if self.ports.remove(&port_no).is_none() {
                    debug!(self.log, "port-status DELETE for unknown port"; "port" => port_no);
                }
            }
            other => {
                debug!(self.log, "unknown port-status reason"; "reason" => other);
            }
        }
        ctx.events.push_back(Event::PortStatus {
            sess: self.sess,
            dpid: self.dpid.unwrap_or(0),
            reason: status.reason,
            desc: status.desc,
        });
    }

    // ---- session timers --------------------------------------------------

    pub fn handle_timeout(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        timer: Timer,
    ) {
        match timer {
            Timer::FeaturesReply | Timer::GetConfigReply | Timer::PortDescReply => {
                warn!(self.log, "init sequence reply timer expired"; "timer" => ?timer);
                self.actions.push(DpAction::Terminate);
            }
            Timer::StatsReply => {
                if self.state == DpState::WaitTableStats {
                    warn!(self.log, "table stats reply timer expired");
                    self.actions.push(DpAction::Terminate);
                } else {
                    self.scan_timeouts(ctx, arena, now, MsgKind::MultipartRequest, timer);
                }
            }
            Timer::BarrierReply => {
                self.scan_timeouts(ctx, arena, now, MsgKind::BarrierRequest, timer);
            }
            _ => {}
        }
    }

    /// Shared per-kind expiry scan: stage the expired entries, then emit a
    /// timeout event for each, then rearm iff any remain.
    fn scan_timeouts(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        kind: MsgKind,
        timer: Timer,
    ) {
        let main = match self.main() {
            Some(main) => main,
            None => return,
        };
        let (expired, next) = {
            let conn = &mut arena[main.0];
            let expired = conn.xids_mut().take_expired(kind, now);
            (expired, conn.xids().next_deadline(kind))
        };
        for (xid, _) in expired {
            ctx.events.push_back(Event::RequestTimeout {
                sess: self.sess,
                kind,
                xid,
            });
        }
        match next {
            Some(deadline) => {
                ctx.io.push_back(Io::TimerStart {
                    conn: main,
                    timer,
                    time: deadline,
                });
            }
            None => match timer {
                Timer::StatsReply => self.stats_timer_armed = false,
                Timer::BarrierReply => self.barrier_timer_armed = false,
                _ => {}
            },
        }
    }

    // ---- application-facing senders -------------------------------------

    pub fn send_message(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        aux_id: u8,
        msg: &Message,
        xid: u32,
    ) -> Result<(), ChanSendError> {
        self.chan.send_message(ctx, arena, aux_id, msg, xid)
    }

    fn alloc_xid(&mut self, arena: &mut Slab<RofConn>) -> Result<u32, ChanSendError> {
        let main = self.main().ok_or(ChanSendError::Chan(::chan::ChanError::NotFound))?;
        arena[main.0].get_async_xid().map_err(ChanSendError::Conn)
    }

    /// Send a FLOW_MOD and mirror it in the local flow tables, emitting the
    /// matching bookkeeping event.
    pub fn send_flow_mod(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        fm: FlowMod,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, 0, &Message::FlowMod(fm.clone()), xid)?;
        self.flow_mod_sent(ctx, fm);
        Ok(xid)
    }

    fn flow_mod_sent(&mut self, ctx: &mut Context, fm: FlowMod) {
        let op = match fm.command {
            msg::flow_mod_cmd::ADD => {
                let entry = FlowEntry {
                    priority: fm.priority,
                    cookie: fm.cookie,
                    idle_timeout: fm.idle_timeout,
                    hard_timeout: fm.hard_timeout,
                    fields: fm.fields.clone(),
                    instructions: fm.instructions.clone(),
                };
                self.flows
                    .entry(fm.table_id)
                    .or_insert_with(FnvHashMap::default)
                    .insert(FlowKey::of(&fm), entry);
                FlowModOp::Add
            }
            msg::flow_mod_cmd::MODIFY | msg::flow_mod_cmd::MODIFY_STRICT => {
                if let Some(table) = self.flows.get_mut(&fm.table_id) {
                    if let Some(entry) = table.get_mut(&FlowKey::of(&fm)) {
                        entry.instructions = fm.instructions.clone();
                        entry.cookie = fm.cookie;
                    }
                }
                FlowModOp::Modify
            }
            msg::flow_mod_cmd::DELETE | msg::flow_mod_cmd::DELETE_STRICT => {
                if fm.table_id == msg::TABLE_ALL && fm.fields.is_empty() {
                    self.flows.clear();
                } else if fm.table_id == msg::TABLE_ALL {
                    let key = FlowKey::of(&fm);
                    for table in self.flows.values_mut() {
                        table.remove(&key);
                    }
                } else if let Some(table) = self.flows.get_mut(&fm.table_id) {
                    table.remove(&FlowKey::of(&fm));
                }
                FlowModOp::Delete
            }
            other => {
                debug!(self.log, "unknown flow-mod command"; "command" => other);
                return;
            }
        };
        ctx.events.push_back(Event::FlowModApplied {
            sess: self.sess,
            dpid: self.dpid.unwrap_or(0),
            op,
            flow: fm,
        });
    }

    /// Remove every flow from every table: DELETE with table id ALL.
    pub fn flow_mod_reset(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
    ) -> Result<u32, ChanSendError> {
        self.send_flow_mod(
            ctx,
            arena,
            FlowMod {
                command: msg::flow_mod_cmd::DELETE,
                table_id: msg::TABLE_ALL,
                ..FlowMod::default()
            },
        )
    }

    pub fn send_group_mod(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        gm: GroupMod,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, 0, &Message::GroupMod(gm.clone()), xid)?;
        match gm.command {
            msg::group_mod_cmd::ADD | msg::group_mod_cmd::MODIFY => {
                self.groups.insert(
                    gm.group_id,
                    GroupEntry {
                        group_type: gm.group_type,
                        buckets: gm.buckets,
                    },
                );
            }
            msg::group_mod_cmd::DELETE => {
                if gm.group_id == msg::GROUP_ALL {
                    self.groups.clear();
                } else {
                    self.groups.remove(&gm.group_id);
                }
            }
            other => {
                debug!(self.log, "unknown group-mod command"; "command" => other);
            }
        }
        Ok(xid)
    }

    pub fn send_meter_mod(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        mm: MeterMod,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, 0, &Message::MeterMod(mm.clone()), xid)?;
        match mm.command {
            msg::meter_mod_cmd::ADD | msg::meter_mod_cmd::MODIFY => {
                self.meters.insert(
                    mm.meter_id,
                    MeterEntry {
                        flags: mm.flags,
                        bands: mm.bands,
                    },
                );
            }
            msg::meter_mod_cmd::DELETE => {
                self.meters.remove(&mm.meter_id);
            }
            other => {
                debug!(self.log, "unknown meter-mod command"; "command" => other);
            }
        }
        Ok(xid)
    }

    pub fn send_packet_out(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        po: PacketOut,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, 0, &Message::PacketOut(po), xid)?;
        Ok(xid)
    }

    /// Locally apply the config/mask pair the way the switch will.
    pub fn send_port_mod(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        pm: PortMod,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, 0, &Message::PortMod(pm.clone()), xid)?;
        if let Some(port) = self.ports.get_mut(&pm.port_no) {
            port.config = (port.config & !pm.mask) | (pm.config & pm.mask);
            if pm.advertise != 0 {
                port.advertised = pm.advertise;
            }
        }
        Ok(xid)
    }

    pub fn send_set_config(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        config: SwitchConfig,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, 0, &Message::SetConfig(config), xid)?;
        self.config = config;
        Ok(xid)
    }

    pub fn send_stats_request(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        request: StatsRequest,
    ) -> Result<u32, ChanSendError> {
        let sub_type = request.ty();
        let timeout = ctx.config.stats_timeout;
        let xid = self.sync_request(
            ctx,
            arena,
            now,
            &Message::MultipartRequest(MultipartRequest::new(request)),
            MsgKind::MultipartRequest,
            sub_type,
            timeout,
        )?;
        if !self.stats_timer_armed {
            self.stats_timer_armed = true;
            let main = self.main().expect("sent on main");
            ctx.io.push_back(Io::TimerStart {
                conn: main,
                timer: Timer::StatsReply,
                time: now + timeout,
            });
        }
        Ok(xid)
    }

    pub fn send_barrier_request(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
    ) -> Result<u32, ChanSendError> {
        let timeout = ctx.config.barrier_timeout;
        let xid = self.sync_request(
            ctx,
            arena,
            now,
            &Message::BarrierRequest,
            MsgKind::BarrierRequest,
            0,
            timeout,
        )?;
        if !self.barrier_timer_armed {
            self.barrier_timer_armed = true;
            let main = self.main().expect("sent on main");
            ctx.io.push_back(Io::TimerStart {
                conn: main,
                timer: Timer::BarrierReply,
                time: now + timeout,
            });
        }
        Ok(xid)
    }

    pub fn send_role_request(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        role: RoleMsg,
    ) -> Result<u32, ChanSendError> {
        let timeout = ctx.config.stats_timeout;
        self.sync_request(
            ctx,
            arena,
            now,
            &Message::RoleRequest(role),
            MsgKind::RoleRequest,
            0,
            timeout,
        )
    }

    fn sync_request(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        msg: &Message,
        kind: MsgKind,
        sub_type: u16,
        timeout: u64,
    ) -> Result<u32, ChanSendError> {
        let main = self.main().ok_or(ChanSendError::Chan(::chan::ChanError::NotFound))?;
        let conn = &mut arena[main.0];
        let xid = conn
            .get_sync_xid(now, kind, sub_type, timeout)
            .map_err(ChanSendError::Conn)?;
        match conn.send_message(ctx, msg, xid) {
            Ok(()) => Ok(xid),
            Err(e) => {
                conn.release_sync_xid(xid);
                Err(ChanSendError::Conn(e))
            }
        }
    }

    /// Tear down one connection (the main takes its auxiliaries with it)
    /// and fold the resulting channel transition.
    pub fn drop_conn(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        aux_id: u8,
    ) -> Result<(), ::chan::ChanError> {
        self.chan.drop_conn(ctx, arena, aux_id)?;
        let events = self.chan.take_events();
        for ev in events {
            self.on_chan_event(ctx, arena, now, ev);
        }
        Ok(())
    }

    /// Destroy every connection of this session.
    pub fn teardown(&mut self, ctx: &mut Context, arena: &mut Slab<RofConn>) {
        self.cancel_session_timers(ctx);
        self.chan.clear(ctx, arena);
        for ev in self.chan.take_events() {
            if let ChanEvent::Disconnected = ev {
                if self.opened {
                    self.opened = false;
                    ctx.events.push_back(Event::DpathClose {
                        sess: self.sess,
                        dpid: self.dpid,
                    });
                }
            }
        }
        self.release_registry();
    }
}

impl ::std::fmt::Debug for DpHandle {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("DpHandle")
            .field("sess", &self.sess)
            .field("state", &self.state)
            .field("dpid", &self.dpid)
            .field("ports", &self.ports.len())
            .finish()
    }
}
