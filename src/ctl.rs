//! `CtlHandle`: the datapath-side session object for one controller. The
//! mirror image of [`DpHandle`](::dpath::DpHandle): it runs no init sequence
//! and instead answers the controller's feature/config/stats requests from
//! embedder-supplied switch data. Mod-type messages (flow-mod, packet-out,
//! ...) pass through to the application, which owns the actual pipeline.

use slab::Slab;
use slog::Logger;

use chan::{ChanEvent, ChanSendError, RofChan};
use conn::{ConnEvent, RofConn};
use msg::{
    AsyncConfig, FeaturesReply, FlowRemoved, Message, PacketIn, PortStatus, RoleMsg, SwitchConfig,
};
use port::Port;
use runtime::{Context, Event, SessionHandle};
use stats::{DescStats, MultipartReply, StatsReply, StatsRequest, TableStatsEntry};
use {OfpErr, Version};

/// What this process presents to controllers: identity, ports, and tables
/// of the switch it implements or fronts.
#[derive(Debug, Clone, Default)]
pub struct DatapathInfo {
    pub dpid: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    pub capabilities: u32,
    /// OF1.0 supported-actions bitmap.
    pub actions: u32,
    pub ports: Vec<Port>,
    pub desc: DescStats,
    pub tables: Vec<TableStatsEntry>,
}

pub struct CtlHandle {
    log: Logger,
    sess: SessionHandle,
    chan: RofChan,
    info: DatapathInfo,
    config: SwitchConfig,
    role: RoleMsg,
    async_config: AsyncConfig,
    opened: bool,
}

impl CtlHandle {
    pub fn new(log: Logger, sess: SessionHandle, info: DatapathInfo) -> Self {
        let chan_log = log.clone();
        CtlHandle {
            log,
            sess,
            chan: RofChan::new(chan_log),
            info,
            config: SwitchConfig {
                flags: 0,
                miss_send_len: 128,
            },
            role: RoleMsg {
                role: 0, // OFPCR_ROLE_NOCHANGE space: equal by default
                generation_id: 0,
            },
            async_config: AsyncConfig::default(),
            opened: false,
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

    pub fn info(&self) -> &DatapathInfo {
        &self.info
    }

    pub fn config(&self) -> SwitchConfig {
        self.config
    }

    pub fn role(&self) -> RoleMsg {
        self.role
    }

    pub fn is_established(&self, arena: &Slab<RofConn>) -> bool {
        self.chan.is_established(arena)
    }

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
            self.on_chan_event(ctx, arena, ev);
        }
    }

    fn on_chan_event(&mut self, ctx: &mut Context, arena: &mut Slab<RofConn>, event: ChanEvent) {
        match event {
            ChanEvent::Established { version } => {
                info!(self.log, "controller channel up"; "version" => %version);
                if !self.opened {
                    self.opened = true;
                    ctx.events.push_back(Event::CtlOpen { sess: self.sess });
                }
            }
            ChanEvent::Disconnected => {
                if self.opened {
                    self.opened = false;
                    ctx.events.push_back(Event::CtlClose { sess: self.sess });
                }
            }
            ChanEvent::Message { aux_id, xid, msg } => {
                self.dispatch(ctx, arena, aux_id, xid, msg);
            }
        }
    }

    /// Tear down one connection and fold the resulting channel transition.
    pub fn drop_conn(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        aux_id: u8,
    ) -> Result<(), ::chan::ChanError> {
        let _ = now;
        self.chan.drop_conn(ctx, arena, aux_id)?;
        let events = self.chan.take_events();
        for ev in events {
            self.on_chan_event(ctx, arena, ev);
        }
        Ok(())
    }

    fn reply(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        aux_id: u8,
        xid: u32,
        msg: &Message,
    ) {
        if let Err(e) = self.chan.send_message(ctx, arena, aux_id, msg, xid) {
            warn!(self.log, "failed to send reply"; "reason" => %e);
        }
    }

    fn dispatch(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        aux_id: u8,
        xid: u32,
        msg: Message,
    ) {
        match msg {
            Message::FeaturesRequest => {
                let reply = Message::FeaturesReply(FeaturesReply {
                    dpid: self.info.dpid,
                    n_buffers: self.info.n_buffers,
                    n_tables: self.info.n_tables,
                    auxiliary_id: aux_id,
                    capabilities: self.info.capabilities,
                    actions: self.info.actions,
                    ports: self.info.ports.clone(),
                });
                self.reply(ctx, arena, aux_id, xid, &reply);
            }
            Message::GetConfigRequest => {
                let reply = Message::GetConfigReply(self.config);
                self.reply(ctx, arena, aux_id, xid, &reply);
            }
            Message::SetConfig(config) => {
                self.config = config;
            }
            Message::BarrierRequest => {
                // all processing is synchronous on this loop, so the
                // barrier holds by construction
                self.reply(ctx, arena, aux_id, xid, &Message::BarrierReply);
            }
            Message::RoleRequest(role) => {
                self.role = role;
                let reply = Message::RoleReply(self.role);
                self.reply(ctx, arena, aux_id, xid, &reply);
            }
            Message::GetAsyncRequest => {
                let reply = Message::GetAsyncReply(self.async_config);
                self.reply(ctx, arena, aux_id, xid, &reply);
            }
            Message::SetAsync(config) => {
                self.async_config = config;
            }
            Message::MultipartRequest(request) => {
                self.multipart_request(ctx, arena, aux_id, xid, request.body);
            }
            Message::Error(err) => {
                ctx.events.push_back(Event::PeerError {
                    sess: self.sess,
                    dpid: Some(self.info.dpid),
                    xid,
                    msg: err,
                });
            }
            // the pipeline behind this session belongs to the application
            other @ Message::FlowMod(_)
            | other @ Message::GroupMod(_)
            | other @ Message::MeterMod(_)
            | other @ Message::PacketOut(_)
            | other @ Message::PortMod(_)
            | other @ Message::TableMod(_)
            | other @ Message::Experimenter(_) => {
                ctx.events.push_back(Event::CtlMessage {
                    sess: self.sess,
                    aux_id,
                    xid,
                    msg: other,
                });
            }
            other => {
                debug!(self.log, "unanswerable request"; "kind" => ?other.kind());
                let envelope = match self.version(arena).and_then(|v| other.encode(v, xid).ok()) {
                    Some(envelope) => envelope,
                    None => return,
                };
                let err = Message::Error(::msg::error_for(OfpErr::BAD_REQUEST_BAD_TYPE, &envelope));
                self.reply(ctx, arena, aux_id, xid, &err);
            }
        }
    }

    /// Stats the core can answer from `DatapathInfo`; everything that needs
    /// live pipeline counters goes up to the application.
    fn multipart_request(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        aux_id: u8,
        xid: u32,
        request: StatsRequest,
    ) {
        let body = match request {
            StatsRequest::Desc => Some(StatsReply::Desc(self.info.desc.clone())),
            StatsRequest::Table => Some(StatsReply::Table(self.info.tables.clone())),
            StatsRequest::PortDesc => Some(StatsReply::PortDesc(self.info.ports.clone())),
            other => {
                ctx.events.push_back(Event::CtlMessage {
                    sess: self.sess,
                    aux_id,
                    xid,
                    msg: Message::MultipartRequest(::stats::MultipartRequest::new(other)),
                });
                None
            }
        };
        if let Some(body) = body {
            let reply = Message::MultipartReply(MultipartReply::new(body));
            self.reply(ctx, arena, aux_id, xid, &reply);
        }
    }

    fn version(&self, arena: &Slab<RofConn>) -> Option<Version> {
        self.chan
            .main()
            .and_then(|id| arena.get(id.0))
            .and_then(RofConn::version)
    }

    // ---- datapath-to-controller notifications ---------------------------

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

    pub fn send_packet_in(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        aux_id: u8,
        packet_in: PacketIn,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, aux_id, &Message::PacketIn(packet_in), xid)?;
        Ok(xid)
    }

    pub fn send_flow_removed(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        removed: FlowRemoved,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        self.chan
            .send_message(ctx, arena, 0, &Message::FlowRemoved(removed), xid)?;
        Ok(xid)
    }

    /// Announce a port change and keep the advertised port list current.
    pub fn send_port_status(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        status: PortStatus,
    ) -> Result<u32, ChanSendError> {
        let xid = self.alloc_xid(arena)?;
        match status.reason {
            ::msg::port_status_reason::DELETE => {
                self.info.ports.retain(|p| p.port_no != status.desc.port_no);
            }
            _ => {
                match self
                    .info
                    .ports
                    .iter_mut()
                    .find(|p| p.port_no == status.desc.port_no)
                {
                    Some(port) => *port = status.desc.clone(),
                    None => self.info.ports.push(status.desc.clone()),
                }
            }
        }
        self.chan
            .send_message(ctx, arena, 0, &Message::PortStatus(status), xid)?;
        Ok(xid)
    }

    fn alloc_xid(&mut self, arena: &mut Slab<RofConn>) -> Result<u32, ChanSendError> {
        let main = self
            .chan
            .main()
            .ok_or(ChanSendError::Chan(::chan::ChanError::NotFound))?;
        arena[main.0].get_async_xid().map_err(ChanSendError::Conn)
    }

    pub fn teardown(&mut self, ctx: &mut Context, arena: &mut Slab<RofConn>) {
        self.chan.clear(ctx, arena);
        for ev in self.chan.take_events() {
            if let ChanEvent::Disconnected = ev {
                if self.opened {
                    self.opened = false;
                    ctx.events.push_back(Event::CtlClose { sess: self.sess });
                }
            }
        }
    }
}

impl ::std::fmt::Debug for CtlHandle {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("CtlHandle")
            .field("sess", &self.sess)
            .field("dpid", &self.info.dpid)
            .field("opened", &self.opened)
            .finish()
    }
}
