//! `RofChan`: the logical OpenFlow session over one main connection plus,
//! from OF1.3 on, any number of auxiliaries. Connections live in the
//! runtime's arena; the channel holds their ids keyed by aux id and owns
//! the lifecycle policy.

use std::collections::BTreeMap;

use slab::Slab;
use slog::Logger;

use conn::{ConnError, ConnEvent, RofConn};
use msg::Message;
use runtime::{ConnId, Context};
use {Version, VersionBitmap};

pub const MAIN_AUX_ID: u8 = 0;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Fail)]
pub enum ChanError {
    /// First connection must be the main; auxiliaries need an established
    /// main speaking at least OF1.3.
    #[fail(display = "channel invariant violated")]
    Invalid,
    #[fail(display = "no connection with that aux id")]
    NotFound,
    #[fail(display = "aux id already in use")]
    Exists,
}

#[derive(Debug)]
pub enum ChanEvent {
    Established { version: Version },
    Disconnected,
    Message { aux_id: u8, xid: u32, msg: Message },
}

pub struct RofChan {
    log: Logger,
    conns: BTreeMap<u8, ConnId>,
    version: Option<Version>,
    up: bool,
    out: Vec<ChanEvent>,
}

impl RofChan {
    pub fn new(log: Logger) -> Self {
        RofChan {
            log,
            conns: BTreeMap::new(),
            version: None,
            up: false,
            out: Vec::new(),
        }
    }

    pub fn take_events(&mut self) -> Vec<ChanEvent> {
        ::std::mem::replace(&mut self.out, Vec::new())
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn main(&self) -> Option<ConnId> {
        self.conns.get(&MAIN_AUX_ID).cloned()
    }

    pub fn conn(&self, aux_id: u8) -> Option<ConnId> {
        self.conns.get(&aux_id).cloned()
    }

    pub fn conn_ids(&self) -> Vec<ConnId> {
        self.conns.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// The channel is up iff its main connection is established.
    pub fn is_established(&self, arena: &Slab<RofConn>) -> bool {
        match self.main() {
            Some(id) => arena.get(id.0).map_or(false, RofConn::is_established),
            None => false,
        }
    }

    /// Validate an `add_conn` and produce the version bitmap the new
    /// connection must advertise: the full local bitmap for the main, the
    /// single negotiated version for an auxiliary.
    pub fn admission(
        &self,
        arena: &Slab<RofConn>,
        aux_id: u8,
        local: VersionBitmap,
    ) -> Result<VersionBitmap, ChanError> {
        if self.conns.contains_key(&aux_id) {
            return Err(ChanError::Exists);
        }
        if aux_id == MAIN_AUX_ID {
            return Ok(local);
        }
        if self.conns.is_empty() || !self.is_established(arena) {
            return Err(ChanError::Invalid);
        }
        match self.version {
            Some(version) if version >= Version::V1_3 => Ok(VersionBitmap::only(version)),
            _ => {
                warn!(
                    self.log,
                    "no auxiliary connections below OF1.3";
                    "version" => ?self.version
                );
                Err(ChanError::Invalid)
            }
        }
    }

    /// Attach a validated connection under its aux id.
    pub fn attach(&mut self, aux_id: u8, conn: ConnId) -> Result<(), ChanError> {
        if self.conns.contains_key(&aux_id) {
            return Err(ChanError::Exists);
        }
        if aux_id != MAIN_AUX_ID && !self.conns.contains_key(&MAIN_AUX_ID) {
            return Err(ChanError::Invalid);
        }
        self.conns.insert(aux_id, conn);
        Ok(())
    }

    pub fn send_message(
        &self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        aux_id: u8,
        msg: &Message,
        xid: u32,
    ) -> Result<(), ChanSendError> {
        let id = self.conn(aux_id).ok_or(ChanSendError::Chan(ChanError::NotFound))?;
        arena[id.0]
            .send_message(ctx, msg, xid)
            .map_err(ChanSendError::Conn)
    }

    /// Tear down one connection. Dropping the main first destroys every
    /// auxiliary, descending aux id, with their closed-notifications
    /// suppressed; only then does the main close.
    pub fn drop_conn(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        aux_id: u8,
    ) -> Result<(), ChanError> {
        if !self.conns.contains_key(&aux_id) {
            return Err(ChanError::NotFound);
        }
        if aux_id == MAIN_AUX_ID {
            let auxes: Vec<u8> = self
                .conns
                .keys()
                .cloned()
                .filter(|&a| a != MAIN_AUX_ID)
                .rev()
                .collect();
            for aux in auxes {
                self.remove_silent(ctx, arena, aux);
            }
        }
        self.remove_silent(ctx, arena, aux_id);
        if aux_id == MAIN_AUX_ID {
            self.version = None;
            self.mark_down();
        }
        Ok(())
    }

    /// Destroy every connection, auxiliaries before the main.
    pub fn clear(&mut self, ctx: &mut Context, arena: &mut Slab<RofConn>) {
        while let Some(&aux) = self.conns.keys().next_back() {
            self.remove_silent(ctx, arena, aux);
        }
        self.version = None;
        self.mark_down();
    }

    fn remove_silent(&mut self, ctx: &mut Context, arena: &mut Slab<RofConn>, aux_id: u8) {
        if let Some(id) = self.conns.remove(&aux_id) {
            if let Some(conn) = arena.get_mut(id.0) {
                conn.close_silent(ctx);
            }
            arena.remove(id.0);
        }
    }

    fn mark_down(&mut self) {
        if self.up {
            self.up = false;
            self.out.push(ChanEvent::Disconnected);
        }
    }

    /// Fold one connection notification into channel state. The connection
    /// is identified by aux id; policy follows §its mode (active/passive).
    pub fn handle_conn_event(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        aux_id: u8,
        event: ConnEvent,
    ) {
        match event {
            ConnEvent::Established { version } => {
                if aux_id == MAIN_AUX_ID {
                    info!(self.log, "main connection established"; "version" => %version);
                    self.version = Some(version);
                    if !self.up {
                        self.up = true;
                        self.out.push(ChanEvent::Established { version });
                    }
                } else if self.version != Some(version) {
                    warn!(
                        self.log,
                        "auxiliary negotiated a different version, dropping";
                        "aux" => aux_id,
                        "version" => %version
                    );
                    self.remove_silent(ctx, arena, aux_id);
                } else {
                    debug!(self.log, "auxiliary connection established"; "aux" => aux_id);
                }
            }
            ConnEvent::Refused => {
                warn!(self.log, "connection refused"; "aux" => aux_id);
                self.remove_silent(ctx, arena, aux_id);
                if aux_id == MAIN_AUX_ID {
                    self.version = None;
                    self.mark_down();
                }
            }
            ConnEvent::Closed => self.conn_closed(ctx, arena, now, aux_id),
            ConnEvent::Message { xid, msg } => {
                self.out.push(ChanEvent::Message { aux_id, xid, msg });
            }
        }
    }

    fn conn_closed(
        &mut self,
        ctx: &mut Context,
        arena: &mut Slab<RofConn>,
        now: u64,
        aux_id: u8,
    ) {
        let id = match self.conns.get(&aux_id) {
            Some(&id) => id,
            None => {
                debug!(self.log, "closed notification for unknown connection"; "aux" => aux_id);
                return;
            }
        };
        let active = arena[id.0].is_actively_established();

        if aux_id == MAIN_AUX_ID {
            self.version = None;
            self.mark_down();
            if active {
                // close every member and reconnect it, keeping aux ids
                info!(self.log, "active main connection closed, reconnecting channel");
                let members: Vec<ConnId> = self.conns.values().cloned().collect();
                for cid in members {
                    let conn = &mut arena[cid.0];
                    if conn.is_actively_established() {
                        conn.close_silent(ctx);
                        conn.schedule_reconnect(ctx, now);
                    } else {
                        // passive members cannot be revived from this side
                        let aux = conn.aux_id();
                        self.remove_silent(ctx, arena, aux);
                    }
                }
            } else {
                info!(self.log, "passive main connection closed, dropping channel");
                self.clear(ctx, arena);
            }
        } else if active {
            info!(self.log, "active auxiliary closed, reconnecting"; "aux" => aux_id);
            let conn = &mut arena[id.0];
            conn.schedule_reconnect(ctx, now);
        } else {
            info!(self.log, "passive auxiliary closed, dropping"; "aux" => aux_id);
            self.remove_silent(ctx, arena, aux_id);
        }
    }
}

#[derive(Debug, Fail)]
pub enum ChanSendError {
    #[fail(display = "{}", _0)]
    Chan(#[cause] ChanError),
    #[fail(display = "{}", _0)]
    Conn(#[cause] ConnError),
}

impl ::std::fmt::Debug for RofChan {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("RofChan")
            .field("conns", &self.conns)
            .field("version", &self.version)
            .field("up", &self.up)
            .finish()
    }
}
