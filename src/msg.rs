//! Typed message bodies and the `(version, type)` decode/encode dispatch.
//!
//! Every body has a `(version, bytes) -> decoded` / `decoded -> bytes` pair.
//! Decoded values are version-neutral; the version is chosen at encode time
//! and drives the wire layout. Unknown message types fail decoding with
//! `DecodeError::UnknownType` so the connection layer can answer
//! BAD_REQUEST/BAD_TYPE.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use action::{
    actions_wire_len, decode_actions, decode_buckets, encode_actions, encode_buckets,
    instructions_wire_len, Action, Bucket, Instruction,
};
use coding::{BufExt, BufMutExt, UnexpectedEnd};
use message::{Envelope, Header, MsgKind};
use oxm::Match;
use port::{self, Port};
use stats::{MultipartReply, MultipartRequest};
use {OfpErr, Version, VersionBitmap, HEADER_LEN};

pub mod flow_mod_cmd {
    pub const ADD: u8 = 0;
    pub const MODIFY: u8 = 1;
    pub const MODIFY_STRICT: u8 = 2;
    pub const DELETE: u8 = 3;
    pub const DELETE_STRICT: u8 = 4;
}

pub mod group_mod_cmd {
    pub const ADD: u16 = 0;
    pub const MODIFY: u16 = 1;
    pub const DELETE: u16 = 2;
}

pub mod meter_mod_cmd {
    pub const ADD: u16 = 0;
    pub const MODIFY: u16 = 1;
    pub const DELETE: u16 = 2;
}

pub mod port_status_reason {
    pub const ADD: u8 = 0;
    pub const DELETE: u8 = 1;
    pub const MODIFY: u8 = 2;
}

pub mod packet_in_reason {
    pub const NO_MATCH: u8 = 0;
    pub const ACTION: u8 = 1;
    pub const INVALID_TTL: u8 = 2;
}

/// OFPTT_ALL: a flow-mod aimed at every table.
pub const TABLE_ALL: u8 = 0xff;
/// OFPG_ALL / OFPG_ANY group wildcards.
pub const GROUP_ALL: u32 = 0xffff_fffc;
pub const GROUP_ANY: u32 = 0xffff_ffff;
/// OFP_NO_BUFFER.
pub const NO_BUFFER: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Eq, PartialEq, Fail)]
pub enum DecodeError {
    #[fail(display = "truncated message body")]
    Truncated,
    #[fail(display = "unknown message type {} for version {}", ty, version)]
    UnknownType { version: Version, ty: u8 },
    #[fail(display = "unknown wire version {:#04x}", version)]
    UnknownVersion { version: u8 },
}

impl From<UnexpectedEnd> for DecodeError {
    fn from(_: UnexpectedEnd) -> DecodeError {
        DecodeError::Truncated
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Fail)]
pub enum EncodeError {
    #[fail(display = "{:?} has no encoding in version {}", kind, version)]
    NotInVersion { kind: MsgKind, version: Version },
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Hello {
    /// OFPHET_VERSIONBITMAP element, when the peer sent one.
    pub bitmap: Option<VersionBitmap>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ErrorMsg {
    pub err: OfpErr,
    /// At least 64 bytes of the offending request, per the wire spec.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Echo {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FeaturesReply {
    pub dpid: u64,
    pub n_buffers: u32,
    pub n_tables: u8,
    /// OF1.3 only; zero elsewhere.
    pub auxiliary_id: u8,
    pub capabilities: u32,
    /// OF1.0: supported-actions bitmap. OF1.2+: reserved, zero.
    pub actions: u32,
    /// Absent on the OF1.3 wire, where ports arrive via PORT_DESC.
    pub ports: Vec<Port>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct SwitchConfig {
    pub flags: u16,
    pub miss_send_len: u16,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PacketIn {
    pub buffer_id: u32,
    pub total_len: u16,
    pub reason: u8,
    pub table_id: u8,
    /// OF1.3 only.
    pub cookie: u64,
    /// OF1.0 carries only in_port, surfaced here as an in_port TLV.
    pub fields: Match,
    pub data: Bytes,
}

impl PacketIn {
    pub fn in_port(&self) -> Option<u32> {
        self.fields.in_port()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlowRemoved {
    pub cookie: u64,
    pub priority: u16,
    pub reason: u8,
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub idle_timeout: u16,
    /// OF1.2+ only.
    pub hard_timeout: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    pub fields: Match,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PortStatus {
    pub reason: u8,
    pub desc: Port,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PacketOut {
    pub buffer_id: u32,
    pub in_port: u32,
    pub actions: Vec<Action>,
    pub data: Bytes,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlowMod {
    pub cookie: u64,
    /// OF1.2+ only.
    pub cookie_mask: u64,
    pub table_id: u8,
    pub command: u8,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub buffer_id: u32,
    pub out_port: u32,
    /// OF1.2+ only.
    pub out_group: u32,
    pub flags: u16,
    pub fields: Match,
    /// OF1.0 encodes only the actions of `ApplyActions` instructions.
    pub instructions: Vec<Instruction>,
}

impl Default for FlowMod {
    fn default() -> FlowMod {
        FlowMod {
            cookie: 0,
            cookie_mask: 0,
            table_id: 0,
            command: flow_mod_cmd::ADD,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: 0,
            buffer_id: NO_BUFFER,
            out_port: port::port_no::ANY,
            out_group: GROUP_ANY,
            flags: 0,
            fields: Match::new(),
            instructions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GroupMod {
    pub command: u16,
    pub group_type: u8,
    pub group_id: u32,
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PortMod {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub config: u32,
    pub mask: u32,
    pub advertise: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TableMod {
    pub table_id: u8,
    pub config: u32,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MeterBand {
    Drop {
        rate: u32,
        burst_size: u32,
    },
    DscpRemark {
        rate: u32,
        burst_size: u32,
        prec_level: u8,
    },
    Experimenter {
        rate: u32,
        burst_size: u32,
        experimenter: u32,
    },
}

impl MeterBand {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        match *self {
            MeterBand::Drop { rate, burst_size } => {
                buf.write(1u16);
                buf.write(16u16);
                buf.write(rate);
                buf.write(burst_size);
                buf.pad(4);
            }
            MeterBand::DscpRemark {
                rate,
                burst_size,
                prec_level,
            } => {
                buf.write(2u16);
                buf.write(16u16);
                buf.write(rate);
                buf.write(burst_size);
                buf.write(prec_level);
                buf.pad(3);
            }
            MeterBand::Experimenter {
                rate,
                burst_size,
                experimenter,
            } => {
                buf.write(0xffffu16);
                buf.write(16u16);
                buf.write(rate);
                buf.write(burst_size);
                buf.write(experimenter);
            }
        }
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<MeterBand, DecodeError> {
        let ty: u16 = buf.get()?;
        let len: u16 = buf.get()?;
        if len < 16 {
            return Err(DecodeError::Truncated);
        }
        let rate = buf.get()?;
        let burst_size = buf.get()?;
        let band = match ty {
            1 => {
                buf.skip(4)?;
                MeterBand::Drop { rate, burst_size }
            }
            2 => {
                let prec_level = buf.get()?;
                buf.skip(3)?;
                MeterBand::DscpRemark {
                    rate,
                    burst_size,
                    prec_level,
                }
            }
            _ => {
                let experimenter = buf.get()?;
                MeterBand::Experimenter {
                    rate,
                    burst_size,
                    experimenter,
                }
            }
        };
        buf.skip(len as usize - 16)?;
        Ok(band)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MeterMod {
    pub command: u16,
    pub flags: u16,
    pub meter_id: u32,
    pub bands: Vec<MeterBand>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RoleMsg {
    pub role: u32,
    pub generation_id: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct AsyncConfig {
    pub packet_in_mask: [u32; 2],
    pub port_status_mask: [u32; 2],
    pub flow_removed_mask: [u32; 2],
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExperimenterMsg {
    pub experimenter: u32,
    /// OF1.2+ only; OF1.0 vendor messages have no subtype field.
    pub exp_type: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    Error(ErrorMsg),
    EchoRequest(Echo),
    EchoReply(Echo),
    Experimenter(ExperimenterMsg),
    FeaturesRequest,
    FeaturesReply(FeaturesReply),
    GetConfigRequest,
    GetConfigReply(SwitchConfig),
    SetConfig(SwitchConfig),
    PacketIn(PacketIn),
    FlowRemoved(FlowRemoved),
    PortStatus(PortStatus),
    PacketOut(PacketOut),
    FlowMod(FlowMod),
    GroupMod(GroupMod),
    PortMod(PortMod),
    TableMod(TableMod),
    MultipartRequest(MultipartRequest),
    MultipartReply(MultipartReply),
    BarrierRequest,
    BarrierReply,
    RoleRequest(RoleMsg),
    RoleReply(RoleMsg),
    GetAsyncRequest,
    GetAsyncReply(AsyncConfig),
    SetAsync(AsyncConfig),
    MeterMod(MeterMod),
}

impl Message {
    pub fn kind(&self) -> MsgKind {
        use self::Message::*;
        match *self {
            Hello(_) => MsgKind::Hello,
            Error(_) => MsgKind::Error,
            EchoRequest(_) => MsgKind::EchoRequest,
            EchoReply(_) => MsgKind::EchoReply,
            Experimenter(_) => MsgKind::Experimenter,
            FeaturesRequest => MsgKind::FeaturesRequest,
            FeaturesReply(_) => MsgKind::FeaturesReply,
            GetConfigRequest => MsgKind::GetConfigRequest,
            GetConfigReply(_) => MsgKind::GetConfigReply,
            SetConfig(_) => MsgKind::SetConfig,
            PacketIn(_) => MsgKind::PacketIn,
            FlowRemoved(_) => MsgKind::FlowRemoved,
            PortStatus(_) => MsgKind::PortStatus,
            PacketOut(_) => MsgKind::PacketOut,
            FlowMod(_) => MsgKind::FlowMod,
            GroupMod(_) => MsgKind::GroupMod,
            PortMod(_) => MsgKind::PortMod,
            TableMod(_) => MsgKind::TableMod,
            MultipartRequest(_) => MsgKind::MultipartRequest,
            MultipartReply(_) => MsgKind::MultipartReply,
            BarrierRequest => MsgKind::BarrierRequest,
            BarrierReply => MsgKind::BarrierReply,
            RoleRequest(_) => MsgKind::RoleRequest,
            RoleReply(_) => MsgKind::RoleReply,
            GetAsyncRequest => MsgKind::GetAsyncRequest,
            GetAsyncReply(_) => MsgKind::GetAsyncReply,
            SetAsync(_) => MsgKind::SetAsync,
            MeterMod(_) => MsgKind::MeterMod,
        }
    }

    /// Serialize into a framed envelope for `version` with the given xid.
    pub fn encode(&self, version: Version, xid: u32) -> Result<Envelope, EncodeError> {
        let ty = self.kind().to_wire(version).ok_or(EncodeError::NotInVersion {
            kind: self.kind(),
            version,
        })?;
        let mut body = BytesMut::with_capacity(u16::max_value() as usize - HEADER_LEN);
        self.encode_body(version, &mut body);
        let header = Header {
            version: version.to_wire(),
            ty,
            length: (HEADER_LEN + body.len()) as u16,
            xid,
        };
        Ok(Envelope {
            header,
            body: body.freeze(),
        })
    }

    fn encode_body(&self, version: Version, buf: &mut BytesMut) {
        use self::Message::*;
        match *self {
            Hello(ref hello) => {
                // OF1.0 peers ignore hello elements, so the bitmap is safe to
                // send unconditionally.
                if let Some(ref bitmap) = hello.bitmap {
                    buf.write(1u16); // OFPHET_VERSIONBITMAP
                    buf.write(8u16);
                    buf.write(bitmap.bits());
                }
            }
            Error(ref e) => {
                buf.write(e.err.ty);
                buf.write(e.err.code);
                buf.put_slice(&e.data);
            }
            EchoRequest(ref echo) | EchoReply(ref echo) => {
                buf.put_slice(&echo.data);
            }
            Experimenter(ref e) => {
                buf.write(e.experimenter);
                if version != Version::V1_0 {
                    buf.write(e.exp_type);
                }
                buf.put_slice(&e.data);
            }
            FeaturesRequest | GetConfigRequest | BarrierRequest | BarrierReply
            | GetAsyncRequest => {}
            FeaturesReply(ref f) => {
                buf.write(f.dpid);
                buf.write(f.n_buffers);
                buf.write(f.n_tables);
                if version == Version::V1_3 {
                    buf.write(f.auxiliary_id);
                    buf.pad(2);
                } else {
                    buf.pad(3);
                }
                buf.write(f.capabilities);
                buf.write(f.actions);
                if version != Version::V1_3 {
                    for p in &f.ports {
                        p.encode(version, buf);
                    }
                }
            }
            GetConfigReply(ref c) | SetConfig(ref c) => {
                buf.write(c.flags);
                buf.write(c.miss_send_len);
            }
            PacketIn(ref p) => {
                buf.write(p.buffer_id);
                buf.write(p.total_len);
                match version {
                    Version::V1_0 => {
                        buf.write(port::narrow_port_no(p.in_port().unwrap_or(0)));
                        buf.write(p.reason);
                        buf.pad(1);
                    }
                    Version::V1_2 => {
                        buf.write(p.reason);
                        buf.write(p.table_id);
                        p.fields.encode(version, buf);
                        buf.pad(2);
                    }
                    Version::V1_3 => {
                        buf.write(p.reason);
                        buf.write(p.table_id);
                        buf.write(p.cookie);
                        p.fields.encode(version, buf);
                        buf.pad(2);
                    }
                }
                buf.put_slice(&p.data);
            }
            FlowRemoved(ref f) => match version {
                Version::V1_0 => {
                    f.fields.encode(version, buf);
                    buf.write(f.cookie);
                    buf.write(f.priority);
                    buf.write(f.reason);
                    buf.pad(1);
                    buf.write(f.duration_sec);
                    buf.write(f.duration_nsec);
                    buf.write(f.idle_timeout);
                    buf.pad(2);
                    buf.write(f.packet_count);
                    buf.write(f.byte_count);
                }
                _ => {
                    buf.write(f.cookie);
                    buf.write(f.priority);
                    buf.write(f.reason);
                    buf.write(f.table_id);
                    buf.write(f.duration_sec);
                    buf.write(f.duration_nsec);
                    buf.write(f.idle_timeout);
                    buf.write(f.hard_timeout);
                    buf.write(f.packet_count);
                    buf.write(f.byte_count);
                    f.fields.encode(version, buf);
                }
            },
            PortStatus(ref p) => {
                buf.write(p.reason);
                buf.pad(7);
                p.desc.encode(version, buf);
            }
            PacketOut(ref p) => {
                buf.write(p.buffer_id);
                let actions_len = actions_wire_len(&p.actions, version) as u16;
                if version == Version::V1_0 {
                    buf.write(port::narrow_port_no(p.in_port));
                    buf.write(actions_len);
                } else {
                    buf.write(p.in_port);
                    buf.write(actions_len);
                    buf.pad(6);
                }
                encode_actions(&p.actions, version, buf);
                buf.put_slice(&p.data);
            }
            FlowMod(ref f) => match version {
                Version::V1_0 => {
                    f.fields.encode(version, buf);
                    buf.write(f.cookie);
                    buf.write(u16::from(f.command));
                    buf.write(f.idle_timeout);
                    buf.write(f.hard_timeout);
                    buf.write(f.priority);
                    buf.write(f.buffer_id);
                    buf.write(port::narrow_port_no(f.out_port));
                    buf.write(f.flags);
                    for inst in &f.instructions {
                        if let Instruction::ApplyActions(ref actions) = *inst {
                            encode_actions(actions, version, buf);
                        }
                    }
                }
                _ => {
                    buf.write(f.cookie);
                    buf.write(f.cookie_mask);
                    buf.write(f.table_id);
                    buf.write(f.command);
                    buf.write(f.idle_timeout);
                    buf.write(f.hard_timeout);
                    buf.write(f.priority);
                    buf.write(f.buffer_id);
                    buf.write(f.out_port);
                    buf.write(f.out_group);
                    buf.write(f.flags);
                    buf.pad(2);
                    f.fields.encode(version, buf);
                    for inst in &f.instructions {
                        inst.encode(version, buf);
                    }
                }
            },
            GroupMod(ref g) => {
                buf.write(g.command);
                buf.write(g.group_type);
                buf.pad(1);
                buf.write(g.group_id);
                encode_buckets(&g.buckets, version, buf);
            }
            PortMod(ref p) => {
                if version == Version::V1_0 {
                    buf.write(port::narrow_port_no(p.port_no));
                    buf.put_slice(&p.hw_addr);
                } else {
                    buf.write(p.port_no);
                    buf.pad(4);
                    buf.put_slice(&p.hw_addr);
                    buf.pad(2);
                }
                buf.write(p.config);
                buf.write(p.mask);
                buf.write(p.advertise);
                buf.pad(4);
            }
            TableMod(ref t) => {
                buf.write(t.table_id);
                buf.pad(3);
                buf.write(t.config);
            }
            MultipartRequest(ref m) => m.encode_body(version, buf),
            MultipartReply(ref m) => m.encode_body(version, buf),
            RoleRequest(ref r) | RoleReply(ref r) => {
                buf.write(r.role);
                buf.pad(4);
                buf.write(r.generation_id);
            }
            GetAsyncReply(ref a) | SetAsync(ref a) => {
                buf.write(a.packet_in_mask[0]);
                buf.write(a.packet_in_mask[1]);
                buf.write(a.port_status_mask[0]);
                buf.write(a.port_status_mask[1]);
                buf.write(a.flow_removed_mask[0]);
                buf.write(a.flow_removed_mask[1]);
            }
            MeterMod(ref m) => {
                buf.write(m.command);
                buf.write(m.flags);
                buf.write(m.meter_id);
                for band in &m.bands {
                    band.encode(buf);
                }
            }
        }
    }

    pub fn decode(envelope: &Envelope) -> Result<Message, DecodeError> {
        let version = Version::from_wire(envelope.header.version).ok_or(
            DecodeError::UnknownVersion {
                version: envelope.header.version,
            },
        )?;
        let kind = MsgKind::from_wire(version, envelope.header.ty).ok_or(
            DecodeError::UnknownType {
                version,
                ty: envelope.header.ty,
            },
        )?;
        let buf = &mut ::std::io::Cursor::new(&envelope.body[..]);
        let msg = match kind {
            MsgKind::Hello => Message::Hello(decode_hello_body(&envelope.body)?),
            MsgKind::Error => {
                let ty = buf.get()?;
                let code = buf.get()?;
                let mut data = vec![0; buf.remaining()];
                buf.get_into(&mut data)?;
                Message::Error(ErrorMsg {
                    err: OfpErr { ty, code },
                    data,
                })
            }
            MsgKind::EchoRequest | MsgKind::EchoReply => {
                let mut data = vec![0; buf.remaining()];
                buf.get_into(&mut data)?;
                let echo = Echo { data };
                if kind == MsgKind::EchoRequest {
                    Message::EchoRequest(echo)
                } else {
                    Message::EchoReply(echo)
                }
            }
            MsgKind::Experimenter => {
                let experimenter = buf.get()?;
                let exp_type = if version == Version::V1_0 {
                    0
                } else {
                    buf.get()?
                };
                let mut data = vec![0; buf.remaining()];
                buf.get_into(&mut data)?;
                Message::Experimenter(ExperimenterMsg {
                    experimenter,
                    exp_type,
                    data,
                })
            }
            MsgKind::FeaturesRequest => Message::FeaturesRequest,
            MsgKind::GetConfigRequest => Message::GetConfigRequest,
            MsgKind::BarrierRequest => Message::BarrierRequest,
            MsgKind::BarrierReply => Message::BarrierReply,
            MsgKind::GetAsyncRequest => Message::GetAsyncRequest,
            MsgKind::FeaturesReply => {
                let dpid = buf.get()?;
                let n_buffers = buf.get()?;
                let n_tables = buf.get()?;
                let auxiliary_id = if version == Version::V1_3 {
                    let aux = buf.get()?;
                    buf.skip(2)?;
                    aux
                } else {
                    buf.skip(3)?;
                    0
                };
                let capabilities = buf.get()?;
                let actions = buf.get()?;
                let ports = if version == Version::V1_3 {
                    Vec::new()
                } else {
                    port::decode_ports(version, buf)?
                };
                Message::FeaturesReply(FeaturesReply {
                    dpid,
                    n_buffers,
                    n_tables,
                    auxiliary_id,
                    capabilities,
                    actions,
                    ports,
                })
            }
            MsgKind::GetConfigReply | MsgKind::SetConfig => {
                let config = SwitchConfig {
                    flags: buf.get()?,
                    miss_send_len: buf.get()?,
                };
                if kind == MsgKind::GetConfigReply {
                    Message::GetConfigReply(config)
                } else {
                    Message::SetConfig(config)
                }
            }
            MsgKind::PacketIn => {
                let buffer_id = buf.get()?;
                let total_len = buf.get()?;
                let (reason, table_id, cookie, fields) = match version {
                    Version::V1_0 => {
                        let in_port: u16 = buf.get()?;
                        let reason = buf.get()?;
                        buf.skip(1)?;
                        let mut fields = Match::new();
                        fields.set_in_port(port::widen_port_no(in_port));
                        (reason, 0, 0, fields)
                    }
                    Version::V1_2 => {
                        let reason = buf.get()?;
                        let table_id = buf.get()?;
                        let fields = Match::decode(version, buf)?;
                        buf.skip(2)?;
                        (reason, table_id, 0, fields)
                    }
                    Version::V1_3 => {
                        let reason = buf.get()?;
                        let table_id = buf.get()?;
                        let cookie = buf.get()?;
                        let fields = Match::decode(version, buf)?;
                        buf.skip(2)?;
                        (reason, table_id, cookie, fields)
                    }
                };
                let mut data = vec![0; buf.remaining()];
                buf.get_into(&mut data)?;
                Message::PacketIn(PacketIn {
                    buffer_id,
                    total_len,
                    reason,
                    table_id,
                    cookie,
                    fields,
                    data: data.into(),
                })
            }
            MsgKind::FlowRemoved => {
                let msg = match version {
                    Version::V1_0 => {
                        let fields = Match::decode(version, buf)?;
                        let cookie = buf.get()?;
                        let priority = buf.get()?;
                        let reason = buf.get()?;
                        buf.skip(1)?;
                        let duration_sec = buf.get()?;
                        let duration_nsec = buf.get()?;
                        let idle_timeout = buf.get()?;
                        buf.skip(2)?;
                        FlowRemoved {
                            cookie,
                            priority,
                            reason,
                            table_id: 0,
                            duration_sec,
                            duration_nsec,
                            idle_timeout,
                            hard_timeout: 0,
                            packet_count: buf.get()?,
                            byte_count: buf.get()?,
                            fields,
                        }
                    }
                    _ => FlowRemoved {
                        cookie: buf.get()?,
                        priority: buf.get()?,
                        reason: buf.get()?,
                        table_id: buf.get()?,
                        duration_sec: buf.get()?,
                        duration_nsec: buf.get()?,
                        idle_timeout: buf.get()?,
                        hard_timeout: buf.get()?,
                        packet_count: buf.get()?,
                        byte_count: buf.get()?,
                        fields: Match::decode(version, buf)?,
                    },
                };
                Message::FlowRemoved(msg)
            }
            MsgKind::PortStatus => {
                let reason = buf.get()?;
                buf.skip(7)?;
                Message::PortStatus(PortStatus {
                    reason,
                    desc: Port::decode(version, buf)?,
                })
            }
            MsgKind::PacketOut => {
                let buffer_id = buf.get()?;
                let (in_port, actions_len) = if version == Version::V1_0 {
                    let in_port: u16 = buf.get()?;
                    let actions_len: u16 = buf.get()?;
                    (port::widen_port_no(in_port), actions_len)
                } else {
                    let in_port = buf.get()?;
                    let actions_len = buf.get()?;
                    buf.skip(6)?;
                    (in_port, actions_len)
                };
                let actions = decode_actions(version, buf, actions_len as usize)?;
                let mut data = vec![0; buf.remaining()];
                buf.get_into(&mut data)?;
                Message::PacketOut(PacketOut {
                    buffer_id,
                    in_port,
                    actions,
                    data: data.into(),
                })
            }
            MsgKind::FlowMod => {
                let msg = match version {
                    Version::V1_0 => {
                        let fields = Match::decode(version, buf)?;
                        let cookie = buf.get()?;
                        let command: u16 = buf.get()?;
                        let idle_timeout = buf.get()?;
                        let hard_timeout = buf.get()?;
                        let priority = buf.get()?;
                        let buffer_id = buf.get()?;
                        let out_port: u16 = buf.get()?;
                        let flags = buf.get()?;
                        let actions = decode_actions(version, buf, buf.remaining())?;
                        FlowMod {
                            cookie,
                            cookie_mask: 0,
                            table_id: 0,
                            command: command as u8,
                            idle_timeout,
                            hard_timeout,
                            priority,
                            buffer_id,
                            out_port: port::widen_port_no(out_port),
                            out_group: GROUP_ANY,
                            flags,
                            fields,
                            instructions: if actions.is_empty() {
                                Vec::new()
                            } else {
                                vec![Instruction::ApplyActions(actions)]
                            },
                        }
                    }
                    _ => {
                        let cookie = buf.get()?;
                        let cookie_mask = buf.get()?;
                        let table_id = buf.get()?;
                        let command = buf.get()?;
                        let idle_timeout = buf.get()?;
                        let hard_timeout = buf.get()?;
                        let priority = buf.get()?;
                        let buffer_id = buf.get()?;
                        let out_port = buf.get()?;
                        let out_group = buf.get()?;
                        let flags = buf.get()?;
                        buf.skip(2)?;
                        let fields = Match::decode(version, buf)?;
                        let instructions =
                            ::action::decode_instructions(version, buf, buf.remaining())?;
                        FlowMod {
                            cookie,
                            cookie_mask,
                            table_id,
                            command,
                            idle_timeout,
                            hard_timeout,
                            priority,
                            buffer_id,
                            out_port,
                            out_group,
                            flags,
                            fields,
                            instructions,
                        }
                    }
                };
                Message::FlowMod(msg)
            }
            MsgKind::GroupMod => {
                let command = buf.get()?;
                let group_type = buf.get()?;
                buf.skip(1)?;
                let group_id = buf.get()?;
                let buckets = decode_buckets(version, buf, buf.remaining())?;
                Message::GroupMod(GroupMod {
                    command,
                    group_type,
                    group_id,
                    buckets,
                })
            }
            MsgKind::PortMod => {
                let msg = if version == Version::V1_0 {
                    let port_no: u16 = buf.get()?;
                    let mut hw_addr = [0; 6];
                    buf.get_into(&mut hw_addr)?;
                    PortMod {
                        port_no: port::widen_port_no(port_no),
                        hw_addr,
                        config: buf.get()?,
                        mask: buf.get()?,
                        advertise: buf.get()?,
                    }
                } else {
                    let port_no = buf.get()?;
                    buf.skip(4)?;
                    let mut hw_addr = [0; 6];
                    buf.get_into(&mut hw_addr)?;
                    buf.skip(2)?;
                    PortMod {
                        port_no,
                        hw_addr,
                        config: buf.get()?,
                        mask: buf.get()?,
                        advertise: buf.get()?,
                    }
                };
                Message::PortMod(msg)
            }
            MsgKind::TableMod => {
                let table_id = buf.get()?;
                buf.skip(3)?;
                Message::TableMod(TableMod {
                    table_id,
                    config: buf.get()?,
                })
            }
            MsgKind::MultipartRequest => {
                Message::MultipartRequest(MultipartRequest::decode_body(version, buf)?)
            }
            MsgKind::MultipartReply => {
                Message::MultipartReply(MultipartReply::decode_body(version, buf)?)
            }
            MsgKind::RoleRequest | MsgKind::RoleReply => {
                let role = buf.get()?;
                buf.skip(4)?;
                let msg = RoleMsg {
                    role,
                    generation_id: buf.get()?,
                };
                if kind == MsgKind::RoleRequest {
                    Message::RoleRequest(msg)
                } else {
                    Message::RoleReply(msg)
                }
            }
            MsgKind::GetAsyncReply | MsgKind::SetAsync => {
                let config = AsyncConfig {
                    packet_in_mask: [buf.get()?, buf.get()?],
                    port_status_mask: [buf.get()?, buf.get()?],
                    flow_removed_mask: [buf.get()?, buf.get()?],
                };
                if kind == MsgKind::GetAsyncReply {
                    Message::GetAsyncReply(config)
                } else {
                    Message::SetAsync(config)
                }
            }
            MsgKind::MeterMod => {
                let command = buf.get()?;
                let flags = buf.get()?;
                let meter_id = buf.get()?;
                let mut bands = Vec::new();
                while buf.remaining() >= 16 {
                    bands.push(MeterBand::decode(buf)?);
                }
                Message::MeterMod(MeterMod {
                    command,
                    flags,
                    meter_id,
                    bands,
                })
            }
        };
        Ok(msg)
    }
}

/// The hello element list is version-independent, so a HELLO can be parsed
/// even when its header names a version we do not speak — which is exactly
/// when the bitmap matters most.
pub fn decode_hello_body(body: &[u8]) -> Result<Hello, DecodeError> {
    let buf = &mut ::std::io::Cursor::new(body);
    let mut hello = Hello::default();
    // Elements are type/length pairs padded to 8; anything but the version
    // bitmap is skipped.
    while buf.remaining() >= 4 {
        let ty: u16 = buf.get()?;
        let len: u16 = buf.get()?;
        if len < 4 {
            return Err(DecodeError::Truncated);
        }
        let body_len = len as usize - 4;
        if ty == 1 && body_len >= 4 {
            let bits: u32 = buf.get()?;
            buf.skip(body_len - 4)?;
            hello.bitmap = Some(VersionBitmap::from_bits(bits));
        } else {
            buf.skip(body_len)?;
        }
        buf.skip(::coding::pad_to_8(len as usize))?;
    }
    Ok(hello)
}

/// Upper bound of request context echoed back in OFPT_ERROR data.
pub const ERROR_DATA_MAX: usize = 64;

/// Build the error reply the protocol prescribes for a rejected request:
/// type/code plus up to 64 bytes of the offending message.
pub fn error_for(err: OfpErr, offending: &Envelope) -> ErrorMsg {
    let frame = offending.to_bytes();
    let n = ::std::cmp::min(frame.len(), ERROR_DATA_MAX);
    ErrorMsg {
        err,
        data: frame[..n].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message::Framer;

    fn round_trip(version: Version, msg: Message) {
        let envelope = msg.encode(version, 0x11223344).unwrap();
        assert_eq!(
            envelope.header.length as usize,
            HEADER_LEN + envelope.body.len()
        );
        // through the framer and back
        let mut framer = Framer::new(1 << 16);
        framer.input(&envelope.to_bytes());
        let env2 = framer.next().unwrap().unwrap();
        assert_eq!(env2, envelope);
        assert_eq!(Message::decode(&env2).unwrap(), msg);
    }

    #[test]
    fn hello_with_bitmap() {
        let mut bitmap = VersionBitmap::new();
        bitmap.add(Version::V1_0);
        bitmap.add(Version::V1_3);
        let msg = Message::Hello(Hello {
            bitmap: Some(bitmap),
        });
        let envelope = msg.encode(Version::V1_3, 1).unwrap();
        assert_eq!(
            &envelope.to_bytes()[..],
            &hex!("04000010000000010001000800000012")[..]
        );
        round_trip(Version::V1_3, msg);
    }

    #[test]
    fn hello_bare_v10() {
        round_trip(Version::V1_0, Message::Hello(Hello { bitmap: None }));
    }

    #[test]
    fn error_round_trip() {
        round_trip(
            Version::V1_2,
            Message::Error(ErrorMsg {
                err: OfpErr::HELLO_INCOMPATIBLE,
                data: vec![1, 2, 3, 4],
            }),
        );
    }

    #[test]
    fn echo_payload_survives() {
        round_trip(
            Version::V1_0,
            Message::EchoRequest(Echo {
                data: b"ping".to_vec(),
            }),
        );
        round_trip(Version::V1_3, Message::EchoReply(Echo::default()));
    }

    #[test]
    fn features_reply_with_ports_v10() {
        let port = ::port::Port {
            port_no: 1,
            hw_addr: [1, 2, 3, 4, 5, 6],
            name: "eth1".into(),
            config: 0,
            state: 0,
            curr: 0,
            advertised: 0,
            supported: 0,
            peer: 0,
            curr_speed: 0,
            max_speed: 0,
        };
        round_trip(
            Version::V1_0,
            Message::FeaturesReply(FeaturesReply {
                dpid: 0x0000_0000_0000_0001,
                n_buffers: 256,
                n_tables: 8,
                auxiliary_id: 0,
                capabilities: 0xc7,
                actions: 0xfff,
                ports: vec![port.clone(), ::port::Port { port_no: 2, ..port }],
            }),
        );
    }

    #[test]
    fn features_reply_v13_has_no_ports() {
        let msg = Message::FeaturesReply(FeaturesReply {
            dpid: 7,
            n_buffers: 0,
            n_tables: 4,
            auxiliary_id: 3,
            capabilities: 0x47,
            actions: 0,
            ports: Vec::new(),
        });
        let envelope = msg.encode(Version::V1_3, 9).unwrap();
        assert_eq!(envelope.body.len(), 24);
        round_trip(Version::V1_3, msg);
    }

    #[test]
    fn packet_in_v10_in_port_becomes_match() {
        // header (v1.0, PACKET_IN, len 18) + buffer_id + total_len + in_port
        // + reason + pad
        let raw = hex!("010a0012aabbccdd00000100004000030000");
        let mut framer = Framer::new(1 << 16);
        framer.input(&raw);
        let envelope = framer.next().unwrap().unwrap();
        let msg = Message::decode(&envelope).unwrap();
        match msg {
            Message::PacketIn(ref p) => {
                assert_eq!(p.in_port(), Some(3));
                assert_eq!(p.buffer_id, 0x100);
            }
            _ => panic!("wrong message"),
        }
    }

    #[test]
    fn packet_in_v13_round_trip() {
        let mut fields = Match::new();
        fields.set_in_port(7);
        fields.set_eth_type(0x0806);
        round_trip(
            Version::V1_3,
            Message::PacketIn(PacketIn {
                buffer_id: NO_BUFFER,
                total_len: 60,
                reason: packet_in_reason::NO_MATCH,
                table_id: 0,
                cookie: 0xfeed,
                fields,
                data: Bytes::from_static(b"\xff\xff\xff\xff\xff\xff"),
            }),
        );
    }

    #[test]
    fn flow_mod_v13_round_trip() {
        let mut fields = Match::new();
        fields.set_in_port(1);
        fields.set_eth_dst([2, 2, 2, 2, 2, 2]);
        round_trip(
            Version::V1_3,
            Message::FlowMod(FlowMod {
                cookie: 0xc0de,
                table_id: 0,
                command: flow_mod_cmd::ADD,
                idle_timeout: 60,
                priority: 100,
                fields,
                instructions: vec![Instruction::ApplyActions(vec![Action::output(2)])],
                ..FlowMod::default()
            }),
        );
    }

    #[test]
    fn flow_mod_v10_round_trip() {
        let mut fields = Match::new();
        fields.set_in_port(1);
        round_trip(
            Version::V1_0,
            Message::FlowMod(FlowMod {
                command: flow_mod_cmd::ADD,
                priority: 10,
                cookie_mask: 0,
                out_group: GROUP_ANY,
                fields,
                instructions: vec![Instruction::ApplyActions(vec![Action::Output {
                    port: 2,
                    max_len: 0,
                }])],
                ..FlowMod::default()
            }),
        );
    }

    #[test]
    fn packet_out_round_trip() {
        round_trip(
            Version::V1_3,
            Message::PacketOut(PacketOut {
                buffer_id: NO_BUFFER,
                in_port: ::port::port_no::CONTROLLER,
                actions: vec![Action::output(::port::port_no::FLOOD)],
                data: Bytes::from_static(b"\x01\x02\x03"),
            }),
        );
    }

    #[test]
    fn group_mod_round_trip() {
        round_trip(
            Version::V1_3,
            Message::GroupMod(GroupMod {
                command: group_mod_cmd::ADD,
                group_type: 0,
                group_id: 1,
                buckets: vec![Bucket {
                    weight: 0,
                    watch_port: port::port_no::ANY,
                    watch_group: GROUP_ANY,
                    actions: vec![Action::output(2)],
                }],
            }),
        );
    }

    #[test]
    fn meter_mod_round_trip() {
        round_trip(
            Version::V1_3,
            Message::MeterMod(MeterMod {
                command: meter_mod_cmd::ADD,
                flags: 1,
                meter_id: 5,
                bands: vec![
                    MeterBand::Drop {
                        rate: 1000,
                        burst_size: 64,
                    },
                    MeterBand::DscpRemark {
                        rate: 500,
                        burst_size: 32,
                        prec_level: 1,
                    },
                ],
            }),
        );
    }

    #[test]
    fn meter_mod_rejected_below_v13() {
        let msg = Message::MeterMod(MeterMod {
            command: 0,
            flags: 0,
            meter_id: 1,
            bands: Vec::new(),
        });
        assert_matches!(
            msg.encode(Version::V1_2, 0),
            Err(EncodeError::NotInVersion { .. })
        );
    }

    #[test]
    fn role_round_trip() {
        round_trip(
            Version::V1_3,
            Message::RoleRequest(RoleMsg {
                role: 2,
                generation_id: 0x1122_3344,
            }),
        );
    }

    #[test]
    fn async_config_round_trip() {
        round_trip(
            Version::V1_3,
            Message::SetAsync(AsyncConfig {
                packet_in_mask: [3, 0],
                port_status_mask: [7, 7],
                flow_removed_mask: [0xf, 0],
            }),
        );
    }

    #[test]
    fn port_status_round_trip() {
        let desc = ::port::Port {
            port_no: 4,
            hw_addr: [9, 9, 9, 9, 9, 9],
            name: "veth4".into(),
            config: 0,
            state: ::port::state::LINK_DOWN,
            curr: 0,
            advertised: 0,
            supported: 0,
            peer: 0,
            curr_speed: 0,
            max_speed: 0,
        };
        round_trip(
            Version::V1_3,
            Message::PortStatus(PortStatus {
                reason: port_status_reason::MODIFY,
                desc,
            }),
        );
    }

    #[test]
    fn error_for_truncates_context() {
        let mut fields = Match::new();
        fields.set_in_port(1);
        let big = Message::PacketIn(PacketIn {
            buffer_id: 0,
            total_len: 1000,
            reason: 0,
            table_id: 0,
            cookie: 0,
            fields,
            data: Bytes::from(vec![0u8; 1000]),
        });
        let envelope = big.encode(Version::V1_3, 5).unwrap();
        let err = error_for(OfpErr::BAD_REQUEST_BAD_TYPE, &envelope);
        assert_eq!(err.data.len(), ERROR_DATA_MAX);
    }
}
