//! Multipart (stats) request/reply bodies. Replies carry arrays whose
//! elements either have a fixed per-version size or lead with their own
//! length field; both decode until the body is exhausted.

use bytes::{Buf, BufMut, BytesMut};

use action::{
    actions_wire_len, decode_actions, decode_buckets, decode_instructions, encode_actions,
    encode_buckets, encode_instructions, instructions_wire_len, Bucket, Instruction,
};
use coding::{decode_name, encode_name, BufExt, BufMutExt};
use msg::DecodeError;
use oxm::Match;
use port;
use Version;

/// OFPMP_* / OFPST_* type codes; 0..=5 coincide in every version.
pub mod stats_type {
    pub const DESC: u16 = 0;
    pub const FLOW: u16 = 1;
    pub const AGGREGATE: u16 = 2;
    pub const TABLE: u16 = 3;
    pub const PORT: u16 = 4;
    pub const QUEUE: u16 = 5;
    pub const GROUP: u16 = 6;
    pub const GROUP_DESC: u16 = 7;
    pub const METER: u16 = 9;
    pub const PORT_DESC: u16 = 13;
}

/// OFPMPF_REPLY_MORE / OFPSF_REPLY_MORE.
pub const FLAG_MORE: u16 = 1;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlowStatsRequest {
    pub table_id: u8,
    pub out_port: u32,
    pub out_group: u32,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub fields: Match,
}

impl Default for FlowStatsRequest {
    fn default() -> FlowStatsRequest {
        FlowStatsRequest {
            table_id: ::msg::TABLE_ALL,
            out_port: port::port_no::ANY,
            out_group: ::msg::GROUP_ANY,
            cookie: 0,
            cookie_mask: 0,
            fields: Match::new(),
        }
    }
}

impl FlowStatsRequest {
    fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        if version == Version::V1_0 {
            self.fields.encode(version, buf);
            buf.write(self.table_id);
            buf.pad(1);
            buf.write(port::narrow_port_no(self.out_port));
        } else {
            buf.write(self.table_id);
            buf.pad(3);
            buf.write(self.out_port);
            buf.write(self.out_group);
            buf.pad(4);
            buf.write(self.cookie);
            buf.write(self.cookie_mask);
            self.fields.encode(version, buf);
        }
    }

    fn decode<B: Buf>(version: Version, buf: &mut B) -> Result<FlowStatsRequest, DecodeError> {
        if version == Version::V1_0 {
            let fields = Match::decode(version, buf)?;
            let table_id = buf.get()?;
            buf.skip(1)?;
            let out_port: u16 = buf.get()?;
            Ok(FlowStatsRequest {
                table_id,
                out_port: port::widen_port_no(out_port),
                out_group: ::msg::GROUP_ANY,
                cookie: 0,
                cookie_mask: 0,
                fields,
            })
        } else {
            let table_id = buf.get()?;
            buf.skip(3)?;
            let out_port = buf.get()?;
            let out_group = buf.get()?;
            buf.skip(4)?;
            let cookie = buf.get()?;
            let cookie_mask = buf.get()?;
            let fields = Match::decode(version, buf)?;
            Ok(FlowStatsRequest {
                table_id,
                out_port,
                out_group,
                cookie,
                cookie_mask,
                fields,
            })
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StatsRequest {
    Desc,
    Flow(FlowStatsRequest),
    Aggregate(FlowStatsRequest),
    Table,
    Port { port_no: u32 },
    Queue { port_no: u32, queue_id: u32 },
    Group { group_id: u32 },
    GroupDesc,
    Meter { meter_id: u32 },
    PortDesc,
    Unknown { ty: u16, body: Vec<u8> },
}

impl StatsRequest {
    pub fn ty(&self) -> u16 {
        use self::StatsRequest::*;
        match *self {
            Desc => stats_type::DESC,
            Flow(_) => stats_type::FLOW,
            Aggregate(_) => stats_type::AGGREGATE,
            Table => stats_type::TABLE,
            Port { .. } => stats_type::PORT,
            Queue { .. } => stats_type::QUEUE,
            Group { .. } => stats_type::GROUP,
            GroupDesc => stats_type::GROUP_DESC,
            Meter { .. } => stats_type::METER,
            PortDesc => stats_type::PORT_DESC,
            Unknown { ty, .. } => ty,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MultipartRequest {
    pub flags: u16,
    pub body: StatsRequest,
}

impl MultipartRequest {
    pub fn new(body: StatsRequest) -> Self {
        MultipartRequest { flags: 0, body }
    }

    pub fn encode_body(&self, version: Version, buf: &mut BytesMut) {
        use self::StatsRequest::*;
        buf.write(self.body.ty());
        buf.write(self.flags);
        if version != Version::V1_0 {
            buf.pad(4);
        }
        match self.body {
            Desc | Table | GroupDesc | PortDesc => {}
            Flow(ref req) | Aggregate(ref req) => req.encode(version, buf),
            Port { port_no } => {
                if version == Version::V1_0 {
                    buf.write(port::narrow_port_no(port_no));
                    buf.pad(6);
                } else {
                    buf.write(port_no);
                    buf.pad(4);
                }
            }
            Queue { port_no, queue_id } => {
                if version == Version::V1_0 {
                    buf.write(port::narrow_port_no(port_no));
                    buf.pad(2);
                } else {
                    buf.write(port_no);
                }
                buf.write(queue_id);
            }
            Group { group_id } => {
                buf.write(group_id);
                buf.pad(4);
            }
            Meter { meter_id } => {
                buf.write(meter_id);
                buf.pad(4);
            }
            Unknown { ref body, .. } => {
                buf.put_slice(body);
            }
        }
    }

    pub fn decode_body<B: Buf>(version: Version, buf: &mut B) -> Result<Self, DecodeError> {
        use self::StatsRequest::*;
        let ty: u16 = buf.get()?;
        let flags: u16 = buf.get()?;
        if version != Version::V1_0 {
            buf.skip(4)?;
        }
        let body = match ty {
            stats_type::DESC => Desc,
            stats_type::TABLE => Table,
            stats_type::GROUP_DESC => GroupDesc,
            stats_type::PORT_DESC => PortDesc,
            stats_type::FLOW => Flow(FlowStatsRequest::decode(version, buf)?),
            stats_type::AGGREGATE => Aggregate(FlowStatsRequest::decode(version, buf)?),
            stats_type::PORT => {
                if version == Version::V1_0 {
                    let port_no: u16 = buf.get()?;
                    buf.skip(6)?;
                    Port {
                        port_no: port::widen_port_no(port_no),
                    }
                } else {
                    let port_no = buf.get()?;
                    buf.skip(4)?;
                    Port { port_no }
                }
            }
            stats_type::QUEUE => {
                if version == Version::V1_0 {
                    let port_no: u16 = buf.get()?;
                    buf.skip(2)?;
                    Queue {
                        port_no: port::widen_port_no(port_no),
                        queue_id: buf.get()?,
                    }
                } else {
                    Queue {
                        port_no: buf.get()?,
                        queue_id: buf.get()?,
                    }
                }
            }
            stats_type::GROUP => {
                let group_id = buf.get()?;
                buf.skip(4)?;
                Group { group_id }
            }
            stats_type::METER => {
                let meter_id = buf.get()?;
                buf.skip(4)?;
                Meter { meter_id }
            }
            _ => {
                let mut body = vec![0; buf.remaining()];
                buf.get_into(&mut body)?;
                Unknown { ty, body }
            }
        };
        Ok(MultipartRequest { flags, body })
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct DescStats {
    pub mfr_desc: String,
    pub hw_desc: String,
    pub sw_desc: String,
    pub serial_num: String,
    pub dp_desc: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FlowStatsEntry {
    pub table_id: u8,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    /// OF1.3 only.
    pub flags: u16,
    pub cookie: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    pub fields: Match,
    pub instructions: Vec<Instruction>,
}

impl FlowStatsEntry {
    fn wire_len(&self, version: Version) -> usize {
        match version {
            Version::V1_0 => {
                let actions: usize = self
                    .instructions
                    .iter()
                    .map(|inst| match *inst {
                        Instruction::ApplyActions(ref a) => actions_wire_len(a, version),
                        _ => 0,
                    })
                    .sum();
                88 + actions
            }
            _ => {
                48 + self.fields.wire_len(version)
                    + instructions_wire_len(&self.instructions, version)
            }
        }
    }

    fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        buf.write(self.wire_len(version) as u16);
        buf.write(self.table_id);
        buf.pad(1);
        match version {
            Version::V1_0 => {
                self.fields.encode(version, buf);
                buf.write(self.duration_sec);
                buf.write(self.duration_nsec);
                buf.write(self.priority);
                buf.write(self.idle_timeout);
                buf.write(self.hard_timeout);
                buf.pad(6);
                buf.write(self.cookie);
                buf.write(self.packet_count);
                buf.write(self.byte_count);
                for inst in &self.instructions {
                    if let Instruction::ApplyActions(ref actions) = *inst {
                        encode_actions(actions, version, buf);
                    }
                }
            }
            _ => {
                buf.write(self.duration_sec);
                buf.write(self.duration_nsec);
                buf.write(self.priority);
                buf.write(self.idle_timeout);
                buf.write(self.hard_timeout);
                if version == Version::V1_3 {
                    buf.write(self.flags);
                    buf.pad(4);
                } else {
                    buf.pad(6);
                }
                buf.write(self.cookie);
                buf.write(self.packet_count);
                buf.write(self.byte_count);
                self.fields.encode(version, buf);
                encode_instructions(&self.instructions, version, buf);
            }
        }
    }

    fn decode<B: Buf>(version: Version, buf: &mut B) -> Result<FlowStatsEntry, DecodeError> {
        let len: u16 = buf.get()?;
        let len = len as usize;
        let table_id = buf.get()?;
        buf.skip(1)?;
        match version {
            Version::V1_0 => {
                if len < 88 {
                    return Err(DecodeError::Truncated);
                }
                let fields = Match::decode(version, buf)?;
                let duration_sec = buf.get()?;
                let duration_nsec = buf.get()?;
                let priority = buf.get()?;
                let idle_timeout = buf.get()?;
                let hard_timeout = buf.get()?;
                buf.skip(6)?;
                let cookie = buf.get()?;
                let packet_count = buf.get()?;
                let byte_count = buf.get()?;
                let actions = decode_actions(version, buf, len - 88)?;
                Ok(FlowStatsEntry {
                    table_id,
                    duration_sec,
                    duration_nsec,
                    priority,
                    idle_timeout,
                    hard_timeout,
                    flags: 0,
                    cookie,
                    packet_count,
                    byte_count,
                    fields,
                    instructions: if actions.is_empty() {
                        Vec::new()
                    } else {
                        vec![Instruction::ApplyActions(actions)]
                    },
                })
            }
            _ => {
                if len < 48 {
                    return Err(DecodeError::Truncated);
                }
                let duration_sec = buf.get()?;
                let duration_nsec = buf.get()?;
                let priority = buf.get()?;
                let idle_timeout = buf.get()?;
                let hard_timeout = buf.get()?;
                let flags = if version == Version::V1_3 {
                    let flags = buf.get()?;
                    buf.skip(4)?;
                    flags
                } else {
                    buf.skip(6)?;
                    0
                };
                let cookie = buf.get()?;
                let packet_count = buf.get()?;
                let byte_count = buf.get()?;
                let before = buf.remaining();
                let fields = Match::decode(version, buf)?;
                let match_len = before - buf.remaining();
                let instructions = decode_instructions(version, buf, len - 48 - match_len)?;
                Ok(FlowStatsEntry {
                    table_id,
                    duration_sec,
                    duration_nsec,
                    priority,
                    idle_timeout,
                    hard_timeout,
                    flags,
                    cookie,
                    packet_count,
                    byte_count,
                    fields,
                    instructions,
                })
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct AggregateStats {
    pub packet_count: u64,
    pub byte_count: u64,
    pub flow_count: u32,
}

/// Per-table counters. The capability fields exist only on the OF1.2 wire;
/// OF1.3 moved them to TABLE_FEATURES and keeps just the counters.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct TableStatsEntry {
    pub table_id: u8,
    pub name: String,
    pub wildcards: u64,
    pub match_fields: u64,
    pub write_actions: u32,
    pub apply_actions: u32,
    pub write_setfields: u64,
    pub apply_setfields: u64,
    pub metadata_match: u64,
    pub metadata_write: u64,
    pub instructions: u32,
    pub config: u32,
    pub max_entries: u32,
    pub active_count: u32,
    pub lookup_count: u64,
    pub matched_count: u64,
}

impl TableStatsEntry {
    fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        buf.write(self.table_id);
        match version {
            Version::V1_0 => {
                buf.pad(3);
                encode_name(buf, &self.name, 32);
                buf.write(self.wildcards as u32);
                buf.write(self.max_entries);
                buf.write(self.active_count);
                buf.write(self.lookup_count);
                buf.write(self.matched_count);
            }
            Version::V1_2 => {
                buf.pad(7);
                encode_name(buf, &self.name, 32);
                buf.write(self.match_fields);
                buf.write(self.wildcards);
                buf.write(self.write_actions);
                buf.write(self.apply_actions);
                buf.write(self.write_setfields);
                buf.write(self.apply_setfields);
                buf.write(self.metadata_match);
                buf.write(self.metadata_write);
                buf.write(self.instructions);
                buf.write(self.config);
                buf.write(self.max_entries);
                buf.write(self.active_count);
                buf.write(self.lookup_count);
                buf.write(self.matched_count);
            }
            Version::V1_3 => {
                buf.pad(3);
                buf.write(self.active_count);
                buf.write(self.lookup_count);
                buf.write(self.matched_count);
            }
        }
    }

    fn decode<B: Buf>(version: Version, buf: &mut B) -> Result<TableStatsEntry, DecodeError> {
        let mut entry = TableStatsEntry::default();
        entry.table_id = buf.get()?;
        match version {
            Version::V1_0 => {
                buf.skip(3)?;
                entry.name = decode_name(buf, 32)?;
                entry.wildcards = u64::from(buf.get::<u32>()?);
                entry.max_entries = buf.get()?;
                entry.active_count = buf.get()?;
                entry.lookup_count = buf.get()?;
                entry.matched_count = buf.get()?;
            }
            Version::V1_2 => {
                buf.skip(7)?;
                entry.name = decode_name(buf, 32)?;
                entry.match_fields = buf.get()?;
                entry.wildcards = buf.get()?;
                entry.write_actions = buf.get()?;
                entry.apply_actions = buf.get()?;
                entry.write_setfields = buf.get()?;
                entry.apply_setfields = buf.get()?;
                entry.metadata_match = buf.get()?;
                entry.metadata_write = buf.get()?;
                entry.instructions = buf.get()?;
                entry.config = buf.get()?;
                entry.max_entries = buf.get()?;
                entry.active_count = buf.get()?;
                entry.lookup_count = buf.get()?;
                entry.matched_count = buf.get()?;
            }
            Version::V1_3 => {
                buf.skip(3)?;
                entry.active_count = buf.get()?;
                entry.lookup_count = buf.get()?;
                entry.matched_count = buf.get()?;
            }
        }
        Ok(entry)
    }

    fn wire_len(version: Version) -> usize {
        match version {
            Version::V1_0 => 64,
            Version::V1_2 => 128,
            Version::V1_3 => 24,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct PortStatsEntry {
    pub port_no: u32,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_frame_err: u64,
    pub rx_over_err: u64,
    pub rx_crc_err: u64,
    pub collisions: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
}

impl PortStatsEntry {
    fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        if version == Version::V1_0 {
            buf.write(port::narrow_port_no(self.port_no));
            buf.pad(6);
        } else {
            buf.write(self.port_no);
            buf.pad(4);
        }
        buf.write(self.rx_packets);
        buf.write(self.tx_packets);
        buf.write(self.rx_bytes);
        buf.write(self.tx_bytes);
        buf.write(self.rx_dropped);
        buf.write(self.tx_dropped);
        buf.write(self.rx_errors);
        buf.write(self.tx_errors);
        buf.write(self.rx_frame_err);
        buf.write(self.rx_over_err);
        buf.write(self.rx_crc_err);
        buf.write(self.collisions);
        if version == Version::V1_3 {
            buf.write(self.duration_sec);
            buf.write(self.duration_nsec);
        }
    }

    fn decode<B: Buf>(version: Version, buf: &mut B) -> Result<PortStatsEntry, DecodeError> {
        let mut entry = PortStatsEntry::default();
        if version == Version::V1_0 {
            let port_no: u16 = buf.get()?;
            buf.skip(6)?;
            entry.port_no = port::widen_port_no(port_no);
        } else {
            entry.port_no = buf.get()?;
            buf.skip(4)?;
        }
        entry.rx_packets = buf.get()?;
        entry.tx_packets = buf.get()?;
        entry.rx_bytes = buf.get()?;
        entry.tx_bytes = buf.get()?;
        entry.rx_dropped = buf.get()?;
        entry.tx_dropped = buf.get()?;
        entry.rx_errors = buf.get()?;
        entry.tx_errors = buf.get()?;
        entry.rx_frame_err = buf.get()?;
        entry.rx_over_err = buf.get()?;
        entry.rx_crc_err = buf.get()?;
        entry.collisions = buf.get()?;
        if version == Version::V1_3 {
            entry.duration_sec = buf.get()?;
            entry.duration_nsec = buf.get()?;
        }
        Ok(entry)
    }

    fn wire_len(version: Version) -> usize {
        match version {
            Version::V1_3 => 112,
            _ => 104,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct QueueStatsEntry {
    pub port_no: u32,
    pub queue_id: u32,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
}

impl QueueStatsEntry {
    fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        if version == Version::V1_0 {
            buf.write(port::narrow_port_no(self.port_no));
            buf.pad(2);
        } else {
            buf.write(self.port_no);
        }
        buf.write(self.queue_id);
        buf.write(self.tx_bytes);
        buf.write(self.tx_packets);
        buf.write(self.tx_errors);
        if version == Version::V1_3 {
            buf.write(self.duration_sec);
            buf.write(self.duration_nsec);
        }
    }

    fn decode<B: Buf>(version: Version, buf: &mut B) -> Result<QueueStatsEntry, DecodeError> {
        let mut entry = QueueStatsEntry::default();
        if version == Version::V1_0 {
            let port_no: u16 = buf.get()?;
            buf.skip(2)?;
            entry.port_no = port::widen_port_no(port_no);
        } else {
            entry.port_no = buf.get()?;
        }
        entry.queue_id = buf.get()?;
        entry.tx_bytes = buf.get()?;
        entry.tx_packets = buf.get()?;
        entry.tx_errors = buf.get()?;
        if version == Version::V1_3 {
            entry.duration_sec = buf.get()?;
            entry.duration_nsec = buf.get()?;
        }
        Ok(entry)
    }

    fn wire_len(version: Version) -> usize {
        match version {
            Version::V1_3 => 40,
            _ => 32,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct BucketCounter {
    pub packet_count: u64,
    pub byte_count: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct GroupStatsEntry {
    pub group_id: u32,
    pub ref_count: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    /// OF1.3 only.
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub bucket_stats: Vec<BucketCounter>,
}

impl GroupStatsEntry {
    fn wire_len(&self, version: Version) -> usize {
        let fixed = if version == Version::V1_3 { 40 } else { 32 };
        fixed + 16 * self.bucket_stats.len()
    }

    fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        buf.write(self.wire_len(version) as u16);
        buf.pad(2);
        buf.write(self.group_id);
        buf.write(self.ref_count);
        buf.pad(4);
        buf.write(self.packet_count);
        buf.write(self.byte_count);
        if version == Version::V1_3 {
            buf.write(self.duration_sec);
            buf.write(self.duration_nsec);
        }
        for counter in &self.bucket_stats {
            buf.write(counter.packet_count);
            buf.write(counter.byte_count);
        }
    }

    fn decode<B: Buf>(version: Version, buf: &mut B) -> Result<GroupStatsEntry, DecodeError> {
        let len: u16 = buf.get()?;
        let len = len as usize;
        buf.skip(2)?;
        let fixed = if version == Version::V1_3 { 40 } else { 32 };
        if len < fixed {
            return Err(DecodeError::Truncated);
        }
        let mut entry = GroupStatsEntry::default();
        entry.group_id = buf.get()?;
        entry.ref_count = buf.get()?;
        buf.skip(4)?;
        entry.packet_count = buf.get()?;
        entry.byte_count = buf.get()?;
        if version == Version::V1_3 {
            entry.duration_sec = buf.get()?;
            entry.duration_nsec = buf.get()?;
        }
        let mut rest = len - fixed;
        while rest >= 16 {
            entry.bucket_stats.push(BucketCounter {
                packet_count: buf.get()?,
                byte_count: buf.get()?,
            });
            rest -= 16;
        }
        Ok(entry)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GroupDescStatsEntry {
    pub group_type: u8,
    pub group_id: u32,
    pub buckets: Vec<Bucket>,
}

impl GroupDescStatsEntry {
    fn wire_len(&self, version: Version) -> usize {
        8 + ::action::buckets_wire_len(&self.buckets, version)
    }

    fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        buf.write(self.wire_len(version) as u16);
        buf.write(self.group_type);
        buf.pad(1);
        buf.write(self.group_id);
        encode_buckets(&self.buckets, version, buf);
    }

    fn decode<B: Buf>(version: Version, buf: &mut B) -> Result<GroupDescStatsEntry, DecodeError> {
        let len: u16 = buf.get()?;
        let len = len as usize;
        if len < 8 {
            return Err(DecodeError::Truncated);
        }
        let group_type = buf.get()?;
        buf.skip(1)?;
        let group_id = buf.get()?;
        let buckets = decode_buckets(version, buf, len - 8)?;
        Ok(GroupDescStatsEntry {
            group_type,
            group_id,
            buckets,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct BandCounter {
    pub packet_band_count: u64,
    pub byte_band_count: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct MeterStatsEntry {
    pub meter_id: u32,
    pub flow_count: u32,
    pub packet_in_count: u64,
    pub byte_in_count: u64,
    pub duration_sec: u32,
    pub duration_nsec: u32,
    pub band_stats: Vec<BandCounter>,
}

impl MeterStatsEntry {
    fn wire_len(&self) -> usize {
        40 + 16 * self.band_stats.len()
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write(self.meter_id);
        buf.write(self.wire_len() as u16);
        buf.pad(6);
        buf.write(self.flow_count);
        buf.write(self.packet_in_count);
        buf.write(self.byte_in_count);
        buf.write(self.duration_sec);
        buf.write(self.duration_nsec);
        for band in &self.band_stats {
            buf.write(band.packet_band_count);
            buf.write(band.byte_band_count);
        }
    }

    fn decode<B: Buf>(buf: &mut B) -> Result<MeterStatsEntry, DecodeError> {
        let mut entry = MeterStatsEntry::default();
        entry.meter_id = buf.get()?;
        let len: u16 = buf.get()?;
        let len = len as usize;
        if len < 40 {
            return Err(DecodeError::Truncated);
        }
        buf.skip(6)?;
        entry.flow_count = buf.get()?;
        entry.packet_in_count = buf.get()?;
        entry.byte_in_count = buf.get()?;
        entry.duration_sec = buf.get()?;
        entry.duration_nsec = buf.get()?;
        let mut rest = len - 40;
        while rest >= 16 {
            entry.band_stats.push(BandCounter {
                packet_band_count: buf.get()?,
                byte_band_count: buf.get()?,
            });
            rest -= 16;
        }
        Ok(entry)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsReply {
    Desc(DescStats),
    Flow(Vec<FlowStatsEntry>),
    Aggregate(AggregateStats),
    Table(Vec<TableStatsEntry>),
    Port(Vec<PortStatsEntry>),
    Queue(Vec<QueueStatsEntry>),
    Group(Vec<GroupStatsEntry>),
    GroupDesc(Vec<GroupDescStatsEntry>),
    Meter(Vec<MeterStatsEntry>),
    PortDesc(Vec<port::Port>),
    Unknown { ty: u16, body: Vec<u8> },
}

impl StatsReply {
    pub fn ty(&self) -> u16 {
        use self::StatsReply::*;
        match *self {
            Desc(_) => stats_type::DESC,
            Flow(_) => stats_type::FLOW,
            Aggregate(_) => stats_type::AGGREGATE,
            Table(_) => stats_type::TABLE,
            Port(_) => stats_type::PORT,
            Queue(_) => stats_type::QUEUE,
            Group(_) => stats_type::GROUP,
            GroupDesc(_) => stats_type::GROUP_DESC,
            Meter(_) => stats_type::METER,
            PortDesc(_) => stats_type::PORT_DESC,
            Unknown { ty, .. } => ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartReply {
    pub flags: u16,
    pub body: StatsReply,
}

impl MultipartReply {
    pub fn new(body: StatsReply) -> Self {
        MultipartReply { flags: 0, body }
    }

    /// More parts of the same reply follow under the same xid.
    pub fn more(&self) -> bool {
        self.flags & FLAG_MORE != 0
    }

    pub fn encode_body(&self, version: Version, buf: &mut BytesMut) {
        use self::StatsReply::*;
        buf.write(self.body.ty());
        buf.write(self.flags);
        if version != Version::V1_0 {
            buf.pad(4);
        }
        match self.body {
            Desc(ref desc) => {
                encode_name(buf, &desc.mfr_desc, 256);
                encode_name(buf, &desc.hw_desc, 256);
                encode_name(buf, &desc.sw_desc, 256);
                encode_name(buf, &desc.serial_num, 32);
                encode_name(buf, &desc.dp_desc, 256);
            }
            Flow(ref entries) => {
                for entry in entries {
                    entry.encode(version, buf);
                }
            }
            Aggregate(ref agg) => {
                buf.write(agg.packet_count);
                buf.write(agg.byte_count);
                buf.write(agg.flow_count);
                buf.pad(4);
            }
            Table(ref entries) => {
                for entry in entries {
                    entry.encode(version, buf);
                }
            }
            Port(ref entries) => {
                for entry in entries {
                    entry.encode(version, buf);
                }
            }
            Queue(ref entries) => {
                for entry in entries {
                    entry.encode(version, buf);
                }
            }
            Group(ref entries) => {
                for entry in entries {
                    entry.encode(version, buf);
                }
            }
            GroupDesc(ref entries) => {
                for entry in entries {
                    entry.encode(version, buf);
                }
            }
            Meter(ref entries) => {
                for entry in entries {
                    entry.encode(buf);
                }
            }
            PortDesc(ref ports) => {
                for p in ports {
                    p.encode(version, buf);
                }
            }
            Unknown { ref body, .. } => {
                buf.put_slice(body);
            }
        }
    }

    pub fn decode_body<B: Buf>(version: Version, buf: &mut B) -> Result<Self, DecodeError> {
        use self::StatsReply::*;
        let ty: u16 = buf.get()?;
        let flags: u16 = buf.get()?;
        if version != Version::V1_0 {
            buf.skip(4)?;
        }
        let body = match ty {
            stats_type::DESC => Desc(DescStats {
                mfr_desc: decode_name(buf, 256)?,
                hw_desc: decode_name(buf, 256)?,
                sw_desc: decode_name(buf, 256)?,
                serial_num: decode_name(buf, 32)?,
                dp_desc: decode_name(buf, 256)?,
            }),
            stats_type::FLOW => {
                let mut entries = Vec::new();
                while buf.remaining() > 0 {
                    entries.push(FlowStatsEntry::decode(version, buf)?);
                }
                Flow(entries)
            }
            stats_type::AGGREGATE => {
                let agg = AggregateStats {
                    packet_count: buf.get()?,
                    byte_count: buf.get()?,
                    flow_count: buf.get()?,
                };
                buf.skip(4)?;
                Aggregate(agg)
            }
            stats_type::TABLE => {
                let each = TableStatsEntry::wire_len(version);
                let mut entries = Vec::new();
                while buf.remaining() >= each {
                    entries.push(TableStatsEntry::decode(version, buf)?);
                }
                Table(entries)
            }
            stats_type::PORT => {
                let each = PortStatsEntry::wire_len(version);
                let mut entries = Vec::new();
                while buf.remaining() >= each {
                    entries.push(PortStatsEntry::decode(version, buf)?);
                }
                Port(entries)
            }
            stats_type::QUEUE => {
                let each = QueueStatsEntry::wire_len(version);
                let mut entries = Vec::new();
                while buf.remaining() >= each {
                    entries.push(QueueStatsEntry::decode(version, buf)?);
                }
                Queue(entries)
            }
            stats_type::GROUP => {
                let mut entries = Vec::new();
                while buf.remaining() > 0 {
                    entries.push(GroupStatsEntry::decode(version, buf)?);
                }
                Group(entries)
            }
            stats_type::GROUP_DESC => {
                let mut entries = Vec::new();
                while buf.remaining() > 0 {
                    entries.push(GroupDescStatsEntry::decode(version, buf)?);
                }
                GroupDesc(entries)
            }
            stats_type::METER => {
                let mut entries = Vec::new();
                while buf.remaining() > 0 {
                    entries.push(MeterStatsEntry::decode(buf)?);
                }
                Meter(entries)
            }
            stats_type::PORT_DESC => PortDesc(::port::decode_ports(version, buf)?),
            _ => {
                let mut body = vec![0; buf.remaining()];
                buf.get_into(&mut body)?;
                Unknown { ty, body }
            }
        };
        Ok(MultipartReply { flags, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use action::Action;
    use msg::Message;
    use Version;

    fn round_trip(version: Version, msg: Message) {
        let envelope = msg.encode(version, 0xab).unwrap();
        assert_eq!(Message::decode(&envelope).unwrap(), msg);
    }

    #[test]
    fn table_stats_request_and_empty_reply() {
        round_trip(
            Version::V1_2,
            Message::MultipartRequest(MultipartRequest::new(StatsRequest::Table)),
        );
        round_trip(
            Version::V1_2,
            Message::MultipartReply(MultipartReply::new(StatsReply::Table(Vec::new()))),
        );
    }

    #[test]
    fn flow_stats_reply_round_trip() {
        let mut fields = Match::new();
        fields.set_in_port(1);
        let entry = FlowStatsEntry {
            table_id: 1,
            duration_sec: 10,
            duration_nsec: 500,
            priority: 100,
            idle_timeout: 60,
            hard_timeout: 0,
            flags: 0,
            cookie: 0xc0de,
            packet_count: 42,
            byte_count: 4200,
            fields,
            instructions: vec![Instruction::ApplyActions(vec![Action::output(2)])],
        };
        for &version in [Version::V1_2, Version::V1_3].iter() {
            round_trip(
                version,
                Message::MultipartReply(MultipartReply::new(StatsReply::Flow(vec![
                    entry.clone(),
                    FlowStatsEntry {
                        table_id: 2,
                        instructions: Vec::new(),
                        ..entry.clone()
                    },
                ]))),
            );
        }
    }

    #[test]
    fn flow_stats_reply_v10_round_trip() {
        let mut fields = Match::new();
        fields.set_in_port(4);
        round_trip(
            Version::V1_0,
            Message::MultipartReply(MultipartReply::new(StatsReply::Flow(vec![
                FlowStatsEntry {
                    table_id: 0,
                    duration_sec: 1,
                    duration_nsec: 2,
                    priority: 3,
                    idle_timeout: 4,
                    hard_timeout: 5,
                    flags: 0,
                    cookie: 6,
                    packet_count: 7,
                    byte_count: 8,
                    fields,
                    instructions: vec![Instruction::ApplyActions(vec![Action::Output {
                        port: 1,
                        max_len: 0,
                    }])],
                },
            ]))),
        );
    }

    /// Packing an array element by element must equal packing the array,
    /// and unpacking restores every element.
    #[test]
    fn group_desc_array_matches_element_concatenation() {
        let stats = vec![
            GroupDescStatsEntry {
                group_type: 0,
                group_id: 0,
                buckets: vec![Bucket {
                    weight: 0,
                    watch_port: 0xc3c3_c4c4,
                    watch_group: 0xd3d3_d4d4,
                    actions: Vec::new(),
                }],
            },
            GroupDescStatsEntry {
                group_type: 0,
                group_id: 0,
                buckets: vec![Bucket {
                    weight: 0,
                    watch_port: 0xc3c3_c4c4,
                    watch_group: 0xd3d3_d4d4,
                    actions: vec![Action::DecMplsTtl],
                }],
            },
            GroupDescStatsEntry {
                group_type: 0,
                group_id: 0,
                buckets: vec![
                    Bucket {
                        weight: 0,
                        watch_port: 0xc3c3_c4c4,
                        watch_group: 0xd3d3_d4d4,
                        actions: vec![Action::DecMplsTtl],
                    },
                    Bucket {
                        weight: 0,
                        watch_port: 0xe3e3_e4e4,
                        watch_group: 0xf3f3_f4f4,
                        actions: vec![Action::Group(0xee)],
                    },
                ],
            },
        ];

        let mut elementwise = Vec::new();
        for entry in &stats {
            let mut one = Vec::new();
            entry.encode(Version::V1_3, &mut one);
            assert_eq!(one.len(), entry.wire_len(Version::V1_3));
            elementwise.extend_from_slice(&one);
        }

        let reply = MultipartReply::new(StatsReply::GroupDesc(stats.clone()));
        let mut body = BytesMut::with_capacity(u16::max_value() as usize);
        reply.encode_body(Version::V1_3, &mut body);
        // skip type/flags/pad prefix
        assert_eq!(&body[8..], &elementwise[..]);

        let mut cur = ::std::io::Cursor::new(&body[..]);
        let back = MultipartReply::decode_body(Version::V1_3, &mut cur).unwrap();
        assert_eq!(back.body, StatsReply::GroupDesc(stats));
    }

    #[test]
    fn port_stats_versions() {
        let entry = PortStatsEntry {
            port_no: 7,
            rx_packets: 1,
            tx_packets: 2,
            rx_bytes: 3,
            tx_bytes: 4,
            duration_sec: 9,
            duration_nsec: 10,
            ..PortStatsEntry::default()
        };
        round_trip(
            Version::V1_3,
            Message::MultipartReply(MultipartReply::new(StatsReply::Port(vec![entry.clone()]))),
        );
        // 1.0 drops the duration fields
        let v10 = Message::MultipartReply(MultipartReply::new(StatsReply::Port(vec![
            PortStatsEntry {
                duration_sec: 0,
                duration_nsec: 0,
                ..entry
            },
        ])));
        round_trip(Version::V1_0, v10);
    }

    #[test]
    fn queue_and_group_stats_round_trip() {
        round_trip(
            Version::V1_3,
            Message::MultipartReply(MultipartReply::new(StatsReply::Queue(vec![
                QueueStatsEntry {
                    port_no: 1,
                    queue_id: 2,
                    tx_bytes: 3,
                    tx_packets: 4,
                    tx_errors: 5,
                    duration_sec: 6,
                    duration_nsec: 7,
                },
            ]))),
        );
        round_trip(
            Version::V1_3,
            Message::MultipartReply(MultipartReply::new(StatsReply::Group(vec![
                GroupStatsEntry {
                    group_id: 1,
                    ref_count: 2,
                    packet_count: 3,
                    byte_count: 4,
                    duration_sec: 5,
                    duration_nsec: 6,
                    bucket_stats: vec![BucketCounter {
                        packet_count: 7,
                        byte_count: 8,
                    }],
                },
            ]))),
        );
    }

    #[test]
    fn meter_stats_round_trip() {
        round_trip(
            Version::V1_3,
            Message::MultipartReply(MultipartReply::new(StatsReply::Meter(vec![
                MeterStatsEntry {
                    meter_id: 1,
                    flow_count: 2,
                    packet_in_count: 3,
                    byte_in_count: 4,
                    duration_sec: 5,
                    duration_nsec: 6,
                    band_stats: vec![BandCounter {
                        packet_band_count: 7,
                        byte_band_count: 8,
                    }],
                },
            ]))),
        );
    }

    #[test]
    fn desc_and_aggregate_round_trip() {
        round_trip(
            Version::V1_0,
            Message::MultipartReply(MultipartReply::new(StatsReply::Desc(DescStats {
                mfr_desc: "acme".into(),
                hw_desc: "switch".into(),
                sw_desc: "fw-1.2".into(),
                serial_num: "0001".into(),
                dp_desc: "lab".into(),
            }))),
        );
        round_trip(
            Version::V1_3,
            Message::MultipartReply(MultipartReply::new(StatsReply::Aggregate(
                AggregateStats {
                    packet_count: 1,
                    byte_count: 2,
                    flow_count: 3,
                },
            ))),
        );
    }

    #[test]
    fn flow_stats_request_round_trip() {
        let mut fields = Match::new();
        fields.set_eth_type(0x0800);
        for &version in [Version::V1_0, Version::V1_2, Version::V1_3].iter() {
            let req = if version == Version::V1_0 {
                FlowStatsRequest {
                    out_group: ::msg::GROUP_ANY,
                    cookie: 0,
                    cookie_mask: 0,
                    fields: fields.clone(),
                    ..FlowStatsRequest::default()
                }
            } else {
                FlowStatsRequest {
                    cookie: 0xaa,
                    cookie_mask: 0xff,
                    fields: fields.clone(),
                    ..FlowStatsRequest::default()
                }
            };
            round_trip(
                version,
                Message::MultipartRequest(MultipartRequest::new(StatsRequest::Flow(req))),
            );
        }
    }

    #[test]
    fn port_desc_round_trip() {
        let p = port::Port {
            port_no: 1,
            hw_addr: [1, 1, 1, 1, 1, 1],
            name: "p1".into(),
            config: 0,
            state: 0,
            curr: 0,
            advertised: 0,
            supported: 0,
            peer: 0,
            curr_speed: 1000,
            max_speed: 10000,
        };
        round_trip(
            Version::V1_3,
            Message::MultipartReply(MultipartReply::new(StatsReply::PortDesc(vec![p]))),
        );
    }

    #[test]
    fn more_flag() {
        let reply = MultipartReply {
            flags: FLAG_MORE,
            body: StatsReply::Table(Vec::new()),
        };
        assert!(reply.more());
        assert!(!MultipartReply::new(StatsReply::Table(Vec::new())).more());
    }

    #[test]
    fn unknown_stats_type_preserved() {
        let reply = MultipartReply {
            flags: 0,
            body: StatsReply::Unknown {
                ty: 12, // TABLE_FEATURES, not interpreted
                body: vec![1, 2, 3, 4],
            },
        };
        round_trip(Version::V1_3, Message::MultipartReply(reply));
    }
}
