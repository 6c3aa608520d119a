//! The fixed OpenFlow header, message-type numbering, and length-field
//! framing. Bodies stay opaque here; `msg` turns envelopes into typed
//! messages.

use bytes::{BufMut, Bytes, BytesMut};

use coding::{BufExt, BufMutExt, Codec, Result as CodingResult};
use {Version, HEADER_LEN};

/// The 8-byte header that starts every OpenFlow message.
///
/// `version` and `ty` are kept raw: a HELLO may legitimately carry a version
/// we do not speak, and dispatch decides what an unknown type means.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    pub ty: u8,
    pub length: u16,
    pub xid: u32,
}

impl Codec for Header {
    fn decode<B: ::bytes::Buf>(buf: &mut B) -> CodingResult<Header> {
        Ok(Header {
            version: buf.get()?,
            ty: buf.get()?,
            length: buf.get()?,
            xid: buf.get()?,
        })
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.write(self.version);
        buf.write(self.ty);
        buf.write(self.length);
        buf.write(self.xid);
    }
}

/// One complete message off the wire: parsed header plus opaque body bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub header: Header,
    pub body: Bytes,
}

impl Envelope {
    pub fn version(&self) -> Option<Version> {
        Version::from_wire(self.header.version)
    }

    pub fn kind(&self) -> Option<MsgKind> {
        Version::from_wire(self.header.version).and_then(|v| MsgKind::from_wire(v, self.header.ty))
    }

    /// Serialize header + body into a single frame.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

/// Semantic message types, independent of the per-version numbering.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MsgKind {
    Hello,
    Error,
    EchoRequest,
    EchoReply,
    Experimenter,
    FeaturesRequest,
    FeaturesReply,
    GetConfigRequest,
    GetConfigReply,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    MultipartRequest,
    MultipartReply,
    BarrierRequest,
    BarrierReply,
    RoleRequest,
    RoleReply,
    GetAsyncRequest,
    GetAsyncReply,
    SetAsync,
    MeterMod,
}

impl MsgKind {
    /// The first fourteen type codes are identical across all three versions;
    /// beyond FLOW_MOD the numbering diverges.
    pub fn from_wire(version: Version, ty: u8) -> Option<MsgKind> {
        use self::MsgKind::*;
        match ty {
            0 => return Some(Hello),
            1 => return Some(Error),
            2 => return Some(EchoRequest),
            3 => return Some(EchoReply),
            4 => return Some(Experimenter),
            5 => return Some(FeaturesRequest),
            6 => return Some(FeaturesReply),
            7 => return Some(GetConfigRequest),
            8 => return Some(GetConfigReply),
            9 => return Some(SetConfig),
            10 => return Some(PacketIn),
            11 => return Some(FlowRemoved),
            12 => return Some(PortStatus),
            13 => return Some(PacketOut),
            14 => return Some(FlowMod),
            _ => {}
        }
        match version {
            Version::V1_0 => match ty {
                15 => Some(PortMod),
                16 => Some(MultipartRequest), // OFPT_STATS_REQUEST
                17 => Some(MultipartReply),   // OFPT_STATS_REPLY
                18 => Some(BarrierRequest),
                19 => Some(BarrierReply),
                _ => None,
            },
            Version::V1_2 | Version::V1_3 => match ty {
                15 => Some(GroupMod),
                16 => Some(PortMod),
                17 => Some(TableMod),
                18 => Some(MultipartRequest),
                19 => Some(MultipartReply),
                20 => Some(BarrierRequest),
                21 => Some(BarrierReply),
                24 => Some(RoleRequest),
                25 => Some(RoleReply),
                26 if version == Version::V1_3 => Some(GetAsyncRequest),
                27 if version == Version::V1_3 => Some(GetAsyncReply),
                28 if version == Version::V1_3 => Some(SetAsync),
                29 if version == Version::V1_3 => Some(MeterMod),
                _ => None,
            },
        }
    }

    /// `None` when the message type does not exist in `version`.
    pub fn to_wire(self, version: Version) -> Option<u8> {
        use self::MsgKind::*;
        let common = match self {
            Hello => Some(0),
            Error => Some(1),
            EchoRequest => Some(2),
            EchoReply => Some(3),
            Experimenter => Some(4),
            FeaturesRequest => Some(5),
            FeaturesReply => Some(6),
            GetConfigRequest => Some(7),
            GetConfigReply => Some(8),
            SetConfig => Some(9),
            PacketIn => Some(10),
            FlowRemoved => Some(11),
            PortStatus => Some(12),
            PacketOut => Some(13),
            FlowMod => Some(14),
            _ => None,
        };
        if common.is_some() {
            return common;
        }
        match version {
            Version::V1_0 => match self {
                PortMod => Some(15),
                MultipartRequest => Some(16),
                MultipartReply => Some(17),
                BarrierRequest => Some(18),
                BarrierReply => Some(19),
                _ => None,
            },
            Version::V1_2 | Version::V1_3 => match self {
                GroupMod => Some(15),
                PortMod => Some(16),
                TableMod => Some(17),
                MultipartRequest => Some(18),
                MultipartReply => Some(19),
                BarrierRequest => Some(20),
                BarrierReply => Some(21),
                RoleRequest => Some(24),
                RoleReply => Some(25),
                GetAsyncRequest if version == Version::V1_3 => Some(26),
                GetAsyncReply if version == Version::V1_3 => Some(27),
                SetAsync if version == Version::V1_3 => Some(28),
                MeterMod if version == Version::V1_3 => Some(29),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Fail)]
pub enum FramingError {
    /// The header's length field cannot even cover the header itself.
    #[fail(display = "frame declares impossible length {}", length)]
    MalformedLength { length: u16 },
    /// The declared length exceeds the configured cap.
    #[fail(display = "frame of {} bytes exceeds cap of {}", length, cap)]
    Oversize { length: usize, cap: usize },
}

/// Accumulates a byte stream and cuts it into envelopes on the header's
/// length field. Errors are fatal for the stream; the owner must discard the
/// framer together with the socket.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    cap: usize,
}

impl Framer {
    pub fn new(cap: usize) -> Self {
        Framer {
            buf: BytesMut::new(),
            cap,
        }
    }

    pub fn input(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete message, if the buffer holds one.
    pub fn next(&mut self) -> Result<Option<Envelope>, FramingError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = {
            let mut cur = ::std::io::Cursor::new(&self.buf[..HEADER_LEN]);
            Header::decode(&mut cur).expect("header slice is exactly 8 bytes")
        };
        let length = header.length as usize;
        if length < HEADER_LEN {
            return Err(FramingError::MalformedLength {
                length: header.length,
            });
        }
        if length > self.cap {
            return Err(FramingError::Oversize {
                length,
                cap: self.cap,
            });
        }
        if self.buf.len() < length {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let body = self.buf.split_to(length - HEADER_LEN).freeze();
        Ok(Some(Envelope { header, body }))
    }

    /// Bytes buffered but not yet cut into a message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = Header {
            version: 0x04,
            ty: 0,
            length: 16,
            xid: 0xdead_beef,
        };
        let mut buf = Vec::new();
        h.encode(&mut buf);
        assert_eq!(buf, hex!("04000010deadbeef"));
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        assert_eq!(Header::decode(&mut cur).unwrap(), h);
    }

    #[test]
    fn kind_numbering_diverges_after_flow_mod() {
        assert_eq!(
            MsgKind::from_wire(Version::V1_0, 16),
            Some(MsgKind::MultipartRequest)
        );
        assert_eq!(
            MsgKind::from_wire(Version::V1_3, 16),
            Some(MsgKind::PortMod)
        );
        assert_eq!(MsgKind::BarrierRequest.to_wire(Version::V1_0), Some(18));
        assert_eq!(MsgKind::BarrierRequest.to_wire(Version::V1_3), Some(20));
        assert_eq!(MsgKind::GroupMod.to_wire(Version::V1_0), None);
        assert_eq!(MsgKind::MeterMod.to_wire(Version::V1_2), None);
    }

    #[test]
    fn framer_reassembles_split_delivery() {
        let frame = hex!("0402000c00000001aabbccdd");
        let mut framer = Framer::new(1 << 16);
        for &b in frame.iter() {
            framer.input(&[b]);
        }
        let env = framer.next().unwrap().unwrap();
        assert_eq!(env.header.ty, 2);
        assert_eq!(env.header.xid, 1);
        assert_eq!(&env.body[..], &hex!("aabbccdd")[..]);
        assert_eq!(framer.next().unwrap(), None);
    }

    #[test]
    fn framer_pipelined_frames() {
        let mut framer = Framer::new(1 << 16);
        framer.input(&hex!("0402000800000001"));
        framer.input(&hex!("040300080000000104020008"));
        assert!(framer.next().unwrap().is_some());
        assert!(framer.next().unwrap().is_some());
        // Third frame is still incomplete.
        assert_eq!(framer.next().unwrap(), None);
        framer.input(&hex!("00000002"));
        assert!(framer.next().unwrap().is_some());
    }

    #[test]
    fn framer_rejects_short_length() {
        let mut framer = Framer::new(1 << 16);
        framer.input(&hex!("0402000700000001"));
        assert_matches!(
            framer.next(),
            Err(FramingError::MalformedLength { length: 7 })
        );
    }

    #[test]
    fn framer_rejects_oversize() {
        let mut framer = Framer::new(64);
        framer.input(&hex!("0402010000000001"));
        assert_matches!(framer.next(), Err(FramingError::Oversize { .. }));
    }
}
