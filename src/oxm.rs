//! OXM (OpenFlow eXtensible Match) TLVs and the version-tagged `Match`.
//!
//! A `Match` keeps its TLVs sorted by `(class, field)` at all times, so two
//! logically equal matches serialize to identical bytes no matter the
//! insertion order. Unknown classes and fields are carried opaquely so a
//! proxy re-encodes them losslessly.

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut};

use coding::{pad_to_8, BufExt, BufMutExt, Result as CodingResult, UnexpectedEnd};
use Version;

pub const CLASS_OPENFLOW_BASIC: u16 = 0x8000;
pub const CLASS_EXPERIMENTER: u16 = 0xffff;

/// OFPXMT_OFB_* field numbers within the OPENFLOW_BASIC class.
pub mod field {
    pub const IN_PORT: u8 = 0;
    pub const IN_PHY_PORT: u8 = 1;
    pub const METADATA: u8 = 2;
    pub const ETH_DST: u8 = 3;
    pub const ETH_SRC: u8 = 4;
    pub const ETH_TYPE: u8 = 5;
    pub const VLAN_VID: u8 = 6;
    pub const VLAN_PCP: u8 = 7;
    pub const IP_DSCP: u8 = 8;
    pub const IP_ECN: u8 = 9;
    pub const IP_PROTO: u8 = 10;
    pub const IPV4_SRC: u8 = 11;
    pub const IPV4_DST: u8 = 12;
    pub const TCP_SRC: u8 = 13;
    pub const TCP_DST: u8 = 14;
    pub const UDP_SRC: u8 = 15;
    pub const UDP_DST: u8 = 16;
    pub const SCTP_SRC: u8 = 17;
    pub const SCTP_DST: u8 = 18;
    pub const ICMPV4_TYPE: u8 = 19;
    pub const ICMPV4_CODE: u8 = 20;
    pub const ARP_OP: u8 = 21;
    pub const ARP_SPA: u8 = 22;
    pub const ARP_TPA: u8 = 23;
    pub const ARP_SHA: u8 = 24;
    pub const ARP_THA: u8 = 25;
    pub const IPV6_SRC: u8 = 26;
    pub const IPV6_DST: u8 = 27;
    pub const IPV6_FLABEL: u8 = 28;
    pub const ICMPV6_TYPE: u8 = 29;
    pub const ICMPV6_CODE: u8 = 30;
    pub const IPV6_ND_TARGET: u8 = 31;
    pub const IPV6_ND_SLL: u8 = 32;
    pub const IPV6_ND_TLL: u8 = 33;
    pub const MPLS_LABEL: u8 = 34;
    pub const MPLS_TC: u8 = 35;
    pub const MPLS_BOS: u8 = 36;
    pub const PBB_ISID: u8 = 37;
    pub const TUNNEL_ID: u8 = 38;
    pub const IPV6_EXTHDR: u8 = 39;
    /// Highest OPENFLOW_BASIC field number this library interprets.
    pub const MAX_KNOWN: u8 = IPV6_EXTHDR;
}

/// Set in the OXM vlan_vid value when a tag is present (OFPVID_PRESENT).
pub const VID_PRESENT: u16 = 0x1000;

/// Marks an untagged 1.0 dl_vlan field (OFP_VLAN_NONE).
const V10_VLAN_NONE: u16 = 0xffff;

/// One match TLV. `mask`, when present, has the same width as `value`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OxmTlv {
    pub class: u16,
    pub field: u8,
    pub value: Vec<u8>,
    pub mask: Option<Vec<u8>>,
}

impl OxmTlv {
    pub fn basic(field: u8, value: Vec<u8>) -> Self {
        OxmTlv {
            class: CLASS_OPENFLOW_BASIC,
            field,
            value,
            mask: None,
        }
    }

    fn key(&self) -> (u16, u8) {
        (self.class, self.field)
    }

    fn payload_len(&self) -> usize {
        self.value.len() + self.mask.as_ref().map_or(0, |m| m.len())
    }

    pub fn wire_len(&self) -> usize {
        4 + self.payload_len()
    }

    pub fn is_known(&self) -> bool {
        self.class == CLASS_OPENFLOW_BASIC && self.field <= field::MAX_KNOWN
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let header: u32 = (u32::from(self.class) << 16)
            | (u32::from(self.field) << 9)
            | if self.mask.is_some() { 1 << 8 } else { 0 }
            | self.payload_len() as u32;
        buf.write(header);
        buf.put_slice(&self.value);
        if let Some(ref mask) = self.mask {
            buf.put_slice(mask);
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> CodingResult<OxmTlv> {
        let header: u32 = buf.get()?;
        let class = (header >> 16) as u16;
        let field = ((header >> 9) & 0x7f) as u8;
        let hasmask = header & (1 << 8) != 0;
        let len = (header & 0xff) as usize;
        if hasmask && len % 2 != 0 {
            return Err(UnexpectedEnd);
        }
        let value_len = if hasmask { len / 2 } else { len };
        let mut value = vec![0; value_len];
        buf.get_into(&mut value)?;
        let mask = if hasmask {
            let mut m = vec![0; len - value_len];
            buf.get_into(&mut m)?;
            Some(m)
        } else {
            None
        };
        Ok(OxmTlv {
            class,
            field,
            value,
            mask,
        })
    }
}

/// A set of OXM TLVs with canonical ordering. Also the in-memory form of the
/// OF1.0 fixed match, which converts to and from TLVs on encode/decode.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Match {
    tlvs: Vec<OxmTlv>,
}

impl Match {
    pub fn new() -> Self {
        Match { tlvs: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.tlvs.is_empty()
    }

    pub fn tlvs(&self) -> &[OxmTlv] {
        &self.tlvs
    }

    /// Insert or replace; the list stays sorted by `(class, field)`.
    pub fn insert(&mut self, tlv: OxmTlv) {
        match self.tlvs.binary_search_by_key(&tlv.key(), OxmTlv::key) {
            Ok(i) => self.tlvs[i] = tlv,
            Err(i) => self.tlvs.insert(i, tlv),
        }
    }

    pub fn get(&self, class: u16, field: u8) -> Option<&OxmTlv> {
        self.tlvs
            .binary_search_by_key(&(class, field), OxmTlv::key)
            .ok()
            .map(|i| &self.tlvs[i])
    }

    /// Whether the match carries TLVs this library does not interpret.
    pub fn has_unknown(&self) -> bool {
        self.tlvs.iter().any(|t| !t.is_known())
    }

    fn get_basic(&self, field: u8) -> Option<&OxmTlv> {
        self.get(CLASS_OPENFLOW_BASIC, field)
    }

    pub fn set_in_port(&mut self, port: u32) {
        self.insert(OxmTlv::basic(field::IN_PORT, port.to_be_bytes().to_vec()));
    }

    pub fn in_port(&self) -> Option<u32> {
        self.get_basic(field::IN_PORT).map(|t| be32(&t.value))
    }

    pub fn set_eth_dst(&mut self, addr: [u8; 6]) {
        self.insert(OxmTlv::basic(field::ETH_DST, addr.to_vec()));
    }

    pub fn eth_dst(&self) -> Option<[u8; 6]> {
        self.get_basic(field::ETH_DST).map(|t| mac(&t.value))
    }

    pub fn set_eth_src(&mut self, addr: [u8; 6]) {
        self.insert(OxmTlv::basic(field::ETH_SRC, addr.to_vec()));
    }

    pub fn eth_src(&self) -> Option<[u8; 6]> {
        self.get_basic(field::ETH_SRC).map(|t| mac(&t.value))
    }

    pub fn set_eth_type(&mut self, ethertype: u16) {
        self.insert(OxmTlv::basic(
            field::ETH_TYPE,
            ethertype.to_be_bytes().to_vec(),
        ));
    }

    pub fn eth_type(&self) -> Option<u16> {
        self.get_basic(field::ETH_TYPE).map(|t| be16(&t.value))
    }

    /// `vid` is the raw 12-bit id; the PRESENT bit is added here.
    pub fn set_vlan_vid(&mut self, vid: u16) {
        self.insert(OxmTlv::basic(
            field::VLAN_VID,
            (vid | VID_PRESENT).to_be_bytes().to_vec(),
        ));
    }

    pub fn vlan_vid(&self) -> Option<u16> {
        self.get_basic(field::VLAN_VID)
            .map(|t| be16(&t.value) & !VID_PRESENT)
    }

    pub fn set_vlan_pcp(&mut self, pcp: u8) {
        self.insert(OxmTlv::basic(field::VLAN_PCP, vec![pcp]));
    }

    pub fn set_ip_proto(&mut self, proto: u8) {
        self.insert(OxmTlv::basic(field::IP_PROTO, vec![proto]));
    }

    pub fn ip_proto(&self) -> Option<u8> {
        self.get_basic(field::IP_PROTO).map(|t| t.value[0])
    }

    pub fn set_ip_dscp(&mut self, dscp: u8) {
        self.insert(OxmTlv::basic(field::IP_DSCP, vec![dscp & 0x3f]));
    }

    pub fn set_ipv4_src(&mut self, addr: [u8; 4], mask: Option<[u8; 4]>) {
        self.insert(OxmTlv {
            class: CLASS_OPENFLOW_BASIC,
            field: field::IPV4_SRC,
            value: addr.to_vec(),
            mask: mask.map(|m| m.to_vec()),
        });
    }

    pub fn set_ipv4_dst(&mut self, addr: [u8; 4], mask: Option<[u8; 4]>) {
        self.insert(OxmTlv {
            class: CLASS_OPENFLOW_BASIC,
            field: field::IPV4_DST,
            value: addr.to_vec(),
            mask: mask.map(|m| m.to_vec()),
        });
    }

    pub fn set_tcp_src(&mut self, port: u16) {
        self.insert(OxmTlv::basic(field::TCP_SRC, port.to_be_bytes().to_vec()));
    }

    pub fn set_tcp_dst(&mut self, port: u16) {
        self.insert(OxmTlv::basic(field::TCP_DST, port.to_be_bytes().to_vec()));
    }

    pub fn set_metadata(&mut self, metadata: u64, mask: Option<u64>) {
        self.insert(OxmTlv {
            class: CLASS_OPENFLOW_BASIC,
            field: field::METADATA,
            value: metadata.to_be_bytes().to_vec(),
            mask: mask.map(|m| m.to_be_bytes().to_vec()),
        });
    }

    pub fn set_arp_op(&mut self, op: u16) {
        self.insert(OxmTlv::basic(field::ARP_OP, op.to_be_bytes().to_vec()));
    }

    pub fn set_tunnel_id(&mut self, id: u64) {
        self.insert(OxmTlv::basic(field::TUNNEL_ID, id.to_be_bytes().to_vec()));
    }

    /// Wire length of the OXM form including the 4-byte match header but
    /// excluding trailing pad.
    fn oxm_len(&self) -> usize {
        4 + self.tlvs.iter().map(OxmTlv::wire_len).sum::<usize>()
    }

    /// Wire length in `version`, pad included.
    pub fn wire_len(&self, version: Version) -> usize {
        match version {
            Version::V1_0 => 40,
            _ => {
                let len = self.oxm_len();
                len + pad_to_8(len)
            }
        }
    }

    pub fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        match version {
            Version::V1_0 => self.encode_v10(buf),
            _ => {
                let len = self.oxm_len();
                buf.write(1u16); // OFPMT_OXM
                buf.write(len as u16);
                for tlv in &self.tlvs {
                    tlv.encode(buf);
                }
                buf.pad(pad_to_8(len));
            }
        }
    }

    pub fn decode<B: Buf>(version: Version, buf: &mut B) -> CodingResult<Match> {
        match version {
            Version::V1_0 => Self::decode_v10(buf),
            _ => {
                let ty: u16 = buf.get()?;
                let len: u16 = buf.get()?;
                if ty != 1 || (len as usize) < 4 {
                    return Err(UnexpectedEnd);
                }
                let mut remaining = len as usize - 4;
                let mut m = Match::new();
                while remaining > 0 {
                    let tlv = OxmTlv::decode(buf)?;
                    if tlv.wire_len() > remaining {
                        return Err(UnexpectedEnd);
                    }
                    remaining -= tlv.wire_len();
                    m.insert(tlv);
                }
                buf.skip(pad_to_8(len as usize))?;
                Ok(m)
            }
        }
    }

    /// The fixed 40-byte OF1.0 match. Fields with no 1.0 representation are
    /// omitted; IPv4 masks are reduced to their prefix length.
    fn encode_v10<B: BufMut>(&self, buf: &mut B) {
        const FW_IN_PORT: u32 = 1 << 0;
        const FW_DL_VLAN: u32 = 1 << 1;
        const FW_DL_SRC: u32 = 1 << 2;
        const FW_DL_DST: u32 = 1 << 3;
        const FW_DL_TYPE: u32 = 1 << 4;
        const FW_NW_PROTO: u32 = 1 << 5;
        const FW_TP_SRC: u32 = 1 << 6;
        const FW_TP_DST: u32 = 1 << 7;
        const FW_DL_VLAN_PCP: u32 = 1 << 20;
        const FW_NW_TOS: u32 = 1 << 21;
        const FW_ALL: u32 = 0x003f_ffff;

        let mut wildcards = FW_ALL;
        let mut clear = |bit: u32| wildcards &= !bit;

        let in_port = self.in_port().map(|p| {
            clear(FW_IN_PORT);
            p as u16
        });
        let eth_src = self.eth_src().map(|a| {
            clear(FW_DL_SRC);
            a
        });
        let eth_dst = self.eth_dst().map(|a| {
            clear(FW_DL_DST);
            a
        });
        let vlan = self.vlan_vid().map(|v| {
            clear(FW_DL_VLAN);
            v
        });
        let pcp = self.get_basic(field::VLAN_PCP).map(|t| {
            clear(FW_DL_VLAN_PCP);
            t.value[0]
        });
        let eth_type = self.eth_type().map(|t| {
            clear(FW_DL_TYPE);
            t
        });
        let tos = self.get_basic(field::IP_DSCP).map(|t| {
            clear(FW_NW_TOS);
            t.value[0] << 2
        });
        let proto = self.ip_proto().map(|p| {
            clear(FW_NW_PROTO);
            p
        });
        let tp_src = self
            .get_basic(field::TCP_SRC)
            .or_else(|| self.get_basic(field::UDP_SRC))
            .map(|t| {
                clear(FW_TP_SRC);
                be16(&t.value)
            });
        let tp_dst = self
            .get_basic(field::TCP_DST)
            .or_else(|| self.get_basic(field::UDP_DST))
            .map(|t| {
                clear(FW_TP_DST);
                be16(&t.value)
            });
        drop(clear);

        let (nw_src, src_wild) = v10_nw(self.get_basic(field::IPV4_SRC));
        let (nw_dst, dst_wild) = v10_nw(self.get_basic(field::IPV4_DST));
        wildcards = (wildcards & !(0x3f << 8)) | (src_wild << 8);
        wildcards = (wildcards & !(0x3f << 14)) | (dst_wild << 14);

        buf.write(wildcards);
        buf.write(in_port.unwrap_or(0));
        buf.put_slice(&eth_src.unwrap_or([0; 6]));
        buf.put_slice(&eth_dst.unwrap_or([0; 6]));
        buf.write(vlan.unwrap_or(V10_VLAN_NONE));
        buf.write(pcp.unwrap_or(0));
        buf.pad(1);
        buf.write(eth_type.unwrap_or(0));
        buf.write(tos.unwrap_or(0));
        buf.write(proto.unwrap_or(0));
        buf.pad(2);
        buf.write(nw_src);
        buf.write(nw_dst);
        buf.write(tp_src.unwrap_or(0));
        buf.write(tp_dst.unwrap_or(0));
    }

    fn decode_v10<B: Buf>(buf: &mut B) -> CodingResult<Match> {
        const FW_IN_PORT: u32 = 1 << 0;
        const FW_DL_VLAN: u32 = 1 << 1;
        const FW_DL_SRC: u32 = 1 << 2;
        const FW_DL_DST: u32 = 1 << 3;
        const FW_DL_TYPE: u32 = 1 << 4;
        const FW_NW_PROTO: u32 = 1 << 5;
        const FW_TP_SRC: u32 = 1 << 6;
        const FW_TP_DST: u32 = 1 << 7;
        const FW_DL_VLAN_PCP: u32 = 1 << 20;
        const FW_NW_TOS: u32 = 1 << 21;

        let wildcards: u32 = buf.get()?;
        let in_port: u16 = buf.get()?;
        let mut eth_src = [0; 6];
        buf.get_into(&mut eth_src)?;
        let mut eth_dst = [0; 6];
        buf.get_into(&mut eth_dst)?;
        let vlan: u16 = buf.get()?;
        let pcp: u8 = buf.get()?;
        buf.skip(1)?;
        let eth_type: u16 = buf.get()?;
        let tos: u8 = buf.get()?;
        let proto: u8 = buf.get()?;
        buf.skip(2)?;
        let nw_src: u32 = buf.get()?;
        let nw_dst: u32 = buf.get()?;
        let tp_src: u16 = buf.get()?;
        let tp_dst: u16 = buf.get()?;

        let mut m = Match::new();
        if wildcards & FW_IN_PORT == 0 {
            m.set_in_port(u32::from(in_port));
        }
        if wildcards & FW_DL_SRC == 0 {
            m.set_eth_src(eth_src);
        }
        if wildcards & FW_DL_DST == 0 {
            m.set_eth_dst(eth_dst);
        }
        if wildcards & FW_DL_VLAN == 0 && vlan != V10_VLAN_NONE {
            m.set_vlan_vid(vlan);
        }
        if wildcards & FW_DL_VLAN_PCP == 0 {
            m.set_vlan_pcp(pcp);
        }
        if wildcards & FW_DL_TYPE == 0 {
            m.set_eth_type(eth_type);
        }
        if wildcards & FW_NW_TOS == 0 {
            m.set_ip_dscp(tos >> 2);
        }
        if wildcards & FW_NW_PROTO == 0 {
            m.set_ip_proto(proto);
        }
        let src_wild = (wildcards >> 8) & 0x3f;
        if src_wild < 32 {
            m.set_ipv4_src(nw_src.to_be_bytes(), prefix_mask(32 - src_wild));
        }
        let dst_wild = (wildcards >> 14) & 0x3f;
        if dst_wild < 32 {
            m.set_ipv4_dst(nw_dst.to_be_bytes(), prefix_mask(32 - dst_wild));
        }
        if wildcards & FW_TP_SRC == 0 {
            m.set_tcp_src(tp_src);
        }
        if wildcards & FW_TP_DST == 0 {
            m.set_tcp_dst(tp_dst);
        }
        Ok(m)
    }

    /// Canonical byte form used as a map key: the sorted OXM encoding,
    /// version-independent.
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.oxm_len());
        for tlv in &self.tlvs {
            tlv.encode(&mut buf);
        }
        buf
    }
}

fn be16(v: &[u8]) -> u16 {
    BigEndian::read_u16(v)
}

fn be32(v: &[u8]) -> u32 {
    BigEndian::read_u32(v)
}

fn mac(v: &[u8]) -> [u8; 6] {
    let mut out = [0; 6];
    out.copy_from_slice(&v[..6]);
    out
}

/// `(address word, wildcarded-low-bit count)` for the 1.0 nw_src/nw_dst
/// encoding. Non-prefix masks collapse to their longest prefix.
fn v10_nw(tlv: Option<&OxmTlv>) -> (u32, u32) {
    match tlv {
        None => (0, 63),
        Some(t) => {
            let addr = be32(&t.value);
            let mask_bits = match t.mask {
                None => 32,
                Some(ref m) => (!be32(m)).leading_zeros(),
            };
            (addr, 32 - mask_bits)
        }
    }
}

fn prefix_mask(bits: u32) -> Option<[u8; 4]> {
    if bits >= 32 {
        None
    } else {
        Some((!0u32 << (32 - bits)).to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_insertion_independent() {
        let mut a = Match::new();
        a.set_eth_type(0x0800);
        a.set_in_port(7);
        a.set_ipv4_dst([10, 0, 0, 1], None);

        let mut b = Match::new();
        b.set_ipv4_dst([10, 0, 0, 1], None);
        b.set_eth_type(0x0800);
        b.set_in_port(7);

        assert_eq!(a, b);
        let mut ba = Vec::new();
        let mut bb = Vec::new();
        a.encode(Version::V1_3, &mut ba);
        b.encode(Version::V1_3, &mut bb);
        assert_eq!(ba, bb);
    }

    #[test]
    fn oxm_round_trip() {
        let mut m = Match::new();
        m.set_in_port(1);
        m.set_eth_dst([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        m.set_eth_type(0x0800);
        m.set_ipv4_src([192, 168, 0, 0], Some([255, 255, 255, 0]));
        m.set_ip_proto(6);
        m.set_tcp_dst(80);

        let mut buf = Vec::new();
        m.encode(Version::V1_3, &mut buf);
        assert_eq!(buf.len(), m.wire_len(Version::V1_3));
        assert_eq!(buf.len() % 8, 0);

        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = Match::decode(Version::V1_3, &mut cur).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn empty_oxm_match_is_header_and_pad() {
        let m = Match::new();
        let mut buf = Vec::new();
        m.encode(Version::V1_3, &mut buf);
        // type=1, length=4, 4 bytes pad
        assert_eq!(buf, hex!("0001000400000000"));
    }

    #[test]
    fn v10_fixed_round_trip() {
        let mut m = Match::new();
        m.set_in_port(3);
        m.set_eth_src([1, 2, 3, 4, 5, 6]);
        m.set_eth_type(0x0800);
        m.set_ipv4_dst([10, 0, 0, 0], Some([255, 0, 0, 0]));

        let mut buf = Vec::new();
        m.encode(Version::V1_0, &mut buf);
        assert_eq!(buf.len(), 40);

        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = Match::decode(Version::V1_0, &mut cur).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn v10_omits_unrepresentable_fields() {
        let mut m = Match::new();
        m.set_in_port(3);
        m.set_tunnel_id(42); // no 1.0 encoding
        let mut buf = Vec::new();
        m.encode(Version::V1_0, &mut buf);
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = Match::decode(Version::V1_0, &mut cur).unwrap();
        assert_eq!(back.in_port(), Some(3));
        assert!(back.get_basic(field::TUNNEL_ID).is_none());
    }

    #[test]
    fn unknown_tlv_preserved() {
        let exp = OxmTlv {
            class: CLASS_EXPERIMENTER,
            field: 0x15,
            value: vec![0xde, 0xad, 0xbe, 0xef],
            mask: None,
        };
        let mut m = Match::new();
        m.insert(exp.clone());
        m.set_in_port(1);
        assert!(m.has_unknown());

        let mut buf = Vec::new();
        m.encode(Version::V1_3, &mut buf);
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = Match::decode(Version::V1_3, &mut cur).unwrap();
        assert_eq!(back.get(CLASS_EXPERIMENTER, 0x15), Some(&exp));
    }

    #[test]
    fn masked_tlv_wire_form() {
        let mut m = Match::new();
        m.set_metadata(0x1122_3344_5566_7788, Some(0xffff_ffff_0000_0000));
        let mut buf = Vec::new();
        m.encode(Version::V1_3, &mut buf);
        // match header (4) + oxm header (4) + value (8) + mask (8) = 24, already 8-aligned
        assert_eq!(buf.len(), 24);
        // hasmask bit and doubled length in the OXM header
        assert_eq!(&buf[4..8], &hex!("80000510")[..]);
    }
}
