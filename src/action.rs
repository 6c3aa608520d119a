//! Action, instruction, and bucket codecs. List order is semantically
//! significant everywhere, so lists preserve insertion order exactly;
//! unknown types are carried opaquely for lossless pass-through.

use bytes::{Buf, BufMut};

use coding::{pad_to_8, BufExt, BufMutExt, Result as CodingResult, UnexpectedEnd};
use oxm::OxmTlv;
use Version;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Action {
    Output { port: u32, max_len: u16 },
    // OF1.0 header rewrites
    SetVlanVid(u16),
    SetVlanPcp(u8),
    StripVlan,
    SetDlSrc([u8; 6]),
    SetDlDst([u8; 6]),
    SetNwSrc(u32),
    SetNwDst(u32),
    SetNwTos(u8),
    SetTpSrc(u16),
    SetTpDst(u16),
    Enqueue { port: u16, queue_id: u32 },
    // OF1.2+
    CopyTtlOut,
    CopyTtlIn,
    SetMplsTtl(u8),
    DecMplsTtl,
    PushVlan(u16),
    PopVlan,
    PushMpls(u16),
    PopMpls(u16),
    SetQueue(u32),
    Group(u32),
    SetNwTtl(u8),
    DecNwTtl,
    SetField(OxmTlv),
    // OF1.3
    PushPbb(u16),
    PopPbb,
    Experimenter { experimenter: u32, data: Vec<u8> },
    /// Preserved verbatim; `body` excludes the 4-byte action header.
    Unknown { ty: u16, body: Vec<u8> },
}

impl Action {
    pub fn output(port: u32) -> Action {
        Action::Output {
            port,
            max_len: 0xffff, // no buffer, send complete packet
        }
    }

    /// Wire type code in `version`; `None` when unrepresentable there.
    fn ty(&self, version: Version) -> Option<u16> {
        use self::Action::*;
        if version == Version::V1_0 {
            return match *self {
                Output { .. } => Some(0),
                SetVlanVid(_) => Some(1),
                SetVlanPcp(_) => Some(2),
                StripVlan => Some(3),
                SetDlSrc(_) => Some(4),
                SetDlDst(_) => Some(5),
                SetNwSrc(_) => Some(6),
                SetNwDst(_) => Some(7),
                SetNwTos(_) => Some(8),
                SetTpSrc(_) => Some(9),
                SetTpDst(_) => Some(10),
                Enqueue { .. } => Some(11),
                Experimenter { .. } => Some(0xffff), // OFPAT_VENDOR
                Unknown { ty, .. } => Some(ty),
                _ => None,
            };
        }
        match *self {
            Output { .. } => Some(0),
            CopyTtlOut => Some(11),
            CopyTtlIn => Some(12),
            SetMplsTtl(_) => Some(15),
            DecMplsTtl => Some(16),
            PushVlan(_) => Some(17),
            PopVlan => Some(18),
            PushMpls(_) => Some(19),
            PopMpls(_) => Some(20),
            SetQueue(_) => Some(21),
            Group(_) => Some(22),
            SetNwTtl(_) => Some(23),
            DecNwTtl => Some(24),
            SetField(_) => Some(25),
            PushPbb(_) if version == Version::V1_3 => Some(26),
            PopPbb if version == Version::V1_3 => Some(27),
            Experimenter { .. } => Some(0xffff),
            Unknown { ty, .. } => Some(ty),
            _ => None,
        }
    }

    pub fn wire_len(&self, version: Version) -> usize {
        use self::Action::*;
        if self.ty(version).is_none() {
            return 0;
        }
        match *self {
            Output { .. } => {
                if version == Version::V1_0 {
                    8
                } else {
                    16
                }
            }
            SetDlSrc(_) | SetDlDst(_) | Enqueue { .. } => 16,
            SetField(ref tlv) => {
                let len = 4 + tlv.wire_len();
                len + pad_to_8(len)
            }
            Experimenter { ref data, .. } => {
                let len = 8 + data.len();
                len + pad_to_8(len)
            }
            Unknown { ref body, .. } => 4 + body.len(),
            _ => 8,
        }
    }

    /// Actions with no encoding in `version` are skipped; validate with
    /// [`Action::ty`] before building version-crossing lists.
    pub fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        use self::Action::*;
        let ty = match self.ty(version) {
            Some(ty) => ty,
            None => return,
        };
        buf.write(ty);
        buf.write(self.wire_len(version) as u16);
        match *self {
            Output { port, max_len } => {
                if version == Version::V1_0 {
                    buf.write(port as u16);
                    buf.write(max_len);
                } else {
                    buf.write(port);
                    buf.write(max_len);
                    buf.pad(6);
                }
            }
            SetVlanVid(vid) => {
                buf.write(vid);
                buf.pad(2);
            }
            SetVlanPcp(pcp) | SetNwTos(pcp) | SetMplsTtl(pcp) | SetNwTtl(pcp) => {
                buf.write(pcp);
                buf.pad(3);
            }
            StripVlan | CopyTtlOut | CopyTtlIn | DecMplsTtl | PopVlan | DecNwTtl | PopPbb => {
                buf.pad(4);
            }
            SetDlSrc(ref addr) | SetDlDst(ref addr) => {
                buf.put_slice(addr);
                buf.pad(6);
            }
            SetNwSrc(addr) | SetNwDst(addr) => {
                buf.write(addr);
            }
            SetTpSrc(port) | SetTpDst(port) => {
                buf.write(port);
                buf.pad(2);
            }
            Enqueue { port, queue_id } => {
                buf.write(port);
                buf.pad(6);
                buf.write(queue_id);
            }
            PushVlan(ethertype) | PushMpls(ethertype) | PopMpls(ethertype)
            | PushPbb(ethertype) => {
                buf.write(ethertype);
                buf.pad(2);
            }
            SetQueue(id) | Group(id) => {
                buf.write(id);
            }
            SetField(ref tlv) => {
                tlv.encode(buf);
                buf.pad(pad_to_8(4 + tlv.wire_len()));
            }
            Experimenter {
                experimenter,
                ref data,
            } => {
                buf.write(experimenter);
                buf.put_slice(data);
                buf.pad(pad_to_8(8 + data.len()));
            }
            Unknown { ref body, .. } => {
                buf.put_slice(body);
            }
        }
    }

    pub fn decode<B: Buf>(version: Version, buf: &mut B) -> CodingResult<Action> {
        use self::Action::*;
        let ty: u16 = buf.get()?;
        let len: u16 = buf.get()?;
        let len = len as usize;
        if len < 4 || len % 8 != 0 {
            return Err(UnexpectedEnd);
        }
        let body_len = len - 4;
        if buf.remaining() < body_len {
            return Err(UnexpectedEnd);
        }

        if version == Version::V1_0 {
            let action = match ty {
                0 => {
                    let port: u16 = buf.get()?;
                    let max_len: u16 = buf.get()?;
                    Output {
                        port: ::port::widen_port_no(port),
                        max_len,
                    }
                }
                1 => {
                    let vid = buf.get()?;
                    buf.skip(2)?;
                    SetVlanVid(vid)
                }
                2 => {
                    let pcp = buf.get()?;
                    buf.skip(3)?;
                    SetVlanPcp(pcp)
                }
                3 => {
                    buf.skip(4)?;
                    StripVlan
                }
                4 | 5 => {
                    let mut addr = [0; 6];
                    buf.get_into(&mut addr)?;
                    buf.skip(6)?;
                    if ty == 4 {
                        SetDlSrc(addr)
                    } else {
                        SetDlDst(addr)
                    }
                }
                6 => SetNwSrc(buf.get()?),
                7 => SetNwDst(buf.get()?),
                8 => {
                    let tos = buf.get()?;
                    buf.skip(3)?;
                    SetNwTos(tos)
                }
                9 | 10 => {
                    let port = buf.get()?;
                    buf.skip(2)?;
                    if ty == 9 {
                        SetTpSrc(port)
                    } else {
                        SetTpDst(port)
                    }
                }
                11 => {
                    let port = buf.get()?;
                    buf.skip(6)?;
                    Enqueue {
                        port,
                        queue_id: buf.get()?,
                    }
                }
                0xffff => {
                    let experimenter = buf.get()?;
                    let mut data = vec![0; body_len - 4];
                    buf.get_into(&mut data)?;
                    Experimenter { experimenter, data }
                }
                _ => {
                    let mut body = vec![0; body_len];
                    buf.get_into(&mut body)?;
                    Unknown { ty, body }
                }
            };
            return Ok(action);
        }

        let action = match ty {
            0 => {
                let port = buf.get()?;
                let max_len = buf.get()?;
                buf.skip(6)?;
                Output { port, max_len }
            }
            11 => {
                buf.skip(4)?;
                CopyTtlOut
            }
            12 => {
                buf.skip(4)?;
                CopyTtlIn
            }
            15 => {
                let ttl = buf.get()?;
                buf.skip(3)?;
                SetMplsTtl(ttl)
            }
            16 => {
                buf.skip(4)?;
                DecMplsTtl
            }
            17 | 19 | 20 => {
                let ethertype = buf.get()?;
                buf.skip(2)?;
                match ty {
                    17 => PushVlan(ethertype),
                    19 => PushMpls(ethertype),
                    _ => PopMpls(ethertype),
                }
            }
            18 => {
                buf.skip(4)?;
                PopVlan
            }
            21 => SetQueue(buf.get()?),
            22 => Group(buf.get()?),
            23 => {
                let ttl = buf.get()?;
                buf.skip(3)?;
                SetNwTtl(ttl)
            }
            24 => {
                buf.skip(4)?;
                DecNwTtl
            }
            25 => {
                let tlv = OxmTlv::decode(buf)?;
                buf.skip(pad_to_8(4 + tlv.wire_len()))?;
                SetField(tlv)
            }
            26 if version == Version::V1_3 => {
                let ethertype = buf.get()?;
                buf.skip(2)?;
                PushPbb(ethertype)
            }
            27 if version == Version::V1_3 => {
                buf.skip(4)?;
                PopPbb
            }
            0xffff => {
                let experimenter = buf.get()?;
                let mut data = vec![0; body_len - 4];
                buf.get_into(&mut data)?;
                Experimenter { experimenter, data }
            }
            _ => {
                let mut body = vec![0; body_len];
                buf.get_into(&mut body)?;
                Unknown { ty, body }
            }
        };
        Ok(action)
    }
}

pub fn actions_wire_len(actions: &[Action], version: Version) -> usize {
    actions.iter().map(|a| a.wire_len(version)).sum()
}

pub fn encode_actions<B: BufMut>(actions: &[Action], version: Version, buf: &mut B) {
    for action in actions {
        action.encode(version, buf);
    }
}

/// Decode exactly `len` bytes worth of actions.
pub fn decode_actions<B: Buf>(
    version: Version,
    buf: &mut B,
    mut len: usize,
) -> CodingResult<Vec<Action>> {
    let mut actions = Vec::new();
    while len > 0 {
        let before = buf.remaining();
        let action = Action::decode(version, buf)?;
        let consumed = before - buf.remaining();
        if consumed > len {
            return Err(UnexpectedEnd);
        }
        len -= consumed;
        actions.push(action);
    }
    Ok(actions)
}

/// Flow instruction, OF1.2+.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Instruction {
    GotoTable(u8),
    WriteMetadata { metadata: u64, mask: u64 },
    WriteActions(Vec<Action>),
    ApplyActions(Vec<Action>),
    ClearActions,
    Meter(u32),
    Experimenter { experimenter: u32, data: Vec<u8> },
    Unknown { ty: u16, body: Vec<u8> },
}

impl Instruction {
    pub fn wire_len(&self, version: Version) -> usize {
        use self::Instruction::*;
        match *self {
            GotoTable(_) | ClearActions | Meter(_) => 8,
            WriteMetadata { .. } => 24,
            WriteActions(ref a) | ApplyActions(ref a) => 8 + actions_wire_len(a, version),
            Experimenter { ref data, .. } => {
                let len = 8 + data.len();
                len + pad_to_8(len)
            }
            Unknown { ref body, .. } => 4 + body.len(),
        }
    }

    fn ty(&self) -> u16 {
        use self::Instruction::*;
        match *self {
            GotoTable(_) => 1,
            WriteMetadata { .. } => 2,
            WriteActions(_) => 3,
            ApplyActions(_) => 4,
            ClearActions => 5,
            Meter(_) => 6,
            Experimenter { .. } => 0xffff,
            Unknown { ty, .. } => ty,
        }
    }

    pub fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        use self::Instruction::*;
        buf.write(self.ty());
        buf.write(self.wire_len(version) as u16);
        match *self {
            GotoTable(table_id) => {
                buf.write(table_id);
                buf.pad(3);
            }
            WriteMetadata { metadata, mask } => {
                buf.pad(4);
                buf.write(metadata);
                buf.write(mask);
            }
            WriteActions(ref actions) | ApplyActions(ref actions) => {
                buf.pad(4);
                encode_actions(actions, version, buf);
            }
            ClearActions => {
                buf.pad(4);
            }
            Meter(meter_id) => {
                buf.write(meter_id);
            }
            Experimenter {
                experimenter,
                ref data,
            } => {
                buf.write(experimenter);
                buf.put_slice(data);
                buf.pad(pad_to_8(8 + data.len()));
            }
            Unknown { ref body, .. } => {
                buf.put_slice(body);
            }
        }
    }

    pub fn decode<B: Buf>(version: Version, buf: &mut B) -> CodingResult<Instruction> {
        use self::Instruction::*;
        let ty: u16 = buf.get()?;
        let len: u16 = buf.get()?;
        let len = len as usize;
        if len < 4 {
            return Err(UnexpectedEnd);
        }
        let body_len = len - 4;
        if buf.remaining() < body_len {
            return Err(UnexpectedEnd);
        }
        let inst = match ty {
            1 => {
                let table_id = buf.get()?;
                buf.skip(3)?;
                GotoTable(table_id)
            }
            2 => {
                buf.skip(4)?;
                WriteMetadata {
                    metadata: buf.get()?,
                    mask: buf.get()?,
                }
            }
            3 | 4 => {
                buf.skip(4)?;
                let actions = decode_actions(version, buf, body_len - 4)?;
                if ty == 3 {
                    WriteActions(actions)
                } else {
                    ApplyActions(actions)
                }
            }
            5 => {
                buf.skip(4)?;
                ClearActions
            }
            6 if version == Version::V1_3 => Meter(buf.get()?),
            0xffff => {
                let experimenter = buf.get()?;
                let mut data = vec![0; body_len - 4];
                buf.get_into(&mut data)?;
                Experimenter { experimenter, data }
            }
            _ => {
                let mut body = vec![0; body_len];
                buf.get_into(&mut body)?;
                Unknown { ty, body }
            }
        };
        Ok(inst)
    }
}

pub fn instructions_wire_len(instructions: &[Instruction], version: Version) -> usize {
    instructions.iter().map(|i| i.wire_len(version)).sum()
}

pub fn encode_instructions<B: BufMut>(
    instructions: &[Instruction],
    version: Version,
    buf: &mut B,
) {
    for inst in instructions {
        inst.encode(version, buf);
    }
}

pub fn decode_instructions<B: Buf>(
    version: Version,
    buf: &mut B,
    mut len: usize,
) -> CodingResult<Vec<Instruction>> {
    let mut instructions = Vec::new();
    while len > 0 {
        let before = buf.remaining();
        let inst = Instruction::decode(version, buf)?;
        let consumed = before - buf.remaining();
        if consumed > len {
            return Err(UnexpectedEnd);
        }
        len -= consumed;
        instructions.push(inst);
    }
    Ok(instructions)
}

/// Group bucket, OF1.2+.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Bucket {
    pub weight: u16,
    pub watch_port: u32,
    pub watch_group: u32,
    pub actions: Vec<Action>,
}

impl Bucket {
    pub fn wire_len(&self, version: Version) -> usize {
        16 + actions_wire_len(&self.actions, version)
    }

    pub fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        buf.write(self.wire_len(version) as u16);
        buf.write(self.weight);
        buf.write(self.watch_port);
        buf.write(self.watch_group);
        buf.pad(4);
        encode_actions(&self.actions, version, buf);
    }

    pub fn decode<B: Buf>(version: Version, buf: &mut B) -> CodingResult<Bucket> {
        let len: u16 = buf.get()?;
        let len = len as usize;
        if len < 16 {
            return Err(UnexpectedEnd);
        }
        let weight = buf.get()?;
        let watch_port = buf.get()?;
        let watch_group = buf.get()?;
        buf.skip(4)?;
        let actions = decode_actions(version, buf, len - 16)?;
        Ok(Bucket {
            weight,
            watch_port,
            watch_group,
            actions,
        })
    }
}

pub fn buckets_wire_len(buckets: &[Bucket], version: Version) -> usize {
    buckets.iter().map(|b| b.wire_len(version)).sum()
}

pub fn encode_buckets<B: BufMut>(buckets: &[Bucket], version: Version, buf: &mut B) {
    for bucket in buckets {
        bucket.encode(version, buf);
    }
}

pub fn decode_buckets<B: Buf>(
    version: Version,
    buf: &mut B,
    mut len: usize,
) -> CodingResult<Vec<Bucket>> {
    let mut buckets = Vec::new();
    while len > 0 {
        let before = buf.remaining();
        let bucket = Bucket::decode(version, buf)?;
        let consumed = before - buf.remaining();
        if consumed > len {
            return Err(UnexpectedEnd);
        }
        len -= consumed;
        buckets.push(bucket);
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Version;

    fn round_trip_actions(version: Version, actions: Vec<Action>) {
        let mut buf = Vec::new();
        encode_actions(&actions, version, &mut buf);
        assert_eq!(buf.len(), actions_wire_len(&actions, version));
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = decode_actions(version, &mut cur, buf.len()).unwrap();
        assert_eq!(back, actions);
    }

    #[test]
    fn v10_actions_round_trip() {
        round_trip_actions(
            Version::V1_0,
            vec![
                Action::Output {
                    port: 2,
                    max_len: 128,
                },
                Action::SetVlanVid(100),
                Action::SetDlDst([1, 2, 3, 4, 5, 6]),
                Action::Enqueue {
                    port: 3,
                    queue_id: 9,
                },
            ],
        );
    }

    #[test]
    fn v13_actions_round_trip() {
        let mut tlv_match = ::oxm::Match::new();
        tlv_match.set_eth_type(0x8847);
        round_trip_actions(
            Version::V1_3,
            vec![
                Action::PushMpls(0x8847),
                Action::SetMplsTtl(64),
                Action::SetField(tlv_match.tlvs()[0].clone()),
                Action::Group(7),
                Action::output(1),
                Action::PopPbb,
            ],
        );
    }

    #[test]
    fn v10_output_wire_image() {
        let mut buf = Vec::new();
        Action::Output {
            port: 0xfffb, // OFPP_FLOOD
            max_len: 0,
        }
        .encode(Version::V1_0, &mut buf);
        assert_eq!(buf, hex!("00000008fffb0000"));
    }

    #[test]
    fn unknown_action_preserved() {
        let raw = hex!("00630008aabbccdd");
        let mut cur = ::std::io::Cursor::new(&raw[..]);
        let action = Action::decode(Version::V1_3, &mut cur).unwrap();
        assert_matches!(action, Action::Unknown { ty: 0x63, .. });
        let mut buf = Vec::new();
        action.encode(Version::V1_3, &mut buf);
        assert_eq!(&buf[..], &raw[..]);
    }

    #[test]
    fn instructions_round_trip() {
        let instructions = vec![
            Instruction::ApplyActions(vec![Action::output(4), Action::DecNwTtl]),
            Instruction::WriteMetadata {
                metadata: 0xaa,
                mask: 0xff,
            },
            Instruction::GotoTable(2),
            Instruction::Meter(5),
        ];
        let mut buf = Vec::new();
        encode_instructions(&instructions, Version::V1_3, &mut buf);
        assert_eq!(buf.len(), instructions_wire_len(&instructions, Version::V1_3));
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = decode_instructions(Version::V1_3, &mut cur, buf.len()).unwrap();
        assert_eq!(back, instructions);
    }

    #[test]
    fn bucket_list_preserves_order() {
        let buckets = vec![
            Bucket {
                weight: 1,
                watch_port: 0xffff_ffff,
                watch_group: 0xffff_ffff,
                actions: vec![Action::output(1)],
            },
            Bucket {
                weight: 2,
                watch_port: 3,
                watch_group: 0xffff_ffff,
                actions: vec![Action::output(2), Action::SetNwTtl(9)],
            },
        ];
        let mut buf = Vec::new();
        encode_buckets(&buckets, Version::V1_3, &mut buf);
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = decode_buckets(Version::V1_3, &mut cur, buf.len()).unwrap();
        assert_eq!(back, buckets);
    }
}
