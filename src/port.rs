//! Switch port descriptions: the 48-byte OF1.0 `ofp_phy_port` and the
//! 64-byte OF1.2+ `ofp_port`, plus the reserved port number space.

use bytes::{Buf, BufMut};

use coding::{decode_name, encode_name, BufExt, BufMutExt, Result as CodingResult};
use Version;

/// Reserved port numbers in their OF1.2+ (32-bit) form.
pub mod port_no {
    pub const MAX: u32 = 0xffff_ff00;
    pub const IN_PORT: u32 = 0xffff_fff8;
    pub const TABLE: u32 = 0xffff_fff9;
    pub const NORMAL: u32 = 0xffff_fffa;
    pub const FLOOD: u32 = 0xffff_fffb;
    pub const ALL: u32 = 0xffff_fffc;
    pub const CONTROLLER: u32 = 0xffff_fffd;
    pub const LOCAL: u32 = 0xffff_fffe;
    pub const ANY: u32 = 0xffff_ffff;
}

/// OFPPC_* config bits (the subset shared by all versions).
pub mod config {
    pub const PORT_DOWN: u32 = 1 << 0;
    pub const NO_RECV: u32 = 1 << 2;
    pub const NO_FWD: u32 = 1 << 5;
    pub const NO_PACKET_IN: u32 = 1 << 6;
}

/// OFPPS_* state bits (1.2+ numbering; 1.0's STP states are not modeled).
pub mod state {
    pub const LINK_DOWN: u32 = 1 << 0;
    pub const BLOCKED: u32 = 1 << 1;
    pub const LIVE: u32 = 1 << 2;
}

/// Map a 1.0 16-bit port number into the canonical 32-bit space; the
/// reserved range 0xff00..=0xffff widens to 0xffffff00..=0xffffffff.
pub fn widen_port_no(p: u16) -> u32 {
    if p >= 0xff00 {
        0xffff_0000 | u32::from(p)
    } else {
        u32::from(p)
    }
}

/// Inverse of [`widen_port_no`]; values outside the 1.0 range truncate.
pub fn narrow_port_no(p: u32) -> u16 {
    p as u16
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Port {
    pub port_no: u32,
    pub hw_addr: [u8; 6],
    pub name: String,
    pub config: u32,
    pub state: u32,
    pub curr: u32,
    pub advertised: u32,
    pub supported: u32,
    pub peer: u32,
    /// Current/max speed in kbps; zero on OF1.0 where the fields are absent.
    pub curr_speed: u32,
    pub max_speed: u32,
}

impl Port {
    pub fn wire_len(version: Version) -> usize {
        match version {
            Version::V1_0 => 48,
            _ => 64,
        }
    }

    pub fn is_up(&self) -> bool {
        self.config & config::PORT_DOWN == 0 && self.state & state::LINK_DOWN == 0
    }

    pub fn encode<B: BufMut>(&self, version: Version, buf: &mut B) {
        match version {
            Version::V1_0 => {
                buf.write(narrow_port_no(self.port_no));
                buf.put_slice(&self.hw_addr);
                encode_name(buf, &self.name, 16);
                buf.write(self.config);
                buf.write(self.state);
                buf.write(self.curr);
                buf.write(self.advertised);
                buf.write(self.supported);
                buf.write(self.peer);
            }
            _ => {
                buf.write(self.port_no);
                buf.pad(4);
                buf.put_slice(&self.hw_addr);
                buf.pad(2);
                encode_name(buf, &self.name, 16);
                buf.write(self.config);
                buf.write(self.state);
                buf.write(self.curr);
                buf.write(self.advertised);
                buf.write(self.supported);
                buf.write(self.peer);
                buf.write(self.curr_speed);
                buf.write(self.max_speed);
            }
        }
    }

    pub fn decode<B: Buf>(version: Version, buf: &mut B) -> CodingResult<Port> {
        match version {
            Version::V1_0 => {
                let port_no: u16 = buf.get()?;
                let mut hw_addr = [0; 6];
                buf.get_into(&mut hw_addr)?;
                let name = decode_name(buf, 16)?;
                Ok(Port {
                    port_no: widen_port_no(port_no),
                    hw_addr,
                    name,
                    config: buf.get()?,
                    state: buf.get()?,
                    curr: buf.get()?,
                    advertised: buf.get()?,
                    supported: buf.get()?,
                    peer: buf.get()?,
                    curr_speed: 0,
                    max_speed: 0,
                })
            }
            _ => {
                let port_no = buf.get()?;
                buf.skip(4)?;
                let mut hw_addr = [0; 6];
                buf.get_into(&mut hw_addr)?;
                buf.skip(2)?;
                let name = decode_name(buf, 16)?;
                Ok(Port {
                    port_no,
                    hw_addr,
                    name,
                    config: buf.get()?,
                    state: buf.get()?,
                    curr: buf.get()?,
                    advertised: buf.get()?,
                    supported: buf.get()?,
                    peer: buf.get()?,
                    curr_speed: buf.get()?,
                    max_speed: buf.get()?,
                })
            }
        }
    }
}

/// Decode ports until `buf` runs dry (features-reply and port-desc tails).
pub fn decode_ports<B: Buf>(version: Version, buf: &mut B) -> CodingResult<Vec<Port>> {
    let each = Port::wire_len(version);
    let mut ports = Vec::new();
    while buf.remaining() >= each {
        ports.push(Port::decode(version, buf)?);
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(port_no: u32) -> Port {
        Port {
            port_no,
            hw_addr: [0, 1, 2, 3, 4, 5],
            name: format!("eth{}", port_no),
            config: 0,
            state: state::LIVE,
            curr: 0x0000_0820,
            advertised: 0,
            supported: 0x0000_0fff,
            peer: 0,
            curr_speed: 10_000_000,
            max_speed: 10_000_000,
        }
    }

    #[test]
    fn v13_round_trip() {
        let port = sample(4);
        let mut buf = Vec::new();
        port.encode(Version::V1_3, &mut buf);
        assert_eq!(buf.len(), Port::wire_len(Version::V1_3));
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        assert_eq!(Port::decode(Version::V1_3, &mut cur).unwrap(), port);
    }

    #[test]
    fn v10_drops_speed_fields() {
        let port = sample(2);
        let mut buf = Vec::new();
        port.encode(Version::V1_0, &mut buf);
        assert_eq!(buf.len(), 48);
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let back = Port::decode(Version::V1_0, &mut cur).unwrap();
        assert_eq!(back.curr_speed, 0);
        assert_eq!(back.port_no, 2);
        assert_eq!(back.name, "eth2");
    }

    #[test]
    fn reserved_port_numbers_widen() {
        assert_eq!(widen_port_no(0xfffb), port_no::FLOOD);
        assert_eq!(widen_port_no(0xfffe), port_no::LOCAL);
        assert_eq!(widen_port_no(42), 42);
        assert_eq!(narrow_port_no(port_no::FLOOD), 0xfffb);
    }

    #[test]
    fn port_list_decodes_to_exhaustion() {
        let mut buf = Vec::new();
        sample(1).encode(Version::V1_2, &mut buf);
        sample(2).encode(Version::V1_2, &mut buf);
        let mut cur = ::std::io::Cursor::new(&buf[..]);
        let ports = decode_ports(Version::V1_2, &mut cur).unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[1].port_no, 2);
    }
}
