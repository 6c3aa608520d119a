//! Protocol-level state machinery for OpenFlow 1.0/1.2/1.3 controllers and
//! datapaths.
//!
//! This library performs no I/O whatsoever. A backend owns the sockets and
//! timers, feeds inbound bytes and expirations into a [`Runtime`], and
//! executes the [`Io`] operations the runtime emits in return. Application
//! state changes (datapath open, packet-in, ...) are surfaced as [`Event`]s.

extern crate byteorder;
extern crate bytes;
#[macro_use]
extern crate failure;
extern crate fnv;
#[macro_use]
extern crate lazy_static;
extern crate rand;
extern crate slab;
#[macro_use]
extern crate slog;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
#[cfg(test)]
#[macro_use]
extern crate hex_literal;

use std::fmt;
use std::net::SocketAddr;

pub mod action;
pub mod chan;
pub mod coding;
pub mod conn;
pub mod ctl;
pub mod dpath;
pub mod message;
pub mod msg;
pub mod oxm;
pub mod port;
pub mod runtime;
pub mod sock;
pub mod stats;
pub mod xid;

pub use chan::{ChanError, RofChan};
pub use conn::{ConnState, RofConn};
pub use ctl::CtlHandle;
pub use dpath::{DpHandle, DpState};
pub use message::{Envelope, Header, MsgKind};
pub use msg::Message;
pub use oxm::Match;
pub use runtime::{Config, ConnId, Event, Io, Runtime, SessionHandle, Timer};
pub use sock::SendError;
pub use xid::XidStore;

/// Length of the fixed OpenFlow header preceding every message.
pub const HEADER_LEN: usize = 8;

/// Legacy controller port predating the IANA assignment.
pub const DEFAULT_PORT_LEGACY: u16 = 6633;
/// IANA-assigned OpenFlow port.
pub const DEFAULT_PORT: u16 = 6653;

/// Upper bound on a single message accepted off the wire unless overridden.
pub const DEFAULT_MSG_SIZE_CAP: usize = 64 * 1024;

/// A wire protocol version this library speaks.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Version {
    V1_0,
    V1_2,
    V1_3,
}

impl Version {
    pub fn from_wire(x: u8) -> Option<Version> {
        match x {
            0x01 => Some(Version::V1_0),
            0x03 => Some(Version::V1_2),
            0x04 => Some(Version::V1_3),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Version::V1_0 => 0x01,
            Version::V1_2 => 0x03,
            Version::V1_3 => 0x04,
        }
    }

    /// Whether this version carries OXM matches rather than the fixed 1.0
    /// match structure.
    pub fn uses_oxm(self) -> bool {
        self != Version::V1_0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::V1_0 => f.write_str("1.0"),
            Version::V1_2 => f.write_str("1.2"),
            Version::V1_3 => f.write_str("1.3"),
        }
    }
}

/// Set of protocol versions, indexed by wire version number as in the
/// OFPHET_VERSIONBITMAP hello element.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct VersionBitmap(u32);

impl VersionBitmap {
    pub fn new() -> Self {
        VersionBitmap(0)
    }

    /// All versions this library implements.
    pub fn all() -> Self {
        let mut vb = VersionBitmap(0);
        vb.add(Version::V1_0);
        vb.add(Version::V1_2);
        vb.add(Version::V1_3);
        vb
    }

    pub fn only(version: Version) -> Self {
        let mut vb = VersionBitmap(0);
        vb.add(version);
        vb
    }

    pub fn add(&mut self, version: Version) {
        self.0 |= 1 << u32::from(version.to_wire());
    }

    pub fn remove(&mut self, version: Version) {
        self.0 &= !(1 << u32::from(version.to_wire()));
    }

    pub fn contains(&self, version: Version) -> bool {
        self.0 & (1 << u32::from(version.to_wire())) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Numerically largest member, i.e. the preferred negotiation outcome.
    pub fn highest(&self) -> Option<Version> {
        for &v in [Version::V1_3, Version::V1_2, Version::V1_0].iter() {
            if self.contains(v) {
                return Some(v);
            }
        }
        None
    }

    pub fn intersect(&self, other: &VersionBitmap) -> VersionBitmap {
        VersionBitmap(self.0 & other.0)
    }

    /// Raw bits for the first (and only meaningful) bitmap word on the wire.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Bits learned from a peer; bits beyond the versions we know are kept
    /// so the bitmap re-encodes losslessly, but never negotiate.
    pub fn from_bits(bits: u32) -> Self {
        VersionBitmap(bits)
    }
}

impl fmt::Display for VersionBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Which role a session plays on its channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Side {
    /// Manages datapaths; drives the init sequence after the handshake.
    Controller,
    /// Is managed by controllers; answers feature/config/stats requests.
    Datapath,
}

impl std::ops::Not for Side {
    type Output = Side;
    fn not(self) -> Side {
        match self {
            Side::Controller => Side::Datapath,
            Side::Datapath => Side::Controller,
        }
    }
}

/// How a connection came to exist. Only actively opened connections ever
/// reconnect by themselves.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnMode {
    Active,
    PassiveAccepted,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transport {
    Tcp,
    Tls,
}

/// Parameters for one connection endpoint. The backend interprets these when
/// executing `Io::Connect`; the TLS context is an opaque name it resolves
/// against its own configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub transport: Transport,
    pub remote: SocketAddr,
    pub local_hint: Option<SocketAddr>,
    pub tls_context: Option<String>,
}

impl EndpointConfig {
    pub fn tcp(remote: SocketAddr) -> Self {
        EndpointConfig {
            transport: Transport::Tcp,
            remote,
            local_hint: None,
            tls_context: None,
        }
    }
}

/// An OpenFlow error type/code pair as carried in OFPT_ERROR.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OfpErr {
    pub ty: u16,
    pub code: u16,
}

impl OfpErr {
    pub const HELLO_INCOMPATIBLE: OfpErr = OfpErr {
        ty: error_type::HELLO_FAILED,
        code: 0, // OFPHFC_INCOMPATIBLE
    };
    pub const BAD_REQUEST_BAD_VERSION: OfpErr = OfpErr {
        ty: error_type::BAD_REQUEST,
        code: 0, // OFPBRC_BAD_VERSION
    };
    pub const BAD_REQUEST_BAD_TYPE: OfpErr = OfpErr {
        ty: error_type::BAD_REQUEST,
        code: 1, // OFPBRC_BAD_TYPE
    };
    pub const BAD_REQUEST_BAD_LEN: OfpErr = OfpErr {
        ty: error_type::BAD_REQUEST,
        code: 6, // OFPBRC_BAD_LEN
    };
}

impl fmt::Display for OfpErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "type {} code {}", self.ty, self.code)
    }
}

/// OFPT_ERROR type space shared by all three versions for the codes the
/// runtime itself emits.
pub mod error_type {
    pub const HELLO_FAILED: u16 = 0;
    pub const BAD_REQUEST: u16 = 1;
    pub const BAD_ACTION: u16 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_wire_round_trip() {
        for &v in [Version::V1_0, Version::V1_2, Version::V1_3].iter() {
            assert_eq!(Version::from_wire(v.to_wire()), Some(v));
        }
        assert_eq!(Version::from_wire(0x02), None);
        assert_eq!(Version::from_wire(0x05), None);
    }

    #[test]
    fn bitmap_highest_and_intersect() {
        let mut a = VersionBitmap::new();
        a.add(Version::V1_0);
        a.add(Version::V1_2);
        a.add(Version::V1_3);
        let b = VersionBitmap::only(Version::V1_2);
        assert_eq!(a.highest(), Some(Version::V1_3));
        assert_eq!(a.intersect(&b).highest(), Some(Version::V1_2));
        assert!(a.intersect(&VersionBitmap::new()).is_empty());
    }

    #[test]
    fn bitmap_foreign_bits_preserved() {
        // Bit 5 is some future version; it must survive but never win.
        let peer = VersionBitmap::from_bits((1 << 5) | (1 << 1));
        assert_eq!(peer.bits(), (1 << 5) | (1 << 1));
        assert_eq!(peer.highest(), Some(Version::V1_0));
    }
}
