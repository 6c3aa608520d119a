//! Handshake and liveness scenarios driven with literal wire bytes.

extern crate bytes;
#[macro_use]
extern crate assert_matches;
#[macro_use]
extern crate hex_literal;
extern crate rof_proto;
#[macro_use]
extern crate slog;
extern crate slog_term;

mod support;

use rof_proto::msg::Message;
use rof_proto::sock::SendError;
use rof_proto::chan::{ChanError, ChanSendError};
use rof_proto::conn::ConnError;
use rof_proto::ctl::DatapathInfo;
use rof_proto::msg::{Echo, PacketIn};
use rof_proto::{Config, EndpointConfig, Event, OfpErr, Timer, Version, VersionBitmap};

use support::Harness;

fn endpoint() -> EndpointConfig {
    EndpointConfig::tcp("192.0.2.1:6653".parse().unwrap())
}

fn is_ctl_open(e: &Event) -> bool {
    match *e {
        Event::CtlOpen { .. } => true,
        _ => false,
    }
}

fn is_ctl_close(e: &Event) -> bool {
    match *e {
        Event::CtlClose { .. } => true,
        _ => false,
    }
}

fn switch_info(dpid: u64) -> DatapathInfo {
    DatapathInfo {
        dpid,
        n_buffers: 256,
        n_tables: 4,
        ..DatapathInfo::default()
    }
}

/// Bring up a datapath-role session over an accepted controller socket by
/// exchanging HELLOs; returns the harness, session, and connection.
fn established_switch(
    config: Config,
    peer_hello: &[u8],
) -> (Harness, rof_proto::SessionHandle, rof_proto::ConnId) {
    let mut h = Harness::new(config);
    let (sess, conn) = h.rt.accept_controller(h.now, switch_info(0x42));
    h.pump();
    let hello = h.frame_of_type(conn, 0).expect("HELLO goes out first");
    assert!(hello.header.length >= 8);
    h.deliver(conn, peer_hello);
    (h, sess, conn)
}

// S1: local {1.0,1.2,1.3}; peer HELLO header 1.2 without a bitmap element.
#[test]
fn version_downgrade_to_peer_header() {
    let (mut h, sess, conn) = established_switch(
        Config::default(),
        &hex!("0300000800000001"), // v1.2 HELLO, no body
    );
    assert!(h.rt.is_established(sess));
    assert_eq!(
        h.rt.ctl(sess).unwrap().chan().version(),
        Some(Version::V1_2)
    );
    let events = h.events();
    assert!(events.iter().any(is_ctl_open));
    // echo liveness armed after establishment
    assert!(h.timer_armed(conn, Timer::EchoInterval));
}

// S2: local {1.3}; peer HELLO header 1.0. Expect HELLO_FAILED/INCOMPATIBLE
// and no establishment.
#[test]
fn incompatible_version_is_fatal() {
    let config = Config {
        versions: VersionBitmap::only(Version::V1_3),
        ..Config::default()
    };
    let (mut h, sess, conn) = established_switch(config, &hex!("0100000800000001"));
    assert!(!h.rt.is_established(sess));

    let error = h.frame_of_type(conn, 1).expect("error reply sent");
    let decoded = Message::decode(&error).unwrap();
    match decoded {
        Message::Error(ref e) => assert_eq!(e.err, OfpErr::HELLO_INCOMPATIBLE),
        other => panic!("expected error message, got {:?}", other),
    }
    assert!(h.closes.contains(&conn));
    let events = h.events();
    assert!(!events.iter().any(is_ctl_open));
}

// S4: echo request goes out after the interval; silence kills the channel.
#[test]
fn echo_liveness_detects_stale_peer() {
    let (mut h, sess, conn) = established_switch(
        Config::default(),
        &hex!("0400001000000001000100080000001a"),
    );
    assert!(h.rt.is_established(sess));
    h.events();
    h.frames(conn); // discard handshake traffic

    h.advance(10_000_000);
    let echo = h.frame_of_type(conn, 2).expect("echo request after interval");
    assert!(echo.body.is_empty());
    assert!(h.timer_armed(conn, Timer::EchoTimeout));

    // no reply within echo_timeout
    h.advance(5_000_000);
    assert!(!h.rt.is_established(sess));
    assert!(h.closes.contains(&conn));
    let events = h.events();
    assert!(events.iter().any(is_ctl_close));
}

// Echo replies keep the channel alive and rearm the interval.
#[test]
fn echo_reply_keeps_channel_up() {
    let (mut h, sess, conn) = established_switch(
        Config::default(),
        &hex!("0400001000000001000100080000001a"),
    );
    h.frames(conn);

    h.advance(10_000_000);
    let echo = h.frame_of_type(conn, 2).expect("echo request");
    let reply = Message::EchoReply(Echo::default())
        .encode(Version::V1_3, echo.header.xid)
        .unwrap();
    h.deliver(conn, &reply.to_bytes());
    assert!(!h.timer_armed(conn, Timer::EchoTimeout));
    assert!(h.timer_armed(conn, Timer::EchoInterval));

    h.advance(5_000_000);
    assert!(h.rt.is_established(sess));
}

// Inbound echo requests are answered with the same xid and payload.
#[test]
fn echo_requests_are_answered() {
    let (mut h, _sess, conn) = established_switch(
        Config::default(),
        &hex!("0400001000000001000100080000001a"),
    );
    h.frames(conn);

    let ping = Message::EchoRequest(Echo {
        data: b"ka".to_vec(),
    })
    .encode(Version::V1_3, 0x55)
    .unwrap();
    h.deliver(conn, &ping.to_bytes());
    let pong = h.frame_of_type(conn, 3).expect("echo reply");
    assert_eq!(pong.header.xid, 0x55);
    assert_eq!(&pong.body[..], b"ka");
}

// S5: auxiliaries require an OF1.3 main.
#[test]
fn auxiliary_rejected_below_v13() {
    let (mut h, sess, _conn) = established_switch(
        Config::default(),
        &hex!("0300000800000001"), // negotiate 1.2
    );
    assert!(h.rt.is_established(sess));
    assert_matches!(
        h.rt.add_aux_conn(sess, 1, endpoint()),
        Err(ChanError::Invalid)
    );
    assert!(h.rt.is_established(sess));
    assert_eq!(h.rt.conn_count(), 1);
}

// Auxiliaries are accepted on a 1.3 channel and inherit its version.
#[test]
fn auxiliary_allowed_on_v13() {
    let (mut h, sess, _conn) = established_switch(
        Config::default(),
        &hex!("0400001000000001000100080000001a"),
    );
    let aux = h.rt.add_aux_conn(sess, 1, endpoint()).unwrap();
    h.pump();
    assert!(h.connects.contains(&aux));
    h.connected(aux);
    let hello = h.frame_of_type(aux, 0).expect("aux HELLO");
    // sole advertised version is the main's
    let decoded = Message::decode(&hello).unwrap();
    match decoded {
        Message::Hello(ref hello) => {
            let bitmap = hello.bitmap.expect("bitmap element");
            assert_eq!(bitmap, VersionBitmap::only(Version::V1_3));
        }
        other => panic!("expected hello, got {:?}", other),
    }
    h.deliver(aux, &hex!("0400000800000009"));
    assert_eq!(h.rt.conn_count(), 2);
    // aux did not change channel state derivation
    assert!(h.rt.is_established(sess));
}

// Dropping the main takes every auxiliary with it.
#[test]
fn dropping_main_drops_auxiliaries() {
    let (mut h, sess, conn) = established_switch(
        Config::default(),
        &hex!("0400001000000001000100080000001a"),
    );
    let aux = h.rt.add_aux_conn(sess, 1, endpoint()).unwrap();
    h.pump();
    h.connected(aux);
    h.deliver(aux, &hex!("0400000800000009"));
    assert_eq!(h.rt.conn_count(), 2);

    h.rt.drop_conn(h.now, sess, 0).unwrap();
    h.pump();
    assert_eq!(h.rt.conn_count(), 0);
    assert!(!h.rt.is_established(sess));
    assert!(h.closes.contains(&conn));
    assert!(h.closes.contains(&aux));
    let events = h.events();
    assert!(events.iter().any(is_ctl_close));
}

// S6: write-queue watermarks produce Backpressure and a drain signal.
#[test]
fn backpressure_and_drain() {
    let config = Config {
        tx_high_watermark: 4,
        tx_low_watermark: 1,
        ..Config::default()
    };
    let (mut h, sess, conn) = established_switch(config, &hex!("0400000800000001"));
    h.frames(conn);
    h.events();

    let packet_in = || PacketIn {
        buffer_id: 0xffff_ffff,
        total_len: 4,
        reason: 0,
        table_id: 0,
        cookie: 0,
        fields: rof_proto::Match::new(),
        data: b"abcd".to_vec().into(),
    };
    for _ in 0..4 {
        h.rt.send_packet_in(sess, 0, packet_in()).unwrap();
    }
    let err = h.rt.send_packet_in(sess, 0, packet_in());
    assert_matches!(
        err,
        Err(ChanSendError::Conn(ConnError::Send(SendError::Backpressure)))
    );

    // backend drains the queue
    h.pump();
    let events = h.events();
    assert!(events.iter().any(|e| match *e {
        Event::SendDrained { .. } => true,
        _ => false,
    }));
    h.rt.send_packet_in(sess, 0, packet_in()).unwrap();
}

// A refused active connection surfaces once and the pending entry dies.
#[test]
fn connect_refused_drops_pending_conn() {
    let mut h = Harness::new(Config::default());
    let conn = h.rt.connect_datapath(endpoint());
    h.pump();
    assert!(h.connects.contains(&conn));
    h.rt.handle_connect_refused(h.now, conn);
    h.pump();
    assert_eq!(h.rt.conn_count(), 0);
}

// Peer close before HELLO completes is a plain teardown.
#[test]
fn close_during_handshake() {
    let mut h = Harness::new(Config::default());
    let (sess, conn) = h.rt.accept_controller(h.now, switch_info(1));
    h.pump();
    h.peer_closed(conn);
    assert!(!h.rt.is_established(sess));
    assert_eq!(h.rt.conn_count(), 0);
}

// HELLO timer expiry closes the connection.
#[test]
fn hello_timeout_disconnects() {
    let mut h = Harness::new(Config::default());
    let (sess, conn) = h.rt.accept_controller(h.now, switch_info(1));
    h.pump();
    assert!(h.timer_armed(conn, Timer::Hello));
    h.advance(5_000_000);
    assert!(!h.rt.is_established(sess));
    assert!(h.closes.contains(&conn));
}
