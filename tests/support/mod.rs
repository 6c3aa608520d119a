//! Mock backend for driving a `Runtime` with literal wire bytes and a
//! hand-cranked clock. Executes the runtime's `Io` stream against in-memory
//! state: transmits are captured, timers live in a map and fire from
//! `advance`, connects and closes are recorded.

use std::collections::HashMap;

use bytes::Bytes;
use slog::{Drain, Logger};

use rof_proto::message::{Envelope, Framer};
use rof_proto::{Config, ConnId, Event, Io, Runtime, Timer};

pub fn logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(::std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!())
}

pub struct Harness {
    pub rt: Runtime,
    pub now: u64,
    timers: HashMap<(ConnId, Timer), u64>,
    transmits: Vec<(ConnId, Bytes)>,
    pub connects: Vec<ConnId>,
    pub closes: Vec<ConnId>,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        Harness {
            rt: Runtime::new(logger(), config),
            now: 0,
            timers: HashMap::new(),
            transmits: Vec::new(),
            connects: Vec::new(),
            closes: Vec::new(),
        }
    }

    /// Execute every pending IO operation.
    pub fn pump(&mut self) {
        while let Some(io) = self.rt.poll_io() {
            match io {
                Io::Transmit { conn, frame } => self.transmits.push((conn, frame)),
                Io::TimerStart { conn, timer, time } => {
                    self.timers.insert((conn, timer), time);
                }
                Io::TimerStop { conn, timer } => {
                    self.timers.remove(&(conn, timer));
                }
                Io::Connect { conn, .. } => self.connects.push(conn),
                Io::Close { conn } => {
                    self.closes.push(conn);
                    self.timers.retain(|&(c, _), _| c != conn);
                }
            }
        }
    }

    /// Advance the clock, firing due timers in deadline order.
    pub fn advance(&mut self, delta: u64) {
        let target = self.now + delta;
        loop {
            let due = self
                .timers
                .iter()
                .filter(|&(_, &time)| time <= target)
                .min_by_key(|&(_, &time)| time)
                .map(|(&key, &time)| (key, time));
            match due {
                Some(((conn, timer), time)) => {
                    self.now = time;
                    self.timers.remove(&(conn, timer));
                    self.rt.handle_timeout(self.now, conn, timer);
                    self.pump();
                }
                None => break,
            }
        }
        self.now = target;
    }

    /// Feed wire bytes into a connection, honoring the rx budget loop.
    pub fn deliver(&mut self, conn: ConnId, bytes: &[u8]) {
        let mut more = self.rt.handle_input(self.now, conn, bytes);
        self.pump();
        while more {
            more = self.rt.handle_input(self.now, conn, &[]);
            self.pump();
        }
    }

    pub fn connected(&mut self, conn: ConnId) {
        let now = self.now;
        self.rt.handle_connected(now, conn);
        self.pump();
    }

    pub fn peer_closed(&mut self, conn: ConnId) {
        let now = self.now;
        self.rt.handle_closed(now, conn);
        self.pump();
    }

    /// Drain and parse every frame transmitted on `conn` since last call.
    pub fn frames(&mut self, conn: ConnId) -> Vec<Envelope> {
        let mut out = Vec::new();
        let mut rest = Vec::new();
        for (c, frame) in self.transmits.drain(..) {
            if c == conn {
                let mut framer = Framer::new(1 << 16);
                framer.input(&frame);
                while let Some(envelope) = framer.next().expect("well-formed outbound frame") {
                    out.push(envelope);
                }
            } else {
                rest.push((c, frame));
            }
        }
        self.transmits = rest;
        out
    }

    /// The single outbound frame of `ty`, with everything else discarded.
    pub fn frame_of_type(&mut self, conn: ConnId, ty: u8) -> Option<Envelope> {
        self.frames(conn).into_iter().find(|e| e.header.ty == ty)
    }

    pub fn events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(event) = self.rt.poll() {
            out.push(event);
        }
        out
    }

    pub fn timer_armed(&self, conn: ConnId, timer: Timer) -> bool {
        self.timers.contains_key(&(conn, timer))
    }
}
