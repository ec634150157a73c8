//! Virtual-time link between two ARQ engines

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver};
use duckov_protocol::{Kcp, KcpConfig, KcpError};

/// Which engine produced a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AToB,
    BToA,
}

/// What the link does with one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop,
    /// Deliver twice
    Duplicate,
    /// Deliver after this many extra milliseconds
    Delay(u32),
}

type Filter = Box<dyn FnMut(Direction, &[u8]) -> Verdict>;

struct InFlight {
    deliver_at: u32,
    direction: Direction,
    datagram: Vec<u8>,
}

/// Two engines connected by a simulated network
pub struct SimulatedLink {
    pub a: Kcp,
    pub b: Kcp,
    a_out: Receiver<Vec<u8>>,
    b_out: Receiver<Vec<u8>>,
    in_flight: Vec<InFlight>,
    filter: Filter,
    /// Current virtual time (ms)
    pub now: u32,
    /// Clock step per [`step`](Self::step)
    pub tick: u32,
    /// One-way delay (ms)
    pub latency: u32,
    pub dropped: usize,
    pub delivered: usize,
    pub input_errors: usize,
}

impl SimulatedLink {
    pub fn new(config: &KcpConfig) -> Result<Self, KcpError> {
        let (a_tx, a_out) = unbounded();
        let (b_tx, b_out) = unbounded();
        let a = Kcp::with_config(1, config, move |d: &[u8]| {
            let _ = a_tx.send(d.to_vec());
        })?;
        let b = Kcp::with_config(1, config, move |d: &[u8]| {
            let _ = b_tx.send(d.to_vec());
        })?;

        Ok(SimulatedLink {
            a,
            b,
            a_out,
            b_out,
            in_flight: Vec::new(),
            filter: Box::new(|_, _| Verdict::Deliver),
            now: 1_000,
            tick: 10,
            latency: 5,
            dropped: 0,
            delivered: 0,
            input_errors: 0,
        })
    }

    /// Install a fault filter
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: FnMut(Direction, &[u8]) -> Verdict + 'static,
    {
        self.filter = Box::new(filter);
        self
    }

    /// Update both engines, move datagrams, advance the clock by one tick
    pub fn step(&mut self) {
        self.a.update(self.now);
        self.b.update(self.now);
        self.collect();
        self.deliver_due();
        self.now = self.now.wrapping_add(self.tick);
    }

    pub fn run_for(&mut self, ms: u32) {
        let tick = self.tick.max(1);
        let steps = (ms + tick - 1) / tick;
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until `done` returns true or `max_ms` elapse; returns whether it finished
    pub fn run_until<F>(&mut self, max_ms: u32, mut done: F) -> bool
    where
        F: FnMut(&mut Self) -> bool,
    {
        let start = self.now;
        while self.now.wrapping_sub(start) < max_ms {
            self.step();
            if done(self) {
                return true;
            }
        }
        false
    }

    /// Every complete message currently readable at `b`
    pub fn recv_all_b(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(message) = self.b.recv_bytes() {
            out.push(message);
        }
        out
    }

    fn collect(&mut self) {
        let outputs: Vec<(Direction, Vec<u8>)> = self
            .a_out
            .try_iter()
            .map(|d| (Direction::AToB, d))
            .chain(self.b_out.try_iter().map(|d| (Direction::BToA, d)))
            .collect();

        for (direction, datagram) in outputs {
            let deliver_at = self.now.wrapping_add(self.latency);
            match (self.filter)(direction, &datagram) {
                Verdict::Deliver => self.in_flight.push(InFlight {
                    deliver_at,
                    direction,
                    datagram,
                }),
                Verdict::Drop => self.dropped += 1,
                Verdict::Duplicate => {
                    self.in_flight.push(InFlight {
                        deliver_at,
                        direction,
                        datagram: datagram.clone(),
                    });
                    self.in_flight.push(InFlight {
                        deliver_at: deliver_at.wrapping_add(1),
                        direction,
                        datagram,
                    });
                }
                Verdict::Delay(extra) => self.in_flight.push(InFlight {
                    deliver_at: deliver_at.wrapping_add(extra),
                    direction,
                    datagram,
                }),
            }
        }
    }

    fn deliver_due(&mut self) {
        let now = self.now;
        let mut due = Vec::new();
        self.in_flight.retain_mut(|packet| {
            if (now.wrapping_sub(packet.deliver_at) as i32) >= 0 {
                due.push((
                    packet.deliver_at,
                    packet.direction,
                    std::mem::take(&mut packet.datagram),
                ));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|(at, _, _)| *at);

        for (_, direction, datagram) in due {
            let target = match direction {
                Direction::AToB => &mut self.b,
                Direction::BToA => &mut self.a,
            };
            if target.input(&datagram).is_err() {
                self.input_errors += 1;
            }
            self.delivered += 1;
        }
    }
}
