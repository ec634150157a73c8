//! Test harness for DuckovNet integration tests
//!
//! * [`SimulatedLink`] drives two ARQ engines against each other on a virtual
//!   clock, with a pluggable per-datagram fault filter.
//! * [`LossyRelay`] is a real UDP proxy that can rewrite or drop datagrams on
//!   their way from a client to a server.

pub mod link;
pub mod relay;

pub use link::{Direction, SimulatedLink, Verdict};
pub use relay::{strip_push_once, LossyRelay};
