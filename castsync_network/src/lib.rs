//! UDP multicast transport for castsync audio streams.
//!
//! This crate moves packets between the audio threads and the network. It knows the
//! wire format defined in `castsync_proto`, and hands received packets to the
//! clock recovery loop of `castsync_clock`, but leaves everything related to audio
//! devices to its callers.
//!
//! - [`socket`]: socket construction, multicast group membership, and a cancellable
//!   blocking receive.
//! - [`receiver`]: the network thread of the receiving end.
//! - [`transmitter`]: the network thread of the sending end.

pub mod receiver;
pub mod socket;
pub mod transmitter;

pub use castsync_clock as clock;
pub use castsync_proto as proto;
pub use castsync_utils as utils;

/// Multicast group streams are sent to, unless configured otherwise.
pub const DEFAULT_GROUP: core::net::Ipv4Addr = core::net::Ipv4Addr::new(224, 1, 2, 3);

/// UDP port streams are sent to, unless configured otherwise.
pub const DEFAULT_PORT: u16 = 23776;

/// Returns `true` if the given I/O error kind represents a timeout condition.
///
/// This treats both `WouldBlock` and `TimedOut` as timeout-equivalent, platforms
/// disagree on which one a socket read timeout produces.
#[inline(always)]
pub(crate) fn io_err_is_timeout(e: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    [WouldBlock, TimedOut].contains(&e)
}
