//! Sockets, and a blocking receive that can be interrupted from another thread.

use core::{net::Ipv4Addr, time::Duration};
use std::{io, net::UdpSocket};

use castsync_utils::{CancelToken, StallTimer};

/// How long a blocking receive waits before checking for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time without any packet after which a stream is reported as stalled.
pub const STALL_WARNING: Duration = Duration::from_secs(1);

/// Creates a socket receiving the datagrams sent to `group:port`.
///
/// The socket is bound to `0.0.0.0:port` and joins `group` on the default
/// interface.
pub fn multicast_receiver(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    sock.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;

    log::debug!("Joined multicast group {group} on port {port}");

    Ok(sock)
}

/// Creates a socket receiving the datagrams sent to `addr:port`, joining the group
/// if `addr` is a multicast address, or binding to it otherwise.
pub fn bind_receiver(addr: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    if addr.is_multicast() {
        multicast_receiver(addr, port)
    } else {
        UdpSocket::bind((addr, port))
    }
}

/// Creates a socket for sending to multicast groups, on an ephemeral port.
///
/// Datagrams are looped back, so that a receiver on the same host hears them.
pub fn multicast_sender(ttl: u32) -> io::Result<UdpSocket> {
    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    sock.set_multicast_ttl_v4(ttl)?;
    sock.set_multicast_loop_v4(true)?;
    Ok(sock)
}

/// A receiving socket whose blocking [`recv`](Self::recv) returns when a
/// [`CancelToken`] is cancelled.
#[derive(Debug)]
pub struct MulticastSocket {
    sock: UdpSocket,
    cancel: CancelToken,
    stall: StallTimer,
    stalled: bool,
}

impl MulticastSocket {
    pub fn new(sock: UdpSocket, cancel: CancelToken) -> io::Result<Self> {
        sock.set_read_timeout(Some(POLL_INTERVAL))?;

        Ok(Self {
            sock,
            cancel,
            stall: StallTimer::new(),
            // no warning before the first packet
            stalled: true,
        })
    }

    #[inline(always)]
    pub fn socket(&self) -> &UdpSocket {
        &self.sock
    }

    #[inline(always)]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Blocks until a datagram is received into `buf`, returning its length.
    ///
    /// Returns `Ok(None)` once the token is cancelled, or when a zero-length
    /// datagram is received, both of which mean the stream is over. Any error
    /// other than the internal polling timeout is returned as is.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            match self.sock.recv(buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    if core::mem::take(&mut self.stalled) {
                        log::info!("Receiving packets");
                    }
                    self.stall.reset();
                    return Ok(Some(n));
                }
                Err(e) if crate::io_err_is_timeout(e.kind()) => {
                    if !self.stalled && self.stall.elapsed() > STALL_WARNING {
                        log::warn!("No packet received for {:?}", self.stall.elapsed());
                        self.stalled = true;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback_pair() -> (MulticastSocket, UdpSocket) {
        let rx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        tx.connect(rx.local_addr().unwrap()).unwrap();
        (MulticastSocket::new(rx, CancelToken::new()).unwrap(), tx)
    }

    #[test]
    fn receives_datagrams() {
        let (mut rx, tx) = loopback_pair();
        tx.send(&[1, 2, 3]).unwrap();

        let mut buf = [0; 16];
        assert_eq!(rx.recv(&mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn empty_datagram_ends_the_stream() {
        let (mut rx, tx) = loopback_pair();
        tx.send(&[]).unwrap();

        let mut buf = [0; 16];
        assert_eq!(rx.recv(&mut buf).unwrap(), None);
    }

    #[test]
    fn cancellation_unblocks_promptly() {
        let (mut rx, _tx) = loopback_pair();
        let cancel = rx.cancel_token().clone();

        let handle = std::thread::spawn(move || {
            let mut buf = [0; 16];
            rx.recv(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(50));
        let cancelled_at = Instant::now();
        cancel.cancel();

        assert_eq!(handle.join().unwrap().unwrap(), None);
        assert!(cancelled_at.elapsed() < POLL_INTERVAL * 5);
    }

    #[test]
    fn already_cancelled_returns_immediately() {
        let (mut rx, tx) = loopback_pair();
        tx.send(&[1]).unwrap();
        rx.cancel_token().cancel();

        let mut buf = [0; 16];
        assert_eq!(rx.recv(&mut buf).unwrap(), None);
    }

    #[test]
    fn unicast_addresses_are_bound_directly() {
        let sock = bind_receiver(Ipv4Addr::LOCALHOST, 0).unwrap();
        assert_eq!(sock.local_addr().unwrap().ip(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn sender_socket_is_configured() {
        let sock = multicast_sender(3).unwrap();
        assert_eq!(sock.multicast_ttl_v4().unwrap(), 3);
        assert!(sock.multicast_loop_v4().unwrap());
    }
}
