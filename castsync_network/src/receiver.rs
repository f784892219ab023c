//! The network thread of the receiving end.
//!
//! A [`Receiver`] goes through three states:
//!
//! - **Idle**: constructed, nothing running.
//! - **Receiving**: [`start`](Receiver::start) bound a socket and spawned a thread
//!   feeding every packet to a fresh [`StreamSynchronizer`].
//! - **Stopped**: the thread ended, either because [`stop`](Receiver::stop) was
//!   called, the stream ended, or a transport fault occurred.
//!
//! A stopped receiver can be started again, all loop state is rebuilt from scratch.
//! The ring buffer writer and the clock bridge outlive the thread, they are handed
//! back when it ends.

use core::net::{Ipv4Addr, SocketAddr};
use std::{io, thread};

use castsync_clock::{
    bridge::ClockReceiver,
    resample::Resample,
    ring::RingWriter,
    synchronizer::{PacketOutcome, StreamSynchronizer},
    timebase,
};
use castsync_proto::{AudioPacket, Format};
use castsync_utils::CancelToken;

use crate::socket::{self, MulticastSocket};

/// Builds the resampler for a new run of the network thread.
pub type ResamplerFactory<R> = fn(&Format) -> castsync_clock::Result<R>;

/// What the network thread needs, and gives back when it ends.
#[derive(Debug)]
pub struct ReceiverParts {
    pub writer: RingWriter,
    pub clock: ClockReceiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Receiving,
    Stopped,
}

struct Running {
    cancel: CancelToken,
    local_addr: SocketAddr,
    handle: thread::JoinHandle<(ReceiverParts, io::Result<()>)>,
}

pub struct Receiver<R> {
    format: Format,
    addr: Ipv4Addr,
    port: u16,
    make_resampler: ResamplerFactory<R>,
    parts: Option<ReceiverParts>,
    running: Option<Running>,
    started: bool,
}

impl<R: Resample + Send + 'static> Receiver<R> {
    /// Creates an idle receiver for the stream sent to `addr:port`.
    ///
    /// `addr` is normally a multicast group, other addresses are bound to directly.
    pub fn new(
        format: Format,
        addr: Ipv4Addr,
        port: u16,
        parts: ReceiverParts,
        make_resampler: ResamplerFactory<R>,
    ) -> Self {
        Self {
            format,
            addr,
            port,
            make_resampler,
            parts: Some(parts),
            running: None,
            started: false,
        }
    }

    pub fn state(&self) -> ReceiverState {
        match &self.running {
            Some(running) if !running.handle.is_finished() => ReceiverState::Receiving,
            _ if self.started => ReceiverState::Stopped,
            _ => ReceiverState::Idle,
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == ReceiverState::Receiving
    }

    /// The address the socket is bound to, while the thread runs.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Starts receiving, stopping the current run first, if any.
    pub fn start(&mut self) -> io::Result<()> {
        // a fault of the previous run is logged by stop, it doesn't prevent a restart
        let _ = self.stop();

        let parts = self
            .parts
            .take()
            .ok_or_else(|| io::Error::other("receiver state lost by a panicked thread"))?;

        match self.spawn(parts) {
            Ok(running) => {
                log::info!("Receiving on {}", running.local_addr);
                self.running = Some(running);
                self.started = true;
                Ok(())
            }
            Err((parts, e)) => {
                self.parts = parts;
                Err(e)
            }
        }
    }

    fn spawn(&self, parts: ReceiverParts) -> Result<Running, (Option<ReceiverParts>, io::Error)> {
        let resampler = match (self.make_resampler)(&self.format) {
            Ok(r) => r,
            Err(e) => return Err((Some(parts), io::Error::other(e))),
        };

        let cancel = CancelToken::new();

        let socket = socket::bind_receiver(self.addr, self.port)
            .and_then(|sock| MulticastSocket::new(sock, cancel.clone()));

        let socket = match socket {
            Ok(s) => s,
            Err(e) => return Err((Some(parts), e)),
        };

        let local_addr = match socket.socket().local_addr() {
            Ok(addr) => addr,
            Err(e) => return Err((Some(parts), e)),
        };

        let format = self.format;

        let handle = thread::Builder::new()
            .name("castsync-net-rx".into())
            .spawn(move || {
                let sync = StreamSynchronizer::new(
                    format,
                    resampler,
                    parts.writer,
                    parts.clock,
                    timebase::now(),
                );

                let (sync, res) = run(socket, sync, &format);
                let (writer, clock) = sync.into_parts();

                (ReceiverParts { writer, clock }, res)
            })
            .map_err(|e| (None, e))?;

        Ok(Running {
            cancel,
            local_addr,
            handle,
        })
    }

    /// Stops receiving and waits for the network thread to end.
    ///
    /// Returns the transport fault that ended the thread, if any. Does nothing if
    /// the receiver isn't running.
    pub fn stop(&mut self) -> io::Result<()> {
        let Some(Running { cancel, handle, .. }) = self.running.take() else {
            return Ok(());
        };

        cancel.cancel();

        let (parts, res) = handle
            .join()
            .map_err(|_| io::Error::other("network thread panicked"))?;

        self.parts = Some(parts);

        if let Err(e) = &res {
            log::error!("Network thread stopped on a transport fault: {e}");
        }

        res
    }

    /// Gives the parts back, stopping first.
    pub fn into_parts(mut self) -> Option<ReceiverParts> {
        let _ = self.stop();
        self.parts.take()
    }
}

impl<R> Drop for Receiver<R> {
    fn drop(&mut self) {
        if let Some(Running { cancel, handle, .. }) = self.running.take() {
            cancel.cancel();
            let _ = handle.join();
        }
    }
}

fn run<R: Resample>(
    mut socket: MulticastSocket,
    mut sync: StreamSynchronizer<R>,
    format: &Format,
) -> (StreamSynchronizer<R>, io::Result<()>) {
    // one extra byte to notice oversized datagrams
    let mut buf = vec![0; format.packet_bytes() + 1];
    let expected = format.payload_bytes();

    let res = loop {
        let n = match socket.recv(&mut buf) {
            Ok(Some(n)) => n,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let Some(packet) = AudioPacket::parse(&buf[..n]) else {
            log::warn!("Dropping {n} byte datagram, too short for a header");
            continue;
        };

        if packet.payload.len() != expected {
            log::warn!(
                "Dropping packet {}: {} payload bytes, expected {expected}",
                packet.timestamp,
                packet.payload.len(),
            );
            continue;
        }

        if let PacketOutcome::BadPayload { n_samples } = sync.on_packet(timebase::now(), packet) {
            log::warn!("Dropping packet with {n_samples} samples");
        }
    };

    log::debug!("Network thread exiting");

    (sync, res)
}
