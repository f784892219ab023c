//! The network thread of the sending end.
//!
//! Packets are pre-allocated in a pool. The capture thread takes an empty one with
//! [`PacketSink::take`], fills it, and queues it with [`PacketSink::send`], which
//! also wakes the transmitter thread up. The transmitter sends every queued packet
//! to the stream's destination and returns it to the pool, then parks until it is
//! woken up again.

use core::{net::SocketAddr, time::Duration};
use std::{io, net::UdpSocket, thread};

use castsync_proto::{Format, PacketBuf};
use castsync_utils::{
    CancelToken,
    pool::{self, Checkout, Returner},
};

/// Number of packets in flight between the capture and transmitter threads.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Upper bound on how long the transmitter sleeps without being woken up.
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

/// The capture thread's end of the transmitter.
#[derive(Debug)]
pub struct PacketSink {
    pool: Checkout<PacketBuf>,
    queue: rtrb::Producer<PacketBuf>,
    transmitter: thread::Thread,
    exhausted: bool,
}

impl PacketSink {
    /// Takes an empty packet from the pool, never blocks.
    ///
    /// Returns `None` if all packets are in flight. This is logged once until a
    /// packet is available again.
    #[inline]
    pub fn take(&mut self) -> Option<PacketBuf> {
        let packet = self.pool.take();

        match packet {
            Some(_) => self.exhausted = false,
            None if !core::mem::replace(&mut self.exhausted, true) => {
                log::warn!("Out of packet buffers, dropping audio");
            }
            None => {}
        }

        packet
    }

    /// Queues a filled packet for sending and wakes the transmitter.
    ///
    /// The queue holds as many packets as the pool, so this only fails for a packet
    /// that wasn't taken from it, which is handed back.
    #[inline]
    pub fn send(&mut self, packet: PacketBuf) -> Result<(), PacketBuf> {
        let res = self
            .queue
            .push(packet)
            .map_err(|rtrb::PushError::Full(packet)| packet);
        self.transmitter.unpark();
        res
    }

    /// Number of empty packets currently in the pool.
    #[inline(always)]
    pub fn available(&self) -> usize {
        self.pool.available()
    }
}

#[derive(Debug)]
pub struct Transmitter {
    cancel: CancelToken,
    handle: thread::JoinHandle<()>,
}

impl Transmitter {
    /// Spawns the transmitter thread, sending packets of the given format from
    /// `socket` to `dest`.
    pub fn start(
        format: &Format,
        socket: UdpSocket,
        dest: SocketAddr,
        pool_size: usize,
    ) -> io::Result<(Self, PacketSink)> {
        let (checkout, returner) =
            pool::pool((0..pool_size).map(|_| PacketBuf::for_format(format)));
        let (queue_tx, queue_rx) = rtrb::RingBuffer::new(pool_size.max(1));

        let cancel = CancelToken::new();

        let handle = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("castsync-net-tx".into())
                .spawn(move || run(socket, dest, queue_rx, returner, cancel))?
        };

        log::info!("Sending {} byte packets to {dest}", format.packet_bytes());

        let sink = PacketSink {
            pool: checkout,
            queue: queue_tx,
            transmitter: handle.thread().clone(),
            exhausted: false,
        };

        Ok((Self { cancel, handle }, sink))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the thread, dropping any packet still queued.
    pub fn stop(self) {
        self.cancel.cancel();
        self.handle.thread().unpark();

        if self.handle.join().is_err() {
            log::error!("Transmitter thread panicked");
        }
    }
}

fn run(
    socket: UdpSocket,
    dest: SocketAddr,
    mut queue: rtrb::Consumer<PacketBuf>,
    mut returner: Returner<PacketBuf>,
    cancel: CancelToken,
) {
    while !cancel.is_cancelled() {
        while let Ok(packet) = queue.pop() {
            let bytes = packet.as_bytes();

            match socket.send_to(bytes, dest) {
                Ok(n) if n == bytes.len() => {}
                Ok(n) => log::warn!("Sent {n} bytes of a {} byte packet", bytes.len()),
                Err(e) => log::warn!("Failed to send packet {}: {e}", packet.timestamp()),
            }

            if returner.give_back(packet).is_err() {
                log::error!("Packet pool overflow, a packet was lost");
            }
        }

        thread::park_timeout(PARK_TIMEOUT);
    }

    log::debug!("Transmitter thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use castsync_proto::AudioPacket;
    use core::net::Ipv4Addr;
    use std::time::Instant;

    fn loopback() -> (UdpSocket, UdpSocket) {
        let rx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        rx.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let tx = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        (rx, tx)
    }

    #[test]
    fn packets_are_sent_and_recycled() {
        let format = Format::standard();
        let (rx, tx) = loopback();
        let dest = rx.local_addr().unwrap();

        let (transmitter, mut sink) =
            Transmitter::start(&format, tx, dest, DEFAULT_POOL_SIZE).unwrap();
        assert!(transmitter.is_running());

        let mut buf = vec![0; 1500];
        for timestamp in (0..20u32).map(|n| n * 48) {
            let mut packet = sink.take().unwrap();
            packet.set_timestamp(timestamp);
            packet.encode_samples(core::iter::repeat(timestamp as i16));
            sink.send(packet).unwrap();

            let n = rx.recv(&mut buf).unwrap();
            assert_eq!(n, format.packet_bytes());

            let received = AudioPacket::parse(&buf[..n]).unwrap();
            assert_eq!(received.timestamp, timestamp);
        }

        let start = Instant::now();
        while sink.available() < DEFAULT_POOL_SIZE && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sink.available(), DEFAULT_POOL_SIZE);

        transmitter.stop();
    }

    #[test]
    fn pool_exhaustion_is_reported_not_fatal() {
        let format = Format::standard();
        let (rx, tx) = loopback();

        let (transmitter, mut sink) =
            Transmitter::start(&format, tx, rx.local_addr().unwrap(), 2).unwrap();

        let a = sink.take().unwrap();
        let b = sink.take().unwrap();
        assert!(sink.take().is_none());
        assert!(sink.take().is_none());

        sink.send(a).unwrap();
        sink.send(b).unwrap();

        let start = Instant::now();
        while sink.available() < 2 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(sink.take().is_some());

        transmitter.stop();
    }

    #[test]
    fn foreign_packets_are_handed_back_when_the_queue_is_full() {
        let format = Format::standard();
        let (rx, tx) = loopback();

        let (transmitter, mut sink) =
            Transmitter::start(&format, tx, rx.local_addr().unwrap(), 1).unwrap();
        transmitter.stop();

        // nobody drains the queue anymore
        sink.send(PacketBuf::for_format(&format)).unwrap();
        assert!(sink.send(PacketBuf::for_format(&format)).is_err());
    }
}
