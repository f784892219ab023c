//! Hand-off of the audio output clock to the network thread.
//!
//! Once per playback period, the audio output thread publishes an
//! [`AudioClockSample`] through a small wait-free SPSC queue, and raises a
//! `streaming` flag the first time it does so. The network thread drains the queue
//! without blocking and ignores incoming packets until the flag is up.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Default number of clock samples the bridge can hold.
pub const DEFAULT_CAPACITY: usize = 10;

/// One observation of the audio output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioClockSample {
    /// Estimated wall clock time at which the next playback period starts.
    pub t1: f64,
    /// Frames played since the previous sample.
    pub k1: u32,
}

/// The audio output thread's half of the bridge.
#[derive(Debug)]
pub struct ClockSender {
    tx: rtrb::Producer<AudioClockSample>,
    streaming: Arc<AtomicBool>,
}

/// The network thread's half of the bridge.
#[derive(Debug)]
pub struct ClockReceiver {
    rx: rtrb::Consumer<AudioClockSample>,
    streaming: Arc<AtomicBool>,
}

/// Creates a bridge holding at most `capacity` pending samples.
pub fn audio_clock_bridge(capacity: usize) -> (ClockSender, ClockReceiver) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity);
    let streaming = Arc::new(AtomicBool::new(false));

    (
        ClockSender {
            tx,
            streaming: Arc::clone(&streaming),
        },
        ClockReceiver { rx, streaming },
    )
}

impl ClockSender {
    /// Publishes a clock sample, never blocks.
    ///
    /// Returns `false` if the queue is full (the network thread has stalled), in
    /// which case the sample is dropped.
    #[inline]
    pub fn push(&mut self, sample: AudioClockSample) -> bool {
        self.tx.push(sample).is_ok()
    }

    /// Signals that playback has started. Idempotent.
    #[inline(always)]
    pub fn set_streaming(&self) {
        // a stale read on the other side only delays synchronization by a packet
        self.streaming.store(true, Ordering::Relaxed);
    }
}

impl ClockReceiver {
    #[inline(always)]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    /// Dequeues the oldest pending sample, if any, never blocks.
    #[inline(always)]
    pub fn try_recv(&mut self) -> Option<AudioClockSample> {
        self.rx.pop().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_arrive_in_order() {
        let (mut tx, mut rx) = audio_clock_bridge(DEFAULT_CAPACITY);
        assert_eq!(rx.try_recv(), None);

        assert!(tx.push(AudioClockSample { t1: 1., k1: 48 }));
        assert!(tx.push(AudioClockSample { t1: 2., k1: 47 }));

        assert_eq!(rx.try_recv(), Some(AudioClockSample { t1: 1., k1: 48 }));
        assert_eq!(rx.try_recv(), Some(AudioClockSample { t1: 2., k1: 47 }));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn full_queue_drops() {
        let (mut tx, mut rx) = audio_clock_bridge(2);
        let sample = AudioClockSample { t1: 0., k1: 1 };

        assert!(tx.push(sample));
        assert!(tx.push(sample));
        assert!(!tx.push(sample));

        rx.try_recv();
        assert!(tx.push(sample));
    }

    #[test]
    fn streaming_flag_is_shared() {
        let (tx, rx) = audio_clock_bridge(DEFAULT_CAPACITY);
        assert!(!rx.is_streaming());

        tx.set_streaming();
        tx.set_streaming();
        assert!(rx.is_streaming());
    }
}
