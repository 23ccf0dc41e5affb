use embedded_hal::delay::DelayNs;
use embedded_hal_nb::serial::Read;
use embedded_io::Write;
use heapless::Vec;
use log::{debug, trace, warn};

use crate::frame::{
    FrameError, MAX_FRAME_LEN, MIN_FRAME_LEN, PAYLOAD_CAPACITY, RawFrame, START_MARK, Value,
};
use crate::serial::RxBuffer;
use crate::{Decode, Encode};

/// Start/stop-listening signal: a degenerate frame only the remote engine
/// decodes. Never produced or accepted by the frame codec itself.
pub const LISTEN_SIGNAL: [u8; 8] = [255, 255, 255, 255, 0, 0, 0, 0];

/// Receive-side tuning. The right values depend on the transport's
/// throughput, so neither is hardcoded.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Wait this long (microseconds) after the first byte of a burst so the
    /// rest of the datagram can arrive before parsing. Zero disables the
    /// wait entirely.
    pub grace_delay_us: u32,
    /// Cap on bytes discarded per poll while hunting for a start mark.
    /// `None` scans everything that was buffered when the poll began.
    pub scan_budget: Option<usize>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        // 100 ms suits a 9600 baud line; faster links can shrink it.
        LinkConfig {
            grace_delay_us: 100_000,
            scan_budget: None,
        }
    }
}

#[derive(Debug)]
pub enum SendError<E> {
    Frame(FrameError),
    Transport(E),
}

impl<E> From<FrameError> for SendError<E> {
    fn from(value: FrameError) -> Self {
        SendError::Frame(value)
    }
}

/// Transmit half: frames typed values onto the wire in order, unbuffered.
pub struct Sender<Tx: Write> {
    tx: Tx,
}

impl<Tx: Write> Sender<Tx> {
    pub fn new(tx: Tx) -> Sender<Tx> {
        Sender { tx }
    }

    /// Frame `value` and write every byte out in order.
    pub fn send(&mut self, value: &Value) -> Result<(), SendError<Tx::Error>> {
        let mut buf = [0; MAX_FRAME_LEN];
        let len = value.encode(&mut buf)?;
        self.tx.write_all(&buf[..len]).map_err(SendError::Transport)
    }

    pub fn send_byte(&mut self, b: u8) -> Result<(), SendError<Tx::Error>> {
        self.send(&Value::Byte(b))
    }

    pub fn send_char(&mut self, c: char) -> Result<(), SendError<Tx::Error>> {
        self.send(&Value::Char(c))
    }

    pub fn send_int(&mut self, n: i16) -> Result<(), SendError<Tx::Error>> {
        self.send(&Value::Int(n))
    }

    /// Send text, truncated to the frame payload capacity.
    pub fn send_str(&mut self, s: &str) -> Result<(), SendError<Tx::Error>> {
        self.send(&Value::text(s))
    }

    /// Ask the remote engine to start or stop listening. The signal sits
    /// outside the frame protocol and is decoded only by the engine.
    pub fn toggle_listening(&mut self) -> Result<(), SendError<Tx::Error>> {
        self.tx
            .write_all(&LISTEN_SIGNAL)
            .map_err(SendError::Transport)
    }

    pub fn release(self) -> Tx {
        self.tx
    }
}

/// Receive half: scans the serial stream for frames and tracks the engine
/// status the remote end reports.
///
/// Designed for a single-threaded poll loop. `poll` never blocks beyond
/// the configured grace delay and does a bounded amount of scanning per
/// call, so a noisy transport cannot stall the caller.
pub struct Receiver<Rx: Read, D: DelayNs> {
    rx: RxBuffer<Rx>,
    delay: D,
    config: LinkConfig,
    payload: Vec<u8, PAYLOAD_CAPACITY>,
    engine_running: bool,
}

impl<Rx: Read, D: DelayNs> Receiver<Rx, D> {
    pub fn new(rx: Rx, delay: D) -> Receiver<Rx, D> {
        Receiver::with_config(rx, delay, LinkConfig::default())
    }

    pub fn with_config(rx: Rx, delay: D, config: LinkConfig) -> Receiver<Rx, D> {
        Receiver {
            rx: RxBuffer::new(rx),
            delay,
            config,
            payload: Vec::new(),
            engine_running: false,
        }
    }

    /// Whether the last status frame reported the engine as running.
    /// Starts out stopped.
    pub fn engine_running(&self) -> bool {
        self.engine_running
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Bytes currently buffered ahead of the scanner.
    pub fn buffered(&self) -> usize {
        self.rx.available()
    }

    /// One decode step.
    ///
    /// Returns the decoded value when a complete valid frame was consumed
    /// this call, `None` otherwise: nothing buffered, not enough bytes for
    /// a frame, corrupted framing, or a frame that carries no value. The
    /// caller is expected to invoke this repeatedly from its control loop.
    pub fn poll(&mut self) -> Option<Value> {
        if let Err(e) = self.rx.fill() {
            warn!("transport read error: {:?}", e);
        }
        if self.rx.available() == 0 {
            return None;
        }
        // Give the tail of the datagram a chance to arrive before parsing.
        if self.config.grace_delay_us > 0 {
            self.delay.delay_us(self.config.grace_delay_us);
            let _ = self.rx.fill();
        }
        let entry_available = self.rx.available();

        if entry_available >= MIN_FRAME_LEN && self.rx.peek() == Some(START_MARK) {
            match self.take_frame() {
                Ok(value) => {
                    if let Some(Value::Status(running)) = &value {
                        self.engine_running = *running;
                    }
                    return value;
                }
                Err(FrameError::Truncated { .. }) => {
                    // The declared payload runs past what has arrived. The
                    // rest of the datagram is unrecoverable; drop it all.
                    debug!(
                        "truncated frame, dropping {} buffered bytes",
                        self.rx.available()
                    );
                    self.rx.clear();
                    return None;
                }
                Err(FrameError::MissingEndMark { index, found }) => {
                    // The candidate occupied index + 1 bytes. Toss it whole
                    // so the scan below hunts in what follows instead of
                    // re-hitting the same bad frame every call.
                    debug!("bad end mark {} at offset {}", found, index);
                    self.rx.discard(index + 1);
                    self.resync(entry_available.saturating_sub(index + 1));
                    return None;
                }
                Err(e) => {
                    debug!("rejecting candidate frame: {:?}", e);
                }
            }
        }
        self.resync(entry_available);
        None
    }

    /// Parse and consume the frame candidate at the head of the queue.
    ///
    /// On success the queue has advanced past the frame and its payload
    /// sits in the staging buffer; dispatch may still produce no value
    /// (reserved or unknown tag, empty payload).
    fn take_frame(&mut self) -> Result<Option<Value>, FrameError> {
        let (tag, wire_len, staged) = {
            let frame = RawFrame::decode(self.rx.slice())?;
            self.payload.clear();
            let staged = self.payload.extend_from_slice(frame.payload).is_ok();
            (frame.tag, frame.wire_len(), staged)
        };
        // Framing was valid either way, so the frame is consumed whole.
        self.rx.discard(wire_len);
        if !staged {
            warn!(
                "dropping frame: declared length {} exceeds the {} byte receive buffer",
                wire_len - 4,
                PAYLOAD_CAPACITY
            );
            return Ok(None);
        }
        let value = Value::from_payload(tag, &self.payload);
        trace!("consumed frame: tag {} length {}", tag, self.payload.len());
        Ok(value)
    }

    /// Discard noise until a start mark with enough bytes behind it sits at
    /// the head of the queue, or the per-call byte budget runs out. The
    /// mark itself is left for the next poll.
    fn resync(&mut self, entry_available: usize) {
        let mut budget = match self.config.scan_budget {
            Some(limit) => entry_available.min(limit),
            None => entry_available,
        };
        let mut discarded = 0usize;
        while budget > 0 {
            match self.rx.peek() {
                Some(START_MARK) if self.rx.available() >= MIN_FRAME_LEN => break,
                Some(_) => {
                    let _ = self.rx.take();
                    discarded += 1;
                }
                None => break,
            }
            budget -= 1;
        }
        if discarded > 0 {
            debug!("resync discarded {} bytes", discarded);
        }
    }

    pub fn release(self) -> Rx {
        self.rx.release()
    }
}

/// Both protocol halves over one duplex serial port.
pub struct Link<Tx: Write, Rx: Read, D: DelayNs> {
    sender: Sender<Tx>,
    receiver: Receiver<Rx, D>,
}

impl<Tx: Write, Rx: Read, D: DelayNs> Link<Tx, Rx, D> {
    pub fn new(tx: Tx, rx: Rx, delay: D) -> Link<Tx, Rx, D> {
        Link::with_config(tx, rx, delay, LinkConfig::default())
    }

    pub fn with_config(tx: Tx, rx: Rx, delay: D, config: LinkConfig) -> Link<Tx, Rx, D> {
        Link {
            sender: Sender::new(tx),
            receiver: Receiver::with_config(rx, delay, config),
        }
    }

    pub fn poll(&mut self) -> Option<Value> {
        self.receiver.poll()
    }

    pub fn send(&mut self, value: &Value) -> Result<(), SendError<Tx::Error>> {
        self.sender.send(value)
    }

    pub fn toggle_listening(&mut self) -> Result<(), SendError<Tx::Error>> {
        self.sender.toggle_listening()
    }

    pub fn engine_running(&self) -> bool {
        self.receiver.engine_running()
    }

    pub fn split(self) -> (Sender<Tx>, Receiver<Rx, D>) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;

    use alloc::collections::VecDeque;
    use alloc::vec::Vec;
    use core::convert::Infallible;

    use embedded_hal_nb::serial::{ErrorType, Read};

    use super::*;

    struct StubSerial(VecDeque<u8>);

    impl StubSerial {
        fn from_bytes(data: &[u8]) -> StubSerial {
            StubSerial(data.iter().copied().collect())
        }
    }

    impl ErrorType for StubSerial {
        type Error = Infallible;
    }

    impl Read for StubSerial {
        fn read(&mut self) -> nb::Result<u8, Self::Error> {
            self.0.pop_front().ok_or(nb::Error::WouldBlock)
        }
    }

    struct TxSink(Vec<u8>);

    impl embedded_io::ErrorType for TxSink {
        type Error = Infallible;
    }

    impl embedded_io::Write for TxSink {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Fails the test if the grace period runs at all.
    struct PanicDelay;

    impl DelayNs for PanicDelay {
        fn delay_ns(&mut self, _ns: u32) {
            panic!("grace delay must not run when disabled");
        }
    }

    fn no_grace() -> LinkConfig {
        LinkConfig {
            grace_delay_us: 0,
            scan_budget: None,
        }
    }

    fn receiver(stream: &[u8]) -> Receiver<StubSerial, NoDelay> {
        Receiver::with_config(StubSerial::from_bytes(stream), NoDelay, no_grace())
    }

    #[test]
    fn poll_on_empty_stream_is_none() {
        let mut rx = receiver(&[]);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn decodes_int_frame() {
        let mut rx = receiver(&[1, 2, 2, 44, 1, 4]);
        assert_eq!(rx.poll(), Some(Value::Int(300)));
        assert_eq!(rx.buffered(), 0);
        assert_eq!(rx.poll(), None);
    }

    #[test]
    fn decodes_str_frame() {
        let mut rx = receiver(&[1, 4, 2, 72, 105, 4]);
        assert_eq!(rx.poll(), Some(Value::text("Hi")));
    }

    #[test]
    fn resync_skips_leading_noise() {
        let mut rx = receiver(&[9, 9, 1, 2, 2, 44, 1, 4]);
        // First poll discards the noise and stops at the start mark.
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.poll(), Some(Value::Int(300)));
    }

    #[test]
    fn short_stream_never_decodes() {
        let mut rx = receiver(&[1, 2, 2, 44]);
        for _ in 0..4 {
            assert_eq!(rx.poll(), None);
        }
        assert_eq!(rx.buffered(), 0);
    }

    #[test]
    fn declared_length_past_stream_never_decodes() {
        let mut rx = receiver(&[1, 4, 10, 1, 2, 3]);
        assert_eq!(rx.poll(), None);
        // The partial datagram is unrecoverable and fully dropped.
        assert_eq!(rx.buffered(), 0);
    }

    #[test]
    fn bad_end_mark_drops_frame_but_not_the_next_one() {
        let mut rx = receiver(&[1, 2, 2, 44, 1, 9, 1, 4, 2, 72, 105, 4]);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.poll(), Some(Value::text("Hi")));
    }

    #[test]
    fn status_frames_drive_engine_state() {
        let mut rx = receiver(&[1, 255, 1, 1, 4, 1, 255, 1, 0, 4]);
        assert!(!rx.engine_running());
        assert_eq!(rx.poll(), Some(Value::Status(true)));
        assert!(rx.engine_running());
        assert_eq!(rx.poll(), Some(Value::Status(false)));
        assert!(!rx.engine_running());
    }

    #[test]
    fn zero_tag_frame_is_consumed_without_touching_state() {
        let mut rx = receiver(&[1, 255, 1, 1, 4, 1, 0, 1, 1, 4]);
        assert_eq!(rx.poll(), Some(Value::Status(true)));
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.buffered(), 0);
        assert!(rx.engine_running());
    }

    #[test]
    fn unknown_tag_frame_is_consumed_without_a_value() {
        let mut rx = receiver(&[1, 9, 1, 42, 4]);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.buffered(), 0);
    }

    #[test]
    fn zero_length_frame_is_consumed_without_a_value() {
        let mut rx = receiver(&[1, 4, 0, 4, 1, 2, 2, 44, 1, 4]);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.poll(), Some(Value::Int(300)));
    }

    #[test]
    fn oversized_declared_length_drops_only_that_frame() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&[1, 4, 65]);
        stream.extend_from_slice(&[b'x'; 65]);
        stream.push(4);
        stream.extend_from_slice(&[1, 3, 1, 7, 4]);
        let mut rx = receiver(&stream);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.poll(), Some(Value::Byte(7)));
    }

    #[test]
    fn scan_budget_bounds_work_per_poll() {
        let config = LinkConfig {
            grace_delay_us: 0,
            scan_budget: Some(2),
        };
        let stream = [9, 9, 9, 9, 1, 2, 2, 44, 1, 4];
        let mut rx = Receiver::with_config(StubSerial::from_bytes(&stream), NoDelay, config);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.buffered(), 8);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.buffered(), 6);
        assert_eq!(rx.poll(), Some(Value::Int(300)));
    }

    #[test]
    fn disabled_grace_delay_never_waits() {
        let mut rx = Receiver::with_config(
            StubSerial::from_bytes(&[1, 2, 2, 44, 1, 4]),
            PanicDelay,
            no_grace(),
        );
        assert_eq!(rx.poll(), Some(Value::Int(300)));
    }

    #[test]
    fn default_config_polls_through_the_grace_delay() {
        let mut rx = Receiver::new(StubSerial::from_bytes(&[1, 2, 2, 44, 1, 4]), NoDelay);
        assert_eq!(rx.poll(), Some(Value::Int(300)));
    }

    #[test]
    fn partial_frame_is_destroyed_not_completed() {
        let mut rx = receiver(&[1, 2, 2]);
        assert_eq!(rx.poll(), None);
        assert_eq!(rx.buffered(), 0);
        // The tail arriving later is noise now, then a fresh frame decodes.
        rx.feed(&[44, 1, 4]);
        assert_eq!(rx.poll(), None);
        rx.feed(&[1, 2, 2, 44, 1, 4]);
        assert_eq!(rx.poll(), Some(Value::Int(300)));
    }

    impl Receiver<StubSerial, NoDelay> {
        fn feed(&mut self, data: &[u8]) {
            for &b in data {
                self.rx_stub().0.push_back(b);
            }
        }

        fn rx_stub(&mut self) -> &mut StubSerial {
            // Test-only reach-through to the mock transport.
            self.rx.raw_mut()
        }
    }

    #[test]
    fn sender_frames_int() {
        let mut tx = Sender::new(TxSink(Vec::new()));
        tx.send_int(300).unwrap();
        assert_eq!(tx.release().0, &[1, 2, 2, 44, 1, 4]);
    }

    #[test]
    fn sender_frames_str() {
        let mut tx = Sender::new(TxSink(Vec::new()));
        tx.send_str("Hi").unwrap();
        assert_eq!(tx.release().0, &[1, 4, 2, 72, 105, 4]);
    }

    #[test]
    fn sender_frames_byte_char_command_status() {
        let mut tx = Sender::new(TxSink(Vec::new()));
        tx.send_byte(0xAB).unwrap();
        tx.send_char('x').unwrap();
        tx.send(&Value::Command(9)).unwrap();
        tx.send(&Value::Status(true)).unwrap();
        assert_eq!(
            tx.release().0,
            &[1, 3, 1, 0xAB, 4, 1, 1, 1, b'x', 4, 1, 254, 1, 9, 4, 1, 255, 1, 1, 4]
        );
    }

    #[test]
    fn listen_signal_is_the_fixed_pattern() {
        let mut tx = Sender::new(TxSink(Vec::new()));
        tx.toggle_listening().unwrap();
        assert_eq!(tx.release().0, &[255, 255, 255, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn link_round_trips_between_halves() {
        let mut tx = Sender::new(TxSink(Vec::new()));
        tx.send_int(-1234).unwrap();
        tx.send_str("go").unwrap();
        let wire = tx.release().0;

        let mut link = Link::with_config(
            TxSink(Vec::new()),
            StubSerial::from_bytes(&wire),
            NoDelay,
            no_grace(),
        );
        assert_eq!(link.poll(), Some(Value::Int(-1234)));
        assert_eq!(link.poll(), Some(Value::text("go")));
        assert!(!link.engine_running());
    }
}
