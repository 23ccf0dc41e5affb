extern crate alloc;

use alloc::collections::VecDeque;
use embedded_hal_nb::serial::Read;

/// Buffering wrapper over a non-blocking serial receiver.
///
/// The raw serial trait only offers one-byte reads, but frame scanning
/// needs to peek at the head of the stream and count what has arrived.
/// Bytes are pulled out of the transport into a queue and consumed from
/// the front as frames are recognized or discarded.
#[derive(Debug)]
pub struct RxBuffer<Rx: Read> {
    rx: Rx,
    buf: VecDeque<u8>,
}

impl<Rx: Read> RxBuffer<Rx> {
    pub fn new(rx: Rx) -> RxBuffer<Rx> {
        RxBuffer {
            rx,
            buf: VecDeque::new(),
        }
    }

    /// Drain everything the transport currently holds into the queue.
    /// Stops at `WouldBlock`; on a hard transport error whatever arrived
    /// before it stays buffered.
    pub fn fill(&mut self) -> Result<(), Rx::Error> {
        loop {
            match self.rx.read() {
                Ok(b) => self.buf.push_back(b),
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    /// Number of buffered bytes.
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    /// Next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.buf.front().copied()
    }

    /// Consume one byte from the front.
    pub fn take(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }

    /// Discard up to `amount` bytes from the front.
    pub fn discard(&mut self, amount: usize) {
        let n = amount.min(self.buf.len());
        self.buf.drain(0..n);
    }

    /// Drop every buffered byte.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Contiguous view of all buffered bytes, front first.
    pub fn slice(&mut self) -> &[u8] {
        self.buf.make_contiguous()
    }

    /// Access the wrapped transport.
    pub fn raw_mut(&mut self) -> &mut Rx {
        &mut self.rx
    }

    pub fn release(self) -> Rx {
        self.rx
    }
}
