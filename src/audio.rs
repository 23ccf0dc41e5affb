//! Analog sampling boundary.
//!
//! The converter itself (register setup, conversion timing) lives behind
//! [`SampleSource`]; this crate only forwards finished samples to the wire,
//! one raw byte each, outside the frame protocol.

use embedded_hal::delay::DelayNs;
use embedded_io::Write;

/// Conversion voltage reference selector. The discriminants are the raw
/// field values the firmware programs, not board pin constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VoltageReference {
    External = 1,
    Default = 3,
}

/// Something that produces 8-bit audio samples, one conversion at a time.
pub trait SampleSource {
    /// Run one conversion and return the high 8 bits of the result.
    fn read_sample(&mut self) -> u8;

    /// Select the conversion voltage reference.
    fn set_reference(&mut self, reference: VoltageReference);
}

/// Forward one sample to the transport, optionally pacing the stream by
/// waiting `pacing_us` microseconds first. The pacing knob lets a caller
/// equalize the sample rate against a fast conversion clock.
pub fn stream_sample<S, Tx, D>(
    source: &mut S,
    tx: &mut Tx,
    delay: &mut D,
    pacing_us: u32,
) -> Result<(), Tx::Error>
where
    S: SampleSource,
    Tx: Write,
    D: DelayNs,
{
    if pacing_us > 0 {
        delay.delay_us(pacing_us);
    }
    tx.write_all(&[source.read_sample()])
}
