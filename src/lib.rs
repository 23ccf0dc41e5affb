//! Serial link to a host-side speech recognition engine.
//!
//! Typed values travel in small delimited frames over a byte-oriented
//! serial transport. The receive side scans a possibly noisy stream,
//! realigning on the next frame boundary after corruption.

#![no_std]

mod audio;
mod frame;
mod link;
mod serial;

pub trait Encode {
    type Error;

    /// Write the wire form into `buffer`, returning the number of bytes used.
    fn encode(&self, buffer: &mut [u8]) -> Result<usize, Self::Error>;
}

pub trait Decode<'a>
where
    Self: Sized,
{
    type Error;

    fn decode(data: &'a [u8]) -> Result<Self, Self::Error>;
}

pub use audio::{SampleSource, VoltageReference, stream_sample};
pub use frame::{
    END_MARK, FrameError, MAX_FRAME_LEN, MIN_FRAME_LEN, PAYLOAD_CAPACITY, RawFrame, START_MARK,
    TEXT_CAPACITY, TypeTag, Value,
};
pub use link::{LISTEN_SIGNAL, Link, LinkConfig, Receiver, SendError, Sender};
pub use serial::RxBuffer;
