//! # frz-stream
//!
//! Byte-stream plumbing for frz: the `StreamSource`/`StreamSink` capability
//! traits, file-backed adapters, and the streamer engine that moves bytes
//! between them.
//!
//! Two streamer variants exist: a single-threaded one that alternates reads
//! and writes through one buffer, and a multi-threaded one that runs the
//! source on a worker thread and hands filled buffers to the sink through a
//! bounded FIFO. The multi-threaded variant additionally supports *forked*
//! streaming, which tees the source into a secondary sink opportunistically
//! and lets the caller decide after the fact whether the secondary output is
//! kept (see [`Streamer::forked_stream`]).

mod file;
mod streamer;
mod worker;

pub use file::{FileSink, FileSource};
pub use streamer::{
    ForkedStream, MultiThreadedOptions, SecondaryStreamDecision, Streamer,
};
pub use worker::Worker;

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// What a single `get_bytes` call produced.
#[derive(Debug)]
pub enum SourceBytes {
    /// This many bytes were copied into the front of the buffer.
    Copied(usize),
    /// The source is exhausted; no bytes were copied.
    End,
}

/// A finite producer of bytes.
pub trait StreamSource {
    /// Copy bytes into `buffer`. May copy any number of bytes in
    /// `0..=buffer.len()`; returns [`SourceBytes::End`] once exhausted.
    fn get_bytes(&mut self, buffer: &mut [u8]) -> Result<SourceBytes>;
}

/// A stream source with random-access position control.
pub trait PositionedStreamSource: StreamSource {
    fn position(&mut self) -> Result<u64>;
    fn set_position(&mut self, pos: u64) -> Result<()>;
}

/// A consumer of bytes. Accepts chunks of arbitrary size.
pub trait StreamSink {
    fn add_bytes(&mut self, buffer: &[u8]) -> Result<()>;
}

/// Result of [`fill_buffer`]. At least one of `num_bytes == buffer.len()`
/// and `end` is true.
#[derive(Debug, Clone, Copy)]
pub struct FillResult {
    /// Number of bytes written to the buffer.
    pub num_bytes: usize,
    /// Did we exhaust the source?
    pub end: bool,
}

/// Read from `source` until `buffer` is full or the source is exhausted.
pub fn fill_buffer(source: &mut dyn StreamSource, buffer: &mut [u8]) -> Result<FillResult> {
    let mut num_bytes = 0;
    while num_bytes < buffer.len() {
        match source.get_bytes(&mut buffer[num_bytes..])? {
            SourceBytes::Copied(n) => num_bytes += n,
            SourceBytes::End => return Ok(FillResult { num_bytes, end: true }),
        }
    }
    Ok(FillResult { num_bytes, end: false })
}


#[cfg(test)]
mod tests {
    use super::test_util::MemorySource;
    use super::*;

    #[test]
    fn fill_buffer_reports_end_on_short_read() {
        let mut source = MemorySource::new(b"hello".to_vec(), 2);
        let mut buffer = [0u8; 16];
        let fill = fill_buffer(&mut source, &mut buffer).unwrap();
        assert_eq!(fill.num_bytes, 5);
        assert!(fill.end);
        assert_eq!(&buffer[..5], b"hello");
    }

    #[test]
    fn fill_buffer_fills_exactly() {
        let mut source = MemorySource::new(b"hello world".to_vec(), 3);
        let mut buffer = [0u8; 5];
        let fill = fill_buffer(&mut source, &mut buffer).unwrap();
        assert_eq!(fill.num_bytes, 5);
        assert!(!fill.end);
        assert_eq!(&buffer, b"hello");
    }
}
