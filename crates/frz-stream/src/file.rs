//! File-backed stream adapters.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{PositionedStreamSource, Result, SourceBytes, StreamSink, StreamSource};

/// Stream source over an open file. Reads as many bytes as the buffer holds
/// before yielding, and reports end once the underlying file is exhausted.
pub struct FileSource {
    file: File,
    eof: bool,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            eof: false,
        })
    }
}

impl StreamSource for FileSource {
    fn get_bytes(&mut self, buffer: &mut [u8]) -> Result<SourceBytes> {
        if self.eof {
            return Ok(SourceBytes::End);
        }
        let mut num_bytes = 0;
        while num_bytes < buffer.len() {
            let n = self.file.read(&mut buffer[num_bytes..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            num_bytes += n;
        }
        Ok(SourceBytes::Copied(num_bytes))
    }
}

impl PositionedStreamSource for FileSource {
    fn position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn set_position(&mut self, pos: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.eof = false;
        Ok(())
    }
}

/// Write-only sink over a file created with exclusive-create semantics, so
/// that a name collision surfaces as `ErrorKind::AlreadyExists` instead of
/// clobbering existing content.
#[derive(Debug)]
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn create_new(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)?,
        })
    }
}

impl StreamSink for FileSink {
    fn add_bytes(&mut self, buffer: &[u8]) -> Result<()> {
        self.file.write_all(buffer)?;
        Ok(())
    }
}
