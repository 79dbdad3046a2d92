//! The incremental hasher abstraction and the BLAKE3 implementation.

use frz_stream::{Result, StreamSink};

use crate::{Hash256, HashAndSize256};

/// A [`StreamSink`] that, once it has finished accepting bytes, can produce
/// a hash value.
pub trait Hasher: StreamSink + Send {
    /// Compute the hash of all the added bytes. May only be called once;
    /// calling it again, or adding bytes afterwards, is a programming error
    /// and panics.
    fn finish(&mut self) -> Hash256;
}

/// Constructor for the configured hash algorithm.
pub type HasherFactory = fn() -> Box<dyn Hasher>;

/// BLAKE3 with a 256-bit output.
pub struct Blake3Hasher {
    inner: Option<blake3::Hasher>,
}

impl Blake3Hasher {
    pub fn new() -> Self {
        Self {
            inner: Some(blake3::Hasher::new()),
        }
    }
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSink for Blake3Hasher {
    fn add_bytes(&mut self, buffer: &[u8]) -> Result<()> {
        self.inner
            .as_mut()
            .expect("hasher already finished")
            .update(buffer);
        Ok(())
    }
}

impl Hasher for Blake3Hasher {
    fn finish(&mut self) -> Hash256 {
        let inner = self.inner.take().expect("hasher already finished");
        Hash256::new(*inner.finalize().as_bytes())
    }
}

/// The default content hasher.
pub fn blake3_hasher() -> Box<dyn Hasher> {
    Box::new(Blake3Hasher::new())
}

/// Wraps a [`Hasher`], additionally counting the number of bytes streaming
/// through, so that finishing yields a complete `<hash,size>` value.
pub struct SizeHasher {
    hasher: Box<dyn Hasher>,
    num_bytes: u64,
}

impl SizeHasher {
    pub fn new(hasher: Box<dyn Hasher>) -> Self {
        Self {
            hasher,
            num_bytes: 0,
        }
    }

    pub fn finish(&mut self) -> HashAndSize256 {
        HashAndSize256::new(self.hasher.finish(), self.num_bytes)
    }
}

impl StreamSink for SizeHasher {
    fn add_bytes(&mut self, buffer: &[u8]) -> Result<()> {
        self.hasher.add_bytes(buffer)?;
        self.num_bytes += buffer.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake3_empty_input_matches_reference_vector() {
        let mut hasher = Blake3Hasher::new();
        assert_eq!(
            hasher.finish().to_hex(),
            "af1349b9f5f9a1a6a0404dee36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn chunking_does_not_change_the_hash() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut one_shot = Blake3Hasher::new();
        one_shot.add_bytes(data).unwrap();

        let mut chunked = Blake3Hasher::new();
        for chunk in data.chunks(7) {
            chunked.add_bytes(chunk).unwrap();
        }
        assert_eq!(one_shot.finish(), chunked.finish());
    }

    #[test]
    fn size_hasher_counts_bytes() {
        let mut hasher = SizeHasher::new(blake3_hasher());
        hasher.add_bytes(b"12").unwrap();
        hasher.add_bytes(b"").unwrap();
        hasher.add_bytes(b"345").unwrap();
        let hs = hasher.finish();
        assert_eq!(hs.size(), 5);

        let mut reference = Blake3Hasher::new();
        reference.add_bytes(b"12345").unwrap();
        assert_eq!(*hs.hash(), reference.finish());
    }

    #[test]
    #[should_panic(expected = "hasher already finished")]
    fn finish_twice_panics() {
        let mut hasher = Blake3Hasher::new();
        hasher.finish();
        hasher.finish();
    }
}
