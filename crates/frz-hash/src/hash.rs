//! Fixed-width hash values and their composition with a file size.

use std::fmt;

use crate::base32::{digit_value, BASE32_DIGITS};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn hex_value(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        'a'..='f' => Some(c as u8 - b'a' + 10),
        'A'..='F' => Some(c as u8 - b'A' + 10),
        _ => None,
    }
}

fn round_up(a: usize, b: usize) -> usize {
    (a + b - 1) / b * b
}

/// An immutable hash value of `BYTES * 8` bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash<const BYTES: usize> {
    bytes: [u8; BYTES],
}

/// The 256-bit hash width used for content hashes.
pub type Hash256 = Hash<32>;

impl<const BYTES: usize> Hash<BYTES> {
    pub fn new(bytes: [u8; BYTES]) -> Self {
        Self { bytes }
    }

    /// Parse from hex. The digit count must be exactly `BYTES * 2`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != BYTES * 2 {
            return None;
        }
        let mut bytes = [0u8; BYTES];
        let mut chars = hex.chars();
        for byte in bytes.iter_mut() {
            let hi = hex_value(chars.next()?)?;
            let lo = hex_value(chars.next()?)?;
            *byte = (hi << 4) | lo;
        }
        Some(Self { bytes })
    }

    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(BYTES * 2);
        for &b in &self.bytes {
            hex.push(HEX_DIGITS[(b >> 4) as usize] as char);
            hex.push(HEX_DIGITS[(b & 0xf) as usize] as char);
        }
        hex
    }

    pub fn bytes(&self) -> &[u8; BYTES] {
        &self.bytes
    }
}

impl<const BYTES: usize> fmt::Debug for Hash<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash<{}>:{}", BYTES * 8, self.to_hex())
    }
}

/// A hash value bundled with a non-negative file size (< 2^63).
///
/// The canonical external representation is base-32: the hash bits come
/// first, followed by the size in the minimal number of bits, front-padded
/// with 0-4 zero bits so the total is a multiple of 5. Every value has
/// exactly one base-32 form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashAndSize<const BYTES: usize> {
    hash: Hash<BYTES>,
    size: u64,
}

/// The `<hash,size>` composition at the content-hash width.
pub type HashAndSize256 = HashAndSize<32>;

impl<const BYTES: usize> HashAndSize<BYTES> {
    pub fn new(hash: Hash<BYTES>, size: u64) -> Self {
        debug_assert!(size < 1 << 63);
        Self { hash, size }
    }

    pub fn hash(&self) -> &Hash<BYTES> {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn to_base32(&self) -> String {
        let hash_bits = BYTES * 8;
        let significant = 64 - self.size.leading_zeros() as usize;
        let size_bits = round_up(hash_bits + significant, 5) - hash_bits;

        let mut packer = Base32Packer::with_capacity((hash_bits + size_bits) / 5);
        for &byte in &self.hash.bytes {
            packer.push_bits(byte as u64, 8);
        }
        let mut remaining = size_bits;
        while remaining > 0 {
            let take = remaining.min(16);
            let shift = remaining - take;
            packer.push_bits((self.size >> shift) & ((1 << take) - 1), take);
            remaining -= take;
        }
        debug_assert_eq!(packer.pending_bits(), 0);
        let out = packer.into_string();
        debug_assert_eq!(out.len(), (hash_bits + size_bits) / 5);
        out
    }

    /// Inverse of [`HashAndSize::to_base32`]. Returns `None` on non-digits,
    /// too few digits to populate the hash, sizes that don't fit in 63 bits,
    /// and non-canonical encodings (a size with 5+ leading zero bits could
    /// have been written with fewer digits).
    pub fn from_base32(s: &str) -> Option<Self> {
        let mut digits = s.chars();
        let mut acc: u64 = 0;
        let mut bits: usize = 0;

        let mut hash_bytes = [0u8; BYTES];
        for byte in hash_bytes.iter_mut() {
            while bits < 8 {
                acc = (acc << 5) | digit_value(digits.next()?)?;
                bits += 5;
            }
            bits -= 8;
            *byte = (acc >> bits) as u8;
            acc &= (1u64 << bits) - 1;
        }

        // The leftover bits are the high bits of the size; read the rest.
        for c in digits {
            let d = digit_value(c)?;
            if acc.leading_zeros() < 6 {
                return None; // shifting in 5 more bits would overflow
            }
            acc = (acc << 5) | d;
            bits += 5;
        }
        let significant = 64 - acc.leading_zeros() as usize;
        debug_assert!(significant <= bits);
        if bits - significant >= 5 {
            return None; // size encoded with more digits than necessary
        }
        Some(Self {
            hash: Hash::new(hash_bytes),
            size: acc,
        })
    }
}

impl<const BYTES: usize> fmt::Debug for HashAndSize<BYTES> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{hash/{}:{},size:{},base32:{}}}",
            BYTES * 8,
            self.hash.to_hex(),
            self.size,
            self.to_base32()
        )
    }
}

/// Accumulates bits most-significant first and emits base-32 digits.
struct Base32Packer {
    acc: u64,
    bits: usize,
    out: String,
}

impl Base32Packer {
    fn with_capacity(digits: usize) -> Self {
        Self {
            acc: 0,
            bits: 0,
            out: String::with_capacity(digits),
        }
    }

    fn push_bits(&mut self, value: u64, nbits: usize) {
        debug_assert!(nbits <= 32);
        self.acc = (self.acc << nbits) | value;
        self.bits += nbits;
        while self.bits >= 5 {
            let digit = (self.acc >> (self.bits - 5)) & 0x1f;
            self.out.push(BASE32_DIGITS[digit as usize] as char);
            self.bits -= 5;
            self.acc &= (1u64 << self.bits) - 1;
        }
    }

    fn pending_bits(&self) -> usize {
        self.bits
    }

    fn into_string(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn has<const BYTES: usize>(hex: &str, size: u64) -> HashAndSize<BYTES> {
        HashAndSize::new(Hash::<BYTES>::from_hex(hex).unwrap(), size)
    }

    #[test]
    fn to_hex() {
        assert_eq!(Hash::<1>::new([0x4a]).to_hex(), "4a");
        assert_eq!(Hash::<2>::new([0, 1]).to_hex(), "0001");
    }

    #[test]
    fn from_hex() {
        assert_eq!(Hash::<1>::from_hex(""), None);
        assert_eq!(Hash::<1>::from_hex("4"), None);
        assert_eq!(Hash::<1>::from_hex("477"), None);
        assert_eq!(Hash::<1>::from_hex("47x"), None);
        assert_eq!(Hash::<1>::from_hex("4x"), None);
        assert_eq!(Hash::<1>::from_hex("47"), Some(Hash::new([0x47])));
        assert_eq!(
            Hash::<3>::from_hex("123a5B"),
            Some(Hash::new([0x12, 0x3a, 0x5b]))
        );
    }

    #[test]
    fn comparison() {
        assert_eq!(has::<1>("aa", 1), has::<1>("aa", 1));
        assert_ne!(has::<1>("aa", 1), has::<1>("aa", 2));
        assert_ne!(has::<1>("aa", 1), has::<1>("bb", 1));
        assert_ne!(has::<1>("aa", 1), has::<1>("bb", 2));
    }

    #[test]
    fn to_base32() {
        assert_eq!(has::<1>("aa", 0).to_base32(), "n8");
        assert_eq!(has::<1>("aa", 1).to_base32(), "n9");
        assert_eq!(has::<1>("aa", 2).to_base32(), "na");
        assert_eq!(has::<1>("aa", 4).to_base32(), "n84");
        assert_eq!(has::<1>("aa", 128).to_base32(), "n840");
        assert_eq!(has::<3>("000000", 0).to_base32(), "00000");
        assert_eq!(has::<3>("000000", 1).to_base32(), "00001");
        assert_eq!(has::<3>("000000", 2).to_base32(), "000002");
        assert_eq!(
            has::<16>("000102030405060708090a0b0c0d0e0f", 1234567890).to_base32(),
            "000g40r40m30e209185gr38e1x4sc0pj"
        );
    }

    #[test]
    fn from_base32() {
        assert_eq!(HashAndSize::<1>::from_base32("n8"), Some(has::<1>("aa", 0)));
        assert_eq!(HashAndSize::<1>::from_base32("n9"), Some(has::<1>("aa", 1)));
        assert_eq!(HashAndSize::<1>::from_base32("na"), Some(has::<1>("aa", 2)));
        assert_eq!(HashAndSize::<1>::from_base32("n84"), Some(has::<1>("aa", 4)));
        assert_eq!(
            HashAndSize::<1>::from_base32("n840"),
            Some(has::<1>("aa", 128))
        );
        assert_eq!(
            HashAndSize::<3>::from_base32("00000"),
            Some(has::<3>("000000", 0))
        );
        assert_eq!(
            HashAndSize::<3>::from_base32("000002"),
            Some(has::<3>("000000", 2))
        );
        assert_eq!(
            HashAndSize::<16>::from_base32("000g40r40m30e209185gr38e1x4sc0pj"),
            Some(has::<16>("000102030405060708090a0b0c0d0e0f", 1234567890))
        );
    }

    #[test]
    fn from_base32_rejects_junk() {
        // Too short to populate the hash.
        assert_eq!(HashAndSize::<1>::from_base32(""), None);
        assert_eq!(HashAndSize::<1>::from_base32("n"), None);
        // Not base-32 digits.
        assert_eq!(HashAndSize::<1>::from_base32("il"), None);
        assert_eq!(HashAndSize::<1>::from_base32("n8 "), None);
        // Size written with a whole digit of leading zeros.
        assert_eq!(HashAndSize::<1>::from_base32("n800"), None);
    }

    #[test]
    fn base32_roundtrip_random() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes[..]);
            // Log-uniform sizes, so small sizes are well represented.
            let size_bits = rng.gen_range(0..63);
            let size: u64 = rng.gen::<u64>() >> (63 - size_bits) >> 1;
            let hs = HashAndSize::<32>::new(Hash::new(bytes), size);
            assert_eq!(HashAndSize::<32>::from_base32(&hs.to_base32()), Some(hs));
        }
    }

    #[test]
    fn base32_junk_or_reverse_roundtrip() {
        const ALPHABET: &[u8] = b"0123456789abcdefghjkmnpqrstuwxyzABCDEFGHJKMNPQRSTUWXYZ";
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let len = rng.gen_range(0..80);
            let s: String = (0..len)
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            if let Some(hs) = HashAndSize::<32>::from_base32(&s) {
                assert_eq!(hs.to_base32(), s.to_ascii_lowercase());
            }
        }
    }
}
