//! # Binary Codec
//!
//! Fixed-layout (de)serialization for NSPV messages. Every message struct
//! implements [`Encode`] and [`Decode`]; this module supplies the cursor types
//! they are written against.
//!
//! ## Layout rules
//!
//! - Integers are little-endian, with the width and signedness of the field
//!   they carry (heights i32, amounts i64, counts u16).
//! - Hashes are 32 raw bytes in internal order, no length prefix.
//! - Arrays are a `u16` count followed by the elements.
//! - Byte blobs (raw transactions, proofs) are an `i32` length followed by
//!   the bytes.
//! - Addresses occupy exactly [`ADDRESS_LEN`] bytes, NUL-padded.
//!
//! No padding, no alignment, nothing left to chance: the same value always
//! encodes to the same bytes.
//!
//! ## Bounds
//!
//! [`Reader`] never indexes past its slice. Declared counts and lengths are
//! checked against the remaining input *before* anything is allocated, so a
//! hostile peer cannot make us reserve gigabytes by lying about a count.

mod address;

pub use address::{Address, AddressError};

use crate::config::{ADDRESS_LEN, MAX_PACKET_SIZE};
use crate::crypto::Bits256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure decoding a byte buffer. Always recoverable: the message is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The buffer ended before the layout did.
    #[error("truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// The bytes are present but make no sense for the layout.
    #[error("malformed: {0}")]
    Malformed(String),
}

/// Failure encoding a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The encoded message would exceed the packet bound.
    #[error("message too large: {size} bytes exceeds {max}")]
    TooLarge { size: usize, max: usize },

    /// A collection does not fit its count field.
    #[error("{field} count {count} exceeds field maximum {max}")]
    CountOverflow {
        field: &'static str,
        count: usize,
        max: usize,
    },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A value with one canonical wire layout.
pub trait Encode {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError>;

    /// Encodes into a fresh buffer, enforcing the packet bound.
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        self.encode_to(&mut w)?;
        w.finish()
    }
}

/// The inverse of [`Encode`].
pub trait Decode: Sized {
    /// Smallest possible encoding of one value. Used to reject impossible
    /// array counts before allocating.
    const MIN_LEN: usize;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decodes a whole buffer. Leftover bytes are an error.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes)?;
        let value = Self::decode_from(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only output buffer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_hash(&mut self, h: &Bits256) {
        self.buf.extend_from_slice(h.as_bytes());
    }

    pub fn put_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_address(&mut self, addr: &Address) {
        self.buf.extend_from_slice(&addr.to_field());
    }

    /// Writes an `i32` length followed by the bytes.
    pub fn put_var_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(EncodeError::TooLarge {
                size: bytes.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        self.put_i32(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Writes a `u16` count followed by each element.
    pub fn put_list<T: Encode>(
        &mut self,
        field: &'static str,
        items: &[T],
    ) -> Result<(), EncodeError> {
        if items.len() > u16::MAX as usize {
            return Err(EncodeError::CountOverflow {
                field,
                count: items.len(),
                max: u16::MAX as usize,
            });
        }
        self.put_u16(items.len() as u16);
        for item in items {
            item.encode_to(self)?;
            if self.buf.len() > MAX_PACKET_SIZE {
                return Err(EncodeError::TooLarge {
                    size: self.buf.len(),
                    max: MAX_PACKET_SIZE,
                });
            }
        }
        Ok(())
    }

    /// Returns the buffer, enforcing the packet bound.
    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        if self.buf.len() > MAX_PACKET_SIZE {
            return Err(EncodeError::TooLarge {
                size: self.buf.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        Ok(self.buf)
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked input cursor.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wraps a buffer. Buffers over the packet bound are rejected up front.
    pub fn new(buf: &'a [u8]) -> Result<Self, DecodeError> {
        if buf.len() > MAX_PACKET_SIZE {
            return Err(DecodeError::Malformed(format!(
                "buffer of {} bytes exceeds packet bound {}",
                buf.len(),
                MAX_PACKET_SIZE
            )));
        }
        Ok(Self { buf, pos: 0 })
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn get_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_hash(&mut self) -> Result<Bits256, DecodeError> {
        Ok(Bits256(self.take_array()?))
    }

    pub fn get_fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.take_array()
    }

    pub fn get_address(&mut self) -> Result<Address, DecodeError> {
        let field: [u8; ADDRESS_LEN] = self.take_array()?;
        Address::from_field(&field).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Reads an `i32` length and that many bytes.
    pub fn get_var_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.get_i32()?;
        if len < 0 {
            return Err(DecodeError::Malformed(format!("negative length {}", len)));
        }
        let len = len as usize;
        if len > MAX_PACKET_SIZE {
            return Err(DecodeError::Malformed(format!(
                "length {} exceeds packet bound",
                len
            )));
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Reads a `u16` count and that many elements.
    pub fn get_list<T: Decode>(&mut self) -> Result<Vec<T>, DecodeError> {
        let count = self.get_u16()? as usize;
        let needed = count.saturating_mul(T::MIN_LEN);
        if needed > self.remaining() {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode_from(self)?);
        }
        Ok(items)
    }

    /// Asserts the whole buffer was consumed.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.remaining() != 0 {
            return Err(DecodeError::Malformed(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Leaf impls
// ---------------------------------------------------------------------------

impl Encode for Bits256 {
    fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.put_hash(self);
        Ok(())
    }
}

impl Decode for Bits256 {
    const MIN_LEN: usize = 32;

    fn decode_from(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.get_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        let mut w = Writer::new();
        w.put_u16(0x0102);
        w.put_i32(-2);
        w.put_i64(1);
        let bytes = w.finish().unwrap();
        assert_eq!(&bytes[..2], &[0x02, 0x01]);
        assert_eq!(&bytes[2..6], &[0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(&bytes[6..14], &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn reader_reports_truncation() {
        let mut r = Reader::new(&[1, 2, 3]).unwrap();
        assert_eq!(
            r.get_i32().unwrap_err(),
            DecodeError::Truncated {
                needed: 4,
                remaining: 3
            }
        );
    }

    #[test]
    fn var_bytes_negative_length_is_malformed() {
        let mut w = Writer::new();
        w.put_i32(-1);
        let bytes = w.finish().unwrap();
        let mut r = Reader::new(&bytes).unwrap();
        assert!(matches!(
            r.get_var_bytes().unwrap_err(),
            DecodeError::Malformed(_)
        ));
    }

    #[test]
    fn var_bytes_over_packet_bound_is_malformed() {
        let mut w = Writer::new();
        w.put_i32((MAX_PACKET_SIZE + 1) as i32);
        let bytes = w.finish().unwrap();
        let mut r = Reader::new(&bytes).unwrap();
        assert!(matches!(
            r.get_var_bytes().unwrap_err(),
            DecodeError::Malformed(_)
        ));
    }

    #[test]
    fn var_bytes_longer_than_buffer_is_truncated() {
        let mut w = Writer::new();
        w.put_i32(100);
        w.put_fixed(&[0u8; 10]);
        let bytes = w.finish().unwrap();
        let mut r = Reader::new(&bytes).unwrap();
        assert!(matches!(
            r.get_var_bytes().unwrap_err(),
            DecodeError::Truncated { needed: 100, .. }
        ));
    }

    #[test]
    fn list_count_checked_before_allocation() {
        // Claims 65535 hashes but carries none.
        let mut w = Writer::new();
        w.put_u16(u16::MAX);
        let bytes = w.finish().unwrap();
        let mut r = Reader::new(&bytes).unwrap();
        let err = r.get_list::<Bits256>().unwrap_err();
        assert_eq!(
            err,
            DecodeError::Truncated {
                needed: u16::MAX as usize * 32,
                remaining: 0
            }
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Bits256::ZERO.encode().unwrap();
        bytes.push(0);
        assert!(matches!(
            Bits256::decode(&bytes).unwrap_err(),
            DecodeError::Malformed(_)
        ));
    }

    #[test]
    fn oversized_buffer_rejected_by_reader() {
        let big = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            Reader::new(&big).unwrap_err(),
            DecodeError::Malformed(_)
        ));
    }

    #[test]
    fn writer_refuses_oversized_output() {
        let mut w = Writer::new();
        w.put_fixed(&vec![0u8; MAX_PACKET_SIZE + 1]);
        assert!(matches!(
            w.finish().unwrap_err(),
            EncodeError::TooLarge { .. }
        ));
    }

    #[test]
    fn list_encoding_stops_at_packet_bound() {
        // 4 MiB / 32 is more than u16::MAX hashes, so use blobs instead.
        struct Blob(Vec<u8>);
        impl Encode for Blob {
            fn encode_to(&self, w: &mut Writer) -> Result<(), EncodeError> {
                w.put_var_bytes(&self.0)
            }
        }
        let items: Vec<Blob> = (0..5).map(|_| Blob(vec![0u8; 1024 * 1024])).collect();
        let mut w = Writer::new();
        assert!(matches!(
            w.put_list("blobs", &items).unwrap_err(),
            EncodeError::TooLarge { .. }
        ));
    }
}
