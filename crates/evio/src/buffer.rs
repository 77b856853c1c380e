//! Positioned, length-bounded, endian-aware byte span.
//!
//! Every multi-byte field in an EVIO file or buffer is read or written
//! through a `ByteBuffer`. Unlike a bare `Cursor<Vec<u8>>`, it carries its
//! own [`ByteOrder`] so that callers never have to remember which endianness
//! a given header was written in.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Byte order of a buffer. A property of the buffer, not of any one node
/// in the tree it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub fn native() -> ByteOrder {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn opposite(self) -> ByteOrder {
        match self {
            ByteOrder::Big => ByteOrder::Little,
            ByteOrder::Little => ByteOrder::Big,
        }
    }
}

/// A growable byte buffer with a cursor (`position`) and a readable/writable
/// bound (`limit`), matching the Java NIO `ByteBuffer` contract this format
/// was originally built around.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    position: usize,
    limit: usize,
    order: ByteOrder,
}

impl ByteBuffer {
    pub fn new(capacity: usize, order: ByteOrder) -> ByteBuffer {
        ByteBuffer {
            data: vec![0u8; capacity],
            position: 0,
            limit: capacity,
            order,
        }
    }

    pub fn wrap(data: Vec<u8>, order: ByteOrder) -> ByteBuffer {
        let limit = data.len();
        ByteBuffer {
            data,
            position: 0,
            limit,
            order,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(Error::Truncated {
                offset: position,
                expected: 0,
            });
        }
        self.position = position;
        Ok(())
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.data.len() {
            return Err(Error::Truncated {
                offset: limit,
                expected: 0,
            });
        }
        self.limit = limit;
        if self.position > self.limit {
            self.position = self.limit;
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Resets position to 0 and limit to the current position (NIO `flip`).
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Resets position to 0 without touching the limit.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.limit]
    }

    pub fn into_vec(self) -> Vec<u8> {
        let mut data = self.data;
        data.truncate(self.limit);
        data
    }

    /// Returns an independent cursor (same backing data, own position/limit).
    pub fn duplicate(&self) -> ByteBuffer {
        ByteBuffer {
            data: self.data.clone(),
            position: self.position,
            limit: self.limit,
            order: self.order,
        }
    }

    /// Returns a read-only view over `[position, limit)` as a fresh buffer
    /// positioned at 0, advancing `self`'s position past the sliced region.
    pub fn slice(&mut self, len: usize) -> Result<ByteBuffer> {
        self.require(len)?;
        let start = self.position;
        let end = start + len;
        self.position = end;
        Ok(ByteBuffer::wrap(self.data[start..end].to_vec(), self.order))
    }

    fn require(&self, len: usize) -> Result<()> {
        if self.position + len > self.limit {
            return Err(Error::Truncated {
                offset: self.position,
                expected: len,
            });
        }
        Ok(())
    }

    fn ensure_capacity(&mut self, end: usize) {
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        if end > self.limit {
            self.limit = end;
        }
    }

    // --- relative gets ---

    pub fn get_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.data[self.position];
        self.position += 1;
        Ok(v)
    }

    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.require(2)?;
        let v = match self.order {
            ByteOrder::Big => BigEndian::read_u16(&self.data[self.position..]),
            ByteOrder::Little => LittleEndian::read_u16(&self.data[self.position..]),
        };
        self.position += 2;
        Ok(v)
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(self.get_u16()? as i16)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = match self.order {
            ByteOrder::Big => BigEndian::read_u32(&self.data[self.position..]),
            ByteOrder::Little => LittleEndian::read_u32(&self.data[self.position..]),
        };
        self.position += 4;
        Ok(v)
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(self.get_u32()? as i32)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.require(8)?;
        let v = match self.order {
            ByteOrder::Big => BigEndian::read_u64(&self.data[self.position..]),
            ByteOrder::Little => LittleEndian::read_u64(&self.data[self.position..]),
        };
        self.position += 8;
        Ok(v)
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.require(len)?;
        let v = self.data[self.position..self.position + len].to_vec();
        self.position += len;
        Ok(v)
    }

    // --- absolute gets, used by builders patching already-written headers ---

    pub fn get_u32_at(&self, offset: usize) -> Result<u32> {
        if offset + 4 > self.limit {
            return Err(Error::Truncated {
                offset,
                expected: 4,
            });
        }
        Ok(match self.order {
            ByteOrder::Big => BigEndian::read_u32(&self.data[offset..]),
            ByteOrder::Little => LittleEndian::read_u32(&self.data[offset..]),
        })
    }

    // --- relative puts ---

    pub fn put_u8(&mut self, value: u8) {
        self.ensure_capacity(self.position + 1);
        self.data[self.position] = value;
        self.position += 1;
    }

    pub fn put_u16(&mut self, value: u16) {
        self.ensure_capacity(self.position + 2);
        match self.order {
            ByteOrder::Big => BigEndian::write_u16(&mut self.data[self.position..], value),
            ByteOrder::Little => LittleEndian::write_u16(&mut self.data[self.position..], value),
        }
        self.position += 2;
    }

    pub fn put_u32(&mut self, value: u32) {
        self.ensure_capacity(self.position + 4);
        match self.order {
            ByteOrder::Big => BigEndian::write_u32(&mut self.data[self.position..], value),
            ByteOrder::Little => LittleEndian::write_u32(&mut self.data[self.position..], value),
        }
        self.position += 4;
    }

    pub fn put_u64(&mut self, value: u64) {
        self.ensure_capacity(self.position + 8);
        match self.order {
            ByteOrder::Big => BigEndian::write_u64(&mut self.data[self.position..], value),
            ByteOrder::Little => LittleEndian::write_u64(&mut self.data[self.position..], value),
        }
        self.position += 8;
    }

    pub fn put_f32(&mut self, value: f32) {
        self.put_u32(value.to_bits());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.put_u64(value.to_bits());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.ensure_capacity(self.position + bytes.len());
        self.data[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
    }

    /// Patches a 4-byte little/big-endian (per buffer order) word at an
    /// already-written offset; used by the compact builder (E2) to
    /// backfill a length field once the enclosing structure is closed.
    pub fn put_u32_at(&mut self, offset: usize, value: u32) -> Result<()> {
        if offset + 4 > self.data.len() {
            return Err(Error::Truncated {
                offset,
                expected: 4,
            });
        }
        match self.order {
            ByteOrder::Big => BigEndian::write_u32(&mut self.data[offset..], value),
            ByteOrder::Little => LittleEndian::write_u32(&mut self.data[offset..], value),
        }
        Ok(())
    }

    pub fn as_read_only(&self) -> ByteBuffer {
        self.duplicate()
    }
}

/// Reads a run of u32 words (used by block/record headers) from a `Read`,
/// honoring the buffer's declared endianness.
pub fn read_u32_words<R: std::io::Read>(
    reader: &mut R,
    order: ByteOrder,
    count: usize,
) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let v = match order {
            ByteOrder::Big => reader.read_u32::<BigEndian>()?,
            ByteOrder::Little => reader.read_u32::<LittleEndian>()?,
        };
        out.push(v);
    }
    Ok(out)
}

pub fn write_u32_words<W: std::io::Write>(
    writer: &mut W,
    order: ByteOrder,
    words: &[u32],
) -> Result<()> {
    for &w in words {
        match order {
            ByteOrder::Big => writer.write_u32::<BigEndian>(w)?,
            ByteOrder::Little => writer.write_u32::<LittleEndian>(w)?,
        }
    }
    Ok(())
}
