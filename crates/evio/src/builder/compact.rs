//! E2 — compact builder.
//!
//! Streams directly into a [`ByteBuffer`] without intermediate node objects.
//! `open_*` pushes a frame recording the header-start offset and writes a
//! placeholder length; `close_structure` patches the length field once the
//! child payload has been written. Grounded on the "declared length up
//! front, contents after" parse shape seen in `MetadataHeader::from` (read
//! a `length` field, then read exactly that many bytes), run in reverse
//! for writing.

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::tree::Payload;
use crate::types::{DataType, StructureKind};

struct Frame {
    header_start: usize,
    kind: StructureKind,
    declared_type: DataType,
}

pub struct CompactBuilder {
    buf: ByteBuffer,
    frames: Vec<Frame>,
}

impl CompactBuilder {
    pub fn new(order: crate::buffer::ByteOrder) -> CompactBuilder {
        CompactBuilder {
            buf: ByteBuffer::new(0, order),
            frames: Vec::new(),
        }
    }

    fn current(&self) -> Result<&Frame> {
        self.frames.last().ok_or(Error::StackUnderflow)
    }

    pub fn open_bank(&mut self, tag: u16, num: u8, declared_type: DataType) -> Result<()> {
        let header_start = self.buf.position();
        self.buf.put_u32(0); // length placeholder, patched on close
        let word1 = ((tag as u32) << 16) | ((declared_type.to_code() as u32 & 0x3f) << 8) | num as u32;
        self.buf.put_u32(word1);
        self.frames.push(Frame {
            header_start,
            kind: StructureKind::Bank,
            declared_type,
        });
        Ok(())
    }

    pub fn open_segment(&mut self, tag: u8, declared_type: DataType) -> Result<()> {
        let header_start = self.buf.position();
        let word = ((tag as u32) << 24) | ((declared_type.to_code() as u32 & 0x3f) << 16);
        self.buf.put_u32(word);
        self.frames.push(Frame {
            header_start,
            kind: StructureKind::Segment,
            declared_type,
        });
        Ok(())
    }

    pub fn open_tagsegment(&mut self, tag: u16, declared_type: DataType) -> Result<()> {
        let header_start = self.buf.position();
        let word = (((tag as u32) & 0xfff) << 20) | ((declared_type.to_code() as u32 & 0xf) << 16);
        self.buf.put_u32(word);
        self.frames.push(Frame {
            header_start,
            kind: StructureKind::TagSegment,
            declared_type,
        });
        Ok(())
    }

    /// Writes a leaf payload into the currently open structure, patching its
    /// header's padding field immediately (the length field is patched
    /// later, in `close_structure`, once it's known).
    pub fn write_payload(&mut self, payload: Payload) -> Result<()> {
        let frame = self.current()?;
        if payload.data_type() != frame.declared_type {
            return Err(Error::TypeMismatch(format!(
                "open structure declares {:?} but payload is {:?}",
                frame.declared_type,
                payload.data_type()
            )));
        }
        let (bytes, pad) = payload.encode(self.buf.order());
        if pad != 0 && frame.kind == StructureKind::TagSegment {
            return Err(Error::TypeMismatch(
                "tagsegments cannot carry a width-1/2 payload (no padding field)".into(),
            ));
        }
        self.patch_padding(pad)?;
        self.buf.put_bytes(&bytes);
        Ok(())
    }

    fn patch_padding(&mut self, pad: u8) -> Result<()> {
        let frame = self.frames.last().ok_or(Error::StackUnderflow)?;
        match frame.kind {
            StructureKind::Bank => {
                let word1_offset = frame.header_start + 4;
                let word1 = self.buf.get_u32_at(word1_offset)?;
                let patched = (word1 & !(0b11 << 14)) | (((pad as u32) & 0b11) << 14);
                self.buf.put_u32_at(word1_offset, patched)?;
            }
            StructureKind::Segment => {
                let offset = frame.header_start;
                let word = self.buf.get_u32_at(offset)?;
                let patched = (word & !(0b11 << 22)) | (((pad as u32) & 0b11) << 22);
                self.buf.put_u32_at(offset, patched)?;
            }
            StructureKind::TagSegment => {}
        }
        Ok(())
    }

    /// Patches the length field of the innermost open frame and pops it.
    /// The patched length equals the byte delta since the header start,
    /// minus the header size, in 32-bit words.
    pub fn close_structure(&mut self) -> Result<()> {
        let frame = self.frames.pop().ok_or(Error::StackUnderflow)?;
        let header_bytes = frame.kind.header_words() * 4;
        let total_bytes = self.buf.position() - frame.header_start;
        let payload_words = ((total_bytes - header_bytes) / 4) as u32;

        match frame.kind {
            StructureKind::Bank => {
                let total_words = (frame.kind.header_words() as u32) + payload_words;
                self.buf.put_u32_at(frame.header_start, total_words - 1)?;
            }
            StructureKind::Segment | StructureKind::TagSegment => {
                let word = self.buf.get_u32_at(frame.header_start)?;
                let patched = (word & !0xffff) | (payload_words & 0xffff);
                self.buf.put_u32_at(frame.header_start, patched)?;
            }
        }
        Ok(())
    }

    /// Patches every still-open frame, innermost first. The frame stack is
    /// empty afterward.
    pub fn close_all(&mut self) -> Result<()> {
        while !self.frames.is_empty() {
            self.close_structure()?;
        }
        Ok(())
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.close_all()?;
        Ok(self.buf.into_vec())
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteOrder;

    #[test]
    fn compact_bank_matches_object_builder_output() {
        let mut compact = CompactBuilder::new(ByteOrder::Little);
        compact.open_bank(1, 1, DataType::Int32).unwrap();
        compact
            .write_payload(Payload::Int32(vec![1, 2, 3]))
            .unwrap();
        compact.close_structure().unwrap();
        let compact_bytes = compact.into_bytes().unwrap();

        let mut object = crate::builder::object::EventBuilder::new(1, 1, DataType::Int32);
        object.set_payload(Payload::Int32(vec![1, 2, 3])).unwrap();
        let object_bytes = object.into_event().unwrap().encode(ByteOrder::Little).unwrap();

        assert_eq!(compact_bytes, object_bytes);
    }

    #[test]
    fn nested_compact_bank_patches_outer_length() {
        let mut b = CompactBuilder::new(ByteOrder::Big);
        b.open_bank(10, 0, DataType::Bank).unwrap();
        b.open_bank(20, 1, DataType::Uint8).unwrap();
        b.write_payload(Payload::Uint8(vec![1, 2, 3, 4, 5])).unwrap();
        b.close_structure().unwrap();
        b.close_all().unwrap();

        let bytes = b.into_bytes().unwrap();
        let mut buf = ByteBuffer::wrap(bytes, ByteOrder::Big);
        let node = crate::tree::StructureNode::decode(&mut buf, StructureKind::Bank).unwrap();
        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].tag, 20);
    }

    #[test]
    fn close_structure_without_open_frame_errors() {
        let mut b = CompactBuilder::new(ByteOrder::Little);
        assert!(matches!(b.close_structure(), Err(Error::StackUnderflow)));
    }
}
