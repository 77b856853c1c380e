//! Structure tree (events): nested banks/segments/tagsegments carrying
//! typed payload vectors and children.
//!
//! Container vs leaf polymorphism: rather than the source's virtual
//! base-class hierarchy, this is a tagged variant over
//! container kind at the node level and over payload kind at the leaf
//! level. Children are owned by their parent (`Body::Children(Vec<..>)`);
//! there is no shared/weak back-reference — a parent context is
//! reconstructed by explicit traversal when printing or re-normalizing.

use crate::buffer::{ByteBuffer, ByteOrder};
use crate::error::{Error, Result};
use crate::types::{DataType, StructureKind};

/// A leaf's typed payload. `Unknown32` carries raw, word-aligned bytes for
/// payload-type codes the catalog doesn't recognize; unrecognized types
/// are tolerated, not fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Int8(Vec<i8>),
    Uint8(Vec<u8>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Int64(Vec<i64>),
    Uint64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    StringArray(Vec<String>),
    Composite(Vec<u8>),
    Unknown32(Vec<u8>),
}

impl Payload {
    pub fn data_type(&self) -> DataType {
        match self {
            Payload::Int8(_) => DataType::Int8,
            Payload::Uint8(_) => DataType::Uint8,
            Payload::Int16(_) => DataType::Int16,
            Payload::Uint16(_) => DataType::Uint16,
            Payload::Int32(_) => DataType::Int32,
            Payload::Uint32(_) => DataType::Uint32,
            Payload::Int64(_) => DataType::Int64,
            Payload::Uint64(_) => DataType::Uint64,
            Payload::Float32(_) => DataType::Float32,
            Payload::Float64(_) => DataType::Float64,
            Payload::StringArray(_) => DataType::StringArray,
            Payload::Composite(_) => DataType::Composite,
            Payload::Unknown32(_) => DataType::Unknown32,
        }
    }

    /// Bytes of zero-padding a width-1 or width-2 element array needs to
    /// reach a 4-byte boundary.
    fn trailing_padding(element_count: usize, width: usize) -> u8 {
        if width == 0 {
            return 0;
        }
        let bytes = element_count * width;
        ((4 - (bytes % 4)) % 4) as u8
    }

    /// Encodes the payload's raw bytes, including any trailing pad, in the
    /// given byte order. Returns `(bytes, padding_field)`.
    pub fn encode(&self, order: ByteOrder) -> (Vec<u8>, u8) {
        match self {
            Payload::Int8(v) => {
                let bytes: Vec<u8> = v.iter().map(|&x| x as u8).collect();
                let pad = Self::trailing_padding(v.len(), 1);
                (pad_bytes(bytes, pad), pad)
            }
            Payload::Uint8(v) => {
                let pad = Self::trailing_padding(v.len(), 1);
                (pad_bytes(v.clone(), pad), pad)
            }
            Payload::Int16(v) => {
                let mut buf = ByteBuffer::new(v.len() * 2, order);
                for &x in v {
                    buf.put_u16(x as u16);
                }
                let pad = Self::trailing_padding(v.len(), 2);
                let mut bytes = buf.into_vec();
                bytes.extend(std::iter::repeat(0u8).take(pad as usize));
                (bytes, pad)
            }
            Payload::Uint16(v) => {
                let mut buf = ByteBuffer::new(v.len() * 2, order);
                for &x in v {
                    buf.put_u16(x);
                }
                let pad = Self::trailing_padding(v.len(), 2);
                let mut bytes = buf.into_vec();
                bytes.extend(std::iter::repeat(0u8).take(pad as usize));
                (bytes, pad)
            }
            Payload::Int32(v) => {
                let mut buf = ByteBuffer::new(v.len() * 4, order);
                for &x in v {
                    buf.put_u32(x as u32);
                }
                (buf.into_vec(), 0)
            }
            Payload::Uint32(v) => {
                let mut buf = ByteBuffer::new(v.len() * 4, order);
                for &x in v {
                    buf.put_u32(x);
                }
                (buf.into_vec(), 0)
            }
            Payload::Float32(v) => {
                let mut buf = ByteBuffer::new(v.len() * 4, order);
                for &x in v {
                    buf.put_f32(x);
                }
                (buf.into_vec(), 0)
            }
            Payload::Int64(v) => {
                let mut buf = ByteBuffer::new(v.len() * 8, order);
                for &x in v {
                    buf.put_u64(x as u64);
                }
                (buf.into_vec(), 0)
            }
            Payload::Uint64(v) => {
                let mut buf = ByteBuffer::new(v.len() * 8, order);
                for &x in v {
                    buf.put_u64(x);
                }
                (buf.into_vec(), 0)
            }
            Payload::Float64(v) => {
                let mut buf = ByteBuffer::new(v.len() * 8, order);
                for &x in v {
                    buf.put_f64(x);
                }
                (buf.into_vec(), 0)
            }
            Payload::StringArray(v) => (encode_string_array(v), 0),
            Payload::Composite(bytes) => {
                let pad = Self::trailing_padding(bytes.len(), 1);
                (pad_bytes(bytes.clone(), pad), pad)
            }
            Payload::Unknown32(bytes) => (bytes.clone(), 0),
        }
    }

    pub fn decode(
        data_type: DataType,
        bytes: &[u8],
        padding: u8,
        order: ByteOrder,
    ) -> Result<Payload> {
        let unpadded = &bytes[..bytes.len() - padding as usize];
        let mut buf = ByteBuffer::wrap(unpadded.to_vec(), order);
        Ok(match data_type {
            DataType::Int8 => Payload::Int8(unpadded.iter().map(|&b| b as i8).collect()),
            DataType::Uint8 => Payload::Uint8(unpadded.to_vec()),
            DataType::Int16 => {
                let mut v = Vec::with_capacity(unpadded.len() / 2);
                while buf.remaining() >= 2 {
                    v.push(buf.get_u16()? as i16);
                }
                Payload::Int16(v)
            }
            DataType::Uint16 => {
                let mut v = Vec::with_capacity(unpadded.len() / 2);
                while buf.remaining() >= 2 {
                    v.push(buf.get_u16()?);
                }
                Payload::Uint16(v)
            }
            DataType::Int32 => {
                let mut v = Vec::with_capacity(unpadded.len() / 4);
                while buf.remaining() >= 4 {
                    v.push(buf.get_u32()? as i32);
                }
                Payload::Int32(v)
            }
            DataType::Uint32 => {
                let mut v = Vec::with_capacity(unpadded.len() / 4);
                while buf.remaining() >= 4 {
                    v.push(buf.get_u32()?);
                }
                Payload::Uint32(v)
            }
            DataType::Float32 => {
                let mut v = Vec::with_capacity(unpadded.len() / 4);
                while buf.remaining() >= 4 {
                    v.push(buf.get_f32()?);
                }
                Payload::Float32(v)
            }
            DataType::Int64 => {
                let mut v = Vec::with_capacity(unpadded.len() / 8);
                while buf.remaining() >= 8 {
                    v.push(buf.get_u64()? as i64);
                }
                Payload::Int64(v)
            }
            DataType::Uint64 => {
                let mut v = Vec::with_capacity(unpadded.len() / 8);
                while buf.remaining() >= 8 {
                    v.push(buf.get_u64()?);
                }
                Payload::Uint64(v)
            }
            DataType::Float64 => {
                let mut v = Vec::with_capacity(unpadded.len() / 8);
                while buf.remaining() >= 8 {
                    v.push(buf.get_f64()?);
                }
                Payload::Float64(v)
            }
            DataType::StringArray => Payload::StringArray(decode_string_array(bytes)),
            DataType::Composite => Payload::Composite(unpadded.to_vec()),
            DataType::Unknown32 => {
                tracing::debug!(byte_len = bytes.len(), "tolerating unrecognized payload type code");
                Payload::Unknown32(bytes.to_vec())
            }
            DataType::Bank | DataType::Segment | DataType::TagSegment => {
                return Err(Error::TypeMismatch(
                    "container type code passed to Payload::decode".into(),
                ))
            }
        })
    }
}

fn pad_bytes(mut bytes: Vec<u8>, pad: u8) -> Vec<u8> {
    bytes.extend(std::iter::repeat(0u8).take(pad as usize));
    bytes
}

/// String array encoding: UTF-8, NUL-separated, a final doubled `\4`
/// sentinel, then padded to a 4-byte boundary with more `\4` bytes.
fn encode_string_array(strings: &[String]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for s in strings {
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
    }
    bytes.push(4);
    bytes.push(4);
    while bytes.len() % 4 != 0 {
        bytes.push(4);
    }
    bytes
}

fn decode_string_array(bytes: &[u8]) -> Vec<String> {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == 4 {
        end -= 1;
    }
    let body = &bytes[..end];
    body.split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

/// The body of a structure node: either children (if this node's own
/// container kind declares its payload type to be a container kind) or a
/// typed leaf payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Children(Vec<StructureNode>),
    Leaf(Payload),
}

/// A node in an event tree: a bank, segment, or tagsegment.
///
/// `declared_type` is the payload type recorded in the header — for a
/// container-of-containers node this is `Bank`/`Segment`/`TagSegment` and
/// names the kind every child must have; for a leaf node it is the payload's
/// own `DataType` and must match `Payload::data_type()`.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureNode {
    pub kind: StructureKind,
    pub tag: u32,
    pub num: u8,
    pub padding: u8,
    pub declared_type: DataType,
    pub body: Body,
}

impl StructureNode {
    pub fn new_bank(tag: u16, num: u8, declared_type: DataType) -> StructureNode {
        StructureNode {
            kind: StructureKind::Bank,
            tag: tag as u32,
            num,
            padding: 0,
            declared_type,
            body: default_body(declared_type),
        }
    }

    pub fn new_segment(tag: u8, declared_type: DataType) -> StructureNode {
        StructureNode {
            kind: StructureKind::Segment,
            tag: tag as u32,
            num: 0,
            padding: 0,
            declared_type,
            body: default_body(declared_type),
        }
    }

    pub fn new_tagsegment(tag: u16, declared_type: DataType) -> StructureNode {
        StructureNode {
            kind: StructureKind::TagSegment,
            tag: tag as u32,
            num: 0,
            padding: 0,
            declared_type,
            body: default_body(declared_type),
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.body, Body::Children(_))
    }

    pub fn children(&self) -> &[StructureNode] {
        match &self.body {
            Body::Children(c) => c,
            Body::Leaf(_) => &[],
        }
    }

    /// Sets a leaf's payload, failing with `TypeMismatch` if this node is a
    /// container or the payload's type doesn't match `declared_type`.
    pub fn set_payload(&mut self, payload: Payload) -> Result<()> {
        if payload.data_type() != self.declared_type {
            return Err(Error::TypeMismatch(format!(
                "node declares {:?} but payload is {:?}",
                self.declared_type,
                payload.data_type()
            )));
        }
        self.padding = 0;
        self.body = Body::Leaf(payload);
        Ok(())
    }

    /// Appends a child, failing with `TypeMismatch` if this node is a leaf
    /// or the child's kind doesn't match this node's declared container
    /// type: a container may only receive children whose declared
    /// payload-type matches its own declared container kind.
    pub fn add_child(&mut self, child: StructureNode) -> Result<()> {
        let expected = container_kind_for(self.declared_type)?;
        if child.kind != expected {
            return Err(Error::TypeMismatch(format!(
                "container declares child kind {:?} but got {:?}",
                expected, child.kind
            )));
        }
        match &mut self.body {
            Body::Children(c) => c.push(child),
            Body::Leaf(_) => {
                return Err(Error::TypeMismatch(
                    "cannot add a child to a leaf node".into(),
                ))
            }
        }
        Ok(())
    }

    pub fn remove_child(&mut self, index: usize) -> Result<StructureNode> {
        match &mut self.body {
            Body::Children(c) if index < c.len() => Ok(c.remove(index)),
            Body::Children(_) => Err(Error::EventIndexOutOfRange {
                index: index as u32,
                count: self.children().len() as u32,
            }),
            Body::Leaf(_) => Err(Error::TypeMismatch(
                "cannot remove a child from a leaf node".into(),
            )),
        }
    }

    /// Total declared length in 32-bit words, including this node's own
    /// header words. Recomputed bottom-up on demand — rather than caching
    /// a dirty bit as in the Java original, this tree
    /// always derives lengths from live children, so there is no
    /// "up-to-date-lengths" flag to go stale.
    pub fn length_words(&self) -> Result<u32> {
        let header = self.kind.header_words() as u32;
        let payload = match &self.body {
            Body::Children(children) => {
                let mut total = 0u32;
                for child in children {
                    total = total
                        .checked_add(child.length_words()?)
                        .ok_or_else(|| Error::MalformedHeader("length overflow".into()))?;
                }
                total
            }
            Body::Leaf(payload) => {
                let (bytes, _pad) = payload.encode(ByteOrder::native());
                (bytes.len() / 4) as u32
            }
        };
        Ok(header + payload)
    }

    /// Validates that declared types, child kinds, and length invariants
    /// hold throughout the subtree.
    pub fn validate(&self) -> Result<()> {
        match &self.body {
            Body::Children(children) => {
                let expected_kind = container_kind_for(self.declared_type)?;
                for child in children {
                    if child.kind != expected_kind {
                        return Err(Error::TypeMismatch(format!(
                            "child kind {:?} does not match declared {:?}",
                            child.kind, expected_kind
                        )));
                    }
                    child.validate()?;
                }
            }
            Body::Leaf(payload) => {
                if payload.data_type() != self.declared_type {
                    return Err(Error::TypeMismatch(
                        "leaf payload type does not match declared type".into(),
                    ));
                }
                if !self.kind.allows_padding() {
                    let width = self.declared_type.element_width();
                    if width == 1 || width == 2 {
                        return Err(Error::TypeMismatch(format!(
                            "tagsegments cannot carry a width-{} payload (no padding field)",
                            width
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Encodes this node and its subtree into `buf`, honoring `buf`'s byte
    /// order. This is the E1 object-builder write path; the record codec
    /// calls this once per event.
    pub fn encode_into(&self, buf: &mut ByteBuffer) -> Result<()> {
        let length_words = self.length_words()?;
        // The padding field reflects the payload's own trailing pad, not
        // whatever was last stored on the node — a leaf's pad is a pure
        // function of its element count and width, so
        // it's recomputed here rather than trusted from a stored field that
        // `set_payload` can't keep in sync without an extra encode pass.
        let padding = match &self.body {
            Body::Leaf(payload) => payload.encode(buf.order()).1,
            Body::Children(_) => 0,
        };
        match self.kind {
            StructureKind::Bank => {
                let header = super::header::BankHeader {
                    tag: self.tag as u16,
                    padding,
                    data_type: self.declared_type,
                    num: self.num,
                    length_words,
                };
                let (w0, w1) = header.encode()?;
                buf.put_u32(w0);
                buf.put_u32(w1);
            }
            StructureKind::Segment => {
                let header = super::header::SegmentHeader {
                    tag: self.tag as u8,
                    padding,
                    data_type: self.declared_type,
                    length_words: length_words - 1,
                };
                buf.put_u32(header.encode());
            }
            StructureKind::TagSegment => {
                let header = super::header::TagSegmentHeader {
                    tag: self.tag as u16,
                    data_type: self.declared_type,
                    length_words: length_words - 1,
                };
                buf.put_u32(header.encode());
            }
        }
        match &self.body {
            Body::Children(children) => {
                for child in children {
                    child.encode_into(buf)?;
                }
            }
            Body::Leaf(payload) => {
                let (bytes, _pad) = payload.encode(buf.order());
                buf.put_bytes(&bytes);
            }
        }
        Ok(())
    }

    pub fn encode(&self, order: ByteOrder) -> Result<Vec<u8>> {
        let mut buf = ByteBuffer::new(0, order);
        self.encode_into(&mut buf)?;
        Ok(buf.into_vec())
    }

    /// Recursive-descent parse of one top-level structure. `kind` says
    /// which header layout to expect at the current position; `child_type`
    /// (from the parent, or `Bank` for a
    /// top-level event) is not consulted here — each node's own header
    /// declares its children's kind.
    pub fn decode(buf: &mut ByteBuffer, kind: StructureKind) -> Result<StructureNode> {
        let (tag, num, padding, declared_type, payload_words) = match kind {
            StructureKind::Bank => {
                let w0 = buf.get_u32()?;
                let w1 = buf.get_u32()?;
                let h = super::header::BankHeader::decode(w0, w1);
                (h.tag as u32, h.num, h.padding, h.data_type, h.payload_words()?)
            }
            StructureKind::Segment => {
                let w = buf.get_u32()?;
                let h = super::header::SegmentHeader::decode(w);
                (h.tag as u32, 0, h.padding, h.data_type, h.length_words)
            }
            StructureKind::TagSegment => {
                let w = buf.get_u32()?;
                let h = super::header::TagSegmentHeader::decode(w);
                (h.tag as u32, 0, 0, h.data_type, h.length_words)
            }
        };

        let body = if declared_type.is_container() {
            let child_kind = container_kind_for(declared_type)?;
            let end_word = buf.position() / 4 + payload_words as usize;
            let mut children = Vec::new();
            while buf.position() / 4 < end_word {
                children.push(StructureNode::decode(buf, child_kind)?);
            }
            Body::Children(children)
        } else {
            let payload_bytes = payload_words as usize * 4;
            let bytes = buf.get_bytes(payload_bytes)?;
            Body::Leaf(Payload::decode(declared_type, &bytes, padding, buf.order())?)
        };

        Ok(StructureNode {
            kind,
            tag,
            num,
            padding,
            declared_type,
            body,
        })
    }
}

fn default_body(declared_type: DataType) -> Body {
    if declared_type.is_container() {
        Body::Children(Vec::new())
    } else {
        Body::Leaf(match declared_type {
            DataType::Int8 => Payload::Int8(Vec::new()),
            DataType::Uint8 => Payload::Uint8(Vec::new()),
            DataType::Int16 => Payload::Int16(Vec::new()),
            DataType::Uint16 => Payload::Uint16(Vec::new()),
            DataType::Int32 => Payload::Int32(Vec::new()),
            DataType::Uint32 => Payload::Uint32(Vec::new()),
            DataType::Int64 => Payload::Int64(Vec::new()),
            DataType::Uint64 => Payload::Uint64(Vec::new()),
            DataType::Float32 => Payload::Float32(Vec::new()),
            DataType::Float64 => Payload::Float64(Vec::new()),
            DataType::StringArray => Payload::StringArray(Vec::new()),
            DataType::Composite => Payload::Composite(Vec::new()),
            _ => Payload::Unknown32(Vec::new()),
        })
    }
}

fn container_kind_for(declared_type: DataType) -> Result<StructureKind> {
    match declared_type {
        DataType::Bank => Ok(StructureKind::Bank),
        DataType::Segment => Ok(StructureKind::Segment),
        DataType::TagSegment => Ok(StructureKind::TagSegment),
        other => Err(Error::TypeMismatch(format!(
            "{:?} is not a container payload type",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips_int32() {
        let mut bank = StructureNode::new_bank(1, 1, DataType::Int32);
        bank.set_payload(Payload::Int32(vec![1, 2, 3])).unwrap();
        assert_eq!(bank.length_words().unwrap(), 5);

        let bytes = bank.encode(ByteOrder::Little).unwrap();
        let mut buf = ByteBuffer::wrap(bytes, ByteOrder::Little);
        let decoded = StructureNode::decode(&mut buf, StructureKind::Bank).unwrap();
        assert_eq!(decoded, bank);
    }

    #[test]
    fn bank_of_banks_round_trips() {
        let mut outer = StructureNode::new_bank(10, 0, DataType::Bank);
        let mut inner = StructureNode::new_bank(20, 1, DataType::Float32);
        inner
            .set_payload(Payload::Float32(vec![0.0, 0.5, -0.25, 1.0]))
            .unwrap();
        outer.add_child(inner).unwrap();

        let bytes = outer.encode(ByteOrder::Big).unwrap();
        let mut buf = ByteBuffer::wrap(bytes, ByteOrder::Big);
        let decoded = StructureNode::decode(&mut buf, StructureKind::Bank).unwrap();
        assert_eq!(decoded, outer);
    }

    #[test]
    fn rejects_mismatched_child_kind() {
        let mut outer = StructureNode::new_bank(1, 0, DataType::Bank);
        let segment = StructureNode::new_segment(2, DataType::Int8);
        assert!(outer.add_child(segment).is_err());
    }

    #[test]
    fn rejects_mismatched_payload_type() {
        let mut bank = StructureNode::new_bank(1, 0, DataType::Int32);
        assert!(bank.set_payload(Payload::Uint8(vec![1, 2])).is_err());
    }

    #[test]
    fn int16_padding_recorded_and_round_trips() {
        let mut bank = StructureNode::new_bank(5, 0, DataType::Int16);
        bank.set_payload(Payload::Int16(vec![1, 2, 3])).unwrap();
        let bytes = bank.encode(ByteOrder::Little).unwrap();
        let mut buf = ByteBuffer::wrap(bytes, ByteOrder::Little);
        let decoded = StructureNode::decode(&mut buf, StructureKind::Bank).unwrap();
        assert_eq!(decoded.padding, 2);
        match &decoded.body {
            Body::Leaf(Payload::Int16(v)) => assert_eq!(v, &vec![1, 2, 3]),
            _ => panic!("expected int16 leaf"),
        }
    }

    #[test]
    fn empty_bank_has_length_one_word_of_payload() {
        let bank = StructureNode::new_bank(1, 0, DataType::Int32);
        // header (2 words) + 0 payload words = 2 total, so the length
        // field (total - 1) is 1 even for a payload-free bank.
        assert_eq!(bank.length_words().unwrap(), 2);
    }

    #[test]
    fn string_array_round_trips() {
        let mut bank = StructureNode::new_bank(1, 0, DataType::StringArray);
        bank.set_payload(Payload::StringArray(vec![
            "hello".to_string(),
            "world".to_string(),
        ]))
        .unwrap();
        let bytes = bank.encode(ByteOrder::Little).unwrap();
        let mut buf = ByteBuffer::wrap(bytes, ByteOrder::Little);
        let decoded = StructureNode::decode(&mut buf, StructureKind::Bank).unwrap();
        match decoded.body {
            Body::Leaf(Payload::StringArray(v)) => {
                assert_eq!(v, vec!["hello".to_string(), "world".to_string()])
            }
            _ => panic!("expected string array"),
        }
    }
}
