//! Compact event scanning: a flat, pre-order node list per
//! event instead of an owned `StructureNode` tree, so callers that only
//! need a handful of fields out of a large event never pay for allocating
//! every leaf vector.
//!
//! Grounded on the same recursive-descent walk `StructureNode::decode`
//! uses (`tree.rs`), but each call appends a `ScanNode` to a flat `Vec`
//! instead of returning an owned child. Siblings and nested subtrees
//! interleave in pre-order, so a node's children are recorded as explicit
//! indices rather than assumed to occupy a contiguous range.

use crate::buffer::{ByteBuffer, ByteOrder};
use crate::error::Result;
use crate::header::{BankHeader, SegmentHeader, TagSegmentHeader};
use crate::reader::Reader;
use crate::tree::Payload;
use crate::types::{DataType, StructureKind};

/// One node of a scanned event's flat pre-order node list.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanNode {
    pub kind: StructureKind,
    pub tag: u32,
    pub num: u8,
    pub padding: u8,
    pub declared_type: DataType,
    /// Byte offset of this node's payload within the event's raw bytes
    /// (after this node's own header words).
    pub payload_offset: usize,
    pub payload_len: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl ScanNode {
    pub fn is_container(&self) -> bool {
        self.declared_type.is_container()
    }
}

/// A scanned event: its raw serialized bytes plus the flat node list
/// produced by walking it. Payload bytes and decoded payloads are computed
/// on demand from the raw bytes rather than materialized up front.
pub struct ScannedEvent {
    bytes: Vec<u8>,
    order: ByteOrder,
    nodes: Vec<ScanNode>,
}

impl ScannedEvent {
    pub fn scan(bytes: Vec<u8>, order: ByteOrder) -> Result<ScannedEvent> {
        let mut nodes = Vec::new();
        let mut buf = ByteBuffer::wrap(bytes.clone(), order);
        walk(&mut buf, StructureKind::Bank, None, &mut nodes)?;
        Ok(ScannedEvent { bytes, order, nodes })
    }

    pub fn nodes(&self) -> &[ScanNode] {
        &self.nodes
    }

    pub fn root(&self) -> &ScanNode {
        &self.nodes[0]
    }

    /// Raw, still-padded payload bytes for `node`.
    pub fn payload_bytes(&self, node: &ScanNode) -> &[u8] {
        &self.bytes[node.payload_offset..node.payload_offset + node.payload_len]
    }

    /// Decodes `node`'s payload into a typed `Payload`. Errors if `node` is
    /// a container (containers have no leaf payload to decode).
    pub fn decode_payload(&self, node: &ScanNode) -> Result<Payload> {
        let bytes = self.payload_bytes(node);
        Payload::decode(node.declared_type, bytes, node.padding, self.order)
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Recursive-descent walk mirroring `StructureNode::decode`, but appending
/// flat `ScanNode`s (with an index-based parent/children graph) instead of
/// nesting owned children.
fn walk(
    buf: &mut ByteBuffer,
    kind: StructureKind,
    parent: Option<usize>,
    nodes: &mut Vec<ScanNode>,
) -> Result<usize> {
    let (tag, num, padding, declared_type, payload_words) = match kind {
        StructureKind::Bank => {
            let w0 = buf.get_u32()?;
            let w1 = buf.get_u32()?;
            let h = BankHeader::decode(w0, w1);
            (h.tag as u32, h.num, h.padding, h.data_type, h.payload_words()?)
        }
        StructureKind::Segment => {
            let w = buf.get_u32()?;
            let h = SegmentHeader::decode(w);
            (h.tag as u32, 0, h.padding, h.data_type, h.length_words)
        }
        StructureKind::TagSegment => {
            let w = buf.get_u32()?;
            let h = TagSegmentHeader::decode(w);
            (h.tag as u32, 0, 0, h.data_type, h.length_words)
        }
    };

    let payload_offset = buf.position();
    let payload_len = payload_words as usize * 4;

    let index = nodes.len();
    nodes.push(ScanNode {
        kind,
        tag,
        num,
        padding,
        declared_type,
        payload_offset,
        payload_len,
        parent,
        children: Vec::new(),
    });

    if declared_type.is_container() {
        let child_kind = match declared_type {
            DataType::Bank => StructureKind::Bank,
            DataType::Segment => StructureKind::Segment,
            DataType::TagSegment => StructureKind::TagSegment,
            _ => unreachable!("is_container() guarantees one of the three container types"),
        };
        let end_word = payload_offset / 4 + payload_words as usize;
        while buf.position() / 4 < end_word {
            let child_index = walk(buf, child_kind, Some(index), nodes)?;
            nodes[index].children.push(child_index);
        }
    } else {
        buf.set_position(payload_offset + payload_len)?;
    }

    Ok(index)
}

/// A [`Reader`]-backed random-access scanner: reads events the same way a
/// [`Reader`] does, but hands back a [`ScannedEvent`] instead of an owned
/// `StructureNode` tree.
pub struct CompactReader {
    reader: Reader,
}

impl CompactReader {
    pub fn from_buffer(bytes: Vec<u8>) -> Result<CompactReader> {
        Ok(CompactReader {
            reader: Reader::from_buffer(bytes)?,
        })
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<CompactReader> {
        Ok(CompactReader {
            reader: Reader::from_file(path)?,
        })
    }

    pub fn event_count(&self) -> u32 {
        self.reader.event_count()
    }

    /// Random access (1-based), scanning event `one_based` into a flat node
    /// list without materializing an owned tree.
    pub fn scan_event(&mut self, one_based: u32) -> Result<ScannedEvent> {
        let bytes = self.reader.get_event(one_based)?;
        ScannedEvent::scan(bytes, self.reader.byte_order())
    }

    pub fn rewind(&mut self) {
        self.reader.rewind()
    }

    pub fn scan_next_event(&mut self) -> Result<Option<ScannedEvent>> {
        match self.reader.next_event()? {
            None => Ok(None),
            Some(bytes) => Ok(Some(ScannedEvent::scan(bytes, self.reader.byte_order())?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Payload as TreePayload, StructureNode};
    use crate::writer::{Writer, WriterConfig};

    fn nested_event() -> StructureNode {
        let mut outer = StructureNode::new_bank(10, 0, DataType::Bank);
        let mut inner_a = StructureNode::new_bank(11, 1, DataType::Int32);
        inner_a.set_payload(TreePayload::Int32(vec![1, 2, 3])).unwrap();
        let mut inner_b = StructureNode::new_bank(12, 2, DataType::Float64);
        inner_b.set_payload(TreePayload::Float64(vec![1.5, -2.5])).unwrap();
        outer.add_child(inner_a).unwrap();
        outer.add_child(inner_b).unwrap();
        outer
    }

    #[test]
    fn flat_scan_matches_tree_shape() {
        let bytes = nested_event().encode(ByteOrder::Little).unwrap();
        let scanned = ScannedEvent::scan(bytes, ByteOrder::Little).unwrap();

        assert_eq!(scanned.nodes().len(), 3);
        let root = scanned.root();
        assert!(root.is_container());
        assert_eq!(root.children.len(), 2);

        let child_a = &scanned.nodes()[root.children[0]];
        assert_eq!(child_a.tag, 11);
        match scanned.decode_payload(child_a).unwrap() {
            TreePayload::Int32(v) => assert_eq!(v, vec![1, 2, 3]),
            _ => panic!("expected int32 leaf"),
        }

        let child_b = &scanned.nodes()[root.children[1]];
        assert_eq!(child_b.tag, 12);
        match scanned.decode_payload(child_b).unwrap() {
            TreePayload::Float64(v) => assert_eq!(v, vec![1.5, -2.5]),
            _ => panic!("expected float64 leaf"),
        }
    }

    #[test]
    fn compact_reader_scans_events_written_by_writer() {
        let mut writer = Writer::new_buffer(WriterConfig::default()).unwrap();
        writer.write_event(&nested_event()).unwrap();
        writer.write_event(&nested_event()).unwrap();
        writer.close().unwrap();

        let mut compact = CompactReader::from_buffer(writer.into_buffer().unwrap()).unwrap();
        assert_eq!(compact.event_count(), 2);

        let first = compact.scan_event(1).unwrap();
        assert_eq!(first.root().children.len(), 2);

        compact.rewind();
        let mut count = 0;
        while compact.scan_next_event().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn leaf_event_has_single_node_with_no_children() {
        let mut bank = StructureNode::new_bank(1, 0, DataType::Uint8);
        bank.set_payload(TreePayload::Uint8(vec![9, 8, 7])).unwrap();
        let bytes = bank.encode(ByteOrder::Big).unwrap();
        let scanned = ScannedEvent::scan(bytes, ByteOrder::Big).unwrap();
        assert_eq!(scanned.nodes().len(), 1);
        assert!(scanned.root().children.is_empty());
        assert!(!scanned.root().is_container());
    }
}
